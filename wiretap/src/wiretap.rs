use std::{io, sync::Arc, time::Duration};
use wiretap_registry::{CancellationToken, DataSource, FaultDecision, FaultRegistry, FaultTable};
use wiretap_store::{
    now_millis, CallStore, Direction, ExecutionContext, RecordKey, SocketEndpoint,
    StatementEndpoint, Stats, TrafficCapture,
};

use crate::{config::WiretapConfig, error::SpyError, expectation::Expectation, spy::Spy};

/// Entry point shared by interception hooks and tests.
///
/// Cloning is cheap and every clone records into the same store.
#[derive(Debug, Clone)]
pub struct Wiretap {
    store: Arc<CallStore>,
    traffic: Arc<TrafficCapture>,
    registry: Arc<FaultRegistry>,
    config: Arc<WiretapConfig>,
}

impl Wiretap {
    pub fn new(config: WiretapConfig) -> Self {
        Self::with_registry(config, Arc::new(FaultRegistry::new()))
    }

    /// Uses an existing registry, for instance one with a persister attached.
    pub fn with_registry(config: WiretapConfig, registry: Arc<FaultRegistry>) -> Self {
        registry.set_thread_local(config.thread_local_faults);
        registry.set_persistent(config.persist_registry);

        Self {
            store: Arc::new(CallStore::new()),
            traffic: Arc::new(TrafficCapture::new()),
            registry,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &WiretapConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CallStore> {
        &self.store
    }

    pub fn traffic(&self) -> &Arc<TrafficCapture> {
        &self.traffic
    }

    pub fn registry(&self) -> &Arc<FaultRegistry> {
        &self.registry
    }

    /// Context of the calling thread, with a call site when configured.
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::capture(self.config.capture_call_site)
    }

    pub fn on_statement_executed(
        &self,
        sql: &str,
        context: &ExecutionContext,
        elapsed: Duration,
        rows: u64,
    ) {
        let endpoint = StatementEndpoint::parse(sql);

        tracing::trace!(kind = %endpoint.kind, rows, "statement executed");

        self.store.record(
            RecordKey::new(endpoint, context.clone()),
            &Stats::statement(elapsed, rows),
        );
    }

    pub fn on_socket_bytes(
        &self,
        endpoint: &SocketEndpoint,
        context: &ExecutionContext,
        direction: Direction,
        timestamp: i64,
        bytes: &[u8],
    ) {
        let len = bytes.len() as u64;
        let stats = match direction {
            Direction::Received => Stats::received(len),
            Direction::Sent => Stats::sent(len),
        };

        tracing::trace!(endpoint = %endpoint, ?direction, len, "socket transfer");

        let key = RecordKey::new(endpoint.clone(), context.clone());

        if self.config.capture_traffic {
            self.traffic.record(key.clone(), direction, timestamp, bytes);
        }

        self.store.record(key, &stats);
    }

    /// [`Wiretap::on_socket_bytes`] stamped with the current wall clock.
    pub fn on_socket_bytes_now(
        &self,
        endpoint: &SocketEndpoint,
        context: &ExecutionContext,
        direction: Direction,
        bytes: &[u8],
    ) {
        self.on_socket_bytes(endpoint, context, direction, now_millis(), bytes);
    }

    /// Applies injected faults before a socket connect.
    pub async fn on_connect_attempt(
        &self,
        endpoint: &SocketEndpoint,
        scope: Option<&FaultTable>,
        cancel: &CancellationToken,
    ) -> io::Result<FaultDecision> {
        self.registry.on_connect_attempt(endpoint, scope, cancel).await
    }

    pub async fn on_data_source_attempt(
        &self,
        data_source: &DataSource,
        scope: Option<&FaultTable>,
        cancel: &CancellationToken,
    ) -> io::Result<FaultDecision> {
        self.registry
            .on_data_source_attempt(data_source, scope, cancel)
            .await
    }

    /// A spy whose window starts now.
    pub fn spy(&self) -> Spy {
        Spy::new(self.store.clone(), self.traffic.clone(), &self.config)
    }

    pub fn expect(&self, expectation: Expectation) -> Result<Spy, SpyError> {
        let spy = self.spy();
        spy.expect(expectation)?;

        Ok(spy)
    }

    /// Forgets every recorded call and payload. Fault rules are untouched.
    pub fn reset(&self) {
        self.store.reset();
        self.traffic.reset();
    }
}

impl Default for Wiretap {
    fn default() -> Self {
        Self::new(WiretapConfig::default())
    }
}
