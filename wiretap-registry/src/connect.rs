use std::{io, time::Duration};
use tokio_util::sync::CancellationToken;
use wiretap_store::SocketEndpoint;

use crate::{
    error::InjectedFault,
    registry::FaultRegistry,
    status::ConnectionStatus,
    table::{DataSource, FaultTable},
};

/// What an interception point should do with a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultDecision {
    Proceed,
    /// The attempt was held back for the given duration and may now proceed.
    Delayed(Duration),
    Refused(InjectedFault),
}

impl FaultDecision {
    pub fn proceeds(&self) -> bool {
        !matches!(self, Self::Refused(_))
    }

    /// Turns a refusal into the error a real unreachable endpoint would produce.
    pub fn into_io(self) -> io::Result<()> {
        match self {
            Self::Refused(fault) => Err(fault.into()),
            _ => Ok(()),
        }
    }
}

impl FaultRegistry {
    /// Applies the status of `endpoint` before the real connect happens.
    ///
    /// Injected delays sleep on the caller's task. Cancelling `cancel`, or
    /// dropping the returned future, abandons the attempt; the former reports
    /// it as [`io::ErrorKind::TimedOut`].
    pub async fn on_connect_attempt(
        &self,
        endpoint: &SocketEndpoint,
        scope: Option<&FaultTable>,
        cancel: &CancellationToken,
    ) -> io::Result<FaultDecision> {
        let status = self.resolve_socket(endpoint, scope);

        apply(status, endpoint.address(), cancel).await
    }

    pub async fn on_data_source_attempt(
        &self,
        data_source: &DataSource,
        scope: Option<&FaultTable>,
        cancel: &CancellationToken,
    ) -> io::Result<FaultDecision> {
        let status = self.resolve_data_source(data_source, scope);

        apply(status, data_source.to_string(), cancel).await
    }
}

async fn apply(
    status: ConnectionStatus,
    target: String,
    cancel: &CancellationToken,
) -> io::Result<FaultDecision> {
    let delay = status.delay();

    if let Some(delay) = delay {
        tracing::debug!(
            endpoint = %target,
            delay_ms = delay.as_millis() as u64,
            "delaying connection"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connection to {target} cancelled while delayed"),
                ));
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    if status.refuses() {
        tracing::debug!(endpoint = %target, status = %status, "refusing connection");

        return Ok(FaultDecision::Refused(InjectedFault { target, status }));
    }

    Ok(match delay {
        Some(delay) => FaultDecision::Delayed(delay),
        None => FaultDecision::Proceed,
    })
}
