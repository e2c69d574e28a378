use parking_lot::{Mutex, RwLock};
use std::{
    fmt,
    io::{Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};
use wiretap_store::SocketEndpoint;

use crate::{
    document::{DataSourceEntry, RegistryDocument, SocketEntry},
    error::Result,
    status::ConnectionStatus,
    table::{DataSource, DataSourcePattern, FaultTable, Resolution, SocketPattern},
};

/// Storage collaborator notified after every mutation of a persistent registry.
pub trait RegistryPersister: Send + Sync {
    fn store(&self, document: &RegistryDocument) -> anyhow::Result<()>;
}

/// Process-level fault table with optional per-scope overrides.
///
/// Resolving a target that no rule refuses or delays registers it as
/// [`ConnectionStatus::Open`], so after a run the registry lists every
/// endpoint the code under test talked to.
#[derive(Default)]
pub struct FaultRegistry {
    global: FaultTable,
    scopes: Mutex<Vec<Weak<FaultTable>>>,
    thread_local: AtomicBool,
    persistent: AtomicBool,
    persister: RwLock<Option<Arc<dyn RegistryPersister>>>,
}

impl FaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persister<P: RegistryPersister + 'static>(persister: P) -> Self {
        let registry = Self::new();
        registry.set_persister(persister);
        registry
    }

    pub fn set_persister<P: RegistryPersister + 'static>(&self, persister: P) {
        *self.persister.write() = Some(Arc::new(persister));
    }

    pub fn set_persistent(&self, persistent: bool) {
        self.persistent.store(persistent, Ordering::SeqCst);
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent.load(Ordering::SeqCst)
    }

    /// Enables consulting scoped tables before the global one.
    pub fn set_thread_local(&self, enabled: bool) {
        self.thread_local.store(enabled, Ordering::SeqCst);
    }

    pub fn is_thread_local(&self) -> bool {
        self.thread_local.load(Ordering::SeqCst)
    }

    /// Creates a private override table tracked by this registry.
    ///
    /// The registry only keeps a weak reference; dropping every `Arc`
    /// releases the table.
    pub fn scope(&self) -> Arc<FaultTable> {
        let table = Arc::new(FaultTable::new());
        let mut scopes = self.scopes.lock();
        scopes.retain(|scope| scope.strong_count() > 0);
        scopes.push(Arc::downgrade(&table));

        table
    }

    pub fn global(&self) -> &FaultTable {
        &self.global
    }

    fn scoped<'a>(&self, scope: Option<&'a FaultTable>) -> Option<&'a FaultTable> {
        scope.filter(|_| self.is_thread_local())
    }

    pub fn resolve_socket(
        &self,
        endpoint: &SocketEndpoint,
        scope: Option<&FaultTable>,
    ) -> ConnectionStatus {
        if let Some(status) = self.scoped(scope).and_then(|table| table.find_socket(endpoint)) {
            return status;
        }

        match self.global.sockets.resolve(endpoint) {
            Resolution::Matched(status) => status,
            Resolution::Known => ConnectionStatus::Open,
            Resolution::Registered => {
                tracing::debug!(endpoint = %endpoint.address(), "discovered socket endpoint");
                self.persist();
                ConnectionStatus::Open
            }
        }
    }

    pub fn resolve_data_source(
        &self,
        data_source: &DataSource,
        scope: Option<&FaultTable>,
    ) -> ConnectionStatus {
        if let Some(status) = self
            .scoped(scope)
            .and_then(|table| table.find_data_source(data_source))
        {
            return status;
        }

        match self.global.data_sources.resolve(data_source) {
            Resolution::Matched(status) => status,
            Resolution::Known => ConnectionStatus::Open,
            Resolution::Registered => {
                tracing::debug!(data_source = %data_source, "discovered data source");
                self.persist();
                ConnectionStatus::Open
            }
        }
    }

    pub fn set_socket_status(&self, pattern: SocketPattern, status: ConnectionStatus) {
        tracing::info!(pattern = %pattern, status = %status, "socket status changed");
        self.global.set_socket_status(pattern, status);
        self.persist();
    }

    pub fn set_data_source_status(&self, pattern: DataSourcePattern, status: ConnectionStatus) {
        tracing::info!(pattern = %pattern, status = %status, "data source status changed");
        self.global.set_data_source_status(pattern, status);
        self.persist();
    }

    pub fn sockets(&self) -> Vec<(SocketPattern, ConnectionStatus)> {
        self.global.sockets()
    }

    pub fn data_sources(&self) -> Vec<(DataSourcePattern, ConnectionStatus)> {
        self.global.data_sources()
    }

    /// Empties the global table and every live scope, and turns persistence off.
    pub fn clear(&self) {
        self.global.clear();

        let mut scopes = self.scopes.lock();
        scopes.retain(|scope| match scope.upgrade() {
            Some(table) => {
                table.clear();
                true
            }
            None => false,
        });

        self.set_persistent(false);

        tracing::info!("fault registry cleared");
    }

    pub fn serialize(&self) -> RegistryDocument {
        RegistryDocument {
            persistent: self.is_persistent(),
            sockets: self
                .global
                .sockets()
                .into_iter()
                .map(|(pattern, status)| SocketEntry {
                    host: pattern.host,
                    port: pattern.port,
                    status,
                })
                .collect(),
            data_sources: self
                .global
                .data_sources()
                .into_iter()
                .map(|(pattern, status)| DataSourceEntry {
                    url: pattern.url,
                    user_name: pattern.user,
                    status,
                })
                .collect(),
        }
    }

    /// Merges the document's rules into the global table without persisting.
    pub fn deserialize(&self, document: RegistryDocument) {
        for entry in document.sockets {
            self.global.set_socket_status(
                SocketPattern {
                    host: entry.host,
                    port: entry.port,
                },
                entry.status,
            );
        }

        for entry in document.data_sources {
            self.global.set_data_source_status(
                DataSourcePattern {
                    url: entry.url,
                    user: entry.user_name,
                },
                entry.status,
            );
        }

        self.set_persistent(document.persistent);
    }

    pub fn write_json<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, &self.serialize())?;

        Ok(())
    }

    pub fn read_json<R: Read>(&self, reader: R) -> Result<()> {
        let document = serde_json::from_reader::<_, RegistryDocument>(reader)?;
        self.deserialize(document);

        Ok(())
    }

    fn persist(&self) {
        if !self.is_persistent() {
            return;
        }

        let Some(persister) = self.persister.read().clone() else {
            return;
        };

        if let Err(e) = persister.store(&self.serialize()) {
            tracing::warn!(error = %e, "failed to persist fault registry");
        }
    }
}

impl fmt::Debug for FaultRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultRegistry")
            .field("global", &self.global)
            .field("thread_local", &self.is_thread_local())
            .field("persistent", &self.is_persistent())
            .finish_non_exhaustive()
    }
}
