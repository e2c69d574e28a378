#![forbid(unsafe_code)]

pub mod config;

mod error;
mod expectation;
mod matcher;
mod spy;
mod wiretap;

pub use error::*;
pub use expectation::*;
pub use matcher::*;
pub use spy::*;
pub use wiretap::*;

pub use config::{ConfigBuilder, WiretapConfig};

pub use wiretap_registry::{
    CancellationToken, ConnectionStatus, DataSource, DataSourceEntry, DataSourcePattern,
    FaultDecision, FaultRegistry, FaultTable, InjectedFault, RegistryDocument, RegistryError,
    RegistryPersister, SocketEntry, SocketPattern,
};
pub use wiretap_store::*;
