use std::io;

use crate::status::ConnectionStatus;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("io `{0}`")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Connection failure simulated by the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connection to {target} refused (injected status {status})")]
pub struct InjectedFault {
    pub target: String,
    pub status: ConnectionStatus,
}

impl From<InjectedFault> for io::Error {
    fn from(fault: InjectedFault) -> Self {
        io::Error::new(io::ErrorKind::ConnectionRefused, fault)
    }
}
