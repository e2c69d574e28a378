#![forbid(unsafe_code)]

mod connect;
mod document;
mod error;
mod registry;
mod status;
mod table;

pub use connect::*;
pub use document::*;
pub use error::*;
pub use registry::*;
pub use status::*;
pub use table::{DataSource, DataSourcePattern, FaultTable, Pattern, SocketPattern};
pub use tokio_util::sync::CancellationToken;
