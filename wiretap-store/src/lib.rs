#![forbid(unsafe_code)]

mod context;
mod endpoint;
mod stats;
mod store;
pub mod traffic;

pub use context::*;
pub use endpoint::*;
pub use stats::*;
pub use store::*;
pub use traffic::{now_millis, Direction, Packet, TrafficCapture};
