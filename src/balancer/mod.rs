//! Load balancer
//!
//! The public entry point in multi-process mode: relays each request to one
//! worker endpoint in strict rotation.

pub mod proxy;
pub mod table;

pub use proxy::{Balancer, BalancerState};
pub use table::WorkerTable;
