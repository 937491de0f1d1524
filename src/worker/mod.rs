//! Worker runtime
//!
//! A worker terminates HTTP connections, validates input and turns each data
//! request into one operation for the coordinator. It holds no user data.

pub mod client;
pub mod http;
pub mod server;

pub use client::StoreClient;
pub use server::WorkerServer;
