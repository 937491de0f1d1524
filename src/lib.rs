//! # userhive
//!
//! A multi-process HTTP API for user records:
//! - One primary process owns the only copy of the data
//! - Worker processes serve HTTP and forward every read and write to the primary
//! - A round-robin load balancer on the public port spreads requests over workers
//! - Dead workers are respawned on the same port
//!
//! ## Architecture
//!
//! ```text
//!                 clients
//!                    │ HTTP :4000
//! ┌──────────────────▼──────────────────────┐
//! │ Primary                                 │
//! │   Balancer (round robin)                │
//! │   Coordinator loop ── Store             │
//! │   Supervisor (respawns workers)         │
//! └──────┬──────────────┬──────────────┬────┘
//!   HTTP │ :4001   HTTP │ :4002   HTTP │ :4003
//! ┌──────▼─────┐ ┌──────▼─────┐ ┌──────▼─────┐
//! │ Worker 0   │ │ Worker 1   │ │ Worker 2   │
//! │ stdio chan │ │ stdio chan │ │ stdio chan │
//! └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! Workers talk to the coordinator over newline-delimited JSON envelopes on
//! their stdin/stdout.
//!
//! ## Usage
//!
//! ### Start the cluster
//! ```bash
//! userhive serve --port 4000 --workers 3
//! ```
//!
//! ### Single process
//! ```bash
//! userhive serve --single
//! ```
//!
//! ### Balancer in front of already running workers
//! ```bash
//! userhive balance --port 4000 --workers 3
//! ```

#![allow(clippy::result_large_err)]

pub mod balancer;
pub mod common;
pub mod coordinator;
pub mod worker;

// Re-export commonly used types
pub use balancer::Balancer;
pub use common::{Config, Error, Result};
pub use coordinator::Primary;
pub use worker::WorkerServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
