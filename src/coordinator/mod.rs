//! Primary coordinator
//!
//! The coordinator is responsible for:
//! - Owning the only mutable user store
//! - Applying operations from all workers one at a time
//! - Replying to the worker that issued each operation
//! - Respawning worker processes that exit

pub mod server;
pub mod service;
pub mod store;
pub mod supervisor;

pub use server::Primary;
pub use service::{serve_worker_io, Coordinator, CoordinatorHandle, Submission};
pub use store::Store;
pub use supervisor::Supervisor;
