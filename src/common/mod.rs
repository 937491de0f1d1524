//! Common utilities and types shared across userhive

pub mod config;
pub mod error;
pub mod protocol;
pub mod role;
pub mod tracing_middleware;
pub mod user;

pub use config::Config;
pub use error::{Error, Result};
pub use role::ProcessRole;
pub use user::{User, UserAttributes};
