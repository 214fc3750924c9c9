//! Breakline common types
//!
//! Shared types, error definitions, the host-bridge trait, and logging
//! configuration used by the Breakline debugger engine and its embedding
//! hosts.

pub mod bridge;
pub mod error;
pub mod logging;
pub mod types;

pub use bridge::{HostBridge, NoopBridge};
pub use error::{Error, Result};
pub use logging::{init_host_logging, init_logging, init_logging_from_file, LogConfig};
pub use types::*;

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, trace, warn};
