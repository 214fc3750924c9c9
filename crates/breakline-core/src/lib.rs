//! Breakline debugger engine
//!
//! User-mode debug-event engine for Windows x86_64 targets. A session
//! attaches to a running process by pid, programs hardware (Dr0-Dr3) and
//! software (INT3) breakpoints across its live thread population, and pumps
//! debug events, handing each hit to a user handler that may rewrite the
//! interrupted thread's general-purpose registers.
//!
//! The pure model (breakpoint collections, Dr7 math, session bookkeeping)
//! compiles everywhere; everything that touches the OS is Windows-only.

pub mod dr7;
pub mod session;

#[cfg(target_os = "windows")]
pub mod context;
#[cfg(target_os = "windows")]
pub mod hardware;
#[cfg(target_os = "windows")]
pub mod memory;
#[cfg(target_os = "windows")]
pub mod privilege;
#[cfg(target_os = "windows")]
pub mod threads;

#[cfg(target_os = "windows")]
pub(crate) mod event_loop;

pub use breakline_common::{Error, Result};
pub use session::{access_debugger, create_debugger, DebugSession};
