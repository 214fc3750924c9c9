//! Error types for Breakline

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("debug privilege unavailable: {0}")]
    Privilege(String),

    #[error("failed to attach to pid {pid}: {message}")]
    Attach { pid: u32, message: String },

    #[error("thread {tid} operation failed: {message}")]
    ThreadOp { tid: u32, message: String },

    #[error("memory patch at {address:#x} failed: {message}")]
    Memory { address: u64, message: String },

    #[error("hardware slot {0} out of range (0..=3)")]
    Slot(usize),

    #[error("session busy: {0}")]
    Busy(String),

    #[error("breakpoint handler failed: {0}")]
    Callback(String),

    #[error("breakpoint error: {0}")]
    Breakpoint(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
