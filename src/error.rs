// src/error.rs
use std::io;

use thiserror::Error;

/// Central error type for the proxy core.
///
/// Per-connection I/O failures are handled in place by the event loop and
/// never surface through this type; `RavelError` is for startup failures,
/// configuration problems, and the handful of conditions a caller can act on.
#[derive(Debug, Error)]
pub enum RavelError {
    /// Underlying I/O error from the OS or network.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Address could not be parsed or resolved.
    #[error("invalid address: {0}")]
    Addr(String),

    /// Rejected configuration (e.g. listen and backend identical).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Connection pool has no free slot.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// A buffer has no writable tail left; caller must compact or back off.
    #[error("buffer out of space")]
    NoSpace,
}

pub type RavelResult<T> = Result<T, RavelError>;
