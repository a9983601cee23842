//! Error types for dlsession core

use thiserror::Error;

/// Errors that can occur in dlsession core.
///
/// Storage failures never show up here: resume-record I/O degrades
/// silently to "no persisted state" and is only logged. The sole error a
/// coordinator operation returns synchronously is `InvalidUrl`; everything
/// else arrives through the failed event, or not at all.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server returned status {status}")]
    Server { status: u16 },

    #[error("malformed resume blob: {0}")]
    MalformedBlob(#[from] serde_json::Error),
}
