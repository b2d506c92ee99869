//! Error types for the connection manager seams.

use thiserror::Error;

/// A call into the overview service failed.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("overview service is dead")]
    DeadObject,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Binding to the overview service was refused.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("security error: {0}")]
    Security(String),

    #[error("bind io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("prefs io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("prefs json error: {0}")]
    Json(#[from] serde_json::Error),
}
