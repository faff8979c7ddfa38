use std::io;
use thiserror::Error;

/// The primary error type for the `tuyacam-rs` library.
#[derive(Error, Debug)]
pub enum CamError {
    #[error("not connected to the device")]
    NotConnected,

    #[error("no response within the command timeout window")]
    CommandTimeout,

    #[error("connection lost")]
    Disconnected,

    #[error("decode failure: {0}")]
    Decode(String),

    #[error("no discovery reply within the timeout window")]
    DiscoveryTimeout,

    #[error("local key must be exactly 16 bytes")]
    InvalidKey,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out opening connection: {0}")]
    ConnectTimeout(#[from] tokio::time::error::Elapsed),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
