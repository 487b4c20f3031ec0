//! Transport errors

use evtun_proto::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected HTTP status: {0}")]
    Status(reqwest::StatusCode),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Failed to bind HTTP listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether repeating the same request cannot succeed. The peer refused
    /// the request itself (4xx), so it is dropped instead of retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TransportError::Status(status) if status.is_client_error())
    }
}
