use thiserror::Error;

/// Relay errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {source}\n\nTroubleshooting:\n  • Check if another process is using this address\n  • Try using a different address or port")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("Failed to dial {address}: {source}")]
    Dial {
        address: String,
        source: std::io::Error,
    },

    #[error("Connection not found in registry: {0}")]
    ConnectNotFound(String),
}
