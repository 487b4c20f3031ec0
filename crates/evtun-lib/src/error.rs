//! Role errors

use crate::config::ConfigError;
use evtun_http::TransportError;
use evtun_relay::RelayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
