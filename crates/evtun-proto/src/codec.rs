//! Batch codecs for the HTTP hop
//!
//! The encoding is chosen by content kind, which doubles as the HTTP
//! `Content-Type` of every batch exchanged between the two sides.

use crate::event::Event;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Serialization used for event batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Encoding {
    /// `application/json`
    #[default]
    Json,
    /// `application/bincode`
    Bincode,
}

impl Encoding {
    pub const JSON: &'static str = "application/json";
    pub const BINCODE: &'static str = "application/bincode";

    /// Content kind, as written in configuration and HTTP headers
    pub fn content_type(&self) -> &'static str {
        match self {
            Encoding::Json => Self::JSON,
            Encoding::Bincode => Self::BINCODE,
        }
    }

    /// Encode any serializable value
    pub fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        Ok(match self {
            Encoding::Json => serde_json::to_vec(value)?,
            Encoding::Bincode => bincode::serialize(value)?,
        })
    }

    /// Decode any deserializable value
    pub fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        Ok(match self {
            Encoding::Json => serde_json::from_slice(bytes)?,
            Encoding::Bincode => bincode::deserialize(bytes)?,
        })
    }

    pub fn encode_batch(&self, events: &[Event]) -> Result<Vec<u8>, CodecError> {
        self.encode(events)
    }

    /// Decode a batch. In JSON a `null` document is accepted as an empty batch.
    pub fn decode_batch(&self, bytes: &[u8]) -> Result<Vec<Event>, CodecError> {
        match self {
            Encoding::Json => Ok(self
                .decode::<Option<Vec<Event>>>(bytes)?
                .unwrap_or_default()),
            Encoding::Bincode => self.decode(bytes),
        }
    }
}

impl FromStr for Encoding {
    type Err = CodecError;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            Self::JSON => Ok(Encoding::Json),
            Self::BINCODE => Ok(Encoding::Bincode),
            other => Err(CodecError::UnknownEncoding(other.to_string())),
        }
    }
}

impl TryFrom<String> for Encoding {
    type Error = CodecError;

    fn try_from(kind: String) -> Result<Self, Self::Error> {
        kind.parse()
    }
}

impl From<Encoding> for String {
    fn from(encoding: Encoding) -> Self {
        encoding.content_type().to_string()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.content_type())
    }
}
