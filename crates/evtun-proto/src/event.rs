//! Routed tunnel events

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a tunnel event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    /// A connection leg was opened (or, echoed back, the pairing was established)
    TcpOpen,
    /// Bytes read from a connection leg
    TcpData,
    /// A connection leg was closed
    TcpClose,
    /// Any name this build does not know; dropped by the managers
    #[serde(other)]
    Unknown,
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventName::TcpOpen => "TcpOpen",
            EventName::TcpData => "TcpData",
            EventName::TcpClose => "TcpClose",
            EventName::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// One routed message of the tunnel protocol.
///
/// `from` is the routing key of the leg that produced the event and `to` the
/// routing key of the leg it is addressed to (empty while the pairing is not
/// known yet). Events are never mutated after construction; they move between
/// queues by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "Nm")]
    pub name: EventName,
    #[serde(rename = "Fm")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    /// Creation time, Unix nanoseconds. Informational only.
    #[serde(rename = "Tm")]
    pub timestamp: i64,
    #[serde(rename = "Dt", default, with = "payload")]
    pub payload: Option<Vec<u8>>,
}

impl Event {
    fn new(name: EventName, from: String, to: String, payload: Option<Vec<u8>>) -> Self {
        Self {
            name,
            from,
            to,
            timestamp: now_nanos(),
            payload,
        }
    }

    pub fn open(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(EventName::TcpOpen, from.into(), to.into(), None)
    }

    pub fn data(from: impl Into<String>, to: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::new(EventName::TcpData, from.into(), to.into(), Some(payload))
    }

    pub fn close(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(EventName::TcpClose, from.into(), to.into(), None)
    }

    /// Payload length in bytes (0 for events without payload)
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Vec::len)
    }
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Length of a provider queue, as served by the count endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCount {
    pub count: u64,
}

// Payload bytes travel as base64 in human-readable formats and as a raw byte
// string in binary ones.
mod payload {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    struct RawBytes<'a>(&'a [u8]);

    impl Serialize for RawBytes<'_> {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_bytes(self.0)
        }
    }

    pub fn serialize<S>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match data {
            None => serializer.serialize_none(),
            Some(bytes) if serializer.is_human_readable() => {
                serializer.serialize_some(&BASE64.encode(bytes))
            }
            Some(bytes) => serializer.serialize_some(&RawBytes(bytes)),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            Option::<String>::deserialize(deserializer)?
                .map(|text| BASE64.decode(text).map_err(D::Error::custom))
                .transpose()
        } else {
            Option::<Vec<u8>>::deserialize(deserializer)
        }
    }
}
