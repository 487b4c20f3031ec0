//! evtun: tunnel TCP connections over HTTP polling
//!
//! The client role accepts local TCP connections and turns their traffic into
//! events; the server role replays those events against a fixed destination.
//! Events cross the HTTP hop in batches: the client pushes with POST and pulls
//! with GET, so only the server needs to be reachable.
//!
//! ```text
//! app -> TcpInput -> HttpEventSender ---POST--> HttpEventReceiver -> TcpOutput -> dest
//! app <- TcpInput <- HttpEventRetriever <--GET-- HttpEventProvider <- TcpOutput <- dest
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod server;

pub use client::Client;
pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use error::Error;
pub use server::Server;

// Re-export the building blocks
pub use evtun_http::{
    HttpEventProvider, HttpEventReceiver, HttpEventRetriever, HttpEventSender, RetryPolicy,
};
pub use evtun_proto::{Encoding, Event, EventName, EventQueue};
pub use evtun_relay::{LegManager, TcpInput, TcpOutput};
