//! TCP connection relay over routed events
//!
//! Two flavours of connection-leg manager share one registry abstraction:
//!
//! - [`TcpInput`] (ingress) accepts local application connections and turns
//!   each into `TcpOpen`/`TcpData`/`TcpClose` events.
//! - [`TcpOutput`] (egress) dials the real destination when a `TcpOpen`
//!   arrives and relays bytes both ways.
//!
//! Both consume their own inbound [`EventQueue`](evtun_proto::EventQueue) and
//! produce into the queue of the next hop.

pub mod connect;
pub mod egress;
pub mod error;
pub mod ingress;
pub mod leg;
pub mod registry;

pub use connect::Connect;
pub use egress::{TcpOutput, TcpOutputConfig};
pub use error::RelayError;
pub use ingress::{TcpInput, TcpInputConfig};
pub use leg::LegManager;
pub use registry::ConnectionRegistry;
