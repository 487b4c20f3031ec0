//! Event protocol definitions
//!
//! This crate defines the routed event that carries one step of a tunneled TCP
//! connection, the queue those events travel through inside a process, and the
//! batch codecs used on the HTTP hop between the two tunnel sides.

pub mod codec;
pub mod event;
pub mod queue;

pub use codec::{CodecError, Encoding};
pub use event::{Event, EventCount, EventName};
pub use queue::{EventQueue, EventQueueGuard};

/// Default read buffer size for relayed sockets (16KB)
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;
