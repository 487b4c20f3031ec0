//! Behaviour shared by the ingress and egress connection-leg managers

use crate::connect::Connect;
use crate::error::RelayError;
use crate::registry::ConnectionRegistry;
use async_trait::async_trait;
use evtun_proto::{Event, EventName, EventQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info};

/// A connection-leg manager: owns a registry of legs and consumes an inbound
/// queue of events addressed to them.
///
/// `handle_open` is the only flavour-specific step; data and close events are
/// routed the same way on both sides.
#[async_trait]
pub trait LegManager: Send + Sync + 'static {
    /// Queue of events addressed to this manager's legs
    fn inbound(&self) -> &Arc<EventQueue>;

    /// Queue of the next hop, receiving this manager's events
    fn next(&self) -> &Arc<EventQueue>;

    fn registry(&self) -> &Arc<ConnectionRegistry>;

    /// Sleep between polls of an empty inbound queue
    fn idle_interval(&self) -> Duration;

    async fn handle_open(&self, event: Event);

    async fn handle_data(&self, event: Event) {
        debug!(
            tcp_from = %event.from,
            tcp_to = %event.to,
            bytes = event.payload_len(),
            "data event received"
        );
        let payload = event.payload.unwrap_or_default();
        match self.registry().write_to(&event.to, &payload).await {
            Ok(()) => debug!(tcp_to = %event.to, bytes = payload.len(), "wrote bytes to conn"),
            Err(RelayError::ConnectNotFound(_)) => {
                debug!(tcp_from = %event.from, tcp_to = %event.to, "cannot find conn in registry");
            }
            Err(e) => {
                // A broken leg stops reading too; its read loop sends the TcpClose
                error!(tcp_to = %event.to, "failed to write conn: {}", e);
                let _ = self.registry().close(&event.to);
            }
        }
    }

    async fn handle_close(&self, event: Event) {
        debug!(tcp_from = %event.from, tcp_to = %event.to, "close event received");
        if self.registry().close(&event.to).is_err() {
            debug!(tcp_from = %event.from, tcp_to = %event.to, "cannot find conn in registry");
        }
    }

    async fn dispatch(&self, event: Event) {
        match event.name {
            EventName::TcpOpen => self.handle_open(event).await,
            EventName::TcpData => self.handle_data(event).await,
            EventName::TcpClose => self.handle_close(event).await,
            EventName::Unknown => {
                error!(tcp_from = %event.from, tcp_to = %event.to, "invalid event type");
            }
        }
    }

    /// Drain the inbound queue once and process every event, in order.
    /// Returns how many events were processed.
    async fn process_pending(&self) -> usize {
        let events = self.inbound().drain_all();
        let processed = events.len();
        for event in events {
            self.dispatch(event).await;
        }
        processed
    }

    /// Inbound event loop; idles while the queue is empty
    async fn process_events(&self) {
        loop {
            if self.process_pending().await == 0 {
                tokio::time::sleep(self.idle_interval()).await;
            }
        }
    }
}

/// Relay bytes read from a socket as `TcpData` events until EOF, a read
/// error, or [`Connect::close`].
pub(crate) async fn pump_socket<R>(
    connect: &Connect,
    mut reader: R,
    buffer_size: usize,
    next: &EventQueue,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];
    loop {
        tokio::select! {
            _ = connect.closed() => break,
            read = reader.read(&mut buffer) => match read {
                Ok(0) => break,
                Ok(n) => {
                    debug!(tcp_from = %connect.from(), bytes = n, "read bytes from conn");
                    next.push(Event::data(
                        connect.from(),
                        connect.to_or_empty(),
                        buffer[..n].to_vec(),
                    ));
                }
                Err(e) => {
                    error!(tcp_from = %connect.from(), "failed to read conn: {}", e);
                    break;
                }
            },
        }
    }
}

/// Tear a leg down: close it, drop it from the registry and, unless
/// `silent`, tell the paired leg with a `TcpClose`.
pub(crate) async fn release(
    connect: &Arc<Connect>,
    registry: &ConnectionRegistry,
    next: &EventQueue,
    silent: bool,
) {
    connect.close();
    connect.shutdown_write().await;
    registry.remove_entry(connect);
    debug!(tcp_from = %connect.from(), "conn removed from registry");

    if !silent {
        next.push(Event::close(connect.from(), connect.to_or_empty()));
    }
    info!(alive = registry.len(), tcp_from = %connect.from(), "conn closed");
}
