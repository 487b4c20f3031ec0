//! Egress leg manager: dials the real destination on demand

use crate::connect::Connect;
use crate::error::RelayError;
use crate::leg::{pump_socket, release, LegManager};
use crate::registry::ConnectionRegistry;
use async_trait::async_trait;
use evtun_proto::{Event, EventQueue, DEFAULT_READ_BUFFER_SIZE};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, error, info, info_span, Instrument, Span};

/// Egress configuration
#[derive(Debug, Clone)]
pub struct TcpOutputConfig {
    /// Destination every tunneled connection is dialed to
    pub dest_addr: String,
    pub read_buffer_size: usize,
    /// Sleep between polls of an empty inbound queue
    pub idle_interval: Duration,
}

impl Default for TcpOutputConfig {
    fn default() -> Self {
        Self {
            dest_addr: "127.0.0.1:22".to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            idle_interval: Duration::from_millis(10),
        }
    }
}

/// Egress manager. Has no listener; purely driven by its inbound queue.
pub struct TcpOutput {
    config: TcpOutputConfig,
    inbound: Arc<EventQueue>,
    next: Arc<EventQueue>,
    registry: Arc<ConnectionRegistry>,
    span: Span,
}

impl TcpOutput {
    /// Events produced by this manager go to `next`
    pub fn new(config: TcpOutputConfig, next: Arc<EventQueue>) -> Self {
        let span = info_span!("tcp_output", dest = %config.dest_addr);
        Self {
            config,
            inbound: Arc::new(EventQueue::new()),
            next,
            registry: Arc::new(ConnectionRegistry::new()),
            span,
        }
    }

    /// Log under `span` instead of the default `tcp_output` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &TcpOutputConfig {
        &self.config
    }

    /// Process inbound events, forever
    pub async fn run(self: Arc<Self>) {
        let span = self.span.clone();
        async move {
            info!("relaying to: {}", self.config.dest_addr);
            self.process_events().await
        }
        .instrument(span)
        .await
    }

    /// Dial the destination, register a leg paired with `peer` and echo the
    /// `TcpOpen` back so the ingress leg learns its pairing
    pub async fn dial(&self, peer: &str) -> Result<Arc<Connect>, RelayError> {
        let stream = TcpStream::connect(&self.config.dest_addr)
            .await
            .map_err(|source| RelayError::Dial {
                address: self.config.dest_addr.clone(),
                source,
            })?;
        let from = stream.local_addr()?.to_string();
        let (reader, writer) = stream.into_split();
        let connect = Arc::new(Connect::bound(from.clone(), peer, Box::new(writer)));

        self.registry.insert(connect.clone());
        info!(alive = self.registry.len(), tcp_from = %from, tcp_to = %peer, "conn connected");
        // Queued before the read loop starts, so the echo precedes any data
        self.next.push(Event::open(from.clone(), peer));

        let registry = self.registry.clone();
        let next = self.next.clone();
        let read_buffer_size = self.config.read_buffer_size;
        let leg = connect.clone();
        let conn_span = info_span!(parent: &self.span, "conn", tcp_from = %from);
        tokio::spawn(
            async move {
                pump_socket(&leg, reader, read_buffer_size, &next).await;
                release(&leg, &registry, &next, false).await;
            }
            .instrument(conn_span),
        );

        Ok(connect)
    }
}

#[async_trait]
impl LegManager for TcpOutput {
    fn inbound(&self) -> &Arc<EventQueue> {
        &self.inbound
    }

    fn next(&self) -> &Arc<EventQueue> {
        &self.next
    }

    fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    fn idle_interval(&self) -> Duration {
        self.config.idle_interval
    }

    async fn handle_open(&self, event: Event) {
        debug!(tcp_from = %event.from, tcp_to = %event.to, "open event received");
        // No compensating event on failure: the ingress open timeout reclaims the leg
        if let Err(e) = self.dial(&event.from).await {
            error!(tcp_from = %event.from, "failed to dial to dest: {}", e);
        }
    }
}
