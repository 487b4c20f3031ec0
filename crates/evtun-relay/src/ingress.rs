//! Ingress leg manager: accepts local application connections

use crate::connect::Connect;
use crate::error::RelayError;
use crate::leg::{pump_socket, release, LegManager};
use crate::registry::ConnectionRegistry;
use async_trait::async_trait;
use evtun_proto::{Event, EventQueue, DEFAULT_READ_BUFFER_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Ingress configuration
#[derive(Debug, Clone)]
pub struct TcpInputConfig {
    /// Address local applications connect to
    pub listen_addr: String,
    pub read_buffer_size: usize,
    /// Sleep between polls of an empty inbound queue
    pub idle_interval: Duration,
    /// How long a new connection may wait for its egress pairing
    pub open_timeout: Duration,
}

impl Default for TcpInputConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:1080".to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            idle_interval: Duration::from_millis(10),
            open_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of waiting for the open rendezvous
enum Rendezvous {
    Bound,
    Closed,
    TimedOut,
}

/// Ingress manager.
///
/// Every accepted connection is registered under its peer address, announced
/// with a `TcpOpen` and held until the echoed `TcpOpen` from the egress side
/// binds it; only then are its bytes relayed.
pub struct TcpInput {
    config: TcpInputConfig,
    listener: TcpListener,
    inbound: Arc<EventQueue>,
    next: Arc<EventQueue>,
    registry: Arc<ConnectionRegistry>,
    span: Span,
}

impl TcpInput {
    /// Bind the listener. Events produced by this manager go to `next`.
    pub async fn bind(config: TcpInputConfig, next: Arc<EventQueue>) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| RelayError::Bind {
                address: config.listen_addr.clone(),
                source,
            })?;
        let span = info_span!("tcp_input", listen = %config.listen_addr);

        Ok(Self {
            config,
            listener,
            inbound: Arc::new(EventQueue::new()),
            next,
            registry: Arc::new(ConnectionRegistry::new()),
            span,
        })
    }

    /// Log under `span` instead of the default `tcp_input` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &TcpInputConfig {
        &self.config
    }

    /// Accept connections and process inbound events, forever
    pub async fn run(self: Arc<Self>) {
        let span = self.span.clone();
        async move {
            match self.listener.local_addr() {
                Ok(addr) => info!("listen at: {}", addr),
                Err(_) => info!("listen at: {}", self.config.listen_addr),
            }

            let events = self.clone();
            tokio::spawn(async move { events.process_events().await }.instrument(Span::current()));

            loop {
                match self.listener.accept().await {
                    Ok((stream, peer_addr)) => self.handle_conn(stream, peer_addr),
                    Err(e) => error!("failed to accept conn: {}", e),
                }
            }
        }
        .instrument(span)
        .await
    }

    fn handle_conn(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let from = peer_addr.to_string();
        let (reader, writer) = stream.into_split();
        let connect = Arc::new(Connect::new(from.clone(), Box::new(writer)));

        // Registered before the open is announced, so the echo always finds it
        self.registry.insert(connect.clone());
        info!(alive = self.registry.len(), tcp_from = %from, "conn connected");
        self.next.push(Event::open(from.clone(), ""));

        let registry = self.registry.clone();
        let next = self.next.clone();
        let config = self.config.clone();
        let conn_span = info_span!(parent: &self.span, "conn", tcp_from = %from);
        tokio::spawn(
            async move { Self::poll(connect, reader, config, registry, next).await }
                .instrument(conn_span),
        );
    }

    async fn poll(
        connect: Arc<Connect>,
        reader: OwnedReadHalf,
        config: TcpInputConfig,
        registry: Arc<ConnectionRegistry>,
        next: Arc<EventQueue>,
    ) {
        let rendezvous = tokio::select! {
            _ = connect.wait_ready() => Rendezvous::Bound,
            _ = connect.closed() => Rendezvous::Closed,
            _ = tokio::time::sleep(config.open_timeout) => Rendezvous::TimedOut,
        };

        match rendezvous {
            Rendezvous::TimedOut => {
                warn!(timeout = ?config.open_timeout, "open remote timeout");
                release(&connect, &registry, &next, true).await;
                return;
            }
            Rendezvous::Closed => debug!("conn closed before sync"),
            Rendezvous::Bound => {
                debug!(tcp_to = %connect.to_or_empty(), "sync done");
                pump_socket(&connect, reader, config.read_buffer_size, &next).await;
            }
        }

        release(&connect, &registry, &next, false).await;
    }
}

#[async_trait]
impl LegManager for TcpInput {
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

    /// The echoed open names our leg in `to` and the egress leg in `from`
    async fn handle_open(&self, event: Event) {
        debug!(tcp_from = %event.from, tcp_to = %event.to, "open event received");
        let Some(connect) = self.registry.get(&event.to) else {
            debug!(tcp_from = %event.from, tcp_to = %event.to, "cannot find conn in registry");
            return;
        };
        if !connect.bind(event.from.clone()) {
            warn!(
                tcp_from = %event.from,
                tcp_to = %event.to,
                bound = %connect.to_or_empty(),
                "conn already bound, ignoring open event"
            );
        }
    }
}
