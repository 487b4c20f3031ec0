//! HTTP transport for event batches
//!
//! Four loops carry events across the HTTP hop:
//! - [`HttpEventSender`] pushes batches (client to server)
//! - [`HttpEventReceiver`] accepts pushed batches (server)
//! - [`HttpEventRetriever`] pulls batches (server to client)
//! - [`HttpEventProvider`] answers pulls (server)

pub mod error;
pub mod provider;
pub mod receiver;
pub mod retriever;
pub mod retry;
pub mod sender;

pub use error::TransportError;
pub use provider::{BatchBody, HttpEventProvider, HttpEventProviderConfig};
pub use receiver::{HttpEventReceiver, HttpEventReceiverConfig};
pub use retriever::{HttpEventRetriever, HttpEventRetrieverConfig};
pub use retry::RetryPolicy;
pub use sender::{HttpEventSender, HttpEventSenderConfig, SendOutcome};

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, Instrument, Span};

/// `base + sub_path`, tolerating a trailing `/` on the base. Used for route
/// paths on the server and for full URLs on the client.
pub fn join_path(base_path: &str, sub_path: &str) -> String {
    format!("{}{}", base_path.trim_end_matches('/'), sub_path)
}

/// Router serving the provider and receiver endpoints under `base_path`
pub fn build_router(
    base_path: &str,
    provider: &Arc<HttpEventProvider>,
    receiver: &Arc<HttpEventReceiver>,
) -> Router {
    Router::new()
        .merge(provider.routes(base_path))
        .merge(receiver.routes(base_path))
        .layer(TraceLayer::new_for_http())
}

/// HTTP listener for the server role
pub struct HttpEventServer {
    listener: TcpListener,
    router: Router,
    span: Span,
}

impl HttpEventServer {
    /// Bind the HTTP listener; failure here is fatal for the server role
    pub async fn bind(address: &str, router: Router) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| TransportError::Bind {
                address: address.to_string(),
                source,
            })?;

        Ok(Self {
            listener,
            router,
            span: info_span!("http_server", listen = %address),
        })
    }

    /// Log under `span` instead of the default `http_server` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the listener fails
    pub async fn run(self) -> Result<(), TransportError> {
        let span = self.span.clone();
        async move {
            info!("listen at: {}", self.local_addr()?);
            axum::serve(self.listener, self.router)
                .await
                .map_err(TransportError::Serve)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "/event/get"), "/event/get");
        assert_eq!(join_path("/tunnel", "/event/get"), "/tunnel/event/get");
        assert_eq!(join_path("/tunnel/", "/event/get"), "/tunnel/event/get");
        assert_eq!(join_path("/", "/event/get"), "/event/get");
        assert_eq!(
            join_path("http://127.0.0.1:8080/tunnel/", "/event/post"),
            "http://127.0.0.1:8080/tunnel/event/post"
        );
    }
}
