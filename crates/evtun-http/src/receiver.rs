//! Push endpoint: accepts batches POSTed by the peer's sender

use crate::join_path;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use evtun_proto::{Encoding, EventQueue};
use std::sync::Arc;
use tracing::{debug, error, info_span, Span};

#[derive(Debug, Clone)]
pub struct HttpEventReceiverConfig {
    pub encoding: Encoding,
    pub event_post_path: String,
}

impl Default for HttpEventReceiverConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::default(),
            event_post_path: "/event/post".to_string(),
        }
    }
}

pub struct HttpEventReceiver {
    config: HttpEventReceiverConfig,
    next: Arc<EventQueue>,
    span: Span,
}

impl HttpEventReceiver {
    /// Received events go to `next`
    pub fn new(config: HttpEventReceiverConfig, next: Arc<EventQueue>) -> Self {
        Self {
            config,
            next,
            span: info_span!("http_event_receiver"),
        }
    }

    /// Log under `span` instead of the default `http_event_receiver` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Post route, mounted under `base_path`. Batches are not size limited.
    pub fn routes(self: &Arc<Self>, base_path: &str) -> Router {
        Router::new()
            .route(
                &join_path(base_path, &self.config.event_post_path),
                post(post_events),
            )
            .layer(DefaultBodyLimit::disable())
            .with_state(self.clone())
    }

    /// Decode a pushed batch and enqueue it in one critical section.
    /// A malformed batch leaves the queue untouched.
    pub fn accept(&self, body: &[u8]) -> StatusCode {
        match self.config.encoding.decode_batch(body) {
            Ok(events) => {
                debug!(events = events.len(), bytes = body.len(), "events received");
                self.next.push_all(events);
                StatusCode::OK
            }
            Err(e) => {
                error!(bytes = body.len(), "failed to decode events: {}", e);
                StatusCode::BAD_REQUEST
            }
        }
    }
}

async fn post_events(State(receiver): State<Arc<HttpEventReceiver>>, body: Bytes) -> StatusCode {
    receiver.span.in_scope(|| receiver.accept(&body))
}
