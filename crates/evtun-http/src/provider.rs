//! Pull endpoints: hands queued events to the peer's retriever

use crate::join_path;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use evtun_proto::{Encoding, Event, EventCount, EventQueue};
use futures::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, error, info, info_span, warn, Span};

#[derive(Debug, Clone)]
pub struct HttpEventProviderConfig {
    pub encoding: Encoding,
    pub event_get_path: String,
    pub event_count_path: String,
    pub event_clear_path: String,
    /// Most events handed out per pull (0 = unlimited)
    pub max_event_fetch_size: usize,
}

impl Default for HttpEventProviderConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::default(),
            event_get_path: "/event/get".to_string(),
            event_count_path: "/event/count".to_string(),
            event_clear_path: "/event/clear".to_string(),
            max_event_fetch_size: 0,
        }
    }
}

/// Owns the queue the egress manager produces into
pub struct HttpEventProvider {
    config: HttpEventProviderConfig,
    queue: Arc<EventQueue>,
    span: Span,
}

impl HttpEventProvider {
    pub fn new(config: HttpEventProviderConfig) -> Self {
        Self {
            config,
            queue: Arc::new(EventQueue::new()),
            span: info_span!("http_event_provider"),
        }
    }

    /// Log under `span` instead of the default `http_event_provider` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Queue whose events are handed out to pulls
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn config(&self) -> &HttpEventProviderConfig {
        &self.config
    }

    /// Get, count and clear routes, mounted under `base_path`
    pub fn routes(self: &Arc<Self>, base_path: &str) -> Router {
        Router::new()
            .route(
                &join_path(base_path, &self.config.event_get_path),
                get(get_events),
            )
            .route(
                &join_path(base_path, &self.config.event_count_path),
                get(count_events),
            )
            .route(
                &join_path(base_path, &self.config.event_clear_path),
                post(clear_events),
            )
            .with_state(self.clone())
    }

    /// Take the next batch off the queue, bounded by `max_event_fetch_size`
    pub fn take_batch(&self) -> Vec<Event> {
        match self.config.max_event_fetch_size {
            0 => self.queue.drain_all(),
            limit => self.queue.drain_up_to(limit),
        }
    }

    fn provide(&self) -> Response {
        let events = self.take_batch();
        let count = events.len();

        let encoded = match self.config.encoding.encode_batch(&events) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(events = count, "invalid event encoding, do recovery: {}", e);
                self.queue.recovery(events);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        if count > 0 {
            debug!(events = count, bytes = encoded.len(), "providing events");
        }
        let body = BatchBody::new(Bytes::from(encoded), events, self.queue.clone(), Span::current());
        (
            [(header::CONTENT_TYPE, self.config.encoding.content_type())],
            Body::from_stream(body),
        )
            .into_response()
    }

    fn encoded<T: Serialize>(&self, value: &T) -> Response {
        match self.config.encoding.encode(value) {
            Ok(body) => ([(header::CONTENT_TYPE, self.config.encoding.content_type())], body).into_response(),
            Err(e) => {
                error!("failed to encode response: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

async fn get_events(State(provider): State<Arc<HttpEventProvider>>) -> Response {
    provider.span.in_scope(|| provider.provide())
}

async fn count_events(State(provider): State<Arc<HttpEventProvider>>) -> Response {
    provider.span.in_scope(|| {
        let count = provider.queue.count() as u64;
        provider.encoded(&EventCount { count })
    })
}

async fn clear_events(State(provider): State<Arc<HttpEventProvider>>) -> Response {
    provider.span.in_scope(|| {
        let cleared = provider.queue.clear();
        info!(events = cleared, "queue cleared");
        provider.encoded(&EventCount {
            count: cleared as u64,
        })
    })
}

/// Response body for one pulled batch.
///
/// Yields the encoded batch as a single chunk. The drained events are held
/// until the body has been fully handed to the connection; if the body is
/// dropped before that (peer gone, write failed) they are put back at the
/// head of the queue.
pub struct BatchBody {
    chunk: Option<Bytes>,
    pending: Option<Vec<Event>>,
    queue: Arc<EventQueue>,
    span: Span,
}

impl BatchBody {
    pub fn new(chunk: Bytes, events: Vec<Event>, queue: Arc<EventQueue>, span: Span) -> Self {
        Self {
            chunk: Some(chunk),
            pending: Some(events),
            queue,
            span,
        }
    }
}

impl Stream for BatchBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(chunk) = this.chunk.take() {
            return Poll::Ready(Some(Ok(chunk)));
        }
        // Polled again after the chunk was taken: the batch is delivered
        this.pending = None;
        Poll::Ready(None)
    }
}

impl Drop for BatchBody {
    fn drop(&mut self) {
        let Some(events) = self.pending.take() else {
            return;
        };
        if events.is_empty() {
            return;
        }
        let _enter = self.span.enter();
        warn!(events = events.len(), "failed to write data, do recovery");
        self.queue.recovery(events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn queue_with(events: &[Event]) -> Arc<EventQueue> {
        let queue = Arc::new(EventQueue::new());
        queue.push_all(events.iter().cloned());
        queue
    }

    #[tokio::test]
    async fn test_body_dropped_early_recovers_batch() {
        let batch = vec![Event::open("a", ""), Event::data("a", "b", b"x".to_vec())];
        let queue = queue_with(&[Event::close("c", "d")]);

        let mut body = BatchBody::new(Bytes::from_static(b"..."), batch.clone(), queue.clone(), Span::none());
        // First chunk taken, but the stream never reaches its end
        assert!(body.next().await.is_some());
        drop(body);

        let events = queue.drain_all();
        assert_eq!(events.len(), 3);
        assert_eq!(&events[..2], &batch[..]);
        assert_eq!(events[2].name, evtun_proto::EventName::TcpClose);
    }

    #[tokio::test]
    async fn test_body_consumed_does_not_recover() {
        let batch = vec![Event::open("a", "")];
        let queue = Arc::new(EventQueue::new());

        let mut body = BatchBody::new(Bytes::from_static(b"..."), batch, queue.clone(), Span::none());
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"..."));
        assert!(body.next().await.is_none());
        drop(body);

        assert!(queue.is_empty());
    }

    #[test]
    fn test_take_batch_respects_fetch_size() {
        let provider = HttpEventProvider::new(HttpEventProviderConfig {
            max_event_fetch_size: 2,
            ..Default::default()
        });
        for i in 0..5 {
            provider.queue().push(Event::open(format!("k{}", i), ""));
        }

        let batch = provider.take_batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].from, "k0");
        assert_eq!(batch[1].from, "k1");
        assert_eq!(provider.queue().count(), 3);
    }

    #[test]
    fn test_take_batch_unlimited() {
        let provider = HttpEventProvider::new(HttpEventProviderConfig::default());
        for i in 0..5 {
            provider.queue().push(Event::open(format!("k{}", i), ""));
        }

        assert_eq!(provider.take_batch().len(), 5);
        assert!(provider.queue().is_empty());
    }
}
