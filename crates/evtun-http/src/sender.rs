//! Push loop: drains its queue and POSTs each batch to the peer's receiver

use crate::error::TransportError;
use crate::join_path;
use crate::retry::RetryPolicy;
use bytes::Bytes;
use evtun_proto::{Encoding, EventQueue};
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

#[derive(Debug, Clone)]
pub struct HttpEventSenderConfig {
    pub encoding: Encoding,
    /// Peer address, e.g. `http://127.0.0.1:8080/tunnel`
    pub base_addr: String,
    pub event_post_path: String,
    /// Sleep between polls of an empty queue
    pub idle_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpEventSenderConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::default(),
            base_addr: "http://127.0.0.1:8080".to_string(),
            event_post_path: "/event/post".to_string(),
            idle_interval: Duration::from_millis(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of one [`HttpEventSender::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queue was empty; the sender idled
    Idle,
    /// A batch of this many events was accepted by the peer
    Delivered(usize),
    /// A batch of this many events could not be encoded, was rejected by the
    /// peer or ran out of retries
    Dropped(usize),
}

/// Owns the queue the ingress manager produces into
pub struct HttpEventSender {
    config: HttpEventSenderConfig,
    queue: Arc<EventQueue>,
    client: reqwest::Client,
    url: String,
    span: Span,
}

impl HttpEventSender {
    pub fn new(config: HttpEventSenderConfig, client: reqwest::Client) -> Self {
        let url = join_path(&config.base_addr, &config.event_post_path);
        let span = info_span!("http_event_sender", url = %url);
        Self {
            config,
            queue: Arc::new(EventQueue::new()),
            client,
            url,
            span,
        }
    }

    /// Log under `span` instead of the default `http_event_sender` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Queue whose events are pushed to the peer
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Drain the queue once and deliver the batch, retrying per the policy.
    /// A batch the peer rejects with a 4xx status is dropped at once.
    pub async fn update(&self) -> SendOutcome {
        let events = self.queue.drain_all();
        if events.is_empty() {
            tokio::time::sleep(self.config.idle_interval).await;
            return SendOutcome::Idle;
        }

        let count = events.len();
        let body = match self.config.encoding.encode_batch(&events) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                error!(events = count, "failed to encode events: {}", e);
                return SendOutcome::Dropped(count);
            }
        };

        let mut failed = 0;
        loop {
            match self.post(body.clone()).await {
                Ok(()) => {
                    debug!(events = count, bytes = body.len(), "events posted");
                    return SendOutcome::Delivered(count);
                }
                Err(e) if e.is_permanent() => {
                    error!(events = count, "events rejected by peer, dropping batch: {}", e);
                    return SendOutcome::Dropped(count);
                }
                Err(e) => {
                    failed += 1;
                    let Some(delay) = self.config.retry.delay_for(failed) else {
                        error!(attempt = failed, events = count, "failed to post events, dropping batch: {}", e);
                        return SendOutcome::Dropped(count);
                    };
                    warn!(attempt = failed, "failed to post events, retry in {:?}: {}", delay, e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn post(&self, body: Bytes) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, self.config.encoding.content_type())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        Ok(())
    }

    /// Deliver batches, forever
    pub async fn run(self: Arc<Self>) {
        let span = self.span.clone();
        async move {
            info!("posting events to: {}", self.url);
            loop {
                self.update().await;
            }
        }
        .instrument(span)
        .await
    }
}
