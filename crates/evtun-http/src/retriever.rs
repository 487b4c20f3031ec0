//! Pull loop: GETs batches from the peer's provider into the next queue

use crate::error::TransportError;
use crate::join_path;
use evtun_proto::{Encoding, Event, EventCount, EventQueue};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, Instrument, Span};

#[derive(Debug, Clone)]
pub struct HttpEventRetrieverConfig {
    pub encoding: Encoding,
    /// Peer address, e.g. `http://127.0.0.1:8080/tunnel`
    pub base_addr: String,
    pub event_get_path: String,
    pub event_count_path: String,
    pub event_clear_path: String,
    /// Sleep after an empty or failed poll
    pub idle_interval: Duration,
}

impl Default for HttpEventRetrieverConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::default(),
            base_addr: "http://127.0.0.1:8080".to_string(),
            event_get_path: "/event/get".to_string(),
            event_count_path: "/event/count".to_string(),
            event_clear_path: "/event/clear".to_string(),
            idle_interval: Duration::from_millis(10),
        }
    }
}

pub struct HttpEventRetriever {
    config: HttpEventRetrieverConfig,
    client: reqwest::Client,
    next: Arc<EventQueue>,
    span: Span,
}

impl HttpEventRetriever {
    /// Retrieved events go to `next`
    pub fn new(
        config: HttpEventRetrieverConfig,
        client: reqwest::Client,
        next: Arc<EventQueue>,
    ) -> Self {
        let span = info_span!("http_event_retriever", base = %config.base_addr);
        Self {
            config,
            client,
            next,
            span,
        }
    }

    /// Log under `span` instead of the default `http_event_retriever` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn url(&self, path: &str) -> String {
        join_path(&self.config.base_addr, path)
    }

    /// Poll once. Returns how many events were retrieved; idles when that is
    /// zero or the poll failed.
    pub async fn update(&self) -> usize {
        let events = match self.fetch().await {
            Ok(events) => events,
            Err(e) => {
                error!("failed to retrieve events: {}", e);
                tokio::time::sleep(self.config.idle_interval).await;
                return 0;
            }
        };

        let count = events.len();
        if count == 0 {
            tokio::time::sleep(self.config.idle_interval).await;
            return 0;
        }

        debug!(events = count, "events retrieved");
        self.next.push_all(events);
        count
    }

    /// GET one batch from the provider
    pub async fn fetch(&self) -> Result<Vec<Event>, TransportError> {
        let body = self.get(&self.config.event_get_path).await?;
        Ok(self.config.encoding.decode_batch(&body)?)
    }

    /// Number of events queued at the provider
    pub async fn remote_count(&self) -> Result<u64, TransportError> {
        let count: EventCount = self.decode(self.get(&self.config.event_count_path).await?)?;
        Ok(count.count)
    }

    /// Discard everything queued at the provider, returning how many events
    /// were dropped
    pub async fn remote_clear(&self) -> Result<u64, TransportError> {
        let response = self
            .client
            .post(self.url(&self.config.event_clear_path))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        let cleared: EventCount = self.decode(response.bytes().await?)?;
        Ok(cleared.count)
    }

    async fn get(&self, path: &str) -> Result<bytes::Bytes, TransportError> {
        let response = self.client.get(self.url(path)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        Ok(response.bytes().await?)
    }

    fn decode<T: DeserializeOwned>(&self, body: bytes::Bytes) -> Result<T, TransportError> {
        Ok(self.config.encoding.decode(&body)?)
    }

    /// Poll the provider, forever
    pub async fn run(self: Arc<Self>) {
        let span = self.span.clone();
        async move {
            info!("retrieving events from: {}", self.url(&self.config.event_get_path));
            loop {
                self.update().await;
            }
        }
        .instrument(span)
        .await
    }
}
