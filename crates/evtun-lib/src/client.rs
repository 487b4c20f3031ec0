//! Client role: local TCP listener plus the push and pull loops

use crate::config::ClientConfig;
use crate::error::Error;
use evtun_http::{HttpEventRetriever, HttpEventSender};
use evtun_relay::{LegManager, TcpInput};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Wires `TcpInput -> HttpEventSender` for outbound events and
/// `HttpEventRetriever -> TcpInput` for inbound ones.
pub struct Client {
    config: ClientConfig,
    sender: Arc<HttpEventSender>,
    input: Arc<TcpInput>,
    retriever: Arc<HttpEventRetriever>,
}

impl Client {
    /// Validate the configuration and bind the local listener
    pub async fn bind(config: ClientConfig) -> Result<Self, Error> {
        config.validate()?;

        let http = reqwest::Client::new();
        let sender = Arc::new(HttpEventSender::new(config.sender_config(), http.clone()));
        let input = Arc::new(TcpInput::bind(config.tcp_input_config(), sender.queue().clone()).await?);
        let retriever = Arc::new(HttpEventRetriever::new(
            config.retriever_config(),
            http,
            input.inbound().clone(),
        ));

        Ok(Self {
            config,
            sender,
            input,
            retriever,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Address local applications connect to
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.input.local_addr()?)
    }

    pub fn input(&self) -> &Arc<TcpInput> {
        &self.input
    }

    pub fn sender(&self) -> &Arc<HttpEventSender> {
        &self.sender
    }

    pub fn retriever(&self) -> &Arc<HttpEventRetriever> {
        &self.retriever
    }

    /// Run every loop, forever
    pub async fn run(self) {
        info!(server = %self.config.common.base_addr, "client started");
        tokio::spawn(self.sender.clone().run());
        tokio::spawn(self.input.clone().run());
        self.retriever.clone().run().await;
    }
}
