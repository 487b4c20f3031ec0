//! Server role: HTTP endpoints plus the destination dialer

use crate::config::ServerConfig;
use crate::error::Error;
use evtun_http::{build_router, HttpEventProvider, HttpEventReceiver, HttpEventServer};
use evtun_relay::{LegManager, TcpOutput};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Wires `HttpEventReceiver -> TcpOutput` for inbound events and
/// `TcpOutput -> HttpEventProvider` for outbound ones.
pub struct Server {
    config: ServerConfig,
    provider: Arc<HttpEventProvider>,
    receiver: Arc<HttpEventReceiver>,
    output: Arc<TcpOutput>,
    http: HttpEventServer,
}

impl Server {
    /// Validate the configuration and bind the HTTP listener
    pub async fn bind(config: ServerConfig) -> Result<Self, Error> {
        config.validate()?;

        let provider = Arc::new(HttpEventProvider::new(config.provider_config()));
        let output = Arc::new(TcpOutput::new(
            config.tcp_output_config(),
            provider.queue().clone(),
        ));
        let receiver = Arc::new(HttpEventReceiver::new(
            config.receiver_config(),
            output.inbound().clone(),
        ));

        let router = build_router(&config.common.base_path, &provider, &receiver);
        let http = HttpEventServer::bind(&config.common.http_listen_addr, router).await?;

        Ok(Self {
            config,
            provider,
            receiver,
            output,
            http,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Address the HTTP endpoints are served on
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.http.local_addr()?)
    }

    pub fn provider(&self) -> &Arc<HttpEventProvider> {
        &self.provider
    }

    pub fn receiver(&self) -> &Arc<HttpEventReceiver> {
        &self.receiver
    }

    pub fn output(&self) -> &Arc<TcpOutput> {
        &self.output
    }

    /// Serve until the HTTP listener fails
    pub async fn run(self) -> Result<(), Error> {
        info!(dest = %self.config.tcp_output.dest_addr, "server started");
        tokio::spawn(self.output.clone().run());
        self.http.run().await?;
        Ok(())
    }
}
