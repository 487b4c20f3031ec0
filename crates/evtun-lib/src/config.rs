//! Client and server configuration documents
//!
//! Both roles are configured from YAML. Every field has a default, so a
//! document only needs the addresses that differ. Durations are written in
//! milliseconds (`*_ms` keys).

use evtun_http::{
    HttpEventProviderConfig, HttpEventReceiverConfig, HttpEventRetrieverConfig,
    HttpEventSenderConfig, RetryPolicy,
};
use evtun_proto::Encoding;
use evtun_relay::{TcpInputConfig, TcpOutputConfig};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Helper module for serializing Duration as milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

fn default_idle_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_event_post_path() -> String {
    "/event/post".to_string()
}

fn default_event_get_path() -> String {
    "/event/get".to_string()
}

fn default_event_count_path() -> String {
    "/event/count".to_string()
}

fn default_event_clear_path() -> String {
    "/event/clear".to_string()
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_yaml::from_str(&content)?)
}

fn check_path(field: &str, path: &str) -> Result<(), ConfigError> {
    if !path.starts_with('/') {
        return Err(ConfigError::Invalid(format!(
            "{} must start with '/', got {:?}",
            field, path
        )));
    }
    Ok(())
}

fn check_not_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn check_buffer_size(field: &str, size: usize) -> Result<(), ConfigError> {
    if size == 0 {
        return Err(ConfigError::Invalid(format!("{} must be greater than 0", field)));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientCommon {
    pub event_encoding: Encoding,
    /// Server address including its base path, e.g. `http://10.0.0.1:8080/tunnel`
    pub base_addr: String,
}

impl Default for ClientCommon {
    fn default() -> Self {
        Self {
            event_encoding: Encoding::default(),
            base_addr: "http://127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpInputSection {
    pub listen_addr: String,
    pub read_buffer_size: usize,
    #[serde(rename = "idle_interval_ms", with = "duration_ms")]
    pub idle_interval: Duration,
    #[serde(rename = "open_timeout_ms", with = "duration_ms")]
    pub open_timeout: Duration,
}

impl Default for TcpInputSection {
    fn default() -> Self {
        let config = TcpInputConfig::default();
        Self {
            listen_addr: config.listen_addr,
            read_buffer_size: config.read_buffer_size,
            idle_interval: config.idle_interval,
            open_timeout: config.open_timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    #[serde(rename = "initial_backoff_ms", with = "duration_ms")]
    pub initial_backoff: Duration,
    #[serde(rename = "max_backoff_ms", with = "duration_ms")]
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Total attempts per batch; absent means retry forever
    pub max_attempts: Option<usize>,
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            initial_backoff: policy.initial_backoff,
            max_backoff: policy.max_backoff,
            multiplier: policy.multiplier,
            max_attempts: policy.max_attempts,
        }
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        RetryPolicy {
            initial_backoff: section.initial_backoff,
            max_backoff: section.max_backoff,
            multiplier: section.multiplier,
            max_attempts: section.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpEventSenderSection {
    #[serde(rename = "idle_interval_ms", with = "duration_ms")]
    pub idle_interval: Duration,
    pub event_post_path: String,
    pub retry: RetrySection,
}

impl Default for HttpEventSenderSection {
    fn default() -> Self {
        Self {
            idle_interval: default_idle_interval(),
            event_post_path: default_event_post_path(),
            retry: RetrySection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpEventRetrieverSection {
    #[serde(rename = "idle_interval_ms", with = "duration_ms")]
    pub idle_interval: Duration,
    pub event_get_path: String,
    pub event_count_path: String,
    pub event_clear_path: String,
}

impl Default for HttpEventRetrieverSection {
    fn default() -> Self {
        Self {
            idle_interval: default_idle_interval(),
            event_get_path: default_event_get_path(),
            event_count_path: default_event_count_path(),
            event_clear_path: default_event_clear_path(),
        }
    }
}

/// Client role document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub common: ClientCommon,
    pub tcp_input: TcpInputSection,
    pub http_event_sender: HttpEventSenderSection,
    pub http_event_retriever: HttpEventRetrieverSection,
}

impl ClientConfig {
    /// Load and validate a client document
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a client document
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_addr = &self.common.base_addr;
        if !(base_addr.starts_with("http://") || base_addr.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "common.base_addr must be an http(s) URL, got {:?}",
                base_addr
            )));
        }
        check_not_empty("tcp_input.listen_addr", &self.tcp_input.listen_addr)?;
        check_buffer_size("tcp_input.read_buffer_size", self.tcp_input.read_buffer_size)?;
        check_path(
            "http_event_sender.event_post_path",
            &self.http_event_sender.event_post_path,
        )?;

        let retry = &self.http_event_sender.retry;
        if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "http_event_sender.retry.multiplier must be at least 1.0, got {}",
                retry.multiplier
            )));
        }
        if retry.max_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "http_event_sender.retry.max_attempts must be greater than 0".to_string(),
            ));
        }

        let retriever = &self.http_event_retriever;
        check_path("http_event_retriever.event_get_path", &retriever.event_get_path)?;
        check_path("http_event_retriever.event_count_path", &retriever.event_count_path)?;
        check_path("http_event_retriever.event_clear_path", &retriever.event_clear_path)?;
        Ok(())
    }

    pub fn tcp_input_config(&self) -> TcpInputConfig {
        TcpInputConfig {
            listen_addr: self.tcp_input.listen_addr.clone(),
            read_buffer_size: self.tcp_input.read_buffer_size,
            idle_interval: self.tcp_input.idle_interval,
            open_timeout: self.tcp_input.open_timeout,
        }
    }

    pub fn sender_config(&self) -> HttpEventSenderConfig {
        HttpEventSenderConfig {
            encoding: self.common.event_encoding,
            base_addr: self.common.base_addr.clone(),
            event_post_path: self.http_event_sender.event_post_path.clone(),
            idle_interval: self.http_event_sender.idle_interval,
            retry: RetryPolicy::from(&self.http_event_sender.retry),
        }
    }

    pub fn retriever_config(&self) -> HttpEventRetrieverConfig {
        HttpEventRetrieverConfig {
            encoding: self.common.event_encoding,
            base_addr: self.common.base_addr.clone(),
            event_get_path: self.http_event_retriever.event_get_path.clone(),
            event_count_path: self.http_event_retriever.event_count_path.clone(),
            event_clear_path: self.http_event_retriever.event_clear_path.clone(),
            idle_interval: self.http_event_retriever.idle_interval,
        }
    }

    /// Effective configuration as pretty JSON, for the start-up log
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("<unprintable: {}>", e))
    }

    /// Generate a template client document
    pub fn template() -> String {
        r#"# evtun client configuration
common:
  event_encoding: application/json
  base_addr: "http://127.0.0.1:8080/tunnel"

tcp_input:
  listen_addr: "127.0.0.1:1080"
  read_buffer_size: 16384
  idle_interval_ms: 10
  open_timeout_ms: 5000

http_event_sender:
  idle_interval_ms: 10
  event_post_path: /event/post
  retry:
    initial_backoff_ms: 100
    max_backoff_ms: 5000
    multiplier: 2.0
    # max_attempts: 10

http_event_retriever:
  idle_interval_ms: 10
  event_get_path: /event/get
  event_count_path: /event/count
  event_clear_path: /event/clear
"#
        .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerCommon {
    pub event_encoding: Encoding,
    pub http_listen_addr: String,
    /// Prefix of every endpoint path; empty serves from the root
    pub base_path: String,
}

impl Default for ServerCommon {
    fn default() -> Self {
        Self {
            event_encoding: Encoding::default(),
            http_listen_addr: "127.0.0.1:8080".to_string(),
            base_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpEventProviderSection {
    pub event_get_path: String,
    pub event_count_path: String,
    pub event_clear_path: String,
    /// Most events per pull; 0 means unlimited
    pub max_event_fetch_size: usize,
}

impl Default for HttpEventProviderSection {
    fn default() -> Self {
        Self {
            event_get_path: default_event_get_path(),
            event_count_path: default_event_count_path(),
            event_clear_path: default_event_clear_path(),
            max_event_fetch_size: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpEventReceiverSection {
    pub event_post_path: String,
}

impl Default for HttpEventReceiverSection {
    fn default() -> Self {
        Self {
            event_post_path: default_event_post_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpOutputSection {
    pub dest_addr: String,
    pub read_buffer_size: usize,
    #[serde(rename = "idle_interval_ms", with = "duration_ms")]
    pub idle_interval: Duration,
}

impl Default for TcpOutputSection {
    fn default() -> Self {
        let config = TcpOutputConfig::default();
        Self {
            dest_addr: config.dest_addr,
            read_buffer_size: config.read_buffer_size,
            idle_interval: config.idle_interval,
        }
    }
}

/// Server role document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub common: ServerCommon,
    pub http_event_provider: HttpEventProviderSection,
    pub http_event_receiver: HttpEventReceiverSection,
    pub tcp_output: TcpOutputSection,
}

impl ServerConfig {
    /// Load and validate a server document
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a server document
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_not_empty("common.http_listen_addr", &self.common.http_listen_addr)?;
        if !self.common.base_path.is_empty() {
            check_path("common.base_path", &self.common.base_path)?;
        }

        let provider = &self.http_event_provider;
        check_path("http_event_provider.event_get_path", &provider.event_get_path)?;
        check_path("http_event_provider.event_count_path", &provider.event_count_path)?;
        check_path("http_event_provider.event_clear_path", &provider.event_clear_path)?;
        check_path(
            "http_event_receiver.event_post_path",
            &self.http_event_receiver.event_post_path,
        )?;

        check_not_empty("tcp_output.dest_addr", &self.tcp_output.dest_addr)?;
        check_buffer_size("tcp_output.read_buffer_size", self.tcp_output.read_buffer_size)?;
        Ok(())
    }

    pub fn provider_config(&self) -> HttpEventProviderConfig {
        HttpEventProviderConfig {
            encoding: self.common.event_encoding,
            event_get_path: self.http_event_provider.event_get_path.clone(),
            event_count_path: self.http_event_provider.event_count_path.clone(),
            event_clear_path: self.http_event_provider.event_clear_path.clone(),
            max_event_fetch_size: self.http_event_provider.max_event_fetch_size,
        }
    }

    pub fn receiver_config(&self) -> HttpEventReceiverConfig {
        HttpEventReceiverConfig {
            encoding: self.common.event_encoding,
            event_post_path: self.http_event_receiver.event_post_path.clone(),
        }
    }

    pub fn tcp_output_config(&self) -> TcpOutputConfig {
        TcpOutputConfig {
            dest_addr: self.tcp_output.dest_addr.clone(),
            read_buffer_size: self.tcp_output.read_buffer_size,
            idle_interval: self.tcp_output.idle_interval,
        }
    }

    /// Effective configuration as pretty JSON, for the start-up log
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("<unprintable: {}>", e))
    }

    /// Generate a template server document
    pub fn template() -> String {
        r#"# evtun server configuration
common:
  event_encoding: application/json
  http_listen_addr: "0.0.0.0:8080"
  base_path: /tunnel

http_event_provider:
  event_get_path: /event/get
  event_count_path: /event/count
  event_clear_path: /event/clear
  max_event_fetch_size: 0

http_event_receiver:
  event_post_path: /event/post

tcp_output:
  dest_addr: "127.0.0.1:22"
  read_buffer_size: 16384
  idle_interval_ms: 10
"#
        .to_string()
    }
}
