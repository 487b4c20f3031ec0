//! One leg of one logical tunnel

use std::fmt;
use std::sync::OnceLock;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

/// Write side of a relayed socket
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Registry entry for one connection leg.
///
/// `from` is this leg's routing key. `to` is the paired leg's key and is set
/// exactly once: at dial time on the egress side, by the echoed `TcpOpen` on
/// the ingress side. Binding also fires the one-shot readiness signal the
/// ingress read loop waits on before relaying any bytes.
pub struct Connect {
    from: String,
    to: OnceLock<String>,
    ready: Notify,
    writer: Mutex<BoxedWriter>,
    shutdown: CancellationToken,
}

impl Connect {
    /// A leg whose pairing is not known yet (ingress)
    pub fn new(from: impl Into<String>, writer: BoxedWriter) -> Self {
        Self {
            from: from.into(),
            to: OnceLock::new(),
            ready: Notify::new(),
            writer: Mutex::new(writer),
            shutdown: CancellationToken::new(),
        }
    }

    /// A leg created already paired (egress)
    pub fn bound(from: impl Into<String>, to: impl Into<String>, writer: BoxedWriter) -> Self {
        let connect = Self::new(from, writer);
        connect.bind(to.into());
        connect
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> Option<&str> {
        self.to.get().map(String::as_str)
    }

    /// Paired key, or the empty "not yet assigned" key
    pub fn to_or_empty(&self) -> &str {
        self.to().unwrap_or("")
    }

    /// Bind the paired leg's key and signal readiness.
    ///
    /// Returns `false` (and changes nothing) if the leg was already bound.
    pub fn bind(&self, to: String) -> bool {
        if self.to.set(to).is_err() {
            return false;
        }
        // notify_one stores a permit, so a bind before wait_ready is not lost
        self.ready.notify_one();
        true
    }

    /// Wait until [`bind`](Self::bind) has happened
    pub async fn wait_ready(&self) {
        if self.to.get().is_some() {
            return;
        }
        self.ready.notified().await;
    }

    /// Write a payload to the socket
    pub async fn write(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(payload).await?;
        writer.flush().await
    }

    /// Ask the leg's read loop to stop; the loop performs the cleanup
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) was called
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    /// Shut down the write direction of the socket
    pub async fn shutdown_write(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

impl fmt::Debug for Connect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connect")
            .field("from", &self.from)
            .field("to", &self.to())
            .field("closed", &self.is_closed())
            .finish()
    }
}
