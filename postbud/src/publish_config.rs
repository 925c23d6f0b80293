//! Holds [PublishConfig]'s implementation.

use std::collections::HashMap;
use std::time::Duration;

/// Detailed configuration of a publish.
#[derive(Clone, Debug, Default)]
pub struct PublishConfig {
    /// Additional application headers to attach.
    pub(crate) headers: HashMap<String, String>,
    /// Explicit destination for the receiver's reply.
    pub(crate) reply_to: Option<String>,
    /// True makes the publish wait synchronously for the reply (RPC). The
    /// reply destination is `reply_to` if set, otherwise the broker's
    /// response queue.
    pub(crate) rpc: bool,
    /// Longest time to wait for the reply. `None` waits indefinitely.
    pub(crate) timeout: Option<Duration>,
    /// True turns an expired wait into an error instead of `None`.
    pub(crate) raise_timeout: bool,
}

impl PublishConfig {
    /// Creates a new default PublishConfig.
    pub fn new() -> Self {
        Default::default()
    }

    /// Attaches an application header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the destination the receiver should reply to. This alone does
    /// not make the publish wait; combine with [`rpc`](Self::rpc) for that.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Waits synchronously for the reply.
    pub fn rpc(mut self) -> Self {
        self.rpc = true;
        self
    }

    /// Bounds the reply wait. Without this the wait is indefinite.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Makes an expired reply wait return
    /// [`Error::RpcTimeout`](crate::Error::RpcTimeout) instead of `None`.
    pub fn with_raise_timeout(mut self, raise_timeout: bool) -> Self {
        self.raise_timeout = raise_timeout;
        self
    }
}
