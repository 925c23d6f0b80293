//! Holds [HandlerConfig]'s implementation.

use std::time::Duration;

use crate::watcher::RetryPolicy;

/// Detailed configuration of a handler.
#[derive(Clone, Debug)]
pub struct HandlerConfig {
    /// Retry policy applied when the handler fails on a message.
    pub(crate) retry: RetryPolicy,
    /// True skips the eager decode step: the handler works directly on the
    /// body and headers. Used for consumers that do their own decoding, such
    /// as the RPC response consumer.
    pub(crate) raw: bool,
    /// Transport-level consumer parameters.
    pub(crate) consumer: ConsumerConfig,
}

impl HandlerConfig {
    /// Creates a new default HandlerConfig.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the retry policy. Accepts `bool` (`false` = never, `true` =
    /// forever) or a `u32` retry count, mirroring the registration surface.
    pub fn with_retry(mut self, retry: impl Into<RetryPolicy>) -> Self {
        self.retry = retry.into();
        self
    }

    /// Sets raw mode: the body is not eagerly decoded before the handler runs.
    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Per consumer prefetch count, forwarded to transports that support it.
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.consumer.prefetch = prefetch;
        self
    }

    /// How long a fetch may wait for messages before returning an empty
    /// batch. Also the pause after a batch that dropped a poison message.
    pub fn with_wait_interval(mut self, wait_interval: Duration) -> Self {
        self.consumer.wait_interval = wait_interval;
        self
    }

    /// Maximum number of messages per fetched batch.
    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.consumer.batch_limit = batch_limit;
        self
    }

    /// How long a fetched-but-unacked message stays invisible to other
    /// consumers, on transports with that notion.
    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.consumer.visibility_timeout = Some(visibility_timeout);
        self
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::Never,
            raw: false,
            consumer: ConsumerConfig::default(),
        }
    }
}

/// Transport-level consumer parameters, passed through to
/// [`Transport::fetch`](crate::Transport::fetch).
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    /// Longest time a fetch may block waiting for messages.
    pub wait_interval: Duration,
    /// Maximum number of messages per batch.
    pub batch_limit: usize,
    /// Prefetch count, where the transport supports one.
    pub prefetch: u16,
    /// Visibility timeout, where the transport supports one.
    pub visibility_timeout: Option<Duration>,
}

impl ConsumerConfig {
    /// The default value for the prefetch count.
    pub const DEFAULT_PREFETCH: u16 = 64;

    /// The default fetch wait interval.
    pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(1);

    /// The default batch limit.
    pub const DEFAULT_BATCH_LIMIT: usize = 10;
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            wait_interval: Self::DEFAULT_WAIT_INTERVAL,
            batch_limit: Self::DEFAULT_BATCH_LIMIT,
            prefetch: Self::DEFAULT_PREFETCH,
            visibility_timeout: None,
        }
    }
}
