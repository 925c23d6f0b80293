//! # postbud
//!
//! A unified client framework for asynchronous message brokers.
//!
//! postbud makes it easy to consume from and publish to message brokers with
//! minimal boilerplate: register async handler functions on subscriptions,
//! get decoded payloads and extracted arguments delivered to them, and
//! publish symmetrically, including request/reply (RPC) with response
//! correlation. The runtime is transport-agnostic: everything
//! broker-specific lives behind the [`Transport`] trait.

// postbud is 100% Safe Rust.
#![forbid(unsafe_code)]
#![warn(
    // Warns on ::path, allows crate::path.
    absolute_paths_not_starting_with_crate,

    // Warns you about missing documentation comments.
    // Writing documentation is a good idea! They will show up in your IDE as well.
    // Consider this a friendly nudge :)
    missing_docs,
    clippy::missing_docs_in_private_items,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,

    // Warns you when you have dependencies you're not using.
    unused_crate_dependencies,

    // Warns on converting values using the `as` keyword.
    // Converting in this way panics in case of errors. Consider using the `Into` or `TryInto` traits instead.
    clippy::as_conversions,
)]

pub mod broker;
pub mod context;
pub mod error;
pub mod extract;
pub mod handler;
pub mod handler_config;
pub mod message;
pub mod payload;
pub mod publish_config;
pub mod request;
pub mod response;
pub mod transport;
pub mod watcher;

mod rpc;

// pub-using every name::Name to avoid having to have postbud::name::Name repetition.
// This way you can just do postbud::Name.
pub use broker::Broker;
pub use error::Error;
pub use error::HandlerError;
pub use extract::Extract;
pub use handler::Handler;
pub use handler_config::{ConsumerConfig, HandlerConfig};
pub use message::{ContentType, Message, MessageInfo};
pub use payload::Payload;
pub use publish_config::PublishConfig;
pub use request::Request;
pub use response::Respond;
pub use transport::memory::MemoryTransport;
pub use transport::{Outgoing, Subscription, Transport, TransportError};
pub use watcher::RetryPolicy;

/// Convenience type for a result with `postbud`'s error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    pub use super::*;

    mod basic;
    mod codec;
    mod reconnect;
    mod retry;
    mod rpc;

    use std::time::Duration;

    /// Installs a subscriber so test runs emit their traces to the test
    /// writer. Safe to call from every test.
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    /// Polls the condition until it holds, panicking when it does not come
    /// true within two seconds.
    pub async fn eventually(mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition was not met in time"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
