//! The transport driver interface: the only plug-in surface of the runtime.
//!
//! A driver owns everything broker-specific (connections, wire parsing,
//! native acknowledgement) and hands the core canonical [`Message`]s. The
//! core never sees a transport-native detail beyond the opaque frame handle
//! it passes back for ack/nack.

pub mod memory;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error as ThisError;

use crate::{handler_config::ConsumerConfig, message::ContentType, message::Message};

/// A connectivity or protocol failure reported by a transport driver.
///
/// The consume loop recovers from these locally (reconnect with backoff);
/// the publish path surfaces them to the caller as-is.
#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct TransportError {
    /// Human-readable description of the failure.
    message: String,
    /// The driver-native error, when one exists.
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl TransportError {
    /// Creates an error from a plain description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping a driver-native error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// What a handler binds to: a queue, subject, or topic+group, whatever the
/// transport natively addresses.
///
/// The core treats subscriptions as opaque. It only needs a stable [`key`]
/// for logging and metric labels, and a way to build one from a bare name
/// (`From<String>`) so broker-level destinations such as the response queue
/// can be subscribed to.
///
/// [`key`]: Subscription::key
pub trait Subscription: Clone + Send + Sync + From<String> + 'static {
    /// The equality key of this subscription, used for logging and metrics.
    fn key(&self) -> &str;
}

/// The simplest subscription: a bare queue or subject name.
impl Subscription for String {
    fn key(&self) -> &str {
        self
    }
}

/// An outbound message, ready for the wire.
///
/// The driver maps the well-known fields to its native attributes: where the
/// transport offers headers, `content_type` travels as a `content-type`
/// header and `correlation_id` under that exact name; otherwise they ride a
/// transport-native attribute alongside the body.
#[derive(Debug)]
pub struct Outgoing<'a> {
    /// Destination queue/subject name.
    pub destination: &'a str,
    /// The encoded body.
    pub body: Vec<u8>,
    /// Media label of the body, if any.
    pub content_type: Option<ContentType>,
    /// Correlation id for reply matching, if any.
    pub correlation_id: Option<String>,
    /// Destination the receiver should reply to, if a reply is expected.
    pub reply_to: Option<String>,
    /// Additional application headers.
    pub headers: HashMap<String, String>,
}

/// A transport driver: the broker runtime is parameterized over this.
///
/// Implementations must be safe for concurrent use, as the connection is
/// shared by every consume task and the publish path, or serialize
/// internally.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The driver's subscription descriptor.
    type Sub: Subscription;
    /// The driver's native frame handle, kept on a [`Message`] so the
    /// dispatch pipeline can ack or nack it.
    type Frame: Send + Sync + fmt::Debug + 'static;

    /// Establishes (or re-establishes) the connection. Must be idempotent.
    ///
    /// # Errors
    /// Returns an error when the broker cannot be reached.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Declares the subscription on the broker so that fetching from it can
    /// succeed. Called before the first fetch and again after a reconnect.
    ///
    /// # Errors
    /// Returns an error when the declaration is refused or the connection is
    /// down.
    async fn declare(&self, subscription: &Self::Sub) -> Result<(), TransportError>;

    /// Fetches the next batch of messages, already parsed into canonical
    /// form. An empty batch after the consumer's wait interval is normal.
    ///
    /// # Errors
    /// Returns an error on connectivity loss; the consume loop will back off
    /// and re-declare.
    async fn fetch(
        &self,
        subscription: &Self::Sub,
        config: &ConsumerConfig,
    ) -> Result<Vec<Message<Self::Frame>>, TransportError>;

    /// Sends an outbound message.
    ///
    /// # Errors
    /// Returns an error when the message could not be handed to the broker.
    async fn send(&self, outgoing: Outgoing<'_>) -> Result<(), TransportError>;

    /// Acknowledges the message behind the frame handle.
    ///
    /// # Errors
    /// Returns an error on connectivity loss.
    async fn ack(&self, frame: &Self::Frame) -> Result<(), TransportError>;

    /// Rejects the message behind the frame handle, optionally requeueing it
    /// for redelivery.
    ///
    /// # Errors
    /// Returns an error on connectivity loss.
    async fn nack(&self, frame: &Self::Frame, requeue: bool) -> Result<(), TransportError>;

    /// Closes the connection. Must be idempotent.
    ///
    /// # Errors
    /// Returns an error when teardown fails; the broker treats this as
    /// best-effort.
    async fn close(&self) -> Result<(), TransportError>;
}
