//! Broker- and handler-level error types.

use std::convert::Infallible;
use std::fmt;

use thiserror::Error as ThisError;

use crate::transport::TransportError;

/// Errors that may be returned by `postbud`, especially from the broker lifecycle and publish path.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The broker was started with no handlers registered.
    #[error("No handlers were registered on the broker.")]
    NoHandlers,
    /// An error from the underlying transport driver.
    #[error("The underlying transport failed: {0}")]
    Transport(#[from] TransportError),
    /// A value given to `publish` could not be encoded into a payload.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// The broker was misused in a way that is detectable synchronously,
    /// such as requesting an RPC reply with no reply target configured.
    #[error("Invalid broker usage: {0}")]
    Configuration(String),
    /// An RPC wait expired before the reply arrived and the publish was
    /// configured to raise on timeout.
    #[error("Timed out while waiting for an RPC reply.")]
    RpcTimeout,
    /// The broker was closed while the operation was pending.
    #[error("The broker is closed.")]
    Closed,
}

/// A value handed to the publish path (or returned from a handler) could not
/// be turned into a wire payload.
#[derive(Debug, ThisError)]
pub enum EncodeError {
    /// The value is not representable as a JSON payload.
    #[error("Value is not representable as a message payload: {0}")]
    Unsupported(#[from] serde_json::Error),
    /// The value produced a handler-side error that has no meaning on the
    /// publish path.
    #[error("Value cannot be published: {0}")]
    Unpublishable(String),
}

/// Errors that may be produced while dispatching a message to a handler.
///
/// These never escape the consume loop: they are routed through the
/// push-back watcher, which retries or drops the message per the handler's
/// [`RetryPolicy`](crate::RetryPolicy).
#[derive(Debug, ThisError)]
pub enum HandlerError {
    /// Sentinel raised by a handler to acknowledge and drop the current
    /// message without counting a failure.
    #[error("Message skipped by handler.")]
    Skip,
    /// The decoded payload could not be coerced into the type a handler
    /// parameter asked for.
    #[error("Payload could not be deserialized into `{target}`: {source}")]
    InvalidPayload {
        /// Name of the type the payload was coerced into.
        target: &'static str,
        /// The underlying deserialization failure.
        #[source]
        source: serde_json::Error,
    },
    /// The handler's return value could not be encoded into a reply payload.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// A handler asked for [`State<T>`](crate::extract::State) but no value
    /// of that type was added to the broker.
    #[error("State of type `{0}` was not added to the broker.")]
    StateNotFound(&'static str),
    /// The handler itself failed.
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// Constructs the [`HandlerError::Failed`] variant from any displayable reason.
    pub fn failed(reason: impl fmt::Display) -> Self {
        Self::Failed(reason.to_string())
    }
}

/// This impl ensures that extractors that use `Infallible` as their error type will automatically "just work".
///
/// This will be unnecessary once `!` is stabilized, as `!` should automatically implement every appropriate trait.
impl From<Infallible> for HandlerError {
    fn from(error: Infallible) -> Self {
        match error {}
    }
}
