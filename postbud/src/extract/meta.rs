//! Message metadata extractors.

use core::fmt;
use std::collections::HashMap;
use std::convert::Infallible;

use async_trait::async_trait;
use derive_more::{Deref, DerefMut};

use crate::{extract::Extract, request::Request, transport::Transport};

/// The unique id of the current message. Every message has one: the
/// transport's own id when it supplies one, a generated UUID otherwise.
///
/// Message ids allow concurrent logs to be associated with a unique message,
/// and are the key the push-back watcher counts delivery attempts under.
#[derive(Debug, Clone, Deref)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[async_trait]
impl<T: Transport> Extract<T> for MessageId {
    type Error = Infallible;

    async fn extract(req: &mut Request<T>) -> Result<Self, Self::Error> {
        Ok(MessageId(req.message().message_id().to_string()))
    }
}

/// The correlation id of the current message, if the sender attached one.
#[derive(Debug, Clone, Deref)]
pub struct CorrelationId(pub Option<String>);

#[async_trait]
impl<T: Transport> Extract<T> for CorrelationId {
    type Error = Infallible;

    async fn extract(req: &mut Request<T>) -> Result<Self, Self::Error> {
        Ok(CorrelationId(
            req.message().correlation_id().map(str::to_string),
        ))
    }
}

/// The application headers of the current message.
#[derive(Debug, Clone, Deref, DerefMut)]
pub struct Headers(pub HashMap<String, String>);

#[async_trait]
impl<T: Transport> Extract<T> for Headers {
    type Error = Infallible;

    async fn extract(req: &mut Request<T>) -> Result<Self, Self::Error> {
        Ok(Headers(req.message().headers().clone()))
    }
}
