//! Payload extractors that stay close to the wire.

use std::convert::Infallible;

use async_trait::async_trait;
use derive_more::{Deref, DerefMut};
use serde_json::Value;

use crate::{
    error::HandlerError, extract::Extract, payload::Payload, request::Request,
    transport::Transport,
};

/// The raw body bytes, exactly as the transport delivered them.
#[derive(Debug, Deref, DerefMut)]
pub struct Body(pub Vec<u8>);

#[async_trait]
impl<T: Transport> Extract<T> for Body {
    type Error = Infallible;

    async fn extract(req: &mut Request<T>) -> Result<Self, Self::Error> {
        Ok(Body(req.message().body().to_vec()))
    }
}

/// The payload as a string.
///
/// Accepts textual payloads (`text/plain` bodies, JSON strings, and the
/// empty body as the empty string); anything else fails extraction.
#[derive(Debug, Deref, DerefMut)]
pub struct Text(pub String);

#[async_trait]
impl<T: Transport> Extract<T> for Text {
    type Error = HandlerError;

    async fn extract(req: &mut Request<T>) -> Result<Self, Self::Error> {
        match req.payload() {
            Payload::Text(text) => Ok(Text(text.clone())),
            Payload::Json(Value::String(text)) => Ok(Text(text.clone())),
            Payload::Empty => Ok(Text(String::new())),
            other => Err(HandlerError::failed(format!(
                "expected a textual payload, got {other:?}"
            ))),
        }
    }
}

/// The total-decode result, whatever shape it took.
#[derive(Debug, Deref, DerefMut)]
pub struct Decoded(pub Payload);

#[async_trait]
impl<T: Transport> Extract<T> for Decoded {
    type Error = Infallible;

    async fn extract(req: &mut Request<T>) -> Result<Self, Self::Error> {
        Ok(Decoded(req.payload().clone()))
    }
}
