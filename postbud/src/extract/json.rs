//! Allows extracting the payload coerced into a deserializable type.

use std::any::type_name;

use async_trait::async_trait;
use derive_more::{Deref, DerefMut};
use serde::de::{DeserializeOwned, Error as _};
use serde::Serialize;
use serde_json::Value;

use crate::{
    error::HandlerError, extract::Extract, payload::Payload, request::Request, response::Respond,
    transport::Transport,
};

/// A wrapper that coerces the decoded payload into `V` on the way in and
/// serializes `V` as a JSON payload on the way out.
///
/// As an extractor, a JSON object maps onto `V`'s fields by name; a handler
/// declaring a single structured parameter therefore receives the whole
/// payload. As a response, the inner value is serialized to JSON.
#[derive(Debug, Deref, DerefMut)]
pub struct Json<V>(pub V);

/// Extract implementation for deserializable payloads.
#[async_trait]
impl<T, V> Extract<T> for Json<V>
where
    T: Transport,
    V: DeserializeOwned + Send,
{
    type Error = HandlerError;

    async fn extract(req: &mut Request<T>) -> Result<Self, Self::Error> {
        let value = match req.payload() {
            Payload::Json(value) => value.clone(),
            Payload::Text(text) => Value::String(text.clone()),
            Payload::Empty => Value::Null,
            Payload::Bytes(_) => {
                return Err(HandlerError::InvalidPayload {
                    target: type_name::<V>(),
                    source: serde_json::Error::custom("payload is raw binary"),
                })
            }
        };

        serde_json::from_value(value)
            .map(Json)
            .map_err(|source| HandlerError::InvalidPayload {
                target: type_name::<V>(),
                source,
            })
    }
}

impl<V: Serialize> Respond for Json<V> {
    fn respond(self) -> Result<Payload, HandlerError> {
        Ok(Payload::serialize(&self.0)?)
    }
}
