//! The payload codec: one in-memory form for both directions of the wire.

use serde::Serialize;
use serde_json::Value;

use crate::{error::EncodeError, message::ContentType, message::Message};

/// A message payload, either about to be encoded for publishing or just
/// decoded from an inbound message.
///
/// Decoding is total: any body decodes into one of these variants, worst
/// case as a raw [`Payload::Bytes`] passthrough.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No payload. Encodes to an empty body with no content type.
    Empty,
    /// Raw bytes, passed through verbatim with no content type.
    Bytes(Vec<u8>),
    /// A UTF-8 string, encoded as `text/plain`.
    Text(String),
    /// A JSON document, encoded as `application/json`.
    Json(Value),
}

impl Payload {
    /// Serializes an arbitrary value into a JSON payload.
    ///
    /// This is the escape hatch for structured values; plain strings, bytes
    /// and scalars should use the `From` conversions instead so they keep
    /// their natural content types.
    ///
    /// # Errors
    /// Returns [`EncodeError::Unsupported`] when the value cannot be
    /// represented as JSON (for example a map with non-string keys).
    pub fn serialize<T: Serialize>(value: &T) -> Result<Self, EncodeError> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Decodes the body of an inbound message.
    ///
    /// The rules, by content type:
    /// - empty body → [`Payload::Empty`], regardless of content type;
    /// - `application/json` → parsed JSON, falling back to the raw UTF-8
    ///   string, falling back to raw bytes;
    /// - `text/plain` → UTF-8 string, falling back to raw bytes;
    /// - absent or unknown → attempt JSON, fall back to UTF-8, fall back to
    ///   raw bytes.
    pub fn decode<F>(message: &Message<F>) -> Self {
        let body = message.body();
        if body.is_empty() {
            return Self::Empty;
        }

        match message.content_type() {
            Some(ContentType::Json) => Self::sniff(body),
            Some(ContentType::Text) => Self::text_or_bytes(body),
            Some(ContentType::Other(_)) | None => Self::sniff(body),
        }
    }

    /// Consumes the payload, producing the wire body and its content type.
    pub fn into_parts(self) -> (Vec<u8>, Option<ContentType>) {
        match self {
            Self::Empty => (Vec::new(), None),
            Self::Bytes(body) => (body, None),
            Self::Text(text) => (text.into_bytes(), Some(ContentType::Text)),
            Self::Json(value) => {
                let body = serde_json::to_vec(&value)
                    .expect("serializing a serde_json::Value cannot fail");
                (body, Some(ContentType::Json))
            }
        }
    }

    /// True when the payload is [`Payload::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// JSON first, then UTF-8, then raw bytes.
    fn sniff(body: &[u8]) -> Self {
        match serde_json::from_slice(body) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::text_or_bytes(body),
        }
    }

    /// UTF-8 string, falling back to raw bytes.
    fn text_or_bytes(body: &[u8]) -> Self {
        match String::from_utf8(body.to_vec()) {
            Ok(text) => Self::Text(text),
            Err(e) => Self::Bytes(e.into_bytes()),
        }
    }
}

impl From<()> for Payload {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

impl From<Vec<u8>> for Payload {
    fn from(body: Vec<u8>) -> Self {
        Self::Bytes(body)
    }
}

impl From<&[u8]> for Payload {
    fn from(body: &[u8]) -> Self {
        Self::Bytes(body.to_vec())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Scalars publish as JSON scalars.
macro_rules! impl_from_scalar {
    ( $($ty:ty),* $(,)? ) => {
        $(
            impl From<$ty> for Payload {
                fn from(value: $ty) -> Self {
                    Self::Json(Value::from(value))
                }
            }
        )*
    };
}

impl_from_scalar!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);
