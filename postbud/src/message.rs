//! The transport-neutral form of an inbound message.

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

/// The media label of a message body.
///
/// The runtime itself only produces [`ContentType::Json`] and
/// [`ContentType::Text`]; anything else a transport hands us is preserved in
/// [`ContentType::Other`] and decoded with the content-sniffing fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    /// `application/json`.
    Json,
    /// `text/plain`.
    Text,
    /// Any other media label, preserved verbatim.
    Other(String),
}

impl ContentType {
    /// The canonical string form of this media label.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Json => "application/json",
            Self::Text => "text/plain",
            Self::Other(label) => label,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ContentType {
    fn from(label: &str) -> Self {
        match label {
            "application/json" => Self::Json,
            "text/plain" => Self::Text,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ContentType {
    fn from(label: String) -> Self {
        label.as_str().into()
    }
}

/// The canonical in-memory form of an inbound message.
///
/// Transport drivers parse their native frames into this form inside
/// [`Transport::fetch`](crate::Transport::fetch). The `raw` field keeps the
/// transport-native handle that is later needed to ack or nack the message.
///
/// Invariants, enforced by the builder methods: `message_id` is never empty
/// (a fresh UUID is generated when the transport did not supply one);
/// `content_type`, `reply_to` and `correlation_id` are either absent or
/// non-empty; the body is always present, possibly zero-length.
#[derive(Debug)]
pub struct Message<F> {
    /// The raw bytes of the body.
    body: Vec<u8>,
    /// Media label of the body, if the transport carried one.
    content_type: Option<ContentType>,
    /// Unique id of this message.
    message_id: String,
    /// Correlation id to echo on a reply.
    correlation_id: Option<String>,
    /// Destination to which a reply should be published. Absent means no
    /// reply is expected.
    reply_to: Option<String>,
    /// Remaining transport headers, after the well-known ones were lifted
    /// into the fields above.
    headers: HashMap<String, String>,
    /// The transport-native frame handle, used to ack/nack.
    raw: F,
}

impl<F> Message<F> {
    /// Creates a message with the given body and raw frame handle and a
    /// freshly generated message id.
    pub fn new(body: Vec<u8>, raw: F) -> Self {
        Self {
            body,
            content_type: None,
            message_id: Uuid::new_v4().to_string(),
            correlation_id: None,
            reply_to: None,
            headers: HashMap::new(),
            raw,
        }
    }

    /// Sets the message id the transport supplied. An empty id is ignored,
    /// keeping the generated one.
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        let message_id = message_id.into();
        if !message_id.is_empty() {
            self.message_id = message_id;
        }
        self
    }

    /// Sets the content type of the body.
    pub fn with_content_type(mut self, content_type: impl Into<ContentType>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the reply destination. An empty destination means "no reply
    /// expected" and is normalized to absent.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        let reply_to = reply_to.into();
        self.reply_to = (!reply_to.is_empty()).then_some(reply_to);
        self
    }

    /// Sets the correlation id. An empty id is normalized to absent.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        let correlation_id = correlation_id.into();
        self.correlation_id = (!correlation_id.is_empty()).then_some(correlation_id);
        self
    }

    /// Adds a transport header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Replaces the full header map.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// The raw bytes of the body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Media label of the body, if any.
    pub fn content_type(&self) -> Option<&ContentType> {
        self.content_type.as_ref()
    }

    /// The unique id of this message.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// The correlation id to echo on a reply, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// The destination a reply should be published to, if one is expected.
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// The remaining transport headers.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// The transport-native frame handle.
    pub fn raw(&self) -> &F {
        &self.raw
    }

    /// The frame-free projection of this message, suitable for publishing
    /// into the [context scope](crate::context).
    pub fn info(&self) -> MessageInfo {
        MessageInfo {
            message_id: self.message_id.clone(),
            content_type: self.content_type.clone(),
            correlation_id: self.correlation_id.clone(),
            reply_to: self.reply_to.clone(),
            headers: self.headers.clone(),
        }
    }
}

/// The metadata of a [`Message`], without the body and the transport frame.
///
/// This is what the dispatch pipeline stores under the `message` key of the
/// context scope, so callbacks can see which message they run for without
/// explicit plumbing.
#[derive(Debug, Clone)]
pub struct MessageInfo {
    /// Unique id of the message.
    pub message_id: String,
    /// Media label of the body, if any.
    pub content_type: Option<ContentType>,
    /// Correlation id to echo on a reply, if any.
    pub correlation_id: Option<String>,
    /// Destination a reply should be published to, if one is expected.
    pub reply_to: Option<String>,
    /// Remaining transport headers.
    pub headers: HashMap<String, String>,
}
