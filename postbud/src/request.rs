//! Inbound requests: what extractors pull their values from.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::{message::Message, payload::Payload, transport::Transport};

/// The broker's typed state storage, read by the
/// [`State`](crate::extract::State) extractor.
pub(crate) type StateMap = anymap::Map<dyn Any + Send + Sync>;

/// An inbound request: the canonical message plus the broker facilities
/// extractors need.
///
/// One request exists per dispatch. It owns the message (including the raw
/// frame handle the watcher scope acks through) and lazily caches the
/// decoded payload so several extractors can share one decode.
pub struct Request<T: Transport> {
    /// The canonical message being dispatched.
    message: Message<T::Frame>,
    /// Decoded payload cache. Filled eagerly unless the handler was
    /// registered raw, and on first use otherwise.
    payload: Option<Payload>,
    /// The broker's typed state.
    state: Arc<RwLock<StateMap>>,
}

impl<T: Transport> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("message", &self.message)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Request<T> {
    /// Bundles a message with the broker state into a request.
    pub(crate) fn new(message: Message<T::Frame>, state: Arc<RwLock<StateMap>>) -> Self {
        Self {
            message,
            payload: None,
            state,
        }
    }

    /// Returns a reference to the message of this request.
    pub fn message(&self) -> &Message<T::Frame> {
        &self.message
    }

    /// Returns the decoded payload, decoding on first use.
    ///
    /// Decoding is total, so this never fails; an undecodable body comes
    /// back as raw bytes.
    pub fn payload(&mut self) -> &Payload {
        let message = &self.message;
        self.payload.get_or_insert_with(|| Payload::decode(message))
    }

    /// Returns a clone of the broker state value of type `V`, if one was
    /// added with [`Broker::state`](crate::Broker::state).
    pub fn state<V>(&self) -> Option<V>
    where
        V: Any + Clone + Send + Sync,
    {
        self.state
            .read()
            .expect("state lock poisoned")
            .get::<V>()
            .cloned()
    }
}
