//! Allows extracting broker state.

use std::any::{type_name, Any};

use async_trait::async_trait;
use derive_more::{Deref, DerefMut};
use tracing::error;

use crate::{error::HandlerError, extract::Extract, request::Request, transport::Transport};

/// `State` is an extractor helper struct that allows you to extract broker
/// state that has previously been added through a call to
/// [`Broker::state`](crate::Broker::state).
///
/// This implements `Deref` and `DerefMut` to the inner type.
#[derive(Debug, Deref, DerefMut)]
pub struct State<V>(pub V);

impl<V: Clone> Clone for State<V> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Extract implementation for broker state.
#[async_trait]
impl<T, V> Extract<T> for State<V>
where
    T: Transport,
    V: Any + Clone + Send + Sync,
{
    type Error = HandlerError;

    async fn extract(req: &mut Request<T>) -> Result<Self, Self::Error> {
        match req.state::<V>() {
            None => {
                error!(
                    "Attempted to retrieve state of type {}, but that type has not been added to the broker. Add it with `broker.state(...)`",
                    type_name::<V>()
                );
                Err(HandlerError::StateNotFound(type_name::<V>()))
            }
            Some(value) => Ok(State(value)),
        }
    }
}
