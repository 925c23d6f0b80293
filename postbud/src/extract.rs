//! Interface for types that can extract themselves from requests.
//!
//! Extractors are how handler arguments get resolved: each parameter type of
//! a registered handler implements [`Extract`] and pulls its value from the
//! [`Request`], be it the decoded payload, the message metadata, or broker
//! state.

mod body;
mod json;
mod meta;
mod state;

pub use body::{Body, Decoded, Text};
pub use json::Json;
pub use meta::{CorrelationId, Headers, MessageId};
pub use state::State;

use std::convert::Infallible;
use std::error::Error;

use async_trait::async_trait;

use crate::{request::Request, transport::Transport};

/// A trait for types that can be extracted from [requests](`Request`).
///
/// Note that extractions might mutate the request in certain ways, such as
/// filling the decoded payload cache.
#[async_trait]
pub trait Extract<T: Transport>: Sized {
    /// The error to return in case extraction fails.
    type Error: Error;

    /// Extract the type from the request.
    async fn extract(req: &mut Request<T>) -> Result<Self, Self::Error>;
}

/// Extracting options simply discards the error and returns None in that case.
#[async_trait]
impl<T, E> Extract<T> for Option<E>
where
    T: Transport,
    E: Extract<T> + Send,
{
    type Error = Infallible;

    async fn extract(req: &mut Request<T>) -> Result<Self, Self::Error> {
        Ok(Extract::extract(req).await.ok())
    }
}

/// Extracting a result returns the extraction error if it fails, allowing the handler to decide what to do with the error.
#[async_trait]
impl<T, E> Extract<T> for Result<E, <E as Extract<T>>::Error>
where
    T: Transport,
    E: Extract<T> + Send,
{
    type Error = Infallible;

    async fn extract(req: &mut Request<T>) -> Result<Self, Self::Error> {
        Ok(Extract::extract(req).await)
    }
}
