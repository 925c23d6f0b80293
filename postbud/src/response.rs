//! Handler responses and publishable values.

use serde_json::Value;

use crate::{error::HandlerError, payload::Payload};

/// A trait for types that may be returned from handlers or handed to the
/// publish path.
///
/// This really just means they can be turned into a [`Payload`]. A fallible
/// conversion routes its error through the same channel as handler failures,
/// which is what lets handlers return `Result`.
pub trait Respond {
    /// Produces the payload of this value.
    ///
    /// # Errors
    /// Returns an error when the value cannot be encoded, or, for `Result`
    /// values, when the value already was an error.
    fn respond(self) -> Result<Payload, HandlerError>;
}

impl Respond for Payload {
    fn respond(self) -> Result<Payload, HandlerError> {
        Ok(self)
    }
}

/// Handlers that don't reply just return `()`. If the requester still asked
/// for a reply, this produces the empty payload, so RPC callers always
/// unblock.
impl Respond for () {
    fn respond(self) -> Result<Payload, HandlerError> {
        Ok(Payload::Empty)
    }
}

impl Respond for String {
    fn respond(self) -> Result<Payload, HandlerError> {
        Ok(Payload::Text(self))
    }
}

impl Respond for &'static str {
    fn respond(self) -> Result<Payload, HandlerError> {
        Ok(Payload::Text(self.to_string()))
    }
}

impl Respond for Vec<u8> {
    fn respond(self) -> Result<Payload, HandlerError> {
        Ok(Payload::Bytes(self))
    }
}

impl Respond for Value {
    fn respond(self) -> Result<Payload, HandlerError> {
        Ok(Payload::Json(self))
    }
}

/// `None` responds with the empty payload.
impl<R: Respond> Respond for Option<R> {
    fn respond(self) -> Result<Payload, HandlerError> {
        match self {
            Some(value) => value.respond(),
            None => Ok(Payload::Empty),
        }
    }
}

/// This impl is what lets handlers be fallible: an `Err` is routed into the
/// push-back watcher like any other handler failure.
impl<R: Respond> Respond for Result<R, HandlerError> {
    fn respond(self) -> Result<Payload, HandlerError> {
        self?.respond()
    }
}

/// Scalars respond as JSON scalars.
macro_rules! impl_respond_scalar {
    ( $($ty:ty),* $(,)? ) => {
        $(
            impl Respond for $ty {
                fn respond(self) -> Result<Payload, HandlerError> {
                    Ok(Payload::Json(Value::from(self)))
                }
            }
        )*
    };
}

impl_respond_scalar!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);
