//! [Handler]s are functions whose arguments can be constructed from the broker or the incoming message.

use std::clone::Clone;
use std::future::Future;

use async_trait::async_trait;

use crate::{
    error::HandlerError, extract::Extract, payload::Payload, request::Request, response::Respond,
    transport::Transport,
};

/// A trait for functions that can be used as handlers for incoming messages.
///
/// The trait implementations on functions of different arities allow handlers
/// to have (almost) any number of parameters, each resolved by its
/// [`Extract`] implementation. Calling a handler resolves its arguments,
/// runs it, and encodes its return value; any failure along the way comes
/// back as a [`HandlerError`] for the push-back watcher to route.
#[async_trait]
pub trait Handler<Args, Res: Respond, T: Transport>: Send + Sync + 'static + Clone {
    /// Calls the handler with the given request.
    async fn call(self, req: &mut Request<T>) -> Result<Payload, HandlerError>;
}

/// Special-case the 0-args case to avoid unused variable warnings.
#[async_trait]
impl<Func, Fut, Res, T> Handler<(), Res, T> for Func
where
    Func: FnOnce() -> Fut + Send + Sync + 'static + Clone,
    Fut: Future<Output = Res> + Send,
    Res: Respond,
    T: Transport,
{
    async fn call(self, _req: &mut Request<T>) -> Result<Payload, HandlerError> {
        self().await.respond()
    }
}

/// Implements the handler trait for any number of parameters.
macro_rules! impl_handler {
    ( $($ty:ident),* $(,)? ) => {
        #[allow(non_snake_case)]
        #[async_trait]
        impl<Func, Fut, Res, T, $($ty,)*> Handler<($($ty,)*), Res, T> for Func
        where
            Func: FnOnce($($ty,)*) -> Fut + Send + Sync + 'static + Clone,
            Fut: Future<Output = Res> + Send,
            Res: Respond,
            T: Transport,
            $( $ty: Extract<T> + Send,)*
            $( HandlerError: From<<$ty as Extract<T>>::Error>,)*
        {
            async fn call(self, req: &mut Request<T>) -> Result<Payload, HandlerError> {
                $(
                    let $ty = match $ty::extract(req).await {
                        Ok(value) => value,
                        Err(error) => {
                            tracing::error!("Failed to extract {}: {error}", std::any::type_name::<$ty>());
                            return Err(error.into());
                        }
                    };
                )*

                self($($ty,)*).await.respond()
            }
        }
    };
}

// Implement for up to 12 parameters.
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);
