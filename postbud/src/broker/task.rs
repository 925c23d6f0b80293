//! Types and utilities for the Broker's tokio tasks.
//!
//! Each registered handler is wrapped into a [`Callback`] at registration
//! time and driven by one [`consume`] task from `start` until `close`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use metrics::{counter, gauge};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, error_span, info, warn, Instrument};

use crate::{
    context,
    error::HandlerError,
    handler::Handler,
    handler_config::ConsumerConfig,
    message::Message,
    payload::Payload,
    request::{Request, StateMap},
    response::Respond,
    transport::{Outgoing, Subscription, Transport, TransportError},
    watcher::PushBackWatcher,
};

/// Fixed pause before retrying after a transport failure.
pub(crate) const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Marker returned by a wrapped callback when its message was dropped after
/// exhausting its retries. The consume loop answers a poisoned batch with a
/// short pause.
pub(crate) struct Poisoned;

/// The wrapped form of a registered handler: the full dispatch pipeline for
/// one message, from context scope to ack/nack.
pub(crate) type Callback<T> = Arc<
    dyn Fn(Message<<T as Transport>::Frame>) -> BoxFuture<'static, Result<(), Poisoned>>
        + Send
        + Sync,
>;

/// Wraps a handler into its dispatch pipeline. See [`dispatch`].
pub(crate) fn wrap<T, H, Args, Res>(
    handler: H,
    transport: Arc<T>,
    state: Arc<RwLock<StateMap>>,
    watcher: Arc<PushBackWatcher>,
    subscription: Arc<str>,
    raw: bool,
) -> Callback<T>
where
    T: Transport,
    H: Handler<Args, Res, T>,
    Res: Respond + 'static,
    Args: 'static,
{
    Arc::new(move |message: Message<T::Frame>| -> BoxFuture<'static, Result<(), Poisoned>> {
        let handler = handler.clone();
        let transport = transport.clone();
        let state = state.clone();
        let watcher = watcher.clone();
        let subscription = subscription.clone();

        Box::pin(async move {
            let span = error_span!(
                "message",
                id = %message.message_id(),
                subscription = %subscription,
            );

            dispatch(handler, transport, state, watcher, subscription, raw, message)
                .instrument(span)
                .await
        })
    })
}

/// Dispatches one message to its handler.
///
/// The pipeline: open the context scope, open the watcher scope, decode
/// (unless raw), resolve arguments and invoke via [`Handler::call`], publish
/// a reply if the message asked for one, then settle the message: ack on
/// success or skip, nack-for-requeue on a retryable failure, ack-and-drop on
/// exhaustion.
async fn dispatch<T, H, Args, Res>(
    handler: H,
    transport: Arc<T>,
    state: Arc<RwLock<StateMap>>,
    watcher: Arc<PushBackWatcher>,
    subscription: Arc<str>,
    raw: bool,
    message: Message<T::Frame>,
) -> Result<(), Poisoned>
where
    T: Transport,
    H: Handler<Args, Res, T>,
    Res: Respond + 'static,
    Args: 'static,
{
    context::isolated(async move {
        let message_id = message.message_id().to_string();
        context::set_local("message", message.info());
        context::set_local("subscription", subscription.to_string());

        let attempt = watcher.add(&message_id);
        if attempt > 1 {
            debug!("Message was redelivered, attempt {attempt}.");
        }

        let reply_to = message.reply_to().map(str::to_string);
        let correlation_id = message.correlation_id().map(str::to_string);

        let mut req = Request::new(message, state);
        if !raw {
            // Fill the decode cache up front. Decoding is total, so this
            // cannot fail; typed coercion happens in the extractors.
            let _ = req.payload();
        }

        // The reply is published inside the watcher scope: failing to
        // publish it fails the dispatch and the message is retried.
        let outcome = match handler.call(&mut req).await {
            Ok(payload) => match &reply_to {
                Some(reply_to) => reply(&*transport, reply_to, correlation_id, payload).await,
                None => Ok(()),
            },
            Err(error) => Err(error),
        };

        match outcome {
            Ok(()) => {
                watcher.remove(&message_id);
                ack(&*transport, req.message().raw()).await;
                Ok(())
            }
            Err(HandlerError::Skip) => {
                debug!("Message skipped by handler.");
                watcher.remove(&message_id);
                ack(&*transport, req.message().raw()).await;
                Ok(())
            }
            Err(error) => {
                if watcher.is_max(&message_id) {
                    error!("Dropping message after {attempt} failed attempt(s): {error:#}");
                    counter!("postbud.dropped", "subscription" => subscription.to_string())
                        .increment(1);
                    watcher.remove(&message_id);
                    ack(&*transport, req.message().raw()).await;
                    Err(Poisoned)
                } else {
                    warn!("Handler failed on attempt {attempt}, requeueing: {error:#}");
                    if let Err(error) = transport.nack(req.message().raw(), true).await {
                        error!("Failed to nack message: {error:#}");
                    }
                    Ok(())
                }
            }
        }
    })
    .await
}

/// Publishes a handler's return value to the requester's reply destination,
/// echoing the incoming correlation id.
async fn reply<T: Transport>(
    transport: &T,
    reply_to: &str,
    correlation_id: Option<String>,
    payload: Payload,
) -> Result<(), HandlerError> {
    if correlation_id.is_none() {
        warn!(
            "The message did not carry a `correlation_id`. A reply will be published, \
            but the receiver may not recognize it as the reply for their request."
        );
    }

    let (body, content_type) = payload.into_parts();
    let outgoing = Outgoing {
        destination: reply_to,
        body,
        content_type,
        correlation_id,
        reply_to: None,
        headers: HashMap::new(),
    };

    match transport.send(outgoing).await {
        Ok(()) => {
            debug!("Successfully published reply to {reply_to:?}.");
            Ok(())
        }
        Err(error) => Err(HandlerError::failed(format!(
            "failed to publish reply to {reply_to:?}: {error}"
        ))),
    }
}

/// Acks the message behind the frame. Failures are logged, not retried: the
/// broker will redeliver an unacked message anyway.
async fn ack<T: Transport>(transport: &T, frame: &T::Frame) {
    match transport.ack(frame).await {
        Ok(()) => debug!("Successfully acked message."),
        Err(error) => error!("Failed to ack message: {error:#}"),
    }
}

/// The long-running consume loop of one handler.
///
/// Fetches batches from the subscription and feeds them, sequentially and in
/// delivered order, through the wrapped callback. Transport failures switch
/// the loop into a reconnect cycle: one warning, a fixed backoff between
/// attempts, a re-declaration of the subscription and a single log line once
/// the connection is re-established. The loop only ever exits through the
/// shutdown channel.
pub(crate) async fn consume<T: Transport>(
    transport: Arc<T>,
    subscription: T::Sub,
    config: ConsumerConfig,
    callback: Callback<T>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let key = subscription.key().to_string();
    gauge!("postbud.consumers", "subscription" => key.clone()).increment(1.0);

    let mut connected = true;
    loop {
        let batch = tokio::select! {
            // "Biased" here means that instead of randomly selecting a path,
            // Tokio will check from top to bottom. This ensures that we
            // check for shutdown before fetching a new batch.
            biased;

            _ = shutdown.recv() => break,

            batch = fetch(&*transport, &subscription, &config, connected) => batch,
        };

        match batch {
            Err(error) => {
                if connected {
                    warn!(subscription = %key, "Transport failure, reconnecting: {error:#}");
                    connected = false;
                }

                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    () = sleep(RECONNECT_DELAY) => {}
                }
            }
            Ok(batch) => {
                if !connected {
                    info!(subscription = %key, "Connection re-established.");
                    connected = true;
                }

                // Messages within a batch are dispatched sequentially, in
                // delivered order. An in-flight dispatch always finishes its
                // ack/nack before the loop can observe a shutdown. Each
                // dispatch runs in its own task so that a panicking handler
                // cannot take the consume loop down with it; the unacked
                // message is redelivered by the broker.
                let mut dropped_poison = false;
                for message in batch {
                    match tokio::spawn((*callback)(message)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(Poisoned)) => dropped_poison = true,
                        Err(join_error) => {
                            error!(subscription = %key, "Handler panicked: {join_error:#}");
                            dropped_poison = true;
                        }
                    }
                }

                // A batch that dropped a poison message earns a pause, so a
                // permanently failing queue does not spin the loop.
                if dropped_poison {
                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => break,
                        () = sleep(config.wait_interval) => {}
                    }
                }
            }
        }
    }

    gauge!("postbud.consumers", "subscription" => key.clone()).decrement(1.0);
    debug!(subscription = %key, "Consumer stopped.");
}

/// One fetch attempt, re-declaring the subscription first when the previous
/// attempt failed.
async fn fetch<T: Transport>(
    transport: &T,
    subscription: &T::Sub,
    config: &ConsumerConfig,
    connected: bool,
) -> Result<Vec<Message<T::Frame>>, TransportError> {
    if !connected {
        transport.declare(subscription).await?;
    }
    transport.fetch(subscription, config).await
}
