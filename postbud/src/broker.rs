//! Module for the [Broker] struct and surrounding utilities.

mod task;

use std::any::{type_name, Any};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use self::task::Callback;
use crate::{
    error::{EncodeError, Error, HandlerError},
    extract::{CorrelationId, Decoded},
    handler::Handler,
    handler_config::HandlerConfig,
    payload::Payload,
    publish_config::PublishConfig,
    request::StateMap,
    response::Respond,
    rpc::Correlator,
    transport::{Outgoing, Subscription, Transport},
    watcher::PushBackWatcher,
    Result,
};

/// How long `close` waits for consume tasks to finish their in-flight
/// dispatch before aborting them.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of a [`Broker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    /// Constructed, not yet connected.
    New,
    /// Transport connection established.
    Connected,
    /// Consume tasks running.
    Running,
    /// Shut down. Terminal.
    Closed,
}

/// A registered binding of a subscription to a wrapped handler.
struct HandlerRecord<T: Transport> {
    /// What the handler consumes from.
    subscription: T::Sub,
    /// The wrapped dispatch pipeline, built at registration.
    callback: Callback<T>,
    /// Registration-time configuration.
    config: HandlerConfig,
    /// The consume task, assigned at `start` and released at `close`.
    task: Option<JoinHandle<()>>,
}

/// The central struct of your application: registers handlers, runs their
/// consumers, publishes messages and awaits RPC replies, all over a
/// pluggable [`Transport`].
#[must_use = "The broker will not consume anything unless you call `.start`."]
pub struct Broker<T: Transport> {
    /// The transport driver, shared with every consume task.
    transport: Arc<T>,
    /// Typed application state, readable through the
    /// [`State`](crate::extract::State) extractor.
    state: Arc<RwLock<StateMap>>,
    /// The RPC pending-response table.
    correlator: Arc<Correlator>,
    /// Default reply destination for RPC publishes, consumed by the implicit
    /// response handler.
    response_queue: Option<String>,
    /// The handler registry. Mutated only before `start`.
    handlers: Mutex<Vec<HandlerRecord<T>>>,
    /// Whether the implicit response handler was already registered.
    response_installed: AtomicBool,
    /// Lifecycle state.
    status: Mutex<Status>,
    /// Broadcasts the shutdown signal to every consume task.
    shutdown: broadcast::Sender<()>,
}

impl<T: Transport> Broker<T> {
    /// Creates a new broker over the given transport driver.
    pub fn new(transport: T) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            transport: Arc::new(transport),
            state: Arc::new(RwLock::new(StateMap::new())),
            correlator: Arc::new(Correlator::new()),
            response_queue: None,
            handlers: Mutex::new(Vec::new()),
            response_installed: AtomicBool::new(false),
            status: Mutex::new(Status::New),
            shutdown,
        }
    }

    /// Sets the queue that RPC replies to this broker's publishes arrive on.
    ///
    /// With this configured, `start` installs an implicit consumer on the
    /// queue that matches replies to their awaiting publishes by correlation
    /// id. Without it, RPC publishes must set an explicit `reply_to`.
    pub fn response_queue(mut self, queue: impl Into<String>) -> Self {
        self.response_queue = Some(queue.into());
        self
    }

    /// Adds a value as state to this broker.
    ///
    /// A `Broker` may use any number of types as state, one value per type.
    /// Handlers retrieve them with the [`State`](crate::extract::State)
    /// extractor.
    ///
    /// # Panics
    /// Panics if the given type has already been registered as state.
    pub fn state<V: Any + Clone + Send + Sync>(self, value: V) -> Self {
        debug!("Registering state for type {}", type_name::<V>());
        let replaced = self
            .state
            .write()
            .expect("state lock poisoned")
            .insert(value)
            .is_some();
        if replaced {
            panic!(
                "Attempted to register a state type, `{}`, that had already been registered before! \
                You can only register one value of each type. If you need multiple values of the same type, \
                use the newtype pattern to signify the semantic difference between the two values.",
                type_name::<V>()
            );
        }
        self
    }

    /// Registers a new handler for the given subscription with the default
    /// configuration (no retries, eager decoding).
    ///
    /// The handler will reply to any message that carries a `reply_to`,
    /// echoing its `correlation_id`. This requires that the return type
    /// implements [`Respond`].
    pub fn handler<H, Args, Res>(self, subscription: impl Into<T::Sub>, handler: H) -> Self
    where
        H: Handler<Args, Res, T>,
        Res: Respond + 'static,
        Args: 'static,
    {
        self.handler_with_config(subscription, handler, Default::default())
    }

    /// Registers a new handler for the given subscription with the given
    /// configuration.
    ///
    /// Must be called before [`start`](Self::start); the registry is frozen
    /// once the consumers run.
    pub fn handler_with_config<H, Args, Res>(
        self,
        subscription: impl Into<T::Sub>,
        handler: H,
        config: HandlerConfig,
    ) -> Self
    where
        H: Handler<Args, Res, T>,
        Res: Respond + 'static,
        Args: 'static,
    {
        self.register(subscription.into(), handler, config);
        self
    }

    /// Returns a reference to the underlying transport driver.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Builds the wrapped callback for a handler and stores its record.
    fn register<H, Args, Res>(&self, subscription: T::Sub, handler: H, config: HandlerConfig)
    where
        H: Handler<Args, Res, T>,
        Res: Respond + 'static,
        Args: 'static,
    {
        debug!(
            "Registering handler {} on subscription {:?} with config {config:?}",
            type_name::<H>(),
            subscription.key(),
        );

        let watcher = Arc::new(PushBackWatcher::new(config.retry));
        let callback = task::wrap(
            handler,
            self.transport.clone(),
            self.state.clone(),
            watcher,
            Arc::from(subscription.key()),
            config.raw,
        );

        self.handlers
            .lock()
            .expect("handler registry lock poisoned")
            .push(HandlerRecord {
                subscription,
                callback,
                config,
                task: None,
            });
    }

    /// Establishes the transport connection. Idempotent.
    ///
    /// # Errors
    /// Returns an error when the transport cannot connect, or
    /// [`Error::Closed`] after `close`.
    pub async fn connect(&self) -> Result<()> {
        {
            let status = self.status.lock().expect("status lock poisoned");
            match *status {
                Status::Closed => return Err(Error::Closed),
                Status::Connected | Status::Running => return Ok(()),
                Status::New => {}
            }
        }

        debug!("Connecting to the broker ...");
        self.transport.connect().await?;

        let mut status = self.status.lock().expect("status lock poisoned");
        if *status == Status::New {
            *status = Status::Connected;
        }
        Ok(())
    }

    /// Starts every registered handler: declares its subscription and
    /// launches its consume task. Connects first if needed.
    ///
    /// With a [`response_queue`](Self::response_queue) configured, this also
    /// installs the implicit RPC response consumer.
    ///
    /// All handlers must be registered before this is called.
    ///
    /// # Errors
    /// Returns [`Error::NoHandlers`] when nothing was registered, or a
    /// transport error when connecting or declaring a subscription fails.
    pub async fn start(&self) -> Result<()> {
        self.connect().await?;
        {
            let status = self.status.lock().expect("status lock poisoned");
            match *status {
                Status::Running => return Ok(()),
                Status::Closed => return Err(Error::Closed),
                Status::New | Status::Connected => {}
            }
        }

        if let Some(queue) = self.response_queue.clone() {
            if !self.response_installed.swap(true, Ordering::SeqCst) {
                self.install_response_handler(queue);
            }
        }

        // Snapshot the registry so no lock is held across transport calls.
        let specs: Vec<_> = {
            let handlers = self.handlers.lock().expect("handler registry lock poisoned");
            if handlers.is_empty() {
                return Err(Error::NoHandlers);
            }
            handlers
                .iter()
                .enumerate()
                .filter(|(_, record)| record.task.is_none())
                .map(|(index, record)| {
                    (
                        index,
                        record.subscription.clone(),
                        record.config.consumer.clone(),
                        record.callback.clone(),
                    )
                })
                .collect()
        };

        let mut spawned = Vec::with_capacity(specs.len());
        for (index, subscription, consumer, callback) in specs {
            debug!(
                "Spawning consume task for subscription {:?} ...",
                subscription.key()
            );
            self.transport.declare(&subscription).await?;

            let handle = tokio::spawn(task::consume(
                self.transport.clone(),
                subscription,
                consumer,
                callback,
                self.shutdown.subscribe(),
            ));
            spawned.push((index, handle));
        }

        {
            let mut handlers = self.handlers.lock().expect("handler registry lock poisoned");
            let count = spawned.len();
            for (index, handle) in spawned {
                handlers[index].task = Some(handle);
            }
            info!(
                "Connected to the broker. Listening on {} handler{}.",
                count,
                if count == 1 { "" } else { "s" }
            );
        }

        *self.status.lock().expect("status lock poisoned") = Status::Running;
        Ok(())
    }

    /// Shuts the broker down: stops every consume task (waiting out a
    /// bounded grace period for in-flight dispatches), cancels every pending
    /// RPC wait with [`Error::Closed`], and closes the transport.
    /// Idempotent.
    ///
    /// # Errors
    /// Returns an error when the transport fails to close; the broker is
    /// closed regardless.
    pub async fn close(&self) -> Result<()> {
        {
            let mut status = self.status.lock().expect("status lock poisoned");
            if *status == Status::Closed {
                return Ok(());
            }
            *status = Status::Closed;
        }

        info!("Closing broker ...");
        // No receivers just means no consumer ever started.
        let _ = self.shutdown.send(());

        let tasks: Vec<_> = {
            let mut handlers = self.handlers.lock().expect("handler registry lock poisoned");
            handlers
                .iter_mut()
                .filter_map(|record| {
                    record
                        .task
                        .take()
                        .map(|task| (record.subscription.key().to_string(), task))
                })
                .collect()
        };

        let deadline = tokio::time::Instant::now() + CLOSE_GRACE;
        for (key, mut task) in tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    error!("Consume task for {key:?} panicked: {join_error:#}");
                }
                Err(_) => {
                    warn!("Consume task for {key:?} did not stop within the grace period, aborting.");
                    task.abort();
                }
            }
        }

        self.correlator.cancel_all();
        self.transport.close().await?;
        info!("Broker closed.");
        Ok(())
    }

    /// Publishes a value to a destination, fire-and-forget.
    ///
    /// # Errors
    /// Returns an error when the value cannot be encoded or the transport
    /// rejects the send.
    pub async fn publish(&self, value: impl Respond, destination: &str) -> Result<()> {
        self.publish_with_config(value, destination, PublishConfig::new())
            .await
            .map(|_| ())
    }

    /// Publishes a value to a destination with the given configuration,
    /// optionally waiting for an RPC reply.
    ///
    /// Returns the decoded reply payload for an RPC publish that received
    /// one, and `None` for a fire-and-forget publish or an expired wait
    /// (unless `raise_timeout` was set). Note that a reply with an empty
    /// body also comes back as `None`-like [`Payload::Empty`]; an expired
    /// wait is `None` proper.
    ///
    /// # Errors
    /// - [`Error::Configuration`] for an RPC publish with no reply target;
    /// - [`Error::Encode`] when the value cannot be encoded;
    /// - [`Error::Transport`] when the send fails;
    /// - [`Error::RpcTimeout`] when the wait expires and `raise_timeout` is set;
    /// - [`Error::Closed`] when the broker closes while waiting.
    pub async fn publish_with_config(
        &self,
        value: impl Respond,
        destination: &str,
        config: PublishConfig,
    ) -> Result<Option<Payload>> {
        if *self.status.lock().expect("status lock poisoned") == Status::Closed {
            return Err(Error::Closed);
        }

        let payload = value.respond().map_err(|error| match error {
            HandlerError::Encode(encode) => Error::Encode(encode),
            other => Error::Encode(EncodeError::Unpublishable(other.to_string())),
        })?;

        let mut reply_to = config.reply_to.clone();
        if config.rpc && reply_to.is_none() {
            reply_to = self.response_queue.clone();
            if reply_to.is_none() {
                return Err(Error::Configuration(
                    "an RPC publish needs a reply target: configure `response_queue` on the \
                    broker or set `reply_to` on the publish"
                        .into(),
                ));
            }
        }

        // Any message that asks for a reply carries a correlation id; only
        // an RPC publish additionally registers a pending response.
        let pending = config.rpc.then(|| self.correlator.allocate());
        let correlation_id = match &pending {
            Some((correlation_id, _)) => Some(correlation_id.clone()),
            None => reply_to.is_some().then(|| Uuid::new_v4().to_string()),
        };

        let (body, content_type) = payload.into_parts();
        let outgoing = Outgoing {
            destination,
            body,
            content_type,
            correlation_id: correlation_id.clone(),
            reply_to,
            headers: config.headers,
        };

        if let Err(error) = self.transport.send(outgoing).await {
            if let Some(correlation_id) = &correlation_id {
                self.correlator.forget(correlation_id);
            }
            return Err(error.into());
        }

        let Some((correlation_id, receiver)) = pending else {
            return Ok(None);
        };

        match config.timeout {
            Some(duration) => match tokio::time::timeout(duration, receiver).await {
                Ok(Ok(reply)) => Ok(Some(reply)),
                Ok(Err(_)) => Err(Error::Closed),
                Err(_) => {
                    self.correlator.forget(&correlation_id);
                    if config.raise_timeout {
                        Err(Error::RpcTimeout)
                    } else {
                        Ok(None)
                    }
                }
            },
            None => receiver.await.map(Some).map_err(|_| Error::Closed),
        }
    }

    /// Registers the implicit consumer that resolves RPC replies arriving on
    /// the response queue. Unknown correlation ids are skipped: acked and
    /// dropped without retry.
    fn install_response_handler(&self, queue: String) {
        debug!("Installing the RPC response consumer on {queue:?}.");

        let correlator = self.correlator.clone();
        let resolve =
            move |CorrelationId(correlation_id): CorrelationId, Decoded(payload): Decoded| {
                let correlator = correlator.clone();
                async move {
                    let Some(correlation_id) = correlation_id else {
                        return Err(HandlerError::Skip);
                    };
                    if correlator.complete(&correlation_id, payload) {
                        Ok(())
                    } else {
                        debug!("Received a reply with unknown correlation id {correlation_id:?}.");
                        Err(HandlerError::Skip)
                    }
                }
            };

        self.register(
            T::Sub::from(queue),
            resolve,
            HandlerConfig::new().with_raw(true),
        );
    }

    /// Number of RPC publishes currently awaiting their reply.
    #[cfg(test)]
    pub(crate) fn pending_rpc(&self) -> usize {
        self.correlator.pending()
    }
}
