//! An in-memory transport driver.
//!
//! Backs the test suite and the example binary, and doubles as the reference
//! implementation of the [`Transport`] contract: per-destination queues,
//! long-poll fetches, an in-flight table for ack/nack, and
//! requeue-to-the-front redelivery that preserves message ids so retry
//! accounting works.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use crate::handler_config::ConsumerConfig;
use crate::message::{ContentType, Message};
use crate::transport::{Outgoing, Transport, TransportError};

/// The in-memory frame handle: a delivery tag into the in-flight table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryFrame {
    /// The delivery tag assigned at fetch time.
    tag: u64,
}

/// A message at rest in a queue or in flight to a consumer.
#[derive(Debug, Clone)]
struct StoredMessage {
    /// The encoded body.
    body: Vec<u8>,
    /// Media label of the body, if any.
    content_type: Option<ContentType>,
    /// Unique id, assigned once at send time and stable across requeues.
    message_id: String,
    /// Correlation id, if any.
    correlation_id: Option<String>,
    /// Reply destination, if any.
    reply_to: Option<String>,
    /// Application headers.
    headers: HashMap<String, String>,
}

impl StoredMessage {
    /// Builds the canonical message for delivery under the given frame.
    fn into_message(self, frame: MemoryFrame) -> Message<MemoryFrame> {
        let mut message = Message::new(self.body, frame)
            .with_message_id(self.message_id)
            .with_headers(self.headers);
        if let Some(content_type) = self.content_type {
            message = message.with_content_type(content_type);
        }
        if let Some(correlation_id) = self.correlation_id {
            message = message.with_correlation_id(correlation_id);
        }
        if let Some(reply_to) = self.reply_to {
            message = message.with_reply_to(reply_to);
        }
        message
    }
}

/// A fetched-but-unacked message, remembered so it can be requeued.
#[derive(Debug)]
struct InFlight {
    /// The queue the message came from.
    queue: String,
    /// The message itself.
    stored: StoredMessage,
}

/// An in-memory message broker implementing [`Transport`].
#[derive(Debug, Default)]
pub struct MemoryTransport {
    /// Messages at rest, per destination.
    queues: Mutex<HashMap<String, VecDeque<StoredMessage>>>,
    /// Fetched-but-unacked messages, by delivery tag.
    in_flight: Mutex<HashMap<u64, InFlight>>,
    /// Source of delivery tags.
    sequence: AtomicU64,
    /// Wakes long-polling fetchers when a message arrives.
    notify: Notify,
    /// Remaining induced fetch failures, for reconnection tests.
    failures: AtomicU32,
    /// True after `close`.
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Creates an empty in-memory broker.
    pub fn new() -> Self {
        Default::default()
    }

    /// Makes the next `failures` fetches fail with a transport error, to
    /// exercise the consume loop's reconnection path.
    pub fn inject_failures(&self, failures: u32) {
        self.failures.store(failures, Ordering::SeqCst);
    }

    /// Number of messages at rest on the given queue.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .expect("memory transport lock poisoned")
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Number of fetched-but-unacked messages across all queues.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .expect("memory transport lock poisoned")
            .len()
    }

    /// Fails when the transport was closed.
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::new("the in-memory transport is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Sub = String;
    type Frame = MemoryFrame;

    async fn connect(&self) -> Result<(), TransportError> {
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn declare(&self, subscription: &String) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.queues
            .lock()
            .expect("memory transport lock poisoned")
            .entry(subscription.clone())
            .or_default();
        Ok(())
    }

    async fn fetch(
        &self,
        subscription: &String,
        config: &ConsumerConfig,
    ) -> Result<Vec<Message<MemoryFrame>>, TransportError> {
        self.ensure_open()?;
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::new("injected transport failure"));
        }

        let deadline = Instant::now() + config.wait_interval;
        loop {
            {
                let mut queues = self.queues.lock().expect("memory transport lock poisoned");
                if let Some(queue) = queues.get_mut(subscription) {
                    if !queue.is_empty() {
                        let take = queue.len().min(config.batch_limit);
                        let mut in_flight =
                            self.in_flight.lock().expect("memory transport lock poisoned");
                        let mut batch = Vec::with_capacity(take);
                        for _ in 0..take {
                            let stored = queue.pop_front().expect("queue cannot be empty here");
                            let tag = self.sequence.fetch_add(1, Ordering::SeqCst);
                            in_flight.insert(
                                tag,
                                InFlight {
                                    queue: subscription.clone(),
                                    stored: stored.clone(),
                                },
                            );
                            batch.push(stored.into_message(MemoryFrame { tag }));
                        }
                        return Ok(batch);
                    }
                }
            }

            // Long-poll: wait for a send or the interval, whichever first.
            if timeout_at(deadline, self.notify.notified()).await.is_err() {
                return Ok(Vec::new());
            }
            self.ensure_open()?;
        }
    }

    async fn send(&self, outgoing: Outgoing<'_>) -> Result<(), TransportError> {
        self.ensure_open()?;
        let stored = StoredMessage {
            body: outgoing.body,
            content_type: outgoing.content_type,
            message_id: Uuid::new_v4().to_string(),
            correlation_id: outgoing.correlation_id,
            reply_to: outgoing.reply_to,
            headers: outgoing.headers,
        };
        self.queues
            .lock()
            .expect("memory transport lock poisoned")
            .entry(outgoing.destination.to_string())
            .or_default()
            .push_back(stored);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn ack(&self, frame: &MemoryFrame) -> Result<(), TransportError> {
        self.in_flight
            .lock()
            .expect("memory transport lock poisoned")
            .remove(&frame.tag);
        Ok(())
    }

    async fn nack(&self, frame: &MemoryFrame, requeue: bool) -> Result<(), TransportError> {
        let in_flight = self
            .in_flight
            .lock()
            .expect("memory transport lock poisoned")
            .remove(&frame.tag);

        if let Some(in_flight) = in_flight {
            if requeue {
                self.queues
                    .lock()
                    .expect("memory transport lock poisoned")
                    .entry(in_flight.queue)
                    .or_default()
                    .push_front(in_flight.stored);
                self.notify.notify_waiters();
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        // Wake long-polling fetchers so they observe the closed state.
        self.notify.notify_waiters();
        Ok(())
    }
}
