//! The RPC correlator: matches outbound requests to inbound replies.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::payload::Payload;

/// The pending-response table, keyed by correlation id.
///
/// The publish path inserts, the response consumer removes and fulfills,
/// and `close` drains. All three go through the same lock, which is what
/// makes a timed-out wait atomic with respect to a late completion: either
/// the reply found the sender, or the sender is gone and the reply is a
/// no-op.
#[derive(Debug, Default)]
pub(crate) struct Correlator {
    /// One sender per publish currently awaiting its reply.
    pending: Mutex<HashMap<String, oneshot::Sender<Payload>>>,
}

impl Correlator {
    /// Creates an empty correlator.
    pub(crate) fn new() -> Self {
        Default::default()
    }

    /// Registers a fresh pending response. Returns the generated correlation
    /// id and the receiver the publish path will await.
    pub(crate) fn allocate(&self) -> (String, oneshot::Receiver<Payload>) {
        let correlation_id = Uuid::new_v4().to_string();
        let (sender, receiver) = oneshot::channel();
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .insert(correlation_id.clone(), sender);
        (correlation_id, receiver)
    }

    /// Fulfills the pending response with the given decoded reply.
    ///
    /// Returns false when the id is unknown (a late or foreign reply), in
    /// which case the payload is dropped.
    pub(crate) fn complete(&self, correlation_id: &str, payload: Payload) -> bool {
        let sender = self
            .pending
            .lock()
            .expect("correlator lock poisoned")
            .remove(correlation_id);

        match sender {
            // Send only fails if the awaiting side already gave up; that
            // counts as a late reply too.
            Some(sender) => sender.send(payload).is_ok(),
            None => false,
        }
    }

    /// Removes a pending response whose wait expired.
    pub(crate) fn forget(&self, correlation_id: &str) {
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .remove(correlation_id);
    }

    /// Drops every pending response. Their receivers resolve with a
    /// cancellation error, which the publish path reports as the broker
    /// having closed.
    pub(crate) fn cancel_all(&self) {
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .clear();
    }

    /// Number of currently pending responses.
    pub(crate) fn pending(&self) -> usize {
        self.pending.lock().expect("correlator lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_resolves_the_matching_receiver() {
        let correlator = Correlator::new();
        let (id, receiver) = correlator.allocate();

        assert!(correlator.complete(&id, Payload::Text("pong".into())));
        assert_eq!(receiver.await.unwrap(), Payload::Text("pong".into()));
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn unknown_ids_are_reported() {
        let correlator = Correlator::new();
        assert!(!correlator.complete("nobody", Payload::Empty));
    }

    #[tokio::test]
    async fn forget_makes_a_late_completion_a_no_op() {
        let correlator = Correlator::new();
        let (id, receiver) = correlator.allocate();

        correlator.forget(&id);
        assert!(!correlator.complete(&id, Payload::Empty));
        assert!(receiver.await.is_err());
    }

    #[tokio::test]
    async fn cancel_all_fails_every_receiver() {
        let correlator = Correlator::new();
        let (_, first) = correlator.allocate();
        let (_, second) = correlator.allocate();

        correlator.cancel_all();
        assert!(first.await.is_err());
        assert!(second.await.is_err());
        assert_eq!(correlator.pending(), 0);
    }
}
