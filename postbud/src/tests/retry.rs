use std::result::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::extract::{State, Text};

use super::{eventually, init_logging, *};

/// Shared attempt counter, handed to handlers as broker state.
type Attempts = Arc<Mutex<u32>>;

fn attempts_of(attempts: &Attempts) -> u32 {
    *attempts.lock().unwrap()
}

/// A handler that fails its first two attempts and succeeds on the third.
async fn flaky(state: State<Attempts>, Text(_text): Text) -> Result<String, HandlerError> {
    let mut attempts = state.lock().unwrap();
    *attempts += 1;
    if *attempts < 3 {
        Err(HandlerError::failed("not yet"))
    } else {
        Ok("done".into())
    }
}

async fn always_fails(state: State<Attempts>, Text(_text): Text) -> Result<(), HandlerError> {
    *state.lock().unwrap() += 1;
    Err(HandlerError::failed("broken"))
}

async fn skips(state: State<Attempts>, Text(_text): Text) -> Result<(), HandlerError> {
    *state.lock().unwrap() += 1;
    Err(HandlerError::Skip)
}

/// Short intervals so requeue cycles settle quickly.
fn with_retry(retry: impl Into<RetryPolicy>) -> HandlerConfig {
    HandlerConfig::new()
        .with_retry(retry)
        .with_wait_interval(Duration::from_millis(50))
}

#[tokio::test]
async fn failing_handler_is_retried_until_it_succeeds() {
    init_logging();
    let attempts: Attempts = Default::default();
    let broker = Broker::new(MemoryTransport::new())
        .state(attempts.clone())
        .handler_with_config("q", flaky, with_retry(3u32));
    broker.start().await.unwrap();

    broker.publish("x", "q").await.unwrap();

    eventually(|| attempts_of(&attempts) == 3).await;
    eventually(|| broker.transport().queue_depth("q") == 0 && broker.transport().in_flight() == 0)
        .await;

    // Success on attempt three: acked, no further deliveries.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(attempts_of(&attempts), 3);

    broker.close().await.unwrap();
}

#[tokio::test]
async fn poison_message_is_dropped_after_exhausting_retries() {
    init_logging();
    let attempts: Attempts = Default::default();
    let broker = Broker::new(MemoryTransport::new())
        .state(attempts.clone())
        .handler_with_config("q", always_fails, with_retry(2u32));
    broker.start().await.unwrap();

    broker.publish("x", "q").await.unwrap();

    // Initial delivery plus two retries.
    eventually(|| attempts_of(&attempts) == 3).await;
    eventually(|| broker.transport().queue_depth("q") == 0 && broker.transport().in_flight() == 0)
        .await;

    // Dropped, not redelivered.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(attempts_of(&attempts), 3);

    broker.close().await.unwrap();
}

#[tokio::test]
async fn retries_disabled_drops_on_the_first_failure() {
    init_logging();
    let attempts: Attempts = Default::default();
    let broker = Broker::new(MemoryTransport::new())
        .state(attempts.clone())
        .handler_with_config("q", always_fails, with_retry(false));
    broker.start().await.unwrap();

    broker.publish("x", "q").await.unwrap();

    eventually(|| attempts_of(&attempts) == 1).await;
    eventually(|| broker.transport().queue_depth("q") == 0 && broker.transport().in_flight() == 0)
        .await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(attempts_of(&attempts), 1);

    broker.close().await.unwrap();
}

#[tokio::test]
async fn skip_acks_without_counting_a_failure() {
    init_logging();
    let attempts: Attempts = Default::default();
    let broker = Broker::new(MemoryTransport::new())
        .state(attempts.clone())
        .handler_with_config("q", skips, with_retry(5u32));
    broker.start().await.unwrap();

    broker.publish("x", "q").await.unwrap();

    eventually(|| attempts_of(&attempts) == 1).await;
    eventually(|| broker.transport().queue_depth("q") == 0 && broker.transport().in_flight() == 0)
        .await;

    // Skipped means acked and dropped: exactly one delivery.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(attempts_of(&attempts), 1);

    broker.close().await.unwrap();
}

#[tokio::test]
async fn invalid_payloads_take_the_failure_path() {
    init_logging();
    let attempts: Attempts = Default::default();

    // Counts every delivery, then demands a number the payload is not.
    async fn wants_a_number(
        state: State<Attempts>,
        Text(text): Text,
    ) -> Result<String, HandlerError> {
        *state.lock().unwrap() += 1;
        let number: i64 = text
            .parse()
            .map_err(|_| HandlerError::failed(format!("not a number: {text:?}")))?;
        Ok(format!("got {number}"))
    }

    let broker = Broker::new(MemoryTransport::new())
        .state(attempts.clone())
        .handler_with_config("q", wants_a_number, with_retry(1u32));
    broker.start().await.unwrap();

    broker.publish("definitely not a number", "q").await.unwrap();

    // The bad payload fails the handler on both deliveries, then is dropped.
    eventually(|| attempts_of(&attempts) == 2).await;
    eventually(|| broker.transport().queue_depth("q") == 0 && broker.transport().in_flight() == 0)
        .await;

    broker.close().await.unwrap();
}
