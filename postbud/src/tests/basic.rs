use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::extract::{Body, Decoded, Headers, Json, MessageId, State, Text};

use super::{eventually, init_logging, *};

async fn echo(Text(text): Text) -> String {
    text
}

async fn with_body(_body: Body) {}

async fn with_decoded(_payload: Decoded) -> Option<String> {
    None
}

async fn with_two_extractors(_id: MessageId, _headers: Headers) {}

async fn with_json(Json(value): Json<serde_json::Value>) -> serde_json::Value {
    value
}

/// A handler that doesn't respond just doesn't return anything.
async fn listener(state: State<Arc<Mutex<Vec<String>>>>, Text(text): Text) {
    state.lock().unwrap().push(text);
}

#[tokio::test]
async fn it_registers_various_handlers() {
    init_logging();
    let broker = Broker::new(MemoryTransport::new())
        .state(Arc::new(Mutex::new(Vec::<String>::new())))
        .handler("subscription_0", echo)
        .handler("subscription_1", with_body)
        .handler("subscription_2", with_decoded)
        .handler("subscription_3", with_two_extractors)
        .handler("subscription_4", with_json)
        .handler("subscription_5", listener);

    broker.start().await.unwrap();
    broker.close().await.unwrap();
}

#[tokio::test]
async fn lifecycle_is_idempotent() {
    init_logging();
    let broker = Broker::new(MemoryTransport::new()).handler("q", echo);

    broker.connect().await.unwrap();
    broker.connect().await.unwrap();
    broker.start().await.unwrap();
    broker.start().await.unwrap();
    broker.close().await.unwrap();
    broker.close().await.unwrap();

    // A closed broker refuses further work.
    assert!(matches!(broker.publish("x", "q").await, Err(Error::Closed)));
    assert!(matches!(broker.start().await, Err(Error::Closed)));
}

#[tokio::test]
async fn starting_without_handlers_fails() {
    init_logging();
    let broker = Broker::<MemoryTransport>::new(MemoryTransport::new());
    assert!(matches!(broker.start().await, Err(Error::NoHandlers)));
}

#[tokio::test]
async fn listeners_consume_and_ack_without_replying() {
    init_logging();
    let seen: Arc<Mutex<Vec<String>>> = Default::default();
    let broker = Broker::new(MemoryTransport::new())
        .state(seen.clone())
        .handler("q", listener);
    broker.start().await.unwrap();

    broker.publish("first", "q").await.unwrap();
    broker.publish("second", "q").await.unwrap();

    eventually(|| seen.lock().unwrap().len() == 2).await;
    // In-order, acked, nothing left behind.
    assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    eventually(|| broker.transport().queue_depth("q") == 0 && broker.transport().in_flight() == 0)
        .await;

    broker.close().await.unwrap();
}

#[tokio::test]
async fn state_is_shared_between_handlers_of_one_broker() {
    init_logging();
    let (sender, mut receiver) = mpsc::channel::<String>(4);

    async fn forward(state: State<mpsc::Sender<String>>, Text(text): Text) {
        state.send(text).await.unwrap();
    }

    let broker = Broker::new(MemoryTransport::new())
        .state(sender)
        .handler("a", forward)
        .handler("b", forward);
    broker.start().await.unwrap();

    broker.publish("to a", "a").await.unwrap();
    broker.publish("to b", "b").await.unwrap();

    let mut received = vec![receiver.recv().await.unwrap(), receiver.recv().await.unwrap()];
    received.sort();
    assert_eq!(received, vec!["to a", "to b"]);

    broker.close().await.unwrap();
}
