use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::extract::{Json, Text};

use super::{eventually, init_logging, *};

async fn echo(Text(text): Text) -> String {
    text
}

/// One second is plenty for the in-memory round trip.
fn rpc() -> PublishConfig {
    PublishConfig::new().rpc().with_timeout(Duration::from_secs(1))
}

#[tokio::test]
async fn echo_rpc_returns_the_input() {
    init_logging();
    let broker = Broker::new(MemoryTransport::new())
        .response_queue("r")
        .handler("q", echo);
    broker.start().await.unwrap();

    let reply = broker.publish_with_config("ping", "q", rpc()).await.unwrap();

    assert_eq!(reply, Some(Payload::Text("ping".into())));
    broker.close().await.unwrap();
}

#[tokio::test]
async fn json_handlers_map_payload_fields_by_name() {
    init_logging();

    #[derive(Deserialize)]
    struct AddRequest {
        a: i64,
        b: i64,
    }

    async fn add(Json(request): Json<AddRequest>) -> i64 {
        request.a + request.b
    }

    let broker = Broker::new(MemoryTransport::new())
        .response_queue("r")
        .handler("add", add);
    broker.start().await.unwrap();

    let reply = broker
        .publish_with_config(json!({"a": 2, "b": 3}), "add", rpc())
        .await
        .unwrap();

    assert_eq!(reply, Some(Payload::Json(json!(5))));
    broker.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_rpc_publishes_receive_their_own_replies() {
    init_logging();
    let broker = Broker::new(MemoryTransport::new())
        .response_queue("r")
        .handler("q", echo);
    broker.start().await.unwrap();

    let (one, two, three) = tokio::join!(
        broker.publish_with_config("one", "q", rpc()),
        broker.publish_with_config("two", "q", rpc()),
        broker.publish_with_config("three", "q", rpc()),
    );

    assert_eq!(one.unwrap(), Some(Payload::Text("one".into())));
    assert_eq!(two.unwrap(), Some(Payload::Text("two".into())));
    assert_eq!(three.unwrap(), Some(Payload::Text("three".into())));
    assert_eq!(broker.pending_rpc(), 0);

    broker.close().await.unwrap();
}

#[tokio::test]
async fn handlers_without_a_return_value_still_unblock_rpc_callers() {
    init_logging();

    async fn consume_only(Text(_text): Text) {}

    let broker = Broker::new(MemoryTransport::new())
        .response_queue("r")
        .handler("q", consume_only);
    broker.start().await.unwrap();

    // The reply is empty, but it arrives.
    let reply = broker.publish_with_config("x", "q", rpc()).await.unwrap();
    assert_eq!(reply, Some(Payload::Empty));

    broker.close().await.unwrap();
}

#[tokio::test]
async fn rpc_timeout_returns_none_and_empties_the_correlator() {
    init_logging();
    let broker = Broker::new(MemoryTransport::new()).response_queue("r");
    broker.start().await.unwrap();

    // Nothing consumes "void", so no reply can come.
    let reply = broker
        .publish_with_config(
            "x",
            "void",
            PublishConfig::new()
                .rpc()
                .with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    assert_eq!(reply, None);
    assert_eq!(broker.pending_rpc(), 0);
    broker.close().await.unwrap();
}

#[tokio::test]
async fn rpc_timeout_raises_when_asked_to() {
    init_logging();
    let broker = Broker::new(MemoryTransport::new()).response_queue("r");
    broker.start().await.unwrap();

    let result = broker
        .publish_with_config(
            "x",
            "void",
            PublishConfig::new()
                .rpc()
                .with_timeout(Duration::from_millis(50))
                .with_raise_timeout(true),
        )
        .await;

    assert!(matches!(result, Err(Error::RpcTimeout)));
    assert_eq!(broker.pending_rpc(), 0);
    broker.close().await.unwrap();
}

#[tokio::test]
async fn rpc_without_a_reply_target_is_a_configuration_error() {
    init_logging();
    let broker = Broker::new(MemoryTransport::new()).handler("q", echo);
    broker.start().await.unwrap();

    let result = broker
        .publish_with_config("x", "q", PublishConfig::new().rpc())
        .await;

    assert!(matches!(result, Err(Error::Configuration(_))));
    broker.close().await.unwrap();
}

#[tokio::test]
async fn close_cancels_pending_rpc_waits() {
    init_logging();
    let broker = Broker::new(MemoryTransport::new()).response_queue("r");
    broker.start().await.unwrap();

    let (publish, close) = tokio::join!(
        // No timeout: this would wait forever if close did not cancel it.
        broker.publish_with_config("x", "void", PublishConfig::new().rpc()),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            broker.close().await
        },
    );

    assert!(matches!(publish, Err(Error::Closed)));
    close.unwrap();
    assert_eq!(broker.pending_rpc(), 0);
}

#[tokio::test]
async fn replies_with_unknown_correlation_ids_are_dropped_without_retry() {
    init_logging();
    let broker = Broker::new(MemoryTransport::new()).response_queue("r");
    broker.start().await.unwrap();

    // A stray reply nobody is waiting for.
    broker
        .transport()
        .send(Outgoing {
            destination: "r",
            body: b"stray".to_vec(),
            content_type: None,
            correlation_id: Some("nobody".into()),
            reply_to: None,
            headers: HashMap::new(),
        })
        .await
        .unwrap();

    // The response consumer skips it: acked and gone, no requeue loop.
    eventually(|| broker.transport().queue_depth("r") == 0 && broker.transport().in_flight() == 0)
        .await;
    assert_eq!(broker.pending_rpc(), 0);

    broker.close().await.unwrap();
}
