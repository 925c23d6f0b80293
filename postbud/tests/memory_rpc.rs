//! End-to-end exercise of the public API against the in-memory transport.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use postbud::extract::{Json, State, Text};
use postbud::{Broker, HandlerConfig, MemoryTransport, Payload, PublishConfig};

use tokio::sync::mpsc;

#[derive(Deserialize)]
struct GreetRequest {
    name: String,
}

#[derive(Serialize)]
struct Greeting {
    message: String,
}

async fn echo(Text(text): Text) -> String {
    text
}

async fn greet(Json(request): Json<GreetRequest>) -> Json<Greeting> {
    Json(Greeting {
        message: format!("hello, {}", request.name),
    })
}

async fn forward(state: State<mpsc::Sender<String>>, Text(text): Text) {
    state.send(text).await.unwrap();
}

#[tokio::test]
async fn a_small_application_works_end_to_end() {
    let (sender, mut receiver) = mpsc::channel::<String>(8);

    let broker = Broker::new(MemoryTransport::new())
        .response_queue("replies")
        .state(sender)
        .handler("echo", echo)
        .handler("greet", greet)
        .handler_with_config("audit", forward, HandlerConfig::new().with_retry(2u32));

    broker.start().await.expect("broker should start");

    // Plain RPC round trip.
    let reply = broker
        .publish_with_config(
            "ping",
            "echo",
            PublishConfig::new().rpc().with_timeout(Duration::from_secs(1)),
        )
        .await
        .expect("echo rpc should succeed");
    assert_eq!(reply, Some(Payload::Text("ping".into())));

    // Structured request and reply.
    let reply = broker
        .publish_with_config(
            json!({"name": "postbud"}),
            "greet",
            PublishConfig::new().rpc().with_timeout(Duration::from_secs(1)),
        )
        .await
        .expect("greet rpc should succeed");
    assert_eq!(reply, Some(Payload::Json(json!({"message": "hello, postbud"}))));

    // Fire-and-forget into a listener.
    broker
        .publish("audit me", "audit")
        .await
        .expect("publish should succeed");
    assert_eq!(receiver.recv().await.as_deref(), Some("audit me"));

    broker.close().await.expect("broker should close");
}
