//! Super minimal example that sets up a broker with a couple of handlers and
//! makes an RPC round trip over the in-memory transport.

use std::time::Duration;

use serde::Deserialize;

use postbud::extract::{Json, Text};
use postbud::{Broker, MemoryTransport, PublishConfig};

#[derive(Deserialize)]
struct AddRequest {
    a: i64,
    b: i64,
}

async fn echo(Text(text): Text) -> String {
    text
}

async fn add(Json(request): Json<AddRequest>) -> i64 {
    request.a + request.b
}

#[tokio::main]
async fn main() -> postbud::Result<()> {
    tracing_subscriber::fmt::init();

    let broker = Broker::new(MemoryTransport::new())
        .response_queue("replies")
        .handler("echo", echo)
        .handler("add", add);

    broker.start().await?;

    let rpc = PublishConfig::new().rpc().with_timeout(Duration::from_secs(1));

    let echoed = broker
        .publish_with_config("hello over the broker", "echo", rpc.clone())
        .await?;
    tracing::info!("echo replied: {echoed:?}");

    let sum = broker
        .publish_with_config(serde_json::json!({"a": 2, "b": 3}), "add", rpc)
        .await?;
    tracing::info!("add replied: {sum:?}");

    broker.close().await
}
