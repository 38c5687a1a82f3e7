//! Live end-to-end check for a running bridge.
//!
//! Requires a bridge (`server_bridge`) and its Redis broker to be up. The
//! runner connects a realtime client, verifies the greeting, publishes a
//! message through the HTTP gateway on a topic matching the subscription
//! filter, and waits for the broker echo to arrive on the WebSocket.
//!
//! Usage:
//!   cargo run --bin test_bridge_roundtrip -- \
//!     --ws-url ws://127.0.0.1:3000/ws \
//!     --http-url http://127.0.0.1:3001 \
//!     --topic dojo/nodes/pulse/check

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_tungstenite::connect_async;

#[derive(Parser, Debug)]
#[clap(author, version, about = "End-to-end round trip against a live bridge", long_about = None)]
struct Args {
    /// Realtime endpoint of the bridge
    #[clap(long, default_value = "ws://127.0.0.1:3000/ws")]
    ws_url: String,

    /// Gateway base URL of the bridge
    #[clap(long, default_value = "http://127.0.0.1:3001")]
    http_url: String,

    /// Concrete topic to publish on; must match the bridge's subscription filter
    #[clap(long, default_value = "dojo/nodes/pulse/check")]
    topic: String,

    /// Seconds to wait for the published message to come back
    #[clap(long, default_value_t = 10)]
    timeout_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let http = reqwest::Client::new();

    // 1. Liveness
    let health: Value = http
        .get(format!("{}/health", args.http_url))
        .send()
        .await
        .context("health request")?
        .json()
        .await
        .context("health body")?;
    if health["ok"] != json!(true) {
        bail!("unexpected health body: {health}");
    }
    println!("health ok, ts={}", health["ts"]);

    // 2. Realtime handshake
    let (mut ws, _) = connect_async(args.ws_url.as_str())
        .await
        .context("websocket connect")?;
    let greeting = next_json(&mut ws).await.context("greeting frame")?;
    if greeting["type"] != json!("connected") {
        bail!("expected connected greeting, got: {greeting}");
    }
    println!("greeting ok, now={}", greeting["now"]);

    // 3. Publish through the gateway
    let marker = format!("roundtrip-{}", std::process::id());
    let response = http
        .post(format!("{}/publish", args.http_url))
        .json(&json!({ "topic": args.topic, "payload": marker }))
        .send()
        .await
        .context("publish request")?;
    let status = response.status();
    let body: Value = response.json().await.context("publish body")?;
    if !status.is_success() || body["published"] != json!(true) {
        bail!("publish failed: status={status} body={body}");
    }
    println!("publish acknowledged");

    // 4. Wait for the broker echo on the realtime side
    let deadline = Duration::from_secs(args.timeout_seconds);
    let echo = tokio::time::timeout(deadline, async {
        loop {
            match next_json(&mut ws).await {
                Ok(frame) if frame["topic"] == json!(args.topic) && frame["payload"] == json!(marker) => {
                    return Ok::<Value, anyhow::Error>(frame);
                }
                Ok(other) => println!("skipping unrelated frame: {other}"),
                Err(e) => return Err(e),
            }
        }
    })
    .await
    .context("timed out waiting for the broker echo")??;

    if !echo["ts"].is_i64() {
        bail!("echo frame misses the ts field: {echo}");
    }
    println!("round trip complete: {echo}");
    Ok(())
}

async fn next_json(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Result<Value> {
    loop {
        let frame = ws
            .next()
            .await
            .context("websocket closed")?
            .context("websocket error")?;
        if frame.is_text() {
            return Ok(serde_json::from_str(frame.to_text()?)?);
        }
    }
}
