//! Live validation of the publish gateway's request handling.
//!
//! Only needs a running bridge; the broker may be up or down. Malformed
//! bodies must come back as client errors either way, and `/health` must
//! answer regardless of the broker link state.
//!
//! Usage:
//!   cargo run --bin test_publish_api -- --http-url http://127.0.0.1:3001

use anyhow::{Context, Result, bail};
use clap::Parser;
use reqwest::StatusCode;
use serde_json::{Value, json};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Exercises the publish gateway of a live bridge", long_about = None)]
struct Args {
    /// Gateway base URL of the bridge
    #[clap(long, default_value = "http://127.0.0.1:3001")]
    http_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let http = reqwest::Client::new();

    // Health must answer no matter what.
    let health: Value = http
        .get(format!("{}/health", args.http_url))
        .send()
        .await
        .context("health request")?
        .json()
        .await
        .context("health body")?;
    if health["ok"] != json!(true) || !health["ts"].is_i64() {
        bail!("unexpected health body: {health}");
    }
    println!("health ok");

    // Missing topic and missing payload are client errors.
    for (label, body) in [
        ("missing topic", json!({ "payload": "x" })),
        ("missing payload", json!({ "topic": "cmd/light" })),
        ("empty topic", json!({ "topic": "", "payload": "x" })),
    ] {
        let response = http
            .post(format!("{}/publish", args.http_url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("publish request ({label})"))?;
        if response.status() != StatusCode::BAD_REQUEST {
            bail!("{label}: expected 400, got {}", response.status());
        }
        let error: Value = response.json().await.context("error body")?;
        if !error["error"].is_string() {
            bail!("{label}: error body misses the description: {error}");
        }
        println!("{label}: rejected as expected");
    }

    // A well-formed publish reflects the broker attempt's outcome.
    let response = http
        .post(format!("{}/publish", args.http_url))
        .json(&json!({ "topic": "dojo/nodes/pulse/check", "payload": { "probe": true } }))
        .send()
        .await
        .context("valid publish request")?;
    let status = response.status();
    let body: Value = response.json().await.context("publish body")?;
    match status {
        StatusCode::OK if body["published"] == json!(true) => {
            println!("publish acknowledged (broker reachable)");
        }
        StatusCode::INTERNAL_SERVER_ERROR if body["error"].is_string() => {
            println!("publish refused with a description (broker down): {}", body["error"]);
        }
        _ => bail!("unexpected publish outcome: status={status} body={body}"),
    }

    println!("gateway behaves");
    Ok(())
}
