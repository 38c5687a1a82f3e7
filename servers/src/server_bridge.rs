//! # Atlas Bridge
//!
//! Bidirectional bridge between a Redis Pub/Sub broker and browser clients.
//! One binary runs four cooperating tasks:
//!
//! - **broker**: subscribes to the configured topic filter and turns every
//!   delivery into a normalized packet; also drains the publish queue fed by
//!   the HTTP gateway.
//! - **downstream**: WebSocket server fanning every packet out to all
//!   connected clients.
//! - **gateway**: HTTP server accepting publish requests and health probes.
//! - **monitor**: periodic watchdog logging link state and dataflow age.
//!
//! Configuration comes from defaults, an optional JSON config file, and
//! `ATLAS_*` environment variables or CLI flags (see `bridge_logic::config`).

use anyhow::Result;
use tokio::signal;

mod bridge_logic;
use bridge_logic::{broker, config, downstream, gateway, logger, monitor, state};

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up a local .env before the config layer reads the environment.
    dotenvy::dotenv().ok();

    let settings = config::load_config();
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    log::info!(
        "config: broker={} filter={} ws={} http={}",
        settings.broker_url,
        settings.topic_filter,
        settings.ws_port,
        settings.http_port
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let app_state = state::AppState::new(settings.fanout_capacity);

    let broker_handle = tokio::spawn(broker::run(
        settings.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    let downstream_handle = tokio::spawn(downstream::run(
        settings.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    let gateway_handle = tokio::spawn(gateway::run(
        settings.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    let monitor_handle = tokio::spawn(monitor::run(
        settings.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // The broker task detaches from the broker (PUNSUBSCRIBE) before it
    // returns, so waiting here guarantees the clean close happened before
    // the process exits.
    let _ = tokio::try_join!(
        broker_handle,
        downstream_handle,
        gateway_handle,
        monitor_handle
    );

    log::info!("Shutdown complete.");
    Ok(())
}
