//! The broker link: one Redis Pub/Sub session for the subscription side and
//! one auto-reconnecting connection for publishes. The subscribe loop never
//! returns an error to its caller; transport loss is logged and retried with
//! exponential backoff.

use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;

use crate::bridge_logic::config::Settings;
use crate::bridge_logic::error::{PublishError, SubscribeError, TransportError};
use crate::bridge_logic::model::MessagePacket;
use crate::bridge_logic::state::{AppState, LinkState, PublishRequest};

pub async fn run(cfg: Settings, state: AppState, shutdown: broadcast::Receiver<()>) {
    let (publish_tx, publish_rx) = mpsc::channel(cfg.publish_queue_capacity.max(1));
    state.set_publish_tx(publish_tx);

    let publisher = tokio::spawn(run_publisher(
        cfg.clone(),
        state.clone(),
        publish_rx,
        shutdown.resubscribe(),
    ));

    run_subscriber(cfg, state, shutdown).await;

    let _ = publisher.await;
}

/// Reconnect loop for the subscription session. Each cycle walks
/// connecting -> connected -> subscribed, then drains the delivery stream
/// until the transport drops or shutdown is requested.
async fn run_subscriber(cfg: Settings, state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let mut backoff = Backoff::new(cfg.reconnect_base_delay_ms, cfg.reconnect_max_delay_ms);

    loop {
        if shutdown.try_recv().is_ok() {
            break;
        }

        state.set_link_state(LinkState::Connecting);
        log::info!("connecting to broker at {}", cfg.broker_url);

        match open_pubsub(&cfg.broker_url).await {
            Ok(mut pubsub) => {
                backoff.reset();
                state.set_link_state(LinkState::Connected);

                match pubsub.psubscribe(&cfg.topic_filter).await {
                    Ok(()) => {
                        state.set_link_state(LinkState::Subscribed);
                        log::info!("subscribed to {}", cfg.topic_filter);
                    }
                    Err(e) => {
                        // Non-fatal: the link stays connected, the monitor
                        // surfaces the degraded state, and the next cycle
                        // re-issues the subscription.
                        log::error!(
                            "{}",
                            SubscribeError {
                                filter: cfg.topic_filter.clone(),
                                source: e,
                            }
                        );
                    }
                }

                let mut closing = false;
                {
                    let mut deliveries = pubsub.on_message();
                    loop {
                        tokio::select! {
                            _ = shutdown.recv() => {
                                closing = true;
                                break;
                            }
                            delivery = deliveries.next() => {
                                match delivery {
                                    Some(msg) => handle_delivery(&state, msg),
                                    None => {
                                        log::error!("{}", TransportError::Dropped);
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }

                state.set_link_state(LinkState::Disconnected);

                if closing {
                    // Tell the broker we are leaving before the socket drops.
                    if let Err(e) = pubsub.punsubscribe(&cfg.topic_filter).await {
                        log::warn!("unsubscribe on shutdown failed: {}", e);
                    }
                    log::info!("broker link closed");
                    return;
                }
            }
            Err(e) => {
                state.set_link_state(LinkState::Disconnected);
                log::error!("{}", TransportError::Connect(e));
            }
        }

        let delay = backoff.next_delay();
        log::info!("reconnecting to broker in {} ms", delay.as_millis());
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = sleep(delay) => {}
        }
    }
}

async fn open_pubsub(url: &str) -> Result<redis::aio::PubSub, redis::RedisError> {
    let client = redis::Client::open(url)?;
    client.get_async_pubsub().await
}

/// One packet per delivery: topic verbatim, payload decoded to text,
/// timestamp set at receipt. Delivery order is preserved per topic because
/// this is the only consumer of the stream.
fn handle_delivery(state: &AppState, msg: redis::Msg) {
    let topic = msg.get_channel_name().to_string();
    let payload = String::from_utf8_lossy(msg.get_payload_bytes()).into_owned();
    let packet = MessagePacket::new(topic, payload);
    let delivered = state.broadcast(packet);
    log::trace!("fanned out broker delivery to {} clients", delivered);
}

/// Drains the publish queue. The outbound connection is established lazily
/// and kept in a `ConnectionManager`, which reconnects on its own; each
/// request is answered exactly once through its oneshot.
async fn run_publisher(
    cfg: Settings,
    state: AppState,
    mut requests: mpsc::Receiver<PublishRequest>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let client = redis::Client::open(cfg.broker_url.as_str()).ok();
    if client.is_none() {
        log::error!("invalid broker URL {:?}, publishes will fail", cfg.broker_url);
    }
    let mut conn: Option<ConnectionManager> = None;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            request = requests.recv() => {
                let Some(request) = request else { break };
                let result = execute_publish(client.as_ref(), &mut conn, &state, &request).await;
                if let Err(e) = &result {
                    log::warn!("publish to {:?} failed: {}", request.topic, e);
                }
                let _ = request.responder.send(result);
            }
        }
    }
}

async fn execute_publish(
    client: Option<&redis::Client>,
    conn: &mut Option<ConnectionManager>,
    state: &AppState,
    request: &PublishRequest,
) -> Result<(), PublishError> {
    if !state.link_state().can_publish() {
        return Err(PublishError::Disconnected);
    }
    let Some(client) = client else {
        return Err(PublishError::Disconnected);
    };

    if conn.is_none() {
        let manager = client
            .get_connection_manager()
            .await
            .map_err(PublishError::Broker)?;
        *conn = Some(manager);
    }
    let Some(manager) = conn.as_mut() else {
        return Err(PublishError::Disconnected);
    };

    let _: () = manager
        .publish(&request.topic, &request.payload)
        .await
        .map_err(PublishError::Broker)?;
    Ok(())
}

/// Exponential backoff for reconnect attempts, clamped to a maximum and
/// reset after every successful connect.
struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_delay(&mut self) -> Duration {
        let factor = 1u64 << self.attempt.min(16);
        let delay = self.base_ms.saturating_mul(factor).min(self.max_ms);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay)
    }
}
