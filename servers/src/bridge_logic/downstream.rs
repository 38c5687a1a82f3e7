//! Realtime fan-out server. Every accepted WebSocket gets a single greeting
//! envelope and then a copy of every broker packet, in delivery order.
//! Clients are admitted unconditionally and send nothing meaningful back.

use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

use crate::bridge_logic::config::Settings;
use crate::bridge_logic::error::ConnectionError;
use crate::bridge_logic::gateway::health_handler;
use crate::bridge_logic::model::Greeting;
use crate::bridge_logic::state::AppState;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

pub async fn run(cfg: Settings, state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.ws_port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind realtime port {}: {}", addr, e);
            return;
        }
    };
    log::info!("realtime server listening on ws://{}/ws", addr);

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.recv().await.ok();
        log::info!("realtime server shutting down");
    });

    if let Err(e) = serve.await {
        log::error!("realtime server error: {}", e);
    }
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state))
}

async fn handle_socket(mut socket: WebSocket, peer: SocketAddr, state: AppState) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);

    // Subscribe before the greeting: everything broadcast after admission is
    // forwarded, nothing before it is replayed.
    let mut packets = state.subscribe_packets();
    state.register_client(client_id, peer.to_string());
    log::info!("client {} connected from {}", client_id, peer);

    if let Ok(json) = serde_json::to_string(&Greeting::connected()) {
        if socket.send(Message::Text(json.into())).await.is_err() {
            state.deregister_client(client_id);
            log::info!("client {} dropped before greeting", client_id);
            return;
        }
    }

    loop {
        tokio::select! {
            // Inbound frames only drive close detection; payloads are ignored.
            inbound = socket.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("client {}: {}", client_id, ConnectionError(e));
                        break;
                    }
                }
            }
            packet = packets.recv() => {
                match packet {
                    Ok(packet) => {
                        match serde_json::to_string(packet.as_ref()) {
                            Ok(json) => {
                                if socket.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => log::error!("failed to serialize packet: {}", e),
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        // Documented drop-oldest policy for slow clients.
                        log::warn!("client {} fell behind, dropped {} messages", client_id, count);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    state.deregister_client(client_id);
    log::info!("client {} disconnected", client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge_logic::model::MessagePacket;
    use serde_json::Value;
    use tokio_tungstenite::connect_async;

    async fn spawn_server(state: AppState) -> SocketAddr {
        let app = router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("serve");
        });
        addr
    }

    type WsClient =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    async fn next_json(ws: &mut WsClient) -> Value {
        let frame = ws.next().await.expect("frame").expect("ws message");
        serde_json::from_str(frame.to_text().expect("text frame")).expect("json frame")
    }

    #[tokio::test]
    async fn greeting_arrives_once_before_any_broadcast() {
        let state = AppState::new(16);
        let addr = spawn_server(state.clone()).await;

        let (mut ws, _) = connect_async(format!("ws://{}/ws", addr))
            .await
            .expect("connect");

        let greeting = next_json(&mut ws).await;
        assert_eq!(greeting["type"], "connected");
        assert!(greeting["now"].is_i64());
        assert_eq!(state.client_count(), 1);

        state.broadcast(MessagePacket::new("sensors/temp", "21.5"));
        let envelope = next_json(&mut ws).await;
        assert_eq!(envelope["topic"], "sensors/temp");
        assert_eq!(envelope["payload"], "21.5");
        assert!(envelope["ts"].is_i64());
    }

    #[tokio::test]
    async fn both_clients_receive_every_packet_in_order() {
        let state = AppState::new(16);
        let addr = spawn_server(state.clone()).await;

        let (mut first, _) = connect_async(format!("ws://{}/ws", addr))
            .await
            .expect("first client");
        let (mut second, _) = connect_async(format!("ws://{}/ws", addr))
            .await
            .expect("second client");
        assert_eq!(next_json(&mut first).await["type"], "connected");
        assert_eq!(next_json(&mut second).await["type"], "connected");

        for n in 0..3 {
            state.broadcast(MessagePacket::new("sensors/temp", n.to_string()));
        }

        for n in 0..3 {
            assert_eq!(next_json(&mut first).await["payload"], n.to_string());
            assert_eq!(next_json(&mut second).await["payload"], n.to_string());
        }
    }

    #[tokio::test]
    async fn closing_client_leaves_the_open_set() {
        let state = AppState::new(16);
        let addr = spawn_server(state.clone()).await;

        let (mut ws, _) = connect_async(format!("ws://{}/ws", addr))
            .await
            .expect("connect");
        assert_eq!(next_json(&mut ws).await["type"], "connected");
        assert_eq!(state.client_count(), 1);

        drop(ws);
        // Close propagation is asynchronous; poll briefly.
        for _ in 0..50 {
            if state.client_count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(state.client_count(), 0);

        // Broadcasting after the disconnect must not fail.
        state.broadcast(MessagePacket::new("sensors/temp", "21.5"));
    }

    #[tokio::test]
    async fn health_route_is_alive_regardless_of_link_state() {
        let state = AppState::new(4);
        let addr = spawn_server(state).await;

        let v: Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .expect("health request")
            .json()
            .await
            .expect("health json");
        assert_eq!(v["ok"], true);
        assert!(v["ts"].is_i64());
    }
}
