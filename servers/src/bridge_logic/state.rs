use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::bridge_logic::error::PublishError;
use crate::bridge_logic::model::MessagePacket;

const LOCK_MSG: &str = "bridge state lock poisoned";

/// Lifecycle of the single process-wide broker link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Subscribed => "subscribed",
        }
    }

    /// The transport can carry a publish in these states.
    pub fn can_publish(&self) -> bool {
        matches!(self, LinkState::Connected | LinkState::Subscribed)
    }
}

/// A publish command plus the oneshot the gateway caller is waiting on.
pub struct PublishRequest {
    pub topic: String,
    pub payload: String,
    pub responder: oneshot::Sender<Result<(), PublishError>>,
}

/// Shared surface between the broker link, the fan-out server, the gateway
/// and the monitor. Each field is mutated only by its owning component; the
/// others observe.
#[derive(Clone)]
pub struct AppState {
    // Open realtime connections: client_id -> peer address
    clients: Arc<Mutex<HashMap<usize, String>>>,
    // Channel feeding publish commands to the broker link
    publish_tx: Arc<Mutex<Option<mpsc::Sender<PublishRequest>>>>,
    // Broker link lifecycle, owned by the broker task
    link_state: Arc<Mutex<LinkState>>,
    // Instant of the most recent broker delivery
    last_delivery: Arc<Mutex<Option<Instant>>>,
    // Bounded fan-out channel carrying one Arc per broker delivery
    packet_tx: broadcast::Sender<Arc<MessagePacket>>,
}

impl AppState {
    pub fn new(fanout_capacity: usize) -> Self {
        let (packet_tx, _) = broadcast::channel(fanout_capacity.max(1));
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            publish_tx: Arc::new(Mutex::new(None)),
            link_state: Arc::new(Mutex::new(LinkState::Disconnected)),
            last_delivery: Arc::new(Mutex::new(None)),
            packet_tx,
        }
    }

    pub fn register_client(&self, client_id: usize, peer: String) {
        let mut clients = self.clients.lock().expect(LOCK_MSG);
        clients.insert(client_id, peer);
    }

    pub fn deregister_client(&self, client_id: usize) {
        let mut clients = self.clients.lock().expect(LOCK_MSG);
        clients.remove(&client_id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().expect(LOCK_MSG).len()
    }

    pub fn set_publish_tx(&self, tx: mpsc::Sender<PublishRequest>) {
        let mut guard = self.publish_tx.lock().expect(LOCK_MSG);
        *guard = Some(tx);
    }

    /// Queues a fire-and-forget publish on the broker link and waits for the
    /// attempt's acknowledgment. Fails fast when the link cannot carry it;
    /// never retried here.
    pub async fn publish(&self, topic: String, payload: String) -> Result<(), PublishError> {
        if !self.link_state().can_publish() {
            return Err(PublishError::Disconnected);
        }

        let sender = self.publish_tx.lock().expect(LOCK_MSG).clone();
        let Some(sender) = sender else {
            return Err(PublishError::QueueUnavailable);
        };

        let (tx, rx) = oneshot::channel();
        let request = PublishRequest {
            topic,
            payload,
            responder: tx,
        };
        sender
            .send(request)
            .await
            .map_err(|_| PublishError::QueueUnavailable)?;

        // The broker task dropping the responder counts as a failed attempt.
        rx.await.unwrap_or(Err(PublishError::QueueUnavailable))
    }

    pub fn set_link_state(&self, next: LinkState) {
        let mut state = self.link_state.lock().expect(LOCK_MSG);
        if *state != next {
            log::info!("broker link: {} -> {}", state.as_str(), next.as_str());
            *state = next;
        }
    }

    pub fn link_state(&self) -> LinkState {
        *self.link_state.lock().expect(LOCK_MSG)
    }

    /// New fan-out subscription. Call before relying on subsequent
    /// broadcasts; packets sent earlier are not replayed.
    pub fn subscribe_packets(&self) -> broadcast::Receiver<Arc<MessagePacket>> {
        self.packet_tx.subscribe()
    }

    /// Fans one packet out to every current subscriber. Returns how many
    /// subscribers the packet was handed to; zero subscribers is not an
    /// error.
    pub fn broadcast(&self, packet: MessagePacket) -> usize {
        *self.last_delivery.lock().expect(LOCK_MSG) = Some(Instant::now());
        self.packet_tx.send(Arc::new(packet)).unwrap_or(0)
    }

    pub fn seconds_since_last_delivery(&self) -> Option<u64> {
        self.last_delivery
            .lock()
            .expect(LOCK_MSG)
            .map(|at| at.elapsed().as_secs())
    }
}
