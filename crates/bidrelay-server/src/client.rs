use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use bidrelay_core::protocol;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Unique subscriber identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("sub_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected WebSocket subscriber.
pub struct Client {
    pub id: ClientId,
    /// Identity declared by the subscriber, if any. Recorded for a future
    /// per-recipient addressing extension; delivery never routes on it.
    pub user_id: Option<String>,
    pub tx: mpsc::Sender<String>,
    pub connected: AtomicBool,
    pub last_pong: AtomicU64,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        let now = now_secs();
        Self {
            id,
            user_id: None,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn set_identity(&mut self, user_id: String) {
        self.user_id = Some(user_id);
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected subscribers.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Mutex<Client>>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new subscriber and return its ID + outbound receiver.
    ///
    /// The connect acknowledgment is enqueued before the client becomes
    /// visible to broadcasts, so it is always the first message a
    /// subscriber receives.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let _ = tx.try_send(protocol::connect_ack());
        let client = Arc::new(Mutex::new(Client::new(id.clone(), tx)));
        self.clients.insert(id.clone(), client);
        (id, rx)
    }

    /// Remove a subscriber by ID. Idempotent; unknown IDs are a no-op.
    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            if let Ok(c) = client.try_lock() {
                c.connected.store(false, Ordering::Relaxed);
            }
        }
    }

    /// Record a declared identity for a subscriber.
    pub async fn set_identity(&self, client_id: &ClientId, user_id: String) {
        if let Some(client) = self.clients.get(client_id) {
            client.lock().await.set_identity(user_id);
        }
    }

    /// Fan a pre-serialized message out to every open subscriber.
    ///
    /// Disconnected clients are skipped silently; a full or closed queue
    /// affects only that client. Returns the number of queued deliveries.
    pub fn broadcast_all(&self, message: &str) -> usize {
        let mut delivered = 0;
        for entry in self.clients.iter() {
            if let Ok(client) = entry.value().try_lock() {
                if !client.is_connected() {
                    continue;
                }
                match client.tx.try_send(message.to_string()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(msg)) => {
                        tracing::warn!(
                            client_id = %client.id,
                            msg_len = msg.len(),
                            "Send queue full, dropping message"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        }
        delivered
    }

    /// Number of registered subscribers.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Remove subscribers that haven't responded to pings within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let mut removed = 0;
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter_map(|entry| {
                if let Ok(client) = entry.value().try_lock() {
                    if !client.is_alive() {
                        return Some(client.id.clone());
                    }
                }
                None
            })
            .collect();

        for id in dead {
            self.unregister(&id);
            removed += 1;
            tracing::info!(client_id = %id, "Cleaned up dead subscriber");
        }
        removed
    }
}

/// Handle a WebSocket connection: split into reader/writer, manage lifecycle
/// with heartbeat. Subscribers are write-only targets; inbound text frames
/// are discarded.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward messages from channel to WebSocket + periodic ping
    let writer_cid = client_id.clone();
    let writer_registry = Arc::clone(&registry);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "Sent ping");
                }
            }
        }

        // Mark as disconnected
        if let Some(client) = writer_registry.clients.get(&writer_cid) {
            if let Ok(c) = client.try_lock() {
                c.connected.store(false, Ordering::Relaxed);
            }
        }
    });

    // Reader task: track pongs, exit on close
    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.clients.get(&reader_cid) {
                        if let Ok(c) = client.try_lock() {
                            c.record_pong();
                        }
                    }
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum replies with pong automatically
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&client_id);
}

/// Start a background task that periodically sweeps dead subscribers.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed = removed, "Dead subscriber cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_unique() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(a, b);
        assert!(a.0.starts_with("sub_"));
    }

    #[test]
    fn registry_register_and_unregister() {
        let registry = ClientRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_eq!(registry.count(), 2);

        registry.unregister(&id1);
        assert_eq!(registry.count(), 1);

        // Unregistering again is a no-op
        registry.unregister(&id1);
        assert_eq!(registry.count(), 1);

        registry.unregister(&id2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn register_enqueues_connect_ack_first() {
        let registry = ClientRegistry::new(32);
        let (_id, mut rx) = registry.register();

        registry.broadcast_all(r#"{"bid":100}"#);

        assert_eq!(rx.try_recv().unwrap(), protocol::connect_ack());
        assert_eq!(rx.try_recv().unwrap(), r#"{"bid":100}"#);
    }

    #[test]
    fn broadcast_all_reaches_every_subscriber() {
        let registry = ClientRegistry::new(32);
        let (_id1, mut rx1) = registry.register();
        let (_id2, mut rx2) = registry.register();

        let delivered = registry.broadcast_all("update");
        assert_eq!(delivered, 2);

        let _ = rx1.try_recv(); // ack
        let _ = rx2.try_recv(); // ack
        assert_eq!(rx1.try_recv().unwrap(), "update");
        assert_eq!(rx2.try_recv().unwrap(), "update");
    }

    #[test]
    fn broadcast_all_skips_disconnected() {
        let registry = ClientRegistry::new(32);
        let (id1, _rx1) = registry.register();
        let (_id2, mut rx2) = registry.register();

        {
            let entry = registry.clients.get(&id1).unwrap();
            entry
                .try_lock()
                .unwrap()
                .connected
                .store(false, Ordering::Relaxed);
        }

        let delivered = registry.broadcast_all("update");
        assert_eq!(delivered, 1);

        let _ = rx2.try_recv(); // ack
        assert_eq!(rx2.try_recv().unwrap(), "update");
    }

    #[test]
    fn broadcast_all_full_queue_drops_for_that_client_only() {
        let registry = ClientRegistry::new(2); // tiny queue, ack takes one slot
        let (_id1, _rx1) = registry.register();
        let (_id2, mut rx2) = registry.register();

        // Fills the remaining slot of both queues
        assert_eq!(registry.broadcast_all("first"), 2);
        // rx1 is untouched and now full; rx2 drains
        let _ = rx2.try_recv();
        let _ = rx2.try_recv();

        let delivered = registry.broadcast_all("second");
        assert_eq!(delivered, 1);
        assert_eq!(rx2.try_recv().unwrap(), "second");
    }

    #[tokio::test]
    async fn registry_set_identity() {
        let registry = ClientRegistry::new(32);
        let (id, _rx) = registry.register();

        registry.set_identity(&id, "user-42".into()).await;

        let entry = registry.clients.get(&id).unwrap();
        let client = entry.lock().await;
        assert_eq!(client.user_id.as_deref(), Some("user-42"));
    }

    #[test]
    fn client_pong_tracking() {
        let (tx, _rx) = mpsc::channel(1);
        let client = Client::new(ClientId::new(), tx);
        assert!(client.is_alive());

        client.record_pong();
        assert!(client.is_alive());
    }

    #[test]
    fn cleanup_dead_clients_removes_expired() {
        let registry = ClientRegistry::new(32);
        let (id, _rx) = registry.register();
        assert_eq!(registry.count(), 1);

        // Manually set last_pong to far in the past
        if let Some(client) = registry.clients.get(&id) {
            if let Ok(c) = client.try_lock() {
                c.last_pong.store(0, Ordering::Relaxed);
            }
        }

        let removed = registry.cleanup_dead_clients();
        assert_eq!(removed, 1);
        assert_eq!(registry.count(), 0);
    }
}
