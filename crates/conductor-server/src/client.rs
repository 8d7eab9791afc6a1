//! Connected WebSocket clients and their outbound queues.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use conductor_core::{ClientId, SessionId};
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// One connected client: its subscription and the bounded queue the event
/// bridge writes into.
pub struct Client {
    pub id: ClientId,
    session: RwLock<Option<SessionId>>,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            session: RwLock::new(None),
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(unix_now()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// The session this client receives events for, if it picked one.
    pub fn subscribed_session(&self) -> Option<SessionId> {
        self.session.read().clone()
    }

    pub fn subscribe(&self, session_id: SessionId) {
        *self.session.write() = Some(session_id);
    }

    pub fn record_pong(&self) {
        self.last_pong.store(unix_now(), Ordering::Relaxed);
    }

    /// Liveness is judged by pong recency, not by the socket state; a wedged
    /// connection can look open long after the peer is gone.
    pub fn is_alive(&self) -> bool {
        let silent_for = unix_now().saturating_sub(self.last_pong.load(Ordering::Relaxed));
        silent_for < CLIENT_TIMEOUT.as_secs()
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Mints an id, allocates the send queue, and returns the receiving half
    /// for the connection's writer.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients
            .insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        (id, rx)
    }

    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.mark_disconnected();
        }
    }

    pub fn get(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Point a client at a session. Returns false for an unknown client.
    pub fn subscribe(&self, client_id: &ClientId, session_id: SessionId) -> bool {
        let Some(client) = self.get(client_id) else {
            return false;
        };
        client.subscribe(session_id);
        true
    }

    /// Queue a message for one client. The queue is bounded; on overflow the
    /// message is dropped with a warning rather than blocking the caller.
    pub fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        let Some(client) = self.get(client_id) else {
            return false;
        };
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %client_id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a message for every connected client watching the session.
    pub fn broadcast_to_session(&self, session_id: &SessionId, message: &str) {
        for entry in self.clients.iter() {
            let client = entry.value();
            if !client.is_connected() || client.subscribed_session().as_ref() != Some(session_id) {
                continue;
            }
            if client.tx.try_send(message.to_string()).is_err() {
                tracing::warn!(client_id = %client.id, "dropping event for slow client");
            }
        }
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn clients_for_session(&self, session_id: &SessionId) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|entry| entry.value().subscribed_session().as_ref() == Some(session_id))
            .map(|entry| entry.value().id.clone())
            .collect()
    }

    /// Drops clients whose pongs stopped coming. Returns how many were
    /// removed.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.value().id.clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(client_id = %id, "cleaned up dead client");
        }
        dead.len()
    }
}

/// Drives one connection until either direction ends, then tears the client
/// down. Outbound drains the send queue and pings on an interval; inbound
/// forwards text frames to the RPC loop and records pongs.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, String)>,
) {
    let (ws_tx, ws_rx) = socket.split();

    tokio::select! {
        _ = pump_outbound(ws_tx, rx) => {}
        _ = pump_inbound(ws_rx, &client_id, &registry, on_message) => {}
    }

    if let Some(client) = registry.get(&client_id) {
        client.mark_disconnected();
    }
    registry.unregister(&client_id);
}

async fn pump_outbound(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<String>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // the first tick fires immediately

    loop {
        let frame = tokio::select! {
            queued = rx.recv() => match queued {
                Some(text) => WsMessage::Text(text.into()),
                None => return,
            },
            _ = heartbeat.tick() => WsMessage::Ping(vec![].into()),
        };
        if ws_tx.send(frame).await.is_err() {
            return;
        }
    }
}

async fn pump_inbound(
    mut ws_rx: SplitStream<WebSocket>,
    client_id: &ClientId,
    registry: &ClientRegistry,
    on_message: mpsc::Sender<(ClientId, String)>,
) {
    while let Some(Ok(frame)) = ws_rx.next().await {
        match frame {
            WsMessage::Text(text) => {
                let _ = on_message.send((client_id.clone(), text.to_string())).await;
            }
            WsMessage::Pong(_) => {
                if let Some(client) = registry.get(client_id) {
                    client.record_pong();
                }
            }
            WsMessage::Close(_) => return,
            // axum answers pings itself
            WsMessage::Ping(_) | WsMessage::Binary(_) => {}
        }
    }
}

/// Background reaper for clients whose pongs stopped coming.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed, "dead client cleanup");
            }
        }
    })
}
