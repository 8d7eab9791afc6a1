use std::sync::Arc;

use conductor_core::SessionEvent;
use tokio::sync::broadcast;

use crate::client::ClientRegistry;

/// Consumes the event bus's broadcast mirror and forwards each event to the
/// WebSocket clients subscribed to its session.
///
/// Events are already in wire form; they serialize straight to JSON. A
/// lagged receiver drops the missed events and keeps going, which matches
/// the no-replay contract of the bus: late observers only see what happens
/// next.
pub struct EventBridge {
    clients: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self { clients }
    }

    /// Spawn the forwarding task. It runs until the bus side of the channel
    /// is dropped.
    pub fn start(&self, mut rx: broadcast::Receiver<SessionEvent>) -> tokio::task::JoinHandle<()> {
        let clients = Arc::clone(&self.clients);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(json) => clients.broadcast_to_session(event.session_id(), &json),
                        Err(error) => {
                            tracing::error!(%error, "failed to serialize session event")
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}
