use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use conductor_core::{ClientId, EventBus};
use conductor_engine::SessionRegistry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use crate::client::{self, ClientRegistry};
use crate::event_bridge::EventBridge;
use crate::handlers::{self, HandlerState};
use crate::rpc::{RpcRequest, RpcResponse};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const RPC_QUEUE_DEPTH: usize = 1024;

pub struct ServerConfig {
    pub port: u16,
    /// Outbound frames buffered per client before sends are dropped.
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7070,
            max_send_queue: 256,
        }
    }
}

/// State shared across axum handlers for one server instance.
#[derive(Clone)]
pub struct AppState {
    pub handlers: Arc<HandlerState>,
    pub clients: Arc<ClientRegistry>,
    pub message_tx: mpsc::Sender<(ClientId, String)>,
}

/// Build the axum router. CORS is wide open: the host is a browser app
/// served from arbitrary origins.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Bind the port and spin up the server with its background tasks. The
/// returned handle owns those tasks and aborts them when dropped.
pub async fn start(
    config: ServerConfig,
    sessions: Arc<SessionRegistry>,
    bus: Arc<EventBus>,
) -> Result<ServerHandle, std::io::Error> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let port = listener.local_addr()?.port();

    let clients = Arc::new(ClientRegistry::new(config.max_send_queue));
    let handler_state = Arc::new(HandlerState::new(sessions, Arc::clone(&clients)));
    let (message_tx, message_rx) = mpsc::channel(RPC_QUEUE_DEPTH);

    let router = build_router(AppState {
        handlers: Arc::clone(&handler_state),
        clients: Arc::clone(&clients),
        message_tx,
    });

    let tasks = vec![
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        }),
        EventBridge::new(Arc::clone(&clients)).start(bus.subscribe()),
        tokio::spawn(pump_rpc(message_rx, handler_state, Arc::clone(&clients))),
        client::start_cleanup_task(clients, CLEANUP_INTERVAL),
    ];

    tracing::info!(port, "conductor server listening");
    Ok(ServerHandle { port, tasks })
}

/// Handle returned by [`start`].
pub struct ServerHandle {
    pub port: u16,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| accept_socket(socket, state))
}

async fn accept_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.clients.register();
    tracing::info!(client_id = %client_id, "websocket client connected");

    client::handle_ws_connection(socket, client_id, rx, state.clients, state.message_tx).await;
}

/// Liveness probe for the browser host.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.handlers.sessions.session_count(),
        "clients": state.clients.count(),
    }))
}

/// Single consumer of every inbound frame: parse, dispatch, answer through
/// the sender's own outbound queue.
async fn pump_rpc(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    state: Arc<HandlerState>,
    clients: Arc<ClientRegistry>,
) {
    while let Some((client_id, raw)) = rx.recv().await {
        let response = match serde_json::from_str::<RpcRequest>(&raw) {
            Ok(request) => {
                let params = request.params.unwrap_or_else(|| serde_json::json!({}));
                handlers::dispatch(&state, &client_id, &request.method, &params, request.id)
            }
            Err(_) => RpcResponse::parse_error(),
        };
        deliver(&clients, &client_id, response);
    }
}

fn deliver(clients: &ClientRegistry, client_id: &ClientId, response: RpcResponse) {
    match serde_json::to_string(&response) {
        Ok(json) => {
            clients.send_to(client_id, json);
        }
        Err(error) => tracing::error!(%error, "failed to serialize rpc response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_engine::RunnerConfig;
    use conductor_llm::MockProvider;

    fn empty_registry() -> (Arc<SessionRegistry>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let sessions = Arc::new(SessionRegistry::new(
            Arc::new(MockProvider::new(Vec::new())),
            Arc::clone(&bus),
            RunnerConfig::default(),
        ));
        (sessions, bus)
    }

    #[test]
    fn config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 7070);
        assert_eq!(config.max_send_queue, 256);
    }

    #[tokio::test]
    async fn health_reports_server_counts() {
        let (sessions, bus) = empty_registry();
        // Port zero asks the kernel for a free port.
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };

        let handle = start(config, sessions, bus).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"], 0);
        assert_eq!(body["clients"], 0);
    }

    #[tokio::test]
    async fn rpc_pump_answers_through_the_client_queue() {
        let (sessions, _bus) = empty_registry();
        let clients = Arc::new(ClientRegistry::new(32));
        let state = Arc::new(HandlerState::new(sessions, Arc::clone(&clients)));

        let (tx, rx) = mpsc::channel(8);
        let pump = tokio::spawn(pump_rpc(rx, state, Arc::clone(&clients)));
        let (client_id, mut client_rx) = clients.register();

        // Garbage in: parse_error out.
        tx.send((client_id.clone(), "not json".to_string())).await.unwrap();
        let resp: serde_json::Value =
            serde_json::from_str(&client_rx.recv().await.unwrap()).unwrap();
        assert_eq!(resp["error"]["code"], "parse_error");

        // A real request round-trips with its id.
        tx.send((client_id.clone(), r#"{"method":"ping","id":42}"#.to_string()))
            .await
            .unwrap();
        let resp: serde_json::Value =
            serde_json::from_str(&client_rx.recv().await.unwrap()).unwrap();
        assert_eq!(resp["id"], 42);
        assert_eq!(resp["result"]["pong"], true);

        pump.abort();
    }
}
