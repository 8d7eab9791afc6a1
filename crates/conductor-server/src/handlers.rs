//! RPC method handlers. Each method maps onto one session registry
//! operation; the wire stays thin and snake_case throughout.

use std::path::PathBuf;
use std::sync::Arc;

use conductor_core::{ClientId, Message, ProjectId, RegistryError, SessionConfig, SessionId};
use conductor_engine::{SessionHandle, SessionRegistry};

use crate::client::ClientRegistry;
use crate::rpc::{self, RpcResponse};

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub sessions: Arc<SessionRegistry>,
    pub clients: Arc<ClientRegistry>,
}

impl HandlerState {
    pub fn new(sessions: Arc<SessionRegistry>, clients: Arc<ClientRegistry>) -> Self {
        Self { sessions, clients }
    }
}

/// Dispatch an RPC method to the appropriate handler.
///
/// Registry calls complete synchronously; generation work they kick off runs
/// on the runtime behind the session's own lock, so dispatch never blocks a
/// client on another client's turn.
pub fn dispatch(
    state: &Arc<HandlerState>,
    client_id: &ClientId,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match method {
        "session.create" => session_create(state, params, id),
        "session.get" => session_get(state, params, id),
        "session.list" => session_list(state, params, id),
        "session.latest" => session_latest(state, params, id),
        "session.send" => session_send(state, params, id),
        "session.start" => session_start(state, params, id),
        "session.stop" => session_stop(state, params, id),
        "session.add_message" => session_add_message(state, params, id),
        "session.reset" => session_reset(state, params, id),
        "project.delete_sessions" => project_delete_sessions(state, params, id),
        "session.subscribe" => session_subscribe(state, client_id, params, id),
        "ping" => ping(id),
        _ => RpcResponse::method_not_found(id, method),
    }
}

fn registry_error(id: Option<serde_json::Value>, err: RegistryError) -> RpcResponse {
    match err {
        RegistryError::SessionNotFound(_) => RpcResponse::session_not_found(id, err.to_string()),
        RegistryError::Config(_) => RpcResponse::invalid_params(id, err.to_string()),
    }
}

fn snapshot_json(handle: &SessionHandle) -> serde_json::Value {
    serde_json::to_value(handle.snapshot()).unwrap_or_default()
}

fn parse_session_id(params: &serde_json::Value) -> Result<SessionId, String> {
    rpc::require_str(params, "session_id").map(SessionId::from_raw)
}

fn parse_project_id(params: &serde_json::Value) -> Result<ProjectId, String> {
    rpc::require_str(params, "project_id").map(ProjectId::from)
}

// ── Session handlers ──

fn session_create(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let project_id = match rpc::require_str(params, "project_id") {
        Ok(p) => p,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let project_name = rpc::optional_str(params, "project_name").unwrap_or(project_id);

    let mut config = SessionConfig::new(project_id, project_name);
    if let Some(dir) = rpc::optional_str(params, "working_directory") {
        config.working_directory = PathBuf::from(dir);
    }
    if let Some(prompt) = rpc::optional_str(params, "system_prompt") {
        config.system_prompt = Some(prompt.to_string());
    }
    if let Some(max_steps) = rpc::optional_u64(params, "max_steps") {
        config.max_steps = max_steps as usize;
    }

    match state.sessions.create_session(config) {
        Ok(handle) => RpcResponse::success(id, snapshot_json(&handle)),
        Err(e) => registry_error(id, e),
    }
}

fn session_get(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match parse_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.sessions.get_session(&session_id) {
        Some(handle) => RpcResponse::success(id, snapshot_json(&handle)),
        None => registry_error(id, RegistryError::SessionNotFound(session_id)),
    }
}

fn session_list(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let project_id = match parse_project_id(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    let sessions: Vec<serde_json::Value> = state
        .sessions
        .get_project_sessions(&project_id)
        .iter()
        .map(|handle| snapshot_json(handle))
        .collect();

    RpcResponse::success(
        id,
        serde_json::json!({
            "sessions": sessions,
            "total_count": sessions.len(),
        }),
    )
}

fn session_latest(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let project_id = match parse_project_id(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    // A project without sessions is not an error; the client gets null.
    let session = state
        .sessions
        .get_project_session(&project_id)
        .map(|handle| snapshot_json(&handle));

    RpcResponse::success(id, serde_json::json!({ "session": session }))
}

fn session_send(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match parse_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let text = match rpc::require_str(params, "text") {
        Ok(t) => t,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let model = rpc::optional_str(params, "model").map(str::to_string);

    match state.sessions.send_message(&session_id, text, model) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"acknowledged": true})),
        Err(e) => registry_error(id, e),
    }
}

fn session_start(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match parse_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    let override_messages = match params.get("messages") {
        Some(value) => match serde_json::from_value::<Vec<Message>>(value.clone()) {
            Ok(messages) => Some(messages),
            Err(e) => return RpcResponse::invalid_params(id, format!("invalid messages: {e}")),
        },
        None => None,
    };
    let model = rpc::optional_str(params, "model").map(str::to_string);

    match state.sessions.start_generation(&session_id, model, override_messages) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"acknowledged": true})),
        Err(e) => registry_error(id, e),
    }
}

fn session_stop(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match parse_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    match state.sessions.stop_generation(&session_id) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"stopped": true})),
        Err(e) => registry_error(id, e),
    }
}

fn session_add_message(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match parse_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let Some(value) = params.get("message") else {
        return RpcResponse::invalid_params(id, "Missing required parameter: message");
    };
    let message = match serde_json::from_value::<Message>(value.clone()) {
        Ok(m) => m,
        Err(e) => return RpcResponse::invalid_params(id, format!("invalid message: {e}")),
    };

    match state.sessions.add_message(&session_id, message) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"added": true})),
        Err(e) => registry_error(id, e),
    }
}

fn session_reset(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match parse_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    if let Err(e) = state.sessions.start_new_session(&session_id) {
        return registry_error(id, e);
    }
    match state.sessions.get_session(&session_id) {
        Some(handle) => RpcResponse::success(id, snapshot_json(&handle)),
        None => registry_error(id, RegistryError::SessionNotFound(session_id)),
    }
}

// ── Project handlers ──

fn project_delete_sessions(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let project_id = match parse_project_id(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    let deleted = state.sessions.delete_project_sessions(&project_id);
    RpcResponse::success(id, serde_json::json!({ "deleted": deleted }))
}

// ── Subscription handlers ──

fn session_subscribe(
    state: &Arc<HandlerState>,
    client_id: &ClientId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match parse_session_id(params) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    if state.sessions.get_session(&session_id).is_none() {
        return registry_error(id, RegistryError::SessionNotFound(session_id));
    }

    state.clients.subscribe(client_id, session_id.clone());
    RpcResponse::success(id, serde_json::json!({ "subscribed": session_id }))
}

// ── System handlers ──

fn ping(id: Option<serde_json::Value>) -> RpcResponse {
    RpcResponse::success(id, serde_json::json!({"pong": true}))
}
