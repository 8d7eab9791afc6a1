//! WebSocket JSON-RPC server exposing the session registry to browser
//! clients: method dispatch, per-client send queues with heartbeat liveness,
//! and an event bridge that streams session events to subscribers.

pub mod client;
pub mod event_bridge;
pub mod handlers;
pub mod rpc;
pub mod server;

pub use client::ClientRegistry;
pub use handlers::HandlerState;
pub use server::{start, ServerConfig, ServerHandle};
