//! Session registry: owns every live session, enforces one generation per
//! session, and fans lifecycle events onto the bus.
//!
//! Sessions live entirely in memory. A [`SessionHandle`] is the shared
//! state cell; the registry hands out `Arc`s and the generation loop in
//! [`crate::runner`] writes through them. Resets and deletions bump the
//! handle's epoch under the state lock, which is how an already-spawned
//! generation is fenced off from a session that moved on without it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use conductor_core::{
    AssistantMessage, ChatProvider, EventBus, Message, ProjectId, RegistryError, SessionConfig,
    SessionEvent, SessionId, SessionSnapshot, Tool,
};

use crate::registry::{ToolRegistry, ToolSource};
use crate::runner::{GenerationRun, RunnerConfig};
use crate::tools::builtin_tools;

/// Mutable per-session state. Always behind the handle's lock.
pub(crate) struct SessionState {
    pub(crate) messages: Vec<Message>,
    pub(crate) streaming: Option<AssistantMessage>,
    pub(crate) is_loading: bool,
    pub(crate) last_activity: DateTime<Utc>,
}

/// One conversation plus its fixed configuration and resolved tool set.
///
/// Cheap to share; everything mutable sits behind the internal lock. The
/// epoch only ever increases, and only while the state write lock is held.
pub struct SessionHandle {
    id: SessionId,
    config: SessionConfig,
    tools: Arc<ToolRegistry>,
    state: RwLock<SessionState>,
    epoch: AtomicU64,
    active: Mutex<Option<CancellationToken>>,
}

impl SessionHandle {
    fn new(config: SessionConfig, built_in: &[Arc<dyn Tool>]) -> Self {
        let tools = ToolRegistry::layered(built_in, &config.custom_tools, &config.tools);
        Self {
            id: SessionId::new(),
            tools: Arc::new(tools),
            state: RwLock::new(SessionState {
                messages: Vec::new(),
                streaming: None,
                is_loading: false,
                last_activity: Utc::now(),
            }),
            epoch: AtomicU64::new(0),
            active: Mutex::new(None),
            config,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The session's resolved tool set: project-local over custom over
    /// built-in, shadowed by name.
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().is_loading
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.state.read().last_activity
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.read().messages.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read();
        SessionSnapshot {
            id: self.id.clone(),
            project_id: self.config.project_id.clone(),
            project_name: self.config.project_name.clone(),
            messages: state.messages.clone(),
            streaming_message: state.streaming.clone(),
            is_loading: state.is_loading,
            system_prompt: self.config.system_prompt.clone(),
            max_steps: self.config.max_steps,
            tool_names: self.tools.names_from(&ToolSource::Project),
            custom_tool_names: self.tools.names_from(&ToolSource::Custom),
            last_activity: state.last_activity,
        }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read()
    }

    pub(crate) fn state_mut(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("project_id", &self.config.project_id)
            .field("is_loading", &self.is_loading())
            .finish()
    }
}

/// Creates, looks up, and drives sessions. One per server process.
pub struct SessionRegistry {
    provider: Arc<dyn ChatProvider>,
    bus: Arc<EventBus>,
    config: RunnerConfig,
    built_in: Vec<Arc<dyn Tool>>,
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(provider: Arc<dyn ChatProvider>, bus: Arc<EventBus>, config: RunnerConfig) -> Self {
        Self {
            provider,
            bus,
            config,
            built_in: builtin_tools(),
            sessions: DashMap::new(),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Registers a new session. Validation failures are the only way this
    /// errors, and they happen before anything is stored or emitted.
    pub fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Arc<SessionHandle>, RegistryError> {
        config.validate()?;
        let handle = Arc::new(SessionHandle::new(config, &self.built_in));
        self.sessions.insert(handle.id.clone(), Arc::clone(&handle));
        info!(
            session_id = %handle.id,
            project_id = %handle.config.project_id,
            tools = handle.tools.count(),
            "session created"
        );
        self.bus.emit(SessionEvent::SessionCreated {
            session_id: handle.id.clone(),
            project_id: handle.config.project_id.clone(),
        });
        Ok(handle)
    }

    pub fn get_session(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn require(&self, id: &SessionId) -> Result<Arc<SessionHandle>, RegistryError> {
        self.get_session(id)
            .ok_or_else(|| RegistryError::SessionNotFound(id.clone()))
    }

    pub fn get_project_sessions(&self, project_id: &ProjectId) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .iter()
            .filter(|entry| &entry.value().config.project_id == project_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// The project's most recently active session, if it has any.
    pub fn get_project_session(&self, project_id: &ProjectId) -> Option<Arc<SessionHandle>> {
        self.get_project_sessions(project_id)
            .into_iter()
            .max_by_key(|handle| handle.last_activity())
    }

    /// Appends a user message and starts generating the reply with `model`
    /// (falling back to the provider's default when `None`). If a generation
    /// is already running the message still lands; the start is what no-ops.
    pub fn send_message(
        &self,
        id: &SessionId,
        text: impl Into<String>,
        model: Option<String>,
    ) -> Result<(), RegistryError> {
        let handle = self.require(id)?;
        let message = Message::user_text(text);
        {
            let mut state = handle.state_mut();
            state.messages.push(message.clone());
            state.last_activity = Utc::now();
        }
        self.bus.emit(SessionEvent::MessageAdded {
            session_id: id.clone(),
            message,
        });
        self.spawn_generation(&handle, model, None);
        Ok(())
    }

    /// Starts a generation against the current history, or against
    /// `override_messages` which then replaces the history. No-op while a
    /// generation is already running.
    pub fn start_generation(
        &self,
        id: &SessionId,
        model: Option<String>,
        override_messages: Option<Vec<Message>>,
    ) -> Result<(), RegistryError> {
        let handle = self.require(id)?;
        self.spawn_generation(&handle, model, override_messages);
        Ok(())
    }

    #[instrument(skip_all, fields(session_id = %handle.id))]
    fn spawn_generation(
        &self,
        handle: &Arc<SessionHandle>,
        model: Option<String>,
        override_messages: Option<Vec<Message>>,
    ) {
        // The loading flip and the history swap share the write lock, so
        // racing starts see a consistent picture and exactly one wins.
        let replaced = {
            let mut state = handle.state_mut();
            if state.is_loading {
                debug!("generation already running");
                return;
            }
            state.is_loading = true;
            state.last_activity = Utc::now();
            match override_messages {
                Some(messages) => {
                    state.messages = messages;
                    true
                }
                None => false,
            }
        };

        let cancel = CancellationToken::new();
        *handle.active.lock() = Some(cancel.clone());

        if replaced {
            self.bus.emit(SessionEvent::SessionUpdated {
                session_id: handle.id.clone(),
            });
        }
        self.bus.emit(SessionEvent::LoadingChanged {
            session_id: handle.id.clone(),
            is_loading: true,
        });

        let mut options = self.config.stream_options.clone();
        if model.is_some() {
            options.model = model;
        }

        let run = GenerationRun {
            provider: Arc::clone(&self.provider),
            bus: Arc::clone(&self.bus),
            handle: Arc::clone(handle),
            epoch: handle.epoch(),
            cancel,
            options,
            tool_timeout: self.config.tool_timeout,
        };
        tokio::spawn(run.run());
    }

    /// Cancels the in-flight generation, if any. Safe to call repeatedly;
    /// whatever was streamed so far stays in the conversation.
    pub fn stop_generation(&self, id: &SessionId) -> Result<(), RegistryError> {
        let handle = self.require(id)?;
        if let Some(token) = handle.active.lock().take() {
            debug!(session_id = %id, "stopping generation");
            token.cancel();
        }
        Ok(())
    }

    /// Appends a message without starting a generation.
    pub fn add_message(&self, id: &SessionId, message: Message) -> Result<(), RegistryError> {
        let handle = self.require(id)?;
        {
            let mut state = handle.state_mut();
            state.messages.push(message.clone());
            state.last_activity = Utc::now();
        }
        self.bus.emit(SessionEvent::MessageAdded {
            session_id: id.clone(),
            message,
        });
        Ok(())
    }

    /// Clears the conversation but keeps the session and its configuration.
    /// An active generation is cancelled and fenced off by the epoch bump,
    /// so nothing it still has in flight can leak into the fresh state.
    pub fn start_new_session(&self, id: &SessionId) -> Result<(), RegistryError> {
        let handle = self.require(id)?;
        if let Some(token) = handle.active.lock().take() {
            token.cancel();
        }
        let was_loading = {
            let mut state = handle.state_mut();
            handle.epoch.fetch_add(1, Ordering::AcqRel);
            let was = state.is_loading;
            state.messages.clear();
            state.streaming = None;
            state.is_loading = false;
            state.last_activity = Utc::now();
            was
        };
        info!(session_id = %id, "session reset");
        self.bus.emit(SessionEvent::SessionUpdated {
            session_id: id.clone(),
        });
        if was_loading {
            // The fenced runner can no longer emit this one.
            self.bus.emit(SessionEvent::LoadingChanged {
                session_id: id.clone(),
                is_loading: false,
            });
        }
        Ok(())
    }

    /// Cancels and removes every session belonging to the project. Returns
    /// how many were removed.
    pub fn delete_project_sessions(&self, project_id: &ProjectId) -> usize {
        let doomed = self.get_project_sessions(project_id);
        for handle in &doomed {
            if let Some(token) = handle.active.lock().take() {
                token.cancel();
            }
            {
                let mut state = handle.state_mut();
                handle.epoch.fetch_add(1, Ordering::AcqRel);
                state.is_loading = false;
                state.streaming = None;
            }
            self.sessions.remove(&handle.id);
            self.bus.emit(SessionEvent::SessionDeleted {
                session_id: handle.id.clone(),
                project_id: project_id.clone(),
            });
        }
        if !doomed.is_empty() {
            info!(project_id = %project_id, count = doomed.len(), "project sessions deleted");
        }
        doomed.len()
    }

    /// Cancels every in-flight generation. Sessions stay registered.
    pub fn shutdown(&self) {
        for entry in self.sessions.iter() {
            if let Some(token) = entry.value().active.lock().take() {
                token.cancel();
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
