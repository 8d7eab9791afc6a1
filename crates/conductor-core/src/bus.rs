use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::warn;

use crate::events::{EventKind, SessionEvent};

/// Capacity of the broadcast mirror. Slow out-of-process consumers lag and
/// resubscribe; in-process handlers are invoked synchronously and never drop.
const BROADCAST_CAPACITY: usize = 1024;

/// Handle returned by [`EventBus::on`]. Pass it back to [`EventBus::off`]
/// to remove the subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Synchronous fan-out of [`SessionEvent`]s.
///
/// Handlers for a kind run in subscription order on the emitting thread, so
/// an emitter observes its own event fully delivered before `emit` returns.
/// A panicking handler is caught and logged; the remaining handlers still
/// run. Events are not replayed: a handler only sees what is emitted after
/// it subscribes.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
    broadcast: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            broadcast,
        }
    }

    /// Register `handler` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription. Returns false if the id was already gone.
    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub_id, _)| *sub_id != id);
        before != list.len()
    }

    /// Deliver `event` to every handler registered for its kind, then mirror
    /// it onto the broadcast channel. Handler panics are contained here.
    pub fn emit(&self, event: SessionEvent) {
        // Clone the handler list out so a handler may call on/off without
        // deadlocking against the emit path.
        let matched: Vec<Handler> = {
            let handlers = self.handlers.read();
            handlers
                .get(&event.kind())
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };

        for handler in matched {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if result.is_err() {
                warn!(
                    event_type = event.event_type(),
                    session_id = %event.session_id(),
                    "event handler panicked; continuing"
                );
            }
        }

        // No receivers is fine; the mirror only matters once a bridge attaches.
        let _ = self.broadcast.send(event);
    }

    /// Subscribe to the async mirror of the bus. Used by transport bridges
    /// that forward events out of process.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.broadcast.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .get(&kind)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("kinds", &self.handlers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SessionId;
    use parking_lot::Mutex;

    fn loading(sid: &SessionId, is_loading: bool) -> SessionEvent {
        SessionEvent::LoadingChanged {
            session_id: sid.clone(),
            is_loading,
        }
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.on(EventKind::LoadingChanged, move |_| {
                order.lock().push(tag);
            });
        }

        bus.emit(loading(&SessionId::new(), true));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn off_removes_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let c = count.clone();
        let id = bus.on(EventKind::LoadingChanged, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let sid = SessionId::new();
        bus.emit(loading(&sid, true));
        assert!(bus.off(EventKind::LoadingChanged, id));
        bus.emit(loading(&sid, false));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(EventKind::LoadingChanged), 0);
        // Second removal is a no-op.
        assert!(!bus.off(EventKind::LoadingChanged, id));
    }

    #[test]
    fn handler_only_sees_its_kind() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let c = count.clone();
        bus.on(EventKind::SessionUpdated, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(loading(&SessionId::new(), true));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        bus.emit(SessionEvent::SessionUpdated {
            session_id: SessionId::new(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        bus.on(EventKind::LoadingChanged, |_| {
            panic!("handler blew up");
        });
        let c = count.clone();
        bus.on(EventKind::LoadingChanged, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(loading(&SessionId::new(), true));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_replay_for_late_subscribers() {
        let bus = EventBus::new();
        bus.emit(loading(&SessionId::new(), true));

        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        bus.on(EventKind::LoadingChanged, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(count.load(Ordering::SeqCst), 0);
        bus.emit(loading(&SessionId::new(), false));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_receives_event_payload() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));

        let s = seen.clone();
        bus.on(EventKind::LoadingChanged, move |evt| {
            if let SessionEvent::LoadingChanged { is_loading, .. } = evt {
                *s.lock() = Some(*is_loading);
            }
        });

        bus.emit(loading(&SessionId::new(), true));
        assert_eq!(*seen.lock(), Some(true));
    }

    #[tokio::test]
    async fn broadcast_mirror_carries_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let sid = SessionId::new();
        bus.emit(loading(&sid, true));

        let evt = rx.recv().await.unwrap();
        assert_eq!(evt.session_id(), &sid);
        assert_eq!(evt.event_type(), "loading_changed");
    }
}
