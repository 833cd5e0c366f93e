//! ABOUTME: EventBus fanning workflow lifecycle events out to named listeners
//! ABOUTME: Named listeners back addListener/removeListener; broadcast backs ad-hoc observers

use crate::event::WorkflowEvent;
use crate::listener::Listener;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for workflow lifecycle events. Listeners are registered by
/// name so callers can remove exactly the one they added; an additional
/// broadcast channel lets tests and ad-hoc observers watch every event
/// without naming themselves.
pub struct EventBus {
    listeners: DashMap<String, Arc<dyn Listener>>,
    broadcast_tx: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            listeners: DashMap::new(),
            broadcast_tx,
        }
    }

    /// Register a named listener, replacing any previous listener under
    /// the same name.
    pub fn add_listener(&self, name: impl Into<String>, listener: Arc<dyn Listener>) {
        self.listeners.insert(name.into(), listener);
    }

    /// Unregister a named listener. No-op if `name` is not registered.
    pub fn remove_listener(&self, name: &str) {
        self.listeners.remove(name);
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Fan `event` out to every registered listener and the broadcast
    /// channel. Listeners run concurrently rather than one after
    /// another — a slow or gone listener must not stall its siblings.
    /// Listener failures (panics are caught by the caller's task
    /// boundary; errors here are just absent receivers) never fail the
    /// publish.
    pub async fn publish(&self, event: WorkflowEvent) {
        if self.broadcast_tx.send(event.clone()).is_err() {
            debug!(kind = event.kind(), "no broadcast receivers for event");
        }

        let listeners: Vec<_> = self
            .listeners
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        if listeners.is_empty() {
            warn!(kind = event.kind(), "workflow event published with no named listeners");
            return;
        }

        let deliveries = listeners.into_iter().map(|(name, listener)| {
            let event = &event;
            async move {
                listener.on_event(event).await;
                debug!(kind = event.kind(), listener = %name, "delivered workflow event");
            }
        });
        futures::future::join_all(deliveries).await;
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::FnListener;
    use parking_lot::Mutex;
    use workflow_core::types::{RunId, WorkflowId};

    fn started(run_id: RunId) -> WorkflowEvent {
        WorkflowEvent::Started {
            run_id,
            workflow_id: WorkflowId::new("wf"),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_named_listener() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.add_listener("recorder", Arc::new(FnListener::new(move |event| {
            seen_clone.lock().push(event.kind().to_string());
        })));

        bus.publish(started(RunId::new())).await;
        assert_eq!(seen.lock().as_slice(), ["started"]);
    }

    #[tokio::test]
    async fn remove_listener_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0usize));
        let seen_clone = seen.clone();
        bus.add_listener("counter", Arc::new(FnListener::new(move |_| {
            *seen_clone.lock() += 1;
        })));
        bus.remove_listener("counter");

        bus.publish(started(RunId::new())).await;
        assert_eq!(*seen.lock(), 0);
    }

    #[tokio::test]
    async fn broadcast_receiver_observes_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_all();
        bus.publish(started(RunId::new())).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind(), "started");
    }
}
