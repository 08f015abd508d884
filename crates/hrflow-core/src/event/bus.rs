//! Broadcast event bus for distributing `WorkflowEvent` to multiple subscribers.
//!
//! Publishing with no active subscribers is a no-op. A subscriber that falls
//! more than `capacity` events behind loses the oldest ones; `EventSubscription`
//! logs the gap and resumes from the oldest retained event.

use hrflow_types::event::WorkflowEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Multi-consumer event bus for workflow events.
///
/// Cloning the bus clones the sender, so the engine and the notification
/// dispatcher publish into the same channel.
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to every event, tolerating lag.
    pub fn subscribe_events(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            instance_id: None,
        }
    }

    /// Subscribe to the lifecycle events of one instance.
    pub fn watch_instance(&self, instance_id: Uuid) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            instance_id: Some(instance_id),
        }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A receiver that skips over lag instead of surfacing it as an error.
pub struct EventSubscription {
    receiver: broadcast::Receiver<WorkflowEvent>,
    instance_id: Option<Uuid>,
}

impl EventSubscription {
    /// Next matching event, or `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<WorkflowEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        skipped,
                        instance_id = ?self.instance_id,
                        "event subscriber lagged, oldest events dropped"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn matches(&self, event: &WorkflowEvent) -> bool {
        match self.instance_id {
            Some(id) => event.instance_id() == Some(id),
            None => true,
        }
    }
}

/// Write every event to the log until cancelled or the bus closes.
/// Dead letters are logged at `warn`; they need an operator.
pub fn spawn_audit_log(bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
    let mut events = bus.subscribe_events();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match &event {
                WorkflowEvent::NotificationDeadLettered {
                    idempotency_key,
                    attempts,
                    error,
                } => {
                    tracing::warn!(key = %idempotency_key, attempts, error = %error, "notification dead-lettered");
                }
                other => {
                    tracing::info!(instance_id = ?other.instance_id(), event = ?other, "workflow event");
                }
            }
        }
        tracing::debug!("audit log stopped");
    })
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
