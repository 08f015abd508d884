//! Notification dispatcher: outbox delivery with retry and dead-lettering.
//!
//! The engine enqueues `NotificationDelivery` rows after a winning commit and
//! wakes the dispatcher through a shared `Notify`. The dispatcher delivers
//! each pending row through a `NotificationSink`, retrying with exponential
//! backoff. A delivery that exhausts its budget is dead-lettered, logged at
//! `error`, and announced on the event bus. Delivery outcomes never touch
//! instance state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hrflow_types::config::DispatchConfig;
use hrflow_types::error::RepositoryError;
use hrflow_types::event::WorkflowEvent;
use hrflow_types::notification::{DeliveryStatus, NotificationDelivery, NotificationRequest};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::event::bus::EventBus;
use crate::repository::outbox::OutboxRepository;

use super::retry::RetryPolicy;

/// How often the worker re-scans the outbox without being woken. Picks up
/// rows enqueued by other processes sharing the same store.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Errors and ports
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("delivery attempt timed out after {0} ms")]
    Timeout(u64),

    #[error("outbox error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Port for actual notification delivery (email gateway, SMS, in-app feed).
///
/// Sinks receive the idempotency key with every request and should use it
/// to drop duplicates: a delivery may be retried after a timeout even if the
/// first attempt eventually landed.
pub trait NotificationSink: Send + Sync {
    fn deliver(
        &self,
        request: &NotificationRequest,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

impl<S: NotificationSink> NotificationSink for Arc<S> {
    fn deliver(
        &self,
        request: &NotificationRequest,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send {
        (**self).deliver(request)
    }
}

/// Counts from one pass over the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub dead_lettered: usize,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct NotificationDispatcher<O, S> {
    outbox: O,
    sink: S,
    config: DispatchConfig,
    event_bus: EventBus,
    signal: Arc<Notify>,
    /// Serializes passes so the worker and an explicit `run_pending` never
    /// deliver the same row concurrently.
    pass: Mutex<()>,
}

impl<O, S> NotificationDispatcher<O, S>
where
    O: OutboxRepository,
    S: NotificationSink,
{
    /// `signal` is the handle the engine notifies after enqueueing
    /// (`Engine::dispatch_signal`).
    pub fn new(
        outbox: O,
        sink: S,
        config: DispatchConfig,
        event_bus: EventBus,
        signal: Arc<Notify>,
    ) -> Self {
        Self {
            outbox,
            sink,
            config,
            event_bus,
            signal,
            pass: Mutex::new(()),
        }
    }

    /// Deliver every pending row once (with in-place retries).
    pub async fn run_pending(&self) -> Result<DispatchReport, DispatchError> {
        let _guard = self.pass.lock().await;
        let pending = self.outbox.list_by_status(DeliveryStatus::Pending).await?;
        let mut report = DispatchReport::default();

        for delivery in pending {
            match self.deliver(delivery).await? {
                DeliveryStatus::Delivered => report.delivered += 1,
                DeliveryStatus::DeadLettered => report.dead_lettered += 1,
                DeliveryStatus::Pending => {}
            }
        }

        if report != DispatchReport::default() {
            tracing::debug!(
                delivered = report.delivered,
                dead_lettered = report.dead_lettered,
                "dispatch pass finished"
            );
        }
        Ok(report)
    }

    async fn deliver(&self, mut delivery: NotificationDelivery) -> Result<DeliveryStatus, DispatchError> {
        let timeout = RetryPolicy::attempt_timeout(&self.config);

        loop {
            delivery.attempts += 1;
            let attempt = delivery.attempts;

            let outcome = match tokio::time::timeout(timeout, self.sink.deliver(&delivery.request)).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Timeout(self.config.attempt_timeout_ms)),
            };
            delivery.updated_at = Utc::now();

            match outcome {
                Ok(()) => {
                    delivery.status = DeliveryStatus::Delivered;
                    delivery.delivered_at = Some(delivery.updated_at);
                    delivery.last_error = None;
                    self.outbox.update_delivery(&delivery).await?;

                    tracing::info!(
                        key = %delivery.key(),
                        channel = %delivery.request.channel,
                        attempt,
                        "notification delivered"
                    );
                    self.event_bus.publish(WorkflowEvent::NotificationDelivered {
                        idempotency_key: delivery.key().to_string(),
                        attempts: attempt,
                    });
                    return Ok(DeliveryStatus::Delivered);
                }
                Err(err) => {
                    let message = err.to_string();
                    delivery.last_error = Some(message.clone());

                    if RetryPolicy::should_retry(&self.config, attempt) {
                        self.outbox.update_delivery(&delivery).await?;
                        let delay = RetryPolicy::backoff(&self.config, attempt);
                        tracing::warn!(
                            key = %delivery.key(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "notification delivery failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    delivery.status = DeliveryStatus::DeadLettered;
                    self.outbox.update_delivery(&delivery).await?;

                    tracing::error!(
                        key = %delivery.key(),
                        instance_id = %delivery.instance_id,
                        node_id = %delivery.node_id,
                        attempts = attempt,
                        error = %message,
                        "notification dead-lettered"
                    );
                    self.event_bus.publish(WorkflowEvent::NotificationDeadLettered {
                        idempotency_key: delivery.key().to_string(),
                        attempts: attempt,
                        error: message,
                    });
                    return Ok(DeliveryStatus::DeadLettered);
                }
            }
        }
    }
}

impl<O, S> NotificationDispatcher<O, S>
where
    O: OutboxRepository + 'static,
    S: NotificationSink + 'static,
{
    /// Run the background worker until `cancel` fires.
    ///
    /// Each loop drains the outbox, then waits for an engine signal, the
    /// idle poll interval, or cancellation.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("notification dispatcher started");
            loop {
                if let Err(e) = self.run_pending().await {
                    tracing::warn!(error = %e, "dispatch pass failed");
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.signal.notified() => {}
                    _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                }
            }
            tracing::info!("notification dispatcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use hrflow_types::definition::Channel;
    use hrflow_types::notification::notification_key;
    use uuid::Uuid;

    use crate::repository::memory::MemoryOutboxRepository;

    /// Fails the first `failures` calls, then succeeds.
    struct FlakySink {
        failures: u32,
        calls: AtomicU32,
        delivered: std::sync::Mutex<Vec<String>>,
    }

    impl FlakySink {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
                delivered: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    impl NotificationSink for FlakySink {
        async fn deliver(&self, request: &NotificationRequest) -> Result<(), DispatchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(DispatchError::Delivery(format!("gateway down (call {call})")));
            }
            self.delivered.lock().unwrap().push(request.idempotency_key.clone());
            Ok(())
        }
    }

    struct HangingSink;

    impl NotificationSink for HangingSink {
        async fn deliver(&self, _request: &NotificationRequest) -> Result<(), DispatchError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn fast_config() -> DispatchConfig {
        DispatchConfig {
            max_attempts: 3,
            base_backoff_ms: 1,
            attempt_timeout_ms: 50,
        }
    }

    fn delivery(node: &str) -> NotificationDelivery {
        let id = Uuid::now_v7();
        NotificationDelivery::new(
            id,
            node,
            NotificationRequest {
                recipients: ["hr".to_string()].into_iter().collect(),
                channel: Channel::Email,
                payload: serde_json::json!({"node": node}),
                idempotency_key: notification_key(id, node, Channel::Email),
            },
        )
    }

    fn dispatcher<S: NotificationSink>(
        outbox: &MemoryOutboxRepository,
        sink: S,
        bus: &EventBus,
    ) -> NotificationDispatcher<MemoryOutboxRepository, S> {
        NotificationDispatcher::new(
            outbox.clone(),
            sink,
            fast_config(),
            bus.clone(),
            Arc::new(Notify::new()),
        )
    }

    #[tokio::test]
    async fn test_retries_then_delivers() {
        let outbox = MemoryOutboxRepository::new();
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let sink = FlakySink::new(2);
        let d = delivery("welcome");
        outbox.enqueue(&d).await.unwrap();

        let report = dispatcher(&outbox, sink.clone(), &bus).run_pending().await.unwrap();
        assert_eq!(report, DispatchReport { delivered: 1, dead_lettered: 0 });

        let stored = outbox.get_delivery(d.key()).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);
        assert_eq!(stored.attempts, 3);
        assert!(stored.delivered_at.is_some());
        assert_eq!(sink.delivered.lock().unwrap().as_slice(), [d.key().to_string()]);
        assert!(matches!(
            rx.recv().await.unwrap(),
            WorkflowEvent::NotificationDelivered { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_exhausted_budget_dead_letters_and_alerts() {
        let outbox = MemoryOutboxRepository::new();
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let sink = FlakySink::new(u32::MAX);
        let d = delivery("welcome");
        outbox.enqueue(&d).await.unwrap();

        let report = dispatcher(&outbox, sink.clone(), &bus).run_pending().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);

        let stored = outbox.get_delivery(d.key()).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::DeadLettered);
        assert!(stored.last_error.unwrap().contains("gateway down"));
        match rx.recv().await.unwrap() {
            WorkflowEvent::NotificationDeadLettered { idempotency_key, attempts, .. } => {
                assert_eq!(idempotency_key, d.key());
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_each_attempt_is_bounded_by_timeout() {
        let outbox = MemoryOutboxRepository::new();
        let bus = EventBus::new(16);
        let d = delivery("slow");
        outbox.enqueue(&d).await.unwrap();

        let started = std::time::Instant::now();
        let report = dispatcher(&outbox, HangingSink, &bus).run_pending().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert!(started.elapsed() < Duration::from_secs(5));

        let stored = outbox.get_delivery(d.key()).await.unwrap().unwrap();
        assert!(stored.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_requeued_dead_letter_gets_fresh_budget() {
        let outbox = MemoryOutboxRepository::new();
        let bus = EventBus::new(16);
        let d = delivery("welcome");
        outbox.enqueue(&d).await.unwrap();

        // 3 failures exhaust the first budget, the 4th call succeeds.
        let sink = FlakySink::new(3);
        let dispatcher = dispatcher(&outbox, sink.clone(), &bus);
        assert_eq!(dispatcher.run_pending().await.unwrap().dead_lettered, 1);

        assert!(outbox.requeue(d.key()).await.unwrap());
        assert_eq!(dispatcher.run_pending().await.unwrap().delivered, 1);
        let stored = outbox.get_delivery(d.key()).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_worker_wakes_on_signal_and_stops_on_cancel() {
        let outbox = MemoryOutboxRepository::new();
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let signal = Arc::new(Notify::new());
        let sink = FlakySink::new(0);
        let dispatcher = Arc::new(NotificationDispatcher::new(
            outbox.clone(),
            sink.clone(),
            fast_config(),
            bus.clone(),
            signal.clone(),
        ));
        let cancel = CancellationToken::new();
        let handle = dispatcher.spawn(cancel.clone());

        let d = delivery("late");
        outbox.enqueue(&d).await.unwrap();
        signal.notify_one();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("worker should deliver after the signal")
            .unwrap();
        assert!(matches!(event, WorkflowEvent::NotificationDelivered { .. }));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker should stop after cancel")
            .unwrap();
    }
}
