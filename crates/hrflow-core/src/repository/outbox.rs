//! Notification outbox trait definition.
//!
//! The outbox is the durable queue between the engine (which enqueues
//! notifications after a winning commit) and the dispatcher (which delivers
//! them with retry). Entries are keyed by their idempotency key.

use hrflow_types::error::RepositoryError;
use hrflow_types::notification::{DeliveryStatus, NotificationDelivery};

pub trait OutboxRepository: Send + Sync {
    /// Insert a delivery unless its idempotency key is already present.
    /// Returns `true` if the entry was new.
    fn enqueue(
        &self,
        delivery: &NotificationDelivery,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn get_delivery(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<NotificationDelivery>, RepositoryError>> + Send;

    /// Deliveries in the given status, oldest first.
    fn list_by_status(
        &self,
        status: DeliveryStatus,
    ) -> impl std::future::Future<Output = Result<Vec<NotificationDelivery>, RepositoryError>> + Send;

    /// Persist status, attempt count, last error, and timestamps.
    fn update_delivery(
        &self,
        delivery: &NotificationDelivery,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Move a dead-lettered delivery back to `Pending` with a fresh attempt
    /// budget. Returns `false` if no dead letter has that key.
    fn requeue(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
