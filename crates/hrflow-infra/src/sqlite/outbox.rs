//! SQLite notification outbox.

use chrono::Utc;
use hrflow_core::repository::outbox::OutboxRepository;
use hrflow_types::error::RepositoryError;
use hrflow_types::notification::{DeliveryStatus, NotificationDelivery, NotificationRequest};
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_enum, parse_uuid, query_err};

/// SQLite-backed implementation of `OutboxRepository`.
#[derive(Clone)]
pub struct SqliteOutboxRepository {
    pool: DatabasePool,
}

impl SqliteOutboxRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct DeliveryRow {
    instance_id: String,
    node_id: String,
    request: String,
    status: String,
    attempts: i64,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
    delivered_at: Option<String>,
}

impl DeliveryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            instance_id: row.try_get("instance_id")?,
            node_id: row.try_get("node_id")?,
            request: row.try_get("request")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            delivered_at: row.try_get("delivered_at")?,
        })
    }

    fn into_delivery(self) -> Result<NotificationDelivery, RepositoryError> {
        let request: NotificationRequest = serde_json::from_str(&self.request)
            .map_err(|e| RepositoryError::Query(format!("invalid notification request JSON: {e}")))?;

        Ok(NotificationDelivery {
            instance_id: parse_uuid(&self.instance_id)?,
            node_id: self.node_id,
            request,
            status: parse_enum(&self.status)?,
            attempts: self.attempts as u32,
            last_error: self.last_error,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            delivered_at: self.delivered_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

const DELIVERY_COLUMNS: &str = "idempotency_key, instance_id, node_id, request, status, attempts, \
     last_error, created_at, updated_at, delivered_at";

impl OutboxRepository for SqliteOutboxRepository {
    async fn enqueue(&self, delivery: &NotificationDelivery) -> Result<bool, RepositoryError> {
        let request = serde_json::to_string(&delivery.request)
            .map_err(|e| RepositoryError::Query(format!("serialize notification request: {e}")))?;

        let result = sqlx::query(&format!(
            r#"INSERT INTO notification_outbox ({DELIVERY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(idempotency_key) DO NOTHING"#
        ))
        .bind(delivery.key())
        .bind(delivery.instance_id.to_string())
        .bind(&delivery.node_id)
        .bind(&request)
        .bind(delivery.status.to_string())
        .bind(delivery.attempts as i64)
        .bind(&delivery.last_error)
        .bind(format_datetime(&delivery.created_at))
        .bind(format_datetime(&delivery.updated_at))
        .bind(delivery.delivered_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_delivery(&self, key: &str) -> Result<Option<NotificationDelivery>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM notification_outbox WHERE idempotency_key = ?"
        ))
        .bind(key)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.map(|r| DeliveryRow::from_row(&r).map_err(query_err)?.into_delivery())
            .transpose()
    }

    async fn list_by_status(
        &self,
        status: DeliveryStatus,
    ) -> Result<Vec<NotificationDelivery>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM notification_outbox WHERE status = ? ORDER BY created_at, idempotency_key"
        ))
        .bind(status.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| DeliveryRow::from_row(row).map_err(query_err)?.into_delivery())
            .collect()
    }

    async fn update_delivery(&self, delivery: &NotificationDelivery) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE notification_outbox
               SET status = ?, attempts = ?, last_error = ?, updated_at = ?, delivered_at = ?
               WHERE idempotency_key = ?"#,
        )
        .bind(delivery.status.to_string())
        .bind(delivery.attempts as i64)
        .bind(&delivery.last_error)
        .bind(format_datetime(&delivery.updated_at))
        .bind(delivery.delivered_at.as_ref().map(format_datetime))
        .bind(delivery.key())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn requeue(&self, key: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE notification_outbox SET status = 'pending', attempts = 0, updated_at = ?
               WHERE idempotency_key = ? AND status = 'dead_lettered'"#,
        )
        .bind(format_datetime(&Utc::now()))
        .bind(key)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }
}
