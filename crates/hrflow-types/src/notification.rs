//! Notification requests and outbox deliveries.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::Channel;
use crate::{ActorId, NodeId};

/// Idempotency key for the notification a node emits: one per
/// `(instance, node, channel)`.
pub fn notification_key(instance_id: Uuid, node_id: &str, channel: Channel) -> String {
    format!("{instance_id}:{node_id}:{channel}")
}

/// What the engine hands to a notification sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub recipients: BTreeSet<ActorId>,
    pub channel: Channel,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
}

/// Delivery state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    DeadLettered,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::DeadLettered => "dead_lettered",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "dead_lettered" => Ok(DeliveryStatus::DeadLettered),
            other => Err(format!("unknown delivery status: '{other}'")),
        }
    }
}

/// One row of the notification outbox, keyed by `request.idempotency_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDelivery {
    pub instance_id: Uuid,
    pub node_id: NodeId,
    pub request: NotificationRequest,
    pub status: DeliveryStatus,
    /// Attempts made so far (reset to 0 on requeue).
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl NotificationDelivery {
    pub fn new(instance_id: Uuid, node_id: &str, request: NotificationRequest) -> Self {
        let now = Utc::now();
        Self {
            instance_id,
            node_id: node_id.to_string(),
            request,
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            delivered_at: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.request.idempotency_key
    }
}
