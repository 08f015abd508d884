//! Event types for the hrflow event bus.
//!
//! `WorkflowEvent` is broadcast by the engine after each committed transition
//! and by the notification dispatcher after each delivery outcome. All
//! variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::Verdict;
use crate::definition::BusinessType;
use crate::NodeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    InstanceCreated {
        instance_id: Uuid,
        definition_id: Uuid,
        definition_version: u32,
        business_type: BusinessType,
        business_id: String,
    },

    /// A node entered the frontier and is waiting (Approval nodes only;
    /// pass-through nodes resolve within the same commit).
    NodeEntered { instance_id: Uuid, node_id: NodeId },

    /// A node resolved and the frontier moved past it.
    NodeResolved {
        instance_id: Uuid,
        node_id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        verdict: Option<Verdict>,
    },

    InstanceCompleted { instance_id: Uuid },

    /// An Approval node rejected, which rejects the whole instance.
    InstanceRejected { instance_id: Uuid, node_id: NodeId },

    InstanceCancelled {
        instance_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    NotificationDelivered {
        idempotency_key: String,
        attempts: u32,
    },

    /// Retry budget exhausted. This is the operational alert.
    NotificationDeadLettered {
        idempotency_key: String,
        attempts: u32,
        error: String,
    },
}

impl WorkflowEvent {
    /// The instance this event concerns, if any.
    pub fn instance_id(&self) -> Option<Uuid> {
        match self {
            WorkflowEvent::InstanceCreated { instance_id, .. }
            | WorkflowEvent::NodeEntered { instance_id, .. }
            | WorkflowEvent::NodeResolved { instance_id, .. }
            | WorkflowEvent::InstanceCompleted { instance_id }
            | WorkflowEvent::InstanceRejected { instance_id, .. }
            | WorkflowEvent::InstanceCancelled { instance_id, .. } => Some(*instance_id),
            WorkflowEvent::NotificationDelivered { .. }
            | WorkflowEvent::NotificationDeadLettered { .. } => None,
        }
    }
}
