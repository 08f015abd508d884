//! Workflow instance types.
//!
//! An instance is one execution of a pinned definition version against a
//! business object. The engine owns `status` and `frontier`; `version` is the
//! optimistic-concurrency counter bumped on every committed transition.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::definition::BusinessType;
use crate::{ActorId, NodeId};

/// Lifecycle status of an instance. Every state but `Running` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Completed,
    Rejected,
    Cancelled,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceStatus::Running)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Rejected => "rejected",
            InstanceStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(InstanceStatus::Running),
            "completed" => Ok(InstanceStatus::Completed),
            "rejected" => Ok(InstanceStatus::Rejected),
            "cancelled" => Ok(InstanceStatus::Cancelled),
            other => Err(format!("unknown instance status: '{other}'")),
        }
    }
}

/// The persisted state of one running (or finished) workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub definition_id: Uuid,
    /// The definition version this instance is pinned to.
    pub definition_version: u32,
    pub business_type: BusinessType,
    /// Identifier of the business object (employee id, request number).
    pub business_id: String,
    pub initiator_id: ActorId,
    pub status: InstanceStatus,
    /// Currently active nodes. Always empty once the instance is terminal.
    pub frontier: BTreeSet<NodeId>,
    /// Variable bag read by Condition nodes.
    pub variables: Map<String, Value>,
    /// Optimistic-concurrency counter.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

impl WorkflowInstance {
    /// The read model exposed by queries.
    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id,
            definition_id: self.definition_id,
            definition_version: self.definition_version,
            business_type: self.business_type,
            business_id: self.business_id.clone(),
            initiator_id: self.initiator_id.clone(),
            status: self.status,
            frontier: self.frontier.iter().cloned().collect(),
            variables: self.variables.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            cancel_reason: self.cancel_reason.clone(),
        }
    }
}

/// Instance as returned by queries: every field except the concurrency
/// counter, with the frontier as a sorted list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub id: Uuid,
    pub definition_id: Uuid,
    pub definition_version: u32,
    pub business_type: BusinessType,
    pub business_id: String,
    pub initiator_id: ActorId,
    pub status: InstanceStatus,
    pub frontier: Vec<NodeId>,
    pub variables: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

/// Filter for `list_instances`. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InstanceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_type: Option<BusinessType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_id: Option<String>,
}

impl InstanceFilter {
    pub fn matches(&self, instance: &WorkflowInstance) -> bool {
        self.status.is_none_or(|s| s == instance.status)
            && self.business_type.is_none_or(|b| b == instance.business_type)
            && self
                .business_id
                .as_deref()
                .is_none_or(|id| id == instance.business_id)
    }
}
