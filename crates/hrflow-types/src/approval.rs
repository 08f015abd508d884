//! Approval records and verdicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ActorId, NodeId};

/// Status of one approver's decision on one Approval node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    /// The node resolved (or the instance ended) before this approver acted.
    Skipped,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            "skipped" => Ok(ApprovalStatus::Skipped),
            other => Err(format!("unknown approval status: '{other}'")),
        }
    }
}

/// The action an approver takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Reject,
}

impl ApprovalAction {
    /// The record status this action writes.
    pub fn status(&self) -> ApprovalStatus {
        match self {
            ApprovalAction::Approve => ApprovalStatus::Approved,
            ApprovalAction::Reject => ApprovalStatus::Rejected,
        }
    }
}

/// One approver's slot on one Approval node of one instance.
///
/// Unique on `(instance_id, node_id, approver_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub node_id: NodeId,
    pub approver_id: ActorId,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acted_at: Option<DateTime<Utc>>,
}

impl ApprovalRecord {
    /// A fresh pending record.
    pub fn pending(instance_id: Uuid, node_id: &str, approver_id: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            instance_id,
            node_id: node_id.to_string(),
            approver_id: approver_id.to_string(),
            status: ApprovalStatus::Pending,
            comment: None,
            created_at: Utc::now(),
            acted_at: None,
        }
    }
}

/// Aggregated resolution of an Approval node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Unresolved,
    Approved,
    Rejected,
}

impl Verdict {
    pub fn is_decided(&self) -> bool {
        !matches!(self, Verdict::Unresolved)
    }
}
