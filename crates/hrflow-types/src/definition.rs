//! Workflow definition types.
//!
//! A `WorkflowDefinition` is the immutable, versioned graph template for one
//! business process. Definitions are authored as YAML or JSON; the engine
//! validates the graph before a version is published and pins every instance
//! to the exact version it started from.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::predicate::Predicate;
use crate::{ActorId, NodeId};

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The graph template for a business process.
///
/// `version` and `active` are assigned by the engine on publish; values
/// present in an authored file are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Stable identity shared by every version of this definition.
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    /// Tenant that owns the definition.
    pub organization_id: String,
    /// Human-readable name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The kind of business process this definition drives.
    pub category: BusinessType,
    /// Monotonic version number, starting at 1.
    #[serde(default)]
    pub version: u32,
    /// Only active definitions may start new instances.
    #[serde(default)]
    pub active: bool,
    /// Ordered node list. Order matters only for display.
    pub nodes: Vec<Node>,
    /// Directed edges between nodes.
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges leaving `id`, in declaration order.
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// The first node with no incoming edge.
    ///
    /// A validated definition has exactly one such node.
    pub fn start_node(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| !self.edges.iter().any(|e| e.to == n.id))
    }
}

/// Business process categories supported by the HR product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessType {
    Onboarding,
    Offboarding,
    Promotion,
    Transfer,
    SalaryAdjustment,
    Custom,
}

impl std::fmt::Display for BusinessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BusinessType::Onboarding => "onboarding",
            BusinessType::Offboarding => "offboarding",
            BusinessType::Promotion => "promotion",
            BusinessType::Transfer => "transfer",
            BusinessType::SalaryAdjustment => "salary_adjustment",
            BusinessType::Custom => "custom",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for BusinessType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onboarding" => Ok(BusinessType::Onboarding),
            "offboarding" => Ok(BusinessType::Offboarding),
            "promotion" => Ok(BusinessType::Promotion),
            "transfer" => Ok(BusinessType::Transfer),
            "salary_adjustment" => Ok(BusinessType::SalaryAdjustment),
            "custom" => Ok(BusinessType::Custom),
            other => Err(format!("unknown business type: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// A node in the definition graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the definition (e.g. "manager-approval").
    pub id: NodeId,
    /// Human-readable name.
    pub name: String,
    /// What the node does when it enters the frontier.
    pub kind: NodeKind,
}

/// Node behavior, internally tagged by `type`:
///
/// ```yaml
/// kind:
///   type: approval
///   approvers: [alice, bob]
///   quorum: majority
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Blocks until the configured approvers reach the quorum.
    Approval {
        approvers: BTreeSet<ActorId>,
        quorum: Quorum,
    },
    /// Enqueues a notification and advances immediately.
    Notification {
        recipients: BTreeSet<ActorId>,
        channel: Channel,
    },
    /// Routes along the `then` or `else` edge.
    Condition { predicate: Predicate },
    /// Terminal node.
    End,
}

impl NodeKind {
    /// Short lowercase label for logs and tables.
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Approval { .. } => "approval",
            NodeKind::Notification { .. } => "notification",
            NodeKind::Condition { .. } => "condition",
            NodeKind::End => "end",
        }
    }
}

/// How many approvers must approve before an Approval node resolves.
///
/// Serialized as `all`, `any`, `majority`, or `{ count: n }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quorum {
    All,
    Any,
    Majority,
    Count(u32),
}

impl Quorum {
    /// Number of approvals needed out of `total` configured approvers.
    pub fn threshold(&self, total: usize) -> usize {
        match self {
            Quorum::All => total,
            Quorum::Any => 1,
            Quorum::Majority => total / 2 + 1,
            Quorum::Count(n) => *n as usize,
        }
    }
}

/// Delivery channel for a Notification node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    InApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::InApp => "in_app",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "in_app" => Ok(Channel::InApp),
            other => Err(format!("unknown channel: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// A directed edge. `guard` is set only on edges leaving a Condition node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<EdgeGuard>,
}

/// Which branch of a Condition node an edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeGuard {
    Then,
    Else,
}
