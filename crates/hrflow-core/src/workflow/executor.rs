//! Node executor: per-node-kind dispatch.
//!
//! `execute_node` is pure. Given the definition, the instance as planned so
//! far, and the instance's approval records, it decides what a node does
//! when it sits in the frontier and returns the resulting effects and where
//! the frontier goes next. Nothing here touches storage; the state machine
//! applies the effects.

use std::collections::BTreeSet;

use hrflow_types::approval::{ApprovalRecord, Verdict};
use hrflow_types::definition::{EdgeGuard, Node, NodeKind, WorkflowDefinition};
use hrflow_types::instance::WorkflowInstance;
use hrflow_types::notification::{NotificationRequest, notification_key};
use hrflow_types::{ActorId, NodeId};
use serde_json::{Value, json};
use thiserror::Error;

use super::aggregator;
use super::condition::{self, EvaluationError};

/// Variable written when an Approval node resolves: `approval.<node_id>`.
pub fn approval_variable(node_id: &str) -> String {
    format!("approval.{node_id}")
}

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// A side effect requested by a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Insert one pending record per approver (insert-if-absent).
    CreateApprovalRecords {
        node_id: NodeId,
        approvers: BTreeSet<ActorId>,
    },
    /// Move the node's remaining pending records to `Skipped`.
    SkipPending { node_id: NodeId },
    /// Enqueue a notification in the outbox (deduplicated on its key).
    Notify {
        node_id: NodeId,
        request: NotificationRequest,
    },
}

/// Where the frontier goes after executing a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    /// The node blocks and stays in the frontier.
    Stay,
    /// The node resolved; these nodes enter the frontier.
    Advance(Vec<NodeId>),
    /// An End node was reached.
    Complete,
    /// An Approval node rejected; the instance is rejected.
    Reject,
}

/// Result of executing one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub effects: Vec<Effect>,
    pub next: Next,
    /// Set for Approval nodes that resolved in this step.
    pub verdict: Option<Verdict>,
    /// Variable to record on the instance, if any.
    pub variable: Option<(String, Value)>,
}

impl NodeOutcome {
    fn advance(to: NodeId) -> Self {
        Self {
            effects: Vec::new(),
            next: Next::Advance(vec![to]),
            verdict: None,
            variable: None,
        }
    }
}

/// Errors raised while executing a node of a definition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("condition '{node_id}' failed to evaluate: {source}")]
    Evaluation {
        node_id: NodeId,
        #[source]
        source: EvaluationError,
    },

    #[error("node '{0}' is not part of the definition")]
    UnknownNode(NodeId),

    #[error("node '{node_id}' has no {branch} edge")]
    MissingEdge {
        node_id: NodeId,
        branch: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Execute one frontier node.
pub fn execute_node(
    def: &WorkflowDefinition,
    node: &Node,
    instance: &WorkflowInstance,
    records: &[ApprovalRecord],
) -> Result<NodeOutcome, ExecutionError> {
    match &node.kind {
        NodeKind::Approval { approvers, quorum } => {
            let has_records = records.iter().any(|r| r.node_id == node.id);
            if !has_records {
                return Ok(NodeOutcome {
                    effects: vec![Effect::CreateApprovalRecords {
                        node_id: node.id.clone(),
                        approvers: approvers.clone(),
                    }],
                    next: Next::Stay,
                    verdict: None,
                    variable: None,
                });
            }

            let verdict = aggregator::aggregate(&node.id, approvers, *quorum, records);
            let (next, label) = match verdict {
                Verdict::Unresolved => {
                    return Ok(NodeOutcome {
                        effects: Vec::new(),
                        next: Next::Stay,
                        verdict: None,
                        variable: None,
                    });
                }
                Verdict::Approved => (Next::Advance(vec![single_successor(def, &node.id)?]), "approved"),
                Verdict::Rejected => (Next::Reject, "rejected"),
            };
            Ok(NodeOutcome {
                effects: vec![Effect::SkipPending {
                    node_id: node.id.clone(),
                }],
                next,
                verdict: Some(verdict),
                variable: Some((approval_variable(&node.id), Value::from(label))),
            })
        }

        NodeKind::Notification {
            recipients,
            channel,
        } => {
            let request = NotificationRequest {
                recipients: recipients.clone(),
                channel: *channel,
                payload: notification_payload(def, node, instance),
                idempotency_key: notification_key(instance.id, &node.id, *channel),
            };
            let mut outcome = NodeOutcome::advance(single_successor(def, &node.id)?);
            outcome.effects.push(Effect::Notify {
                node_id: node.id.clone(),
                request,
            });
            Ok(outcome)
        }

        NodeKind::Condition { predicate } => {
            let taken = condition::evaluate(predicate, &instance.variables).map_err(|source| {
                ExecutionError::Evaluation {
                    node_id: node.id.clone(),
                    source,
                }
            })?;
            let guard = if taken { EdgeGuard::Then } else { EdgeGuard::Else };
            let edge = def
                .outgoing(&node.id)
                .find(|e| e.guard == Some(guard))
                .ok_or_else(|| ExecutionError::MissingEdge {
                    node_id: node.id.clone(),
                    branch: if taken { "then" } else { "else" },
                })?;
            Ok(NodeOutcome::advance(edge.to.clone()))
        }

        NodeKind::End => Ok(NodeOutcome {
            effects: Vec::new(),
            next: Next::Complete,
            verdict: None,
            variable: None,
        }),
    }
}

fn single_successor(def: &WorkflowDefinition, node_id: &str) -> Result<NodeId, ExecutionError> {
    def.outgoing(node_id)
        .find(|e| e.guard.is_none())
        .map(|e| e.to.clone())
        .ok_or_else(|| ExecutionError::MissingEdge {
            node_id: node_id.to_string(),
            branch: "outgoing",
        })
}

fn notification_payload(def: &WorkflowDefinition, node: &Node, instance: &WorkflowInstance) -> Value {
    json!({
        "instance_id": instance.id,
        "definition_id": def.id,
        "definition_name": def.name,
        "node_id": node.id,
        "node_name": node.name,
        "business_type": instance.business_type,
        "business_id": instance.business_id,
        "initiator_id": instance.initiator_id,
    })
}
