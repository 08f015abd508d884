//! Transition planning for the instance state machine.
//!
//! `plan_transition` takes one consistent snapshot (instance + records) and
//! expands the frontier through every node that does not block: approvals
//! that already reached a verdict, notifications, conditions, and End nodes.
//! The result is a `TransitionPlan` the engine commits with a single
//! versioned write. Planning is pure, so a commit that loses a version race
//! simply re-reads and plans again.

use std::collections::{BTreeSet, HashSet, VecDeque};

use hrflow_types::NodeId;
use hrflow_types::approval::{ApprovalRecord, Verdict};
use hrflow_types::definition::WorkflowDefinition;
use hrflow_types::instance::{InstanceStatus, WorkflowInstance};

use super::executor::{Effect, ExecutionError, Next, execute_node};

/// Everything one commit changes.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    /// The instance as it should be written (version not yet bumped).
    pub instance: WorkflowInstance,
    /// Idempotent effects applied before the versioned write.
    pub pre_commit: Vec<Effect>,
    /// Effects applied only by the commit that wins.
    pub post_commit: Vec<Effect>,
    /// Approval nodes that started waiting in this plan.
    pub entered: Vec<NodeId>,
    /// Nodes that resolved, in execution order.
    pub resolved: Vec<(NodeId, Option<Verdict>)>,
    /// The Approval node whose rejection rejected the instance.
    pub rejected_at: Option<NodeId>,
}

impl TransitionPlan {
    /// Whether the plan changes persisted instance state.
    pub fn changes(&self, current: &WorkflowInstance) -> bool {
        self.instance.status != current.status
            || self.instance.frontier != current.frontier
            || self.instance.variables != current.variables
    }
}

/// Plan the next transition of a running instance.
///
/// Terminal instances yield an empty plan.
pub fn plan_transition(
    def: &WorkflowDefinition,
    current: &WorkflowInstance,
    records: &[ApprovalRecord],
) -> Result<TransitionPlan, ExecutionError> {
    let mut working = current.clone();
    let mut plan = TransitionPlan {
        instance: current.clone(),
        pre_commit: Vec::new(),
        post_commit: Vec::new(),
        entered: Vec::new(),
        resolved: Vec::new(),
        rejected_at: None,
    };
    if current.status.is_terminal() {
        return Ok(plan);
    }

    let mut queue: VecDeque<NodeId> = current.frontier.iter().cloned().collect();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut frontier: BTreeSet<NodeId> = BTreeSet::new();

    while let Some(node_id) = queue.pop_front() {
        if !visited.insert(node_id.clone()) {
            continue;
        }
        let node = def
            .node(&node_id)
            .ok_or_else(|| ExecutionError::UnknownNode(node_id.clone()))?;
        let outcome = execute_node(def, node, &working, records)?;

        if let Some((key, value)) = outcome.variable {
            working.variables.insert(key, value);
        }
        for effect in outcome.effects {
            match effect {
                Effect::CreateApprovalRecords { .. } => {
                    plan.entered.push(node_id.clone());
                    plan.pre_commit.push(effect);
                }
                Effect::SkipPending { .. } => plan.pre_commit.push(effect),
                Effect::Notify { .. } => plan.post_commit.push(effect),
            }
        }

        match outcome.next {
            Next::Stay => {
                frontier.insert(node_id);
            }
            Next::Advance(targets) => {
                plan.resolved.push((node_id, outcome.verdict));
                queue.extend(targets);
            }
            Next::Complete => plan.resolved.push((node_id, None)),
            Next::Reject => {
                plan.resolved.push((node_id.clone(), outcome.verdict));
                plan.rejected_at = Some(node_id);
                working.status = InstanceStatus::Rejected;
                break;
            }
        }
    }

    if working.status == InstanceStatus::Rejected {
        working.frontier.clear();
    } else {
        if frontier.is_empty() {
            working.status = InstanceStatus::Completed;
        }
        working.frontier = frontier;
    }

    plan.instance = working;
    Ok(plan)
}
