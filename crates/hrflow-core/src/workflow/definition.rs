//! Workflow definition parsing, validation, and file loading.
//!
//! Converts YAML or JSON documents into `WorkflowDefinition` and checks every
//! structural rule a definition must satisfy before it can be published.

use std::collections::HashSet;
use std::path::Path;

use hrflow_types::definition::{EdgeGuard, NodeKind, Quorum, WorkflowDefinition};
use hrflow_types::predicate::Predicate;
use thiserror::Error;

use super::graph::DefinitionGraph;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A structural rule the definition violates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("definition name must not be empty")]
    EmptyName,

    #[error("definition must have at least one node")]
    NoNodes,

    #[error("duplicate node id: '{0}'")]
    DuplicateNode(String),

    #[error("edge {from} -> {to} references unknown node '{missing}'")]
    UnknownEdgeEndpoint {
        from: String,
        to: String,
        missing: String,
    },

    #[error("definition has no start node (every node has an incoming edge)")]
    NoStartNode,

    #[error("definition has multiple start nodes: {0:?}")]
    MultipleStartNodes(Vec<String>),

    #[error("cycle detected involving node '{0}'")]
    Cycle(String),

    #[error("node '{0}' is not reachable from the start node")]
    Unreachable(String),

    #[error("node '{0}' cannot reach an end node")]
    NoPathToEnd(String),

    #[error("node '{node}': {reason}")]
    InvalidEdges { node: String, reason: String },

    #[error("approval node '{0}' has no approvers")]
    NoApprovers(String),

    #[error("notification node '{0}' has no recipients")]
    NoRecipients(String),

    #[error("approval node '{node}' requires {required} approvals but has only {total} approvers")]
    QuorumOutOfRange {
        node: String,
        required: u32,
        total: usize,
    },

    #[error("condition node '{0}' contains an empty and/or list")]
    EmptyPredicateList(String),

    #[error("condition node '{0}' has an empty field name")]
    EmptyPredicateField(String),
}

/// Errors raised while loading a definition document.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid definition: {0}")]
    Invalid(#[from] ValidationError),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML document and validate it.
pub fn parse_definition_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Parse a JSON document and validate it.
pub fn parse_definition_json(json: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let def: WorkflowDefinition =
        serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Load a definition file, choosing the format by extension (`.json` is
/// JSON, anything else is YAML).
pub fn load_definition_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        parse_definition_json(&content)
    } else {
        parse_definition_yaml(&content)
    }
}

/// Serialize a definition back to YAML.
pub fn serialize_definition_yaml(def: &WorkflowDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate every structural rule of a definition.
///
/// Checks, in order:
/// - non-empty name, at least one node, unique node ids
/// - per-node configuration (approvers, recipients, quorum range, predicates)
/// - edges reference known nodes and match each node kind's out-edge shape
/// - graph shape: one start node, acyclic, all reachable, all reach an End
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), ValidationError> {
    if def.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if def.nodes.is_empty() {
        return Err(ValidationError::NoNodes);
    }

    let mut seen = HashSet::new();
    for node in &def.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNode(node.id.clone()));
        }
    }

    for node in &def.nodes {
        match &node.kind {
            NodeKind::Approval { approvers, quorum } => {
                if approvers.is_empty() {
                    return Err(ValidationError::NoApprovers(node.id.clone()));
                }
                if let Quorum::Count(n) = *quorum {
                    if n == 0 || n as usize > approvers.len() {
                        return Err(ValidationError::QuorumOutOfRange {
                            node: node.id.clone(),
                            required: n,
                            total: approvers.len(),
                        });
                    }
                }
            }
            NodeKind::Notification { recipients, .. } => {
                if recipients.is_empty() {
                    return Err(ValidationError::NoRecipients(node.id.clone()));
                }
            }
            NodeKind::Condition { predicate } => validate_predicate(&node.id, predicate)?,
            NodeKind::End => {}
        }
    }

    for edge in &def.edges {
        for endpoint in [&edge.from, &edge.to] {
            if !seen.contains(endpoint.as_str()) {
                return Err(ValidationError::UnknownEdgeEndpoint {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
    }

    for node in &def.nodes {
        validate_out_edges(def, &node.id, &node.kind)?;
    }

    DefinitionGraph::build(def).check_shape()
}

fn validate_out_edges(
    def: &WorkflowDefinition,
    node_id: &str,
    kind: &NodeKind,
) -> Result<(), ValidationError> {
    let out: Vec<_> = def.outgoing(node_id).collect();
    let invalid = |reason: &str| ValidationError::InvalidEdges {
        node: node_id.to_string(),
        reason: reason.to_string(),
    };

    match kind {
        NodeKind::End => {
            if !out.is_empty() {
                return Err(invalid("end nodes must not have outgoing edges"));
            }
        }
        NodeKind::Approval { .. } | NodeKind::Notification { .. } => {
            if out.len() != 1 || out[0].guard.is_some() {
                return Err(invalid("must have exactly one unguarded outgoing edge"));
            }
        }
        NodeKind::Condition { .. } => {
            let then_count = out.iter().filter(|e| e.guard == Some(EdgeGuard::Then)).count();
            let else_count = out.iter().filter(|e| e.guard == Some(EdgeGuard::Else)).count();
            if out.len() != 2 || then_count != 1 || else_count != 1 {
                return Err(invalid("must have exactly one 'then' and one 'else' edge"));
            }
        }
    }
    Ok(())
}

fn validate_predicate(node_id: &str, predicate: &Predicate) -> Result<(), ValidationError> {
    match predicate {
        Predicate::And { and: children } | Predicate::Or { or: children } => {
            if children.is_empty() {
                return Err(ValidationError::EmptyPredicateList(node_id.to_string()));
            }
            children
                .iter()
                .try_for_each(|child| validate_predicate(node_id, child))
        }
        Predicate::Not { not } => validate_predicate(node_id, not),
        Predicate::Compare(cmp) => {
            if cmp.field.trim().is_empty() {
                return Err(ValidationError::EmptyPredicateField(node_id.to_string()));
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
