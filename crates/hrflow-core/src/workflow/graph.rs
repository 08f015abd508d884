//! Graph-shape checks for workflow definitions.
//!
//! Uses `petgraph` to model the definition as a directed graph. Topological
//! sort detects cycles, a forward DFS from the start node finds unreachable
//! nodes, and a reverse DFS from every End node finds nodes that can never
//! finish.

use std::collections::{HashMap, HashSet};

use hrflow_types::definition::{NodeKind, WorkflowDefinition};
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};

use super::definition::ValidationError;

/// A definition's nodes and edges as a `DiGraph`, with node ids as weights.
///
/// Edges referencing unknown node ids are skipped; endpoint validation
/// happens before the graph is built.
pub struct DefinitionGraph<'a> {
    def: &'a WorkflowDefinition,
    graph: DiGraph<&'a str, ()>,
    index: HashMap<&'a str, NodeIndex>,
}

impl<'a> DefinitionGraph<'a> {
    pub fn build(def: &'a WorkflowDefinition) -> Self {
        let mut graph = DiGraph::<&str, ()>::new();
        let index: HashMap<&str, NodeIndex> = def
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
            .collect();

        for edge in &def.edges {
            if let (Some(&from), Some(&to)) =
                (index.get(edge.from.as_str()), index.get(edge.to.as_str()))
            {
                graph.add_edge(from, to, ());
            }
        }

        Self { def, graph, index }
    }

    /// Nodes without incoming edges, in declaration order.
    pub fn start_nodes(&self) -> Vec<&'a str> {
        self.def
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| {
                self.graph
                    .neighbors_directed(self.index[id], Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect()
    }

    /// Node ids in a topological order, or the node where a cycle was found.
    pub fn topological_order(&self) -> Result<Vec<&'a str>, ValidationError> {
        toposort(&self.graph, None)
            .map(|sorted| sorted.into_iter().map(|idx| self.graph[idx]).collect())
            .map_err(|cycle| ValidationError::Cycle(self.graph[cycle.node_id()].to_string()))
    }

    /// Run every graph-shape rule.
    pub fn check_shape(&self) -> Result<(), ValidationError> {
        self.topological_order()?;

        let starts = self.start_nodes();
        let start = match starts.as_slice() {
            [] => return Err(ValidationError::NoStartNode),
            [only] => *only,
            many => {
                return Err(ValidationError::MultipleStartNodes(
                    many.iter().map(|s| s.to_string()).collect(),
                ));
            }
        };

        let mut reachable = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, self.index[start]);
        while let Some(idx) = dfs.next(&self.graph) {
            reachable.insert(idx);
        }
        for node in &self.def.nodes {
            if !reachable.contains(&self.index[node.id.as_str()]) {
                return Err(ValidationError::Unreachable(node.id.clone()));
            }
        }

        let reversed = Reversed(&self.graph);
        let mut finishes = HashSet::new();
        for node in self.def.nodes.iter().filter(|n| n.kind == NodeKind::End) {
            let mut dfs = Dfs::new(reversed, self.index[node.id.as_str()]);
            while let Some(idx) = dfs.next(reversed) {
                finishes.insert(idx);
            }
        }
        for node in &self.def.nodes {
            if !finishes.contains(&self.index[node.id.as_str()]) {
                return Err(ValidationError::NoPathToEnd(node.id.clone()));
            }
        }

        Ok(())
    }
}
