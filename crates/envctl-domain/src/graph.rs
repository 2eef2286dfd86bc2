//! Typed dependency graph over supervised services
//!
//! Nodes are service labels with a [`ServiceType`]; an edge records "depends
//! on". The only permitted dependencies are `PortForward → K8sConnection`,
//! `McpServer → PortForward`, and `McpServer → K8sConnection`. Orders are
//! deterministic: topological sorting breaks ties by insertion order, so the
//! same configuration always starts in the same sequence.

use std::collections::HashMap;

use petgraph::algo::is_cyclic_directed;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;

use crate::error::{Error, Result};
use crate::value_objects::{ServiceLabel, ServiceType};

/// One declared service and its dependencies
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    /// Service label, unique in the graph
    pub id: ServiceLabel,
    /// Kind of service
    pub kind: ServiceType,
    /// Human-readable name for UI surfaces
    pub friendly_name: String,
    /// Labels this service depends on; each must already be in the graph
    pub depends_on: Vec<ServiceLabel>,
}

/// Directed acyclic graph of services keyed by label
#[derive(Debug, Default)]
pub struct DependencyGraph {
    // Edges point dependency -> dependent, so a plain topological order
    // yields dependencies first.
    graph: StableDiGraph<GraphNode, ()>,
    index: HashMap<ServiceLabel, NodeIndex>,
    insertion: Vec<NodeIndex>,
}

impl DependencyGraph {
    /// Empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.insertion.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insertion.is_empty()
    }

    /// Whether a label is declared.
    #[must_use]
    pub fn contains(&self, id: &ServiceLabel) -> bool {
        self.index.contains_key(id)
    }

    /// Look up a node by label.
    #[must_use]
    pub fn node(&self, id: &ServiceLabel) -> Option<&GraphNode> {
        self.index.get(id).map(|ix| &self.graph[*ix])
    }

    /// Insert a node, wiring its dependency edges.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when the label is already declared, a
    /// `dependsOn` entry is unknown, the edge kind is not permitted, or the
    /// insertion would introduce a cycle.
    pub fn add_node(&mut self, node: GraphNode) -> Result<()> {
        if self.index.contains_key(&node.id) {
            return Err(Error::config(format!(
                "duplicate node '{}' in dependency graph",
                node.id
            )));
        }

        let mut dep_indices = Vec::with_capacity(node.depends_on.len());
        for dep in &node.depends_on {
            let dep_ix = self.index.get(dep).ok_or_else(|| {
                Error::config(format!(
                    "node '{}' depends on unknown node '{dep}'",
                    node.id
                ))
            })?;
            let dep_kind = self.graph[*dep_ix].kind;
            if !edge_permitted(node.kind, dep_kind) {
                return Err(Error::config(format!(
                    "node '{}' ({:?}) may not depend on '{dep}' ({dep_kind:?})",
                    node.id, node.kind
                )));
            }
            dep_indices.push(*dep_ix);
        }

        let id = node.id.clone();
        let ix = self.graph.add_node(node);
        for dep_ix in dep_indices {
            self.graph.add_edge(dep_ix, ix, ());
        }

        if is_cyclic_directed(&self.graph) {
            self.graph.remove_node(ix);
            return Err(Error::config(format!(
                "node '{id}' would introduce a dependency cycle"
            )));
        }

        self.index.insert(id, ix);
        self.insertion.push(ix);
        Ok(())
    }

    /// Start order: dependencies before dependents, ties broken by insertion
    /// order (Kahn's algorithm).
    #[must_use]
    pub fn topological_order(&self) -> Vec<ServiceLabel> {
        let mut indegree: HashMap<NodeIndex, usize> = self
            .insertion
            .iter()
            .map(|&ix| {
                let deps = self
                    .graph
                    .edges_directed(ix, petgraph::Direction::Incoming)
                    .count();
                (ix, deps)
            })
            .collect();

        let mut order = Vec::with_capacity(self.insertion.len());
        let mut emitted = vec![false; self.insertion.len()];
        while order.len() < self.insertion.len() {
            // Scan in insertion order for the next ready node; graphs here are
            // small (tens of services), so the quadratic scan is irrelevant.
            let Some((pos, &ix)) = self
                .insertion
                .iter()
                .enumerate()
                .find(|(pos, ix)| !emitted[*pos] && indegree[*ix] == 0)
            else {
                break;
            };
            emitted[pos] = true;
            order.push(self.graph[ix].id.clone());
            for edge in self.graph.edges_directed(ix, petgraph::Direction::Outgoing) {
                if let Some(d) = indegree.get_mut(&edge.target()) {
                    *d -= 1;
                }
            }
        }
        order
    }

    /// Shutdown order: dependents before their dependencies.
    #[must_use]
    pub fn reverse_topological_order(&self) -> Vec<ServiceLabel> {
        let mut order = self.topological_order();
        order.reverse();
        order
    }

    /// Transitive dependents of a node, in insertion order, excluding the
    /// node itself. Used to cascade restarts after a failure.
    #[must_use]
    pub fn dependents(&self, id: &ServiceLabel) -> Vec<ServiceLabel> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut reached = std::collections::HashSet::new();
        let mut stack = vec![start];
        while let Some(ix) = stack.pop() {
            for edge in self.graph.edges_directed(ix, petgraph::Direction::Outgoing) {
                let next = edge.target();
                if reached.insert(next) {
                    stack.push(next);
                }
            }
        }
        self.insertion
            .iter()
            .filter(|ix| **ix != start && reached.contains(*ix))
            .map(|ix| self.graph[*ix].id.clone())
            .collect()
    }

    /// A node plus its transitive dependents, in insertion order.
    #[must_use]
    pub fn subgraph_rooted(&self, id: &ServiceLabel) -> Vec<ServiceLabel> {
        let mut result = Vec::new();
        if self.contains(id) {
            result.push(id.clone());
            result.extend(self.dependents(id));
        }
        result
    }

}

/// Edge-kind rules: which dependencies are representable at all.
fn edge_permitted(dependent: ServiceType, dependency: ServiceType) -> bool {
    matches!(
        (dependent, dependency),
        (ServiceType::PortForward, ServiceType::K8sConnection)
            | (ServiceType::McpServer, ServiceType::PortForward)
            | (ServiceType::McpServer, ServiceType::K8sConnection)
    )
}
