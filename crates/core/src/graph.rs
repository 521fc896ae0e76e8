//! Execution graph attached to every agent response.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Succeeded,
    Failed,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    /// Tool invoked at this node, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Wave index for pipeline runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave: Option<usize>,
    pub status: NodeStatus,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl ExecutionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: GraphNode) {
        self.nodes.push(node);
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.edges.push(GraphEdge {
            from: from.into(),
            to: to.into(),
        });
    }

    /// Append a node and link it from the previous one.
    pub fn chain(&mut self, node: GraphNode) {
        if let Some(prev) = self.nodes.last() {
            let from = prev.id.clone();
            self.add_edge(from, node.id.clone());
        }
        self.add_node(node);
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> GraphNode {
        GraphNode {
            id: id.into(),
            label: id.into(),
            tool: None,
            wave: None,
            status: NodeStatus::Succeeded,
            duration_ms: 0,
        }
    }

    #[test]
    fn chain_links_consecutive_nodes() {
        let mut graph = ExecutionGraph::new();
        graph.chain(node("iter-1"));
        graph.chain(node("iter-2"));
        graph.chain(node("iter-3"));
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.edges[1], GraphEdge { from: "iter-2".into(), to: "iter-3".into() });
        assert!(graph.node("iter-2").is_some());
    }
}
