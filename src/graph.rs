// src/graph.rs

use std::collections::HashMap;

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::Dfs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Node kinds, a closed set: anything else is rejected when the definition
/// is deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Auto-emitted text; traversal walks straight through it.
    Message,
    /// Waits for a reply matching `text` before the flow advances.
    Response,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FlowNode {
    pub id: String,
    pub kind: NodeKind,
    pub text: String,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, kind: NodeKind, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            text: text.into(),
        }
    }
}

/// Declaration order of edges is significant: the first edge out of a node
/// is its successor, and the first matching Response child wins ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FlowEdge {
    pub source: String,
    pub target: String,
}

impl FlowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildMode {
    Direct,
    Recursive,
}

/// Read-only view over a bot's nodes and edges. The first node in the node
/// list is the entry point. The graph is replaced wholesale when a bot is
/// edited; sessions pointing at vanished nodes are tolerated by answering
/// every query about an unknown id with an empty result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FlowGraph {
    #[serde(default)]
    nodes: Vec<FlowNode>,
    #[serde(default)]
    edges: Vec<FlowEdge>,

    #[serde(skip)]
    #[schemars(skip)]
    graph: StableDiGraph<usize, ()>,
    #[serde(skip)]
    #[schemars(skip)]
    index_of: HashMap<String, NodeIndex>,
}

impl PartialEq for FlowGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.edges == other.edges
        // graph and index_of are derived
    }
}

impl FlowGraph {
    pub fn new(nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) -> Self {
        Self {
            nodes,
            edges,
            graph: StableDiGraph::new(),
            index_of: HashMap::new(),
        }
        .build()
    }

    /// Build the internal graph and id index. Must run after deserialization;
    /// duplicate ids keep their first occurrence, edges referencing unknown
    /// ids are skipped.
    pub fn build(mut self) -> Self {
        let mut graph = StableDiGraph::new();
        let mut index_of: HashMap<String, NodeIndex> = HashMap::new();

        for (pos, node) in self.nodes.iter().enumerate() {
            index_of
                .entry(node.id.clone())
                .or_insert_with(|| graph.add_node(pos));
        }
        for edge in &self.edges {
            if let (Some(&source), Some(&target)) =
                (index_of.get(&edge.source), index_of.get(&edge.target))
            {
                graph.add_edge(source, target, ());
            }
        }

        self.graph = graph;
        self.index_of = index_of;
        self
    }

    /// The entry point: node at index 0.
    pub fn root(&self) -> Option<&FlowNode> {
        self.nodes.first()
    }

    pub fn node(&self, node_id: &str) -> Option<&FlowNode> {
        self.index_of
            .get(node_id)
            .and_then(|ix| self.graph.node_weight(*ix))
            .and_then(|&pos| self.nodes.get(pos))
    }

    pub fn nodes(&self) -> &[FlowNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[FlowEdge] {
        &self.edges
    }

    /// Children of a node. `Direct` preserves edge declaration order;
    /// `Recursive` is the depth-first reachable set including the start node,
    /// each node visited once, so cycles produce a finite set.
    pub fn children(&self, node_id: &str, mode: ChildMode) -> Vec<&FlowNode> {
        match mode {
            ChildMode::Direct => self
                .edges
                .iter()
                .filter(|edge| edge.source == node_id)
                .filter_map(|edge| self.node(&edge.target))
                .collect(),
            ChildMode::Recursive => {
                let Some(&start) = self.index_of.get(node_id) else {
                    return Vec::new();
                };
                let mut dfs = Dfs::new(&self.graph, start);
                let mut reachable = Vec::new();
                while let Some(ix) = dfs.next(&self.graph) {
                    if let Some(&pos) = self.graph.node_weight(ix) {
                        if let Some(node) = self.nodes.get(pos) {
                            reachable.push(node);
                        }
                    }
                }
                reachable
            }
        }
    }

    /// The unique successor used for message sequencing: the first direct
    /// child, or `None` at a dead end. More than one outgoing edge from a
    /// Message node is outside the engine's contract; the first edge wins.
    pub fn next(&self, node_id: &str) -> Option<&FlowNode> {
        self.children(node_id, ChildMode::Direct).into_iter().next()
    }

    /// Non-fatal diagnostics for the definition tooling.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.nodes.is_empty() {
            problems.push("flow has no nodes; the first node is the entry point".to_string());
        }
        for edge in &self.edges {
            if !self.index_of.contains_key(&edge.source) {
                problems.push(format!("edge references unknown source `{}`", edge.source));
            }
            if !self.index_of.contains_key(&edge.target) {
                problems.push(format!("edge references unknown target `{}`", edge.target));
            }
        }
        for node in &self.nodes {
            if node.kind == NodeKind::Response
                && self.children(&node.id, ChildMode::Direct).is_empty()
            {
                problems.push(format!(
                    "response node `{}` has no children; the conversation ends there",
                    node.id
                ));
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlowGraph {
        FlowGraph::new(
            vec![
                FlowNode::new("start", NodeKind::Message, "Hi"),
                FlowNode::new("ask", NodeKind::Message, "Continue?"),
                FlowNode::new("yes", NodeKind::Response, "yes"),
                FlowNode::new("no", NodeKind::Response, "no"),
                FlowNode::new("bye", NodeKind::Message, "Bye"),
            ],
            vec![
                FlowEdge::new("start", "ask"),
                FlowEdge::new("ask", "yes"),
                FlowEdge::new("ask", "no"),
                FlowEdge::new("yes", "bye"),
            ],
        )
    }

    #[test]
    fn test_root_is_first_node() {
        let graph = sample();
        assert_eq!(graph.root().unwrap().id, "start");
        assert!(FlowGraph::new(vec![], vec![]).root().is_none());
    }

    #[test]
    fn test_direct_children_preserve_edge_order() {
        let graph = sample();
        let ids: Vec<&str> = graph
            .children("ask", ChildMode::Direct)
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(ids, vec!["yes", "no"]);
    }

    #[test]
    fn test_recursive_children_include_start_and_all_reachable() {
        let graph = sample();
        let mut ids: Vec<&str> = graph
            .children("ask", ChildMode::Recursive)
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["ask", "bye", "no", "yes"]);
    }

    #[test]
    fn test_recursive_children_terminate_on_cycles() {
        let graph = FlowGraph::new(
            vec![
                FlowNode::new("a", NodeKind::Message, "a"),
                FlowNode::new("b", NodeKind::Message, "b"),
            ],
            vec![FlowEdge::new("a", "b"), FlowEdge::new("b", "a")],
        );
        let mut ids: Vec<&str> = graph
            .children("a", ChildMode::Recursive)
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_next_takes_first_edge() {
        let graph = sample();
        assert_eq!(graph.next("ask").unwrap().id, "yes");
        assert!(graph.next("bye").is_none());
    }

    #[test]
    fn test_unknown_id_yields_empty() {
        let graph = sample();
        assert!(graph.children("ghost", ChildMode::Direct).is_empty());
        assert!(graph.children("ghost", ChildMode::Recursive).is_empty());
        assert!(graph.next("ghost").is_none());
        assert!(graph.node("ghost").is_none());
    }

    #[test]
    fn test_dangling_edges_are_skipped() {
        let graph = FlowGraph::new(
            vec![FlowNode::new("a", NodeKind::Message, "a")],
            vec![FlowEdge::new("a", "missing"), FlowEdge::new("ghost", "a")],
        );
        assert!(graph.next("a").is_none());
        let problems = graph.validate();
        assert!(problems.iter().any(|p| p.contains("unknown target `missing`")));
        assert!(problems.iter().any(|p| p.contains("unknown source `ghost`")));
    }

    #[test]
    fn test_validate_flags_childless_response() {
        let graph = FlowGraph::new(
            vec![
                FlowNode::new("a", NodeKind::Message, "a"),
                FlowNode::new("r", NodeKind::Response, "ok"),
            ],
            vec![FlowEdge::new("a", "r")],
        );
        let problems = graph.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("response node `r`"));
    }

    #[test]
    fn test_unknown_kind_is_rejected_at_load() {
        let json = r#"{"nodes":[{"id":"x","kind":"script","text":"boom"}],"edges":[]}"#;
        assert!(serde_json::from_str::<FlowGraph>(json).is_err());
    }

    #[test]
    fn test_deserialized_graph_answers_after_build() {
        let json = r#"{
            "nodes": [
                {"id": "start", "kind": "message", "text": "Hi"},
                {"id": "ask", "kind": "message", "text": "Continue?"}
            ],
            "edges": [{"source": "start", "target": "ask"}]
        }"#;
        let graph: FlowGraph = serde_json::from_str(json).unwrap();
        let graph = graph.build();
        assert_eq!(graph.next("start").unwrap().id, "ask");
    }
}
