//! The bipartite binding-graph container
//!
//! `BindingGraph` owns the node set, the directed adjacency, and the mutable
//! per-node attributes. Nodes are deduplicated by structural identity and
//! never deleted; all mutation after construction happens on attributes.
//!
//! Edges strictly alternate families: task-like -> file-like or
//! file-like -> task-like, with the single exception of the out-file ->
//! in-file propagation edge between two file slots.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::{BindingError, Result};
use crate::nodes::{FileAttrs, FileNode, Node, NodeFamily, TaskAttrs, TaskNode};

/// Index of a node within a `BindingGraph`
///
/// Indices are assigned in insertion order and are stable for the lifetime
/// of the graph.
pub type NodeIndex = usize;

/// Per-slot attribute storage, matching the node family
#[derive(Debug, Clone)]
enum NodeAttrs {
    Task(TaskAttrs),
    File(FileAttrs),
}

/// A directed bipartite graph of task-like and file-like nodes
#[derive(Debug, Clone, Default)]
pub struct BindingGraph {
    nodes: Vec<Node>,
    index: HashMap<Node, NodeIndex>,
    outgoing: Vec<Vec<NodeIndex>>,
    incoming: Vec<Vec<NodeIndex>>,
    attrs: Vec<NodeAttrs>,
}

impl BindingGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.outgoing.iter().map(|v| v.len()).sum()
    }

    /// Add a node, deduplicating by structural identity
    ///
    /// Default attributes for the node's family are seeded on first
    /// insertion, so nodes grafted after construction are initialized the
    /// same way as built ones.
    pub fn add_node(&mut self, node: impl Into<Node>) -> NodeIndex {
        let node = node.into();
        if let Some(&idx) = self.index.get(&node) {
            return idx;
        }
        let idx = self.nodes.len();
        let attrs = match node.family() {
            NodeFamily::TaskLike => NodeAttrs::Task(TaskAttrs::default()),
            NodeFamily::FileLike => NodeAttrs::File(FileAttrs::default()),
        };
        self.index.insert(node.clone(), idx);
        self.nodes.push(node);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        self.attrs.push(attrs);
        idx
    }

    /// Add a directed edge between two existing nodes
    ///
    /// Repeated edges are deduplicated. Edges between two task-like nodes
    /// are rejected; between two file-like nodes only out-file -> in-file
    /// propagation edges are allowed.
    pub fn add_edge(&mut self, u: NodeIndex, v: NodeIndex) -> Result<()> {
        self.check_index(u)?;
        self.check_index(v)?;
        if u == v {
            return Err(BindingError::graph(format!(
                "self edge on node {}",
                self.nodes[u]
            )));
        }
        match (&self.nodes[u], &self.nodes[v]) {
            (Node::Task(_), Node::Task(_)) => {
                return Err(BindingError::graph(format!(
                    "edge between two task-like nodes: {} -> {}",
                    self.nodes[u], self.nodes[v]
                )));
            }
            (Node::File(a), Node::File(b)) => {
                if a.is_input() || !b.is_input() {
                    return Err(BindingError::graph(format!(
                        "file-to-file edges must run out-file -> in-file: {} -> {}",
                        self.nodes[u], self.nodes[v]
                    )));
                }
            }
            _ => {}
        }
        if self.outgoing[u].contains(&v) {
            return Ok(());
        }
        self.outgoing[u].push(v);
        self.incoming[v].push(u);
        Ok(())
    }

    fn check_index(&self, n: NodeIndex) -> Result<()> {
        if n < self.nodes.len() {
            Ok(())
        } else {
            Err(BindingError::graph(format!(
                "node index {} out of bounds ({} nodes)",
                n,
                self.nodes.len()
            )))
        }
    }

    /// The node at `idx`
    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx]
    }

    /// Look up the index of a node by identity
    pub fn node_index(&self, node: &Node) -> Option<NodeIndex> {
        self.index.get(node).copied()
    }

    /// Whether the graph contains a node with this identity
    pub fn contains(&self, node: &Node) -> bool {
        self.index.contains_key(node)
    }

    /// Direct predecessors of a node, in edge insertion order
    pub fn predecessors(&self, idx: NodeIndex) -> &[NodeIndex] {
        &self.incoming[idx]
    }

    /// Direct successors of a node, in edge insertion order
    pub fn successors(&self, idx: NodeIndex) -> &[NodeIndex] {
        &self.outgoing[idx]
    }

    /// In-degree of a node
    pub fn in_degree(&self, idx: NodeIndex) -> usize {
        self.incoming[idx].len()
    }

    /// Out-degree of a node
    pub fn out_degree(&self, idx: NodeIndex) -> usize {
        self.outgoing[idx].len()
    }

    /// All node indices in insertion order
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        0..self.nodes.len()
    }

    /// All edges as (source, target) pairs
    pub fn edges(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex)> + '_ {
        self.outgoing
            .iter()
            .enumerate()
            .flat_map(|(u, vs)| vs.iter().map(move |&v| (u, v)))
    }

    /// Topological order over all nodes
    ///
    /// Kahn's algorithm with the ready set ordered by insertion index, so
    /// ties always break the same way. Fails if the graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>> {
        let mut in_degree: Vec<usize> = self.incoming.iter().map(|v| v.len()).collect();
        let mut ready: BTreeSet<NodeIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(n) = ready.pop_first() {
            order.push(n);
            for &m in &self.outgoing[n] {
                in_degree[m] -= 1;
                if in_degree[m] == 0 {
                    ready.insert(m);
                }
            }
        }

        if order.len() < self.nodes.len() {
            return Err(BindingError::graph("cycle detected".to_string()));
        }
        Ok(order)
    }

    /// Task-like node indices in topological order
    pub fn task_nodes(&self) -> Result<Vec<NodeIndex>> {
        let order = self.topological_order()?;
        Ok(order
            .into_iter()
            .filter(|&i| matches!(self.nodes[i], Node::Task(_)))
            .collect())
    }

    /// File-like node indices in topological order
    pub fn file_nodes(&self) -> Result<Vec<NodeIndex>> {
        let order = self.topological_order()?;
        Ok(order
            .into_iter()
            .filter(|&i| matches!(self.nodes[i], Node::File(_)))
            .collect())
    }

    /// Entry-point node indices, in insertion order
    pub fn entry_point_nodes(&self) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n, Node::Task(TaskNode::EntryPoint { .. })))
            .map(|(i, _)| i)
            .collect()
    }

    /// Entry-output file node indices, in insertion order
    pub fn entry_out_nodes(&self) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n, Node::File(FileNode::EntryOut { .. })))
            .map(|(i, _)| i)
            .collect()
    }

    /// Attributes of a file-like node
    pub fn file_attrs(&self, idx: NodeIndex) -> Option<&FileAttrs> {
        match &self.attrs[idx] {
            NodeAttrs::File(a) => Some(a),
            NodeAttrs::Task(_) => None,
        }
    }

    /// Mutable attributes of a file-like node
    pub fn file_attrs_mut(&mut self, idx: NodeIndex) -> Option<&mut FileAttrs> {
        match &mut self.attrs[idx] {
            NodeAttrs::File(a) => Some(a),
            NodeAttrs::Task(_) => None,
        }
    }

    /// Attributes of a task-like node
    pub fn task_attrs(&self, idx: NodeIndex) -> Option<&TaskAttrs> {
        match &self.attrs[idx] {
            NodeAttrs::Task(a) => Some(a),
            NodeAttrs::File(_) => None,
        }
    }

    /// Mutable attributes of a task-like node
    pub fn task_attrs_mut(&mut self, idx: NodeIndex) -> Option<&mut TaskAttrs> {
        match &mut self.attrs[idx] {
            NodeAttrs::Task(a) => Some(a),
            NodeAttrs::File(_) => None,
        }
    }
}

impl fmt::Display for BindingGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tasks = self
            .nodes
            .iter()
            .filter(|n| matches!(n, Node::Task(_)))
            .count();
        let files = self.nodes.len() - tasks;
        let entry_points = self.entry_point_nodes().len();
        write!(
            f,
            "<BindingGraph tasks:{} files:{} entry-points:{} nodes:{} edges:{}>",
            tasks,
            files,
            entry_points,
            self.node_count(),
            self.edge_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileType;

    fn txt() -> FileType {
        FileType::new("pipewright.files.txt", "file", "txt")
    }

    fn task(id: &str, instance: u32) -> TaskNode {
        TaskNode::Task {
            task_id: id.to_string(),
            instance_id: instance,
        }
    }

    fn in_file(id: &str, instance: u32, index: usize) -> FileNode {
        FileNode::In {
            task_id: id.to_string(),
            instance_id: instance,
            index,
            file_type: txt(),
        }
    }

    fn out_file(id: &str, instance: u32, index: usize) -> FileNode {
        FileNode::Out {
            task_id: id.to_string(),
            instance_id: instance,
            index,
            file_type: txt(),
        }
    }

    #[test]
    fn test_add_node_dedups_by_identity() {
        let mut g = BindingGraph::new();
        let a = g.add_node(task("pipewright.tasks.t1", 0));
        let b = g.add_node(task("pipewright.tasks.t1", 0));
        let c = g.add_node(task("pipewright.tasks.t1", 1));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn test_add_edge_rejects_task_to_task() {
        let mut g = BindingGraph::new();
        let a = g.add_node(task("pipewright.tasks.t1", 0));
        let b = g.add_node(task("pipewright.tasks.t2", 0));
        assert!(g.add_edge(a, b).is_err());
    }

    #[test]
    fn test_add_edge_allows_out_file_to_in_file() {
        let mut g = BindingGraph::new();
        let o = g.add_node(out_file("pipewright.tasks.t1", 0, 0));
        let i = g.add_node(in_file("pipewright.tasks.t2", 0, 0));
        assert!(g.add_edge(o, i).is_ok());
        // the reverse direction is not a propagation edge
        assert!(g.add_edge(i, o).is_err());
    }

    #[test]
    fn test_add_edge_dedups() {
        let mut g = BindingGraph::new();
        let t = g.add_node(task("pipewright.tasks.t1", 0));
        let f = g.add_node(out_file("pipewright.tasks.t1", 0, 0));
        g.add_edge(t, f).unwrap();
        g.add_edge(t, f).unwrap();
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.out_degree(t), 1);
        assert_eq!(g.in_degree(f), 1);
    }

    #[test]
    fn test_topological_order_linear_chain() {
        let mut g = BindingGraph::new();
        let t1 = g.add_node(task("pipewright.tasks.t1", 0));
        let o1 = g.add_node(out_file("pipewright.tasks.t1", 0, 0));
        let i2 = g.add_node(in_file("pipewright.tasks.t2", 0, 0));
        let t2 = g.add_node(task("pipewright.tasks.t2", 0));
        g.add_edge(t1, o1).unwrap();
        g.add_edge(o1, i2).unwrap();
        g.add_edge(i2, t2).unwrap();

        let order = g.topological_order().unwrap();
        assert_eq!(order, vec![t1, o1, i2, t2]);
        assert_eq!(g.task_nodes().unwrap(), vec![t1, t2]);
        assert_eq!(g.file_nodes().unwrap(), vec![o1, i2]);
    }

    #[test]
    fn test_topological_order_detects_cycle() {
        let mut g = BindingGraph::new();
        let t1 = g.add_node(task("pipewright.tasks.t1", 0));
        let o1 = g.add_node(out_file("pipewright.tasks.t1", 0, 0));
        let i1 = g.add_node(in_file("pipewright.tasks.t1", 0, 0));
        g.add_edge(t1, o1).unwrap();
        g.add_edge(o1, i1).unwrap();
        g.add_edge(i1, t1).unwrap();
        assert!(g.topological_order().is_err());
    }

    #[test]
    fn test_attrs_seeded_on_insert() {
        let mut g = BindingGraph::new();
        let t = g.add_node(task("pipewright.tasks.t1", 0));
        let f = g.add_node(in_file("pipewright.tasks.t1", 0, 0));
        assert!(g.task_attrs(t).is_some());
        assert!(g.file_attrs(t).is_none());
        let fa = g.file_attrs(f).unwrap();
        assert!(!fa.is_resolved);
        assert!(fa.path.is_none());
    }

    #[test]
    fn test_bipartite_edges_property() {
        let mut g = BindingGraph::new();
        let t1 = g.add_node(task("pipewright.tasks.t1", 0));
        let o1 = g.add_node(out_file("pipewright.tasks.t1", 0, 0));
        let i2 = g.add_node(in_file("pipewright.tasks.t2", 0, 0));
        let t2 = g.add_node(task("pipewright.tasks.t2", 0));
        g.add_edge(t1, o1).unwrap();
        g.add_edge(o1, i2).unwrap();
        g.add_edge(i2, t2).unwrap();

        for (u, v) in g.edges() {
            let same_family = g.node(u).family() == g.node(v).family();
            if same_family {
                // only out-file -> in-file propagation edges may stay in-family
                let ok = matches!(g.node(u), Node::File(f) if !f.is_input())
                    && matches!(g.node(v), Node::File(f) if f.is_input());
                assert!(ok, "unexpected same-family edge {} -> {}", u, v);
            }
        }
    }

    #[test]
    fn test_display_summary() {
        let mut g = BindingGraph::new();
        g.add_node(task("pipewright.tasks.t1", 0));
        g.add_node(out_file("pipewright.tasks.t1", 0, 0));
        let s = g.to_string();
        assert!(s.contains("tasks:1"));
        assert!(s.contains("files:1"));
    }
}
