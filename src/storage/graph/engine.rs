//! Native graph engine boundary.
//!
//! The graph backend talks to its engine only through [`GraphEngine`]: nodes
//! addressed by a unique string key, directed edges labelled by a predicate,
//! and atomic batch commits. Engine storage format is the engine's business.
//!
//! # Batches
//!
//! A [`Batch`] stages new nodes and edges. Staged nodes are referenced by
//! position ([`NodeRef::Staged`]) until the commit assigns real ids. On
//! commit the engine, under one write lock:
//!
//! 1. Rejects the batch if any [`NodeRef::Existing`] endpoint is missing
//! 2. Merges each staged node by key: an existing node with the same key is
//!    reused, otherwise the node is created
//! 3. Adds each edge unless an identical `(subject, predicate, object)` exists,
//!    skipping [`EdgeCondition::ObjectCreated`] edges whose object was merged
//!
//! Either every change of a batch becomes visible or none does.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Engine-assigned node identifier.
pub type NodeId = i64;

/// A stored node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Engine id.
    pub id: NodeId,
    /// Unique address, e.g. `fqdn:www.example.com`.
    pub key: String,
    /// Node kind, e.g. `fqdn` or `execution`.
    pub kind: String,
    /// Payload.
    pub properties: serde_json::Value,
    /// When the node was committed.
    pub created_at: DateTime<Utc>,
}

/// A stored directed edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Engine id.
    pub id: i64,
    /// Source node.
    pub subject: NodeId,
    /// Edge label.
    pub predicate: String,
    /// Target node.
    pub object: NodeId,
    /// Payload, kept from the first commit that adds the edge.
    pub properties: serde_json::Value,
    /// When the edge was committed.
    pub created_at: DateTime<Utc>,
}

/// Endpoint of a staged edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// A node already committed.
    Existing(NodeId),
    /// Position of a node in the same batch.
    Staged(usize),
}

/// When a staged edge is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeCondition {
    /// Always.
    #[default]
    Always,
    /// Only if the object is a staged node this commit created.
    ObjectCreated,
}

/// A node to merge by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    /// Unique address.
    pub key: String,
    /// Node kind.
    pub kind: String,
    /// Payload, kept from the first commit that creates the node.
    pub properties: serde_json::Value,
}

/// An edge to add if absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEdge {
    /// Source.
    pub subject: NodeRef,
    /// Label.
    pub predicate: String,
    /// Target.
    pub object: NodeRef,
    /// Application condition.
    pub condition: EdgeCondition,
    /// Payload. `Null` when the edge carries none.
    pub properties: serde_json::Value,
}

/// Staged writes committed atomically by [`GraphEngine::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Nodes, referenced by position.
    pub nodes: Vec<NewNode>,
    /// Edges.
    pub edges: Vec<NewEdge>,
}

impl Batch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a node and returns its reference.
    pub fn add_node(&mut self, node: NewNode) -> NodeRef {
        self.nodes.push(node);
        NodeRef::Staged(self.nodes.len() - 1)
    }

    /// Stages an edge without a payload.
    pub fn add_edge(
        &mut self,
        subject: NodeRef,
        predicate: impl Into<String>,
        object: NodeRef,
        condition: EdgeCondition,
    ) {
        self.add_edge_with(subject, predicate, object, condition, serde_json::Value::Null);
    }

    /// Stages an edge carrying `properties`.
    pub fn add_edge_with(
        &mut self,
        subject: NodeRef,
        predicate: impl Into<String>,
        object: NodeRef,
        condition: EdgeCondition,
        properties: serde_json::Value,
    ) {
        self.edges.push(NewEdge {
            subject,
            predicate: predicate.into(),
            object,
            condition,
            properties,
        });
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Result of a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Real id of each staged node, by position.
    pub node_ids: Vec<NodeId>,
    /// Whether each staged node was created (rather than merged), by position.
    pub created: Vec<bool>,
    /// Number of edges added.
    pub edges_created: usize,
}

impl CommitOutcome {
    /// Resolves a reference to its committed id.
    #[must_use]
    pub fn resolve(&self, node: NodeRef) -> Option<NodeId> {
        match node {
            NodeRef::Existing(id) => Some(id),
            NodeRef::Staged(i) => self.node_ids.get(i).copied(),
        }
    }

    /// Number of nodes created.
    #[must_use]
    pub fn nodes_created(&self) -> usize {
        self.created.iter().filter(|c| **c).count()
    }
}

/// Every node and edge of a graph, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Nodes.
    pub nodes: Vec<GraphNode>,
    /// Edges.
    pub edges: Vec<GraphEdge>,
}

/// A native graph engine.
///
/// # Implementor Notes
///
/// - Methods use `&self`; engines are shared between worker threads
/// - `commit` must be atomic and must merge nodes by key
/// - `remove_node` must remove every incident edge
pub trait GraphEngine: Send + Sync {
    /// Fetches a node by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be read.
    fn node(&self, id: NodeId) -> Result<Option<GraphNode>>;

    /// Fetches a node by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be read.
    fn node_by_key(&self, key: &str) -> Result<Option<GraphNode>>;

    /// Every node of a kind, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be read.
    fn nodes_of_kind(&self, kind: &str) -> Result<Vec<GraphNode>>;

    /// Edges leaving `id`, optionally only those with `predicate`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be read.
    fn out_edges(&self, id: NodeId, predicate: Option<&str>) -> Result<Vec<GraphEdge>>;

    /// Edges entering `id`, optionally only those with `predicate`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be read.
    fn in_edges(&self, id: NodeId, predicate: Option<&str>) -> Result<Vec<GraphEdge>>;

    /// Applies a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns an error, with nothing applied, if an existing endpoint is
    /// missing or a staged reference is out of range.
    fn commit(&self, batch: Batch) -> Result<CommitOutcome>;

    /// Removes a node and its incident edges. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be written.
    fn remove_node(&self, id: NodeId) -> Result<bool>;

    /// Copies out every node and edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be read.
    fn snapshot(&self) -> Result<GraphSnapshot>;
}
