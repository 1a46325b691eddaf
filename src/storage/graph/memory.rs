//! In-process graph engine.
//!
//! Keeps the whole graph in memory behind one `RwLock`. Reads share the lock;
//! a commit holds the write lock only while it applies an already staged batch.

use super::engine::{
    Batch, CommitOutcome, EdgeCondition, GraphEdge, GraphEngine, GraphNode, GraphSnapshot,
    NodeId, NodeRef,
};
use crate::{Error, Result};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type EdgeKey = (NodeId, String, NodeId);

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<NodeId, GraphNode>,
    keys: HashMap<String, NodeId>,
    edges: BTreeMap<i64, GraphEdge>,
    edge_keys: HashMap<EdgeKey, i64>,
    outgoing: HashMap<NodeId, BTreeSet<i64>>,
    incoming: HashMap<NodeId, BTreeSet<i64>>,
    next_node: NodeId,
    next_edge: i64,
}

impl GraphState {
    fn edges_of(
        &self,
        index: &HashMap<NodeId, BTreeSet<i64>>,
        id: NodeId,
        predicate: Option<&str>,
    ) -> Vec<GraphEdge> {
        index
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|edge_id| self.edges.get(edge_id))
            .filter(|edge| predicate.is_none_or(|p| edge.predicate == p))
            .cloned()
            .collect()
    }

    fn validate(&self, batch: &Batch) -> Result<()> {
        for edge in &batch.edges {
            for endpoint in [edge.subject, edge.object] {
                let known = match endpoint {
                    NodeRef::Existing(id) => self.nodes.contains_key(&id),
                    NodeRef::Staged(i) => i < batch.nodes.len(),
                };
                if !known {
                    return Err(Error::backend(
                        "graph_commit",
                        format!(
                            "edge '{}' references missing node {endpoint:?}",
                            edge.predicate
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// In-memory [`GraphEngine`].
///
/// # Example
///
/// ```rust,ignore
/// use assetdb::storage::graph::{GraphStore, MemoryGraphEngine};
///
/// let store = GraphStore::new(MemoryGraphEngine::new());
/// ```
#[derive(Debug, Default)]
pub struct MemoryGraphEngine {
    state: RwLock<GraphState>,
}

impl MemoryGraphEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of nodes stored.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.state.read().map(|s| s.nodes.len()).unwrap_or(0)
    }

    /// Returns the number of edges stored.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.state.read().map(|s| s.edges.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, GraphState>> {
        self.state
            .read()
            .map_err(|e| Error::backend("graph_read", e))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, GraphState>> {
        self.state
            .write()
            .map_err(|e| Error::backend("graph_write", e))
    }
}

impl GraphEngine for MemoryGraphEngine {
    fn node(&self, id: NodeId) -> Result<Option<GraphNode>> {
        Ok(self.read()?.nodes.get(&id).cloned())
    }

    fn node_by_key(&self, key: &str) -> Result<Option<GraphNode>> {
        let state = self.read()?;
        Ok(state
            .keys
            .get(key)
            .and_then(|id| state.nodes.get(id))
            .cloned())
    }

    fn nodes_of_kind(&self, kind: &str) -> Result<Vec<GraphNode>> {
        Ok(self
            .read()?
            .nodes
            .values()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect())
    }

    fn out_edges(&self, id: NodeId, predicate: Option<&str>) -> Result<Vec<GraphEdge>> {
        let state = self.read()?;
        Ok(state.edges_of(&state.outgoing, id, predicate))
    }

    fn in_edges(&self, id: NodeId, predicate: Option<&str>) -> Result<Vec<GraphEdge>> {
        let state = self.read()?;
        Ok(state.edges_of(&state.incoming, id, predicate))
    }

    fn commit(&self, batch: Batch) -> Result<CommitOutcome> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        state.validate(&batch)?;

        let now = Utc::now();
        let mut outcome = CommitOutcome {
            node_ids: Vec::with_capacity(batch.nodes.len()),
            created: Vec::with_capacity(batch.nodes.len()),
            edges_created: 0,
        };

        for node in batch.nodes {
            if let Some(&id) = state.keys.get(&node.key) {
                outcome.node_ids.push(id);
                outcome.created.push(false);
                continue;
            }
            state.next_node += 1;
            let id = state.next_node;
            state.keys.insert(node.key.clone(), id);
            state.nodes.insert(
                id,
                GraphNode {
                    id,
                    key: node.key,
                    kind: node.kind,
                    properties: node.properties,
                    created_at: now,
                },
            );
            outcome.node_ids.push(id);
            outcome.created.push(true);
        }

        for edge in batch.edges {
            if edge.condition == EdgeCondition::ObjectCreated {
                let created = match edge.object {
                    NodeRef::Staged(i) => outcome.created.get(i).copied().unwrap_or(false),
                    NodeRef::Existing(_) => false,
                };
                if !created {
                    continue;
                }
            }
            let (Some(subject), Some(object)) =
                (outcome.resolve(edge.subject), outcome.resolve(edge.object))
            else {
                continue;
            };

            let key = (subject, edge.predicate, object);
            if state.edge_keys.contains_key(&key) {
                continue;
            }
            state.next_edge += 1;
            let id = state.next_edge;
            state.edges.insert(
                id,
                GraphEdge {
                    id,
                    subject,
                    predicate: key.1.clone(),
                    object,
                    properties: edge.properties,
                    created_at: now,
                },
            );
            state.edge_keys.insert(key, id);
            state.outgoing.entry(subject).or_default().insert(id);
            state.incoming.entry(object).or_default().insert(id);
            outcome.edges_created += 1;
        }

        Ok(outcome)
    }

    fn remove_node(&self, id: NodeId) -> Result<bool> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let Some(node) = state.nodes.remove(&id) else {
            return Ok(false);
        };
        state.keys.remove(&node.key);

        let incident: BTreeSet<i64> = state
            .outgoing
            .remove(&id)
            .into_iter()
            .chain(state.incoming.remove(&id))
            .flatten()
            .collect();
        for edge_id in incident {
            if let Some(edge) = state.edges.remove(&edge_id) {
                state
                    .edge_keys
                    .remove(&(edge.subject, edge.predicate, edge.object));
                if let Some(out) = state.outgoing.get_mut(&edge.subject) {
                    out.remove(&edge_id);
                }
                if let Some(inc) = state.incoming.get_mut(&edge.object) {
                    inc.remove(&edge_id);
                }
            }
        }
        Ok(true)
    }

    fn snapshot(&self) -> Result<GraphSnapshot> {
        let state = self.read()?;
        Ok(GraphSnapshot {
            nodes: state.nodes.values().cloned().collect(),
            edges: state.edges.values().cloned().collect(),
        })
    }
}
