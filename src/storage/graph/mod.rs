//! Native graph backend.
//!
//! Assets live as key-addressed nodes of a [`GraphEngine`]; [`GraphStore`]
//! maps the [`Store`](crate::Store) contract onto engine batches.
//!
//! # Available Engines
//!
//! | Engine | Use Case | Features |
//! |--------|----------|----------|
//! | [`MemoryGraphEngine`] | Default; embedded, tests | `RwLock` state, atomic batch commits |
//!
//! # Example
//!
//! ```rust,ignore
//! use assetdb::storage::graph::{GraphStore, MemoryGraphEngine};
//! use assetdb::{AssetType, InsertInfo, OperationContext, Store};
//!
//! let store = GraphStore::new(MemoryGraphEngine::new());
//! let execution = store.insert_execution(&OperationContext::background(), &[])?;
//! let id = store.upsert(&InsertInfo::new(execution, "dns"), AssetType::Fqdn, "example.com")?;
//! ```

mod engine;
mod memory;
mod store;

pub use engine::{
    Batch, CommitOutcome, EdgeCondition, GraphEdge, GraphEngine, GraphNode, GraphSnapshot,
    NewEdge, NewNode, NodeId, NodeRef,
};
pub use memory::MemoryGraphEngine;
pub use store::{EXECUTION_KIND, GraphStore, GraphWriter, LOGGED_PREDICATE, MigrationSummary};
