//! Backend selection.
//!
//! [`open_store`] turns a [`DatabaseConfig`] into a [`Backend`], the closed
//! set of stores this crate ships. Nothing is connected until first use.

use super::graph::GraphStore;
use super::sqlite::SqliteStore;
use super::traits::Store;
use crate::config::{BackendKind, DatabaseConfig};
use crate::models::{
    Asset, AssetId, AssetType, Execution, ExecutionId, ExecutionLog, InsertInfo, NameAddrPair,
    Record, Relation,
};
use crate::{OperationContext, Result};

/// A configured store.
pub enum Backend {
    /// Relational emulation on `SQLite`.
    Relational(SqliteStore),
    /// Native graph engine.
    Graph(GraphStore),
}

impl Backend {
    /// The backend variant.
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Relational(_) => BackendKind::Relational,
            Self::Graph(_) => BackendKind::Graph,
        }
    }

    /// The relational store, if that is the configured backend.
    #[must_use]
    pub const fn as_relational(&self) -> Option<&SqliteStore> {
        match self {
            Self::Relational(store) => Some(store),
            Self::Graph(_) => None,
        }
    }

    /// The graph store, if that is the configured backend.
    #[must_use]
    pub const fn as_graph(&self) -> Option<&GraphStore> {
        match self {
            Self::Graph(store) => Some(store),
            Self::Relational(_) => None,
        }
    }

    fn store(&self) -> &dyn Store {
        match self {
            Self::Relational(store) => store,
            Self::Graph(store) => store,
        }
    }
}

/// Creates the store named by `config.system`.
///
/// # Example
///
/// ```rust,ignore
/// use assetdb::{DatabaseConfig, Store, open_store};
///
/// let store = open_store(&DatabaseConfig::sqlite("assets.sqlite"))?;
/// store.create_database_if_not_exists()?;
/// store.run_migrations()?;
/// ```
///
/// # Errors
///
/// Returns an error if the backend cannot be constructed from the config.
pub fn open_store(config: &DatabaseConfig) -> Result<Backend> {
    let backend = match config.system {
        BackendKind::Relational => Backend::Relational(SqliteStore::new(config)),
        BackendKind::Graph => Backend::Graph(GraphStore::in_memory(config)),
    };
    tracing::debug!(system = %config.system, "Opened store");
    Ok(backend)
}

impl Store for Backend {
    fn upsert(&self, info: &InsertInfo, asset_type: AssetType, raw: &str) -> Result<AssetId> {
        self.store().upsert(info, asset_type, raw)
    }

    fn insert_record(&self, info: &InsertInfo, record: &Record) -> Result<()> {
        self.store().insert_record(info, record)
    }

    fn insert_execution(&self, ctx: &OperationContext, domains: &[String]) -> Result<ExecutionId> {
        self.store().insert_execution(ctx, domains)
    }

    fn is_cname_node(&self, ctx: &OperationContext, name: &str) -> Result<bool> {
        self.store().is_cname_node(ctx, name)
    }

    fn event_fqdns(&self, ctx: &OperationContext, execution: ExecutionId) -> Result<Vec<String>> {
        self.store().event_fqdns(ctx, execution)
    }

    fn names_to_addrs(
        &self,
        ctx: &OperationContext,
        execution: ExecutionId,
        names: &[String],
    ) -> Result<Vec<NameAddrPair>> {
        self.store().names_to_addrs(ctx, execution, names)
    }

    fn asset(&self, ctx: &OperationContext, id: AssetId) -> Result<Option<Asset>> {
        self.store().asset(ctx, id)
    }

    fn assets_by_type(&self, ctx: &OperationContext, asset_type: AssetType) -> Result<Vec<Asset>> {
        self.store().assets_by_type(ctx, asset_type)
    }

    fn relations_from(&self, ctx: &OperationContext, id: AssetId) -> Result<Vec<Relation>> {
        self.store().relations_from(ctx, id)
    }

    fn execution(&self, ctx: &OperationContext, id: ExecutionId) -> Result<Option<Execution>> {
        self.store().execution(ctx, id)
    }

    fn execution_logs(&self, ctx: &OperationContext, id: ExecutionId) -> Result<Vec<ExecutionLog>> {
        self.store().execution_logs(ctx, id)
    }

    fn node_sources(
        &self,
        ctx: &OperationContext,
        asset: AssetId,
        execution: ExecutionId,
    ) -> Result<Vec<String>> {
        self.store().node_sources(ctx, asset, execution)
    }

    fn delete_execution(&self, ctx: &OperationContext, execution: ExecutionId) -> Result<bool> {
        self.store().delete_execution(ctx, execution)
    }

    fn delete_asset(&self, ctx: &OperationContext, id: AssetId) -> Result<bool> {
        self.store().delete_asset(ctx, id)
    }

    fn create_database_if_not_exists(&self) -> Result<()> {
        self.store().create_database_if_not_exists()
    }

    fn drop_database(&self) -> Result<()> {
        self.store().drop_database()
    }

    fn is_database_created(&self) -> Result<bool> {
        self.store().is_database_created()
    }

    fn run_init_migration(&self) -> Result<usize> {
        self.store().run_init_migration()
    }

    fn run_migrations(&self) -> Result<usize> {
        self.store().run_migrations()
    }

    fn pending_migrations_count(&self) -> Result<usize> {
        self.store().pending_migrations_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_store_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        let relational = open_store(&DatabaseConfig::sqlite(dir.path().join("a.sqlite"))).unwrap();
        assert_eq!(relational.kind(), BackendKind::Relational);
        assert!(relational.as_relational().is_some());
        assert!(relational.as_graph().is_none());

        let graph = open_store(&DatabaseConfig::graph()).unwrap();
        assert_eq!(graph.kind(), BackendKind::Graph);
        assert!(graph.as_graph().is_some());
    }

    #[test]
    fn test_backend_delegates_writes() {
        let store = open_store(&DatabaseConfig::graph()).unwrap();
        let ctx = OperationContext::background();
        let execution = store.insert_execution(&ctx, &[]).unwrap();
        let info = InsertInfo::new(execution, "test");

        let id = store.upsert(&info, AssetType::Ip, "192.0.2.7").unwrap();
        let asset = store.asset(&ctx, id).unwrap().unwrap();
        assert_eq!(asset.asset_type(), AssetType::Ip);
        assert_eq!(store.assets_by_type(&ctx, AssetType::Ip).unwrap().len(), 1);
    }
}
