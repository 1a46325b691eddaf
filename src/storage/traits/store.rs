//! The asset store contract.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Features |
//! |---------|----------|----------|
//! | `SqliteStore` | Default; embedded | Identity indexes, migrations, connection pool |
//! | `GraphStore` | Native graph engine | Key-addressed nodes, staged atomic commits |
//!
//! # Error Modes and Guarantees
//!
//! Every write (`upsert`, `insert_*`) is one transactional unit: all of its
//! nodes, edges and execution logs are committed together or not at all.
//!
//! | Error | Raised When |
//! |-------|-------------|
//! | `InvalidInput` | A field of the record does not normalize; nothing is written |
//! | `OperationFailed` | The backend failed; the transaction was rolled back |
//! | `Cancelled` | The context expired mid-operation; the transaction was rolled back |
//!
//! Lifecycle operations only have meaning for the relational backend; the
//! graph backend reports success without doing anything.

use crate::models::{
    Asset, AssetId, AssetType, DnsRecord, Execution, ExecutionId, ExecutionLog, HostRecord,
    Infrastructure, InsertInfo, NameAddrPair, NameRecordKind, Record, Relation, ServiceRecord,
};
use crate::{OperationContext, Result};

/// Capability contract shared by every backend.
///
/// # Implementor Notes
///
/// - Methods use `&self` so a store can be shared across worker threads
/// - Implement `upsert` and `insert_record`; the per-kind inserts delegate to it
/// - Check the operation context before each storage step
pub trait Store: Send + Sync {
    // ========================================================================
    // Writes
    // ========================================================================

    /// Normalizes `raw` as an `asset_type` node and returns its id, creating
    /// it (and its execution log) if no node with the same identity exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the input does not normalize or storage fails.
    fn upsert(&self, info: &InsertInfo, asset_type: AssetType, raw: &str) -> Result<AssetId>;

    /// Stores the nodes and edges of one discovered record atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if any field does not normalize or storage fails.
    fn insert_record(&self, info: &InsertInfo, record: &Record) -> Result<()>;

    /// Stores an A record: fqdn `a_record` ip.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not IPv4 or storage fails.
    fn insert_a(&self, info: &InsertInfo, record: &HostRecord) -> Result<()> {
        self.insert_record(info, &Record::A(record.clone()))
    }

    /// Stores an AAAA record: fqdn `aaaa_record` ip.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not IPv6 or storage fails.
    fn insert_aaaa(&self, info: &InsertInfo, record: &HostRecord) -> Result<()> {
        self.insert_record(info, &Record::Aaaa(record.clone()))
    }

    /// Stores a CNAME record: owner `cname_record` target.
    ///
    /// # Errors
    ///
    /// Returns an error if either name does not normalize or storage fails.
    fn insert_cname(&self, info: &InsertInfo, record: &DnsRecord) -> Result<()> {
        self.insert_record(info, &Record::Name(NameRecordKind::Cname, record.clone()))
    }

    /// Stores a PTR record: owner `ptr_record` target.
    ///
    /// # Errors
    ///
    /// Returns an error if either name does not normalize or storage fails.
    fn insert_ptr(&self, info: &InsertInfo, record: &DnsRecord) -> Result<()> {
        self.insert_record(info, &Record::Name(NameRecordKind::Ptr, record.clone()))
    }

    /// Stores an NS record: owner `ns_record` target.
    ///
    /// # Errors
    ///
    /// Returns an error if either name does not normalize or storage fails.
    fn insert_ns(&self, info: &InsertInfo, record: &DnsRecord) -> Result<()> {
        self.insert_record(info, &Record::Name(NameRecordKind::Ns, record.clone()))
    }

    /// Stores an MX record: owner `mx_record` target.
    ///
    /// # Errors
    ///
    /// Returns an error if either name does not normalize or storage fails.
    fn insert_mx(&self, info: &InsertInfo, record: &DnsRecord) -> Result<()> {
        self.insert_record(info, &Record::Name(NameRecordKind::Mx, record.clone()))
    }

    /// Stores an SRV record: service `service` fqdn, service `srv_record` target.
    ///
    /// # Errors
    ///
    /// Returns an error if any name does not normalize or storage fails.
    fn insert_srv(&self, info: &InsertInfo, record: &ServiceRecord) -> Result<()> {
        self.insert_record(info, &Record::Srv(record.clone()))
    }

    /// Stores a routing announcement: netblock `contains` ip, as `announces`
    /// netblock, as `managed_by` rirorg.
    ///
    /// # Errors
    ///
    /// Returns an error if any field does not normalize or storage fails.
    fn insert_infrastructure(&self, info: &InsertInfo, record: &Infrastructure) -> Result<()> {
        self.insert_record(info, &Record::Infrastructure(record.clone()))
    }

    /// Starts a discovery run over the given seed domains.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn insert_execution(&self, ctx: &OperationContext, domains: &[String]) -> Result<ExecutionId>;

    // ========================================================================
    // Queries
    // ========================================================================

    /// Whether the named fqdn node has an outgoing `cname_record` edge.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn is_cname_node(&self, ctx: &OperationContext, name: &str) -> Result<bool>;

    /// Names of the fqdn nodes first discovered by `execution`.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn event_fqdns(&self, ctx: &OperationContext, execution: ExecutionId) -> Result<Vec<String>>;

    /// Name/address pairs over `a_record` and `aaaa_record` edges.
    ///
    /// With `names` empty, resolves the fqdns logged under `execution`.
    /// A name that does not normalize matches no node and contributes no pair.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn names_to_addrs(
        &self,
        ctx: &OperationContext,
        execution: ExecutionId,
        names: &[String],
    ) -> Result<Vec<NameAddrPair>>;

    /// Fetches one node.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn asset(&self, ctx: &OperationContext, id: AssetId) -> Result<Option<Asset>>;

    /// Every node of one type, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn assets_by_type(&self, ctx: &OperationContext, asset_type: AssetType) -> Result<Vec<Asset>>;

    /// Outgoing edges of a node.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn relations_from(&self, ctx: &OperationContext, id: AssetId) -> Result<Vec<Relation>>;

    /// Fetches one discovery run.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn execution(&self, ctx: &OperationContext, id: ExecutionId) -> Result<Option<Execution>>;

    /// Provenance rows of a run, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn execution_logs(&self, ctx: &OperationContext, id: ExecutionId) -> Result<Vec<ExecutionLog>>;

    /// Data sources that reported `asset` during `execution`, sorted.
    ///
    /// Empty when the run did not first discover the node.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn node_sources(
        &self,
        ctx: &OperationContext,
        asset: AssetId,
        execution: ExecutionId,
    ) -> Result<Vec<String>>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Deletes a run and its execution logs. Nodes are kept.
    ///
    /// Returns whether the run existed.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn delete_execution(&self, ctx: &OperationContext, execution: ExecutionId) -> Result<bool>;

    /// Deletes a node together with its edges and execution logs.
    ///
    /// Returns whether the node existed.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn delete_asset(&self, ctx: &OperationContext, id: AssetId) -> Result<bool>;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Creates the backing database if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    fn create_database_if_not_exists(&self) -> Result<()> {
        Ok(())
    }

    /// Removes the backing database and everything in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be removed.
    fn drop_database(&self) -> Result<()> {
        Ok(())
    }

    /// Whether the backing database exists.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    fn is_database_created(&self) -> Result<bool> {
        Ok(true)
    }

    /// Applies every migration, but only on a schema with none applied.
    /// Returns the number applied.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MigrationFailed`] if a migration fails.
    fn run_init_migration(&self) -> Result<usize> {
        Ok(0)
    }

    /// Applies pending migrations. Returns the number applied.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MigrationFailed`] if a migration fails.
    fn run_migrations(&self) -> Result<usize> {
        Ok(0)
    }

    /// Number of migrations not yet applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the migration state cannot be read.
    fn pending_migrations_count(&self) -> Result<usize> {
        Ok(0)
    }
}
