//! Relational [`Store`] on `SQLite`.
//!
//! # Schema
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `assets` | One row per node; JSON `content`, unique per identity via partial expression indexes |
//! | `relations` | Directed typed edges, unique per `(type, from, to)`, cascading on node delete |
//! | `executions` | Discovery runs and their seed domains |
//! | `execution_logs` | First discovery of a node by a run, cascading on either side |
//!
//! Every write runs in its own `BEGIN IMMEDIATE` transaction on a pooled
//! connection, so concurrent workers serialize on the database write lock
//! and a losing racer sees the winner's row.

use super::connection::{ConnectionPool, acquire_lock};
use super::rows::{ASSET_COLUMNS, AssetRow, RELATION_COLUMNS, RelationRow};
use super::writer::{IdentityCache, SqliteWriter};
use crate::config::DatabaseConfig;
use crate::identity::{IdentityKey, normalize_fqdn};
use crate::models::{
    Asset, AssetId, AssetType, Execution, ExecutionId, ExecutionLog, InsertInfo, NameAddrPair,
    Record, Relation, decode_domains, encode_domains,
};
use crate::services::{self, upsert};
use crate::storage::metrics::record_operation_metrics;
use crate::storage::migrations::{MigrationManager, MigrationSource, MigrationStatus};
use crate::storage::traits::Store;
use crate::{Error, OperationContext, Result};
use chrono::Utc;
use lru::LruCache;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::instrument;

const BACKEND: &str = "sqlite";

const FQDNS_LOGGED_SQL: &str = "
    SELECT json_extract(a.content, '$.name')
    FROM execution_logs l
    JOIN assets a ON a.id = l.asset_id
    WHERE l.execution_id = ?1 AND a.type = 'fqdn'
    ORDER BY a.id";

const ADDRESSES_OF_SQL: &str = "
    SELECT json_extract(f.content, '$.name'), json_extract(i.content, '$.address')
    FROM assets f
    JOIN relations r ON r.from_asset_id = f.id
    JOIN assets i ON i.id = r.to_asset_id
    WHERE f.type = 'fqdn' AND json_extract(f.content, '$.name') = ?1
      AND r.type IN ('a_record', 'aaaa_record')
      AND i.type = 'ip'";

const IS_CNAME_SQL: &str = "
    SELECT EXISTS (
        SELECT 1
        FROM assets a
        JOIN relations r ON r.from_asset_id = a.id
        WHERE a.type = 'fqdn' AND json_extract(a.content, '$.name') = ?1
          AND r.type = 'cname_record'
    )";

fn sql_error(operation: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::backend(operation, e)
}

/// Asset store over a pool of `SQLite` connections.
pub struct SqliteStore {
    pool: ConnectionPool,
    migrations: MigrationManager,
    operation_timeout: Duration,
    cache: Option<IdentityCache>,
}

impl SqliteStore {
    /// Creates a store for the configured database file.
    ///
    /// No connection is opened until the first operation.
    #[must_use]
    pub fn new(config: &DatabaseConfig) -> Self {
        let cache = NonZeroUsize::new(config.identity_cache_size)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));
        Self {
            pool: ConnectionPool::new(&config.path, config.pool_max_size),
            migrations: MigrationManager::new(
                MigrationSource::from_path(config.migrations_path.as_deref()),
                config.migrations_table.clone(),
            ),
            operation_timeout: config.operation_timeout,
            cache,
        }
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.pool.path()
    }

    /// The migration manager used by the lifecycle operations.
    #[must_use]
    pub const fn migrations(&self) -> &MigrationManager {
        &self.migrations
    }

    /// Every known migration with its applied state.
    ///
    /// # Errors
    ///
    /// Returns an error if the migration state cannot be read.
    pub fn migration_status(&self) -> Result<Vec<MigrationStatus>> {
        let conn = self.pool.get(&self.lifecycle_context())?;
        self.migrations.status(&conn)
    }

    /// Reverts the `steps` newest applied migrations. Returns the number reverted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MigrationFailed`] if a down script fails.
    #[instrument(skip(self))]
    pub fn rollback_migrations(&self, steps: usize) -> Result<usize> {
        let mut conn = self.pool.get(&self.lifecycle_context())?;
        let reverted = self.migrations.rollback(&mut conn, steps)?;
        self.clear_cache();
        Ok(reverted)
    }

    fn lifecycle_context(&self) -> OperationContext {
        OperationContext::with_timeout(self.operation_timeout)
    }

    /// Runs `f` through a writer in one immediate transaction.
    fn write<T>(
        &self,
        info: &InsertInfo,
        operation: &'static str,
        f: impl FnOnce(&mut SqliteWriter<'_>) -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = self.write_inner(info, operation, f);
        record_operation_metrics(BACKEND, operation, start, &result);
        result
    }

    fn write_inner<T>(
        &self,
        info: &InsertInfo,
        operation: &'static str,
        f: impl FnOnce(&mut SqliteWriter<'_>) -> Result<T>,
    ) -> Result<T> {
        let ctx = info.context.child_with_timeout(self.operation_timeout);
        ctx.check(operation)?;

        let mut conn = self.pool.get(&ctx)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(sql_error("begin_transaction"))?;

        let (value, resolved) = {
            let mut writer = SqliteWriter::new(&tx, &ctx, &info.source, self.cache.as_ref());
            let value = f(&mut writer)?;
            (value, writer.into_resolved())
        };

        ctx.check(operation)?;
        tx.commit().map_err(sql_error("commit_transaction"))?;
        self.publish(resolved);
        Ok(value)
    }

    /// Runs `f` on a pooled connection outside an explicit transaction.
    fn with_connection<T>(
        &self,
        ctx: &OperationContext,
        operation: &'static str,
        f: impl FnOnce(&Connection, &OperationContext) -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let ctx = ctx.child_with_timeout(self.operation_timeout);
        let result = ctx
            .check(operation)
            .and_then(|()| self.pool.get(&ctx))
            .and_then(|conn| f(&conn, &ctx));
        record_operation_metrics(BACKEND, operation, start, &result);
        result
    }

    fn publish(&self, resolved: Vec<(IdentityKey, AssetId)>) {
        if let Some(cache) = &self.cache {
            let mut cache = acquire_lock(cache, "identity_cache");
            for (key, id) in resolved {
                cache.put(key, id);
            }
        }
    }

    fn forget(&self, id: AssetId) {
        if let Some(cache) = &self.cache {
            let mut cache = acquire_lock(cache, "identity_cache");
            let stale: Vec<IdentityKey> = cache
                .iter()
                .filter(|(_, cached)| **cached == id)
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                cache.pop(&key);
            }
        }
    }

    fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            acquire_lock(cache, "identity_cache").clear();
        }
    }
}

fn fqdns_logged(conn: &Connection, execution: ExecutionId) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(FQDNS_LOGGED_SQL)?;
    stmt.query_map([execution.get()], |row| row.get::<_, String>(0))?
        .collect()
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl Store for SqliteStore {
    #[instrument(skip(self, info), fields(source = %info.source, execution_id = %info.execution_id))]
    fn upsert(&self, info: &InsertInfo, asset_type: AssetType, raw: &str) -> Result<AssetId> {
        self.write(info, "upsert", |writer| {
            upsert::upsert(writer, info.execution_id, asset_type, raw)
        })
    }

    #[instrument(
        skip(self, info, record),
        fields(source = %info.source, execution_id = %info.execution_id, record = %record)
    )]
    fn insert_record(&self, info: &InsertInfo, record: &Record) -> Result<()> {
        self.write(info, "insert_record", |writer| {
            services::apply_record(writer, info.execution_id, record)
        })
    }

    #[instrument(skip(self, ctx))]
    fn insert_execution(&self, ctx: &OperationContext, domains: &[String]) -> Result<ExecutionId> {
        self.with_connection(ctx, "insert_execution", |conn, _| {
            let id = conn
                .query_row(
                    "INSERT INTO executions (domains, created_at) VALUES (?1, ?2) RETURNING id",
                    params![encode_domains(domains), Utc::now()],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(sql_error("insert_execution"))?;
            tracing::info!(execution_id = id, "Started execution");
            Ok(ExecutionId::new(id))
        })
    }

    #[instrument(skip(self, ctx))]
    fn is_cname_node(&self, ctx: &OperationContext, name: &str) -> Result<bool> {
        let Ok(fqdn) = normalize_fqdn(name) else {
            return Ok(false);
        };
        self.with_connection(ctx, "is_cname_node", |conn, _| {
            conn.query_row(IS_CNAME_SQL, [&fqdn.name], |row| row.get::<_, bool>(0))
                .map_err(sql_error("is_cname_node"))
        })
    }

    #[instrument(skip(self, ctx))]
    fn event_fqdns(&self, ctx: &OperationContext, execution: ExecutionId) -> Result<Vec<String>> {
        self.with_connection(ctx, "event_fqdns", |conn, _| {
            fqdns_logged(conn, execution).map_err(sql_error("event_fqdns"))
        })
    }

    #[instrument(skip(self, ctx, names), fields(names = names.len()))]
    fn names_to_addrs(
        &self,
        ctx: &OperationContext,
        execution: ExecutionId,
        names: &[String],
    ) -> Result<Vec<NameAddrPair>> {
        self.with_connection(ctx, "names_to_addrs", |conn, ctx| {
            let names: Vec<String> = if names.is_empty() {
                fqdns_logged(conn, execution).map_err(sql_error("names_to_addrs"))?
            } else {
                names
                    .iter()
                    .filter_map(|n| normalize_fqdn(n).ok().map(|f| f.name))
                    .collect()
            };

            let mut stmt = conn
                .prepare_cached(ADDRESSES_OF_SQL)
                .map_err(sql_error("names_to_addrs"))?;
            let mut pairs = BTreeSet::new();
            for name in &names {
                ctx.check("names_to_addrs")?;
                let rows = stmt
                    .query_map([name], |row| {
                        Ok(NameAddrPair::new(
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                        ))
                    })
                    .map_err(sql_error("names_to_addrs"))?;
                for pair in rows {
                    pairs.insert(pair.map_err(sql_error("names_to_addrs"))?);
                }
            }
            Ok(pairs.into_iter().collect())
        })
    }

    #[instrument(skip(self, ctx), fields(asset_id = %id))]
    fn asset(&self, ctx: &OperationContext, id: AssetId) -> Result<Option<Asset>> {
        self.with_connection(ctx, "get_asset", |conn, _| {
            conn.query_row(
                &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ?1"),
                [id.get()],
                AssetRow::from_row,
            )
            .optional()
            .map_err(sql_error("get_asset"))?
            .map(AssetRow::into_asset)
            .transpose()
        })
    }

    #[instrument(skip(self, ctx))]
    fn assets_by_type(&self, ctx: &OperationContext, asset_type: AssetType) -> Result<Vec<Asset>> {
        self.with_connection(ctx, "assets_by_type", |conn, _| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    "SELECT {ASSET_COLUMNS} FROM assets WHERE type = ?1 ORDER BY id"
                ))
                .map_err(sql_error("assets_by_type"))?;
            let rows = stmt
                .query_map([asset_type.as_str()], AssetRow::from_row)
                .map_err(sql_error("assets_by_type"))?;
            rows.map(|row| row.map_err(sql_error("assets_by_type"))?.into_asset())
                .collect()
        })
    }

    #[instrument(skip(self, ctx), fields(asset_id = %id))]
    fn relations_from(&self, ctx: &OperationContext, id: AssetId) -> Result<Vec<Relation>> {
        self.with_connection(ctx, "relations_from", |conn, _| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    "SELECT {RELATION_COLUMNS} FROM relations WHERE from_asset_id = ?1 ORDER BY id"
                ))
                .map_err(sql_error("relations_from"))?;
            let rows = stmt
                .query_map([id.get()], RelationRow::from_row)
                .map_err(sql_error("relations_from"))?;
            rows.map(|row| row.map_err(sql_error("relations_from"))?.into_relation())
                .collect()
        })
    }

    #[instrument(skip(self, ctx), fields(execution_id = %id))]
    fn execution(&self, ctx: &OperationContext, id: ExecutionId) -> Result<Option<Execution>> {
        self.with_connection(ctx, "get_execution", |conn, _| {
            conn.query_row(
                "SELECT id, domains, created_at FROM executions WHERE id = ?1",
                [id.get()],
                |row| {
                    Ok(Execution {
                        id: ExecutionId::new(row.get(0)?),
                        domains: decode_domains(&row.get::<_, String>(1)?),
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(sql_error("get_execution"))
        })
    }

    #[instrument(skip(self, ctx), fields(execution_id = %id))]
    fn execution_logs(&self, ctx: &OperationContext, id: ExecutionId) -> Result<Vec<ExecutionLog>> {
        self.with_connection(ctx, "execution_logs", |conn, _| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT id, execution_id, asset_id, source, created_at FROM execution_logs
                     WHERE execution_id = ?1 ORDER BY id",
                )
                .map_err(sql_error("execution_logs"))?;
            let rows = stmt
                .query_map([id.get()], |row| {
                    Ok(ExecutionLog {
                        id: row.get(0)?,
                        execution_id: ExecutionId::new(row.get(1)?),
                        asset_id: AssetId::new(row.get(2)?),
                        source: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })
                .map_err(sql_error("execution_logs"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_error("execution_logs"))
        })
    }

    #[instrument(skip(self, ctx), fields(asset_id = %asset, execution_id = %execution))]
    fn node_sources(
        &self,
        ctx: &OperationContext,
        asset: AssetId,
        execution: ExecutionId,
    ) -> Result<Vec<String>> {
        self.with_connection(ctx, "node_sources", |conn, _| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT DISTINCT source FROM execution_logs
                     WHERE asset_id = ?1 AND execution_id = ?2 AND source <> ''
                     ORDER BY source",
                )
                .map_err(sql_error("node_sources"))?;
            let rows = stmt
                .query_map([asset.get(), execution.get()], |row| row.get::<_, String>(0))
                .map_err(sql_error("node_sources"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_error("node_sources"))
        })
    }

    #[instrument(skip(self, ctx))]
    fn delete_execution(&self, ctx: &OperationContext, execution: ExecutionId) -> Result<bool> {
        self.with_connection(ctx, "delete_execution", |conn, _| {
            let deleted = conn
                .execute("DELETE FROM executions WHERE id = ?1", [execution.get()])
                .map_err(sql_error("delete_execution"))?;
            Ok(deleted > 0)
        })
    }

    #[instrument(skip(self, ctx), fields(asset_id = %id))]
    fn delete_asset(&self, ctx: &OperationContext, id: AssetId) -> Result<bool> {
        let deleted = self.with_connection(ctx, "delete_asset", |conn, _| {
            conn.execute("DELETE FROM assets WHERE id = ?1", [id.get()])
                .map_err(sql_error("delete_asset"))
        })?;
        self.forget(id);
        Ok(deleted > 0)
    }

    #[instrument(skip(self), fields(path = %self.path().display()))]
    fn create_database_if_not_exists(&self) -> Result<()> {
        let _conn = self.pool.get(&self.lifecycle_context())?;
        tracing::info!("Database ready");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path().display()))]
    fn drop_database(&self) -> Result<()> {
        self.pool.close_idle();
        self.clear_cache();
        if self.pool.is_in_memory() {
            return Ok(());
        }

        for file in [
            self.path().to_path_buf(),
            sidecar(self.path(), "-wal"),
            sidecar(self.path(), "-shm"),
        ] {
            match std::fs::remove_file(&file) {
                Ok(()) => {},
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => {
                    return Err(Error::backend(
                        "drop_database",
                        format!("{}: {e}", file.display()),
                    ));
                },
            }
        }
        tracing::warn!("Dropped database");
        Ok(())
    }

    fn is_database_created(&self) -> Result<bool> {
        Ok(self.pool.is_in_memory() || self.path().exists())
    }

    #[instrument(skip(self), fields(table = %self.migrations.table()))]
    fn run_init_migration(&self) -> Result<usize> {
        let mut conn = self.pool.get(&self.lifecycle_context())?;
        self.migrations.run_init(&mut conn)
    }

    #[instrument(skip(self), fields(table = %self.migrations.table()))]
    fn run_migrations(&self) -> Result<usize> {
        let mut conn = self.pool.get(&self.lifecycle_context())?;
        self.migrations.run_all(&mut conn)
    }

    fn pending_migrations_count(&self) -> Result<usize> {
        let conn = self.pool.get(&self.lifecycle_context())?;
        self.migrations.pending_count(&conn)
    }
}
