//! `SQLite` schema migrations.
//!
//! Migration files use the up/down annotation format:
//!
//! ```sql
//! -- +migrate Up
//! CREATE TABLE assets (...);
//!
//! -- +migrate Down
//! DROP TABLE assets;
//! ```
//!
//! Files are ordered by their numeric prefix (`001_`, `002_`, ...), then by
//! name. Each applied migration is recorded by file name in a tracking table
//! whose name is supplied by the caller, so several schemas can share one
//! database. A migration and its tracking row commit in one transaction: a
//! failure leaves every earlier migration applied and nothing of the failing one.

use crate::{Error, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const UP_DIRECTIVE: &str = "-- +migrate up";
const DOWN_DIRECTIVE: &str = "-- +migrate down";
const STATEMENT_DIRECTIVE: &str = "-- +migrate statement";

/// Built-in migrations for the relational backend.
const EMBEDDED: &[(&str, &str)] = &[
    (
        "001_initial_schema.sql",
        include_str!("../../migrations/sqlite/001_initial_schema.sql"),
    ),
    (
        "002_identity_indexes.sql",
        include_str!("../../migrations/sqlite/002_identity_indexes.sql"),
    ),
    (
        "003_execution_log_sources.sql",
        include_str!("../../migrations/sqlite/003_execution_log_sources.sql"),
    ),
];

/// One parsed migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// File name; the identity recorded in the tracking table.
    pub id: String,
    /// Script applied on upgrade.
    pub up: String,
    /// Script applied on rollback. May be empty.
    pub down: String,
}

impl Migration {
    /// Parses a migration file body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MigrationFailed`] if the file has no up section.
    pub fn parse(id: impl Into<String>, text: &str) -> Result<Self> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Section {
            Preamble,
            Up,
            Down,
        }

        let id = id.into();
        let mut section = Section::Preamble;
        let mut seen_up = false;
        let mut up = String::new();
        let mut down = String::new();

        for line in text.lines() {
            let directive = line.trim().to_lowercase();
            if directive.starts_with(UP_DIRECTIVE) {
                section = Section::Up;
                seen_up = true;
                continue;
            }
            if directive.starts_with(DOWN_DIRECTIVE) {
                section = Section::Down;
                continue;
            }
            if directive.starts_with(STATEMENT_DIRECTIVE) {
                continue;
            }
            let target = match section {
                Section::Preamble => continue,
                Section::Up => &mut up,
                Section::Down => &mut down,
            };
            target.push_str(line);
            target.push('\n');
        }

        if !seen_up {
            return Err(Error::MigrationFailed {
                migration: id,
                cause: "no '-- +migrate Up' section found".to_string(),
            });
        }

        Ok(Self {
            id,
            up: up.trim().to_string(),
            down: down.trim().to_string(),
        })
    }
}

/// Where migration files come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MigrationSource {
    /// Files compiled into the binary.
    #[default]
    Embedded,
    /// `*.sql` files in a directory.
    Directory(PathBuf),
}

impl MigrationSource {
    /// Selects the directory when one is configured.
    #[must_use]
    pub fn from_path(path: Option<&Path>) -> Self {
        path.map_or(Self::Embedded, |p| Self::Directory(p.to_path_buf()))
    }

    /// Loads and orders every migration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MigrationFailed`] if the directory or a file cannot be
    /// read, or a file cannot be parsed.
    pub fn load(&self) -> Result<Vec<Migration>> {
        let mut migrations = match self {
            Self::Embedded => EMBEDDED
                .iter()
                .map(|(id, text)| Migration::parse(*id, text))
                .collect::<Result<Vec<_>>>()?,
            Self::Directory(dir) => load_directory(dir)?,
        };
        migrations.sort_by(|a, b| order_key(&a.id).cmp(&order_key(&b.id)));
        Ok(migrations)
    }
}

fn load_directory(dir: &Path) -> Result<Vec<Migration>> {
    let read_failed = |path: &Path, e: std::io::Error| Error::MigrationFailed {
        migration: path.display().to_string(),
        cause: e.to_string(),
    };

    let entries = std::fs::read_dir(dir).map_err(|e| read_failed(dir, e))?;
    let mut migrations = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| read_failed(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let Some(id) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let text = std::fs::read_to_string(&path).map_err(|e| read_failed(&path, e))?;
        migrations.push(Migration::parse(id, &text)?);
    }
    Ok(migrations)
}

/// Numeric prefix first, unnumbered files last, then name.
fn order_key(id: &str) -> (u64, &str) {
    let digits: String = id.chars().take_while(char::is_ascii_digit).collect();
    (digits.parse().unwrap_or(u64::MAX), id)
}

/// Applied state of one known migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Migration id.
    pub id: String,
    /// Whether it is recorded in the tracking table.
    pub applied: bool,
}

/// Applies and tracks schema migrations on a connection.
#[derive(Debug, Clone)]
pub struct MigrationManager {
    source: MigrationSource,
    table: String,
}

impl MigrationManager {
    /// Creates a manager tracking applied migrations in `table`.
    #[must_use]
    pub fn new(source: MigrationSource, table: impl Into<String>) -> Self {
        Self {
            source,
            table: table.into(),
        }
    }

    /// Returns the tracking table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the migration source.
    #[must_use]
    pub const fn source(&self) -> &MigrationSource {
        &self.source
    }

    /// Number of migrations recorded as applied. Zero when the tracking table
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MigrationFailed`] if the tracking table cannot be read.
    pub fn applied_count(&self, conn: &Connection) -> Result<usize> {
        Ok(self.applied_ids(conn)?.len())
    }

    /// Number of known migrations not yet applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MigrationFailed`] if the source or tracking table cannot be read.
    pub fn pending_count(&self, conn: &Connection) -> Result<usize> {
        let applied = self.applied_ids(conn)?;
        Ok(self
            .source
            .load()?
            .iter()
            .filter(|m| !applied.contains(&m.id))
            .count())
    }

    /// Every known migration with its applied state, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MigrationFailed`] if the source or tracking table cannot be read.
    pub fn status(&self, conn: &Connection) -> Result<Vec<MigrationStatus>> {
        let applied = self.applied_ids(conn)?;
        Ok(self
            .source
            .load()?
            .into_iter()
            .map(|m| MigrationStatus {
                applied: applied.contains(&m.id),
                id: m.id,
            })
            .collect())
    }

    /// Applies all migrations, but only on a database with none applied.
    ///
    /// Returns the number applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MigrationFailed`] if a migration fails.
    pub fn run_init(&self, conn: &mut Connection) -> Result<usize> {
        if self.applied_count(conn)? > 0 {
            tracing::debug!(table = %self.table, "Schema already initialized");
            return Ok(0);
        }
        self.run_all(conn)
    }

    /// Applies every pending migration in order. Returns the number applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MigrationFailed`] for the first migration that fails;
    /// migrations before it stay applied.
    pub fn run_all(&self, conn: &mut Connection) -> Result<usize> {
        let table = self.ensure_table(conn)?;
        let applied = self.applied_ids(conn)?;
        let mut count = 0;

        for migration in self.source.load()? {
            if applied.contains(&migration.id) {
                continue;
            }
            let step = Step {
                id: &migration.id,
                script: &migration.up,
                // Another connection may have applied it since `applied` was read.
                wanted: |tx: &Transaction<'_>| {
                    is_tracked(tx, &table, &migration.id).map(|tracked| !tracked)
                },
                track: |tx: &Transaction<'_>| {
                    tx.execute(
                        &format!("INSERT INTO {table} (id, applied_at) VALUES (?1, ?2)"),
                        rusqlite::params![migration.id, Utc::now()],
                    )
                },
            };
            if !step.apply(conn)? {
                tracing::debug!(migration = %migration.id, "Migration applied concurrently");
                continue;
            }
            metrics::counter!("assetdb_migrations_applied_total").increment(1);
            tracing::info!(migration = %migration.id, table = %self.table, "Applied migration");
            count += 1;
        }

        Ok(count)
    }

    /// Reverts the `steps` most recently ordered applied migrations.
    ///
    /// Returns the number reverted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MigrationFailed`] if an applied migration is unknown to
    /// the source or its down script fails.
    pub fn rollback(&self, conn: &mut Connection, steps: usize) -> Result<usize> {
        let table = self.ensure_table(conn)?;
        let applied = self.applied_ids(conn)?;
        let known = self.source.load()?;

        let mut ordered: Vec<&Migration> =
            known.iter().filter(|m| applied.contains(&m.id)).collect();
        if let Some(unknown) = applied.iter().find(|id| !known.iter().any(|m| &m.id == *id)) {
            return Err(Error::MigrationFailed {
                migration: unknown.clone(),
                cause: "applied migration not found in source".to_string(),
            });
        }
        ordered.reverse();

        let mut count = 0;
        for migration in ordered.into_iter().take(steps) {
            let step = Step {
                id: &migration.id,
                script: &migration.down,
                wanted: |tx: &Transaction<'_>| is_tracked(tx, &table, &migration.id),
                track: |tx: &Transaction<'_>| {
                    tx.execute(
                        &format!("DELETE FROM {table} WHERE id = ?1"),
                        [&migration.id],
                    )
                },
            };
            if !step.apply(conn)? {
                continue;
            }
            tracing::info!(migration = %migration.id, table = %self.table, "Rolled back migration");
            count += 1;
        }
        Ok(count)
    }

    /// Validated, quoted tracking table identifier.
    fn quoted_table(&self) -> Result<String> {
        let valid = self
            .table
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && self
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(Error::MigrationFailed {
                migration: self.table.clone(),
                cause: "invalid migration table name".to_string(),
            });
        }
        Ok(format!("\"{}\"", self.table))
    }

    fn ensure_table(&self, conn: &Connection) -> Result<String> {
        let table = self.quoted_table()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            )"
        ))
        .map_err(|e| Error::MigrationFailed {
            migration: self.table.clone(),
            cause: format!("create tracking table: {e}"),
        })?;
        Ok(table)
    }

    fn applied_ids(&self, conn: &Connection) -> Result<HashSet<String>> {
        let table = self.quoted_table()?;
        let read_failed = |e: rusqlite::Error| Error::MigrationFailed {
            migration: self.table.clone(),
            cause: format!("read tracking table: {e}"),
        };

        let exists = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [&self.table],
                |_| Ok(()),
            )
            .optional()
            .map_err(read_failed)?
            .is_some();
        if !exists {
            return Ok(HashSet::new());
        }

        let mut stmt = conn
            .prepare(&format!("SELECT id FROM {table}"))
            .map_err(read_failed)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(read_failed)?
            .collect::<rusqlite::Result<HashSet<_>>>()
            .map_err(read_failed)?;
        Ok(ids)
    }
}

fn is_tracked(tx: &Transaction<'_>, table: &str, id: &str) -> rusqlite::Result<bool> {
    tx.prepare(&format!("SELECT 1 FROM {table} WHERE id = ?1"))?
        .exists([id])
}

/// One migration direction: `script` and `track` run in one immediate
/// transaction, and only if `wanted` holds once the write lock is held.
struct Step<'a, W, T> {
    id: &'a str,
    script: &'a str,
    wanted: W,
    track: T,
}

impl<W, T> Step<'_, W, T>
where
    W: FnOnce(&Transaction<'_>) -> rusqlite::Result<bool>,
    T: FnOnce(&Transaction<'_>) -> rusqlite::Result<usize>,
{
    /// Returns whether the step ran.
    fn apply(self, conn: &mut Connection) -> Result<bool> {
        let failed = |e: rusqlite::Error| Error::MigrationFailed {
            migration: self.id.to_string(),
            cause: e.to_string(),
        };

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(failed)?;
        if !(self.wanted)(&tx).map_err(failed)? {
            return Ok(false);
        }
        if !self.script.is_empty() {
            tx.execute_batch(self.script).map_err(failed)?;
        }
        (self.track)(&tx).map_err(failed)?;
        tx.commit().map_err(failed)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn manager() -> MigrationManager {
        MigrationManager::new(MigrationSource::Embedded, "schema_migrations")
    }

    #[test]
    fn test_parse_sections() {
        let migration = Migration::parse(
            "003_extra.sql",
            "-- leading comment\n-- +migrate Up\nCREATE TABLE t (x);\n-- +migrate Down\nDROP TABLE t;\n",
        )
        .unwrap();
        assert_eq!(migration.up, "CREATE TABLE t (x);");
        assert_eq!(migration.down, "DROP TABLE t;");
    }

    #[test]
    fn test_parse_requires_up() {
        let err = Migration::parse("bad.sql", "CREATE TABLE t (x);").unwrap_err();
        assert!(matches!(err, Error::MigrationFailed { ref migration, .. } if migration == "bad.sql"));
    }

    #[test]
    fn test_numeric_ordering() {
        let mut ids = vec!["10_late.sql", "2_mid.sql", "notes.sql", "001_first.sql"];
        ids.sort_by(|a, b| order_key(a).cmp(&order_key(b)));
        assert_eq!(ids, vec!["001_first.sql", "2_mid.sql", "10_late.sql", "notes.sql"]);
    }

    #[test]
    fn test_run_all_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        let manager = manager();

        assert_eq!(manager.applied_count(&conn).unwrap(), 0);
        let total = manager.pending_count(&conn).unwrap();
        assert_eq!(manager.run_all(&mut conn).unwrap(), total);
        assert_eq!(manager.run_all(&mut conn).unwrap(), 0);
        assert_eq!(manager.pending_count(&conn).unwrap(), 0);
        assert_eq!(manager.applied_count(&conn).unwrap(), total);
    }

    #[test]
    fn test_run_init_skips_initialized_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        let manager = manager();
        assert!(manager.run_init(&mut conn).unwrap() > 0);
        assert_eq!(manager.run_init(&mut conn).unwrap(), 0);
    }

    #[test]
    fn test_rollback_then_reapply() {
        let mut conn = Connection::open_in_memory().unwrap();
        let manager = manager();
        manager.run_all(&mut conn).unwrap();

        assert_eq!(manager.rollback(&mut conn, 1).unwrap(), 1);
        let status = manager.status(&conn).unwrap();
        let (latest, earlier) = status.split_last().unwrap();
        assert!(!latest.applied);
        assert!(earlier.iter().all(|s| s.applied));

        assert_eq!(manager.run_all(&mut conn).unwrap(), 1);
    }

    #[test]
    fn test_failing_migration_keeps_earlier_ones() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("1_ok.sql"),
            "-- +migrate Up\nCREATE TABLE ok (x);\n-- +migrate Down\nDROP TABLE ok;\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("2_broken.sql"),
            "-- +migrate Up\nCREATE TABLE half (x);\nTHIS IS NOT SQL;\n",
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let mut conn = Connection::open_in_memory().unwrap();
        let manager = MigrationManager::new(
            MigrationSource::Directory(dir.path().to_path_buf()),
            "custom_migrations",
        );
        let err = manager.run_all(&mut conn).unwrap_err();
        assert!(matches!(err, Error::MigrationFailed { ref migration, .. } if migration == "2_broken.sql"));

        assert_eq!(manager.applied_count(&conn).unwrap(), 1);
        let half: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'half'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(half, 0);
    }

    #[test]
    fn test_concurrent_init_applies_each_migration_once() {
        for _ in 0..10 {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("race.db");
            let results: Vec<Result<usize>> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..4)
                    .map(|_| {
                        let path = path.clone();
                        scope.spawn(move || {
                            let mut conn = Connection::open(&path).unwrap();
                            conn.busy_timeout(std::time::Duration::from_secs(10)).unwrap();
                            manager().run_init(&mut conn)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let applied: usize = results.into_iter().map(Result::unwrap).sum();
            let conn = Connection::open(&path).unwrap();
            assert_eq!(applied, manager().applied_count(&conn).unwrap());
            assert_eq!(manager().pending_count(&conn).unwrap(), 0);
        }
    }

    #[test]
    fn test_step_skipped_when_not_wanted() {
        let mut conn = Connection::open_in_memory().unwrap();
        let manager = manager();
        manager.run_all(&mut conn).unwrap();
        let table = manager.ensure_table(&conn).unwrap();
        let latest = manager.status(&conn).unwrap().pop().unwrap().id;

        let step = Step {
            id: &latest,
            script: "THIS IS NOT SQL;",
            wanted: |tx: &Transaction<'_>| is_tracked(tx, &table, "never_applied.sql"),
            track: |_: &Transaction<'_>| Ok(0),
        };
        assert!(!step.apply(&mut conn).unwrap());
    }

    #[test]
    fn test_invalid_table_name() {
        let mut conn = Connection::open_in_memory().unwrap();
        let manager = MigrationManager::new(MigrationSource::Embedded, "bad; DROP TABLE x");
        assert!(manager.run_all(&mut conn).is_err());
    }
}
