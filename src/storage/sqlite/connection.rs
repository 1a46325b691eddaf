//! Connection handling for the `SQLite` backend.
//!
//! Connections are pooled: each store operation checks one out for its
//! duration and returns it on drop. Concurrent writers are serialized by
//! `SQLite` itself (`BEGIN IMMEDIATE` plus `busy_timeout`), not by a process lock.

use crate::{Error, OperationContext, Result};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Path that selects a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

const BUSY_TIMEOUT_MS: u32 = 5000;
const POOL_WAIT_SLICE: Duration = Duration::from_millis(50);

/// Helper to acquire mutex lock with poison recovery.
///
/// If the mutex is poisoned (a panic in a previous critical section), the
/// inner value is recovered and a warning logged.
pub fn acquire_lock<'a, T>(mutex: &'a Mutex<T>, lock: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(lock, "Mutex was poisoned, recovering");
            metrics::counter!("assetdb_lock_poison_recovery_total", "lock" => lock).increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a `SQLite` connection for concurrent use.
///
/// - **WAL mode**: readers do not block the single writer
/// - **NORMAL synchronous**: durable at checkpoints
/// - **`busy_timeout`**: waits up to 5 seconds for the write lock
/// - **`foreign_keys`**: enforces edge endpoints and cascades
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if foreign keys cannot be enabled.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, and in-memory databases answer "memory".
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    conn.busy_timeout(Duration::from_millis(u64::from(BUSY_TIMEOUT_MS)))
        .map_err(|e| Error::backend("configure_connection", e))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| Error::backend("configure_connection", e))?;
    Ok(())
}

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

/// A bounded pool of configured connections to one database file.
///
/// Connections are opened lazily. An in-memory pool holds a single
/// connection, since every in-memory connection is a separate database.
pub struct ConnectionPool {
    path: PathBuf,
    max_size: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl ConnectionPool {
    /// Creates a pool for `path` with at most `max_size` open connections.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_size: usize) -> Self {
        let path = path.into();
        let max_size = if path.as_os_str() == IN_MEMORY {
            1
        } else {
            max_size.max(1)
        };
        Self {
            path,
            max_size,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the pool targets an in-memory database.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == IN_MEMORY
    }

    /// Maximum open connections.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Checks out a connection, waiting until one is free or `ctx` expires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the context expires while waiting, or
    /// [`Error::OperationFailed`] if a new connection cannot be opened.
    pub fn get(&self, ctx: &OperationContext) -> Result<PooledConnection<'_>> {
        let started = Instant::now();
        let mut state = acquire_lock(&self.state, "sqlite_pool");

        loop {
            if let Some(conn) = state.idle.pop() {
                drop(state);
                metrics::histogram!("assetdb_pool_wait_seconds").record(started.elapsed().as_secs_f64());
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }

            if state.open < self.max_size {
                state.open += 1;
                drop(state);
                return match self.open_connection() {
                    Ok(conn) => Ok(PooledConnection {
                        pool: self,
                        conn: Some(conn),
                    }),
                    Err(e) => {
                        acquire_lock(&self.state, "sqlite_pool").open -= 1;
                        self.available.notify_one();
                        Err(e)
                    },
                };
            }

            ctx.check("acquire_connection")?;
            let wait = ctx
                .remaining()
                .map_or(POOL_WAIT_SLICE, |left| left.min(POOL_WAIT_SLICE));
            state = match self.available.wait_timeout(state, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Closes every idle connection. Checked-out connections close when returned.
    pub fn close_idle(&self) {
        let mut state = acquire_lock(&self.state, "sqlite_pool");
        let closed = state.idle.len();
        state.idle.clear();
        state.open -= closed;
        drop(state);
        self.available.notify_all();
        tracing::debug!(closed, path = %self.path.display(), "Closed idle connections");
    }

    fn open_connection(&self) -> Result<Connection> {
        let conn = if self.is_in_memory() {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::backend("create_database_dir", format!("{}: {e}", parent.display()))
                })?;
            }
            Connection::open(&self.path)
        }
        .map_err(|e| Error::backend("open_connection", format!("{}: {e}", self.path.display())))?;

        configure_connection(&conn)?;
        tracing::debug!(path = %self.path.display(), "Opened SQLite connection");
        Ok(conn)
    }

    fn release(&self, conn: Connection) {
        let mut state = acquire_lock(&self.state, "sqlite_pool");
        state.idle.push(conn);
        drop(state);
        self.available.notify_one();
    }
}

/// A connection checked out of a [`ConnectionPool`].
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn test_acquire_lock_recovers_poison() {
        let mutex = Arc::new(Mutex::new(1));
        let clone = Arc::clone(&mutex);
        let _ = thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison");
        })
        .join();

        assert!(mutex.is_poisoned());
        assert_eq!(*acquire_lock(&mutex, "test"), 1);
    }

    #[test]
    fn test_connections_are_configured() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::new(dir.path().join("a.db"), 2);
        let conn = pool.get(&OperationContext::background()).unwrap();

        let fk: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_pool_reuses_connections() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::new(dir.path().join("nested").join("b.db"), 1);
        let ctx = OperationContext::background();

        {
            let conn = pool.get(&ctx).unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        }
        let conn = pool.get(&ctx).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(pool.path().exists());
    }

    #[test]
    fn test_exhausted_pool_honors_deadline() {
        let pool = ConnectionPool::new(IN_MEMORY, 4);
        assert_eq!(pool.max_size(), 1);

        let _held = pool.get(&OperationContext::background()).unwrap();
        let ctx = OperationContext::with_timeout(Duration::from_millis(20));
        let err = pool.get(&ctx).err().unwrap();
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    #[test]
    fn test_waiter_gets_released_connection() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(ConnectionPool::new(dir.path().join("c.db"), 1));
        let held = pool.get(&OperationContext::background()).unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                pool.get(&OperationContext::with_timeout(Duration::from_secs(5)))
                    .map(|_| ())
            })
        };
        thread::sleep(Duration::from_millis(50));
        drop(held);

        assert!(waiter.join().unwrap().is_ok());
    }
}
