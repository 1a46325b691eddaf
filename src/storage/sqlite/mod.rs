//! Relational backend on `SQLite`.
//!
//! ## Module Structure
//!
//! - `connection`: pooled connections, lock acquisition, pragma configuration
//! - `rows`: row conversion for assets and relations
//! - `writer`: the transactional [`AssetWriter`](crate::services::AssetWriter)
//! - `store`: [`SqliteStore`], the [`Store`](crate::Store) implementation

mod connection;
mod rows;
mod store;
mod writer;

pub use connection::{
    ConnectionPool, IN_MEMORY, PooledConnection, acquire_lock, configure_connection,
};
pub use rows::{AssetRow, RelationRow};
pub use store::SqliteStore;
pub use writer::{IdentityCache, SqliteWriter, identity_query};
