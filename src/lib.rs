//! # assetdb
//!
//! Asset graph persistence for network reconnaissance data.
//!
//! assetdb records facts discovered during reconnaissance (domain names, IP
//! addresses, netblocks, autonomous systems and registry organizations) and the
//! typed relations between them. Re-discovering a fact always resolves to the
//! node that already exists, and every discovery run ("execution") keeps a log
//! of the nodes it found first.
//!
//! ## Features
//!
//! - One [`Store`] contract, two interchangeable backends:
//!   a relational table emulation on `SQLite` and a native graph engine
//! - Identity-keyed, race-safe upserts
//! - One transaction per discovered record: all nodes and edges or none
//! - Versioned schema migrations for the relational backend
//!
//! ## Example
//!
//! ```rust,ignore
//! use assetdb::{DatabaseConfig, InsertInfo, OperationContext, Store, open_store};
//! use assetdb::models::DnsRecord;
//!
//! let store = open_store(&DatabaseConfig::default())?;
//! store.run_init_migration()?;
//!
//! let ctx = OperationContext::background();
//! let execution = store.insert_execution(&ctx, &["example.com".to_string()])?;
//! let info = InsertInfo::new(execution, "dns");
//! store.insert_cname(&info, &DnsRecord::new("www.example.com", "example.com"))?;
//! assert!(store.is_cname_node(&ctx, "www.example.com")?);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod context;
pub mod identity;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::{AssetDbConfig, BackendKind, DatabaseConfig};
pub use context::OperationContext;
pub use models::{
    Asset, AssetContent, AssetId, AssetType, ExecutionId, InsertInfo, NameAddrPair, Record,
    Relation, RelationType,
};
pub use storage::{Backend, Store, open_store};

/// Error type for assetdb operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Unparseable address, CIDR, ASN or hostname; mismatched record family |
/// | `OperationFailed` | Storage unreachable, SQL or graph engine failure, pool exhaustion |
/// | `MigrationFailed` | A schema migration cannot be read or applied |
/// | `Cancelled` | The operation's deadline passed or its cancel flag was set |
///
/// A lookup miss is not an error: it is reported as
/// [`Lookup::Absent`](services::upsert::Lookup) inside the upsert engine.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Malformed input. Never retried by the store.
    ///
    /// Raised when:
    /// - An IP address or CIDR block cannot be parsed
    /// - A hostname has no registrable domain under the public suffix list
    /// - An A record carries an IPv6 address (or AAAA an IPv4 one)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A storage operation failed.
    ///
    /// Raised when:
    /// - `SQLite` cannot be opened or a statement fails
    /// - No pooled connection becomes available in time
    /// - The graph engine rejects a commit
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed, with the record or identity being processed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A schema migration failed. Fatal on the startup path.
    #[error("migration '{migration}' failed: {cause}")]
    MigrationFailed {
        /// Migration identifier (file name).
        migration: String,
        /// The underlying cause.
        cause: String,
    },

    /// The operation was cancelled before it could finish.
    ///
    /// No partial writes remain: the enclosing transaction is rolled back.
    #[error("operation '{operation}' cancelled")]
    Cancelled {
        /// The operation that observed the cancellation.
        operation: String,
    },
}

impl Error {
    /// Builds an [`Error::OperationFailed`] from any displayable cause.
    pub fn backend(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Prefixes the operation of a backend error with the record being processed.
    ///
    /// Validation, migration and cancellation errors pass through unchanged.
    #[must_use]
    pub fn within(self, scope: &str) -> Self {
        match self {
            Self::OperationFailed { operation, cause } => Self::OperationFailed {
                operation: format!("{scope}: {operation}"),
                cause,
            },
            other => other,
        }
    }

    /// Returns true for malformed-input errors.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

/// Result type alias for assetdb operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("bad cidr".to_string());
        assert_eq!(err.to_string(), "invalid input: bad cidr");

        let err = Error::backend("insert_asset", "disk I/O error");
        assert_eq!(
            err.to_string(),
            "operation 'insert_asset' failed: disk I/O error"
        );

        let err = Error::MigrationFailed {
            migration: "001_initial_schema.sql".to_string(),
            cause: "syntax error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "migration '001_initial_schema.sql' failed: syntax error"
        );
    }

    #[test]
    fn test_within_only_scopes_backend_errors() {
        let err = Error::backend("insert_relation", "FOREIGN KEY constraint failed")
            .within("cname www.example.com -> example.com");
        assert!(matches!(
            err,
            Error::OperationFailed { ref operation, .. }
                if operation == "cname www.example.com -> example.com: insert_relation"
        ));

        let err = Error::InvalidInput("x".to_string()).within("a example.com");
        assert!(err.is_validation());
    }
}
