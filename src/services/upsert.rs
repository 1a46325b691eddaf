//! Identity-keyed upsert engine.
//!
//! The engine is backend-agnostic: it drives an [`AssetWriter`], the
//! transaction-scoped handle each backend hands out for one operation.
//!
//! ```text
//! raw input ──normalize──▶ content ──IdentityKey──▶ lookup
//!                                                    │
//!                          Found(id) ◀───────────────┤
//!                                                    ▼ Absent
//!                                        insert-if-absent
//!                                         │            │
//!                            Inserted(id) ▼            ▼ Existing(id)
//!                                 log provenance     (lost a race)
//! ```

use crate::identity::{self, IdentityKey};
use crate::models::{AssetContent, AssetId, AssetType, ExecutionId, RelationType};
use crate::{OperationContext, Result};

/// Outcome of an identity lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// A node with the identity exists.
    Found(AssetId),
    /// No node with the identity exists yet.
    Absent,
}

/// Outcome of an atomic insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// This call created the node.
    Inserted(AssetId),
    /// Another writer created it first; this is its id.
    Existing(AssetId),
}

impl Insertion {
    /// The node id, whoever created it.
    #[must_use]
    pub const fn id(self) -> AssetId {
        match self {
            Self::Inserted(id) | Self::Existing(id) => id,
        }
    }
}

/// Transaction-scoped write access to one backend.
///
/// Everything done through a writer becomes visible together when the backend
/// commits it, or not at all.
pub trait AssetWriter {
    /// Context the writer checks before each storage step.
    fn context(&self) -> &OperationContext;

    /// Resolves an identity to an existing node.
    ///
    /// # Errors
    ///
    /// Returns a backend error if storage cannot be read.
    fn lookup(&mut self, key: &IdentityKey) -> Result<Lookup>;

    /// Inserts canonical content unless a node with the same identity exists.
    ///
    /// # Errors
    ///
    /// Returns a backend error if storage cannot be written.
    fn insert_if_absent(&mut self, content: &AssetContent) -> Result<Insertion>;

    /// Creates a directed edge. An identical edge is kept once.
    ///
    /// # Errors
    ///
    /// Returns a backend error if either endpoint is missing or storage fails.
    fn relate(&mut self, relation: RelationType, from: AssetId, to: AssetId) -> Result<()>;

    /// Records that `execution` discovered `asset`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the execution does not exist or storage fails.
    fn log_discovery(&mut self, execution: ExecutionId, asset: AssetId) -> Result<()>;
}

/// Normalizes `raw` and upserts it.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidInput`] before touching storage when `raw`
/// cannot be normalized, and backend errors unchanged otherwise.
pub fn upsert<W: AssetWriter + ?Sized>(
    writer: &mut W,
    execution: ExecutionId,
    asset_type: AssetType,
    raw: &str,
) -> Result<AssetId> {
    let content = identity::normalize(asset_type, raw)?;
    upsert_content(writer, execution, &content)
}

/// Upserts already-canonical content.
///
/// A hit is a pure lookup. Provenance is written only by the call that
/// actually created the node.
///
/// # Errors
///
/// Returns backend errors unchanged.
pub fn upsert_content<W: AssetWriter + ?Sized>(
    writer: &mut W,
    execution: ExecutionId,
    content: &AssetContent,
) -> Result<AssetId> {
    let key = IdentityKey::of(content);
    writer.context().check("upsert")?;

    if let Lookup::Found(id) = writer.lookup(&key)? {
        tracing::trace!(identity = %key, asset_id = %id, "Identity resolved to existing asset");
        metrics::counter!("assetdb_upserts_total", "type" => content.asset_type().as_str(), "outcome" => "found")
            .increment(1);
        return Ok(id);
    }

    writer.context().check("upsert")?;
    match writer.insert_if_absent(content)? {
        Insertion::Inserted(id) => {
            writer.log_discovery(execution, id)?;
            tracing::debug!(identity = %key, asset_id = %id, execution_id = %execution, "Created asset");
            metrics::counter!("assetdb_upserts_total", "type" => content.asset_type().as_str(), "outcome" => "inserted")
                .increment(1);
            Ok(id)
        },
        Insertion::Existing(id) => {
            tracing::debug!(identity = %key, asset_id = %id, "Concurrent writer created asset first");
            metrics::counter!("assetdb_upserts_total", "type" => content.asset_type().as_str(), "outcome" => "raced")
                .increment(1);
            Ok(id)
        },
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingWriter;
    use super::*;
    use crate::Error;

    const RUN: ExecutionId = ExecutionId::new(7);

    #[test]
    fn test_second_upsert_is_lookup() {
        let mut writer = RecordingWriter::default();
        let first = upsert(&mut writer, RUN, AssetType::Fqdn, "www.example.com").unwrap();
        let second = upsert(&mut writer, RUN, AssetType::Fqdn, "WWW.EXAMPLE.COM.").unwrap();

        assert_eq!(first, second);
        assert_eq!(writer.nodes.len(), 1);
        assert_eq!(writer.logs, vec![(RUN, first)]);
    }

    #[test]
    fn test_lost_race_does_not_log() {
        let mut writer = RecordingWriter {
            raced: Some(AssetId::new(99)),
            ..RecordingWriter::default()
        };
        let id = upsert(&mut writer, RUN, AssetType::Ip, "192.0.2.1").unwrap();
        assert_eq!(id, AssetId::new(99));
        assert!(writer.logs.is_empty());
    }

    #[test]
    fn test_validation_happens_before_storage() {
        let mut writer = RecordingWriter::default();
        let err = upsert(&mut writer, RUN, AssetType::Netblock, "not-a-cidr").unwrap_err();
        assert!(err.is_validation());
        assert!(writer.nodes.is_empty());
    }

    #[test]
    fn test_cancelled_context_stops_upsert() {
        let writer_ctx = OperationContext::background();
        writer_ctx.cancel();
        let mut writer = RecordingWriter {
            context: writer_ctx,
            ..RecordingWriter::default()
        };
        let err = upsert(&mut writer, RUN, AssetType::Fqdn, "example.com").unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(writer.nodes.is_empty());
    }
}
