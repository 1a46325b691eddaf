//! Row conversion for the `assets` and `relations` tables.

use crate::models::{Asset, AssetContent, AssetId, AssetType, Relation, RelationType};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::Row;

/// Column list matching [`AssetRow::from_row`].
pub const ASSET_COLUMNS: &str = "id, created_at, type, content";

/// Column list matching [`RelationRow::from_row`].
pub const RELATION_COLUMNS: &str = "id, created_at, type, from_asset_id, to_asset_id";

/// An `assets` row with its columns still in storage form.
#[derive(Debug)]
pub struct AssetRow {
    /// Surrogate id.
    pub id: i64,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Type tag.
    pub asset_type: String,
    /// JSON payload.
    pub content: String,
}

impl AssetRow {
    /// Reads the [`ASSET_COLUMNS`] of a row.
    ///
    /// # Errors
    ///
    /// Returns the `SQLite` error for a missing or mistyped column.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            asset_type: row.get(2)?,
            content: row.get(3)?,
        })
    }

    /// Decodes the type tag and payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the stored row is not a valid asset.
    pub fn into_asset(self) -> Result<Asset> {
        let asset_type = AssetType::parse(&self.asset_type).ok_or_else(|| {
            Error::backend(
                "decode_asset",
                format!("asset {} has unknown type '{}'", self.id, self.asset_type),
            )
        })?;
        let value: serde_json::Value = serde_json::from_str(&self.content)
            .map_err(|e| Error::backend("decode_asset", format!("asset {}: {e}", self.id)))?;
        let content = AssetContent::from_json(asset_type, value)
            .map_err(|e| Error::backend("decode_asset", format!("asset {}: {e}", self.id)))?;

        Ok(Asset {
            id: AssetId::new(self.id),
            content,
            created_at: self.created_at,
        })
    }
}

/// A `relations` row with its columns still in storage form.
#[derive(Debug)]
pub struct RelationRow {
    /// Surrogate id.
    pub id: i64,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Relation type tag.
    pub relation_type: String,
    /// Source asset id.
    pub from_asset_id: i64,
    /// Target asset id.
    pub to_asset_id: i64,
}

impl RelationRow {
    /// Reads the [`RELATION_COLUMNS`] of a row.
    ///
    /// # Errors
    ///
    /// Returns the `SQLite` error for a missing or mistyped column.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            relation_type: row.get(2)?,
            from_asset_id: row.get(3)?,
            to_asset_id: row.get(4)?,
        })
    }

    /// Decodes the relation type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] for an unknown relation type.
    pub fn into_relation(self) -> Result<Relation> {
        let relation_type = RelationType::parse(&self.relation_type).ok_or_else(|| {
            Error::backend(
                "decode_relation",
                format!("relation {} has unknown type '{}'", self.id, self.relation_type),
            )
        })?;
        Ok(Relation {
            id: self.id,
            relation_type,
            from_asset_id: AssetId::new(self.from_asset_id),
            to_asset_id: AssetId::new(self.to_asset_id),
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_row_decodes() {
        let row = AssetRow {
            id: 3,
            created_at: Utc::now(),
            asset_type: "as".to_string(),
            content: r#"{"number":13335}"#.to_string(),
        };
        let asset = row.into_asset().unwrap();
        assert_eq!(asset.id, AssetId::new(3));
        assert_eq!(asset.content.label(), "AS13335");
    }

    #[test]
    fn test_asset_row_rejects_mismatched_payload() {
        let row = AssetRow {
            id: 4,
            created_at: Utc::now(),
            asset_type: "ip".to_string(),
            content: r#"{"name":"example.com","tld":"com"}"#.to_string(),
        };
        assert!(matches!(
            row.into_asset(),
            Err(Error::OperationFailed { ref operation, .. }) if operation == "decode_asset"
        ));
    }

    #[test]
    fn test_relation_row_unknown_type() {
        let row = RelationRow {
            id: 1,
            created_at: Utc::now(),
            relation_type: "txt_record".to_string(),
            from_asset_id: 1,
            to_asset_id: 2,
        };
        assert!(row.into_relation().is_err());
    }
}
