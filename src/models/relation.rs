//! Relation (edge) types.

use super::AssetId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of directed edge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// fqdn → fqdn alias.
    CnameRecord,
    /// fqdn → fqdn reverse pointer.
    PtrRecord,
    /// fqdn → name server fqdn.
    NsRecord,
    /// fqdn → mail exchanger fqdn.
    MxRecord,
    /// fqdn → IPv4 address.
    ARecord,
    /// fqdn → IPv6 address.
    AaaaRecord,
    /// service name → fqdn offering it.
    Service,
    /// service name → SRV target fqdn.
    SrvRecord,
    /// netblock → ip.
    Contains,
    /// as → netblock.
    Announces,
    /// as → rirorg.
    ManagedBy,
}

impl RelationType {
    /// Returns all relation type variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::CnameRecord,
            Self::PtrRecord,
            Self::NsRecord,
            Self::MxRecord,
            Self::ARecord,
            Self::AaaaRecord,
            Self::Service,
            Self::SrvRecord,
            Self::Contains,
            Self::Announces,
            Self::ManagedBy,
        ]
    }

    /// Returns the type tag as stored in the `type` column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CnameRecord => "cname_record",
            Self::PtrRecord => "ptr_record",
            Self::NsRecord => "ns_record",
            Self::MxRecord => "mx_record",
            Self::ARecord => "a_record",
            Self::AaaaRecord => "aaaa_record",
            Self::Service => "service",
            Self::SrvRecord => "srv_record",
            Self::Contains => "contains",
            Self::Announces => "announces",
            Self::ManagedBy => "managed_by",
        }
    }

    /// Parses a type tag.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
    }

    /// Relation types that resolve a name to an address.
    #[must_use]
    pub const fn address_records() -> &'static [Self] {
        &[Self::ARecord, Self::AaaaRecord]
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown relation type: {s}"))
    }
}

/// A stored directed edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Surrogate identifier.
    pub id: i64,
    /// Edge kind.
    pub relation_type: RelationType,
    /// Source asset.
    pub from_asset_id: AssetId,
    /// Target asset.
    pub to_asset_id: AssetId,
    /// When the edge was stored.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_type_roundtrip() {
        for t in RelationType::all() {
            assert_eq!(RelationType::parse(t.as_str()), Some(*t));
        }
        assert_eq!(RelationType::parse("CNAME_RECORD"), Some(RelationType::CnameRecord));
        assert!(RelationType::parse("txt_record").is_none());
    }

    #[test]
    fn test_serde_uses_tags() {
        let json = serde_json::to_string(&RelationType::ManagedBy).unwrap();
        assert_eq!(json, "\"managed_by\"");
    }
}
