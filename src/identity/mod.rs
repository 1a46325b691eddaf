//! Identity normalization.
//!
//! Turns raw discovery input into canonical [`AssetContent`] and derives the
//! [`IdentityKey`] that decides whether two facts are the same node.
//!
//! | Type | Normalization | Identity key |
//! |------|---------------|--------------|
//! | `fqdn` | lowercase, trailing dot removed, public suffix matched | `name` |
//! | `ip` | parsed, family classified | `address`, `version` |
//! | `netblock` | parsed, truncated to the network address | `cidr`, `version` |
//! | `as` | optional `AS` prefix stripped, parsed as `u32` | `number` |
//! | `rirorg` | trimmed | `name` |
//!
//! Normalization happens before any storage access, so a
//! [`Error::InvalidInput`](crate::Error::InvalidInput) never leaves a partial write.

mod fqdn;
mod network;

pub use fqdn::normalize_fqdn;
pub use network::{normalize_asn, normalize_ip, normalize_netblock};

use crate::models::{AssetContent, AssetType, RirOrganization};
use crate::{Error, Result};
use std::fmt;

/// Placeholder for registry fields the discovery engine does not report.
pub const UNKNOWN_REGISTRY: &str = "unknown";

/// Normalizes raw input into canonical content for `asset_type`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when `raw` cannot be normalized.
pub fn normalize(asset_type: AssetType, raw: &str) -> Result<AssetContent> {
    match asset_type {
        AssetType::Fqdn => normalize_fqdn(raw).map(AssetContent::Fqdn),
        AssetType::Ip => normalize_ip(raw, None).map(AssetContent::Ip),
        AssetType::Netblock => normalize_netblock(raw).map(AssetContent::Netblock),
        AssetType::AutonomousSystem => normalize_asn(raw).map(AssetContent::AutonomousSystem),
        AssetType::RirOrganization => normalize_rir_org(raw).map(AssetContent::RirOrganization),
    }
}

/// Normalizes a registry organization name.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a blank name.
pub fn normalize_rir_org(raw: &str) -> Result<RirOrganization> {
    let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.is_empty() {
        return Err(Error::InvalidInput(
            "registry organization name is empty".to_string(),
        ));
    }
    Ok(RirOrganization {
        name,
        rir_id: UNKNOWN_REGISTRY.to_string(),
        rir: UNKNOWN_REGISTRY.to_string(),
    })
}

/// One component of an identity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    /// A text field.
    Text(String),
    /// An integer field.
    Int(i64),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Int(n) => write!(f, "{n}"),
        }
    }
}

/// The content fields that determine uniqueness for a node type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    asset_type: AssetType,
    parts: Vec<(&'static str, KeyPart)>,
}

impl IdentityKey {
    /// Derives the identity key of canonical content.
    #[must_use]
    pub fn of(content: &AssetContent) -> Self {
        let parts = match content {
            AssetContent::Fqdn(c) => vec![("name", KeyPart::Text(c.name.clone()))],
            AssetContent::Ip(c) => vec![
                ("address", KeyPart::Text(c.address.to_string())),
                ("version", KeyPart::Text(c.version.as_str().to_string())),
            ],
            AssetContent::Netblock(c) => vec![
                ("cidr", KeyPart::Text(c.cidr.to_string())),
                ("version", KeyPart::Text(c.version.as_str().to_string())),
            ],
            AssetContent::AutonomousSystem(c) => {
                vec![("number", KeyPart::Int(i64::from(c.number)))]
            },
            AssetContent::RirOrganization(c) => vec![("name", KeyPart::Text(c.name.clone()))],
        };
        Self {
            asset_type: content.asset_type(),
            parts,
        }
    }

    /// Key of the fqdn node for an already-canonical name.
    #[must_use]
    pub fn fqdn(name: &str) -> Self {
        Self {
            asset_type: AssetType::Fqdn,
            parts: vec![("name", KeyPart::Text(name.to_string()))],
        }
    }

    /// The node type this key belongs to.
    #[must_use]
    pub const fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    /// Content field names and their values, in a fixed order.
    #[must_use]
    pub fn parts(&self) -> &[(&'static str, KeyPart)] {
        &self.parts
    }

    /// Stable string address of the node, e.g. `ip:v4:192.0.2.1`.
    ///
    /// Used as the node key in the native graph engine.
    #[must_use]
    pub fn node_key(&self) -> String {
        let mut key = self.asset_type.as_str().to_string();
        // Version leads the address so keys group by family.
        for (_, part) in self.parts.iter().rev() {
            key.push(':');
            key.push_str(&part.to_string());
        }
        key
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node_key())
    }
}
