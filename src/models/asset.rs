//! Asset (node) types.
//!
//! An asset is one typed fact in the graph. Its [`AssetContent`] is the
//! canonical, normalized payload produced by [`crate::identity::normalize`];
//! the content never changes after the asset is created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Surrogate identifier of a stored asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(i64);

impl AssetId {
    /// Wraps a raw backend identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of asset kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    /// Fully qualified domain name.
    #[serde(rename = "fqdn")]
    Fqdn,
    /// Single IP address.
    #[serde(rename = "ip")]
    Ip,
    /// CIDR network block.
    #[serde(rename = "netblock")]
    Netblock,
    /// Autonomous system.
    #[serde(rename = "as")]
    AutonomousSystem,
    /// Regional internet registry organization.
    #[serde(rename = "rirorg")]
    RirOrganization,
}

impl AssetType {
    /// Returns all asset type variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Fqdn,
            Self::Ip,
            Self::Netblock,
            Self::AutonomousSystem,
            Self::RirOrganization,
        ]
    }

    /// Returns the type tag as stored in the `type` column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fqdn => "fqdn",
            Self::Ip => "ip",
            Self::Netblock => "netblock",
            Self::AutonomousSystem => "as",
            Self::RirOrganization => "rirorg",
        }
    }

    /// Parses a type tag.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fqdn" => Some(Self::Fqdn),
            "ip" | "ipaddress" => Some(Self::Ip),
            "netblock" | "cidr" => Some(Self::Netblock),
            "as" | "asn" | "autonomoussystem" => Some(Self::AutonomousSystem),
            "rirorg" | "rirorganization" => Some(Self::RirOrganization),
            _ => None,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown asset type: {s}"))
    }
}

/// IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

impl IpVersion {
    /// Classifies an address.
    #[must_use]
    pub const fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Returns `"v4"` or `"v6"`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::V4 => "v4",
            Self::V6 => "v6",
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Domain name content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fqdn {
    /// Canonical hostname.
    pub name: String,
    /// Matched public suffix.
    pub tld: String,
}

/// IP address content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpAddress {
    /// The address.
    pub address: IpAddr,
    /// Address family.
    pub version: IpVersion,
}

/// Netblock content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Netblock {
    /// Network address and prefix length, e.g. `10.0.0.0/8`.
    pub cidr: ipnet::IpNet,
    /// Address family.
    pub version: IpVersion,
}

/// Autonomous system content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AutonomousSystem {
    /// AS number.
    pub number: u32,
}

/// Registry organization content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RirOrganization {
    /// Organization name (identity key).
    pub name: String,
    /// Registry handle.
    pub rir_id: String,
    /// Registry name.
    pub rir: String,
}

/// Canonical payload of an asset, tagged by [`AssetType`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetContent {
    /// `fqdn` payload.
    Fqdn(Fqdn),
    /// `ip` payload.
    Ip(IpAddress),
    /// `netblock` payload.
    Netblock(Netblock),
    /// `as` payload.
    AutonomousSystem(AutonomousSystem),
    /// `rirorg` payload.
    RirOrganization(RirOrganization),
}

impl AssetContent {
    /// Returns the type tag for this payload.
    #[must_use]
    pub const fn asset_type(&self) -> AssetType {
        match self {
            Self::Fqdn(_) => AssetType::Fqdn,
            Self::Ip(_) => AssetType::Ip,
            Self::Netblock(_) => AssetType::Netblock,
            Self::AutonomousSystem(_) => AssetType::AutonomousSystem,
            Self::RirOrganization(_) => AssetType::RirOrganization,
        }
    }

    /// Serializes the payload as the JSON stored in the `content` column.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        // Every payload is a plain struct of strings and numbers, so
        // serialization cannot fail.
        let value = match self {
            Self::Fqdn(c) => serde_json::to_value(c),
            Self::Ip(c) => serde_json::to_value(c),
            Self::Netblock(c) => serde_json::to_value(c),
            Self::AutonomousSystem(c) => serde_json::to_value(c),
            Self::RirOrganization(c) => serde_json::to_value(c),
        };
        value.unwrap_or(serde_json::Value::Null)
    }

    /// Decodes a stored payload for the given type tag.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when the payload does not match the type.
    pub fn from_json(
        asset_type: AssetType,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match asset_type {
            AssetType::Fqdn => Self::Fqdn(serde_json::from_value(value)?),
            AssetType::Ip => Self::Ip(serde_json::from_value(value)?),
            AssetType::Netblock => Self::Netblock(serde_json::from_value(value)?),
            AssetType::AutonomousSystem => Self::AutonomousSystem(serde_json::from_value(value)?),
            AssetType::RirOrganization => Self::RirOrganization(serde_json::from_value(value)?),
        })
    }

    /// Human-readable label of the identity, used in logs and error context.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Fqdn(c) => c.name.clone(),
            Self::Ip(c) => c.address.to_string(),
            Self::Netblock(c) => c.cidr.to_string(),
            Self::AutonomousSystem(c) => format!("AS{}", c.number),
            Self::RirOrganization(c) => c.name.clone(),
        }
    }
}

impl fmt::Display for AssetContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asset_type(), self.label())
    }
}

/// A stored asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Surrogate identifier.
    pub id: AssetId,
    /// Canonical content.
    pub content: AssetContent,
    /// When the asset was first stored.
    pub created_at: DateTime<Utc>,
}

impl Asset {
    /// Returns the asset's type tag.
    #[must_use]
    pub const fn asset_type(&self) -> AssetType {
        self.content.asset_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_type_roundtrip() {
        for t in AssetType::all() {
            assert_eq!(AssetType::parse(t.as_str()), Some(*t));
            assert_eq!(t.as_str().parse::<AssetType>(), Ok(*t));
        }
        assert!(AssetType::parse("mailbox").is_none());
    }

    #[test]
    fn test_ip_content_json_shape() {
        let content = AssetContent::Ip(IpAddress {
            address: "93.184.216.34".parse().unwrap(),
            version: IpVersion::V4,
        });
        let json = content.to_json();
        assert_eq!(json["address"], "93.184.216.34");
        assert_eq!(json["version"], "v4");

        let decoded = AssetContent::from_json(AssetType::Ip, json).unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn test_netblock_content_json_shape() {
        let content = AssetContent::Netblock(Netblock {
            cidr: "10.0.0.0/8".parse().unwrap(),
            version: IpVersion::V4,
        });
        assert_eq!(content.to_json()["cidr"], "10.0.0.0/8");
    }

    #[test]
    fn test_from_json_rejects_wrong_shape() {
        let json = serde_json::json!({ "number": 13335 });
        assert!(AssetContent::from_json(AssetType::Fqdn, json).is_err());
    }

    #[test]
    fn test_display_includes_type() {
        let content = AssetContent::AutonomousSystem(AutonomousSystem { number: 13335 });
        assert_eq!(content.to_string(), "as:AS13335");
    }
}
