//! Data models for assetdb.
//!
//! This module contains the node, edge and provenance types shared by every
//! backend, plus the record payloads handed in by the discovery engine.

mod asset;
mod execution;
mod record;
mod relation;

pub use asset::{
    Asset, AssetContent, AssetId, AssetType, AutonomousSystem, Fqdn, IpAddress, IpVersion,
    Netblock, RirOrganization,
};
pub use execution::{Execution, ExecutionId, ExecutionLog, decode_domains, encode_domains};
pub use record::{
    DnsRecord, HostRecord, Infrastructure, InsertInfo, NameAddrPair, NameRecordKind, Record,
    ServiceRecord,
};
pub use relation::{Relation, RelationType};
