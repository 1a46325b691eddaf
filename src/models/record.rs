//! Discovered records and the metadata that accompanies their insertion.

use super::{ExecutionId, RelationType};
use crate::context::OperationContext;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who is inserting, and under which run.
///
/// `source` names the data source that produced the record (a resolver, a
/// certificate log, a scraper). It is carried into every log line of the
/// write; `context` bounds the operation in time.
#[derive(Debug, Clone)]
pub struct InsertInfo {
    /// Run that owns the provenance of newly created nodes.
    pub execution_id: ExecutionId,
    /// Data source label.
    pub source: String,
    /// Cancellation and deadline.
    pub context: OperationContext,
}

impl InsertInfo {
    /// Creates insert metadata with a background context.
    #[must_use]
    pub fn new(execution_id: ExecutionId, source: impl Into<String>) -> Self {
        Self {
            execution_id,
            source: source.into(),
            context: OperationContext::background(),
        }
    }

    /// Replaces the operation context.
    #[must_use]
    pub fn with_context(mut self, context: OperationContext) -> Self {
        self.context = context;
        self
    }
}

/// An A or AAAA answer: `fqdn` resolves to `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Queried name.
    pub fqdn: String,
    /// Answer address.
    pub address: String,
}

impl HostRecord {
    /// Creates a host record.
    #[must_use]
    pub fn new(fqdn: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            fqdn: fqdn.into(),
            address: address.into(),
        }
    }
}

/// A name-to-name answer (CNAME, PTR, NS, MX).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Owner name.
    pub fqdn: String,
    /// Answer name.
    pub target: String,
}

impl DnsRecord {
    /// Creates a name-to-name record.
    #[must_use]
    pub fn new(fqdn: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            fqdn: fqdn.into(),
            target: target.into(),
        }
    }
}

/// An SRV answer: `service` (e.g. `_sip._tcp.example.com`) is offered by
/// `fqdn` and served at `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Domain the service belongs to.
    pub fqdn: String,
    /// Service owner name.
    pub service: String,
    /// Host serving the service.
    pub target: String,
}

impl ServiceRecord {
    /// Creates an SRV record.
    #[must_use]
    pub fn new(
        fqdn: impl Into<String>,
        service: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            fqdn: fqdn.into(),
            service: service.into(),
            target: target.into(),
        }
    }
}

/// A routing announcement: `asn` (registered to `description`) announces
/// `cidr`, which contains `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Infrastructure {
    /// Announcing AS number.
    pub asn: u32,
    /// Registry organization holding the AS.
    pub description: String,
    /// Address inside the block.
    pub address: String,
    /// Announced block.
    pub cidr: String,
}

/// Name-to-name record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameRecordKind {
    /// CNAME.
    Cname,
    /// PTR.
    Ptr,
    /// NS.
    Ns,
    /// MX.
    Mx,
}

impl NameRecordKind {
    /// Edge written for this record kind.
    #[must_use]
    pub const fn relation(self) -> RelationType {
        match self {
            Self::Cname => RelationType::CnameRecord,
            Self::Ptr => RelationType::PtrRecord,
            Self::Ns => RelationType::NsRecord,
            Self::Mx => RelationType::MxRecord,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Cname => "cname",
            Self::Ptr => "ptr",
            Self::Ns => "ns",
            Self::Mx => "mx",
        }
    }
}

/// Any record the relation builder knows how to decompose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// IPv4 answer.
    A(HostRecord),
    /// IPv6 answer.
    Aaaa(HostRecord),
    /// CNAME, PTR, NS or MX answer.
    Name(NameRecordKind, DnsRecord),
    /// SRV answer.
    Srv(ServiceRecord),
    /// Routing announcement.
    Infrastructure(Infrastructure),
}

impl Record {
    /// Short kind label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::A(_) => "a",
            Self::Aaaa(_) => "aaaa",
            Self::Name(kind, _) => kind.label(),
            Self::Srv(_) => "srv",
            Self::Infrastructure(_) => "infrastructure",
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A(r) | Self::Aaaa(r) => write!(f, "{} {} -> {}", self.kind(), r.fqdn, r.address),
            Self::Name(_, r) => write!(f, "{} {} -> {}", self.kind(), r.fqdn, r.target),
            Self::Srv(r) => write!(
                f,
                "srv {} ({}) -> {}",
                r.service, r.fqdn, r.target
            ),
            Self::Infrastructure(r) => write!(
                f,
                "infrastructure AS{} {} contains {}",
                r.asn, r.cidr, r.address
            ),
        }
    }
}

/// One row of name-to-address resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameAddrPair {
    /// Domain name.
    pub name: String,
    /// Address it resolves to.
    pub addr: String,
}

impl NameAddrPair {
    /// Creates a pair.
    #[must_use]
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }
}
