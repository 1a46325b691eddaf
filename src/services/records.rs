//! Relation builder.
//!
//! Decomposes one discovered record into node upserts plus typed edges:
//!
//! | Record | Nodes | Edges |
//! |--------|-------|-------|
//! | A / AAAA | fqdn, ip | `a_record` / `aaaa_record` fqdn → ip |
//! | CNAME / PTR / NS / MX | fqdn, fqdn | `<kind>_record` owner → target |
//! | SRV | service, fqdn, target | `service` service → fqdn, `srv_record` service → target |
//! | Infrastructure | ip, netblock, as, rirorg | `contains` netblock → ip, `announces` as → netblock, `managed_by` as → rirorg |
//!
//! Every input is normalized before the first write, so a malformed record
//! fails without touching storage. The caller commits the writer only when
//! [`apply_record`] returns `Ok`.

use super::upsert::{AssetWriter, upsert_content};
use crate::identity::{self, normalize_asn, normalize_fqdn, normalize_ip, normalize_netblock};
use crate::models::{AssetContent, ExecutionId, IpVersion, Record, RelationType};
use crate::Result;

/// A record reduced to canonical nodes and the edges between them.
///
/// Edges index into `nodes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPlan {
    /// Nodes to upsert, in order.
    pub nodes: Vec<AssetContent>,
    /// `(relation, from, to)` as positions in `nodes`.
    pub edges: Vec<(RelationType, usize, usize)>,
}

impl RecordPlan {
    /// Normalizes every input of `record`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] for the first field that does not
    /// normalize.
    pub fn build(record: &Record) -> Result<Self> {
        let plan = match record {
            Record::A(r) => Self {
                nodes: vec![
                    AssetContent::Fqdn(normalize_fqdn(&r.fqdn)?),
                    AssetContent::Ip(normalize_ip(&r.address, Some(IpVersion::V4))?),
                ],
                edges: vec![(RelationType::ARecord, 0, 1)],
            },
            Record::Aaaa(r) => Self {
                nodes: vec![
                    AssetContent::Fqdn(normalize_fqdn(&r.fqdn)?),
                    AssetContent::Ip(normalize_ip(&r.address, Some(IpVersion::V6))?),
                ],
                edges: vec![(RelationType::AaaaRecord, 0, 1)],
            },
            Record::Name(kind, r) => Self {
                nodes: vec![
                    AssetContent::Fqdn(normalize_fqdn(&r.fqdn)?),
                    AssetContent::Fqdn(normalize_fqdn(&r.target)?),
                ],
                edges: vec![(kind.relation(), 0, 1)],
            },
            Record::Srv(r) => Self {
                nodes: vec![
                    AssetContent::Fqdn(normalize_fqdn(&r.service)?),
                    AssetContent::Fqdn(normalize_fqdn(&r.fqdn)?),
                    AssetContent::Fqdn(normalize_fqdn(&r.target)?),
                ],
                edges: vec![(RelationType::Service, 0, 1), (RelationType::SrvRecord, 0, 2)],
            },
            Record::Infrastructure(r) => Self {
                nodes: vec![
                    AssetContent::Ip(normalize_ip(&r.address, None)?),
                    AssetContent::Netblock(normalize_netblock(&r.cidr)?),
                    AssetContent::AutonomousSystem(normalize_asn(&r.asn.to_string())?),
                    AssetContent::RirOrganization(identity::normalize_rir_org(&r.description)?),
                ],
                edges: vec![
                    (RelationType::Contains, 1, 0),
                    (RelationType::Announces, 2, 1),
                    (RelationType::ManagedBy, 2, 3),
                ],
            },
        };
        Ok(plan)
    }
}

/// Applies `record` through `writer`.
///
/// Backend failures carry the record as context, e.g.
/// `cname www.example.com -> example.com: insert_relation`.
///
/// # Errors
///
/// Returns the first validation, backend or cancellation error. The writer's
/// transaction must then be discarded.
pub fn apply_record<W: AssetWriter + ?Sized>(
    writer: &mut W,
    execution: ExecutionId,
    record: &Record,
) -> Result<()> {
    let scope = record.to_string();
    let plan = RecordPlan::build(record)?;

    let mut ids = Vec::with_capacity(plan.nodes.len());
    for content in &plan.nodes {
        let id = upsert_content(writer, execution, content).map_err(|e| e.within(&scope))?;
        ids.push(id);
    }

    for &(relation, from, to) in &plan.edges {
        writer.context().check("insert_relation")?;
        writer
            .relate(relation, ids[from], ids[to])
            .map_err(|e| e.within(&scope))?;
    }

    metrics::counter!("assetdb_records_total", "kind" => record.kind()).increment(1);
    tracing::debug!(record = %scope, nodes = ids.len(), edges = plan.edges.len(), "Applied record");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::identity::IdentityKey;
    use crate::models::{
        AssetId, DnsRecord, HostRecord, Infrastructure, NameRecordKind, ServiceRecord,
    };
    use crate::services::upsert::testing::RecordingWriter;

    const RUN: ExecutionId = ExecutionId::new(1);

    fn id_of(writer: &RecordingWriter, name: &str) -> AssetId {
        writer.nodes[&IdentityKey::fqdn(name)]
    }

    #[test]
    fn test_cname_creates_two_nodes_and_edge() {
        let mut writer = RecordingWriter::default();
        let record = Record::Name(
            NameRecordKind::Cname,
            DnsRecord::new("www.example.com", "example.com"),
        );
        apply_record(&mut writer, RUN, &record).unwrap();

        let www = id_of(&writer, "www.example.com");
        let apex = id_of(&writer, "example.com");
        assert_eq!(writer.edges, vec![(RelationType::CnameRecord, www, apex)]);
        assert_eq!(writer.logs.len(), 2);
    }

    #[test]
    fn test_srv_edges_point_from_service() {
        let mut writer = RecordingWriter::default();
        let record = Record::Srv(ServiceRecord::new(
            "example.com",
            "_sip._tcp.example.com",
            "sip.example.com",
        ));
        apply_record(&mut writer, RUN, &record).unwrap();

        let service = id_of(&writer, "_sip._tcp.example.com");
        assert_eq!(
            writer.edges,
            vec![
                (RelationType::Service, service, id_of(&writer, "example.com")),
                (RelationType::SrvRecord, service, id_of(&writer, "sip.example.com")),
            ]
        );
    }

    #[test]
    fn test_infrastructure_plan() {
        let record = Record::Infrastructure(Infrastructure {
            asn: 15133,
            description: "EDGECAST".to_string(),
            address: "93.184.216.34".to_string(),
            cidr: "93.184.216.0/24".to_string(),
        });
        let plan = RecordPlan::build(&record).unwrap();
        assert_eq!(plan.nodes.len(), 4);
        assert_eq!(plan.edges[0], (RelationType::Contains, 1, 0));
        assert_eq!(plan.edges[2], (RelationType::ManagedBy, 2, 3));
    }

    #[test]
    fn test_wrong_family_rejected_before_writes() {
        let mut writer = RecordingWriter::default();
        let record = Record::A(HostRecord::new("www.example.com", "2001:db8::1"));
        let err = apply_record(&mut writer, RUN, &record).unwrap_err();
        assert!(err.is_validation());
        assert!(writer.nodes.is_empty());
    }

    #[test]
    fn test_backend_error_carries_record() {
        let mut writer = RecordingWriter {
            fail_relate: true,
            ..RecordingWriter::default()
        };
        let record = Record::Aaaa(HostRecord::new("www.example.com", "2001:db8::1"));
        let err = apply_record(&mut writer, RUN, &record).unwrap_err();
        assert!(matches!(
            err,
            Error::OperationFailed { ref operation, .. }
                if operation == "aaaa www.example.com -> 2001:db8::1: insert_relation"
        ));
    }
}
