//! Property-based tests for identity normalization and upserts.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Normalization is idempotent
//! - Spelling variants of one fact share an identity key
//! - Netblocks with different host bits collapse to one block
//! - Repeated upserts return the same node and log provenance once

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use assetdb::identity::{IdentityKey, normalize, normalize_netblock};
use assetdb::storage::graph::{GraphStore, MemoryGraphEngine};
use assetdb::{AssetType, InsertInfo, OperationContext, Store};
use proptest::prelude::*;
use std::net::{Ipv4Addr, Ipv6Addr};

fn hostname() -> impl Strategy<Value = String> {
    (
        prop::collection::vec("[a-z0-9]([a-z0-9-]{0,10}[a-z0-9])?", 1..4),
        prop::sample::select(vec!["com", "net", "org", "co.uk", "io"]),
    )
        .prop_map(|(labels, suffix)| format!("{}.{suffix}", labels.join(".")))
}

proptest! {
    /// Property: normalizing a normalized label yields the same content.
    #[test]
    fn prop_fqdn_normalization_idempotent(name in hostname()) {
        let once = normalize(AssetType::Fqdn, &name).unwrap();
        let twice = normalize(AssetType::Fqdn, &once.label()).unwrap();
        prop_assert_eq!(once, twice);
    }

    /// Property: case and trailing dot do not change an fqdn's identity.
    #[test]
    fn prop_fqdn_spelling_shares_key(name in hostname()) {
        let plain = normalize(AssetType::Fqdn, &name).unwrap();
        let shouted = normalize(AssetType::Fqdn, &format!("{}.", name.to_uppercase())).unwrap();
        prop_assert_eq!(IdentityKey::of(&plain), IdentityKey::of(&shouted));
    }

    /// Property: an IPv4 address keeps its identity through formatting.
    #[test]
    fn prop_ipv4_identity_stable(octets in any::<[u8; 4]>()) {
        let addr = Ipv4Addr::from(octets).to_string();
        let content = normalize(AssetType::Ip, &format!("  {addr} ")).unwrap();
        prop_assert_eq!(content.label(), addr);
        let key = IdentityKey::of(&content);
        prop_assert_eq!(key.asset_type(), AssetType::Ip);
    }

    /// Property: IPv4 and IPv6 identities never collide.
    #[test]
    fn prop_ip_families_distinct(v4 in any::<[u8; 4]>(), v6 in any::<[u16; 8]>()) {
        let a = normalize(AssetType::Ip, &Ipv4Addr::from(v4).to_string()).unwrap();
        let b = normalize(AssetType::Ip, &Ipv6Addr::from(v6).to_string()).unwrap();
        prop_assert_ne!(IdentityKey::of(&a).node_key(), IdentityKey::of(&b).node_key());
    }

    /// Property: host bits never change a netblock.
    #[test]
    fn prop_netblock_truncates(octets in any::<[u8; 4]>(), prefix in 0u8..=32) {
        let raw = format!("{}/{prefix}", Ipv4Addr::from(octets));
        let block = normalize_netblock(&raw).unwrap();
        let again = normalize_netblock(&block.cidr.to_string()).unwrap();
        prop_assert_eq!(block.cidr.prefix_len(), prefix);
        prop_assert_eq!(block, again);
    }

    /// Property: AS numbers parse the same with or without the prefix.
    #[test]
    fn prop_asn_prefix_optional(number in any::<u32>()) {
        let bare = normalize(AssetType::AutonomousSystem, &number.to_string()).unwrap();
        let prefixed = normalize(AssetType::AutonomousSystem, &format!("AS{number}")).unwrap();
        prop_assert_eq!(bare, prefixed);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: repeated upserts of spelling variants return one node, logged once.
    #[test]
    fn prop_upsert_idempotent(names in prop::collection::vec(hostname(), 1..8)) {
        let store = GraphStore::new(MemoryGraphEngine::new());
        let ctx = OperationContext::background();
        let execution = store.insert_execution(&ctx, &[]).unwrap();
        let info = InsertInfo::new(execution, "proptest");

        for name in &names {
            let first = store.upsert(&info, AssetType::Fqdn, name).unwrap();
            let second = store
                .upsert(&info, AssetType::Fqdn, &format!("{}.", name.to_uppercase()))
                .unwrap();
            prop_assert_eq!(first, second);
        }

        let mut distinct: Vec<String> = names
            .iter()
            .map(|n| normalize(AssetType::Fqdn, n).unwrap().label())
            .collect();
        distinct.sort();
        distinct.dedup();

        let mut logged = store.event_fqdns(&ctx, execution).unwrap();
        logged.sort();
        prop_assert_eq!(logged, distinct);
    }
}
