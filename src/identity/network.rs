//! Address, netblock and AS number normalization.

use crate::models::{AutonomousSystem, IpAddress, IpVersion, Netblock};
use crate::{Error, Result};
use ipnet::IpNet;
use std::net::IpAddr;

/// Parses an IP address and classifies its family.
///
/// IPv4-mapped IPv6 input (`::ffff:192.0.2.1`) is stored as the IPv4 address.
///
/// When `expected` is given (A records carry v4, AAAA records v6), an address
/// of the other family is rejected.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for unparseable or mismatched addresses.
pub fn normalize_ip(raw: &str, expected: Option<IpVersion>) -> Result<IpAddress> {
    let trimmed = raw.trim();
    let address = trimmed
        .parse::<IpAddr>()
        .map_err(|e| Error::InvalidInput(format!("invalid IP address '{trimmed}': {e}")))?
        .to_canonical();
    let version = IpVersion::of(&address);

    if let Some(expected) = expected
        && expected != version
    {
        return Err(Error::InvalidInput(format!(
            "address {address} is {version}, expected {expected}"
        )));
    }

    Ok(IpAddress { address, version })
}

/// Parses CIDR notation into its network address and prefix.
///
/// Host bits are cleared, so `10.1.2.3/8` and `10.0.0.0/8` are the same block.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for malformed CIDR strings.
pub fn normalize_netblock(raw: &str) -> Result<Netblock> {
    let trimmed = raw.trim();
    let cidr: IpNet = trimmed
        .parse()
        .map_err(|e| Error::InvalidInput(format!("invalid CIDR '{trimmed}': {e}")))?;
    let cidr = cidr.trunc();
    let version = IpVersion::of(&cidr.network());
    Ok(Netblock { cidr, version })
}

/// Parses an AS number, with or without an `AS` prefix.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when the number is missing or out of range.
pub fn normalize_asn(raw: &str) -> Result<AutonomousSystem> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("AS")
        .or_else(|| trimmed.strip_prefix("as"))
        .unwrap_or(trimmed);
    let number = digits
        .parse::<u32>()
        .map_err(|e| Error::InvalidInput(format!("invalid AS number '{trimmed}': {e}")))?;
    Ok(AutonomousSystem { number })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_version_enforced() {
        assert!(normalize_ip("192.0.2.1", Some(IpVersion::V4)).is_ok());
        assert!(normalize_ip("2001:db8::1", Some(IpVersion::V4)).is_err());
        assert!(normalize_ip("192.0.2.1", Some(IpVersion::V6)).is_err());
    }

    #[test]
    fn test_ipv4_mapped_address_is_v4() {
        let mapped = normalize_ip("::ffff:192.0.2.1", Some(IpVersion::V4)).unwrap();
        assert_eq!(mapped, normalize_ip("192.0.2.1", None).unwrap());
        assert!(normalize_ip("::ffff:192.0.2.1", Some(IpVersion::V6)).is_err());
    }

    #[test]
    fn test_ip_classification() {
        let ip = normalize_ip(" 2001:db8::1 ", None).unwrap();
        assert_eq!(ip.version, IpVersion::V6);
    }

    #[test]
    fn test_netblock_v6() {
        let block = normalize_netblock("2001:db8:1::/48").unwrap();
        assert_eq!(block.version, IpVersion::V6);
        assert_eq!(block.cidr.to_string(), "2001:db8:1::/48");
    }

    #[test]
    fn test_netblock_requires_prefix() {
        assert!(normalize_netblock("10.0.0.1").is_err());
    }

    #[test]
    fn test_asn_forms() {
        assert_eq!(normalize_asn("13335").unwrap().number, 13335);
        assert_eq!(normalize_asn("as15133").unwrap().number, 15133);
        assert!(normalize_asn("-1").is_err());
    }
}
