//! Domain name normalization against the public suffix list.

use crate::models::Fqdn;
use crate::{Error, Result};

const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Normalizes a hostname into canonical [`Fqdn`] content.
///
/// The name is trimmed, lowercased and stripped of its trailing dot. It must
/// consist of LDH labels (underscores allowed for service names) and have a
/// registrable domain: a name that is itself a public suffix, such as `com`
/// or `co.uk`, is rejected.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for malformed names and bare suffixes.
pub fn normalize_fqdn(raw: &str) -> Result<Fqdn> {
    let name = raw.trim().trim_end_matches('.').to_ascii_lowercase();

    if name.is_empty() {
        return Err(Error::InvalidInput("domain name is empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "domain name exceeds {MAX_NAME_LEN} characters: {name}"
        )));
    }
    if let Some(label) = name.split('.').find(|l| !is_valid_label(l)) {
        return Err(Error::InvalidInput(format!(
            "invalid label '{label}' in domain name {name}"
        )));
    }

    let Some(tld) = psl::suffix_str(&name) else {
        return Err(Error::InvalidInput(format!(
            "no public suffix matches {name}"
        )));
    };
    if psl::domain_str(&name).is_none() {
        return Err(Error::InvalidInput(format!(
            "failed to obtain a registrable domain for {name}"
        )));
    }

    Ok(Fqdn {
        tld: tld.to_string(),
        name,
    })
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_full_hostname() {
        let fqdn = normalize_fqdn("www.example.com").unwrap();
        assert_eq!(fqdn.name, "www.example.com");
        assert_eq!(fqdn.tld, "com");
    }

    #[test]
    fn test_multi_label_suffix() {
        let fqdn = normalize_fqdn("shop.example.co.uk").unwrap();
        assert_eq!(fqdn.tld, "co.uk");
        assert!(normalize_fqdn("co.uk").is_err());
    }

    #[test]
    fn test_service_labels_allowed() {
        let fqdn = normalize_fqdn("_sip._tcp.example.com").unwrap();
        assert_eq!(fqdn.name, "_sip._tcp.example.com");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(normalize_fqdn("exa mple.com").is_err());
        assert!(normalize_fqdn("a..example.com").is_err());
        assert!(normalize_fqdn(&format!("{}.com", "a".repeat(64))).is_err());
        assert!(normalize_fqdn(".").is_err());
    }
}
