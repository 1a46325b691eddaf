//! Discovery runs and their provenance logs.

use super::AssetId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(i64);

impl ExecutionId {
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

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One discovery run and the seed domains it targeted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Identifier.
    pub id: ExecutionId,
    /// Seed domains, in the order given.
    pub domains: Vec<String>,
    /// Start of the run.
    pub created_at: DateTime<Utc>,
}

/// Joins an execution with an asset it discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLog {
    /// Identifier.
    pub id: i64,
    /// The run.
    pub execution_id: ExecutionId,
    /// The asset first observed during the run.
    pub asset_id: AssetId,
    /// Data source that reported it.
    pub source: String,
    /// When the log row was written.
    pub created_at: DateTime<Utc>,
}

/// Encodes seed domains for the `executions.domains` column.
#[must_use]
pub fn encode_domains(domains: &[String]) -> String {
    domains.join(",")
}

/// Decodes the `executions.domains` column.
#[must_use]
pub fn decode_domains(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domains_roundtrip() {
        let domains = vec!["example.com".to_string(), "example.org".to_string()];
        assert_eq!(decode_domains(&encode_domains(&domains)), domains);
    }

    #[test]
    fn test_decode_skips_blanks() {
        assert_eq!(decode_domains(" a.com, ,b.com,"), vec!["a.com", "b.com"]);
        assert!(decode_domains("").is_empty());
    }
}
