//! Configuration management.
//!
//! Configuration comes from three layers, later ones winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`~/.config/assetdb/config.toml` unless a path is given)
//! 3. `ASSETDB_*` environment variables (a `.env` file is honored by the binary)
//!
//! ```toml
//! [database]
//! system = "sqlite"            # or "graph"
//! path = "/var/lib/assetdb/assets.db"
//! migrations_path = "/etc/assetdb/migrations"
//! migrations_table = "schema_migrations"
//! pool_max_size = 8
//! operation_timeout_secs = 30
//! identity_cache_size = 10000
//!
//! [logging]
//! filter = "assetdb=debug"
//! format = "json"
//! file = "/var/log/assetdb.log"
//! ```

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default name of the migration tracking table.
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";

/// Default upper bound on one store operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Storage backend variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Graph emulated over relational tables in `SQLite`.
    #[default]
    #[serde(alias = "sqlite")]
    Relational,
    /// Native graph engine.
    Graph,
}

impl BackendKind {
    /// Returns the configuration name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Relational => "sqlite",
            Self::Graph => "graph",
        }
    }

    /// Parses a configuration name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" | "relational" => Some(Self::Relational),
            "graph" => Some(Self::Graph),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown database system: {s}"))
    }
}

/// Database connection and schema settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Backend variant.
    pub system: BackendKind,
    /// `SQLite` database file. Ignored by the graph backend.
    pub path: PathBuf,
    /// Directory of migration files. `None` uses the built-in migrations.
    pub migrations_path: Option<PathBuf>,
    /// Name of the table tracking applied migrations.
    pub migrations_table: String,
    /// Maximum pooled `SQLite` connections.
    pub pool_max_size: usize,
    /// Upper bound on a single store operation, including waiting for a connection.
    pub operation_timeout: Duration,
    /// Capacity of the identity cache; 0 disables it.
    pub identity_cache_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            system: BackendKind::default(),
            path: default_database_path(),
            migrations_path: None,
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            pool_max_size: 8,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            identity_cache_size: 10_000,
        }
    }
}

impl DatabaseConfig {
    /// Relational backend on the given file.
    #[must_use]
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            system: BackendKind::Relational,
            path: path.into(),
            ..Self::default()
        }
    }

    /// Native graph backend.
    #[must_use]
    pub fn graph() -> Self {
        Self {
            system: BackendKind::Graph,
            ..Self::default()
        }
    }

    /// Sets the migrations directory.
    #[must_use]
    pub fn with_migrations_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_path = Some(path.into());
        self
    }

    /// Sets the migration tracking table.
    #[must_use]
    pub fn with_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self
    }
}

/// Logging settings as written in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, e.g. `assetdb=debug`.
    pub filter: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Main configuration for assetdb.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetDbConfig {
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Database section.
    pub database: Option<ConfigFileDatabase>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
}

/// Database section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileDatabase {
    /// Backend variant.
    pub system: Option<BackendKind>,
    /// Database file.
    pub path: Option<String>,
    /// Migrations directory.
    pub migrations_path: Option<String>,
    /// Migration tracking table.
    pub migrations_table: Option<String>,
    /// Pool size.
    pub pool_max_size: Option<usize>,
    /// Operation timeout in seconds.
    pub operation_timeout_secs: Option<u64>,
    /// Identity cache capacity.
    pub identity_cache_size: Option<usize>,
}

impl AssetDbConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;
        Self::parse_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config file.
    pub fn parse_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir, then `~/.config/assetdb/`. Returns
    /// defaults if no config file is found or it cannot be parsed.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("assetdb").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("assetdb")
                .join("config.toml"),
        ];
        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file"),
            }
        }

        Self::default()
    }

    /// Applies `ASSETDB_*` overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    /// Applies overrides from any key lookup.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let db = &mut self.database;

        if let Some(v) = lookup("ASSETDB_DATABASE_SYSTEM") {
            match BackendKind::parse(&v) {
                Some(kind) => db.system = kind,
                None => tracing::warn!(value = %v, "Ignoring unknown ASSETDB_DATABASE_SYSTEM"),
            }
        }
        if let Some(v) = lookup("ASSETDB_DATABASE_PATH") {
            db.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ASSETDB_MIGRATIONS_PATH") {
            db.migrations_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ASSETDB_MIGRATIONS_TABLE") {
            db.migrations_table = v;
        }
        if let Some(n) = parse_override(&lookup, "ASSETDB_POOL_MAX_SIZE") {
            db.pool_max_size = n;
        }
        if let Some(secs) = parse_override::<u64>(&lookup, "ASSETDB_OPERATION_TIMEOUT_SECS") {
            db.operation_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse_override(&lookup, "ASSETDB_IDENTITY_CACHE_SIZE") {
            db.identity_cache_size = n;
        }
        if let Some(v) = lookup("ASSETDB_LOG") {
            self.logging.filter = Some(v);
        }
        if let Some(v) = lookup("ASSETDB_LOG_FORMAT") {
            self.logging.format = Some(v);
        }
        if let Some(v) = lookup("ASSETDB_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }
    }

    /// Converts a `ConfigFile` to `AssetDbConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(db) = file.database {
            let target = &mut config.database;
            if let Some(system) = db.system {
                target.system = system;
            }
            if let Some(path) = db.path {
                target.path = PathBuf::from(path);
            }
            target.migrations_path = db.migrations_path.map(PathBuf::from);
            if let Some(table) = db.migrations_table {
                target.migrations_table = table;
            }
            if let Some(n) = db.pool_max_size {
                target.pool_max_size = n;
            }
            if let Some(secs) = db.operation_timeout_secs {
                target.operation_timeout = Duration::from_secs(secs);
            }
            if let Some(n) = db.identity_cache_size {
                target.identity_cache_size = n;
            }
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }

        config
    }
}

fn parse_override<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "Ignoring unparseable override");
    }
    parsed
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "assetdb").map_or_else(
        || PathBuf::from("assetdb.sqlite"),
        |dirs| dirs.data_dir().join("assetdb.sqlite"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_full_file() {
        let config = AssetDbConfig::parse_toml(
            r#"
            [database]
            system = "graph"
            path = "/tmp/assets.db"
            migrations_path = "/etc/assetdb/migrations"
            migrations_table = "gorp_migrations"
            pool_max_size = 2
            operation_timeout_secs = 5
            identity_cache_size = 0

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.system, BackendKind::Graph);
        assert_eq!(config.database.path, PathBuf::from("/tmp/assets.db"));
        assert_eq!(config.database.migrations_table, "gorp_migrations");
        assert_eq!(config.database.pool_max_size, 2);
        assert_eq!(config.database.operation_timeout, Duration::from_secs(5));
        assert_eq!(config.database.identity_cache_size, 0);
        assert_eq!(config.logging.format.as_deref(), Some("json"));
    }

    #[test]
    fn test_sqlite_alias_and_defaults() {
        let config = AssetDbConfig::parse_toml("[database]\nsystem = \"sqlite\"\n").unwrap();
        assert_eq!(config.database.system, BackendKind::Relational);
        assert_eq!(config.database.migrations_table, DEFAULT_MIGRATIONS_TABLE);
        assert!(config.database.migrations_path.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(AssetDbConfig::parse_toml("[database]\nhost = \"x\"\n").is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("ASSETDB_DATABASE_SYSTEM", "graph"),
            ("ASSETDB_MIGRATIONS_TABLE", "migrations"),
            ("ASSETDB_POOL_MAX_SIZE", "not-a-number"),
            ("ASSETDB_OPERATION_TIMEOUT_SECS", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = AssetDbConfig::default();
        config.apply_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.database.system, BackendKind::Graph);
        assert_eq!(config.database.migrations_table, "migrations");
        assert_eq!(config.database.pool_max_size, 8);
        assert_eq!(config.database.operation_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("SQLite".parse::<BackendKind>(), Ok(BackendKind::Relational));
        assert_eq!(BackendKind::parse("graph"), Some(BackendKind::Graph));
        assert!(BackendKind::parse("postgres").is_none());
    }
}
