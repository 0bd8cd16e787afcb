//! # Engine Configuration
//!
//! Settings for the database, the stock ledger and audit stamping.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCKWISE_DATABASE_PATH=/var/lib/stockwise/ledger.db               │
//! │     STOCKWISE_CREATE_MISSING_STOCK=false                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stockwise/stockwise.toml (Linux)                         │
//! │     ~/Library/Application Support/com.stockwise.engine/... (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "./stockwise.db"
//! max_connections = 5
//! min_connections = 1
//! connect_timeout_secs = 30
//! idle_timeout_secs = 600
//!
//! [ledger]
//! branch_id = "main"
//! create_missing_stock = true
//!
//! [audit]
//! user_id = "system"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audit::UserStamper;
use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;

// =============================================================================
// Database Settings
// =============================================================================

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./stockwise.db")
}
fn default_max_connections() -> u32 {
    5
}
fn default_min_connections() -> u32 {
    1
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_idle_timeout() -> u64 {
    600
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

// =============================================================================
// Ledger Settings
// =============================================================================

/// Stock ledger behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Branch used when a caller does not name one (seed binary, imports).
    #[serde(default = "default_branch_id")]
    pub branch_id: String,

    /// Create a stock row the first time a product moves at a branch.
    ///
    /// When false, a missing row aborts the reconciliation for every
    /// transaction kind alike.
    #[serde(default = "default_true")]
    pub create_missing_stock: bool,
}

fn default_branch_id() -> String {
    "main".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerSettings {
            branch_id: default_branch_id(),
            create_missing_stock: true,
        }
    }
}

// =============================================================================
// Audit Settings
// =============================================================================

/// Audit stamping identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

fn default_user_id() -> String {
    "system".to_string()
}

impl Default for AuditSettings {
    fn default() -> Self {
        AuditSettings {
            user_id: default_user_id(),
        }
    }
}

// =============================================================================
// Engine Config
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub audit: AuditSettings,
}

impl EngineConfig {
    /// Loads configuration: defaults, then file, then environment.
    ///
    /// With no explicit path the platform config dir is tried; a missing file
    /// is not an error.
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                config = Self::from_file(&path)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses one TOML file.
    pub fn from_file(path: &Path) -> DbResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DbError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    /// Parses TOML text.
    pub fn from_toml(contents: &str) -> DbResult<Self> {
        toml::from_str(contents).map_err(|e| DbError::Config(e.to_string()))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(DbError::Config("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(DbError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(DbError::Config(
                "database.min_connections cannot exceed max_connections".into(),
            ));
        }

        if self.ledger.branch_id.trim().is_empty() {
            return Err(DbError::Config("ledger.branch_id must not be empty".into()));
        }

        if self.audit.user_id.trim().is_empty() {
            return Err(DbError::Config("audit.user_id must not be empty".into()));
        }

        Ok(())
    }

    /// Builds the pool configuration.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database.path.clone())
            .max_connections(self.database.max_connections)
            .min_connections(self.database.min_connections)
            .connect_timeout(Duration::from_secs(self.database.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(self.database.idle_timeout_secs))
    }

    /// Builds the audit stamper.
    pub fn stamper(&self) -> UserStamper {
        UserStamper::new(self.audit.user_id.clone())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("STOCKWISE_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(max) = std::env::var("STOCKWISE_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %max, "Ignoring STOCKWISE_MAX_CONNECTIONS"),
            }
        }

        if let Ok(branch) = std::env::var("STOCKWISE_BRANCH_ID") {
            self.ledger.branch_id = branch;
        }

        if let Ok(flag) = std::env::var("STOCKWISE_CREATE_MISSING_STOCK") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.ledger.create_missing_stock = true,
                "0" | "false" | "no" => self.ledger.create_missing_stock = false,
                _ => warn!(value = %flag, "Ignoring STOCKWISE_CREATE_MISSING_STOCK"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stockwise", "engine")
            .map(|dirs| dirs.config_dir().join("stockwise.toml"))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.database.max_connections, 5);
        assert!(config.ledger.create_missing_stock);
        assert_eq!(config.audit.user_id, "system");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [ledger]
            create_missing_stock = false
            "#,
        )
        .unwrap();

        assert!(!config.ledger.create_missing_stock);
        assert_eq!(config.ledger.branch_id, "main");
        assert_eq!(config.database.path, PathBuf::from("./stockwise.db"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.database.path = PathBuf::new();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.database.min_connections = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("stockwise-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "[database]\npath = \"/tmp/ledger.db\"\nmax_connections = 3\n\n[audit]\nuser_id = \"clerk\"\n",
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.database.max_connections, 3);
        assert_eq!(config.stamper().user_id, "clerk");

        let db_config = config.db_config();
        assert_eq!(db_config.database_path, PathBuf::from("/tmp/ledger.db"));
        assert_eq!(db_config.max_connections, 3);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = EngineConfig::from_toml("[database\npath = 1").unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn test_toml_serialization() {
        let toml_str = toml::to_string_pretty(&EngineConfig::default()).unwrap();
        assert!(toml_str.contains("[database]"));
        assert!(toml_str.contains("[ledger]"));
    }
}
