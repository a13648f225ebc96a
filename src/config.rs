use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::db::{ConnectionConfig, NullPolicy};
use crate::sql::{Compiler, DEFAULT_READINGS_TABLE, DEFAULT_SCHEMA};

/// Contents of `config.toml`. Every field is optional.
///
/// ```toml
/// schema = "foglamp"
/// log_sql = true
/// null_policy = "distinct"
///
/// [connection]
/// host = "db.internal"
/// ssl_mode = "require"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub schema: String,
    pub readings_table: String,
    /// Log each statement at info level.
    pub log_sql: bool,
    pub pool_size: usize,
    pub null_policy: NullPolicy,
    pub connection: ConnectionConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            readings_table: DEFAULT_READINGS_TABLE.to_string(),
            log_sql: false,
            pool_size: 4,
            null_policy: NullPolicy::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Loads the per-user config file, falling back to defaults when absent.
    pub fn load_default() -> Result<Self> {
        let path = default_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn compiler(&self) -> Compiler {
        Compiler::new(self.schema.clone(), self.readings_table.clone())
    }
}

pub fn default_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    Ok(config_dir.join("pgstore").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: StoreConfig = toml::from_str("").unwrap();
        assert_eq!(config.schema, "foglamp");
        assert_eq!(config.readings_table, "readings");
        assert_eq!(config.pool_size, 4);
        assert!(!config.log_sql);
        assert_eq!(config.null_policy, NullPolicy::EmptyString);
    }

    #[test]
    fn test_full_file() {
        let config: StoreConfig = toml::from_str(
            r#"
            schema = "historian"
            readings_table = "samples"
            log_sql = true
            null_policy = "distinct"

            [connection]
            host = "db.internal"
            port = 6432
            "#,
        )
        .unwrap();
        assert!(config.log_sql);
        assert_eq!(config.null_policy, NullPolicy::Distinct);
        assert_eq!(config.connection.host, "db.internal");
        assert_eq!(config.connection.port, 6432);
        let compiler = config.compiler();
        assert_eq!(compiler.schema(), "historian");
        assert!(compiler.is_readings("samples"));
    }

    #[test]
    fn test_load_reports_path() {
        let err = StoreConfig::load(Path::new("/nonexistent/pgstore.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/pgstore.toml"));
    }
}
