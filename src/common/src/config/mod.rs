use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "dbreconcile.toml";

/// Environment prefix for configuration overrides (`DBRECONCILE__DATABASE__DSN`).
pub const ENV_PREFIX: &str = "DBRECONCILE__";

/// Raised for contradictory or incomplete settings, before any store access.
#[derive(Debug, thiserror::Error)]
#[error("Configuration error: {0}")]
pub struct ConfigurationError(pub String);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub dsn: String,
    /// Upper bound for pooled connections per store
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("sqlite://.data/dbreconcile.db"),
            max_connections: 4,
        }
    }
}

/// Static description of the models the application currently loads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Model name to physical table. An empty table derives the name by
    /// replacing dots with underscores.
    #[serde(default)]
    pub models: BTreeMap<String, String>,
    /// Optional JSON export of the application registry, merged over `models`
    #[serde(default)]
    pub snapshot_path: Option<String>,
    /// Name prefix of the registry's own meta-models
    pub meta_model_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            models: BTreeMap::new(),
            snapshot_path: None,
            meta_model_prefix: "ir.model".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Directories holding one sub-directory per installable module
    #[serde(default)]
    pub addons_paths: Vec<String>,
    /// File that marks a directory as a module
    pub manifest_file: String,
    /// Modules considered present even without a manifest on disk
    #[serde(default)]
    pub available: Vec<String>,
    /// Modules never flagged as removable-with-no-owner
    #[serde(default)]
    pub protected: Vec<String>,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            addons_paths: Vec::new(),
            manifest_file: "__manifest__.py".to_string(),
            available: Vec::new(),
            protected: Vec::new(),
        }
    }
}

/// Policy for conflicting duplicate translations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// Report only, never pick a winner
    #[default]
    Manual,
    KeepLowestId,
    KeepHighestId,
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TieBreak::Manual => write!(f, "manual"),
            TieBreak::KeepLowestId => write!(f, "keep-lowest-id"),
            TieBreak::KeepHighestId => write!(f, "keep-highest-id"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Commit repairs instead of rolling them back
    #[serde(default)]
    pub fix: bool,
    /// Run every cleanup category, not only duplicate translations
    #[serde(default)]
    pub full: bool,
    /// Only remove models the registry no longer loads
    #[serde(default)]
    pub only_models: bool,
    #[serde(default)]
    pub tie_break: TieBreak,
    /// Modules to delete together with their bound data rows
    #[serde(default)]
    pub full_delete: Vec<String>,
    /// Modules to delete while keeping bound data rows
    #[serde(default)]
    pub delete: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Database name prefix selecting the stores of a fleet run
    #[serde(default)]
    pub database_prefix: Option<String>,
    /// Run against every database matching the prefix
    #[serde(default)]
    pub all: bool,
    pub threads: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            database_prefix: None,
            all: false,
            threads: 4,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub database: DatabaseConfig,
    pub registry: RegistryConfig,
    pub modules: ModulesConfig,
    pub reconcile: ReconcileConfig,
    pub fleet: FleetConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path)).extract().map_err(Box::new)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject contradictory settings. Must run before the store is touched.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.database.dsn.trim().is_empty() {
            return Err(ConfigurationError("database DSN cannot be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError(
                "database.max_connections must be positive".into(),
            ));
        }

        if self.fleet.all {
            let prefix_missing = self
                .fleet
                .database_prefix
                .as_deref()
                .is_none_or(|p| p.trim().is_empty());
            if prefix_missing {
                return Err(ConfigurationError(
                    "fleet mode requires a database prefix".into(),
                ));
            }
        }

        if self.fleet.threads == 0 {
            return Err(ConfigurationError("fleet.threads must be positive".into()));
        }

        if let Some(module) = self
            .reconcile
            .delete
            .iter()
            .find(|m| self.reconcile.full_delete.contains(m))
        {
            return Err(ConfigurationError(format!(
                "module '{module}' is listed for both delete and full delete"
            )));
        }

        if self.reconcile.only_models
            && (!self.reconcile.delete.is_empty() || !self.reconcile.full_delete.is_empty())
        {
            return Err(ConfigurationError(
                "only-models cannot be combined with module deletion".into(),
            ));
        }

        Ok(())
    }
}

/// Split a module list as typed on the command line (`a,b|c; d`).
pub fn split_module_list(value: &str) -> Vec<String> {
    value
        .split([',', '|', ';', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
