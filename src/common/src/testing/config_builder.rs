//! Test configuration builder for creating test setups quickly.

use crate::config::{Configuration, DatabaseConfig, TieBreak};

/// Builder for creating test configurations.
///
/// Starts from the defaults and lets a test declare the registry snapshot,
/// module availability and run flags it needs.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .with_database_dsn("sqlite:///tmp/fixture.db")
///     .with_model("res.partner", "res_partner")
///     .with_available_module("base")
///     .full()
///     .fix()
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Configuration::default(),
        }
    }

    /// Set the database DSN.
    pub fn with_database_dsn(mut self, dsn: &str) -> Self {
        self.config.database = DatabaseConfig {
            dsn: dsn.to_string(),
            ..DatabaseConfig::default()
        };
        self
    }

    /// Register a live model backed by `table`.
    pub fn with_model(mut self, model: &str, table: &str) -> Self {
        self.config
            .registry
            .models
            .insert(model.to_string(), table.to_string());
        self
    }

    /// Declare a module as present in the deployment.
    pub fn with_available_module(mut self, module: &str) -> Self {
        self.config.modules.available.push(module.to_string());
        self
    }

    /// Add a directory scanned for module manifests.
    pub fn with_addons_path(mut self, path: &str) -> Self {
        self.config.modules.addons_paths.push(path.to_string());
        self
    }

    /// Never flag `module` as removable-with-no-owner.
    pub fn with_protected_module(mut self, module: &str) -> Self {
        self.config.modules.protected.push(module.to_string());
        self
    }

    pub fn fix(mut self) -> Self {
        self.config.reconcile.fix = true;
        self
    }

    pub fn full(mut self) -> Self {
        self.config.reconcile.full = true;
        self
    }

    pub fn only_models(mut self) -> Self {
        self.config.reconcile.only_models = true;
        self
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.config.reconcile.tie_break = tie_break;
        self
    }

    /// Delete `module` together with its bound data rows.
    pub fn with_full_delete(mut self, module: &str) -> Self {
        self.config.reconcile.full_delete.push(module.to_string());
        self
    }

    /// Delete `module` bookkeeping only.
    pub fn with_delete(mut self, module: &str) -> Self {
        self.config.reconcile.delete.push(module.to_string());
        self
    }

    /// Enable fleet mode over databases starting with `prefix`.
    pub fn with_fleet(mut self, prefix: &str, threads: usize) -> Self {
        self.config.fleet.all = true;
        self.config.fleet.database_prefix = Some(prefix.to_string());
        self.config.fleet.threads = threads;
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}
