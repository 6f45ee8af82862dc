//! Model registry accessor and module availability.
//!
//! The application's model registry is a runtime-reflective mapping from
//! model names to tables. Here it is an explicit capability, [`ModelRegistry`],
//! backed by a mapping enumerated at startup from configuration and an
//! optional JSON snapshot exported by the application. Answers are a
//! snapshot: nothing in this module changes while a run is in progress.

use crate::error::{ReconcileError, Result};
use common::config::{ModulesConfig, RegistryConfig};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Metadata models every registry describes itself with.
pub const META_MODELS: &[&str] = &[
    "ir.model",
    "ir.model.fields",
    "ir.model.constraint",
    "ir.model.access",
    "ir.model.relation",
    "ir.model.data",
    "ir.translation",
    "ir.module.module",
    "ir.module.module.dependency",
];

/// Physical table backing a model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef(String);

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Table name derived from the model name (`sale.order` -> `sale_order`).
    pub fn derive(model: &str) -> Self {
        Self(model.replace('.', "_"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Existence oracle consulted by every scan.
///
/// Implementations must not fail for unknown names; they answer `false` and
/// `None`. They are side-effect free.
pub trait ModelRegistry: Send + Sync {
    fn is_live(&self, model: &str) -> bool;

    fn table_of(&self, model: &str) -> Option<TableRef>;
}

/// Registry built from an explicitly enumerated model list.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    models: BTreeMap<String, TableRef>,
}

#[derive(Debug, Deserialize)]
struct RegistrySnapshot {
    models: BTreeMap<String, String>,
}

impl StaticRegistry {
    /// Registry holding the metadata models only.
    pub fn new() -> Self {
        let models = META_MODELS
            .iter()
            .map(|m| (m.to_string(), TableRef::derive(m)))
            .collect();
        Self { models }
    }

    pub fn with_model(mut self, model: &str, table: &str) -> Self {
        self.insert(model, table);
        self
    }

    fn insert(&mut self, model: &str, table: &str) {
        let table = if table.trim().is_empty() {
            TableRef::derive(model)
        } else {
            TableRef::new(table.trim())
        };
        self.models.insert(model.to_string(), table);
    }

    /// Build from the `registry` configuration section, merging the snapshot
    /// file over the inline model list.
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        let mut registry = Self::new();
        for (model, table) in &config.models {
            registry.insert(model, table);
        }

        if let Some(path) = &config.snapshot_path {
            let snapshot = load_snapshot(Path::new(path))?;
            tracing::debug!(path = %path, models = snapshot.models.len(), "Loaded registry snapshot");
            for (model, table) in &snapshot.models {
                registry.insert(model, table);
            }
        }

        tracing::info!(models = registry.len(), "Model registry ready");
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn load_snapshot(path: &Path) -> Result<RegistrySnapshot> {
    let snapshot_error = |message: String| ReconcileError::Snapshot {
        path: path.display().to_string(),
        message,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| snapshot_error(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| snapshot_error(e.to_string()))
}

impl ModelRegistry for StaticRegistry {
    fn is_live(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    fn table_of(&self, model: &str) -> Option<TableRef> {
        self.models.get(model).cloned()
    }
}

/// Modules present in the current deployment.
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    available: BTreeSet<String>,
    protected: BTreeSet<String>,
    configured: bool,
}

impl ModuleCatalog {
    /// Scan the addons paths for module manifests.
    ///
    /// Unreadable addons paths are logged and skipped.
    pub fn from_config(config: &ModulesConfig) -> Self {
        let mut available: BTreeSet<String> = config.available.iter().cloned().collect();

        for addons_path in &config.addons_paths {
            let entries = match std::fs::read_dir(addons_path) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Skipping addons path {addons_path}: {e}");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let dir = entry.path();
                if !dir.join(&config.manifest_file).is_file() {
                    continue;
                }
                if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
                    available.insert(name.to_string());
                }
            }
        }

        Self {
            available,
            protected: config.protected.iter().cloned().collect(),
            configured: !config.addons_paths.is_empty() || !config.available.is_empty(),
        }
    }

    /// Whether module availability can be judged at all.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn is_available(&self, module: &str) -> bool {
        self.available.contains(module)
    }

    pub fn is_protected(&self, module: &str) -> bool {
        self.protected.contains(module)
    }
}
