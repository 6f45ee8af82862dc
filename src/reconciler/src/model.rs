//! Rows of the self-describing metadata tables.

use serde::Serialize;
use std::fmt;

/// The registry's model of models.
pub const META_MODEL: &str = "ir.model";

/// Model whose bindings point at module rows.
pub const MODULE_MODEL: &str = "ir.module.module";

/// Logical entity type registered in `ir_model`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDefinition {
    pub id: i64,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    NotInstalled,
    Installed,
    Uninstalled,
    ToInstall,
    ToUpgrade,
    ToRemove,
    Other(String),
}

impl ModuleState {
    pub fn parse(state: &str) -> Self {
        match state {
            "not_installed" | "uninstallable" => ModuleState::NotInstalled,
            "installed" => ModuleState::Installed,
            "uninstalled" => ModuleState::Uninstalled,
            "to install" => ModuleState::ToInstall,
            "to upgrade" => ModuleState::ToUpgrade,
            "to remove" => ModuleState::ToRemove,
            other => ModuleState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ModuleState::NotInstalled => "not_installed",
            ModuleState::Installed => "installed",
            ModuleState::Uninstalled => "uninstalled",
            ModuleState::ToInstall => "to install",
            ModuleState::ToUpgrade => "to upgrade",
            ModuleState::ToRemove => "to remove",
            ModuleState::Other(s) => s,
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installable unit registered in `ir_module_module`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleRecord {
    pub id: i64,
    pub name: String,
    pub state: ModuleState,
}

/// External stable identifier `module.name` bound to a row of `model`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataBinding {
    pub id: i64,
    pub module: String,
    pub model: String,
    pub record_id: Option<i64>,
    pub name: String,
}

impl DataBinding {
    pub fn external_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationKind {
    Model,
    Field,
    View,
    Code,
    Selection,
    Other(String),
}

impl TranslationKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "model" => TranslationKind::Model,
            "field" => TranslationKind::Field,
            "view" => TranslationKind::View,
            "code" => TranslationKind::Code,
            "selection" => TranslationKind::Selection,
            other => TranslationKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TranslationKind::Model => "model",
            TranslationKind::Field => "field",
            TranslationKind::View => "view",
            TranslationKind::Code => "code",
            TranslationKind::Selection => "selection",
            TranslationKind::Other(s) => s,
        }
    }
}

/// One localized string of `ir_translation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationEntry {
    pub id: i64,
    pub lang: String,
    pub kind: TranslationKind,
    /// `model,field` for model and field kinds
    pub name: String,
    pub record_id: Option<i64>,
    pub module: Option<String>,
    pub source: Option<String>,
    pub value: Option<String>,
    pub comments: Option<String>,
}

impl TranslationEntry {
    /// Model named by the first component of `name`.
    pub fn model_name(&self) -> &str {
        self.name.split(',').next().unwrap_or_default()
    }

    pub fn describe(&self) -> String {
        format!(
            "translation {} [{}] {} (record {}, module {})",
            self.id,
            self.lang,
            self.name,
            self.record_id.unwrap_or_default(),
            self.module.as_deref().unwrap_or("-"),
        )
    }
}
