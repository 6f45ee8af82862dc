//! Cascade deletion of models and modules.
//!
//! A removal is a [`DeletionPlan`]: an ordered list of [`DeletionStep`]s,
//! dependents before their owner. Executing a plan stops at the first step
//! that fails and returns a [`StepFailure`] naming it; the caller's
//! transaction undoes whatever earlier steps did.

use crate::metadata::{self, TableProbe, tables};
use crate::model::{META_MODEL, MODULE_MODEL, ModelDefinition, ModuleRecord};
use crate::registry::{ModelRegistry, TableRef};
use crate::report::{Category, log_fixable};
use common::Dialect;
use sqlx::AnyConnection;
use sqlx::{Row, query};
use std::fmt;
use std::sync::Arc;

/// Row owning a cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionTarget {
    Model(ModelDefinition),
    Module { module: ModuleRecord, full: bool },
}

impl DeletionTarget {
    pub fn category(&self) -> Category {
        match self {
            DeletionTarget::Model(_) => Category::UnusedModels,
            DeletionTarget::Module { .. } => Category::UnusedModules,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DeletionTarget::Model(_) => "model",
            DeletionTarget::Module { .. } => "module",
        }
    }
}

impl fmt::Display for DeletionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletionTarget::Model(model) => write!(f, "model {},{}", model.model, model.id),
            DeletionTarget::Module { module, full } => {
                let mode = if *full { "full" } else { "partial" };
                write!(f, "module {},{} ({mode})", module.name, module.id)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeletionStep {
    Constraints,
    AccessRules,
    Relations,
    Bindings,
    Fields,
    Translations,
    ModelRow,
    MarkUninstalled,
    BoundRecords,
    ModuleDependencies,
    ModuleRow,
    ModuleSelfBinding,
}

impl DeletionStep {
    const MODEL: [DeletionStep; 7] = [
        DeletionStep::Constraints,
        DeletionStep::AccessRules,
        DeletionStep::Relations,
        DeletionStep::Bindings,
        DeletionStep::Fields,
        DeletionStep::Translations,
        DeletionStep::ModelRow,
    ];

    fn label(&self) -> &'static str {
        match self {
            DeletionStep::Constraints => "model constraint",
            DeletionStep::AccessRules => "model access",
            DeletionStep::Relations => "model relation",
            DeletionStep::Bindings => "model data",
            DeletionStep::Fields => "model field",
            DeletionStep::Translations => "model translation",
            DeletionStep::ModelRow => "model",
            DeletionStep::MarkUninstalled => "module state",
            DeletionStep::BoundRecords => "module data",
            DeletionStep::ModuleDependencies => "module dependency",
            DeletionStep::ModuleRow => "module",
            DeletionStep::ModuleSelfBinding => "module binding",
        }
    }

    /// Meta-model under which the rows this step deletes are bound in
    /// `ir_model_data`. Those bindings go with the rows.
    fn bound_as(&self) -> Option<&'static str> {
        match self {
            DeletionStep::Constraints => Some("ir.model.constraint"),
            DeletionStep::AccessRules => Some("ir.model.access"),
            DeletionStep::Relations => Some("ir.model.relation"),
            DeletionStep::Fields => Some("ir.model.fields"),
            _ => None,
        }
    }
}

/// Ordered removal of one model or module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionPlan {
    pub target: DeletionTarget,
    pub steps: Vec<DeletionStep>,
}

impl DeletionPlan {
    pub fn for_model(model: ModelDefinition) -> Self {
        Self {
            target: DeletionTarget::Model(model),
            steps: DeletionStep::MODEL.to_vec(),
        }
    }

    /// Without `full`, rows bound to the module's data bindings are kept.
    pub fn for_module(module: ModuleRecord, full: bool) -> Self {
        let mut steps = vec![DeletionStep::MarkUninstalled];
        if full {
            steps.push(DeletionStep::BoundRecords);
        }
        steps.extend([
            DeletionStep::ModuleDependencies,
            DeletionStep::ModuleRow,
            DeletionStep::ModuleSelfBinding,
        ]);
        Self {
            target: DeletionTarget::Module { module, full },
            steps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: DeletionStep,
    /// Rows deleted, or updated for [`DeletionStep::MarkUninstalled`]
    pub rows: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub target: DeletionTarget,
    pub steps: Vec<StepOutcome>,
}

impl CascadeOutcome {
    pub fn total_deleted(&self) -> u64 {
        self.steps
            .iter()
            .filter(|s| s.step != DeletionStep::MarkUninstalled)
            .map(|s| s.rows)
            .sum()
    }

    pub fn rows(&self, step: DeletionStep) -> u64 {
        self.steps
            .iter()
            .filter(|s| s.step == step)
            .map(|s| s.rows)
            .sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Store(#[from] sqlx::Error),
    #[error("model '{model}' is registered live but table '{table}' does not exist")]
    SchemaInconsistency { model: String, table: String },
    #[error("{step:?} is not a step of a {kind} deletion")]
    ForeignStep { step: DeletionStep, kind: &'static str },
}

#[derive(Debug, thiserror::Error)]
#[error("Deleting {target} failed at step {step:?}: {source}")]
pub struct StepFailure {
    pub target: DeletionTarget,
    pub step: DeletionStep,
    #[source]
    pub source: StepError,
}

impl StepFailure {
    pub fn is_schema_inconsistency(&self) -> bool {
        matches!(self.source, StepError::SchemaInconsistency { .. })
    }
}

enum Value<'a> {
    Int(i64),
    Text(&'a str),
}

/// Executes deletion plans on one connection.
pub struct CascadeDeleter {
    registry: Arc<dyn ModelRegistry>,
    probe: TableProbe,
    fix: bool,
}

impl CascadeDeleter {
    pub fn new(registry: Arc<dyn ModelRegistry>, dialect: Dialect, fix: bool) -> Self {
        Self {
            registry,
            probe: TableProbe::new(dialect),
            fix,
        }
    }

    pub async fn delete_model(
        &mut self,
        conn: &mut AnyConnection,
        model: ModelDefinition,
    ) -> Result<CascadeOutcome, StepFailure> {
        self.execute(conn, &DeletionPlan::for_model(model)).await
    }

    pub async fn delete_module(
        &mut self,
        conn: &mut AnyConnection,
        module: ModuleRecord,
        full: bool,
    ) -> Result<CascadeOutcome, StepFailure> {
        self.execute(conn, &DeletionPlan::for_module(module, full))
            .await
    }

    /// Run every step of `plan` in order, stopping at the first failure.
    pub async fn execute(
        &mut self,
        conn: &mut AnyConnection,
        plan: &DeletionPlan,
    ) -> Result<CascadeOutcome, StepFailure> {
        let category = plan.target.category();
        log_fixable(self.fix, category, &format!("Delete {}", plan.target));

        let mut steps = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let rows = self
                .run_step(conn, &plan.target, *step)
                .await
                .map_err(|source| StepFailure {
                    target: plan.target.clone(),
                    step: *step,
                    source,
                })?;
            tracing::debug!(target_row = %plan.target, step = ?step, rows, "Cascade step done");
            steps.push(StepOutcome { step: *step, rows });
        }

        let outcome = CascadeOutcome {
            target: plan.target.clone(),
            steps,
        };
        tracing::info!(
            target_row = %plan.target,
            rows = outcome.total_deleted(),
            fix = self.fix,
            "Cascade deletion finished"
        );
        Ok(outcome)
    }

    async fn run_step(
        &mut self,
        conn: &mut AnyConnection,
        target: &DeletionTarget,
        step: DeletionStep,
    ) -> Result<u64, StepError> {
        let category = target.category();
        match (target, step) {
            (DeletionTarget::Model(model), DeletionStep::Constraints) => {
                self.delete_labeled(
                    conn,
                    category,
                    step,
                    tables::CONSTRAINT,
                    "SELECT id, name AS label FROM ir_model_constraint WHERE model = $1",
                    &[Value::Int(model.id)],
                )
                .await
            }
            (DeletionTarget::Model(model), DeletionStep::AccessRules) => {
                self.delete_labeled(
                    conn,
                    category,
                    step,
                    tables::ACCESS,
                    "SELECT id, name AS label FROM ir_model_access WHERE model_id = $1",
                    &[Value::Int(model.id)],
                )
                .await
            }
            (DeletionTarget::Model(model), DeletionStep::Relations) => {
                self.delete_labeled(
                    conn,
                    category,
                    step,
                    tables::RELATION,
                    "SELECT id, name AS label FROM ir_model_relation WHERE model = $1",
                    &[Value::Int(model.id)],
                )
                .await
            }
            (DeletionTarget::Model(model), DeletionStep::Bindings) => {
                self.delete_labeled(
                    conn,
                    category,
                    step,
                    tables::DATA,
                    "SELECT id, name AS label FROM ir_model_data \
                     WHERE model = $1 OR (model = $2 AND res_id = $3)",
                    &[
                        Value::Text(&model.model),
                        Value::Text(META_MODEL),
                        Value::Int(model.id),
                    ],
                )
                .await
            }
            (DeletionTarget::Model(model), DeletionStep::Fields) => {
                self.delete_labeled(
                    conn,
                    category,
                    step,
                    tables::FIELD,
                    "SELECT id, name AS label FROM ir_model_fields WHERE model_id = $1",
                    &[Value::Int(model.id)],
                )
                .await
            }
            (DeletionTarget::Model(model), DeletionStep::Translations) => {
                let entries = metadata::list_translations_of_model(conn, model).await?;
                for entry in &entries {
                    log_fixable(
                        self.fix,
                        category,
                        &format!(
                            "Delete {} {{id:{}|name:{}|type:{}}}",
                            step.label(),
                            entry.id,
                            entry.name,
                            entry.kind.as_str()
                        ),
                    );
                }
                let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
                Ok(metadata::delete_ids(conn, tables::TRANSLATION, &ids).await?)
            }
            (DeletionTarget::Model(model), DeletionStep::ModelRow) => {
                self.delete_labeled(
                    conn,
                    category,
                    step,
                    tables::MODEL,
                    "SELECT id, model AS label FROM ir_model WHERE id = $1",
                    &[Value::Int(model.id)],
                )
                .await
            }
            (DeletionTarget::Module { module, .. }, DeletionStep::MarkUninstalled) => {
                log_fixable(
                    self.fix,
                    category,
                    &format!("Uninstall module {},{}", module.name, module.id),
                );
                let result =
                    query("UPDATE ir_module_module SET state = 'uninstalled' WHERE id = $1")
                        .bind(module.id)
                        .execute(&mut *conn)
                        .await?;
                Ok(result.rows_affected())
            }
            (DeletionTarget::Module { module, .. }, DeletionStep::BoundRecords) => {
                self.delete_bound_records(conn, category, &module.name)
                    .await
            }
            (DeletionTarget::Module { module, .. }, DeletionStep::ModuleDependencies) => {
                self.delete_labeled(
                    conn,
                    category,
                    step,
                    tables::MODULE_DEPENDENCY,
                    "SELECT id, name AS label FROM ir_module_module_dependency \
                     WHERE module_id = $1 OR name = $2",
                    &[Value::Int(module.id), Value::Text(&module.name)],
                )
                .await
            }
            (DeletionTarget::Module { module, .. }, DeletionStep::ModuleRow) => {
                self.delete_labeled(
                    conn,
                    category,
                    step,
                    tables::MODULE,
                    "SELECT id, name AS label FROM ir_module_module WHERE id = $1",
                    &[Value::Int(module.id)],
                )
                .await
            }
            (DeletionTarget::Module { module, .. }, DeletionStep::ModuleSelfBinding) => {
                self.delete_labeled(
                    conn,
                    category,
                    step,
                    tables::DATA,
                    "SELECT id, name AS label FROM ir_model_data WHERE model = $1 AND res_id = $2",
                    &[Value::Text(MODULE_MODEL), Value::Int(module.id)],
                )
                .await
            }
            (target, step) => Err(StepError::ForeignStep {
                step,
                kind: target.kind(),
            }),
        }
    }

    /// Select `(id, label)` rows, log each, then delete them by id together
    /// with the bindings that name them.
    async fn delete_labeled(
        &mut self,
        conn: &mut AnyConnection,
        category: Category,
        step: DeletionStep,
        table: &str,
        select: &str,
        values: &[Value<'_>],
    ) -> Result<u64, StepError> {
        let mut statement = query(select);
        for value in values {
            statement = match value {
                Value::Int(v) => statement.bind(*v),
                Value::Text(v) => statement.bind(*v),
            };
        }
        let rows = statement.fetch_all(&mut *conn).await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let label: String = row.try_get("label")?;
            log_fixable(self.fix, category, &format!("Delete {} {label},{id}", step.label()));
            ids.push(id);
        }

        let mut deleted = 0;
        if let Some(model) = step.bound_as() {
            deleted += metadata::delete_bindings_of(conn, model, &ids).await?;
        }
        deleted += metadata::delete_ids(conn, table, &ids).await?;
        Ok(deleted)
    }

    /// Delete every row bound to the module's data bindings, then the
    /// bindings. Rows of `ir.model` and of non-live models are kept.
    async fn delete_bound_records(
        &mut self,
        conn: &mut AnyConnection,
        category: Category,
        module: &str,
    ) -> Result<u64, StepError> {
        let bindings = metadata::list_bindings_of_module(conn, module).await?;
        let mut deleted = 0;

        for binding in &bindings {
            log_fixable(
                self.fix,
                category,
                &format!(
                    "Delete model_data {},{},{},{}",
                    binding.name,
                    binding.id,
                    binding.model,
                    binding.record_id.unwrap_or_default()
                ),
            );

            let deletable = binding.model != META_MODEL && self.registry.is_live(&binding.model);
            if let Some(record_id) = binding.record_id.filter(|id| *id > 0 && deletable) {
                let table = self.require_table(conn, &binding.model).await?;
                log_fixable(
                    self.fix,
                    category,
                    &format!("Delete {},{record_id}", binding.model),
                );
                deleted += metadata::delete_ids(conn, table.as_str(), &[record_id]).await?;
            }

            deleted += metadata::delete_ids(conn, tables::DATA, &[binding.id]).await?;
        }
        Ok(deleted)
    }

    async fn require_table(
        &mut self,
        conn: &mut AnyConnection,
        model: &str,
    ) -> Result<TableRef, StepError> {
        let inconsistency = |table: String| StepError::SchemaInconsistency {
            model: model.to_string(),
            table,
        };
        let table = self
            .registry
            .table_of(model)
            .ok_or_else(|| inconsistency(String::new()))?;
        if self.probe.exists(conn, table.as_str()).await? {
            Ok(table)
        } else {
            Err(inconsistency(table.to_string()))
        }
    }
}
