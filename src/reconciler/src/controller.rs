//! Reconciliation controller.
//!
//! A run scans every category of its mode read-only, then, if anything was
//! found, re-runs the same detection and repair code per category inside its
//! own transaction. The transaction is committed in fix mode and rolled back
//! otherwise, so report-only and fix runs share one code path. A fix run
//! ends with a verification scan that decides whether the store is clean.

use crate::cascade::{CascadeDeleter, DeletionPlan};
use crate::detector::{DuplicateDetector, Resolution};
use crate::error::{ReconcileError, Result};
use crate::metadata::{self, tables};
use crate::metrics::ReconcileMetrics;
use crate::model::{ModuleRecord, TranslationKind};
use crate::registry::{ModelRegistry, ModuleCatalog};
use crate::report::{
    Category, CategoryOutcome, CategoryStatus, Issue, RunReport, RunState, distinct_rows,
};
use crate::scanner::OrphanScanner;
use chrono::Utc;
use common::config::Configuration;
use common::store::redact;
use common::{Store, TieBreak};
use futures::TryStreamExt;
use serde::Serialize;
use sqlx::AnyConnection;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Which categories a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Duplicate translations only
    Duplicates,
    Full,
    OnlyModels,
}

impl RunMode {
    /// Categories in execution order.
    pub fn categories(&self) -> &'static [Category] {
        match self {
            RunMode::Duplicates => &[Category::Duplicates],
            RunMode::Full => &[
                Category::UnusedModels,
                Category::UnusedModules,
                Category::Orphans,
                Category::Duplicates,
            ],
            RunMode::OnlyModels => &[Category::UnusedModels],
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Duplicates => write!(f, "duplicates"),
            RunMode::Full => write!(f, "full"),
            RunMode::OnlyModels => write!(f, "only-models"),
        }
    }
}

/// Everything a run needs to know, passed explicitly through every call.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub fix: bool,
    pub mode: RunMode,
    pub tie_break: TieBreak,
    pub meta_model_prefix: String,
    pub full_delete: BTreeSet<String>,
    pub delete: BTreeSet<String>,
}

impl RunContext {
    pub fn from_config(config: &Configuration) -> Self {
        let reconcile = &config.reconcile;
        let mode = if reconcile.only_models {
            RunMode::OnlyModels
        } else if reconcile.full {
            RunMode::Full
        } else {
            RunMode::Duplicates
        };
        Self {
            fix: reconcile.fix,
            mode,
            tie_break: reconcile.tie_break,
            meta_model_prefix: config.registry.meta_model_prefix.clone(),
            full_delete: reconcile.full_delete.iter().cloned().collect(),
            delete: reconcile.delete.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Default)]
struct CategoryWork {
    issues: Vec<Issue>,
    fixed: usize,
    rows_deleted: u64,
}

#[derive(Debug, Default)]
struct ScanResult {
    issues: Vec<Issue>,
    failed: Vec<CategoryOutcome>,
}

/// Runs one reconciliation against one store.
pub struct Reconciler {
    store: Store,
    registry: Arc<dyn ModelRegistry>,
    modules: Arc<ModuleCatalog>,
    context: RunContext,
    metrics: ReconcileMetrics,
    state: RunState,
}

impl Reconciler {
    pub fn new(
        store: Store,
        registry: Arc<dyn ModelRegistry>,
        modules: Arc<ModuleCatalog>,
        context: RunContext,
    ) -> Self {
        Self {
            store,
            registry,
            modules,
            context,
            metrics: ReconcileMetrics::new(),
            state: RunState::Idle,
        }
    }

    /// Share counters with other runs of this process.
    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn metrics(&self) -> &ReconcileMetrics {
        &self.metrics
    }

    /// Run to a terminal state. Failures are captured in the report.
    pub async fn run(&mut self) -> RunReport {
        let database = redact(self.store.dsn());
        let categories = self.context.mode.categories();
        let mut report = RunReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            database,
            fix: self.context.fix,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            state: self.state,
            total_issues_found: 0,
            total_fixed: 0,
            rows_deleted: 0,
            manual_fix_required: Vec::new(),
            issues: Vec::new(),
            categories: Vec::new(),
            clean: false,
            aborted: None,
        };

        tracing::info!(
            run_id = %report.run_id,
            database = %report.database,
            mode = %self.context.mode,
            fix = self.context.fix,
            tie_break = %self.context.tie_break,
            "Starting reconciliation"
        );

        self.state = RunState::ScanPhase;
        let scan = match self.scan(categories).await {
            Ok(scan) => scan,
            Err(e) => return self.abort(report, e),
        };

        let found = distinct_rows(&scan.issues);
        let manual = scan.issues.iter().filter(|i| !i.is_fixable()).count();
        self.metrics.record_issues(found, manual);
        report.total_issues_found = found;
        tracing::info!(
            issues = found,
            manual,
            failed_categories = scan.failed.len(),
            "Scan phase finished"
        );

        if scan.issues.is_empty() {
            report.clean = scan.failed.is_empty();
            let failed: BTreeSet<Category> = scan.failed.iter().map(|o| o.category).collect();
            report.categories = categories
                .iter()
                .filter(|category| !failed.contains(*category))
                .map(|category| clean_outcome(*category))
                .chain(scan.failed)
                .collect();
            return self.finish(report);
        }
        report.issues = scan.issues;

        self.state = if self.context.fix {
            RunState::FixPhase
        } else {
            RunState::ReportOnly
        };

        for &category in categories {
            match self.run_category(category, true).await {
                Ok(work) => {
                    let outcome = self.category_outcome(category, &work);
                    report.total_fixed += outcome.issues_fixed;
                    report.rows_deleted += outcome.rows_deleted;
                    report.categories.push(outcome);
                }
                Err(e) if e.is_schema_inconsistency() => return self.abort(report, e),
                Err(e) => {
                    tracing::error!(category = %category, "Category rolled back: {e}");
                    self.metrics.record_category_failure();
                    report
                        .categories
                        .push(CategoryOutcome::failed(category, e.to_string()));
                }
            }
        }

        let failed = report
            .categories
            .iter()
            .any(|o| o.status == CategoryStatus::Failed);

        if self.context.fix {
            self.state = RunState::ScanPhase;
            let verification = match self.scan(categories).await {
                Ok(scan) => scan,
                Err(e) => return self.abort(report, e),
            };
            report.clean =
                verification.issues.is_empty() && verification.failed.is_empty() && !failed;
            report.manual_fix_required = manual_issues(&verification.issues);
        } else {
            report.clean = false;
            report.manual_fix_required = manual_issues(&report.issues);
        }

        self.finish(report)
    }

    fn category_outcome(&self, category: Category, work: &CategoryWork) -> CategoryOutcome {
        let status = if work.issues.is_empty() {
            CategoryStatus::Clean
        } else if self.context.fix {
            CategoryStatus::Committed
        } else {
            CategoryStatus::RolledBack
        };

        match status {
            CategoryStatus::Committed => self.metrics.record_commit(work.fixed, work.rows_deleted),
            CategoryStatus::RolledBack => self.metrics.record_rollback(),
            _ => {}
        }

        let committed = status == CategoryStatus::Committed;
        CategoryOutcome {
            category,
            status,
            issues_found: work.issues.len(),
            issues_fixed: if committed { work.fixed } else { 0 },
            rows_deleted: if committed { work.rows_deleted } else { 0 },
            error: None,
        }
    }

    fn abort(&mut self, mut report: RunReport, error: ReconcileError) -> RunReport {
        tracing::error!(database = %report.database, "Aborting reconciliation: {error}");
        self.state = RunState::Aborted;
        report.state = RunState::Aborted;
        report.aborted = Some(error.to_string());
        report.clean = false;
        report.completed_at = Utc::now();
        report
    }

    fn finish(&mut self, mut report: RunReport) -> RunReport {
        self.state = RunState::Done;
        report.state = RunState::Done;
        report.completed_at = Utc::now();
        report
    }

    /// Read-only detection over `categories`, each in a rolled back
    /// transaction.
    async fn scan(&self, categories: &[Category]) -> Result<ScanResult> {
        let mut result = ScanResult::default();
        for &category in categories {
            match self.run_category(category, false).await {
                Ok(work) => {
                    tracing::debug!(category = %category, issues = work.issues.len(), "Category scanned");
                    result.issues.extend(work.issues);
                }
                Err(e) if e.is_schema_inconsistency() => return Err(e),
                Err(e) => {
                    tracing::error!(category = %category, "Scan failed: {e}");
                    result
                        .failed
                        .push(CategoryOutcome::failed(category, e.to_string()));
                }
            }
        }
        Ok(result)
    }

    /// One category inside one transaction. With `apply`, repairs run and
    /// are committed in fix mode; everything else is rolled back.
    async fn run_category(&self, category: Category, apply: bool) -> Result<CategoryWork> {
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| ReconcileError::from(e).in_category(category))?;

        match self.process(&mut tx, category, apply).await {
            Ok(work) if apply && self.context.fix => {
                tx.commit()
                    .await
                    .map_err(|e| ReconcileError::from(e).in_category(category))?;
                tracing::info!(category = %category, rows = work.rows_deleted, "Category committed");
                Ok(work)
            }
            Ok(work) => {
                tx.rollback()
                    .await
                    .map_err(|e| ReconcileError::from(e).in_category(category))?;
                Ok(work)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(category = %category, "Rollback failed: {rollback}");
                }
                Err(e.in_category(category))
            }
        }
    }

    async fn process(
        &self,
        conn: &mut AnyConnection,
        category: Category,
        apply: bool,
    ) -> Result<CategoryWork> {
        match category {
            Category::UnusedModels => self.unused_models(conn, apply).await,
            Category::UnusedModules => self.unused_modules(conn, apply).await,
            Category::Orphans => self.orphans(conn, apply).await,
            Category::Duplicates => self.duplicates(conn, apply).await,
        }
    }

    fn deleter(&self) -> CascadeDeleter {
        CascadeDeleter::new(self.registry.clone(), self.store.dialect(), self.context.fix)
    }

    async fn unused_models(&self, conn: &mut AnyConnection, apply: bool) -> Result<CategoryWork> {
        let stale: Vec<_> = metadata::list_models(&mut *conn)
            .await?
            .into_iter()
            .filter(|m| !self.registry.is_live(&m.model))
            .collect();

        let mut work = CategoryWork {
            issues: stale
                .iter()
                .map(|m| {
                    Issue::fixable(
                        Category::UnusedModels,
                        tables::MODEL,
                        m.id,
                        format!("Delete model {},{}", m.model, m.id),
                    )
                })
                .collect(),
            ..CategoryWork::default()
        };

        if apply {
            let mut deleter = self.deleter();
            for model in stale {
                let outcome = deleter.delete_model(&mut *conn, model).await?;
                work.rows_deleted += outcome.total_deleted();
                work.fixed += 1;
            }
        }
        Ok(work)
    }

    async fn unused_modules(&self, conn: &mut AnyConnection, apply: bool) -> Result<CategoryWork> {
        let configured = self.modules.is_configured();
        if !configured && self.context.full_delete.is_empty() && self.context.delete.is_empty() {
            tracing::warn!("Module availability is not configured, skipping unused module check");
            return Ok(CategoryWork::default());
        }

        let mut work = CategoryWork::default();
        let mut plans = Vec::new();
        for module in metadata::list_modules(&mut *conn).await? {
            if configured && self.modules.is_available(&module.name) {
                continue;
            }
            match self.module_plan(&module) {
                Some(plan) => {
                    work.issues.push(Issue::fixable(
                        Category::UnusedModules,
                        tables::MODULE,
                        module.id,
                        format!("Delete {}", plan.target),
                    ));
                    plans.push(plan);
                }
                None if configured && !self.modules.is_protected(&module.name) => {
                    let issue = Issue::manual(
                        Category::UnusedModules,
                        tables::MODULE,
                        module.id,
                        format!(
                            "Module {},{} ({}) has no owner in the deployment and is not listed for deletion",
                            module.name, module.id, module.state
                        ),
                    );
                    if apply {
                        issue.log(self.context.fix);
                    }
                    work.issues.push(issue);
                }
                None => {}
            }
        }

        if apply {
            let mut deleter = self.deleter();
            for plan in &plans {
                let outcome = deleter.execute(&mut *conn, plan).await?;
                work.rows_deleted += outcome.total_deleted();
                work.fixed += 1;
            }
        }
        Ok(work)
    }

    /// Deletion requested for a module without owner, if any.
    fn module_plan(&self, module: &ModuleRecord) -> Option<DeletionPlan> {
        if self.context.full_delete.contains(&module.name) {
            Some(DeletionPlan::for_module(module.clone(), true))
        } else if self.context.delete.contains(&module.name) {
            Some(DeletionPlan::for_module(module.clone(), false))
        } else {
            None
        }
    }

    async fn orphans(&self, conn: &mut AnyConnection, apply: bool) -> Result<CategoryWork> {
        let mut scanner = OrphanScanner::new(self.registry.clone(), self.store.dialect());
        scanner.reset();
        let bindings: Vec<_> = scanner.scan_bindings(&mut *conn).try_collect().await?;
        let translations: Vec<_> = scanner.scan_translations(&mut *conn).try_collect().await?;

        let mut work = CategoryWork::default();
        for finding in &bindings {
            let binding = &finding.entry;
            work.issues.push(Issue::fixable(
                Category::Orphans,
                tables::DATA,
                binding.id,
                format!(
                    "Delete model_data {},{},{},{} ({})",
                    binding.external_name(),
                    binding.id,
                    binding.model,
                    binding.record_id.unwrap_or_default(),
                    finding.reason
                ),
            ));
        }
        for finding in &translations {
            work.issues.push(Issue::fixable(
                Category::Orphans,
                tables::TRANSLATION,
                finding.entry.id,
                format!("Delete {} ({})", finding.entry.describe(), finding.reason),
            ));
        }

        if apply {
            for issue in &work.issues {
                issue.log(self.context.fix);
            }
            let binding_ids: Vec<i64> = bindings.iter().map(|f| f.entry.id).collect();
            let translation_ids: Vec<i64> = translations.iter().map(|f| f.entry.id).collect();
            work.rows_deleted += metadata::delete_ids(&mut *conn, tables::DATA, &binding_ids).await?;
            work.rows_deleted +=
                metadata::delete_ids(&mut *conn, tables::TRANSLATION, &translation_ids).await?;
            work.fixed = work.issues.len();
        }
        Ok(work)
    }

    async fn duplicates(&self, conn: &mut AnyConnection, apply: bool) -> Result<CategoryWork> {
        let mut entries = metadata::list_translations(&mut *conn, &TranslationKind::Model).await?;
        entries.extend(metadata::list_translations(&mut *conn, &TranslationKind::View).await?);

        let detector =
            DuplicateDetector::new(self.context.tie_break, self.context.meta_model_prefix.clone());
        let report = detector.detect(&entries);

        let mut work = CategoryWork {
            issues: report
                .findings
                .iter()
                .map(|f| match f.resolution {
                    Resolution::Delete => Issue::fixable(
                        Category::Duplicates,
                        tables::TRANSLATION,
                        f.entry.id,
                        f.message(),
                    ),
                    Resolution::ManualFixRequired => Issue::manual(
                        Category::Duplicates,
                        tables::TRANSLATION,
                        f.entry.id,
                        f.message(),
                    ),
                })
                .collect(),
            ..CategoryWork::default()
        };

        if apply {
            for issue in &work.issues {
                issue.log(self.context.fix);
            }
            let ids = report.deletion_ids();
            work.rows_deleted = metadata::delete_ids(&mut *conn, tables::TRANSLATION, &ids).await?;
            work.fixed = ids.len();
        }
        Ok(work)
    }
}

fn clean_outcome(category: Category) -> CategoryOutcome {
    CategoryOutcome {
        category,
        status: CategoryStatus::Clean,
        issues_found: 0,
        issues_fixed: 0,
        rows_deleted: 0,
        error: None,
    }
}

fn manual_issues(issues: &[Issue]) -> Vec<Issue> {
    issues.iter().filter(|i| !i.is_fixable()).cloned().collect()
}
