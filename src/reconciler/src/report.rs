//! Findings and the structured outcome of a reconciliation run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Cleanup category. Each one is repaired inside its own transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Models the registry no longer loads
    UnusedModels,
    /// Modules without any owner in the deployment
    UnusedModules,
    /// Bindings and translations pointing at missing rows
    Orphans,
    /// Duplicate translation entries
    Duplicates,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::UnusedModels => "unused-models",
            Category::UnusedModules => "unused-modules",
            Category::Orphans => "orphans",
            Category::Duplicates => "duplicates",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueClass {
    Fixable,
    ManualFixRequired,
}

/// One detected inconsistency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub category: Category,
    pub class: IssueClass,
    /// Metadata table holding the offending entry
    pub table: &'static str,
    /// Row id of the offending entry in `table`
    pub row_id: i64,
    pub message: String,
}

impl Issue {
    pub fn fixable(
        category: Category,
        table: &'static str,
        row_id: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            class: IssueClass::Fixable,
            table,
            row_id,
            message: message.into(),
        }
    }

    pub fn manual(
        category: Category,
        table: &'static str,
        row_id: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            class: IssueClass::ManualFixRequired,
            table,
            row_id,
            message: message.into(),
        }
    }

    pub fn is_fixable(&self) -> bool {
        self.class == IssueClass::Fixable
    }

    /// Emit the operator-facing marker line for this issue.
    pub fn log(&self, fix: bool) {
        match self.class {
            IssueClass::Fixable => log_fixable(fix, self.category, &self.message),
            IssueClass::ManualFixRequired => {
                tracing::warn!(category = %self.category, row_id = self.row_id, "[MANUAL FIX] {}", self.message)
            }
        }
    }
}

/// Number of distinct rows among `issues`. A row flagged by more than one
/// category counts once.
pub fn distinct_rows(issues: &[Issue]) -> usize {
    issues
        .iter()
        .map(|i| (i.table, i.row_id))
        .collect::<HashSet<_>>()
        .len()
}

/// `[FIX]` when the repair is applied, `[FIXABLE]` when it is only reported.
pub(crate) fn log_fixable(fix: bool, category: Category, message: &str) {
    if fix {
        tracing::info!(category = %category, "[FIX] {message}");
    } else {
        tracing::warn!(category = %category, "[FIXABLE] {message}");
    }
}

/// Controller state machine.
///
/// `Idle -> ScanPhase -> {FixPhase | ReportOnly} -> Done`, with `Aborted`
/// reachable from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Idle,
    ScanPhase,
    FixPhase,
    ReportOnly,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CategoryStatus {
    /// Nothing to repair
    Clean,
    Committed,
    /// Dry run, or a failure undid the category's work
    RolledBack,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryOutcome {
    pub category: Category,
    pub status: CategoryStatus,
    pub issues_found: usize,
    pub issues_fixed: usize,
    pub rows_deleted: u64,
    pub error: Option<String>,
}

impl CategoryOutcome {
    pub(crate) fn failed(category: Category, error: String) -> Self {
        Self {
            category,
            status: CategoryStatus::Failed,
            issues_found: 0,
            issues_fixed: 0,
            rows_deleted: 0,
            error: Some(error),
        }
    }
}

/// Process exit codes, for CI use.
pub mod exit_code {
    pub const CLEAN: u8 = 0;
    pub const CLEANUP_NECESSARY: u8 = 1;
    pub const MANUAL_FIX_REQUIRED: u8 = 2;
    pub const FAILED: u8 = 3;
    pub const CONFIGURATION_ERROR: u8 = 64;
}

/// Terminal report of one reconciliation run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub database: String,
    pub fix: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub state: RunState,
    pub total_issues_found: usize,
    pub total_fixed: usize,
    pub rows_deleted: u64,
    /// Issues that need an operator decision, from the last scan of the run
    pub manual_fix_required: Vec<Issue>,
    /// Everything the initial scan found
    pub issues: Vec<Issue>,
    pub categories: Vec<CategoryOutcome>,
    pub clean: bool,
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn exit_code(&self) -> u8 {
        if self.state == RunState::Aborted
            || self
                .categories
                .iter()
                .any(|c| c.status == CategoryStatus::Failed)
        {
            exit_code::FAILED
        } else if self.clean {
            exit_code::CLEAN
        } else if !self.manual_fix_required.is_empty() {
            exit_code::MANUAL_FIX_REQUIRED
        } else {
            exit_code::CLEANUP_NECESSARY
        }
    }

    /// Log the end-of-run status line and a per-category summary.
    pub fn log(&self) {
        for outcome in &self.categories {
            tracing::info!(
                database = %self.database,
                category = %outcome.category,
                status = ?outcome.status,
                issues_found = outcome.issues_found,
                issues_fixed = outcome.issues_fixed,
                rows_deleted = outcome.rows_deleted,
                "Category finished"
            );
        }

        if let Some(reason) = &self.aborted {
            tracing::error!(database = %self.database, "Reconciliation aborted: {reason}");
        }

        if self.clean {
            tracing::info!(database = %self.database, "Everything is CLEAN!");
        } else {
            tracing::warn!(
                database = %self.database,
                issues_found = self.total_issues_found,
                fixed = self.total_fixed,
                manual = self.manual_fix_required.len(),
                "CLEANUP NECESSARY"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        RunReport {
            run_id: "run".to_string(),
            database: "db".to_string(),
            fix: false,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            state: RunState::Done,
            total_issues_found: 0,
            total_fixed: 0,
            rows_deleted: 0,
            manual_fix_required: vec![],
            issues: vec![],
            categories: vec![],
            clean: true,
            aborted: None,
        }
    }

    #[test]
    fn test_exit_code_clean() {
        assert_eq!(report().exit_code(), exit_code::CLEAN);
    }

    #[test]
    fn test_exit_code_manual_fix() {
        let mut report = report();
        report.clean = false;
        report.manual_fix_required = vec![Issue::manual(Category::Duplicates, "ir_translation", 4, "double")];
        assert_eq!(report.exit_code(), exit_code::MANUAL_FIX_REQUIRED);
    }

    #[test]
    fn test_exit_code_fixable_only() {
        let mut report = report();
        report.clean = false;
        assert_eq!(report.exit_code(), exit_code::CLEANUP_NECESSARY);
    }

    #[test]
    fn test_exit_code_aborted_wins() {
        let mut report = report();
        report.state = RunState::Aborted;
        report.clean = false;
        report.manual_fix_required = vec![Issue::manual(Category::Duplicates, "ir_translation", 4, "double")];
        assert_eq!(report.exit_code(), exit_code::FAILED);
    }

    #[test]
    fn test_row_flagged_twice_counts_once() {
        let issues = vec![
            Issue::fixable(Category::Orphans, "ir_translation", 2, "orphan"),
            Issue::fixable(Category::Duplicates, "ir_translation", 2, "double"),
            Issue::fixable(Category::Orphans, "ir_model_data", 2, "orphan"),
        ];
        assert_eq!(distinct_rows(&issues), 2);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(Category::UnusedModels.to_string(), "unused-models");
        assert_eq!(Category::Duplicates.to_string(), "duplicates");
    }
}
