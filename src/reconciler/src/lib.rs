//! Consistency reconciliation for application metadata stores.
//!
//! A run compares the persisted metadata (models, modules, data bindings,
//! translations) with what the application currently loads, reports every
//! inconsistency and, in fix mode, repairs it with one transaction per
//! cleanup category.

pub mod cascade;
pub mod controller;
pub mod detector;
pub mod error;
pub mod fleet;
pub mod metadata;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod report;
pub mod scanner;

pub use cascade::{CascadeDeleter, CascadeOutcome, DeletionPlan, DeletionStep, DeletionTarget};
pub use controller::{Reconciler, RunContext, RunMode};
pub use detector::{DuplicateDetector, DuplicateReport};
pub use error::{ReconcileError, Result};
pub use fleet::{FleetReport, FleetRunner, StoreOutcome};
pub use metrics::{MetricsSummary, ReconcileMetrics};
pub use registry::{ModelRegistry, ModuleCatalog, StaticRegistry};
pub use report::{Category, CategoryStatus, Issue, IssueClass, RunReport, RunState, exit_code};
pub use scanner::{OrphanReason, OrphanScanner};
