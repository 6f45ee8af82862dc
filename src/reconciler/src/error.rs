use crate::cascade::StepFailure;
use crate::report::Category;
use common::{ConfigurationError, StoreError};

/// Errors raised while reconciling a store.
///
/// Issues that merely need an operator decision are not errors; they are
/// reported as [`crate::report::IssueClass::ManualFixRequired`].
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The registry claims a model is live but its table is absent. The
    /// registry cannot be trusted for any further category.
    #[error("Schema inconsistency: model '{model}' is registered live but table '{table}' does not exist")]
    SchemaInconsistency { model: String, table: String },

    /// A store error inside a cleanup category's transaction. Only that
    /// category is rolled back.
    #[error("Transaction failed in category {category}: {source}")]
    TransactionFailure {
        category: Category,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Connection(#[from] StoreError),

    #[error("Failed to load registry snapshot '{path}': {message}")]
    Snapshot { path: String, message: String },

    #[error(transparent)]
    Cascade(#[from] StepFailure),
}

impl ReconcileError {
    /// Whether this error must abort the whole run instead of one category.
    pub fn is_schema_inconsistency(&self) -> bool {
        match self {
            ReconcileError::SchemaInconsistency { .. } => true,
            ReconcileError::Cascade(failure) => failure.is_schema_inconsistency(),
            _ => false,
        }
    }

    /// Wrap a category-level error as a transaction failure, keeping schema
    /// inconsistencies intact.
    pub(crate) fn in_category(self, category: Category) -> Self {
        match self {
            e if e.is_schema_inconsistency() => e,
            e @ ReconcileError::TransactionFailure { .. } => e,
            e => ReconcileError::TransactionFailure {
                category,
                source: Box::new(e),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
