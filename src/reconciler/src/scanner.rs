//! Orphan detection for data bindings and model translations.
//!
//! Findings are produced lazily as a stream in id order. Rows are read one
//! page at a time, so memory stays bounded by the page size plus the
//! findings the caller keeps. Row existence checks are memoized per
//! `(model, record id)` for the lifetime of the scanner, which the
//! controller scopes to one phase.

use crate::error::{ReconcileError, Result};
use crate::metadata::{self, TableProbe};
use crate::model::{DataBinding, MODULE_MODEL, TranslationEntry, TranslationKind};
use crate::registry::ModelRegistry;
use async_stream::try_stream;
use common::Dialect;
use futures::Stream;
use serde::Serialize;
use sqlx::AnyConnection;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrphanReason {
    /// The referenced model is no longer registered
    ModelNotLive,
    /// The referenced row is gone from the model's table
    RecordMissing,
    /// A module binding names a module row that is gone
    ModuleMissing,
}

impl fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrphanReason::ModelNotLive => write!(f, "model not live"),
            OrphanReason::RecordMissing => write!(f, "record missing"),
            OrphanReason::ModuleMissing => write!(f, "module missing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanFinding<T> {
    pub entry: T,
    pub reason: OrphanReason,
}

/// Rows fetched per query while scanning.
const SCAN_PAGE: usize = 1000;

pub struct OrphanScanner {
    registry: Arc<dyn ModelRegistry>,
    probe: TableProbe,
    existence: HashMap<(String, i64), bool>,
    page_size: usize,
}

impl OrphanScanner {
    pub fn new(registry: Arc<dyn ModelRegistry>, dialect: Dialect) -> Self {
        Self {
            registry,
            probe: TableProbe::new(dialect),
            existence: HashMap::new(),
            page_size: SCAN_PAGE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Forget memoized answers; called at phase start.
    pub fn reset(&mut self) {
        self.existence.clear();
        self.probe.clear();
    }

    /// Number of distinct `(model, record id)` pairs checked so far.
    pub fn cached_checks(&self) -> usize {
        self.existence.len()
    }

    /// Bindings pointing at a non-live model, a missing row or a missing module.
    pub fn scan_bindings<'a>(
        &'a mut self,
        conn: &'a mut AnyConnection,
    ) -> impl Stream<Item = Result<OrphanFinding<DataBinding>>> + 'a {
        try_stream! {
            let mut after = 0;
            let mut scanned = 0;
            loop {
                let page = metadata::list_bindings_after(&mut *conn, after, self.page_size)
                    .await
                    .map_err(ReconcileError::from)?;
                let last_page = page.len() < self.page_size;
                scanned += page.len();

                for binding in page {
                    after = binding.id;
                    if let Some(reason) = self.classify_binding(&mut *conn, &binding).await? {
                        yield OrphanFinding { entry: binding, reason };
                    }
                }
                if last_page {
                    break;
                }
            }
            tracing::debug!(bindings = scanned, "Scanned data bindings");
        }
    }

    /// Model translations whose record no longer exists, or whose model is
    /// gone from the registry without an `ir_model` row left behind. Those
    /// of non-live models that still have an `ir_model` row are removed by
    /// the cascade deleter instead.
    pub fn scan_translations<'a>(
        &'a mut self,
        conn: &'a mut AnyConnection,
    ) -> impl Stream<Item = Result<OrphanFinding<TranslationEntry>>> + 'a {
        try_stream! {
            let registered: HashSet<String> = metadata::list_model_names(&mut *conn)
                .await
                .map_err(ReconcileError::from)?;
            let mut after = 0;
            let mut scanned = 0;
            loop {
                let page = metadata::list_translations_after(
                    &mut *conn,
                    &TranslationKind::Model,
                    after,
                    self.page_size,
                )
                .await
                .map_err(ReconcileError::from)?;
                let last_page = page.len() < self.page_size;
                scanned += page.len();

                for entry in page {
                    after = entry.id;
                    let Some(record_id) = entry.record_id.filter(|id| *id > 0) else {
                        continue;
                    };
                    let model = entry.model_name().to_string();
                    if !self.registry.is_live(&model) {
                        if !registered.contains(&model) {
                            yield OrphanFinding { entry, reason: OrphanReason::ModelNotLive };
                        }
                        continue;
                    }
                    if !self.record_exists(&mut *conn, &model, record_id).await? {
                        yield OrphanFinding { entry, reason: OrphanReason::RecordMissing };
                    }
                }
                if last_page {
                    break;
                }
            }
            tracing::debug!(translations = scanned, "Scanned model translations");
        }
    }

    async fn classify_binding(
        &mut self,
        conn: &mut AnyConnection,
        binding: &DataBinding,
    ) -> Result<Option<OrphanReason>> {
        let Some(record_id) = binding.record_id.filter(|id| *id > 0) else {
            return Ok(None);
        };

        if !self.registry.is_live(&binding.model) {
            return Ok(Some(OrphanReason::ModelNotLive));
        }

        if self.record_exists(conn, &binding.model, record_id).await? {
            return Ok(None);
        }

        if binding.model == MODULE_MODEL {
            Ok(Some(OrphanReason::ModuleMissing))
        } else {
            Ok(Some(OrphanReason::RecordMissing))
        }
    }

    async fn record_exists(
        &mut self,
        conn: &mut AnyConnection,
        model: &str,
        record_id: i64,
    ) -> Result<bool> {
        let key = (model.to_string(), record_id);
        if let Some(exists) = self.existence.get(&key) {
            return Ok(*exists);
        }

        let table = self
            .registry
            .table_of(model)
            .ok_or_else(|| ReconcileError::SchemaInconsistency {
                model: model.to_string(),
                table: String::new(),
            })?;
        self.probe.require(conn, model, table.as_str()).await?;

        let exists = metadata::record_exists(conn, table.as_str(), record_id).await?;
        self.existence.insert(key, exists);
        Ok(exists)
    }
}
