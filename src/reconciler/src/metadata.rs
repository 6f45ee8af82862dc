//! Queries against the metadata tables.
//!
//! Every function runs on the caller's connection so a category's reads and
//! writes share one transaction.

use crate::error::{ReconcileError, Result};
use crate::model::{
    DataBinding, META_MODEL, ModelDefinition, ModuleRecord, ModuleState, TranslationEntry,
    TranslationKind,
};
use common::Dialect;
use common::store::{is_valid_identifier, table_exists};
use sqlx::AnyConnection;
use sqlx::any::AnyRow;
use sqlx::{Row, query, query_scalar};
use std::collections::{HashMap, HashSet};

pub mod tables {
    pub const MODEL: &str = "ir_model";
    pub const FIELD: &str = "ir_model_fields";
    pub const CONSTRAINT: &str = "ir_model_constraint";
    pub const ACCESS: &str = "ir_model_access";
    pub const RELATION: &str = "ir_model_relation";
    pub const DATA: &str = "ir_model_data";
    pub const TRANSLATION: &str = "ir_translation";
    pub const MODULE: &str = "ir_module_module";
    pub const MODULE_DEPENDENCY: &str = "ir_module_module_dependency";
}

/// Largest id list sent in one `IN (...)` clause.
const DELETE_CHUNK: usize = 500;

type SqlResult<T> = std::result::Result<T, sqlx::Error>;

pub async fn list_models(conn: &mut AnyConnection) -> SqlResult<Vec<ModelDefinition>> {
    let rows = query("SELECT id, model FROM ir_model ORDER BY id")
        .fetch_all(conn)
        .await?;
    rows.iter().map(model_from_row).collect()
}

/// Names of every model that still has an `ir_model` row.
pub async fn list_model_names(conn: &mut AnyConnection) -> SqlResult<HashSet<String>> {
    let names: Vec<String> = query_scalar("SELECT model FROM ir_model")
        .fetch_all(conn)
        .await?;
    Ok(names.into_iter().collect())
}

fn model_from_row(row: &AnyRow) -> SqlResult<ModelDefinition> {
    Ok(ModelDefinition {
        id: row.try_get("id")?,
        model: row.try_get("model")?,
    })
}

pub async fn list_modules(conn: &mut AnyConnection) -> SqlResult<Vec<ModuleRecord>> {
    let rows = query("SELECT id, name, state FROM ir_module_module ORDER BY id")
        .fetch_all(conn)
        .await?;
    rows.iter().map(module_from_row).collect()
}

fn module_from_row(row: &AnyRow) -> SqlResult<ModuleRecord> {
    let state: String = row.try_get("state")?;
    Ok(ModuleRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        state: ModuleState::parse(&state),
    })
}

fn binding_from_row(row: &AnyRow) -> SqlResult<DataBinding> {
    Ok(DataBinding {
        id: row.try_get("id")?,
        module: row.try_get("module")?,
        model: row.try_get("model")?,
        record_id: row.try_get("res_id")?,
        name: row.try_get("name")?,
    })
}

/// One page of the bindings that point at a concrete row, ordered by id and
/// starting after `after`.
pub async fn list_bindings_after(
    conn: &mut AnyConnection,
    after: i64,
    limit: usize,
) -> SqlResult<Vec<DataBinding>> {
    let rows = query(
        "SELECT id, module, model, res_id, name FROM ir_model_data \
         WHERE res_id > 0 AND id > $1 ORDER BY id LIMIT $2",
    )
    .bind(after)
    .bind(page_limit(limit))
    .fetch_all(conn)
    .await?;
    rows.iter().map(binding_from_row).collect()
}

pub async fn list_bindings_of_module(
    conn: &mut AnyConnection,
    module: &str,
) -> SqlResult<Vec<DataBinding>> {
    let rows = query(
        "SELECT id, module, model, res_id, name FROM ir_model_data \
         WHERE module = $1 ORDER BY id",
    )
    .bind(module)
    .fetch_all(conn)
    .await?;
    rows.iter().map(binding_from_row).collect()
}

fn translation_from_row(row: &AnyRow) -> SqlResult<TranslationEntry> {
    let kind: String = row.try_get("kind")?;
    Ok(TranslationEntry {
        id: row.try_get("id")?,
        lang: row.try_get("lang")?,
        kind: TranslationKind::parse(&kind),
        name: row.try_get("name")?,
        record_id: row.try_get("res_id")?,
        module: row.try_get("module")?,
        source: row.try_get("src")?,
        value: row.try_get("value")?,
        comments: row.try_get("comments")?,
    })
}

/// Translations of one kind in natural (id) order.
pub async fn list_translations(
    conn: &mut AnyConnection,
    kind: &TranslationKind,
) -> SqlResult<Vec<TranslationEntry>> {
    let rows = query(
        "SELECT id, lang, type AS kind, name, res_id, module, src, value, comments \
         FROM ir_translation WHERE type = $1 ORDER BY id",
    )
    .bind(kind.as_str())
    .fetch_all(conn)
    .await?;
    rows.iter().map(translation_from_row).collect()
}

/// One page of the translations of one kind, ordered by id and starting
/// after `after`.
pub async fn list_translations_after(
    conn: &mut AnyConnection,
    kind: &TranslationKind,
    after: i64,
    limit: usize,
) -> SqlResult<Vec<TranslationEntry>> {
    let rows = query(
        "SELECT id, lang, type AS kind, name, res_id, module, src, value, comments \
         FROM ir_translation WHERE type = $1 AND id > $2 ORDER BY id LIMIT $3",
    )
    .bind(kind.as_str())
    .bind(after)
    .bind(page_limit(limit))
    .fetch_all(conn)
    .await?;
    rows.iter().map(translation_from_row).collect()
}

fn page_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Model and field translations of `model`, plus the translated labels of
/// its own `ir.model` row.
pub async fn list_translations_of_model(
    conn: &mut AnyConnection,
    model: &ModelDefinition,
) -> SqlResult<Vec<TranslationEntry>> {
    let rows = query(
        "SELECT id, lang, type AS kind, name, res_id, module, src, value, comments \
         FROM ir_translation WHERE type IN ('model', 'field') \
         AND (name LIKE $1 OR (name LIKE $2 AND res_id = $3)) ORDER BY id",
    )
    .bind(format!("{}%", model.model))
    .bind(format!("{META_MODEL},%"))
    .bind(model.id)
    .fetch_all(conn)
    .await?;

    let prefix = format!("{},", model.model);
    let meta_prefix = format!("{META_MODEL},");
    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        let entry = translation_from_row(row)?;
        let owned = entry.name == model.model
            || entry.name.starts_with(&prefix)
            || (entry.name.starts_with(&meta_prefix) && entry.record_id == Some(model.id));
        if owned {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Whether row `id` exists in `table`. The table must have been checked by
/// a [`TableProbe`].
pub async fn record_exists(conn: &mut AnyConnection, table: &str, id: i64) -> SqlResult<bool> {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE id = $1");
    let count: i64 = query_scalar(&sql).bind(id).fetch_one(conn).await?;
    Ok(count > 0)
}

/// Delete the given ids from `table`, returning the affected row count.
pub async fn delete_ids(
    conn: &mut AnyConnection,
    table: &str,
    ids: &[i64],
) -> SqlResult<u64> {
    let mut deleted = 0;
    for chunk in ids.chunks(DELETE_CHUNK) {
        let placeholders = (1..=chunk.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("DELETE FROM {table} WHERE id IN ({placeholders})");
        let mut statement = query(&sql);
        for id in chunk {
            statement = statement.bind(*id);
        }
        deleted += statement.execute(&mut *conn).await?.rows_affected();
    }
    Ok(deleted)
}

/// Delete the bindings of meta-model `model` whose `res_id` is one of
/// `record_ids`.
pub async fn delete_bindings_of(
    conn: &mut AnyConnection,
    model: &str,
    record_ids: &[i64],
) -> SqlResult<u64> {
    let mut deleted = 0;
    for chunk in record_ids.chunks(DELETE_CHUNK) {
        let placeholders = (2..=chunk.len() + 1)
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "DELETE FROM {} WHERE model = $1 AND res_id IN ({placeholders})",
            tables::DATA
        );
        let mut statement = query(&sql).bind(model);
        for id in chunk {
            statement = statement.bind(*id);
        }
        deleted += statement.execute(&mut *conn).await?.rows_affected();
    }
    Ok(deleted)
}

/// Memo of physical table presence for one phase.
///
/// The registry may claim a model is live while its table is gone; that is
/// surfaced as [`ReconcileError::SchemaInconsistency`].
#[derive(Debug)]
pub struct TableProbe {
    dialect: Dialect,
    known: HashMap<String, bool>,
}

impl TableProbe {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            known: HashMap::new(),
        }
    }

    pub async fn exists(&mut self, conn: &mut AnyConnection, table: &str) -> SqlResult<bool> {
        if let Some(present) = self.known.get(table) {
            return Ok(*present);
        }
        let present = is_valid_identifier(table) && table_exists(conn, self.dialect, table).await?;
        self.known.insert(table.to_string(), present);
        Ok(present)
    }

    /// Fail unless the table backing live `model` is physically present.
    pub async fn require(
        &mut self,
        conn: &mut AnyConnection,
        model: &str,
        table: &str,
    ) -> Result<()> {
        if self.exists(conn, table).await? {
            Ok(())
        } else {
            Err(ReconcileError::SchemaInconsistency {
                model: model.to_string(),
                table: table.to_string(),
            })
        }
    }

    pub fn clear(&mut self) {
        self.known.clear();
    }
}
