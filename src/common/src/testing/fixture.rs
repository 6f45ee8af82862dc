//! File-backed fixture stores carrying the metadata schema.

use crate::store::{Store, StoreError};
use sqlx::{query, query_scalar};
use std::path::Path;
use tempfile::TempDir;

const METADATA_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS ir_model (
        id BIGINT PRIMARY KEY,
        model TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ir_model_fields (
        id BIGINT PRIMARY KEY,
        model_id BIGINT NOT NULL,
        name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ir_model_constraint (
        id BIGINT PRIMARY KEY,
        model BIGINT NOT NULL,
        name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ir_model_access (
        id BIGINT PRIMARY KEY,
        model_id BIGINT NOT NULL,
        name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ir_model_relation (
        id BIGINT PRIMARY KEY,
        model BIGINT NOT NULL,
        name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ir_model_data (
        id BIGINT PRIMARY KEY,
        module TEXT NOT NULL,
        model TEXT NOT NULL,
        res_id BIGINT,
        name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ir_translation (
        id BIGINT PRIMARY KEY,
        lang TEXT NOT NULL,
        type TEXT NOT NULL,
        name TEXT NOT NULL,
        res_id BIGINT,
        module TEXT,
        src TEXT,
        value TEXT,
        comments TEXT
    )",
    "CREATE TABLE IF NOT EXISTS ir_module_module (
        id BIGINT PRIMARY KEY,
        name TEXT NOT NULL,
        state TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ir_module_module_dependency (
        id BIGINT PRIMARY KEY,
        module_id BIGINT NOT NULL,
        name TEXT NOT NULL
    )",
];

/// Create the metadata tables on an empty store.
pub async fn create_schema(store: &Store) -> Result<(), sqlx::Error> {
    for ddl in METADATA_SCHEMA {
        query(*ddl).execute(store.pool()).await?;
    }
    Ok(())
}

/// One `ir_translation` row to seed.
#[derive(Debug, Clone)]
pub struct TranslationRow {
    pub id: i64,
    pub lang: String,
    pub kind: String,
    pub name: String,
    pub res_id: Option<i64>,
    pub module: Option<String>,
    pub src: Option<String>,
    pub value: Option<String>,
}

impl TranslationRow {
    /// A `model` kind translation of `record_id`'s field `name`.
    pub fn model(id: i64, lang: &str, module: &str, name: &str, res_id: i64, value: &str) -> Self {
        Self {
            id,
            lang: lang.to_string(),
            kind: "model".to_string(),
            name: name.to_string(),
            res_id: Some(res_id),
            module: Some(module.to_string()),
            src: Some(value.to_string()),
            value: Some(value.to_string()),
        }
    }

    /// A `view` kind translation (record id 0) of source text `src`.
    pub fn view(id: i64, lang: &str, module: &str, name: &str, src: &str, value: &str) -> Self {
        Self {
            id,
            lang: lang.to_string(),
            kind: "view".to_string(),
            name: name.to_string(),
            res_id: Some(0),
            module: Some(module.to_string()),
            src: Some(src.to_string()),
            value: Some(value.to_string()),
        }
    }

    /// A `field` kind translation (label of `model,field`).
    pub fn field(id: i64, lang: &str, module: &str, name: &str, value: &str) -> Self {
        Self {
            kind: "field".to_string(),
            res_id: Some(0),
            ..Self::view(id, lang, module, name, value, value)
        }
    }
}

/// SQLite store in a temporary directory with the metadata schema created.
///
/// The directory lives as long as the fixture, so each test gets an isolated
/// database file that every pooled connection shares.
pub struct FixtureStore {
    dir: TempDir,
    store: Store,
    dsn: String,
}

impl FixtureStore {
    pub async fn new() -> Result<Self, StoreError> {
        let dir = TempDir::new()?;
        let (store, dsn) = Self::create_in(dir.path(), "fixture").await?;
        Ok(Self { dir, store, dsn })
    }

    /// Create a further database `name` next to this fixture's file.
    pub async fn sibling(&self, name: &str) -> Result<Store, StoreError> {
        let (store, _) = Self::create_in(self.dir.path(), name).await?;
        Ok(store)
    }

    async fn create_in(dir: &Path, name: &str) -> Result<(Store, String), StoreError> {
        let dsn = format!("sqlite://{}/{name}.db", dir.display());
        let store = Store::connect(&dsn, 4).await?;
        create_schema(&store).await?;
        Ok((store, dsn))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub async fn model(&self, id: i64, model: &str) -> Result<(), sqlx::Error> {
        query("INSERT INTO ir_model (id, model) VALUES ($1, $2)")
            .bind(id)
            .bind(model)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    pub async fn field(&self, id: i64, model_id: i64, name: &str) -> Result<(), sqlx::Error> {
        query("INSERT INTO ir_model_fields (id, model_id, name) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(model_id)
            .bind(name)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    pub async fn constraint(&self, id: i64, model_id: i64, name: &str) -> Result<(), sqlx::Error> {
        query("INSERT INTO ir_model_constraint (id, model, name) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(model_id)
            .bind(name)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    pub async fn access(&self, id: i64, model_id: i64, name: &str) -> Result<(), sqlx::Error> {
        query("INSERT INTO ir_model_access (id, model_id, name) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(model_id)
            .bind(name)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    pub async fn relation(&self, id: i64, model_id: i64, name: &str) -> Result<(), sqlx::Error> {
        query("INSERT INTO ir_model_relation (id, model, name) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(model_id)
            .bind(name)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    pub async fn binding(
        &self,
        id: i64,
        module: &str,
        model: &str,
        res_id: i64,
        name: &str,
    ) -> Result<(), sqlx::Error> {
        query("INSERT INTO ir_model_data (id, module, model, res_id, name) VALUES ($1, $2, $3, $4, $5)")
            .bind(id)
            .bind(module)
            .bind(model)
            .bind(res_id)
            .bind(name)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    pub async fn translation(&self, row: TranslationRow) -> Result<(), sqlx::Error> {
        query(
            "INSERT INTO ir_translation (id, lang, type, name, res_id, module, src, value) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(row.id)
        .bind(row.lang)
        .bind(row.kind)
        .bind(row.name)
        .bind(row.res_id)
        .bind(row.module)
        .bind(row.src)
        .bind(row.value)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    pub async fn module(&self, id: i64, name: &str, state: &str) -> Result<(), sqlx::Error> {
        query("INSERT INTO ir_module_module (id, name, state) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(name)
            .bind(state)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    pub async fn dependency(&self, id: i64, module_id: i64, name: &str) -> Result<(), sqlx::Error> {
        query("INSERT INTO ir_module_module_dependency (id, module_id, name) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(module_id)
            .bind(name)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    /// Create an application table holding business rows.
    pub async fn business_table(&self, table: &str) -> Result<(), sqlx::Error> {
        let ddl = format!("CREATE TABLE {table} (id BIGINT PRIMARY KEY, name TEXT)");
        query(&ddl).execute(self.store.pool()).await?;
        Ok(())
    }

    pub async fn business_row(&self, table: &str, id: i64) -> Result<(), sqlx::Error> {
        let sql = format!("INSERT INTO {table} (id, name) VALUES ($1, $2)");
        query(&sql)
            .bind(id)
            .bind(format!("{table}-{id}"))
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    pub async fn count(&self, table: &str) -> Result<i64, sqlx::Error> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        query_scalar(&sql).fetch_one(self.store.pool()).await
    }

    /// Ids of `table`, ascending.
    pub async fn ids(&self, table: &str) -> Result<Vec<i64>, sqlx::Error> {
        let sql = format!("SELECT id FROM {table} ORDER BY id");
        query_scalar(&sql).fetch_all(self.store.pool()).await
    }

    pub async fn module_state(&self, name: &str) -> Result<Option<String>, sqlx::Error> {
        query_scalar("SELECT state FROM ir_module_module WHERE name = $1")
            .bind(name)
            .fetch_optional(self.store.pool())
            .await
    }
}
