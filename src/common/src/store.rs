use sqlx::AnyConnection;
use sqlx::any::AnyPoolOptions;
use sqlx::{Any, AnyPool, Transaction, query_scalar};
use std::path::{Path, PathBuf};

/// SQL flavour of the target store. Only catalog introspection differs, the
/// metadata queries themselves are portable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn from_dsn(dsn: &str) -> Self {
        if dsn.starts_with("sqlite:") {
            Dialect::Sqlite
        } else {
            Dialect::Postgres
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Invalid DSN '{dsn}': {message}")]
    InvalidDsn { dsn: String, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection pool to one reconciled database.
#[derive(Clone, Debug)]
pub struct Store {
    pool: AnyPool,
    dialect: Dialect,
    dsn: String,
}

impl Store {
    /// Connect to the store behind `dsn` (PostgreSQL or SQLite).
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();

        let dialect = Dialect::from_dsn(dsn);
        let dsn = match dialect {
            Dialect::Sqlite if !dsn.contains("mode=") && !dsn.contains(":memory:") => {
                if dsn.contains('?') {
                    format!("{dsn}&mode=rwc")
                } else {
                    format!("{dsn}?mode=rwc")
                }
            }
            _ => dsn.to_string(),
        };

        log::info!("Connecting to {dialect:?} store");
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(&dsn)
            .await
            .map_err(|e| {
                log::error!("Failed to connect to store '{}': {e}", redact(&dsn));
                e
            })?;
        log::info!("Store connection established successfully");

        Ok(Self { pool, dialect, dsn })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Open a transaction on a dedicated pooled connection.
    pub async fn begin(&self) -> Result<Transaction<'static, Any>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Whether `name` may be interpolated into SQL as a table identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check that a table is physically present in the connected database.
pub async fn table_exists(
    conn: &mut AnyConnection,
    dialect: Dialect,
    table: &str,
) -> Result<bool, sqlx::Error> {
    let sql = match dialect {
        Dialect::Postgres => {
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name::text = $1"
        }
        Dialect::Sqlite => "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = $1",
    };
    let count: i64 = query_scalar(sql).bind(table).fetch_one(conn).await?;
    Ok(count > 0)
}

/// Derive the DSN of database `name` from a connection-parameter template.
pub fn with_database(template: &str, name: &str) -> Result<String, StoreError> {
    match Dialect::from_dsn(template) {
        Dialect::Sqlite => {
            let (path, params) = split_sqlite_dsn(template);
            let file = sqlite_directory(&path).join(format!("{name}.db"));
            let mut dsn = format!("sqlite://{}", file.display());
            if let Some(params) = params {
                dsn.push('?');
                dsn.push_str(params);
            }
            Ok(dsn)
        }
        Dialect::Postgres => {
            let mut url = url::Url::parse(template).map_err(|e| StoreError::InvalidDsn {
                dsn: redact(template),
                message: e.to_string(),
            })?;
            url.set_path(&format!("/{name}"));
            Ok(url.to_string())
        }
    }
}

/// List database names starting with `prefix`, reachable with the template's
/// connection parameters.
pub async fn list_databases(template: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
    let mut names = match Dialect::from_dsn(template) {
        Dialect::Sqlite => {
            let (path, _) = split_sqlite_dsn(template);
            let mut names = Vec::new();
            let mut entries = tokio::fs::read_dir(sqlite_directory(&path)).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("db") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
            names
        }
        Dialect::Postgres => {
            let store = Store::connect(template, 1).await?;
            let rows: Vec<String> = query_scalar(
                "SELECT datname::text FROM pg_database WHERE datistemplate = false ORDER BY datname",
            )
            .fetch_all(store.pool())
            .await?;
            store.close().await;
            rows
        }
    };

    names.retain(|n| n.starts_with(prefix));
    names.sort();
    Ok(names)
}

fn split_sqlite_dsn(dsn: &str) -> (PathBuf, Option<&str>) {
    let rest = dsn.trim_start_matches("sqlite:");
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    match rest.split_once('?') {
        Some((path, params)) => (PathBuf::from(path), Some(params)),
        None => (PathBuf::from(rest), None),
    }
}

fn sqlite_directory(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Strip the password component before a DSN reaches a log line.
pub fn redact(dsn: &str) -> String {
    match url::Url::parse(dsn) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        _ => dsn.to_string(),
    }
}
