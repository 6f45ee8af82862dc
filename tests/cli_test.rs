use common::testing::{FixtureStore, TranslationRow};
use std::path::PathBuf;
use std::process::{Command, Output};

const BIN: &str = env!("CARGO_BIN_EXE_dbreconcile");

fn write_config(fixture: &FixtureStore) -> PathBuf {
    let path = fixture.dir().join("dbreconcile.toml");
    let toml = format!(
        r#"
[database]
dsn = "{}"
max_connections = 2

[registry.models]
"res.partner" = "res_partner"
"#,
        fixture.dsn()
    );
    std::fs::write(&path, toml).unwrap();
    path
}

fn dbreconcile(config: &PathBuf, args: &[&str]) -> Output {
    Command::new(BIN)
        .arg("--config")
        .arg(config)
        .arg("-q")
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

async fn seeded() -> FixtureStore {
    let fixture = FixtureStore::new().await.unwrap();
    for id in [1, 2] {
        fixture
            .translation(TranslationRow::model(id, "de_DE", "base", "res.partner,name", 1, "Partner"))
            .await
            .unwrap();
    }
    fixture
}

#[tokio::test]
async fn test_report_only_then_fix() {
    let fixture = seeded().await;
    let config = write_config(&fixture);

    let output = dbreconcile(&config, &[]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(fixture.ids("ir_translation").await.unwrap(), vec![1, 2]);

    let output = dbreconcile(&config, &["--fix"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(fixture.ids("ir_translation").await.unwrap(), vec![1]);

    let output = dbreconcile(&config, &[]);
    assert_eq!(output.status.code(), Some(0));
}

#[tokio::test]
async fn test_manual_conflict_exit_code() {
    let fixture = FixtureStore::new().await.unwrap();
    fixture
        .translation(TranslationRow::model(1, "de_DE", "crm", "res.partner,name", 1, "Kunde"))
        .await
        .unwrap();
    fixture
        .translation(TranslationRow::model(2, "de_DE", "sale", "res.partner,name", 1, "Partner"))
        .await
        .unwrap();
    let config = write_config(&fixture);

    let output = dbreconcile(&config, &["--fix"]);
    assert_eq!(output.status.code(), Some(2));

    let output = dbreconcile(&config, &["--fix", "--delete-lower"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(fixture.ids("ir_translation").await.unwrap(), vec![2]);
}

#[tokio::test]
async fn test_configuration_errors_exit_before_store_access() {
    let fixture = seeded().await;
    let config = write_config(&fixture);

    let output = dbreconcile(&config, &["--db-all"]);
    assert_eq!(output.status.code(), Some(64));

    let output = dbreconcile(&config, &["--delete", "crm", "--full-delete", "crm"]);
    assert_eq!(output.status.code(), Some(64));

    assert_eq!(fixture.ids("ir_translation").await.unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_database_flag_selects_sibling() {
    let fixture = FixtureStore::new().await.unwrap();
    let tenant = fixture.sibling("tenant_a").await.unwrap();
    for id in [1_i64, 2] {
        sqlx::query(
            "INSERT INTO ir_translation (id, lang, type, name, res_id, module, src, value) \
             VALUES ($1, 'de_DE', 'model', 'x,5', 5, 'm', 'A', 'A')",
        )
        .bind(id)
        .execute(tenant.pool())
        .await
        .unwrap();
    }
    let config = write_config(&fixture);

    let output = dbreconcile(&config, &["--database", "tenant_a", "--fix"]);
    assert_eq!(output.status.code(), Some(0));

    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM ir_translation ORDER BY id")
        .fetch_all(tenant.pool())
        .await
        .unwrap();
    assert_eq!(ids, vec![1]);
}

#[tokio::test]
async fn test_fleet_run() {
    let fixture = FixtureStore::new().await.unwrap();
    fixture.sibling("tenant_a").await.unwrap();
    fixture.sibling("tenant_b").await.unwrap();
    let config = write_config(&fixture);

    let output = dbreconcile(
        &config,
        &["--database-prefix", "tenant_", "--db-all", "--threads", "2"],
    );
    assert_eq!(output.status.code(), Some(0));
}

#[tokio::test]
async fn test_config_subcommands() {
    let fixture = seeded().await;
    let config = write_config(&fixture);

    let output = dbreconcile(&config, &["validate"]);
    assert_eq!(output.status.code(), Some(0));

    let output = dbreconcile(&config, &["config", "--json"]);
    assert_eq!(output.status.code(), Some(0));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["registry"]["models"]["res.partner"], "res_partner");
    assert_eq!(json["reconcile"]["tie_break"], "manual");
}
