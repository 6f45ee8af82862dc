use common::Store;
use common::testing::{FixtureStore, TestConfigBuilder};
use reconciler::{FleetRunner, ModuleCatalog, ReconcileMetrics, StaticRegistry, exit_code};
use std::sync::Arc;

async fn duplicate_translations(store: &Store) {
    for id in [1_i64, 2] {
        sqlx::query(
            "INSERT INTO ir_translation (id, lang, type, name, res_id, module, src, value) \
             VALUES ($1, 'de_DE', 'model', 'x,5', 5, 'm', 'A', 'A')",
        )
        .bind(id)
        .execute(store.pool())
        .await
        .unwrap();
    }
}

async fn translation_ids(store: &Store) -> Vec<i64> {
    sqlx::query_scalar("SELECT id FROM ir_translation ORDER BY id")
        .fetch_all(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_failed_store_does_not_stop_the_fleet() {
    let fixture = FixtureStore::new().await.unwrap();
    let tenant_a = fixture.sibling("tenant_a").await.unwrap();
    let tenant_b = fixture.sibling("tenant_b").await.unwrap();
    let tenant_c = fixture.sibling("tenant_c").await.unwrap();
    let archive = fixture.sibling("archive").await.unwrap();
    for store in [&tenant_a, &tenant_b, &tenant_c, &archive] {
        duplicate_translations(store).await;
    }
    sqlx::query("DROP TABLE ir_translation")
        .execute(tenant_b.pool())
        .await
        .unwrap();

    let config = TestConfigBuilder::new()
        .with_database_dsn(fixture.dsn())
        .with_fleet("tenant_", 2)
        .fix()
        .build();
    let metrics = ReconcileMetrics::new();
    let runner = FleetRunner::from_config(
        &config,
        Arc::new(StaticRegistry::from_config(&config.registry).unwrap()),
        Arc::new(ModuleCatalog::from_config(&config.modules)),
    )
    .unwrap()
    .with_metrics(metrics.clone());

    let report = runner.run().await.unwrap();

    let databases: Vec<&str> = report.outcomes.iter().map(|o| o.database.as_str()).collect();
    assert_eq!(databases, vec!["tenant_a", "tenant_b", "tenant_c"]);

    let failed: Vec<&str> = report.failed().map(|o| o.database.as_str()).collect();
    assert_eq!(failed, vec!["tenant_b"]);
    assert_eq!(report.exit_code(), exit_code::FAILED);

    assert_eq!(translation_ids(&tenant_a).await, vec![1]);
    assert_eq!(translation_ids(&tenant_c).await, vec![1]);
    assert_eq!(translation_ids(&archive).await, vec![1, 2]);

    assert_eq!(metrics.stores_processed(), 3);
    assert_eq!(metrics.stores_failed(), 1);
}

#[tokio::test]
async fn test_clean_fleet() {
    let fixture = FixtureStore::new().await.unwrap();
    fixture.sibling("tenant_a").await.unwrap();
    fixture.sibling("tenant_b").await.unwrap();

    let config = TestConfigBuilder::new()
        .with_database_dsn(fixture.dsn())
        .with_fleet("tenant_", 4)
        .build();
    let runner = FleetRunner::from_config(
        &config,
        Arc::new(StaticRegistry::new()),
        Arc::new(ModuleCatalog::default()),
    )
    .unwrap();

    let report = runner.run().await.unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.failed().count(), 0);
    assert_eq!(report.exit_code(), exit_code::CLEAN);
}
