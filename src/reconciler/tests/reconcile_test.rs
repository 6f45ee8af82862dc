use common::TieBreak;
use common::config::Configuration;
use common::testing::{FixtureStore, TestConfigBuilder, TranslationRow};
use reconciler::{
    Category, CategoryStatus, IssueClass, ModuleCatalog, Reconciler, RunContext, RunReport,
    RunState, StaticRegistry, exit_code,
};
use std::sync::Arc;

async fn run(fixture: &FixtureStore, config: &Configuration) -> RunReport {
    let registry = StaticRegistry::from_config(&config.registry).unwrap();
    let modules = ModuleCatalog::from_config(&config.modules);
    let mut reconciler = Reconciler::new(
        fixture.store().clone(),
        Arc::new(registry),
        Arc::new(modules),
        RunContext::from_config(config),
    );
    let report = reconciler.run().await;
    assert_eq!(reconciler.state(), report.state);
    report
}

/// Live res.partner model with rows 1 and 2 and one valid binding.
async fn partner_store() -> FixtureStore {
    let fixture = FixtureStore::new().await.unwrap();
    fixture.business_table("res_partner").await.unwrap();
    fixture.business_row("res_partner", 1).await.unwrap();
    fixture.business_row("res_partner", 2).await.unwrap();
    fixture.model(1, "res.partner").await.unwrap();
    fixture.field(1, 1, "name").await.unwrap();
    fixture.binding(1, "base", "res.partner", 1, "partner_1").await.unwrap();
    fixture
}

/// Stale report.x model with every kind of dependent row.
async fn seed_report_x(fixture: &FixtureStore) {
    fixture.model(7, "report.x").await.unwrap();
    fixture.field(2, 7, "x_a").await.unwrap();
    fixture.field(3, 7, "x_b").await.unwrap();
    fixture.constraint(1, 7, "report_x_unique").await.unwrap();
    fixture.access(1, 7, "access_report_x").await.unwrap();
    fixture.relation(1, 7, "report_x_partner_rel").await.unwrap();
    fixture.binding(2, "old", "report.x", 4, "report_x_4").await.unwrap();
    fixture.binding(3, "old", "ir.model", 7, "model_report_x").await.unwrap();
    fixture
        .translation(TranslationRow::model(1, "de_DE", "old", "report.x,name", 4, "Bericht"))
        .await
        .unwrap();
    fixture
        .translation(TranslationRow::field(2, "de_DE", "old", "report.x,x_a", "Feld A"))
        .await
        .unwrap();
    fixture
        .translation(TranslationRow::model(3, "de_DE", "base", "ir.model,name", 7, "Bericht X"))
        .await
        .unwrap();
}

fn config(fixture: &FixtureStore) -> TestConfigBuilder {
    TestConfigBuilder::new()
        .with_database_dsn(fixture.dsn())
        .with_model("res.partner", "res_partner")
}

#[tokio::test]
async fn test_identical_duplicates_keep_lowest_id() {
    let fixture = FixtureStore::new().await.unwrap();
    for id in [1, 2] {
        fixture
            .translation(TranslationRow::model(id, "de", "m", "x,5", 5, "A"))
            .await
            .unwrap();
    }

    let report = run(&fixture, &config(&fixture).fix().build()).await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.total_issues_found, 1);
    assert_eq!(report.total_fixed, 1);
    assert!(report.clean);
    assert_eq!(report.exit_code(), exit_code::CLEAN);
    assert_eq!(fixture.ids("ir_translation").await.unwrap(), vec![1]);
}

#[tokio::test]
async fn test_report_only_changes_nothing() {
    let fixture = FixtureStore::new().await.unwrap();
    for id in [1, 2] {
        fixture
            .translation(TranslationRow::model(id, "de", "m", "x,5", 5, "A"))
            .await
            .unwrap();
    }

    let report = run(&fixture, &config(&fixture).build()).await;

    assert!(!report.clean);
    assert_eq!(report.total_issues_found, 1);
    assert_eq!(report.total_fixed, 0);
    assert_eq!(report.rows_deleted, 0);
    assert_eq!(report.categories[0].status, CategoryStatus::RolledBack);
    assert_eq!(report.exit_code(), exit_code::CLEANUP_NECESSARY);
    assert_eq!(fixture.ids("ir_translation").await.unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_tie_break_selects_survivor() {
    for (tie_break, survivor) in [(TieBreak::KeepLowestId, 1), (TieBreak::KeepHighestId, 2)] {
        let fixture = FixtureStore::new().await.unwrap();
        fixture
            .translation(TranslationRow::model(1, "de_DE", "crm", "res.partner,name", 1, "Kunde"))
            .await
            .unwrap();
        fixture
            .translation(TranslationRow::model(2, "de_DE", "sale", "res.partner,name", 1, "Partner"))
            .await
            .unwrap();
        fixture
            .translation(TranslationRow::model(3, "fr_FR", "crm", "res.partner,name", 1, "Client"))
            .await
            .unwrap();

        let config = config(&fixture).with_tie_break(tie_break).fix().build();
        let report = run(&fixture, &config).await;

        assert!(report.clean, "{tie_break}");
        assert_eq!(
            fixture.ids("ir_translation").await.unwrap(),
            vec![survivor, 3],
            "{tie_break}"
        );
    }
}

#[tokio::test]
async fn test_conflict_without_tie_break_needs_manual_fix() {
    let fixture = FixtureStore::new().await.unwrap();
    fixture
        .translation(TranslationRow::model(1, "de_DE", "crm", "res.partner,name", 1, "Kunde"))
        .await
        .unwrap();
    fixture
        .translation(TranslationRow::model(2, "de_DE", "sale", "res.partner,name", 1, "Partner"))
        .await
        .unwrap();

    let report = run(&fixture, &config(&fixture).fix().build()).await;

    assert!(!report.clean);
    assert_eq!(report.manual_fix_required.len(), 1);
    assert_eq!(report.manual_fix_required[0].class, IssueClass::ManualFixRequired);
    assert_eq!(report.manual_fix_required[0].row_id, 2);
    assert_eq!(report.exit_code(), exit_code::MANUAL_FIX_REQUIRED);
    assert_eq!(fixture.ids("ir_translation").await.unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_view_duplicates_keep_lowest_id() {
    let fixture = FixtureStore::new().await.unwrap();
    for id in [4, 9, 6] {
        fixture
            .translation(TranslationRow::view(id, "de_DE", "web", "web.layout", "Save", "Speichern"))
            .await
            .unwrap();
    }
    fixture
        .translation(TranslationRow::view(5, "de_DE", "web", "web.layout", "Discard", "Verwerfen"))
        .await
        .unwrap();

    let report = run(&fixture, &config(&fixture).fix().build()).await;

    assert_eq!(report.rows_deleted, 2);
    assert_eq!(fixture.ids("ir_translation").await.unwrap(), vec![4, 5]);
}

#[tokio::test]
async fn test_bindings_of_non_live_model_are_removed() {
    let fixture = partner_store().await;
    fixture.binding(2, "old", "report.x", 3, "report_x_3").await.unwrap();
    fixture.binding(3, "old", "report.x", 4, "report_x_4").await.unwrap();
    fixture.binding(4, "base", "res.partner", 9, "partner_9").await.unwrap();

    let report = run(&fixture, &config(&fixture).full().build()).await;

    let orphans: Vec<_> = report
        .issues
        .iter()
        .filter(|i| i.category == Category::Orphans)
        .collect();
    assert_eq!(orphans.len(), 3);
    assert!(orphans[0].message.contains("model not live"));
    assert!(orphans[2].message.contains("record missing"));
    assert_eq!(report.exit_code(), exit_code::CLEANUP_NECESSARY);
    assert_eq!(fixture.count("ir_model_data").await.unwrap(), 4);

    let report = run(&fixture, &config(&fixture).full().fix().build()).await;

    assert!(report.clean);
    assert_eq!(report.rows_deleted, 3);
    assert_eq!(fixture.ids("ir_model_data").await.unwrap(), vec![1]);
}

#[tokio::test]
async fn test_orphaned_translations_are_removed() {
    let fixture = partner_store().await;
    fixture
        .translation(TranslationRow::model(1, "de_DE", "base", "res.partner,name", 1, "Partner"))
        .await
        .unwrap();
    fixture
        .translation(TranslationRow::model(2, "de_DE", "base", "res.partner,name", 8, "Weg"))
        .await
        .unwrap();

    let report = run(&fixture, &config(&fixture).full().fix().build()).await;

    assert!(report.clean);
    assert_eq!(fixture.ids("ir_translation").await.unwrap(), vec![1]);
}

#[tokio::test]
async fn test_translations_of_unregistered_model_are_removed() {
    let fixture = partner_store().await;
    fixture
        .translation(TranslationRow::model(1, "de_DE", "old", "gone.model,name", 3, "Weg"))
        .await
        .unwrap();
    fixture
        .translation(TranslationRow::model(2, "de_DE", "base", "res.partner,name", 1, "Partner"))
        .await
        .unwrap();

    let report = run(&fixture, &config(&fixture).full().build()).await;
    assert_eq!(report.total_issues_found, 1);
    assert_eq!(report.issues[0].category, Category::Orphans);
    assert!(report.issues[0].message.contains("model not live"));

    let report = run(&fixture, &config(&fixture).full().fix().build()).await;

    assert!(report.clean);
    assert_eq!(report.rows_deleted, 1);
    assert_eq!(fixture.ids("ir_translation").await.unwrap(), vec![2]);
}

#[tokio::test]
async fn test_row_in_two_categories_is_counted_once() {
    let fixture = partner_store().await;
    for id in [1, 2] {
        fixture
            .translation(TranslationRow::model(id, "de_DE", "base", "res.partner,name", 9, "Weg"))
            .await
            .unwrap();
    }

    let report = run(&fixture, &config(&fixture).full().build()).await;

    // both orphaned, and 2 also duplicates 1
    assert_eq!(report.issues.len(), 3);
    assert_eq!(report.total_issues_found, 2);

    let report = run(&fixture, &config(&fixture).full().fix().build()).await;

    assert!(report.clean);
    assert_eq!(report.total_issues_found, 2);
    assert_eq!(report.rows_deleted, 2);
    assert_eq!(fixture.count("ir_translation").await.unwrap(), 0);
}

#[tokio::test]
async fn test_fix_is_idempotent() {
    let fixture = partner_store().await;
    seed_report_x(&fixture).await;
    fixture.binding(4, "base", "res.partner", 9, "partner_9").await.unwrap();
    for id in [10, 11] {
        fixture
            .translation(TranslationRow::model(id, "nl_NL", "base", "res.partner,name", 2, "Relatie"))
            .await
            .unwrap();
    }

    let config = config(&fixture).full().fix().build();
    let first = run(&fixture, &config).await;
    assert!(first.clean);
    assert!(first.rows_deleted > 0);

    let second = run(&fixture, &config).await;
    assert!(second.clean);
    assert_eq!(second.total_issues_found, 0);
    assert_eq!(second.rows_deleted, 0);
    assert_eq!(second.exit_code(), exit_code::CLEAN);
    assert!(
        second
            .categories
            .iter()
            .all(|c| c.status == CategoryStatus::Clean)
    );
}

#[tokio::test]
async fn test_unused_model_is_deleted_with_dependents() {
    let fixture = partner_store().await;
    seed_report_x(&fixture).await;
    fixture.binding(10, "old", "ir.model.access", 1, "access_report_x").await.unwrap();
    fixture.binding(11, "old", "ir.model.fields", 2, "field_report_x_a").await.unwrap();
    fixture.binding(12, "base", "ir.model.fields", 1, "field_res_partner_name").await.unwrap();

    let report = run(&fixture, &config(&fixture).only_models().build()).await;
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].category, Category::UnusedModels);
    assert!(report.issues[0].message.contains("report.x,7"));
    assert_eq!(fixture.count("ir_model").await.unwrap(), 2);

    let report = run(&fixture, &config(&fixture).only_models().fix().build()).await;

    assert!(report.clean);
    // 2 fields, constraint, access rule, relation, 4 bindings, 3 translations, model
    assert_eq!(report.rows_deleted, 13);
    assert_eq!(fixture.ids("ir_model").await.unwrap(), vec![1]);
    assert_eq!(fixture.ids("ir_model_fields").await.unwrap(), vec![1]);
    assert_eq!(fixture.ids("ir_model_data").await.unwrap(), vec![1, 12]);
    for table in [
        "ir_model_constraint",
        "ir_model_access",
        "ir_model_relation",
        "ir_translation",
    ] {
        assert_eq!(fixture.count(table).await.unwrap(), 0, "{table}");
    }
}

#[tokio::test]
async fn test_module_full_delete_removes_bound_rows() {
    let fixture = partner_store().await;
    fixture.business_table("crm_lead").await.unwrap();
    fixture.business_row("crm_lead", 1).await.unwrap();
    fixture.business_row("crm_lead", 2).await.unwrap();
    fixture.module(1, "base", "installed").await.unwrap();
    fixture.module(2, "crm", "installed").await.unwrap();
    fixture.dependency(1, 2, "base").await.unwrap();
    fixture.binding(2, "crm", "crm.lead", 1, "lead_1").await.unwrap();
    fixture.binding(3, "crm", "crm.lead", 2, "lead_2").await.unwrap();
    fixture.binding(4, "base", "ir.module.module", 2, "module_crm").await.unwrap();

    let config = config(&fixture)
        .with_model("crm.lead", "crm_lead")
        .with_full_delete("crm")
        .full()
        .fix()
        .build();
    let report = run(&fixture, &config).await;

    assert!(report.clean);
    // 2 leads, 2 bindings, dependency, module, self binding
    assert_eq!(report.rows_deleted, 7);
    assert_eq!(fixture.count("crm_lead").await.unwrap(), 0);
    assert_eq!(fixture.ids("ir_model_data").await.unwrap(), vec![1]);
    assert_eq!(fixture.ids("ir_module_module").await.unwrap(), vec![1]);
    assert_eq!(fixture.count("ir_module_module_dependency").await.unwrap(), 0);
    assert_eq!(fixture.count("res_partner").await.unwrap(), 2);
}

#[tokio::test]
async fn test_module_partial_delete_keeps_bound_rows() {
    let fixture = partner_store().await;
    fixture.business_table("crm_lead").await.unwrap();
    fixture.business_row("crm_lead", 1).await.unwrap();
    fixture.module(1, "base", "installed").await.unwrap();
    fixture.module(2, "crm", "installed").await.unwrap();
    fixture.binding(2, "crm", "crm.lead", 1, "lead_1").await.unwrap();
    fixture.binding(3, "base", "ir.module.module", 2, "module_crm").await.unwrap();

    let config = config(&fixture)
        .with_model("crm.lead", "crm_lead")
        .with_delete("crm")
        .full()
        .fix()
        .build();
    let report = run(&fixture, &config).await;

    assert!(report.clean);
    assert_eq!(fixture.count("crm_lead").await.unwrap(), 1);
    assert_eq!(fixture.ids("ir_model_data").await.unwrap(), vec![1, 2]);
    assert_eq!(fixture.ids("ir_module_module").await.unwrap(), vec![1]);
}

#[tokio::test]
async fn test_module_without_owner_needs_manual_fix() {
    let fixture = partner_store().await;
    let addons = tempfile::tempdir().unwrap();
    std::fs::create_dir(addons.path().join("base")).unwrap();
    std::fs::write(addons.path().join("base").join("__manifest__.py"), "{}").unwrap();

    fixture.module(1, "base", "installed").await.unwrap();
    fixture.module(2, "crm", "installed").await.unwrap();
    fixture.module(3, "enterprise_theme", "uninstalled").await.unwrap();

    let config = config(&fixture)
        .with_addons_path(&addons.path().display().to_string())
        .with_protected_module("enterprise_theme")
        .full()
        .fix()
        .build();
    let report = run(&fixture, &config).await;

    assert_eq!(report.exit_code(), exit_code::MANUAL_FIX_REQUIRED);
    assert_eq!(report.manual_fix_required.len(), 1);
    assert_eq!(report.manual_fix_required[0].row_id, 2);
    assert_eq!(
        fixture.module_state("crm").await.unwrap().as_deref(),
        Some("installed")
    );
    assert_eq!(fixture.ids("ir_module_module").await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_schema_inconsistency_aborts_run() {
    let fixture = partner_store().await;
    fixture.model(7, "report.x").await.unwrap();
    fixture.binding(2, "sale", "sale.order", 3, "order_3").await.unwrap();

    let config = config(&fixture)
        .with_model("sale.order", "sale_order")
        .full()
        .fix()
        .build();
    let report = run(&fixture, &config).await;

    assert_eq!(report.state, RunState::Aborted);
    assert!(!report.clean);
    assert!(report.aborted.as_deref().unwrap_or_default().contains("sale_order"));
    assert_eq!(report.exit_code(), exit_code::FAILED);
    assert_eq!(fixture.ids("ir_model").await.unwrap(), vec![1, 7]);
}

#[tokio::test]
async fn test_failed_category_does_not_undo_others() {
    let fixture = partner_store().await;
    fixture.module(1, "base", "installed").await.unwrap();
    fixture.module(2, "crm", "installed").await.unwrap();
    sqlx::query("DROP TABLE ir_translation")
        .execute(fixture.store().pool())
        .await
        .unwrap();

    let config = config(&fixture).with_delete("crm").full().fix().build();
    let report = run(&fixture, &config).await;

    let status = |category: Category| {
        report
            .categories
            .iter()
            .find(|c| c.category == category)
            .map(|c| c.status)
    };
    assert_eq!(status(Category::UnusedModules), Some(CategoryStatus::Committed));
    assert_eq!(status(Category::Orphans), Some(CategoryStatus::Failed));
    assert_eq!(status(Category::Duplicates), Some(CategoryStatus::Failed));
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.exit_code(), exit_code::FAILED);
    assert_eq!(fixture.ids("ir_module_module").await.unwrap(), vec![1]);
}
