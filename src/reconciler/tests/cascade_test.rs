use common::testing::{FixtureStore, TranslationRow};
use reconciler::model::{ModelDefinition, ModuleRecord, ModuleState};
use reconciler::{CascadeDeleter, DeletionStep, StaticRegistry};
use std::sync::Arc;

#[tokio::test]
async fn test_delete_model_counts_every_dependent() {
    let fixture = FixtureStore::new().await.unwrap();
    fixture.model(1, "res.partner").await.unwrap();
    fixture.model(7, "report.x").await.unwrap();
    fixture.field(1, 1, "name").await.unwrap();
    for id in 2..=4 {
        fixture.field(id, 7, &format!("x_{id}")).await.unwrap();
    }
    fixture.constraint(1, 7, "report_x_unique").await.unwrap();
    fixture.constraint(2, 7, "report_x_check").await.unwrap();
    fixture.access(1, 7, "access_report_x").await.unwrap();
    fixture.relation(1, 1, "res_partner_rel").await.unwrap();
    fixture.binding(1, "old", "report.x", 4, "report_x_4").await.unwrap();
    fixture.binding(2, "old", "ir.model", 7, "model_report_x").await.unwrap();
    fixture.binding(3, "base", "ir.model", 1, "model_res_partner").await.unwrap();
    fixture.binding(4, "old", "ir.model.fields", 2, "field_report_x_2").await.unwrap();
    fixture.binding(5, "old", "ir.model.access", 1, "access_report_x").await.unwrap();
    fixture.binding(6, "base", "ir.model.fields", 1, "field_res_partner_name").await.unwrap();
    fixture
        .translation(TranslationRow::field(1, "de_DE", "old", "report.x,x_2", "Feld"))
        .await
        .unwrap();
    fixture
        .translation(TranslationRow::model(2, "de_DE", "base", "res.partner,name", 1, "Partner"))
        .await
        .unwrap();
    fixture
        .translation(TranslationRow::model(3, "de_DE", "old", "report.xyz,name", 1, "Andere"))
        .await
        .unwrap();

    let mut deleter = CascadeDeleter::new(
        Arc::new(StaticRegistry::new().with_model("res.partner", "res_partner")),
        fixture.store().dialect(),
        true,
    );
    let mut tx = fixture.store().begin().await.unwrap();
    let outcome = deleter
        .delete_model(
            &mut tx,
            ModelDefinition {
                id: 7,
                model: "report.x".to_string(),
            },
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // N=3, C=2, A=1, R=0, D=2, T=1, the model row, plus the field and
    // access rule bindings
    assert_eq!(outcome.total_deleted(), 12);
    assert_eq!(outcome.rows(DeletionStep::Fields), 4);
    assert_eq!(outcome.rows(DeletionStep::AccessRules), 2);
    assert_eq!(outcome.rows(DeletionStep::Constraints), 2);
    assert_eq!(outcome.rows(DeletionStep::Relations), 0);
    assert_eq!(outcome.rows(DeletionStep::Bindings), 2);
    assert_eq!(outcome.rows(DeletionStep::Translations), 1);
    assert_eq!(outcome.rows(DeletionStep::ModelRow), 1);

    assert_eq!(fixture.ids("ir_model").await.unwrap(), vec![1]);
    assert_eq!(fixture.ids("ir_model_fields").await.unwrap(), vec![1]);
    assert_eq!(fixture.ids("ir_model_relation").await.unwrap(), vec![1]);
    assert_eq!(fixture.ids("ir_model_data").await.unwrap(), vec![3, 6]);
    assert_eq!(fixture.ids("ir_translation").await.unwrap(), vec![2, 3]);
}

#[tokio::test]
async fn test_rolled_back_cascade_leaves_rows() {
    let fixture = FixtureStore::new().await.unwrap();
    fixture.module(2, "crm", "installed").await.unwrap();
    fixture.dependency(1, 2, "base").await.unwrap();

    let mut deleter = CascadeDeleter::new(
        Arc::new(StaticRegistry::new()),
        fixture.store().dialect(),
        false,
    );
    let mut tx = fixture.store().begin().await.unwrap();
    let outcome = deleter
        .delete_module(
            &mut tx,
            ModuleRecord {
                id: 2,
                name: "crm".to_string(),
                state: ModuleState::Installed,
            },
            false,
        )
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(outcome.rows(DeletionStep::MarkUninstalled), 1);
    assert_eq!(outcome.total_deleted(), 2);
    assert_eq!(
        fixture.module_state("crm").await.unwrap().as_deref(),
        Some("installed")
    );
    assert_eq!(fixture.count("ir_module_module_dependency").await.unwrap(), 1);
}
