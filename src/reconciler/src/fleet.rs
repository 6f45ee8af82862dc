//! Reconciliation of every database sharing a connection template.
//!
//! Each database gets its own store, connection pool and [`Reconciler`],
//! run on a bounded pool of tokio tasks. A failing store never stops the
//! others; failures are collected per store.

use crate::controller::{Reconciler, RunContext};
use crate::error::{ReconcileError, Result};
use crate::metrics::ReconcileMetrics;
use crate::registry::{ModelRegistry, ModuleCatalog};
use crate::report::{RunReport, exit_code};
use common::config::Configuration;
use common::store::{list_databases, with_database};
use common::{ConfigurationError, Store};
use futures::StreamExt;
use std::sync::Arc;

#[derive(Debug)]
pub struct StoreOutcome {
    pub database: String,
    /// Report of the run, or why the store could not be reconciled
    pub result: std::result::Result<RunReport, String>,
}

impl StoreOutcome {
    pub fn is_failure(&self) -> bool {
        match &self.result {
            Ok(report) => report.exit_code() == exit_code::FAILED,
            Err(_) => true,
        }
    }
}

#[derive(Debug, Default)]
pub struct FleetReport {
    /// One entry per database, ordered by name
    pub outcomes: Vec<StoreOutcome>,
}

impl FleetReport {
    pub fn failed(&self) -> impl Iterator<Item = &StoreOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    /// Any failed store wins, otherwise the worst per-store code.
    pub fn exit_code(&self) -> u8 {
        if self.failed().next().is_some() {
            return exit_code::FAILED;
        }
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(RunReport::exit_code)
            .max()
            .unwrap_or(exit_code::CLEAN)
    }

    pub fn log(&self) {
        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(report) => tracing::info!(
                    database = %outcome.database,
                    clean = report.clean,
                    issues = report.total_issues_found,
                    fixed = report.total_fixed,
                    manual = report.manual_fix_required.len(),
                    "Store reconciled"
                ),
                Err(e) => tracing::error!(database = %outcome.database, "Store failed: {e}"),
            }
        }

        let failed = self.failed().count();
        if failed > 0 {
            tracing::error!(
                stores = self.outcomes.len(),
                failed,
                "Fleet reconciliation finished with failures"
            );
        } else {
            tracing::info!(stores = self.outcomes.len(), "Fleet reconciliation finished");
        }
    }
}

#[derive(Clone)]
pub struct FleetRunner {
    template_dsn: String,
    prefix: String,
    threads: usize,
    max_connections: u32,
    registry: Arc<dyn ModelRegistry>,
    modules: Arc<ModuleCatalog>,
    context: RunContext,
    metrics: ReconcileMetrics,
}

impl FleetRunner {
    pub fn from_config(
        config: &Configuration,
        registry: Arc<dyn ModelRegistry>,
        modules: Arc<ModuleCatalog>,
    ) -> Result<Self> {
        let prefix = config
            .fleet
            .database_prefix
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ConfigurationError("fleet mode requires a database prefix".into()))?;

        Ok(Self {
            template_dsn: config.database.dsn.clone(),
            prefix,
            threads: config.fleet.threads.max(1),
            max_connections: config.database.max_connections,
            registry,
            modules,
            context: RunContext::from_config(config),
            metrics: ReconcileMetrics::new(),
        })
    }

    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Reconcile every database matching the prefix.
    ///
    /// Only listing the databases can fail; per-store failures end up in
    /// the report.
    pub async fn run(&self) -> Result<FleetReport> {
        let databases = list_databases(&self.template_dsn, &self.prefix).await?;
        tracing::info!(
            prefix = %self.prefix,
            databases = databases.len(),
            threads = self.threads,
            "Starting fleet reconciliation"
        );

        let mut outcomes: Vec<StoreOutcome> = futures::stream::iter(databases)
            .map(|database| {
                let runner = self.clone();
                async move {
                    let worker = tokio::spawn({
                        let runner = runner.clone();
                        let database = database.clone();
                        async move { runner.run_store(database).await }
                    });
                    match worker.await {
                        Ok(outcome) => outcome,
                        Err(e) => StoreOutcome {
                            database,
                            result: Err(format!("worker failed: {e}")),
                        },
                    }
                }
            })
            .buffer_unordered(self.threads)
            .collect()
            .await;

        outcomes.sort_by(|a, b| a.database.cmp(&b.database));
        for outcome in &outcomes {
            self.metrics.record_store(outcome.is_failure());
        }
        Ok(FleetReport { outcomes })
    }

    async fn run_store(&self, database: String) -> StoreOutcome {
        tracing::info!(database = %database, "Reconciling store");
        let result = self.reconcile(&database).await.map_err(|e| {
            tracing::error!(database = %database, "Store failed: {e}");
            e.to_string()
        });
        StoreOutcome { database, result }
    }

    async fn reconcile(&self, database: &str) -> std::result::Result<RunReport, ReconcileError> {
        let dsn = with_database(&self.template_dsn, database)?;
        let store = Store::connect(&dsn, self.max_connections).await?;

        let mut reconciler = Reconciler::new(
            store.clone(),
            self.registry.clone(),
            self.modules.clone(),
            self.context.clone(),
        )
        .with_metrics(self.metrics.clone());
        let report = reconciler.run().await;
        report.log();

        store.close().await;
        Ok(report)
    }
}
