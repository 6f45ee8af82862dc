use anyhow::{Context, Result};
use clap::{Args, Parser};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::{Configuration, split_module_list};
use common::store::with_database;
use common::{Store, TieBreak};
use reconciler::registry::META_MODELS;
use reconciler::{
    FleetRunner, ModelRegistry, ModuleCatalog, ReconcileMetrics, Reconciler, RunContext,
    StaticRegistry, exit_code,
};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dbreconcile")]
#[command(about = "Detects and repairs metadata left behind by removed models and modules")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<CommonCommands>,
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    #[arg(long, help = "Database name, replaces the database of the configured DSN")]
    database: Option<String>,

    #[arg(long, help = "Commit repairs instead of rolling them back")]
    fix: bool,

    #[arg(long, help = "Run every cleanup category, not only duplicate translations")]
    full: bool,

    #[arg(long, value_name = "MODULES", help = "Modules to delete with their bound data rows")]
    full_delete: Option<String>,

    #[arg(long, value_name = "MODULES", help = "Modules to delete, keeping bound data rows")]
    delete: Option<String>,

    #[arg(
        long,
        conflicts_with = "delete_higher",
        help = "Resolve conflicting translations by deleting the lower id"
    )]
    delete_lower: bool,

    #[arg(long, help = "Resolve conflicting translations by deleting the higher id")]
    delete_higher: bool,

    #[arg(long, help = "Only remove models the registry no longer loads")]
    only_models: bool,

    #[arg(long, value_name = "PREFIX", help = "Database name prefix for fleet mode")]
    database_prefix: Option<String>,

    #[arg(long, help = "Reconcile every database matching the prefix")]
    db_all: bool,

    #[arg(long, help = "Number of databases reconciled concurrently in fleet mode")]
    threads: Option<usize>,
}

impl RunArgs {
    /// Command line flags win over the configuration file and environment.
    fn apply(&self, config: &mut Configuration) -> Result<()> {
        if let Some(database) = &self.database {
            config.database.dsn = with_database(&config.database.dsn, database)
                .with_context(|| format!("Invalid database name '{database}'"))?;
        }

        let reconcile = &mut config.reconcile;
        reconcile.fix |= self.fix;
        reconcile.full |= self.full;
        reconcile.only_models |= self.only_models;
        if let Some(modules) = &self.full_delete {
            reconcile.full_delete.extend(split_module_list(modules));
        }
        if let Some(modules) = &self.delete {
            reconcile.delete.extend(split_module_list(modules));
        }
        if self.delete_lower {
            reconcile.tie_break = TieBreak::KeepHighestId;
        } else if self.delete_higher {
            reconcile.tie_break = TieBreak::KeepLowestId;
        }

        if let Some(prefix) = &self.database_prefix {
            config.fleet.database_prefix = Some(prefix.clone());
        }
        config.fleet.all |= self.db_all;
        if let Some(threads) = self.threads {
            config.fleet.threads = threads;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging based on CLI arguments
    utils::init_logging(&cli.common);

    let config = match utils::load_config(cli.common.config.as_ref())
        .and_then(|mut config| cli.run.apply(&mut config).map(|_| config))
    {
        Ok(config) => config,
        Err(e) => return Ok(configuration_error(e)),
    };

    // Handle commands that don't touch a store
    let command = cli.command.clone().unwrap_or_default();
    match utils::handle_common_command(&command, &config) {
        Ok(true) => return Ok(ExitCode::SUCCESS),
        Ok(false) => {}
        Err(e) => return Ok(configuration_error(e)),
    }

    if let Err(e) = config.validate() {
        return Ok(configuration_error(e.into()));
    }

    let registry = match StaticRegistry::from_config(&config.registry) {
        Ok(registry) => registry,
        Err(e) => return Ok(configuration_error(e.into())),
    };
    if let Err(e) = guard_empty_registry(&config, &registry) {
        return Ok(configuration_error(e));
    }
    log::info!("Model registry holds {} live models", registry.len());

    let registry: Arc<dyn ModelRegistry> = Arc::new(registry);
    let modules = Arc::new(ModuleCatalog::from_config(&config.modules));
    let metrics = ReconcileMetrics::new();

    let code = if config.fleet.all {
        run_fleet(&config, registry, modules, metrics.clone()).await
    } else {
        run_single(&config, registry, modules, metrics.clone()).await
    };

    metrics.summary().log();
    Ok(ExitCode::from(code))
}

async fn run_single(
    config: &Configuration,
    registry: Arc<dyn ModelRegistry>,
    modules: Arc<ModuleCatalog>,
    metrics: ReconcileMetrics,
) -> u8 {
    let store = match Store::connect(&config.database.dsn, config.database.max_connections).await {
        Ok(store) => store,
        Err(e) => {
            log::error!("Failed to connect to store: {e}");
            return exit_code::FAILED;
        }
    };

    let mut reconciler = Reconciler::new(
        store.clone(),
        registry,
        modules,
        RunContext::from_config(config),
    )
    .with_metrics(metrics);
    let report = reconciler.run().await;
    report.log();
    store.close().await;

    report.exit_code()
}

async fn run_fleet(
    config: &Configuration,
    registry: Arc<dyn ModelRegistry>,
    modules: Arc<ModuleCatalog>,
    metrics: ReconcileMetrics,
) -> u8 {
    let runner = match FleetRunner::from_config(config, registry, modules) {
        Ok(runner) => runner.with_metrics(metrics),
        Err(e) => {
            log::error!("{e}");
            return exit_code::CONFIGURATION_ERROR;
        }
    };

    match runner.run().await {
        Ok(report) => {
            report.log();
            report.exit_code()
        }
        Err(e) => {
            log::error!("Fleet reconciliation failed: {e}");
            exit_code::FAILED
        }
    }
}

/// Deleting models or orphans against a registry that lists no application
/// model would wipe the store's metadata.
fn guard_empty_registry(config: &Configuration, registry: &StaticRegistry) -> Result<()> {
    let removes_models = config.reconcile.full || config.reconcile.only_models;
    if config.reconcile.fix && removes_models && registry.len() <= META_MODELS.len() {
        anyhow::bail!(
            "refusing to fix with a registry that lists no application models; \
             configure registry.models or registry.snapshot_path"
        );
    }
    Ok(())
}

fn configuration_error(error: anyhow::Error) -> ExitCode {
    log::error!("{error:#}");
    ExitCode::from(exit_code::CONFIGURATION_ERROR)
}
