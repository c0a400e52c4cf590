// Depot Plugin Repository Backend
// Main entry point for the depot binary

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use depot_engine::catalog::SourceCatalog;
use depot_engine::cli::{Cli, Command};
use depot_engine::compiler::Compiler;
use depot_engine::config::Config;
use depot_engine::downloads::DownloadCounter;
use depot_engine::paths::DataPaths;
use depot_engine::published::PublishedCatalog;
use depot_engine::publisher::Publisher;
use depot_engine::runtimes::RuntimeRegistry;
use depot_engine::scheduler::{CycleGate, Scheduler};
use depot_engine::telemetry::{init_telemetry, init_telemetry_with_level};
use depot_engine::trust::TrustStore;
use depot_engine::vcs::GitSync;
use depot_engine::watch::NotifyChangeSource;

struct Service {
    scheduler: Arc<Scheduler>,
    published: Arc<PublishedCatalog>,
    downloads: Arc<DownloadCounter>,
    runtimes: Arc<RuntimeRegistry>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize basic telemetry first (before config is loaded)
    init_telemetry();

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // Re-initialize telemetry with the CLI/config-driven log level
    // (only takes effect if RUST_LOG env var is not set)
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    tracing::info!("Depot v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run => run_service(config).await,
        Command::Cycle => run_single_cycle(config).await,
    }
}

async fn build_service(config: &Config) -> anyhow::Result<Service> {
    let paths = DataPaths::new(&config.core.data_dir)?;

    let downloads = Arc::new(DownloadCounter::load(paths.download_counts_file()).await);
    let published = Arc::new(PublishedCatalog::new(paths.plugins(), Arc::clone(&downloads)));
    published.reload().await;

    let trust = Arc::new(TrustStore::load(&paths).await);

    let runtimes = Arc::new(RuntimeRegistry::new(
        paths.runtimes(),
        config.runtime_settle_delay(),
    ));
    runtimes.reload().await;

    let compiler = Arc::new(Compiler::new(
        config.toolchain.clone(),
        Arc::clone(&runtimes),
    ));
    let publisher = Arc::new(Publisher::new(
        paths.clone(),
        Arc::clone(&trust),
        Arc::clone(&published),
        config.pipeline.unpublish_retries,
        config.unpublish_retry_delay(),
    ));

    let catalog = Arc::new(SourceCatalog::new(paths.plugin_sources()));
    let vcs = GitSync::new(paths.plugin_sources(), config.vcs.remote.clone());
    vcs.ensure_checkout().await;

    let scheduler = Arc::new(Scheduler::new(catalog, compiler, publisher, vcs));

    Ok(Service {
        scheduler,
        published,
        downloads,
        runtimes,
    })
}

async fn run_service(config: Config) -> anyhow::Result<()> {
    let service = build_service(&config).await?;

    // The change source owns the OS watchers; it must outlive the service.
    let change_source = NotifyChangeSource::new();
    Arc::clone(&service.runtimes).watch(&change_source)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gate = CycleGate::new();

    let scheduler_task = tokio::spawn(Arc::clone(&service.scheduler).run(
        config.cycle_interval(),
        gate.clone(),
        shutdown_rx.clone(),
    ));
    let published_task = tokio::spawn(Arc::clone(&service.published).reload_loop(
        std::time::Duration::from_secs(config.published.reload_interval_secs),
        shutdown_rx.clone(),
    ));
    let downloads_task = tokio::spawn(Arc::clone(&service.downloads).flush_loop(
        std::time::Duration::from_secs(config.downloads.flush_interval_secs),
        shutdown_rx.clone(),
    ));

    // First cycle immediately: the timer only fires after a full period.
    if let Some(_guard) = gate.try_start() {
        service.scheduler.run_cycle(shutdown_rx.clone()).await;
    }

    println!("Depot is running (PID {})", std::process::id());
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    shutdown_tx.send(true).ok();

    let _ = tokio::join!(scheduler_task, published_task, downloads_task);
    Ok(())
}

async fn run_single_cycle(config: Config) -> anyhow::Result<()> {
    let service = build_service(&config).await?;

    let gate = CycleGate::new();
    let _guard = gate.try_start().expect("fresh gate starts open");
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let results = service.scheduler.run_cycle(shutdown_rx).await;
    for result in &results {
        let name = result
            .manifest
            .as_ref()
            .map(|manifest| manifest.name.as_str())
            .unwrap_or("<unknown>");
        if result.success {
            println!("ok   {name} ({})", &result.artifact_hash[..16.min(result.artifact_hash.len())]);
        } else {
            println!("FAIL {name}");
        }
    }
    println!("{} source(s) processed", results.len());

    service.downloads.flush().await;
    Ok(())
}
