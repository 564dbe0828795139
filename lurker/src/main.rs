use anyhow::{Context, Result};
use lurker::{CliOptions, Settings, command_argument_builder, print_banner, telemetry};
use lurker_core::classify::Classifier;
use lurker_core::precheck::Prechecker;
use lurker_core::scrape::PageScraper;
use lurker_core::stats::{DiscoveryStats, RunSummary, ScrapeStats};
use lurker_core::{BatchScheduler, DiscoveryWalker, SeenSet, SqliteStore, TargetStore};
use lurker_scanner::{Fetcher, HandlePool, HealthSweep, IpRotator, ProvisioningClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let matches = command_argument_builder().get_matches();
    let cli = CliOptions::from_matches(&matches);

    if !cli.quiet {
        print_banner();
    }

    if let Err(e) = run(cli).await {
        error!("Fatal: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: CliOptions) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    cli.apply(&mut settings);

    let _log_guard = telemetry::init(
        &settings.log_directory(),
        &settings.logging.file_prefix,
        settings.logging.filter.as_deref(),
    )?;
    info!("Starting lurker v{}", env!("CARGO_PKG_VERSION"));

    let store = open_store(&settings).await?;
    let run_id = store.start_run().await.context("recording run start")?;

    let rotator = Arc::new(IpRotator::new(settings.fetch.rotation_url.clone()));
    let fetcher = Arc::new(
        Fetcher::new(settings.fetch_config())
            .context("building HTTP client")?
            .with_rotator(rotator.clone()),
    );

    // Fallible setup stays ahead of provisioning.
    let seen = if settings.discovery.enabled {
        let seen = SeenSet::bootstrap(store.as_ref())
            .await
            .context("loading known targets")?;
        Some(Arc::new(seen))
    } else {
        info!("Discovery disabled");
        None
    };

    let mut provisioner =
        ProvisioningClient::new(&settings.provisioning.api_url).context("building provisioning client")?;
    if let Some(host) = settings.provisioning.session_host.as_deref() {
        provisioner = provisioner.with_session_host(host);
    }
    let pool = HandlePool::provision(&provisioner, &settings.provisioning.profile_ids)
        .await
        .context("no healthy execution handles")?;

    let scrape_stats = Arc::new(ScrapeStats::new());
    let discovery_stats = Arc::new(DiscoveryStats::new());

    pool.run_then_shutdown(&provisioner, async {
        let mut tasks: Vec<(&str, JoinHandle<()>)> = Vec::new();

        let sweep = HealthSweep::new(
            pool.clone(),
            Duration::from_secs(settings.pool.health_interval_secs),
            Duration::from_secs(settings.pool.probe_timeout_secs),
        );
        tasks.push(("health sweep", tokio::spawn(sweep.run())));

        let scraper = PageScraper::new(
            &settings.fetch.base_url,
            Duration::from_secs(settings.scheduler.page_timeout_secs),
        )
        .with_rotator(rotator.clone())
        .with_retry(settings.fetch_config().timing, settings.scheduler.page_attempts);
        let mut scheduler = BatchScheduler::new(
            store.clone(),
            pool.clone(),
            scraper,
            Classifier::new(settings.scheduler.retry_threshold),
            settings.scheduler_config(),
        )
        .with_stats(scrape_stats.clone());
        if settings.scheduler.precheck {
            scheduler = scheduler.with_prechecker(Prechecker::new(fetcher.clone(), &settings.fetch.base_url));
        }
        tasks.push(("scheduler", tokio::spawn(scheduler.run())));

        if let Some(seen) = seen {
            let walker = DiscoveryWalker::new(fetcher.clone(), store.clone(), seen, settings.discovery_config())
                .with_stats(discovery_stats.clone());
            tasks.push(("discovery", tokio::spawn(walker.run())));
        }

        if let Some(index) = wait_for_shutdown(&mut tasks).await {
            let (name, _) = tasks.remove(index);
            error!("{} task stopped unexpectedly, shutting down", name);
        }

        for (_, task) in &tasks {
            task.abort();
        }
        for (name, task) in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("{} task ended abnormally: {}", name, e);
                }
            }
        }

        let summary = RunSummary {
            scrape: scrape_stats.snapshot(),
            discovery: discovery_stats.snapshot(),
            ip_rotations: rotator.rotation_count(),
        };
        scrape_stats.log();
        discovery_stats.log();
        if let Err(e) = store.finish_run(&run_id, &summary.to_json()).await {
            error!("Failed to record run {}: {}", run_id, e);
        }
    })
    .await;

    info!("Shutdown complete");
    Ok(())
}

async fn open_store(settings: &Settings) -> Result<Arc<SqliteStore>> {
    let db_path = settings.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }

    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    info!("Using database {}", db_path.display());

    let requeued = store.requeue_stale().await?;
    if requeued > 0 {
        info!("Requeued {} targets left in progress by a previous run", requeued);
    }
    for (status, count) in store.status_counts().await? {
        info!("{:>20}: {}", status.as_str(), count);
    }

    Ok(Arc::new(store))
}

/// Block until ctrl-c, or until a background task ends on its own. Returns
/// the index of a task that has already finished.
async fn wait_for_shutdown(tasks: &mut [(&str, JoinHandle<()>)]) -> Option<usize> {
    let any_finished = futures::future::select_all(tasks.iter_mut().map(|(_, task)| task));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Interrupt received, shutting down..."),
                Err(e) => error!("Failed to listen for ctrl-c: {}", e),
            }
            None
        }
        (result, index, _) = any_finished => {
            if let Err(e) = result {
                error!("Background task failed: {}", e);
            }
            Some(index)
        }
    }
}
