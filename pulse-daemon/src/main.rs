//! Pulse Daemon
//!
//! Collects CI metrics from the provider on fixed intervals and publishes
//! them to the configured destinations.
//!
//! Architecture:
//! - Configuration: provider, pipelines and destinations from the environment
//! - Metrics: collectors turning builds and agents into data sets
//! - Publishers: stdout, Postgres (with retention) and the time-series store
//! - Scheduler: one interval loop per metric
//! - API: read-only status of the scheduled metrics

mod api;
mod config;
mod db;
mod metrics;
mod publishers;
mod retention;
mod scheduler;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::metrics::{
    AggregatedPipelinePerformance, BuildSuccess, BuildsPerChange, CriticalPath, DailyPerformance,
    MacPerformance, Metric, PipelinePerformance, PlatformLoad, PlatformSignificance, PlatformUsage,
    WorkerAvailability,
};
use crate::publishers::{
    DevNullPublisher, OutputFormat, PostgresPublisher, Publisher, StdoutPublisher,
    TimeSeriesPublisher,
};
use crate::scheduler::MetricScheduler;
use pulse_client::{BuildProvider, BuildkiteClient, CachedBuildkiteClient, TimeSeriesClient};

const MINUTE: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "pulse-daemon")]
#[command(about = "Collects CI metrics and publishes them", long_about = None)]
struct Cli {
    /// Collect and print every metric once, then exit
    #[arg(long)]
    once: bool,

    /// Collect on schedule but discard the data
    #[arg(long, conflicts_with = "once")]
    dry_run: bool,

    /// Do not start the status API
    #[arg(long)]
    no_server: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_daemon=info,pulse_client=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    info!("Starting Pulse Daemon");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    info!(
        "Loaded configuration: orgs={:?}, pipelines={}, cache_timeout={:?}",
        config.orgs,
        config.pipelines.len(),
        config.cache_timeout
    );

    let api = BuildkiteClient::new(config.api_url.clone(), config.api_token.clone());
    let provider: Arc<dyn BuildProvider> =
        Arc::new(CachedBuildkiteClient::new(api, config.cache_timeout));

    let default_publisher = default_publisher(&cli, &config).await?;
    let time_series = time_series_publisher(&cli, &config);

    let mut scheduler = MetricScheduler::default();
    for (metric, interval, extra) in metrics(&config, &provider, time_series) {
        let mut publishers = vec![Arc::clone(&default_publisher)];
        publishers.extend(extra);
        scheduler.add_metric(metric, interval, publishers)?;
    }

    if cli.once {
        info!("Running every metric once");
        scheduler.run_jobs_once().await;
        return Ok(());
    }

    scheduler.start();

    if cli.no_server {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
    } else {
        let app = api::create_router(scheduler.status());
        let listener = tokio::net::TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
        info!("Status API listening on {}", config.bind_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
            })
            .await
            .context("Status API failed")?;
    }

    info!("Shutting down");
    scheduler.shutdown().await;
    Ok(())
}

/// Publisher that receives every metric
async fn default_publisher(cli: &Cli, config: &Config) -> Result<Arc<dyn Publisher>> {
    if cli.once {
        return Ok(Arc::new(StdoutPublisher::new(OutputFormat::Csv)));
    }
    if cli.dry_run {
        return Ok(Arc::new(DevNullPublisher));
    }

    match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = db::create_pool(url)
                .await
                .context("Failed to create database pool")?;
            Ok(Arc::new(PostgresPublisher::new(pool)))
        }
        None => {
            info!("DATABASE_URL not set, publishing to stdout");
            Ok(Arc::new(StdoutPublisher::new(OutputFormat::Csv)))
        }
    }
}

fn time_series_publisher(cli: &Cli, config: &Config) -> Option<Arc<dyn Publisher>> {
    if cli.once || cli.dry_run {
        return None;
    }
    let time_series = config.time_series.as_ref()?;
    let client = TimeSeriesClient::new(
        time_series.url.clone(),
        time_series.project.clone(),
        time_series.token.clone(),
    );
    Some(Arc::new(TimeSeriesPublisher::new(client)))
}

type Schedule = (Arc<dyn Metric>, Duration, Vec<Arc<dyn Publisher>>);

fn schedule(metric: impl Metric + 'static, interval: Duration) -> Schedule {
    (Arc::new(metric), interval, Vec::new())
}

/// Every metric with its interval and the publishers it gets besides the default one
fn metrics(
    config: &Config,
    provider: &Arc<dyn BuildProvider>,
    time_series: Option<Arc<dyn Publisher>>,
) -> Vec<Schedule> {
    let pipelines = &config.pipelines;
    let orgs = &config.orgs;
    let provider = || Arc::clone(provider);

    let mut platform_load = schedule(PlatformLoad::new(provider(), 100, orgs.clone()), MINUTE);
    platform_load.2.extend(time_series);

    vec![
        schedule(
            AggregatedPipelinePerformance::new(provider(), 20, pipelines.clone()),
            10 * MINUTE,
        ),
        schedule(BuildSuccess::new(provider(), 200, pipelines.clone()), 60 * MINUTE),
        schedule(BuildsPerChange::new(provider(), 500, pipelines.clone()), 60 * MINUTE),
        schedule(CriticalPath::new(provider(), 20, pipelines.clone()), 60 * MINUTE),
        schedule(DailyPerformance::new(provider(), 200, pipelines.clone()), 60 * MINUTE),
        schedule(MacPerformance::new(provider(), 20, pipelines.clone()), 60 * MINUTE),
        schedule(PipelinePerformance::new(provider(), 20, pipelines.clone()), 10 * MINUTE),
        platform_load,
        schedule(PlatformSignificance::new(provider(), 100, pipelines.clone()), 24 * 60 * MINUTE),
        schedule(PlatformUsage::new(provider(), 100, orgs.clone()), 60 * MINUTE),
        schedule(WorkerAvailability::new(provider(), orgs.clone()), 5 * MINUTE),
    ]
}
