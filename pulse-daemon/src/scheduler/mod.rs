//! Metric scheduler
//!
//! Drives every registered metric on its own interval. Each metric gets its
//! own task: it registers the metric with its publishers once, then collects
//! and publishes on every tick. Ticks of one metric never overlap; a slow
//! cycle delays the next tick instead. Failures are reported through the
//! error handler and never stop other metrics or later ticks.

mod job;
mod status;

pub use job::MetricJob;
pub use status::{MetricStatus, StatusBoard};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::metrics::{CollectError, Metric};
use crate::publishers::{PublishError, Publisher};

/// Errors reported by the scheduler, always together with the metric name
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Metric '{0}' has already been registered")]
    DuplicateMetric(String),

    #[error("Metric '{0}' needs an interval greater than zero")]
    InvalidInterval(String),

    #[error("Registering with {publisher} failed: {source}")]
    RegistrationFailed {
        publisher: String,
        #[source]
        source: PublishError,
    },

    #[error("Collection failed: {0}")]
    CollectionFailed(#[source] CollectError),

    #[error("Publishing to {publisher} failed: {source}")]
    PublishFailed {
        publisher: String,
        #[source]
        source: PublishError,
    },
}

/// Receives every error together with the name of the metric it belongs to
pub type ErrorHandler = Arc<dyn Fn(&str, &SchedulerError) + Send + Sync>;

/// Handler logging each error at `error` level
pub fn log_errors() -> ErrorHandler {
    Arc::new(|metric, err| error!("[{}] {:#}", metric, err))
}

pub struct MetricScheduler {
    jobs: Vec<Arc<MetricJob>>,
    handler: ErrorHandler,
    status: Arc<StatusBoard>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl MetricScheduler {
    pub fn new(handler: ErrorHandler) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            jobs: Vec::new(),
            handler,
            status: Arc::new(StatusBoard::new()),
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Adds a metric that runs every `interval` and feeds `publishers` in order
    ///
    /// Metric names are unique. Metrics added after [`start`](Self::start)
    /// only run in [`run_jobs_once`](Self::run_jobs_once).
    pub fn add_metric(
        &mut self,
        metric: Arc<dyn Metric>,
        interval: Duration,
        publishers: Vec<Arc<dyn Publisher>>,
    ) -> Result<(), SchedulerError> {
        let name = metric.name().to_string();
        if self.jobs.iter().any(|job| job.name() == name) {
            return Err(SchedulerError::DuplicateMetric(name));
        }
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval(name));
        }

        let job = MetricJob::new(metric, interval, publishers);
        self.status.register(job.status());
        self.jobs.push(Arc::new(job));
        Ok(())
    }

    pub fn status(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.status)
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Spawns one task per metric
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Scheduler is already running");
            return;
        }
        self.shutdown.send_replace(false);

        for job in &self.jobs {
            info!("Scheduling metric {} every {:?}", job.name(), job.interval());
            let handle = tokio::spawn(run_job(
                Arc::clone(job),
                Arc::clone(&self.handler),
                Arc::clone(&self.status),
                self.shutdown.subscribe(),
            ));
            self.handles.push(handle);
        }
    }

    /// Registers, collects and publishes every metric exactly once, one after another
    ///
    /// A metric whose registration fails is reported and skipped.
    pub async fn run_jobs_once(&self) {
        for job in &self.jobs {
            if let Err(e) = job.initialize().await {
                (self.handler)(job.name(), &e);
                self.status.record_failure(job.name(), e.to_string());
                continue;
            }
            job.run(&self.handler, &self.status).await;
        }
    }

    /// Stops scheduling new ticks; running ticks finish normally
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Stops and waits until every metric task has finished its current tick
    pub async fn shutdown(&mut self) {
        self.stop();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("Metric task panicked: {}", e);
            }
        }
    }
}

impl Default for MetricScheduler {
    fn default() -> Self {
        Self::new(log_errors())
    }
}

async fn run_job(
    job: Arc<MetricJob>,
    handler: ErrorHandler,
    status: Arc<StatusBoard>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = job.initialize().await {
        handler(job.name(), &e);
        status.record_failure(job.name(), e.to_string());
        return;
    }

    // First tick completes immediately
    let mut interval = time::interval(job.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow_and_update() {
                    break;
                }
                continue;
            }
            _ = interval.tick() => {}
        }

        job.run(&handler, &status).await;
    }

    info!("Stopped metric {}", job.name());
}
