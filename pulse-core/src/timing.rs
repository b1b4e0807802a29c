//! Job interval timing
//!
//! Reconstructs how long a build waited for workers and how long it actually
//! ran from the start/finish timestamps of its jobs. Jobs of one build often
//! run in parallel, so times are computed with a sweep over start (+1) and
//! finish (-1) events: time passes as *wait* while no job is running and as
//! *run* while at least one is, which counts overlapping jobs once.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::job::Job;

/// Returned by [`difference_seconds`] when either timestamp is missing
pub const MISSING_TIMESTAMP: f64 = -1.0;

/// End timestamp lies at least one second before the start timestamp
#[derive(Debug, Clone, PartialEq, Error)]
#[error("start {start} is later than end {end} ({seconds:.3}s)")]
pub struct ClockSkew {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub seconds: f64,
}

/// Inconsistent job data that prevents a timing analysis
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimingError {
    /// More jobs started than finished
    #[error("There are {count} unfinished jobs")]
    UnfinishedJobs { count: usize },

    /// More jobs finished than started at some point of the sweep
    #[error("More jobs finished than started at {at}")]
    FinishedBeforeStart { at: DateTime<Utc> },

    /// Provider reported timestamps in the wrong order
    #[error("Time error in job '{job}': {source}")]
    ClockSkew {
        job: String,
        #[source]
        source: ClockSkew,
    },
}

/// Seconds between two timestamps
///
/// Returns [`MISSING_TIMESTAMP`] if either side is absent. Some provider
/// timestamps lack milliseconds, so negative differences under one second
/// are reported as zero; larger ones are an error.
pub fn difference_seconds(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<f64, ClockSkew> {
    let (Some(start), Some(end)) = (start, end) else {
        return Ok(MISSING_TIMESTAMP);
    };

    let seconds = (end - start).num_milliseconds() as f64 / 1000.0;
    if seconds >= 0.0 {
        Ok(seconds)
    } else if seconds > -1.0 {
        Ok(0.0)
    } else {
        Err(ClockSkew {
            start,
            end,
            seconds,
        })
    }
}

/// Timing snapshot of one job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobInterval {
    pub id: String,
    pub name: Option<String>,
    pub state: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub runnable_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobInterval {
    /// Name used in reports, falling back to the job id
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Runnable and finished, so its total duration is known
    fn is_schedulable(&self) -> bool {
        self.runnable_at.is_some() && self.finished_at.is_some()
    }
}

impl From<&Job> for JobInterval {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            state: job.state.clone(),
            created_at: job.created_at,
            runnable_at: job.runnable_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// Job with the largest runnable-to-finished duration
#[derive(Debug, Clone, PartialEq)]
pub struct LongestTask {
    pub name: String,
    pub seconds: f64,
}

/// Aggregated timing of one build
#[derive(Debug, Clone, PartialEq)]
pub struct JobsPerformance {
    /// Earliest runnable timestamp of all finished jobs
    pub ready_at: Option<DateTime<Utc>>,
    pub total_wait_seconds: f64,
    pub total_run_seconds: f64,
    pub longest_task: Option<LongestTask>,
    /// Every job reported the "passed" state
    pub passed: bool,
}

#[derive(Debug, Clone, Copy)]
struct Event {
    time: DateTime<Utc>,
    delta: i64,
}

/// Analyzes the jobs of a single build
///
/// The result does not depend on the order of `jobs`. A job that started but
/// never finished makes the whole analysis fail with
/// [`TimingError::UnfinishedJobs`].
pub fn analyze(jobs: &[JobInterval]) -> Result<JobsPerformance, TimingError> {
    let mut events = Vec::with_capacity(jobs.len() * 2);
    let mut ready_at: Option<DateTime<Utc>> = None;
    let mut longest_task: Option<LongestTask> = None;
    let mut passed = true;

    for job in jobs {
        if job.state.as_deref() != Some("passed") {
            passed = false;
        }

        if let Some(started) = job.started_at {
            difference_seconds(job.started_at, job.finished_at).map_err(|source| {
                TimingError::ClockSkew {
                    job: job.label().to_string(),
                    source,
                }
            })?;
            events.push(Event {
                time: started,
                delta: 1,
            });
            if let Some(finished) = job.finished_at {
                // Sub-second skew is tolerated; never finish before starting
                events.push(Event {
                    time: finished.max(started),
                    delta: -1,
                });
            }
        }

        if !job.is_schedulable() {
            continue;
        }

        if ready_at.is_none_or(|ready| job.runnable_at.is_some_and(|r| r < ready)) {
            ready_at = job.runnable_at;
        }

        let seconds = difference_seconds(job.runnable_at, job.finished_at).map_err(|source| {
            TimingError::ClockSkew {
                job: job.label().to_string(),
                source,
            }
        })?;
        if is_longer(&longest_task, job.label(), seconds) {
            longest_task = Some(LongestTask {
                name: job.label().to_string(),
                seconds,
            });
        }
    }

    // Stable: simultaneous events keep input order, which only matters for
    // the running count and never for the accrued time.
    events.sort_by_key(|e| e.time);

    let mut running: i64 = 0;
    let mut total_wait_seconds = 0.0;
    let mut total_run_seconds = 0.0;
    let mut prev_time = ready_at.or_else(|| events.first().map(|e| e.time));

    for event in &events {
        let elapsed = prev_time
            .map(|prev| ((event.time - prev).num_milliseconds() as f64 / 1000.0).max(0.0))
            .unwrap_or(0.0);

        if running == 0 {
            total_wait_seconds += elapsed;
        } else {
            total_run_seconds += elapsed;
        }

        running += event.delta;
        if running < 0 {
            return Err(TimingError::FinishedBeforeStart { at: event.time });
        }
        prev_time = Some(event.time);
    }

    if running != 0 {
        return Err(TimingError::UnfinishedJobs {
            count: running.unsigned_abs() as usize,
        });
    }

    Ok(JobsPerformance {
        ready_at,
        total_wait_seconds,
        total_run_seconds,
        longest_task,
        passed,
    })
}

/// Longer duration wins; equal durations go to the smaller name
fn is_longer(current: &Option<LongestTask>, name: &str, seconds: f64) -> bool {
    match current {
        None => true,
        Some(task) => seconds > task.seconds || (seconds == task.seconds && name < task.name.as_str()),
    }
}
