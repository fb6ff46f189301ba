//! Multi-track scheduler.
//!
//! One tokio task per registered job, looping over a `tokio::time::interval`
//! with missed ticks coalesced. A job is serialized against itself because
//! its tick handler is awaited inline; different jobs run concurrently.
//! Configuration updates travel through a `watch` channel read at tick
//! start, so modify-args and reschedule are atomic with respect to firing.

use crate::config::DriverConfig;
use crate::pipeline;
use ot_core::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobId {
    DbLevelMonitor,
    TableLevelMonitor,
    LongRunningQueryMonitor,
    QueryMonitor,
    SchemaMonitor,
}

impl JobId {
    pub const ALL: [JobId; 5] = [
        JobId::DbLevelMonitor,
        JobId::TableLevelMonitor,
        JobId::LongRunningQueryMonitor,
        JobId::QueryMonitor,
        JobId::SchemaMonitor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobId::DbLevelMonitor => "db_level_monitor_job",
            JobId::TableLevelMonitor => "table_level_monitor_job",
            JobId::LongRunningQueryMonitor => "long_running_query_monitor_job",
            JobId::QueryMonitor => "query_monitor_job",
            JobId::SchemaMonitor => "schema_monitor_job",
        }
    }

    /// Scheduled interval in seconds for this job.
    pub fn interval(&self, config: &DriverConfig) -> u64 {
        match self {
            JobId::DbLevelMonitor => config.monitor_interval,
            JobId::TableLevelMonitor => config.table_level_monitor_interval,
            JobId::LongRunningQueryMonitor => config.long_running_query_monitor_interval,
            JobId::QueryMonitor => config.query_monitor_interval,
            JobId::SchemaMonitor => config.schema_monitor_interval,
        }
    }

    /// Whether the pipeline is enabled under this configuration. Table-level
    /// runs when either table or index stats are wanted.
    pub fn enabled(&self, config: &DriverConfig) -> bool {
        match self {
            JobId::DbLevelMonitor => true,
            JobId::TableLevelMonitor => {
                !(config.disable_table_level_stats && config.disable_index_stats)
            }
            JobId::LongRunningQueryMonitor => !config.disable_long_running_query_monitoring,
            JobId::QueryMonitor => !config.disable_query_monitoring,
            JobId::SchemaMonitor => !config.disable_schema_monitoring,
        }
    }

    /// Only the DB-level job fires immediately on registration; all other
    /// jobs defer their first tick by one interval.
    fn first_tick_is_immediate(&self) -> bool {
        matches!(self, JobId::DbLevelMonitor)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct JobHandle {
    config_tx: watch::Sender<DriverConfig>,
    task: JoinHandle<()>,
}

pub struct Scheduler {
    jobs: Mutex<HashMap<JobId, JobHandle>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Apply a configuration to a job. Registers the job when absent, does
    /// nothing when the configuration is unchanged, otherwise swaps the
    /// job's arguments and, when its interval changed, reschedules it.
    pub async fn schedule_or_update_job(&self, config: &DriverConfig, job_id: JobId) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get(&job_id) {
            None => {
                let interval = job_id.interval(config);
                tracing::info!(job = %job_id, "initializing driver pipeline");
                let (config_tx, config_rx) = watch::channel(config.clone());
                let task = tokio::spawn(run_job(job_id, self.shutdown.clone(), config_rx));
                jobs.insert(job_id, JobHandle { config_tx, task });
                tracing::info!(
                    job = %job_id,
                    "running driver pipeline every {interval} seconds"
                );
            }
            Some(job) => {
                let unchanged = *job.config_tx.borrow() == *config;
                if unchanged {
                    return Ok(());
                }
                tracing::info!(job = %job_id, "found new config");
                let old_interval = job_id.interval(&job.config_tx.borrow());
                job.config_tx
                    .send(config.clone())
                    .map_err(|_| Error::Config(format!("job {job_id} is no longer running")))?;
                let new_interval = job_id.interval(config);
                if old_interval != new_interval {
                    tracing::info!(
                        job = %job_id,
                        "running driver pipeline every {new_interval} seconds"
                    );
                }
            }
        }
        Ok(())
    }

    /// The configuration a running job will use on its next tick.
    pub async fn job_config(&self, job_id: JobId) -> Option<DriverConfig> {
        let jobs = self.jobs.lock().await;
        jobs.get(&job_id).map(|job| job.config_tx.borrow().clone())
    }

    pub async fn registered_jobs(&self) -> Vec<JobId> {
        let jobs = self.jobs.lock().await;
        let mut ids: Vec<JobId> = jobs.keys().copied().collect();
        ids.sort_by_key(|id| id.as_str());
        ids
    }

    /// Let in-flight ticks finish and join every job task. The shutdown
    /// token must already be cancelled.
    pub async fn shutdown_and_wait(&self) {
        let mut jobs = self.jobs.lock().await;
        for (job_id, job) in jobs.drain() {
            if let Err(err) = job.task.await {
                tracing::warn!(job = %job_id, %err, "job task did not shut down cleanly");
            }
        }
    }
}

/// Register one job per enabled pipeline.
pub async fn register_jobs(scheduler: &Scheduler, config: &DriverConfig) -> Result<()> {
    for job_id in JobId::ALL {
        if job_id.enabled(config) {
            scheduler.schedule_or_update_job(config, job_id).await?;
        }
    }
    Ok(())
}

async fn run_job(
    job_id: JobId,
    shutdown: CancellationToken,
    mut config_rx: watch::Receiver<DriverConfig>,
) {
    let mut first_schedule = true;
    loop {
        let interval_secs = job_id.interval(&config_rx.borrow());
        let period = Duration::from_secs(interval_secs.max(1));
        let start = if first_schedule && job_id.first_tick_is_immediate() {
            Instant::now()
        } else {
            Instant::now() + period
        };
        first_schedule = false;
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(job = %job_id, "job shutting down");
                    return;
                }
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let new_interval = job_id.interval(&config_rx.borrow_and_update());
                    if new_interval != interval_secs {
                        // rebuild the ticker on the new cadence
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let config = config_rx.borrow().clone();
                    pipeline::driver_pipeline(config, job_id).await;
                }
            }
        }
    }
}
