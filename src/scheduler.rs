//! Timer wiring: periodic ticks enqueue tasks on the single-slot queue. A
//! busy queue just skips the tick.

use std::sync::Arc;

use anyhow::Result;
use tokio::time::{interval, Duration};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::state::SharedState;
use crate::tasks::{TaskArgs, TaskKey};

pub struct Scheduler {
    state: Arc<SharedState>,
    config: SchedulerConfig,
}

impl Scheduler {
    #[must_use]
    pub fn new(state: Arc<SharedState>, config: SchedulerConfig) -> Self {
        Self { state, config }
    }

    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            info!("Scheduler is disabled in config");
            return Ok(());
        }

        if let Some(cron_expr) = self.config.cron_expression.clone() {
            self.run_with_cron(&cron_expr).await
        } else {
            self.run_with_interval().await
        }
    }

    fn enqueue_chain(state: &Arc<SharedState>, sequence: Vec<TaskKey>) {
        let args = TaskArgs {
            task_sequence: sequence,
            ..TaskArgs::default()
        };
        if let Err(e) = state.task_manager.submit(TaskKey::TaskChain, args) {
            warn!("scheduled chain skipped: {e}");
        }
    }

    fn enqueue(state: &Arc<SharedState>, key: TaskKey) {
        if let Err(e) = state.task_manager.submit(key, TaskArgs::default()) {
            warn!(task = key.as_str(), "scheduled task skipped: {e}");
        }
    }

    async fn run_with_cron(&self, cron_expr: &str) -> Result<()> {
        let sched = JobScheduler::new().await?;

        let state = Arc::clone(&self.state);
        let sequence = self.config.chain_keys();
        let chain_job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let state = Arc::clone(&state);
            let sequence = sequence.clone();
            Box::pin(async move {
                info!(event = "job_started", job_name = "task_chain", "scheduled chain tick");
                Self::enqueue_chain(&state, sequence);
            })
        })?;

        let revival_hours = self.config.revival_check_hours.max(1);
        let revival_cron = if revival_hours >= 24 {
            "0 30 4 * * *".to_string()
        } else {
            format!("0 30 */{revival_hours} * * *")
        };
        let state = Arc::clone(&self.state);
        let revival_job = Job::new_async(revival_cron.as_str(), move |_uuid, _lock| {
            let state = Arc::clone(&state);
            Box::pin(async move {
                Self::enqueue(&state, TaskKey::RevivalCheck);
            })
        })?;

        sched.add(chain_job).await?;
        sched.add(revival_job).await?;
        sched.start().await?;

        info!("Scheduler running with cron: {cron_expr}");
        info!("Revival check scheduled: {revival_cron}");

        // The scheduler owns this future for the life of the daemon.
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }

    async fn run_with_interval(&self) -> Result<()> {
        let chain_minutes = u64::from(self.config.check_interval_minutes.max(1));
        let revival_hours = u64::from(self.config.revival_check_hours.max(1));
        info!(
            "Scheduler running: chain every {chain_minutes}m, revival check every {revival_hours}h"
        );

        let mut chain_tick = interval(Duration::from_secs(chain_minutes * 60));
        let mut revival_tick = interval(Duration::from_secs(revival_hours * 3600));

        // Both intervals fire immediately once; swallow that so the daemon
        // does not start with a full chain run.
        chain_tick.tick().await;
        revival_tick.tick().await;

        loop {
            tokio::select! {
                _ = chain_tick.tick() => {
                    info!(event = "job_started", job_name = "task_chain", "scheduled chain tick");
                    Self::enqueue_chain(&self.state, self.config.chain_keys());
                }
                _ = revival_tick.tick() => {
                    Self::enqueue(&self.state, TaskKey::RevivalCheck);
                }
            }
        }
    }
}
