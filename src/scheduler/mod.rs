//! Task scheduling
//!
//! The scheduler is the write path for tasks: it validates submissions,
//! arms them with a `next_run_at`, and fires them when due.
//!
//! ## Lifecycle
//!
//! ```text
//! once      : pending ──(immediately)──► running ──► completed | failed
//! scheduled : pending ──(next_run_at)──► running ──► completed | failed
//! recurring : pending ──(cron)──► running ──► pending (re-armed) ── ...
//! ```
//!
//! Cancellation flips a task to `cancelled` and suppresses every future
//! firing. A run already in flight is not interrupted; it finishes its
//! targets and the executor then leaves the task in `cancelled`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, instrument, trace, warn};

use crate::config::SchedulerConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::{Task, TaskKind, TaskStatus, TargetSpec};
use crate::store::Store;

mod executor;
mod targets;

pub use executor::TaskExecutor;
pub use targets::resolve_targets;

/// Parameters for submitting a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub kind: TaskKind,
    pub targets: TargetSpec,
    pub command: String,
    /// Required for `recurring`, ignored otherwise.
    pub cron_expression: Option<String>,
    /// Required for `scheduled`, ignored otherwise.
    pub run_at: Option<DateTime<Utc>>,
    pub created_by: u64,
}

#[derive(Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn Store>,
    executor: TaskExecutor,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, store: Arc<dyn Store>, executor: TaskExecutor) -> Self {
        Self {
            config,
            store,
            executor,
        }
    }

    /// Validate and persist a task. `scheduled` and `recurring` tasks are
    /// armed with their first firing; `once` tasks are dispatched
    /// immediately in the background instead, and the returned row is the
    /// pending snapshot from before that run.
    #[instrument(skip(self, new), fields(name = %new.name, kind = ?new.kind))]
    pub async fn submit(&self, new: NewTask) -> CoreResult<Task> {
        if new.name.trim().is_empty() {
            return Err(CoreError::Validation("task name must not be empty".into()));
        }
        if new.command.trim().is_empty() {
            return Err(CoreError::Validation(
                "task command must not be empty".into(),
            ));
        }
        if new.targets.is_empty() {
            return Err(CoreError::Validation(
                "task must name at least one server or group".into(),
            ));
        }

        let now = Utc::now();
        let (next_run_at, cron_expression) = match new.kind {
            // Dispatched directly below, never armed for the ticker: a
            // single firing must have a single trigger.
            TaskKind::Once => (None, None),
            TaskKind::Scheduled => {
                let run_at = new.run_at.ok_or_else(|| {
                    CoreError::Validation("scheduled task requires a run time".into())
                })?;
                (Some(run_at), None)
            }
            TaskKind::Recurring => {
                let expr = new.cron_expression.ok_or_else(|| {
                    CoreError::Validation("recurring task requires a cron expression".into())
                })?;
                let next = next_occurrence(&expr, now)?.ok_or_else(|| {
                    CoreError::Validation(format!(
                        "cron expression '{expr}' never fires in the future"
                    ))
                })?;
                (Some(next), Some(expr))
            }
        };

        let task = self
            .store
            .create_task(Task {
                id: 0,
                name: new.name,
                kind: new.kind,
                targets: new.targets,
                command: new.command,
                cron_expression,
                status: TaskStatus::Pending,
                last_run_at: None,
                next_run_at,
                created_by: new.created_by,
                created_at: now,
            })
            .await?;

        debug!("task {} submitted, first run at {:?}", task.id, task.next_run_at);

        if task.kind == TaskKind::Once {
            let executor = self.executor.clone();
            let task_id = task.id;
            tokio::spawn(async move {
                if let Err(e) = executor.run_task(task_id).await {
                    warn!("immediate run of task {task_id} failed: {e}");
                }
            });
        }

        Ok(task)
    }

    /// Cancel a task, suppressing all future firings.
    ///
    /// Cancelling an already-terminal task is a conflict. A `running` task
    /// is flipped to `cancelled` while its in-flight run completes.
    #[instrument(skip(self))]
    pub async fn cancel(&self, task_id: u64) -> CoreResult<Task> {
        let mut task = self.store.get_task(task_id).await?;

        if task.status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "task {} is already {:?}",
                task.id, task.status
            )));
        }

        task.status = TaskStatus::Cancelled;
        task.next_run_at = None;
        let task = self.store.update_task(task).await?;

        debug!("task {} cancelled", task.id);
        Ok(task)
    }

    /// Fire every task that is due at `now`.
    ///
    /// Runs are awaited one after another; the parallelism that matters is
    /// inside each run's target fan-out. A task cancelled between the due
    /// scan and its firing loses the executor's claim and is skipped.
    pub async fn tick(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let due = self.store.due_tasks(now).await?;
        if due.is_empty() {
            trace!("no tasks due at {now}");
            return Ok(0);
        }

        debug!("{} task(s) due at {now}", due.len());

        let mut fired = 0;
        for task in due {
            match self.executor.run_task(task.id).await {
                Ok(_) => fired += 1,
                Err(e) => warn!("task {} run failed: {e}", task.id),
            }
        }
        Ok(fired)
    }

    /// Spawn the periodic due-task scan.
    pub fn spawn_ticker(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        let period = Duration::from_secs(scheduler.config.tick_interval_secs.max(1));

        tokio::spawn(async move {
            debug!("starting scheduler tick loop (interval {period:?})");
            let mut ticker = interval(period);

            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.tick(Utc::now()).await {
                    error!("scheduler tick failed: {e}");
                }
            }
        })
    }
}

/// First firing of a cron expression strictly after `after`.
///
/// Accepts classic five-field crontab expressions (`*/5 * * * *`) as well
/// as six-field ones with a leading seconds column; five-field input is
/// pinned to second zero.
pub fn next_occurrence(
    expr: &str,
    after: DateTime<Utc>,
) -> CoreResult<Option<DateTime<Utc>>> {
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };

    let schedule = cron::Schedule::from_str(&normalized)
        .map_err(|e| CoreError::Validation(format!("invalid cron expression '{expr}': {e}")))?;
    Ok(schedule.after(&after).next())
}
