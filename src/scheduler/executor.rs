//! Task execution
//!
//! Runs one task against all of its resolved targets, with fan-out capped
//! by a semaphore. Each target gets its own [`TaskLog`] row: created as
//! `running` before the command is dispatched, finished with the classified
//! outcome (`success` / `failed` / `timeout`) afterwards.
//!
//! Per-target problems stay per-target. An unreachable agent, a non-zero
//! exit code, a missing credential — each becomes a `failed` log for that
//! server while the rest of the fan-out continues. Only problems that
//! precede fan-out (target resolution failure, empty target set) fail the
//! task with zero logs.
//!
//! The roll-up is strict: `completed` only when every target succeeded,
//! otherwise `failed`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::config::ExecutorConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::{Task, TaskKind, TaskLogStatus, TaskStatus};
use crate::scheduler::targets::resolve_targets;
use crate::store::Store;
use crate::transport::{AgentEndpoint, AgentTransport};
use crate::vault::Vault;

use super::next_occurrence;

#[derive(Clone)]
pub struct TaskExecutor {
    config: ExecutorConfig,
    store: Arc<dyn Store>,
    vault: Arc<Vault>,
    transport: Arc<dyn AgentTransport>,
}

impl TaskExecutor {
    pub fn new(
        config: ExecutorConfig,
        store: Arc<dyn Store>,
        vault: Arc<Vault>,
        transport: Arc<dyn AgentTransport>,
    ) -> Self {
        Self {
            config,
            store,
            vault,
            transport,
        }
    }

    /// Run a task end to end: claim it, resolve targets, fan out, roll up.
    ///
    /// The claim is the store's atomic `pending` → `running` flip, so of
    /// any number of concurrent runners exactly one fans out. A task that
    /// cannot be claimed (cancelled, or already picked up) is left
    /// untouched.
    #[instrument(skip(self))]
    pub async fn run_task(&self, task_id: u64) -> CoreResult<Task> {
        let Some(task) = self.store.claim_task(task_id).await? else {
            let task = self.store.get_task(task_id).await?;
            debug!("task {} is {:?}, not running it", task.id, task.status);
            return Ok(task);
        };

        let targets = match resolve_targets(self.store.as_ref(), &task.targets).await {
            Ok(targets) if targets.is_empty() => {
                self.finish_task(&task, TaskStatus::Failed).await?;
                return Err(CoreError::NoTargets);
            }
            Ok(targets) => targets,
            Err(e) => {
                warn!("task {} target resolution failed: {e}", task.id);
                self.finish_task(&task, TaskStatus::Failed).await?;
                return Err(e);
            }
        };

        debug!("task {} fanning out to {} targets", task.id, targets.len());

        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let runs = targets.into_iter().map(|server_id| {
            let executor = self.clone();
            let semaphore = semaphore.clone();
            let command = task.command.clone();
            let task_id = task.id;

            async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    // Semaphore is never closed while the run is alive.
                    Err(_) => return TaskLogStatus::Failed,
                };
                executor.run_target(task_id, server_id, &command).await
            }
        });

        let outcomes = futures::future::join_all(runs).await;
        let rollup = if outcomes.iter().all(|s| *s == TaskLogStatus::Success) {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };

        self.finish_task(&task, rollup).await
    }

    /// Execute the command on one server and record the outcome in its log.
    /// Never fails the whole run: store hiccups degrade to a warning plus a
    /// `failed` outcome.
    async fn run_target(&self, task_id: u64, server_id: u64, command: &str) -> TaskLogStatus {
        let log = match self.store.create_task_log(task_id, server_id, Utc::now()).await {
            Ok(log) => log,
            Err(e) => {
                warn!("task {task_id}: could not open log for server {server_id}: {e}");
                return TaskLogStatus::Failed;
            }
        };

        let (status, output) = self.execute_on(server_id, command).await;

        if let Err(e) = self
            .store
            .finish_task_log(log.id, status, output, Utc::now())
            .await
        {
            warn!("task {task_id}: could not finish log {}: {e}", log.id);
        }

        status
    }

    /// Dispatch the command to one server and classify the result.
    async fn execute_on(&self, server_id: u64, command: &str) -> (TaskLogStatus, String) {
        let server = match self.store.get_server(server_id).await {
            Ok(server) => server,
            Err(e) => return (TaskLogStatus::Failed, format!("server lookup failed: {e}")),
        };

        let Some(key_id) = server.ssh_key_id else {
            return (
                TaskLogStatus::Failed,
                format!("server '{}' has no ssh key assigned", server.name),
            );
        };

        let key = match self.store.get_ssh_key(key_id).await {
            Ok(key) => key,
            Err(e) => return (TaskLogStatus::Failed, format!("credential lookup failed: {e}")),
        };

        // The decrypted key lives only in this stack frame and is never
        // written to a log or an output field.
        let credential = match self.vault.decrypt_string(&key.private_key_encrypted) {
            Ok(credential) => credential,
            Err(e) => {
                return (
                    TaskLogStatus::Failed,
                    format!("credential '{}' could not be decrypted: {e}", key.name),
                );
            }
        };

        let endpoint = AgentEndpoint {
            host: server.host,
            port: server.port,
            ssh_user: server.ssh_user,
        };
        let deadline = Duration::from_secs(self.config.target_timeout_secs);

        match timeout(deadline, self.transport.execute(&endpoint, &credential, command)).await {
            Err(_) => (
                TaskLogStatus::Timeout,
                format!("no response within {}s", self.config.target_timeout_secs),
            ),
            Ok(Err(e)) => (TaskLogStatus::Failed, e.to_string()),
            Ok(Ok(output)) => {
                let status = if output.succeeded() {
                    TaskLogStatus::Success
                } else {
                    TaskLogStatus::Failed
                };
                (status, render_output(&output))
            }
        }
    }

    /// Persist the end-of-run state transition.
    ///
    /// The task row is re-read first: a cancellation that raced the run
    /// wins, so a cancelled task stays cancelled and recurring tasks stop
    /// re-arming.
    async fn finish_task(&self, task: &Task, rollup: TaskStatus) -> CoreResult<Task> {
        let mut current = self.store.get_task(task.id).await?;
        let now = Utc::now();
        current.last_run_at = Some(now);

        if current.status == TaskStatus::Cancelled {
            current.next_run_at = None;
            return self.store.update_task(current).await;
        }

        match (current.kind, rollup) {
            // Recurring tasks re-arm regardless of this run's outcome; the
            // per-run result lives in the logs.
            (TaskKind::Recurring, _) if current.cron_expression.is_some() => {
                let expr = current.cron_expression.as_deref().unwrap_or_default();
                match next_occurrence(expr, now)? {
                    Some(next) => {
                        current.status = TaskStatus::Pending;
                        current.next_run_at = Some(next);
                    }
                    // Expression has no future firings left.
                    None => {
                        current.status = TaskStatus::Completed;
                        current.next_run_at = None;
                    }
                }
            }
            (_, rollup) => {
                current.status = rollup;
                current.next_run_at = None;
            }
        }

        debug!(
            "task {} finished run: {:?}, next run {:?}",
            current.id, current.status, current.next_run_at
        );
        self.store.update_task(current).await
    }
}

fn render_output(output: &crate::transport::CommandOutput) -> String {
    let mut rendered = format!("exit code {}", output.exit_code);
    if !output.stdout.is_empty() {
        rendered.push('\n');
        rendered.push_str(&output.stdout);
    }
    if !output.stderr.is_empty() {
        rendered.push('\n');
        rendered.push_str(&output.stderr);
    }
    rendered
}
