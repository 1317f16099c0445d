//! Persistence trait definition
//!
//! This module defines the `Store` trait the core consumes from its
//! persistence collaborator: atomic create/read/update for every entity,
//! with the uniqueness and foreign-key semantics the data model implies.
//! Uniqueness violations surface as `CoreError::Conflict`, missing ids as
//! `CoreError::NotFound`.
//!
//! ## Thread Safety
//!
//! Implementations must be `Send + Sync`; each method call is atomic with
//! respect to concurrent callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreResult;
use crate::model::{
    Alert, AlertRule, AlertStatus, Comparison, JsonMap, MonitorMetric, Server, ServerGroup,
    ServerStatus, Severity, SshKey, Task, TaskLog, TaskLogStatus,
};

/// Parameters for registering a server.
#[derive(Debug, Clone)]
pub struct NewServer {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub ssh_user: String,
    pub ssh_key_id: Option<u64>,
    pub created_by: u64,
}

#[derive(Debug, Clone)]
pub struct NewServerGroup {
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<u64>,
}

/// Parameters for storing an SSH key. Private material arrives already
/// encrypted — the store never sees plaintext.
#[derive(Debug, Clone)]
pub struct NewSshKey {
    pub name: String,
    pub public_key: String,
    pub private_key_encrypted: String,
    pub passphrase_encrypted: Option<String>,
    pub created_by: u64,
}

#[derive(Debug, Clone)]
pub struct NewMetric {
    pub server_id: u64,
    pub metric_type: String,
    pub value: f64,
    pub tags: JsonMap,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAlertRule {
    pub name: String,
    pub metric_type: String,
    pub condition: Comparison,
    pub threshold: f64,
    pub severity: Severity,
    pub enabled: bool,
    pub server_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub server_id: u64,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

/// Filter for alert listings. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub server_id: Option<u64>,
    pub status: Option<AlertStatus>,
}

/// Persistence interface consumed by the core components.
#[async_trait]
pub trait Store: Send + Sync {
    // === Servers ===

    /// Register a server. Duplicate names are a conflict.
    async fn create_server(&self, new: NewServer) -> CoreResult<Server>;
    async fn get_server(&self, id: u64) -> CoreResult<Server>;
    async fn list_servers(&self) -> CoreResult<Vec<Server>>;
    /// Full-row update keyed by `server.id`.
    async fn update_server(&self, server: Server) -> CoreResult<Server>;
    async fn delete_server(&self, id: u64) -> CoreResult<()>;

    /// Liveness-tracker-only mutation of status / last-heartbeat / OS info.
    async fn set_server_liveness(
        &self,
        id: u64,
        status: ServerStatus,
        last_heartbeat: Option<DateTime<Utc>>,
        os_info: Option<JsonMap>,
    ) -> CoreResult<()>;

    // === Server groups ===

    async fn create_group(&self, new: NewServerGroup) -> CoreResult<ServerGroup>;
    async fn get_group(&self, id: u64) -> CoreResult<ServerGroup>;
    async fn list_groups(&self) -> CoreResult<Vec<ServerGroup>>;
    async fn update_group(&self, group: ServerGroup) -> CoreResult<ServerGroup>;
    async fn delete_group(&self, id: u64) -> CoreResult<()>;

    /// Add a server to a group (idempotent).
    async fn add_group_member(&self, group_id: u64, server_id: u64) -> CoreResult<()>;
    async fn remove_group_member(&self, group_id: u64, server_id: u64) -> CoreResult<()>;
    /// Direct member servers of a group (no recursion).
    async fn group_members(&self, group_id: u64) -> CoreResult<Vec<u64>>;
    /// Groups whose parent is `parent_id`.
    async fn child_groups(&self, parent_id: u64) -> CoreResult<Vec<u64>>;

    // === SSH keys ===

    async fn create_ssh_key(&self, new: NewSshKey) -> CoreResult<SshKey>;
    async fn get_ssh_key(&self, id: u64) -> CoreResult<SshKey>;
    async fn list_ssh_keys(&self) -> CoreResult<Vec<SshKey>>;
    async fn delete_ssh_key(&self, id: u64) -> CoreResult<()>;

    // === Metrics ===

    /// Append a sample. Samples are immutable once stored.
    async fn insert_metric(&self, new: NewMetric) -> CoreResult<MonitorMetric>;
    /// Most recent samples for a server, newest first.
    async fn latest_metrics(&self, server_id: u64, limit: usize) -> CoreResult<Vec<MonitorMetric>>;
    /// Retention enforcement. Returns the number of samples deleted.
    async fn delete_metrics_before(&self, cutoff: DateTime<Utc>) -> CoreResult<usize>;

    // === Alert rules ===

    async fn create_alert_rule(&self, new: NewAlertRule) -> CoreResult<AlertRule>;
    async fn get_alert_rule(&self, id: u64) -> CoreResult<AlertRule>;
    async fn list_alert_rules(&self) -> CoreResult<Vec<AlertRule>>;
    async fn update_alert_rule(&self, rule: AlertRule) -> CoreResult<AlertRule>;
    async fn delete_alert_rule(&self, id: u64) -> CoreResult<()>;

    // === Alerts ===

    async fn create_alert(&self, new: NewAlert) -> CoreResult<Alert>;
    async fn get_alert(&self, id: u64) -> CoreResult<Alert>;
    async fn list_alerts(&self, filter: AlertFilter) -> CoreResult<Vec<Alert>>;
    async fn update_alert(&self, alert: Alert) -> CoreResult<Alert>;
    /// The unresolved alert for a (server, alert_type) pair, if any.
    /// Acknowledged alerts count as unresolved.
    async fn find_open_alert(&self, server_id: u64, alert_type: &str) -> CoreResult<Option<Alert>>;

    // === Tasks ===

    async fn create_task(&self, task: Task) -> CoreResult<Task>;
    async fn get_task(&self, id: u64) -> CoreResult<Task>;
    async fn list_tasks(&self) -> CoreResult<Vec<Task>>;
    async fn update_task(&self, task: Task) -> CoreResult<Task>;
    /// Atomically flip a `pending` task to `running` and return the
    /// claimed row. `None` means the task is no longer `pending`:
    /// another runner claimed it first, or it was cancelled.
    async fn claim_task(&self, id: u64) -> CoreResult<Option<Task>>;
    /// Pending tasks with `next_run_at <= now`, ordered by `next_run_at`.
    async fn due_tasks(&self, now: DateTime<Utc>) -> CoreResult<Vec<Task>>;

    // === Task logs ===

    /// Create a per-target log row in `Running` state.
    async fn create_task_log(
        &self,
        task_id: u64,
        server_id: u64,
        started_at: DateTime<Utc>,
    ) -> CoreResult<TaskLog>;
    /// Record a target's final status, output and finish time.
    async fn finish_task_log(
        &self,
        log_id: u64,
        status: TaskLogStatus,
        output: String,
        finished_at: DateTime<Utc>,
    ) -> CoreResult<TaskLog>;
    /// All logs for a task, ordered by creation.
    async fn task_logs(&self, task_id: u64) -> CoreResult<Vec<TaskLog>>;
}
