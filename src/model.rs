//! Core entity definitions
//!
//! These are the shapes the external (web/ORM) layer persists and reads.
//! Long-lived entities (`Server`, `ServerGroup`, `SshKey`) are created and
//! deleted through the [`Hub`](crate::hub::Hub); `Task`, `TaskLog`, `Alert`
//! and `MonitorMetric` rows are produced and consumed by the core itself.
//!
//! ## Mutation ownership
//!
//! - `Server::status` / `Server::last_heartbeat` are mutated only by the
//!   liveness tracker, never by the task executor.
//! - `MonitorMetric` rows are append-only and immutable once stored.
//! - `TaskLog` rows transition `Running → {Success, Failed, Timeout}` exactly
//!   once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form JSON object (OS info snapshots, metric tags).
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Liveness classification of a managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Online,
    Offline,
    /// Never seen a heartbeat yet.
    Unknown,
    Error,
}

/// A managed remote server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: u64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub ssh_user: String,
    /// Credential used to reach this server, if one is assigned.
    pub ssh_key_id: Option<u64>,
    pub status: ServerStatus,
    /// OS information snapshot reported by the agent's last heartbeat.
    pub os_info: JsonMap,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Owning user (reference only, no ownership transfer).
    pub created_by: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named group of servers, optionally nested under a parent group.
///
/// The parent chain forms a tree, not a DAG: a group has at most one parent
/// and the chain must stay acyclic. Target resolution detects and rejects
/// cycles rather than looping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerGroup {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// An SSH credential.
///
/// The private key and passphrase are stored only as vault ciphertext
/// tokens. Plaintext key material must never be persisted or logged, so the
/// encrypted fields are skipped on serialization (they never leave the
/// process through an API response).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKey {
    pub id: u64,
    pub name: String,
    pub public_key: String,
    #[serde(skip_serializing)]
    pub private_key_encrypted: String,
    #[serde(skip_serializing)]
    pub passphrase_encrypted: Option<String>,
    pub created_by: u64,
    pub created_at: DateTime<Utc>,
}

/// A single timestamped metric sample reported by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorMetric {
    pub id: u64,
    pub server_id: u64,
    pub metric_type: String,
    pub value: f64,
    pub tags: JsonMap,
    pub timestamp: DateTime<Utc>,
}

/// Comparison operator of an [`AlertRule`].
///
/// `Eq` is exact float equality, not tolerance-based; callers needing
/// tolerance must pre-round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
}

impl Comparison {
    /// Does `value` breach `threshold` under this operator?
    pub fn matches(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Lt => value < threshold,
            Comparison::Eq => value == threshold,
            Comparison::Gte => value >= threshold,
            Comparison::Lte => value <= threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A stateless threshold rule.
///
/// Applies to every server reporting `metric_type` unless scoped to a
/// single server via `server_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: u64,
    pub name: String,
    pub metric_type: String,
    pub condition: Comparison,
    pub threshold: f64,
    pub severity: Severity,
    /// Disabled rules are skipped entirely, freezing their breach state.
    pub enabled: bool,
    /// Optional per-server scope.
    pub server_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

/// An alert raised by the evaluator when a rule transitions into breach.
///
/// De-duplication key is (server, rule): at most one open alert exists per
/// pair, encoded in `alert_type` as `"{metric_type}/{rule_id}"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub server_id: u64,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub status: AlertStatus,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Scheduling policy of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Dispatched immediately upon activation.
    Once,
    /// Dispatched once at `next_run_at`, then terminal.
    Scheduled,
    /// Re-fired per cron expression until explicitly cancelled.
    Recurring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states are never left again by the scheduler.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Target specification of a task: explicit server ids and/or group ids.
///
/// Resolution to a concrete server set happens at dispatch time, not at
/// creation time, so group membership changes are honored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSpec {
    #[serde(default)]
    pub server_ids: Vec<u64>,
    #[serde(default)]
    pub group_ids: Vec<u64>,
}

impl TargetSpec {
    pub fn is_empty(&self) -> bool {
        self.server_ids.is_empty() && self.group_ids.is_empty()
    }
}

/// An administrative task dispatched to one or many servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub name: String,
    pub kind: TaskKind,
    pub targets: TargetSpec,
    pub command: String,
    pub cron_expression: Option<String>,
    pub status: TaskStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_by: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskLogStatus {
    Running,
    Success,
    Failed,
    Timeout,
}

/// One row per (task run, target server) — the unit of partial failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLog {
    pub id: u64,
    pub task_id: u64,
    pub server_id: u64,
    pub status: TaskLogStatus,
    pub output: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
