//! In-memory store implementation
//!
//! Backs the full `Store` trait with `RwLock`-guarded maps and monotonic id
//! assignment. Used by the test suites and by embedders that do not need
//! durability; a database-backed implementation lives behind the same trait
//! in the external layer.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::model::{
    Alert, AlertRule, AlertStatus, JsonMap, MonitorMetric, Server, ServerGroup, ServerStatus,
    SshKey, Task, TaskLog, TaskLogStatus, TaskStatus,
};

use super::backend::{
    AlertFilter, NewAlert, NewAlertRule, NewMetric, NewServer, NewServerGroup, NewSshKey, Store,
};

#[derive(Default)]
struct Inner {
    servers: BTreeMap<u64, Server>,
    groups: BTreeMap<u64, ServerGroup>,
    /// group id → member server ids
    memberships: HashMap<u64, BTreeSet<u64>>,
    ssh_keys: BTreeMap<u64, SshKey>,
    metrics: Vec<MonitorMetric>,
    alert_rules: BTreeMap<u64, AlertRule>,
    alerts: BTreeMap<u64, Alert>,
    tasks: BTreeMap<u64, Task>,
    task_logs: BTreeMap<u64, TaskLog>,
    next_id: u64,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Store implementation holding everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_server(&self, new: NewServer) -> CoreResult<Server> {
        let mut inner = self.inner.write().await;

        if inner.servers.values().any(|s| s.name == new.name) {
            return Err(CoreError::Conflict(format!(
                "server name '{}' already exists",
                new.name
            )));
        }

        if let Some(key_id) = new.ssh_key_id
            && !inner.ssh_keys.contains_key(&key_id)
        {
            return Err(CoreError::NotFound("ssh key", key_id));
        }

        let now = Utc::now();
        let server = Server {
            id: inner.next_id(),
            name: new.name,
            host: new.host,
            port: new.port,
            ssh_user: new.ssh_user,
            ssh_key_id: new.ssh_key_id,
            status: ServerStatus::Unknown,
            os_info: JsonMap::new(),
            last_heartbeat: None,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };

        inner.servers.insert(server.id, server.clone());
        debug!("registered server {} ({})", server.id, server.name);
        Ok(server)
    }

    async fn get_server(&self, id: u64) -> CoreResult<Server> {
        self.inner
            .read()
            .await
            .servers
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("server", id))
    }

    async fn list_servers(&self) -> CoreResult<Vec<Server>> {
        Ok(self.inner.read().await.servers.values().cloned().collect())
    }

    async fn update_server(&self, mut server: Server) -> CoreResult<Server> {
        let mut inner = self.inner.write().await;

        if !inner.servers.contains_key(&server.id) {
            return Err(CoreError::NotFound("server", server.id));
        }

        if inner
            .servers
            .values()
            .any(|s| s.id != server.id && s.name == server.name)
        {
            return Err(CoreError::Conflict(format!(
                "server name '{}' already exists",
                server.name
            )));
        }

        server.updated_at = Utc::now();
        inner.servers.insert(server.id, server.clone());
        Ok(server)
    }

    async fn delete_server(&self, id: u64) -> CoreResult<()> {
        let mut inner = self.inner.write().await;

        inner
            .servers
            .remove(&id)
            .ok_or(CoreError::NotFound("server", id))?;

        for members in inner.memberships.values_mut() {
            members.remove(&id);
        }

        Ok(())
    }

    async fn set_server_liveness(
        &self,
        id: u64,
        status: ServerStatus,
        last_heartbeat: Option<DateTime<Utc>>,
        os_info: Option<JsonMap>,
    ) -> CoreResult<()> {
        let mut inner = self.inner.write().await;

        let server = inner
            .servers
            .get_mut(&id)
            .ok_or(CoreError::NotFound("server", id))?;

        server.status = status;
        if let Some(seen) = last_heartbeat {
            server.last_heartbeat = Some(seen);
        }
        if let Some(info) = os_info {
            server.os_info = info;
        }
        server.updated_at = Utc::now();

        Ok(())
    }

    async fn create_group(&self, new: NewServerGroup) -> CoreResult<ServerGroup> {
        let mut inner = self.inner.write().await;

        if let Some(parent_id) = new.parent_id
            && !inner.groups.contains_key(&parent_id)
        {
            return Err(CoreError::NotFound("server group", parent_id));
        }

        let group = ServerGroup {
            id: inner.next_id(),
            name: new.name,
            description: new.description,
            parent_id: new.parent_id,
            created_at: Utc::now(),
        };

        inner.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn get_group(&self, id: u64) -> CoreResult<ServerGroup> {
        self.inner
            .read()
            .await
            .groups
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("server group", id))
    }

    async fn list_groups(&self) -> CoreResult<Vec<ServerGroup>> {
        Ok(self.inner.read().await.groups.values().cloned().collect())
    }

    async fn update_group(&self, group: ServerGroup) -> CoreResult<ServerGroup> {
        let mut inner = self.inner.write().await;

        if !inner.groups.contains_key(&group.id) {
            return Err(CoreError::NotFound("server group", group.id));
        }

        if let Some(parent_id) = group.parent_id
            && !inner.groups.contains_key(&parent_id)
        {
            return Err(CoreError::NotFound("server group", parent_id));
        }

        inner.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn delete_group(&self, id: u64) -> CoreResult<()> {
        let mut inner = self.inner.write().await;

        inner
            .groups
            .remove(&id)
            .ok_or(CoreError::NotFound("server group", id))?;

        inner.memberships.remove(&id);

        // Orphaned children become roots.
        for group in inner.groups.values_mut() {
            if group.parent_id == Some(id) {
                group.parent_id = None;
            }
        }

        Ok(())
    }

    async fn add_group_member(&self, group_id: u64, server_id: u64) -> CoreResult<()> {
        let mut inner = self.inner.write().await;

        if !inner.groups.contains_key(&group_id) {
            return Err(CoreError::NotFound("server group", group_id));
        }
        if !inner.servers.contains_key(&server_id) {
            return Err(CoreError::NotFound("server", server_id));
        }

        inner
            .memberships
            .entry(group_id)
            .or_default()
            .insert(server_id);

        Ok(())
    }

    async fn remove_group_member(&self, group_id: u64, server_id: u64) -> CoreResult<()> {
        let mut inner = self.inner.write().await;

        if !inner.groups.contains_key(&group_id) {
            return Err(CoreError::NotFound("server group", group_id));
        }

        if let Some(members) = inner.memberships.get_mut(&group_id) {
            members.remove(&server_id);
        }

        Ok(())
    }

    async fn group_members(&self, group_id: u64) -> CoreResult<Vec<u64>> {
        let inner = self.inner.read().await;

        if !inner.groups.contains_key(&group_id) {
            return Err(CoreError::NotFound("server group", group_id));
        }

        Ok(inner
            .memberships
            .get(&group_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn child_groups(&self, parent_id: u64) -> CoreResult<Vec<u64>> {
        let inner = self.inner.read().await;

        Ok(inner
            .groups
            .values()
            .filter(|g| g.parent_id == Some(parent_id))
            .map(|g| g.id)
            .collect())
    }

    async fn create_ssh_key(&self, new: NewSshKey) -> CoreResult<SshKey> {
        let mut inner = self.inner.write().await;

        if inner.ssh_keys.values().any(|k| k.name == new.name) {
            return Err(CoreError::Conflict(format!(
                "ssh key name '{}' already exists",
                new.name
            )));
        }

        let key = SshKey {
            id: inner.next_id(),
            name: new.name,
            public_key: new.public_key,
            private_key_encrypted: new.private_key_encrypted,
            passphrase_encrypted: new.passphrase_encrypted,
            created_by: new.created_by,
            created_at: Utc::now(),
        };

        inner.ssh_keys.insert(key.id, key.clone());
        Ok(key)
    }

    async fn get_ssh_key(&self, id: u64) -> CoreResult<SshKey> {
        self.inner
            .read()
            .await
            .ssh_keys
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("ssh key", id))
    }

    async fn list_ssh_keys(&self) -> CoreResult<Vec<SshKey>> {
        Ok(self.inner.read().await.ssh_keys.values().cloned().collect())
    }

    async fn delete_ssh_key(&self, id: u64) -> CoreResult<()> {
        let mut inner = self.inner.write().await;

        if inner.servers.values().any(|s| s.ssh_key_id == Some(id)) {
            return Err(CoreError::Conflict(format!(
                "ssh key {id} is still referenced by a server"
            )));
        }

        inner
            .ssh_keys
            .remove(&id)
            .ok_or(CoreError::NotFound("ssh key", id))?;
        Ok(())
    }

    async fn insert_metric(&self, new: NewMetric) -> CoreResult<MonitorMetric> {
        let mut inner = self.inner.write().await;

        if !inner.servers.contains_key(&new.server_id) {
            return Err(CoreError::NotFound("server", new.server_id));
        }

        let metric = MonitorMetric {
            id: inner.next_id(),
            server_id: new.server_id,
            metric_type: new.metric_type,
            value: new.value,
            tags: new.tags,
            timestamp: new.timestamp,
        };

        inner.metrics.push(metric.clone());
        Ok(metric)
    }

    async fn latest_metrics(&self, server_id: u64, limit: usize) -> CoreResult<Vec<MonitorMetric>> {
        let inner = self.inner.read().await;

        Ok(inner
            .metrics
            .iter()
            .rev()
            .filter(|m| m.server_id == server_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_metrics_before(&self, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        let mut inner = self.inner.write().await;

        let before = inner.metrics.len();
        inner.metrics.retain(|m| m.timestamp >= cutoff);
        Ok(before - inner.metrics.len())
    }

    async fn create_alert_rule(&self, new: NewAlertRule) -> CoreResult<AlertRule> {
        let mut inner = self.inner.write().await;

        let rule = AlertRule {
            id: inner.next_id(),
            name: new.name,
            metric_type: new.metric_type,
            condition: new.condition,
            threshold: new.threshold,
            severity: new.severity,
            enabled: new.enabled,
            server_id: new.server_id,
            created_at: Utc::now(),
        };

        inner.alert_rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn get_alert_rule(&self, id: u64) -> CoreResult<AlertRule> {
        self.inner
            .read()
            .await
            .alert_rules
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("alert rule", id))
    }

    async fn list_alert_rules(&self) -> CoreResult<Vec<AlertRule>> {
        Ok(self
            .inner
            .read()
            .await
            .alert_rules
            .values()
            .cloned()
            .collect())
    }

    async fn update_alert_rule(&self, rule: AlertRule) -> CoreResult<AlertRule> {
        let mut inner = self.inner.write().await;

        if !inner.alert_rules.contains_key(&rule.id) {
            return Err(CoreError::NotFound("alert rule", rule.id));
        }

        inner.alert_rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn delete_alert_rule(&self, id: u64) -> CoreResult<()> {
        self.inner
            .write()
            .await
            .alert_rules
            .remove(&id)
            .map(|_| ())
            .ok_or(CoreError::NotFound("alert rule", id))
    }

    async fn create_alert(&self, new: NewAlert) -> CoreResult<Alert> {
        let mut inner = self.inner.write().await;

        let alert = Alert {
            id: inner.next_id(),
            server_id: new.server_id,
            alert_type: new.alert_type,
            severity: new.severity,
            message: new.message,
            status: AlertStatus::Open,
            triggered_at: new.triggered_at,
            resolved_at: None,
        };

        inner.alerts.insert(alert.id, alert.clone());
        Ok(alert)
    }

    async fn get_alert(&self, id: u64) -> CoreResult<Alert> {
        self.inner
            .read()
            .await
            .alerts
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("alert", id))
    }

    async fn list_alerts(&self, filter: AlertFilter) -> CoreResult<Vec<Alert>> {
        let inner = self.inner.read().await;

        Ok(inner
            .alerts
            .values()
            .filter(|a| filter.server_id.is_none_or(|id| a.server_id == id))
            .filter(|a| filter.status.is_none_or(|status| a.status == status))
            .cloned()
            .collect())
    }

    async fn update_alert(&self, alert: Alert) -> CoreResult<Alert> {
        let mut inner = self.inner.write().await;

        if !inner.alerts.contains_key(&alert.id) {
            return Err(CoreError::NotFound("alert", alert.id));
        }

        inner.alerts.insert(alert.id, alert.clone());
        Ok(alert)
    }

    async fn find_open_alert(&self, server_id: u64, alert_type: &str) -> CoreResult<Option<Alert>> {
        let inner = self.inner.read().await;

        Ok(inner
            .alerts
            .values()
            .find(|a| {
                a.server_id == server_id
                    && a.alert_type == alert_type
                    && a.status != AlertStatus::Resolved
            })
            .cloned())
    }

    async fn create_task(&self, mut task: Task) -> CoreResult<Task> {
        let mut inner = self.inner.write().await;

        task.id = inner.next_id();
        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: u64) -> CoreResult<Task> {
        self.inner
            .read()
            .await
            .tasks
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("task", id))
    }

    async fn list_tasks(&self) -> CoreResult<Vec<Task>> {
        Ok(self.inner.read().await.tasks.values().cloned().collect())
    }

    async fn update_task(&self, task: Task) -> CoreResult<Task> {
        let mut inner = self.inner.write().await;

        if !inner.tasks.contains_key(&task.id) {
            return Err(CoreError::NotFound("task", task.id));
        }

        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn claim_task(&self, id: u64) -> CoreResult<Option<Task>> {
        let mut inner = self.inner.write().await;

        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(CoreError::NotFound("task", id))?;

        if task.status != TaskStatus::Pending {
            return Ok(None);
        }

        task.status = TaskStatus::Running;
        Ok(Some(task.clone()))
    }

    async fn due_tasks(&self, now: DateTime<Utc>) -> CoreResult<Vec<Task>> {
        let inner = self.inner.read().await;

        let mut due: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.next_run_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();

        due.sort_by_key(|t| t.next_run_at);
        Ok(due)
    }

    async fn create_task_log(
        &self,
        task_id: u64,
        server_id: u64,
        started_at: DateTime<Utc>,
    ) -> CoreResult<TaskLog> {
        let mut inner = self.inner.write().await;

        if !inner.tasks.contains_key(&task_id) {
            return Err(CoreError::NotFound("task", task_id));
        }

        let log = TaskLog {
            id: inner.next_id(),
            task_id,
            server_id,
            status: TaskLogStatus::Running,
            output: String::new(),
            started_at,
            finished_at: None,
        };

        inner.task_logs.insert(log.id, log.clone());
        Ok(log)
    }

    async fn finish_task_log(
        &self,
        log_id: u64,
        status: TaskLogStatus,
        output: String,
        finished_at: DateTime<Utc>,
    ) -> CoreResult<TaskLog> {
        let mut inner = self.inner.write().await;

        let log = inner
            .task_logs
            .get_mut(&log_id)
            .ok_or(CoreError::NotFound("task log", log_id))?;

        log.status = status;
        log.output = output;
        log.finished_at = Some(finished_at);

        Ok(log.clone())
    }

    async fn task_logs(&self, task_id: u64) -> CoreResult<Vec<TaskLog>> {
        let inner = self.inner.read().await;

        Ok(inner
            .task_logs
            .values()
            .filter(|l| l.task_id == task_id)
            .cloned()
            .collect())
    }
}
