//! Store test doubles
//!
//! [`FaultyStore`] wraps another store, optionally sleeping before every
//! call and failing `create_alert` on demand. The latency widens race
//! windows the in-memory store is otherwise too fast to expose; the
//! injected failures exercise persistence-error paths it never hits on
//! its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};
use crate::model::{
    Alert, AlertRule, JsonMap, MonitorMetric, Server, ServerGroup, ServerStatus, SshKey, Task,
    TaskLog, TaskLogStatus,
};

use super::backend::{
    AlertFilter, NewAlert, NewAlertRule, NewMetric, NewServer, NewServerGroup, NewSshKey, Store,
};

pub struct FaultyStore {
    inner: Arc<dyn Store>,
    latency: Duration,
    /// Remaining `create_alert` calls to fail.
    create_alert_faults: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self::with_latency(inner, Duration::ZERO)
    }

    pub fn with_latency(inner: Arc<dyn Store>, latency: Duration) -> Self {
        Self {
            inner,
            latency,
            create_alert_faults: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_create_alert(&self) {
        self.create_alert_faults.fetch_add(1, Ordering::SeqCst);
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn create_server(&self, new: NewServer) -> CoreResult<Server> {
        self.pause().await;
        self.inner.create_server(new).await
    }

    async fn get_server(&self, id: u64) -> CoreResult<Server> {
        self.pause().await;
        self.inner.get_server(id).await
    }

    async fn list_servers(&self) -> CoreResult<Vec<Server>> {
        self.pause().await;
        self.inner.list_servers().await
    }

    async fn update_server(&self, server: Server) -> CoreResult<Server> {
        self.pause().await;
        self.inner.update_server(server).await
    }

    async fn delete_server(&self, id: u64) -> CoreResult<()> {
        self.pause().await;
        self.inner.delete_server(id).await
    }

    async fn set_server_liveness(
        &self,
        id: u64,
        status: ServerStatus,
        last_heartbeat: Option<DateTime<Utc>>,
        os_info: Option<JsonMap>,
    ) -> CoreResult<()> {
        self.pause().await;
        self.inner
            .set_server_liveness(id, status, last_heartbeat, os_info)
            .await
    }

    async fn create_group(&self, new: NewServerGroup) -> CoreResult<ServerGroup> {
        self.pause().await;
        self.inner.create_group(new).await
    }

    async fn get_group(&self, id: u64) -> CoreResult<ServerGroup> {
        self.pause().await;
        self.inner.get_group(id).await
    }

    async fn list_groups(&self) -> CoreResult<Vec<ServerGroup>> {
        self.pause().await;
        self.inner.list_groups().await
    }

    async fn update_group(&self, group: ServerGroup) -> CoreResult<ServerGroup> {
        self.pause().await;
        self.inner.update_group(group).await
    }

    async fn delete_group(&self, id: u64) -> CoreResult<()> {
        self.pause().await;
        self.inner.delete_group(id).await
    }

    async fn add_group_member(&self, group_id: u64, server_id: u64) -> CoreResult<()> {
        self.pause().await;
        self.inner.add_group_member(group_id, server_id).await
    }

    async fn remove_group_member(&self, group_id: u64, server_id: u64) -> CoreResult<()> {
        self.pause().await;
        self.inner.remove_group_member(group_id, server_id).await
    }

    async fn group_members(&self, group_id: u64) -> CoreResult<Vec<u64>> {
        self.pause().await;
        self.inner.group_members(group_id).await
    }

    async fn child_groups(&self, parent_id: u64) -> CoreResult<Vec<u64>> {
        self.pause().await;
        self.inner.child_groups(parent_id).await
    }

    async fn create_ssh_key(&self, new: NewSshKey) -> CoreResult<SshKey> {
        self.pause().await;
        self.inner.create_ssh_key(new).await
    }

    async fn get_ssh_key(&self, id: u64) -> CoreResult<SshKey> {
        self.pause().await;
        self.inner.get_ssh_key(id).await
    }

    async fn list_ssh_keys(&self) -> CoreResult<Vec<SshKey>> {
        self.pause().await;
        self.inner.list_ssh_keys().await
    }

    async fn delete_ssh_key(&self, id: u64) -> CoreResult<()> {
        self.pause().await;
        self.inner.delete_ssh_key(id).await
    }

    async fn insert_metric(&self, new: NewMetric) -> CoreResult<MonitorMetric> {
        self.pause().await;
        self.inner.insert_metric(new).await
    }

    async fn latest_metrics(&self, server_id: u64, limit: usize) -> CoreResult<Vec<MonitorMetric>> {
        self.pause().await;
        self.inner.latest_metrics(server_id, limit).await
    }

    async fn delete_metrics_before(&self, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        self.pause().await;
        self.inner.delete_metrics_before(cutoff).await
    }

    async fn create_alert_rule(&self, new: NewAlertRule) -> CoreResult<AlertRule> {
        self.pause().await;
        self.inner.create_alert_rule(new).await
    }

    async fn get_alert_rule(&self, id: u64) -> CoreResult<AlertRule> {
        self.pause().await;
        self.inner.get_alert_rule(id).await
    }

    async fn list_alert_rules(&self) -> CoreResult<Vec<AlertRule>> {
        self.pause().await;
        self.inner.list_alert_rules().await
    }

    async fn update_alert_rule(&self, rule: AlertRule) -> CoreResult<AlertRule> {
        self.pause().await;
        self.inner.update_alert_rule(rule).await
    }

    async fn delete_alert_rule(&self, id: u64) -> CoreResult<()> {
        self.pause().await;
        self.inner.delete_alert_rule(id).await
    }

    async fn create_alert(&self, new: NewAlert) -> CoreResult<Alert> {
        self.pause().await;

        let mut remaining = self.create_alert_faults.load(Ordering::SeqCst);
        while remaining > 0 {
            match self.create_alert_faults.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Err(CoreError::Store("injected alert insert failure".into()));
                }
                Err(current) => remaining = current,
            }
        }

        self.inner.create_alert(new).await
    }

    async fn get_alert(&self, id: u64) -> CoreResult<Alert> {
        self.pause().await;
        self.inner.get_alert(id).await
    }

    async fn list_alerts(&self, filter: AlertFilter) -> CoreResult<Vec<Alert>> {
        self.pause().await;
        self.inner.list_alerts(filter).await
    }

    async fn update_alert(&self, alert: Alert) -> CoreResult<Alert> {
        self.pause().await;
        self.inner.update_alert(alert).await
    }

    async fn find_open_alert(&self, server_id: u64, alert_type: &str) -> CoreResult<Option<Alert>> {
        self.pause().await;
        self.inner.find_open_alert(server_id, alert_type).await
    }

    async fn create_task(&self, task: Task) -> CoreResult<Task> {
        self.pause().await;
        self.inner.create_task(task).await
    }

    async fn get_task(&self, id: u64) -> CoreResult<Task> {
        self.pause().await;
        self.inner.get_task(id).await
    }

    async fn list_tasks(&self) -> CoreResult<Vec<Task>> {
        self.pause().await;
        self.inner.list_tasks().await
    }

    async fn update_task(&self, task: Task) -> CoreResult<Task> {
        self.pause().await;
        self.inner.update_task(task).await
    }

    async fn claim_task(&self, id: u64) -> CoreResult<Option<Task>> {
        self.pause().await;
        self.inner.claim_task(id).await
    }

    async fn due_tasks(&self, now: DateTime<Utc>) -> CoreResult<Vec<Task>> {
        self.pause().await;
        self.inner.due_tasks(now).await
    }

    async fn create_task_log(
        &self,
        task_id: u64,
        server_id: u64,
        started_at: DateTime<Utc>,
    ) -> CoreResult<TaskLog> {
        self.pause().await;
        self.inner.create_task_log(task_id, server_id, started_at).await
    }

    async fn finish_task_log(
        &self,
        log_id: u64,
        status: TaskLogStatus,
        output: String,
        finished_at: DateTime<Utc>,
    ) -> CoreResult<TaskLog> {
        self.pause().await;
        self.inner
            .finish_task_log(log_id, status, output, finished_at)
            .await
    }

    async fn task_logs(&self, task_id: u64) -> CoreResult<Vec<TaskLog>> {
        self.pause().await;
        self.inner.task_logs(task_id).await
    }
}
