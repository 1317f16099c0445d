//! Metric ingestion and alert evaluation
//!
//! `ingest` appends a sample and immediately evaluates every enabled rule
//! whose metric type matches. Evaluation is stateful per (server, rule):
//! the evaluator tracks whether the pair is currently breached and acts
//! only on transitions.
//!
//! ## Transition semantics
//!
//! ```text
//! not breached → breached   : create exactly one open alert
//! breached     → breached   : nothing (bursts never flood alerts)
//! breached     → not breached: auto-resolve the open alert, if enabled
//! disabled rule             : skipped entirely, breach state frozen
//! ```
//!
//! The breach map is a `DashMap` keyed by (server, rule); the entry guard
//! is the compare-and-swap that keeps two concurrent samples for the same
//! server from both observing "not breached" and creating duplicate
//! alerts. Store calls happen after the guard is dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, instrument, trace};

use crate::config::EvaluatorConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::{AlertRule, AlertStatus, MonitorMetric};
use crate::store::{NewAlert, NewMetric, Store};

/// What a single rule evaluation decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    None,
    Fire,
    Clear,
}

#[derive(Clone)]
pub struct AlertEvaluator {
    config: EvaluatorConfig,
    store: Arc<dyn Store>,
    /// (server_id, rule_id) → currently breached
    breaches: Arc<DashMap<(u64, u64), bool>>,
}

impl AlertEvaluator {
    pub fn new(config: EvaluatorConfig, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            store,
            breaches: Arc::new(DashMap::new()),
        }
    }

    /// Append a sample and evaluate all matching enabled rules.
    ///
    /// Malformed input is rejected synchronously before any mutation:
    /// non-finite values and zero-valued timestamps fail with
    /// `InvalidSample`. "No matching rule" is the common no-alert case,
    /// not an error.
    #[instrument(skip(self, sample), fields(server_id = sample.server_id, metric = %sample.metric_type))]
    pub async fn ingest(&self, sample: NewMetric) -> CoreResult<MonitorMetric> {
        if !sample.value.is_finite() {
            return Err(CoreError::InvalidSample(format!(
                "non-finite value {}",
                sample.value
            )));
        }
        if sample.timestamp == DateTime::<Utc>::UNIX_EPOCH {
            return Err(CoreError::InvalidSample(
                "zero-valued timestamp".to_string(),
            ));
        }

        let metric = self.store.insert_metric(sample).await?;

        for rule in self.store.list_alert_rules().await? {
            if !rule.enabled {
                // Disabled rules freeze their breach state rather than
                // clearing it.
                continue;
            }
            if rule.metric_type != metric.metric_type {
                continue;
            }
            if rule.server_id.is_some_and(|scope| scope != metric.server_id) {
                continue;
            }

            self.evaluate_rule(&rule, &metric).await?;
        }

        Ok(metric)
    }

    async fn evaluate_rule(&self, rule: &AlertRule, metric: &MonitorMetric) -> CoreResult<()> {
        let breached = rule.condition.matches(metric.value, rule.threshold);
        let key = (metric.server_id, rule.id);

        // Decide the transition while holding the entry guard, so exactly
        // one concurrent sample observes each edge.
        let (transition, was_breached) = {
            let mut entry = self.breaches.entry(key).or_insert(false);
            let was_breached = *entry;
            *entry = breached;

            let transition = match (was_breached, breached) {
                (false, true) => Transition::Fire,
                (true, false) => Transition::Clear,
                _ => Transition::None,
            };
            (transition, was_breached)
        };

        trace!(
            "rule {} on server {}: value {} vs {:?} {} → {:?}",
            rule.id, metric.server_id, metric.value, rule.condition, rule.threshold, transition
        );

        let result = match transition {
            Transition::Fire => self.fire_alert(rule, metric).await,
            Transition::Clear if self.config.auto_resolve => self.clear_alert(rule, metric).await,
            _ => Ok(()),
        };

        // A failed store write must not consume the edge. Put the prior
        // state back (unless a later sample already moved the entry on) so
        // the next sample re-observes the transition.
        if result.is_err()
            && let Some(mut entry) = self.breaches.get_mut(&key)
            && *entry == breached
        {
            *entry = was_breached;
        }

        result
    }

    /// Create the open alert for a fresh breach, unless one already exists
    /// (the breach map is cold after a restart while alerts persist).
    async fn fire_alert(&self, rule: &AlertRule, metric: &MonitorMetric) -> CoreResult<()> {
        let alert_type = alert_type_for(rule);

        if let Some(existing) = self
            .store
            .find_open_alert(metric.server_id, &alert_type)
            .await?
        {
            trace!(
                "alert {} already open for server {}, not duplicating",
                existing.id, metric.server_id
            );
            return Ok(());
        }

        let alert = self
            .store
            .create_alert(NewAlert {
                server_id: metric.server_id,
                alert_type,
                severity: rule.severity,
                message: format!(
                    "{} breached rule '{}': value {} (threshold {:?} {})",
                    metric.metric_type, rule.name, metric.value, rule.condition, rule.threshold
                ),
                triggered_at: metric.timestamp,
            })
            .await?;

        debug!(
            "alert {} opened: server {} rule {} ({})",
            alert.id, metric.server_id, rule.id, rule.name
        );
        Ok(())
    }

    async fn clear_alert(&self, rule: &AlertRule, metric: &MonitorMetric) -> CoreResult<()> {
        let alert_type = alert_type_for(rule);

        let Some(mut alert) = self
            .store
            .find_open_alert(metric.server_id, &alert_type)
            .await?
        else {
            return Ok(());
        };

        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(Utc::now());
        let alert = self.store.update_alert(alert).await?;

        debug!(
            "alert {} auto-resolved: server {} rule {}",
            alert.id, metric.server_id, rule.id
        );
        Ok(())
    }

    /// Delete samples past the configured retention horizon.
    pub async fn run_retention_cleanup(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let cutoff = now - chrono::Duration::days(self.config.retention_days as i64);
        let deleted = self.store.delete_metrics_before(cutoff).await?;

        if deleted > 0 {
            debug!("retention cleanup deleted {deleted} samples older than {cutoff}");
        }
        Ok(deleted)
    }

    /// Spawn the periodic retention cleanup loop.
    pub fn spawn_retention_cleanup(&self) -> JoinHandle<()> {
        let evaluator = self.clone();
        let period =
            Duration::from_secs(u64::from(evaluator.config.cleanup_interval_hours).max(1) * 3600);

        tokio::spawn(async move {
            debug!("starting retention cleanup loop (interval {period:?})");
            let mut ticker = interval(period);

            loop {
                ticker.tick().await;
                if let Err(e) = evaluator.run_retention_cleanup(Utc::now()).await {
                    error!("retention cleanup failed: {e}");
                }
            }
        })
    }
}

/// De-duplication key of a (rule, server) breach, stored on the alert row
/// so the pair is recoverable from the alert itself.
fn alert_type_for(rule: &AlertRule) -> String {
    format!("{}/{}", rule.metric_type, rule.id)
}
