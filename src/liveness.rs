//! Liveness tracker
//!
//! Classifies every server as online/offline from heartbeat arrival times.
//! Liveness is derived from elapsed time, not from a push-only flag: agents
//! can crash without sending a final "going offline" notice, so a
//! background sweep demotes any server whose last heartbeat is older than
//! the configured threshold.
//!
//! ## State machine (per server)
//!
//! ```text
//! unknown ──heartbeat──▶ online ◀──heartbeat── offline
//!                          │
//!                          └──sweep (last_heartbeat too old)──▶ offline
//! ```
//!
//! Re-marking an already-offline server is a no-op, so the sweep is
//! idempotent. Per-server state lives in a sharded `DashMap` — there is no
//! single lock covering the whole fleet, and readers (scheduler, evaluator)
//! never block waiting for a fresher heartbeat: staleness is bounded by the
//! sweep interval and that is acceptable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, instrument, trace, warn};

use crate::config::LivenessConfig;
use crate::error::CoreResult;
use crate::model::{JsonMap, ServerStatus};
use crate::store::Store;

/// Point-in-time liveness of one server.
#[derive(Debug, Clone, Copy)]
pub struct LivenessState {
    pub server_id: u64,
    pub status: ServerStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct LivenessTracker {
    config: LivenessConfig,
    store: Arc<dyn Store>,
    states: Arc<DashMap<u64, LivenessState>>,
}

impl LivenessTracker {
    pub fn new(config: LivenessConfig, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            store,
            states: Arc::new(DashMap::new()),
        }
    }

    /// Seed the in-memory map from the persisted server table.
    ///
    /// Called once at startup so servers registered before a restart are
    /// covered by the sweep without waiting for their next heartbeat.
    pub async fn prime(&self) -> CoreResult<()> {
        for server in self.store.list_servers().await? {
            self.states.insert(
                server.id,
                LivenessState {
                    server_id: server.id,
                    status: server.status,
                    last_heartbeat: server.last_heartbeat,
                },
            );
        }

        debug!("primed liveness state for {} servers", self.states.len());
        Ok(())
    }

    /// Record a heartbeat from an agent.
    ///
    /// Transitions the server to online (from any state) and updates the
    /// last-heartbeat timestamp and OS info snapshot. Unknown server ids
    /// are rejected — registration is an explicit operation, not a side
    /// effect of a stray heartbeat.
    #[instrument(skip(self, os_info))]
    pub async fn heartbeat(
        &self,
        server_id: u64,
        timestamp: DateTime<Utc>,
        os_info: Option<JsonMap>,
    ) -> CoreResult<()> {
        // Existence check up front so a bad id never pollutes the map.
        self.store.get_server(server_id).await?;

        // Entry access is the per-server critical section.
        self.states.insert(
            server_id,
            LivenessState {
                server_id,
                status: ServerStatus::Online,
                last_heartbeat: Some(timestamp),
            },
        );

        self.store
            .set_server_liveness(server_id, ServerStatus::Online, Some(timestamp), os_info)
            .await?;

        trace!("heartbeat recorded for server {server_id}");
        Ok(())
    }

    /// Current classification of a server. Never blocks on a heartbeat.
    pub fn status_of(&self, server_id: u64) -> ServerStatus {
        self.states
            .get(&server_id)
            .map(|s| s.status)
            .unwrap_or(ServerStatus::Unknown)
    }

    /// Point-in-time snapshot of the whole fleet. Tolerates staleness.
    pub fn snapshot(&self) -> Vec<LivenessState> {
        self.states.iter().map(|entry| *entry.value()).collect()
    }

    /// One sweep pass: demote servers whose last heartbeat is older than
    /// the offline threshold. Returns how many servers transitioned.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let threshold = chrono::Duration::seconds(self.config.offline_threshold_secs as i64);
        let mut transitioned = 0;

        // Collect ids first so the store calls below run without holding
        // any shard lock.
        let stale: Vec<u64> = self
            .states
            .iter()
            .filter(|entry| entry.status == ServerStatus::Online)
            .filter(|entry| match entry.last_heartbeat {
                Some(seen) => now - seen > threshold,
                None => true,
            })
            .map(|entry| entry.server_id)
            .collect();

        for server_id in stale {
            // Re-check under the entry lock: a heartbeat may have landed
            // between the scan and now.
            let demoted = match self.states.get_mut(&server_id) {
                Some(mut state) => {
                    let still_stale = state.status == ServerStatus::Online
                        && state.last_heartbeat.is_none_or(|seen| now - seen > threshold);
                    if still_stale {
                        state.status = ServerStatus::Offline;
                    }
                    still_stale
                }
                None => false,
            };

            if demoted {
                transitioned += 1;
                debug!("server {server_id} marked offline (heartbeat timeout)");

                if let Err(e) = self
                    .store
                    .set_server_liveness(server_id, ServerStatus::Offline, None, None)
                    .await
                {
                    warn!("failed to persist offline transition for server {server_id}: {e}");
                }
            }
        }

        transitioned
    }

    /// Spawn the background sweep loop.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let tracker = self.clone();
        let period = Duration::from_secs(tracker.config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            debug!("starting liveness sweeper (interval {period:?})");
            let mut ticker = interval(period);

            loop {
                ticker.tick().await;
                let transitioned = tracker.sweep(Utc::now()).await;
                if transitioned > 0 {
                    debug!("sweep transitioned {transitioned} servers to offline");
                }
            }
        })
    }
}
