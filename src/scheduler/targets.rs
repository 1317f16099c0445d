//! Target resolution
//!
//! A task names its targets as explicit server ids plus group ids. Groups
//! nest (each group has at most one parent), so resolution expands every
//! named group depth-first into its member servers and the members of all
//! descendant groups.
//!
//! The parent chain is supposed to be a tree. If data corruption ever
//! turns it into a loop, expansion notices the revisit on the current
//! path and fails with `TargetCycle` instead of spinning.

use std::collections::{BTreeSet, HashSet};

use futures::future::BoxFuture;
use tracing::instrument;

use crate::error::{CoreError, CoreResult};
use crate::model::TargetSpec;
use crate::store::Store;

/// Expand a target spec into a deduplicated, sorted list of server ids.
///
/// Every explicit server and group id is checked for existence; unknown
/// ids fail resolution as a whole.
#[instrument(skip(store, spec))]
pub async fn resolve_targets(store: &dyn Store, spec: &TargetSpec) -> CoreResult<Vec<u64>> {
    let mut servers = BTreeSet::new();

    for &server_id in &spec.server_ids {
        store.get_server(server_id).await?;
        servers.insert(server_id);
    }

    let mut visited = HashSet::new();
    for &group_id in &spec.group_ids {
        let mut path = Vec::new();
        expand_group(store, group_id, &mut path, &mut visited, &mut servers).await?;
    }

    Ok(servers.into_iter().collect())
}

/// Depth-first expansion of one group. `path` holds the groups on the
/// current descent and is what catches cycles; `visited` only skips
/// re-expanding groups a previous descent already finished.
fn expand_group<'a>(
    store: &'a dyn Store,
    group_id: u64,
    path: &'a mut Vec<u64>,
    visited: &'a mut HashSet<u64>,
    servers: &'a mut BTreeSet<u64>,
) -> BoxFuture<'a, CoreResult<()>> {
    Box::pin(async move {
        if path.contains(&group_id) {
            return Err(CoreError::TargetCycle(group_id));
        }
        if !visited.insert(group_id) {
            return Ok(());
        }

        // Existence check; unknown groups fail resolution.
        store.get_group(group_id).await?;

        servers.extend(store.group_members(group_id).await?);

        path.push(group_id);
        for child_id in store.child_groups(group_id).await? {
            expand_group(store, child_id, path, visited, servers).await?;
        }
        path.pop();

        Ok(())
    })
}
