//! Retention pruning for health history.

use chrono::{Duration as ChronoDuration, Utc};

use crate::db::Store;

/// Delete health records older than the retention window.
///
/// Runs once per cycle after all probes. The cutoff comparison is
/// strict: a record stamped exactly at the cutoff is retained. Applies
/// uniformly to all entities, enabled or not.
pub fn prune_history(store: &Store, retention_days: i64) {
    let cutoff = Utc::now() - ChronoDuration::days(retention_days);

    match store.delete_health_before(cutoff) {
        Ok(0) => {}
        Ok(deleted) => {
            tracing::debug!("Pruned {} health records older than {} days", deleted, retention_days);
        }
        Err(e) => {
            tracing::error!("Failed to prune health history: {}", e);
        }
    }
}
