//! Operation sweep
//!
//! An `in progress` operation whose job died with the process would block its
//! instance forever. The sweep fails such operations once they outlive the
//! TTL, and drops finished operations of instances that no longer exist.

use super::Scheduler;
use crate::storage::StorageResult;
use chrono::{Duration, Utc};
use osb_types::OperationState;
use std::collections::HashSet;

pub const EXPIRED_DESCRIPTION: &str = "operation expired before completion";

/// What one sweep changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub pruned: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired == 0 && self.pruned == 0
    }
}

impl Scheduler {
    /// Expire stale operations and prune finished ones of deleted instances
    pub async fn sweep(&self) -> StorageResult<SweepReport> {
        let now = Utc::now();
        let ttl = Duration::seconds(self.config.operation_ttl_secs as i64);
        let retention = Duration::seconds(self.config.terminal_retention_secs as i64);

        let live: HashSet<String> = self
            .store
            .list_instances()
            .await?
            .into_iter()
            .map(|i| i.instance_id)
            .collect();

        let mut report = SweepReport::default();
        for operation in self.store.list_operations().await? {
            let age = now - operation.updated_at;

            if operation.state == OperationState::InProgress {
                // The job may finish after the listing; only a still-stale
                // pending row is expired
                if age >= ttl
                    && self
                        .store
                        .expire_operation(&operation.operation_id, now - ttl, EXPIRED_DESCRIPTION)
                        .await?
                {
                    tracing::warn!(
                        operation_id = %operation.operation_id,
                        instance_id = %operation.instance_id,
                        "Expired stale operation"
                    );
                    report.expired += 1;
                }
            } else if age >= retention && !live.contains(&operation.instance_id) {
                if self.store.delete_operation(&operation.operation_id).await? {
                    tracing::debug!(operation_id = %operation.operation_id, "Pruned operation");
                    report.pruned += 1;
                }
            }
        }

        Ok(report)
    }
}
