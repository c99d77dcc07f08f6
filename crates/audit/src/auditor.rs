use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tlc_core::config::AuditPublishMode;
use tlc_core::{AuditRecord, AuditStatus, CoverageRecord, PartitionKey, Service};
use tlc_warehouse::WarehousePool;
use tracing::info;

use crate::counts::WarehouseCounts;
use crate::error::AuditError;
use crate::publish::publish;
use crate::reconcile::reconcile;

/// Counts + reconcile + publish against a warehouse pool.
pub struct Auditor {
    pool: Arc<dyn WarehousePool>,
    mode: AuditPublishMode,
}

impl Auditor {
    pub fn new(pool: Arc<dyn WarehousePool>, mode: AuditPublishMode) -> Self {
        Self { pool, mode }
    }

    pub fn mode(&self) -> AuditPublishMode {
        self.mode
    }

    /// Recompute the audit snapshot for `grid` and replace the published one.
    pub async fn reconcile_audit(
        &self,
        grid: &[PartitionKey],
        coverage: &[CoverageRecord],
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let mut services: Vec<Service> = grid.iter().map(|k| k.service()).collect();
        services.sort();
        services.dedup();

        let mut session = self.pool.acquire().await?;
        let counts = WarehouseCounts::fetch(session.as_mut(), &services).await?;
        let records = reconcile(grid, coverage, &counts);
        publish(session.as_mut(), &records, self.mode).await?;

        let summary = StatusSummary::from_records(&records);
        info!(
            partitions = records.len(),
            ok = summary.ok,
            pending = summary.pending,
            missing = summary.missing,
            rows = counts.total_rows(),
            "audit reconciled"
        );
        Ok(records)
    }
}

/// Partition totals per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub ok: usize,
    pub pending: usize,
    pub missing: usize,
}

impl StatusSummary {
    pub fn from_records(records: &[AuditRecord]) -> Self {
        let mut s = Self::default();
        for r in records {
            match r.status {
                AuditStatus::Ok => s.ok += 1,
                AuditStatus::Pending => s.pending += 1,
                AuditStatus::Missing => s.missing += 1,
            }
        }
        s
    }
}
