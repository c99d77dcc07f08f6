use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tlc_core::config::LoaderConfig;
use tlc_core::{CancelSignal, CoverageRecord, FileError, LoadResult, PartitionKey};
use tlc_warehouse::{Statement, Warehouse, WarehouseError, WarehousePool};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::batches::RowGroupBatches;
use crate::error::LoadError;
use crate::fetch::{stage, SourceFetcher};
use crate::locks::PartitionLocks;
use crate::normalize::{BatchNormalizer, BatchStamp};

/// How one source file ended.
enum FileOutcome {
    Done,
    Cancelled,
}

/// Delete-then-insert loader for whole partitions.
pub struct BulkLoader {
    pool: Arc<dyn WarehousePool>,
    fetcher: Arc<dyn SourceFetcher>,
    config: LoaderConfig,
    locks: PartitionLocks,
}

impl BulkLoader {
    pub fn new(
        pool: Arc<dyn WarehousePool>,
        fetcher: Arc<dyn SourceFetcher>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            pool,
            fetcher,
            config,
            locks: PartitionLocks::new(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Acquire a pooled session and make sure it answers. A session that
    /// fails its ping is dropped and replaced once.
    async fn session(&self) -> Result<Box<dyn Warehouse>, WarehouseError> {
        let mut session = self.pool.acquire().await?;
        if let Err(e) = session.ping().await {
            warn!(error = %e, "stale warehouse connection, replacing");
            drop(session);
            session = self.pool.acquire().await?;
            session.ping().await?;
        }
        Ok(session)
    }

    /// Load one partition from its source files.
    ///
    /// Never returns an error: partition-fatal failures land in
    /// `LoadResult::error`, per-file failures in `LoadResult::file_errors`.
    pub async fn load_partition(
        &self,
        key: &PartitionKey,
        sources: &[String],
        cancel: &CancelSignal,
    ) -> LoadResult {
        let label = key.label();
        if cancel.is_cancelled() {
            info!("[{label}] cancelled before load");
            return LoadResult::cancelled(*key);
        }

        let _guard = self.locks.lock(key).await;
        info!(files = sources.len(), "[{label}] load started");

        let mut session = match self.session().await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "[{label}] no warehouse connection");
                return LoadResult::failed(*key, format!("connection failed: {e}"));
            }
        };

        // Checked again after waiting for the lock and a connection.
        if cancel.is_cancelled() {
            info!("[{label}] cancelled before delete");
            return LoadResult::cancelled(*key);
        }

        match session.execute(&Statement::delete_partition(key)).await {
            Ok(deleted) => debug!(deleted, "[{label}] prior rows removed"),
            Err(e) => {
                error!(error = %e, "[{label}] pre-load delete failed, skipping partition");
                return LoadResult::failed(*key, format!("pre-load delete failed: {e}"));
            }
        }

        let run_id = Uuid::new_v4();
        let mut rows_written = 0u64;
        let mut file_errors = Vec::new();
        let mut cancelled = false;

        for url in sources {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            match self
                .load_file(&mut session, key, run_id, url, cancel, &mut rows_written)
                .await
            {
                Ok(FileOutcome::Done) => {}
                Ok(FileOutcome::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "[{label}] source file failed, continuing");
                    file_errors.push(FileError {
                        url: url.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if cancelled {
            // Half-loaded partitions would audit as OK; clear them back to empty.
            match session.execute(&Statement::delete_partition(key)).await {
                Ok(removed) => {
                    warn!(removed, %run_id, "[{label}] load cancelled, partition cleared");
                    rows_written = 0;
                }
                Err(e) => {
                    error!(error = %e, rows = rows_written, %run_id, "[{label}] load cancelled, clearing partition failed");
                }
            }
        } else {
            info!(
                rows = rows_written,
                failed_files = file_errors.len(),
                %run_id,
                "[{label}] load finished"
            );
        }

        LoadResult {
            key: *key,
            run_id: Some(run_id),
            rows_written,
            error: None,
            file_errors,
            cancelled,
        }
    }

    /// Stream one source file into the partition's fact table. Rows already
    /// written stay counted when a later batch fails.
    async fn load_file(
        &self,
        session: &mut Box<dyn Warehouse>,
        key: &PartitionKey,
        run_id: Uuid,
        url: &str,
        cancel: &CancelSignal,
        rows_written: &mut u64,
    ) -> Result<FileOutcome, LoadError> {
        let label = key.label();
        let staged = stage(self.fetcher.as_ref(), url, &self.config.staging_dir, ".parquet").await?;
        let batches = RowGroupBatches::open(staged.path(), self.config.batch_size(key.service()))?;
        debug!(
            url,
            row_groups = batches.num_row_groups(),
            total_rows = batches.total_rows(),
            "[{label}] source opened"
        );

        let normalizer = BatchNormalizer::new(key.service());
        let table = key.service().table_name();

        for item in batches {
            if cancel.is_cancelled() {
                return Ok(FileOutcome::Cancelled);
            }
            let source = item?;
            let stamp = BatchStamp::now(run_id, *key, url);
            let batch = normalizer.normalize(&source.batch, &stamp)?;
            let n = self.write_batch(session, table, &batch).await?;
            *rows_written += n;
            debug!(
                row_group = source.row_group,
                batch = source.index,
                rows = n,
                "[{label}] batch written"
            );
        }
        Ok(FileOutcome::Done)
    }

    /// Bulk-load one batch; a connection-level failure gets one retry on a
    /// fresh session.
    async fn write_batch(
        &self,
        session: &mut Box<dyn Warehouse>,
        table: &str,
        batch: &arrow::record_batch::RecordBatch,
    ) -> Result<u64, LoadError> {
        match session.bulk_load(table, batch).await {
            Ok(n) => Ok(n),
            Err(e) if e.is_connection() => {
                warn!(table, error = %e, "connection lost mid-load, reconnecting");
                *session = self.session().await?;
                Ok(session.bulk_load(table, batch).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load every partition the ledger marks available, in key order.
    ///
    /// Sources are grouped by key with duplicates removed. Up to
    /// `load_concurrency` partitions run at once.
    pub async fn load_available(
        &self,
        records: &[CoverageRecord],
        cancel: &CancelSignal,
    ) -> Vec<LoadResult> {
        let plan = plan_loads(records);
        info!(partitions = plan.len(), "loading available partitions");
        let concurrency = self.config.load_concurrency.max(1);

        stream::iter(plan)
            .map(|(key, urls)| async move { self.load_partition(&key, &urls, cancel).await })
            .buffered(concurrency)
            .collect()
            .await
    }
}

/// Available records grouped by key, sources de-duplicated in arrival order.
pub fn plan_loads(records: &[CoverageRecord]) -> BTreeMap<PartitionKey, Vec<String>> {
    let mut plan: BTreeMap<PartitionKey, Vec<String>> = BTreeMap::new();
    for rec in records.iter().filter(|r| r.is_available) {
        let urls = plan.entry(rec.key).or_default();
        if !urls.contains(&rec.source_url) {
            urls.push(rec.source_url.clone());
        }
    }
    plan
}

/// Totals over a multi-partition load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub partitions: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Finished with at least one failed file.
    pub partial: usize,
    pub cancelled: usize,
    pub rows: u64,
}

impl LoadSummary {
    pub fn from_results(results: &[LoadResult]) -> Self {
        let mut s = Self {
            partitions: results.len(),
            ..Self::default()
        };
        for r in results {
            s.rows += r.rows_written;
            if r.error.is_some() {
                s.failed += 1;
            } else if r.cancelled {
                s.cancelled += 1;
            } else if !r.file_errors.is_empty() {
                s.partial += 1;
            } else {
                s.succeeded += 1;
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlc_core::{now_seconds, Service};

    fn rec(key: PartitionKey, url: &str, available: bool) -> CoverageRecord {
        CoverageRecord {
            key,
            source_url: url.into(),
            is_available: available,
            probe_status_code: Some(200),
            content_length: None,
            checked_at: now_seconds(),
            note: None,
        }
    }

    #[test]
    fn plan_groups_dedupes_and_orders() {
        let g = PartitionKey::new(Service::Green, 2024, 1).unwrap();
        let y2 = PartitionKey::new(Service::Yellow, 2024, 2).unwrap();
        let y1 = PartitionKey::new(Service::Yellow, 2024, 1).unwrap();
        let plan = plan_loads(&[
            rec(g, "g1", true),
            rec(y2, "y2", true),
            rec(y1, "y1a", true),
            rec(y1, "y1b", true),
            rec(y1, "y1a", true),
            rec(y2, "skip", false),
        ]);
        let keys: Vec<_> = plan.keys().copied().collect();
        assert_eq!(keys, vec![y1, y2, g]);
        assert_eq!(plan[&y1], vec!["y1a".to_string(), "y1b".to_string()]);
        assert_eq!(plan[&y2], vec!["y2".to_string()]);
    }

    #[test]
    fn summary_buckets_each_result_once() {
        let key = PartitionKey::new(Service::Yellow, 2024, 1).unwrap();
        let ok = LoadResult {
            key,
            run_id: Some(Uuid::new_v4()),
            rows_written: 10,
            error: None,
            file_errors: vec![],
            cancelled: false,
        };
        let partial = LoadResult {
            rows_written: 5,
            file_errors: vec![FileError {
                url: "u".into(),
                error: "boom".into(),
            }],
            ..ok.clone()
        };
        let failed = LoadResult::failed(key, "pre-load delete failed");
        let cancelled = LoadResult::cancelled(key);

        let s = LoadSummary::from_results(&[ok, partial, failed, cancelled]);
        assert_eq!(
            s,
            LoadSummary {
                partitions: 4,
                succeeded: 1,
                failed: 1,
                partial: 1,
                cancelled: 1,
                rows: 15,
            }
        );
    }
}
