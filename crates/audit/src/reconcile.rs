use std::collections::HashMap;

use tlc_core::{AuditRecord, AuditStatus, CoverageRecord, PartitionKey};

use crate::counts::WarehouseCounts;

/// Derive one audit record per grid key, ordered by key.
///
/// Coverage that says "unavailable" wins over any rows in the warehouse.
/// Available partitions are `OK` with rows and `PENDING` without. A key the
/// ledger has never seen is `OK` when rows exist, otherwise `MISSING`.
pub fn reconcile(
    grid: &[PartitionKey],
    coverage: &[CoverageRecord],
    counts: &WarehouseCounts,
) -> Vec<AuditRecord> {
    // Latest check per key; ties go to the later record.
    let mut latest: HashMap<PartitionKey, &CoverageRecord> = HashMap::new();
    for rec in coverage {
        match latest.get(&rec.key) {
            Some(cur) if cur.checked_at > rec.checked_at => {}
            _ => {
                latest.insert(rec.key, rec);
            }
        }
    }

    let mut keys = grid.to_vec();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .map(|key| {
            let count = counts.get(&key).copied().unwrap_or_default();
            let (status, note) = match latest.get(&key) {
                Some(rec) if !rec.is_available => (
                    AuditStatus::Missing,
                    Some(match rec.note.as_deref() {
                        Some(n) if !n.is_empty() => format!("no parquet available ({n})"),
                        _ => "no parquet available".to_string(),
                    }),
                ),
                Some(_) if count.row_count > 0 => (AuditStatus::Ok, None),
                Some(_) => (AuditStatus::Pending, None),
                None if count.row_count > 0 => (AuditStatus::Ok, None),
                None => (AuditStatus::Missing, Some("not probed".to_string())),
            };
            AuditRecord {
                key,
                row_count: count.row_count,
                latest_ingest_ts: count.latest_ingest_ts,
                status,
                note,
            }
        })
        .collect()
}
