use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use tlc_core::{PartitionKey, Service, TIMESTAMP_FORMAT};
use tlc_warehouse::{Query, QueryResult, Warehouse};
use tracing::debug;

use crate::error::AuditError;

/// Warehouse truth for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionCount {
    pub row_count: u64,
    pub latest_ingest_ts: Option<NaiveDateTime>,
}

/// Row counts per partition present in the fact tables. Partitions with no
/// rows are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarehouseCounts {
    counts: BTreeMap<PartitionKey, PartitionCount>,
}

impl WarehouseCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: PartitionKey, count: PartitionCount) {
        self.counts.insert(key, count);
    }

    pub fn get(&self, key: &PartitionKey) -> Option<&PartitionCount> {
        self.counts.get(key)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total_rows(&self) -> u64 {
        self.counts.values().map(|c| c.row_count).sum()
    }

    /// One `PartitionCounts` query per service's fact table.
    pub async fn fetch(
        session: &mut dyn Warehouse,
        services: &[Service],
    ) -> Result<Self, AuditError> {
        let mut counts = Self::new();
        for service in services {
            let result = session.query(&Query::partition_counts(*service)).await?;
            debug!(service = %service, partitions = result.row_count(), "partition counts fetched");
            counts.absorb(*service, &result)?;
        }
        Ok(counts)
    }

    /// Add the rows of a `PartitionCounts` result for `service`.
    pub fn absorb(&mut self, service: Service, result: &QueryResult) -> Result<(), AuditError> {
        for row in 0..result.row_count() {
            let field = |col: &str| {
                result.get_value(row, col).ok_or_else(|| AuditError::MalformedCounts {
                    row,
                    reason: format!("missing {col}"),
                })
            };
            let bad = |reason: String| AuditError::MalformedCounts { row, reason };

            let year: i32 = field("year")?
                .trim()
                .parse()
                .map_err(|_| bad("year is not an integer".into()))?;
            let month: u32 = field("month")?
                .trim()
                .parse()
                .map_err(|_| bad("month is not an integer".into()))?;
            let row_count: u64 = field("row_count")?
                .trim()
                .parse()
                .map_err(|_| bad("row_count is not an integer".into()))?;
            let key = PartitionKey::new(service, year, month).map_err(|e| bad(e.to_string()))?;

            let latest_ingest_ts = result
                .get_value(row, "latest_ingest_ts")
                .and_then(parse_ingest_ts);

            self.counts.insert(
                key,
                PartitionCount {
                    row_count,
                    latest_ingest_ts,
                },
            );
        }
        Ok(())
    }
}

/// Canonical `%Y-%m-%d %H:%M:%S`, tolerating a fractional part.
fn parse_ingest_ts(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}
