use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use tlc_core::config::AuditPublishMode;
use tlc_core::{AuditRecord, Service, TIMESTAMP_FORMAT};
use tlc_warehouse::tables::{audit_schema, AUDIT_TABLE};
use tlc_warehouse::{Statement, Warehouse};
use tracing::info;

use crate::error::AuditError;

/// Audit records in the `load_audit` column layout.
pub fn audit_batch(records: &[AuditRecord]) -> Result<RecordBatch, AuditError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.key.service().as_str()),
        )),
        Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.key.year() as i64))),
        Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.key.month() as i64))),
        Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.row_count as i64))),
        Arc::new(
            records
                .iter()
                .map(|r| r.latest_ingest_ts.map(|ts| ts.format(TIMESTAMP_FORMAT).to_string()))
                .collect::<StringArray>(),
        ),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.status.as_str()))),
        Arc::new(records.iter().map(|r| r.note.clone()).collect::<StringArray>()),
    ];
    Ok(RecordBatch::try_new(audit_schema(), columns)?)
}

/// Write the snapshot to `load_audit`.
///
/// `Truncate` swaps the whole table in one transaction. `Selective` clears
/// only the services and years the records cover, then appends.
pub async fn publish(
    session: &mut dyn Warehouse,
    records: &[AuditRecord],
    mode: AuditPublishMode,
) -> Result<u64, AuditError> {
    let batch = audit_batch(records)?;
    let written = match mode {
        AuditPublishMode::Truncate => session.replace_table(AUDIT_TABLE, &batch).await?,
        AuditPublishMode::Selective => {
            let mut services: Vec<Service> = records.iter().map(|r| r.key.service()).collect();
            services.sort();
            services.dedup();
            let years = records.iter().map(|r| r.key.year());
            let (year_from, year_to) = match (years.clone().min(), years.max()) {
                (Some(lo), Some(hi)) => (lo, hi),
                _ => return Ok(0),
            };
            let deleted = session
                .execute(&Statement::DeleteServiceYears {
                    table: AUDIT_TABLE.to_string(),
                    services,
                    year_from,
                    year_to,
                })
                .await?;
            info!(deleted, "previous audit rows cleared");
            session.bulk_load(AUDIT_TABLE, &batch).await?
        }
    };
    info!(rows = written, mode = %mode, "audit published");
    Ok(written)
}
