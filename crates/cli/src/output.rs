use anyhow::Result;
use serde::Serialize;
use tlc_core::{AuditRecord, CoverageRecord, LoadResult};

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_coverage(records: &[CoverageRecord]) {
    for r in records {
        let status = r
            .probe_status_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".into());
        let size = r
            .content_length
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<16} {:<5} {:>4} {:>12} {}",
            r.key.label(),
            if r.is_available { "yes" } else { "no" },
            status,
            size,
            r.note.as_deref().unwrap_or("")
        );
    }
}

pub fn print_loads(results: &[LoadResult]) {
    for r in results {
        let outcome = if let Some(e) = &r.error {
            format!("FAILED: {e}")
        } else if r.cancelled {
            "cancelled".to_string()
        } else if !r.file_errors.is_empty() {
            format!("partial ({} file errors)", r.file_errors.len())
        } else {
            "ok".to_string()
        };
        println!("{:<16} {:>10} rows  {}", r.key.label(), r.rows_written, outcome);
        for fe in &r.file_errors {
            println!("    {}: {}", fe.url, fe.error);
        }
    }
}

pub fn print_audit(records: &[AuditRecord]) {
    for r in records {
        let latest = r
            .latest_ingest_ts
            .map(|ts| ts.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<16} {:<8} {:>10} {:<20} {}",
            r.key.label(),
            r.status.as_str(),
            r.row_count,
            latest,
            r.note.as_deref().unwrap_or("")
        );
    }
}
