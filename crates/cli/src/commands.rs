use std::collections::HashSet;

use anyhow::{Context, Result};
use serde_json::json;
use tlc_audit::{Auditor, StatusSummary};
use tlc_core::config::AuditPublishMode;
use tlc_core::{CancelSignal, CoverageRecord, PartitionKey, Service};
use tlc_ledger::summarize_by_service;
use tlc_loader::{BulkLoader, LoadSummary, ZonesLoader};
use tlc_probe::{probe_all, ProbeRunOptions, ProbeSummary, Prober};
use tlc_warehouse::{Query, WarehousePool};
use tracing::{info, warn};

use crate::app::App;
use crate::cli::GridArgs;
use crate::output;

pub async fn probe(app: &App, grid: &GridArgs, replace: bool, cancel: &CancelSignal) -> Result<()> {
    let keys = app.grid(grid);
    let prober = Prober::from_config(&app.config).context("failed to build probe client")?;
    let options = ProbeRunOptions::from_config(&app.config.probe);
    let records = probe_all(&prober, &keys, &options, cancel).await;

    if replace && records.len() == keys.len() {
        let written = app
            .ledger
            .replace_all(&records)
            .context("failed to rebuild coverage ledger")?;
        info!(records = written, "coverage ledger rebuilt");
    } else {
        if replace {
            warn!(
                probed = records.len(),
                expected = keys.len(),
                "probe cycle incomplete, merging instead of rebuilding"
            );
        }
        app.ledger
            .merge(&records)
            .context("failed to merge coverage ledger")?;
    }

    let summary = ProbeSummary::from_records(&records);
    if app.json {
        output::print_json(&json!({
            "probed": records.len(),
            "available": summary.available,
            "unavailable": summary.unavailable,
            "errors": summary.errors,
            "records": records,
        }))
    } else {
        output::print_coverage(&records);
        println!(
            "probed {}: {} available, {} unavailable, {} errors",
            records.len(),
            summary.available,
            summary.unavailable,
            summary.errors
        );
        Ok(())
    }
}

pub fn coverage(app: &App) -> Result<()> {
    let records = app.coverage()?;
    let by_service = summarize_by_service(&records);
    if app.json {
        let services: serde_json::Map<String, serde_json::Value> = by_service
            .iter()
            .map(|(service, c)| {
                (
                    service.to_string(),
                    json!({ "available": c.available, "missing": c.missing, "errors": c.errors }),
                )
            })
            .collect();
        return output::print_json(&json!({ "services": services, "records": records }));
    }

    for (service, c) in &by_service {
        println!(
            "{service:<7} available={:<4} missing={:<4} errors={}",
            c.available, c.missing, c.errors
        );
    }
    if by_service.is_empty() {
        println!("coverage ledger is empty; run `tlc probe` first");
    }
    Ok(())
}

/// Ledger records narrowed by the `load` filters.
pub fn select_for_load(
    records: Vec<CoverageRecord>,
    service: Option<Service>,
    year: Option<i32>,
    month: Option<u32>,
) -> Vec<CoverageRecord> {
    records
        .into_iter()
        .filter(|r| service.map_or(true, |s| r.key.service() == s))
        .filter(|r| year.map_or(true, |y| r.key.year() == y))
        .filter(|r| month.map_or(true, |m| r.key.month() == m))
        .collect()
}

pub async fn load(
    app: &App,
    pool: std::sync::Arc<dyn WarehousePool>,
    records: &[CoverageRecord],
    cancel: &CancelSignal,
) -> Result<LoadSummary> {
    let loader = BulkLoader::new(pool, app.fetcher()?, app.config.loader.clone());
    let results = loader.load_available(records, cancel).await;
    let summary = LoadSummary::from_results(&results);

    if app.json {
        output::print_json(&json!({ "summary": summary, "results": results }))?;
    } else {
        output::print_loads(&results);
        println!(
            "{} partitions: {} ok, {} partial, {} failed, {} cancelled, {} rows",
            summary.partitions,
            summary.succeeded,
            summary.partial,
            summary.failed,
            summary.cancelled,
            summary.rows
        );
    }
    Ok(summary)
}

pub async fn audit(
    app: &App,
    pool: std::sync::Arc<dyn WarehousePool>,
    grid: &[PartitionKey],
    mode: Option<AuditPublishMode>,
) -> Result<StatusSummary> {
    let mode = mode.unwrap_or(app.config.audit.publish_mode);
    let coverage = app.coverage()?;
    let records = Auditor::new(pool, mode)
        .reconcile_audit(grid, &coverage)
        .await
        .context("audit reconciliation failed")?;
    let summary = StatusSummary::from_records(&records);

    if app.json {
        output::print_json(&json!({ "summary": summary, "records": records }))?;
    } else {
        output::print_audit(&records);
        println!(
            "{} partitions: {} OK, {} PENDING, {} MISSING (published with {mode})",
            records.len(),
            summary.ok,
            summary.pending,
            summary.missing
        );
    }
    Ok(summary)
}

/// Probe → merge → load available → reconcile → publish.
pub async fn run(app: &App, grid_args: &GridArgs, cancel: &CancelSignal) -> Result<()> {
    probe(app, grid_args, false, cancel).await?;
    if cancel.is_cancelled() {
        warn!("cancelled after probe; skipping load and audit");
        return Ok(());
    }

    let grid = app.grid(grid_args);
    let in_grid: HashSet<PartitionKey> = grid.iter().copied().collect();
    let coverage: Vec<CoverageRecord> = app
        .coverage()?
        .into_iter()
        .filter(|r| in_grid.contains(&r.key))
        .collect();

    let pool = app.warehouse().await?;
    load(app, pool.clone(), &coverage, cancel).await?;
    if cancel.is_cancelled() {
        warn!("cancelled during load; skipping audit");
        return Ok(());
    }
    audit(app, pool, &grid, None).await?;
    Ok(())
}

pub async fn zones(app: &App) -> Result<()> {
    let pool = app.warehouse().await?;
    let loader = ZonesLoader::new(pool, app.fetcher()?, app.config.loader.staging_dir.clone());
    let rows = loader
        .load(&app.config.source.zones_urls)
        .await
        .context("zone lookup load failed")?;
    if app.json {
        output::print_json(&json!({ "rows": rows }))
    } else {
        println!("taxi_zones replaced: {rows} rows");
        Ok(())
    }
}

pub async fn check(app: &App) -> Result<()> {
    let pool = app.warehouse().await?;
    let mut session = pool.acquire().await.context("failed to acquire connection")?;
    session.ping().await.context("warehouse ping failed")?;
    let info = session
        .query(&Query::SessionInfo)
        .await
        .context("failed to read session identity")?;

    let user = info.get_value(0, "user_name").unwrap_or("?");
    let database = info.get_value(0, "database_name").unwrap_or("?");
    let schema = info.get_value(0, "schema_name").unwrap_or("?");
    if app.json {
        output::print_json(&json!({
            "backend": pool.backend_name(),
            "user": user,
            "database": database,
            "schema": schema,
        }))
    } else {
        println!(
            "connected to {} as {user} (database {database}, schema {schema})",
            pool.backend_name()
        );
        Ok(())
    }
}

pub async fn migrate(app: &App) -> Result<()> {
    // Migrations run as part of opening the warehouse.
    let pool = app.warehouse().await?;
    println!("migrations applied ({})", pool.backend_name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlc_core::now_seconds;

    #[test]
    fn load_filters_narrow_the_plan() {
        let rec = |service, year, month| CoverageRecord {
            key: PartitionKey::new(service, year, month).unwrap(),
            source_url: "u".into(),
            is_available: true,
            probe_status_code: Some(200),
            content_length: None,
            checked_at: now_seconds(),
            note: None,
        };
        let all = vec![
            rec(Service::Yellow, 2024, 1),
            rec(Service::Yellow, 2024, 2),
            rec(Service::Green, 2024, 1),
            rec(Service::Yellow, 2023, 1),
        ];

        assert_eq!(select_for_load(all.clone(), None, None, None).len(), 4);
        assert_eq!(select_for_load(all.clone(), Some(Service::Yellow), None, None).len(), 3);
        assert_eq!(select_for_load(all.clone(), None, Some(2024), Some(1)).len(), 2);
        let one = select_for_load(all, Some(Service::Green), Some(2024), Some(1));
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].key.service(), Service::Green);
    }
}
