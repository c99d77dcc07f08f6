//! Wiring from configuration to the component objects each command needs.

use std::sync::Arc;

use anyhow::{Context, Result};
use tlc_core::{enumerate, Config, CoverageRecord, PartitionKey};
use tlc_ledger::{CoverageLedger, CsvLedgerStore, LedgerStore, MemoryLedgerStore};
use tlc_loader::{HttpFetcher, SourceFetcher};
use tlc_warehouse::{MemoryWarehouse, PgWarehousePool, WarehousePool};
use tracing::{info, warn};

use crate::cli::GridArgs;

pub struct App {
    pub config: Config,
    pub dry_run: bool,
    pub json: bool,
    pub ledger: CoverageLedger<Box<dyn LedgerStore>>,
}

impl App {
    pub fn new(config: Config, dry_run: bool, json: bool) -> Result<Self> {
        let csv = CsvLedgerStore::new(config.ledger.coverage_path.clone());
        let store: Box<dyn LedgerStore> = if dry_run {
            // Start from the file on disk but keep every write in memory.
            let existing = csv
                .load()
                .with_context(|| format!("failed to read {}", csv.path().display()))?;
            Box::new(MemoryLedgerStore::with_records(existing))
        } else {
            Box::new(csv)
        };
        Ok(Self {
            config,
            dry_run,
            json,
            ledger: CoverageLedger::new(store),
        })
    }

    /// Expected grid with CLI overrides applied.
    pub fn grid(&self, args: &GridArgs) -> Vec<PartitionKey> {
        let services = if args.services.is_empty() {
            self.config.grid.services.clone()
        } else {
            args.services.clone()
        };
        let year_from = args.year_from.unwrap_or(self.config.grid.year_from);
        let year_to = args.year_to.unwrap_or(self.config.grid.year_to);
        if year_from > year_to {
            warn!(year_from, year_to, "empty year range");
        }
        enumerate(&services, year_from, year_to)
    }

    pub fn coverage(&self) -> Result<Vec<CoverageRecord>> {
        self.ledger.load().context("failed to load coverage ledger")
    }

    /// Warehouse pool for this invocation; migrations are applied once here.
    pub async fn warehouse(&self) -> Result<Arc<dyn WarehousePool>> {
        let pool: Arc<dyn WarehousePool> = if self.dry_run {
            Arc::new(MemoryWarehouse::new())
        } else {
            let pool = PgWarehousePool::connect(&self.config.warehouse)
                .await
                .with_context(|| {
                    format!(
                        "failed to connect to warehouse at {}:{}",
                        self.config.warehouse.host, self.config.warehouse.port
                    )
                })?;
            Arc::new(pool)
        };
        pool.migrate().await.context("failed to apply migrations")?;
        info!(backend = pool.backend_name(), "warehouse ready");
        Ok(pool)
    }

    pub fn fetcher(&self) -> Result<Arc<dyn SourceFetcher>> {
        let (connect, read) = self.config.source.download_timeouts();
        let fetcher = HttpFetcher::new(&self.config.source.user_agent, connect, read)
            .context("failed to build download client")?;
        Ok(Arc::new(fetcher))
    }
}
