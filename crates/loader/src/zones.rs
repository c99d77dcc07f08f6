//! Taxi-zone lookup table: a small CSV replaced wholesale on every load.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef, AsArray, Int64Array};
use arrow::compute::concat_batches;
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use tlc_warehouse::tables::{zones_schema, ZONES_COLUMNS, ZONES_TABLE};
use tlc_warehouse::WarehousePool;
use tracing::{info, warn};

use crate::error::LoadError;
use crate::fetch::{stage, SourceFetcher};

pub struct ZonesLoader {
    pool: Arc<dyn WarehousePool>,
    fetcher: Arc<dyn SourceFetcher>,
    staging_dir: PathBuf,
}

impl ZonesLoader {
    pub fn new(
        pool: Arc<dyn WarehousePool>,
        fetcher: Arc<dyn SourceFetcher>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pool,
            fetcher,
            staging_dir: staging_dir.into(),
        }
    }

    /// Try each candidate location in order; the first that downloads and
    /// parses replaces the zones table. Returns the rows written.
    pub async fn load(&self, urls: &[String]) -> Result<u64, LoadError> {
        let mut failures = Vec::new();
        for url in urls {
            match self.fetch_zones(url).await {
                Ok(batch) => {
                    let mut session = self.pool.acquire().await?;
                    let rows = session.replace_table(ZONES_TABLE, &batch).await?;
                    info!(url = %url, rows, "zone lookup loaded");
                    return Ok(rows);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "zone lookup source failed");
                    failures.push(format!("{url}: {e}"));
                }
            }
        }
        Err(LoadError::AllSourcesFailed(failures))
    }

    async fn fetch_zones(&self, url: &str) -> Result<RecordBatch, LoadError> {
        let staged = stage(self.fetcher.as_ref(), url, &self.staging_dir, ".csv").await?;
        read_zones(staged.path())
    }
}

/// Parse a zone lookup CSV into the canonical zones layout.
///
/// Headers are matched case-insensitively after trimming. `locationid`
/// values that are not integers become NULL; absent columns are all NULL.
pub fn read_zones(path: &Path) -> Result<RecordBatch, LoadError> {
    let mut file = File::open(path)?;
    let format = Format::default().with_header(true);
    let (inferred, _) = format.infer_schema(&mut file, Some(1))?;
    file.seek(SeekFrom::Start(0))?;

    // Everything is read as text; typing happens below.
    let names: Vec<String> = inferred
        .fields()
        .iter()
        .map(|f| f.name().trim().to_lowercase())
        .collect();
    let raw_schema = Arc::new(Schema::new(
        names
            .iter()
            .map(|n| Field::new(n, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));
    let reader = ReaderBuilder::new(raw_schema.clone())
        .with_format(format)
        .build(file)?;

    let target = zones_schema();
    let mut out = Vec::new();
    for batch in reader {
        let batch = batch?;
        let rows = batch.num_rows();
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(ZONES_COLUMNS.len());
        for spec in ZONES_COLUMNS {
            let source = names.iter().position(|n| n == spec.name).map(|i| batch.column(i));
            let array: ArrayRef = match (spec.name, source) {
                (_, None) => new_null_array(&spec.kind.arrow_type(), rows),
                ("locationid", Some(col)) => {
                    let text = col.as_string::<i32>();
                    Arc::new(
                        text.iter()
                            .map(|v| v.and_then(|s| s.trim().parse::<i64>().ok()))
                            .collect::<Int64Array>(),
                    )
                }
                (_, Some(col)) => col.clone(),
            };
            columns.push(array);
        }
        out.push(RecordBatch::try_new(target.clone(), columns)?);
    }

    Ok(concat_batches(&target, &out)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_normalised_and_ids_coerced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.csv");
        std::fs::write(
            &path,
            " LocationID ,Borough,Zone,service_zone,extra\n\
             1,EWR,Newark Airport,EWR,x\n\
             abc,Queens,Jamaica Bay,Boro Zone,y\n\
             265,Unknown,,N/A,z\n",
        )
        .unwrap();

        let batch = read_zones(&path).unwrap();
        assert_eq!(batch.schema(), zones_schema());
        assert_eq!(batch.num_rows(), 3);

        let ids = batch.column(0).as_primitive::<arrow::datatypes::Int64Type>();
        assert_eq!(ids.value(0), 1);
        assert!(ids.is_null(1));
        assert_eq!(ids.value(2), 265);

        let zone = batch.column_by_name("zone").unwrap().as_string::<i32>();
        assert_eq!(zone.value(0), "Newark Airport");
    }

    #[test]
    fn missing_columns_are_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.csv");
        std::fs::write(&path, "locationid,zone\n7,Astoria\n").unwrap();

        let batch = read_zones(&path).unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.column_by_name("borough").unwrap().null_count(), 1);
        assert_eq!(batch.column_by_name("service_zone").unwrap().null_count(), 1);
    }
}
