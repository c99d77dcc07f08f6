use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Int32Array, StringArray, UInt64Array,
};
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Int32Type, Schema, SchemaRef, UInt64Type};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use tempfile::NamedTempFile;
use tlc_core::{CoverageRecord, PartitionKey, Service};
use tracing::debug;

use crate::error::LedgerError;

/// Where the ledger lives. Implementations persist whole snapshots.
pub trait LedgerStore: Send + Sync {
    /// All stored records. A store that was never written is empty.
    fn load(&self) -> Result<Vec<CoverageRecord>, LedgerError>;

    /// Replace the stored snapshot with `records`.
    fn save(&self, records: &[CoverageRecord]) -> Result<(), LedgerError>;
}

impl<S: LedgerStore + ?Sized> LedgerStore for Box<S> {
    fn load(&self) -> Result<Vec<CoverageRecord>, LedgerError> {
        (**self).load()
    }

    fn save(&self, records: &[CoverageRecord]) -> Result<(), LedgerError> {
        (**self).save(records)
    }
}

// ── CSV file ──────────────────────────────────────────────────

/// Coverage matrix as a CSV file with a header row:
///
/// ```text
/// service_type,year,month,url,has_parquet,http_status,content_length,checked_at,notes
/// yellow,2024,1,https://.../yellow_tripdata_2024-01.parquet,true,200,49961641,2024-05-01T10:00:00Z,
/// ```
///
/// Writes go to a temp file in the same directory which then replaces the
/// target, so readers never observe a half-written file.
#[derive(Debug, Clone)]
pub struct CsvLedgerStore {
    path: PathBuf,
}

impl CsvLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("service_type", DataType::Utf8, false),
            Field::new("year", DataType::Int32, false),
            Field::new("month", DataType::Int32, false),
            Field::new("url", DataType::Utf8, false),
            Field::new("has_parquet", DataType::Boolean, false),
            Field::new("http_status", DataType::Int32, true),
            Field::new("content_length", DataType::UInt64, true),
            Field::new("checked_at", DataType::Utf8, false),
            Field::new("notes", DataType::Utf8, true),
        ]))
    }

    fn to_batch(records: &[CoverageRecord]) -> Result<RecordBatch, LedgerError> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.key.service().as_str()),
            )),
            Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.key.year()))),
            Arc::new(Int32Array::from_iter_values(
                records.iter().map(|r| r.key.month() as i32),
            )),
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.source_url.as_str()),
            )),
            Arc::new(BooleanArray::from(
                records.iter().map(|r| r.is_available).collect::<Vec<_>>(),
            )),
            Arc::new(Int32Array::from(
                records
                    .iter()
                    .map(|r| r.probe_status_code.map(i32::from))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                records.iter().map(|r| r.content_length).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from_iter_values(
                records
                    .iter()
                    .map(|r| r.checked_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            )),
            Arc::new(StringArray::from(
                records.iter().map(|r| r.note.as_deref()).collect::<Vec<_>>(),
            )),
        ];
        Ok(RecordBatch::try_new(Self::schema(), columns)?)
    }

    fn from_batch(batch: &RecordBatch, offset: usize) -> Result<Vec<CoverageRecord>, LedgerError> {
        let corrupt = |row: usize, reason: String| LedgerError::Corrupt {
            row: offset + row + 1,
            reason,
        };
        let missing = |name: &str| corrupt(0, format!("column {name} has an unexpected type"));

        let service = batch.column(0).as_string_opt::<i32>().ok_or_else(|| missing("service_type"))?;
        let year = batch.column(1).as_primitive_opt::<Int32Type>().ok_or_else(|| missing("year"))?;
        let month = batch.column(2).as_primitive_opt::<Int32Type>().ok_or_else(|| missing("month"))?;
        let url = batch.column(3).as_string_opt::<i32>().ok_or_else(|| missing("url"))?;
        let has_parquet = batch.column(4).as_boolean_opt().ok_or_else(|| missing("has_parquet"))?;
        let status = batch.column(5).as_primitive_opt::<Int32Type>().ok_or_else(|| missing("http_status"))?;
        let length = batch
            .column(6)
            .as_primitive_opt::<UInt64Type>()
            .ok_or_else(|| missing("content_length"))?;
        let checked = batch.column(7).as_string_opt::<i32>().ok_or_else(|| missing("checked_at"))?;
        let notes = batch.column(8).as_string_opt::<i32>().ok_or_else(|| missing("notes"))?;

        let mut out = Vec::with_capacity(batch.num_rows());
        for i in 0..batch.num_rows() {
            let svc: Service = service
                .value(i)
                .parse()
                .map_err(|e| corrupt(i, format!("{e}")))?;
            let month_value = u32::try_from(month.value(i))
                .map_err(|_| corrupt(i, format!("invalid month {}", month.value(i))))?;
            let key = PartitionKey::new(svc, year.value(i), month_value)
                .map_err(|e| corrupt(i, e.to_string()))?;
            let probe_status_code = if status.is_null(i) {
                None
            } else {
                Some(
                    u16::try_from(status.value(i))
                        .map_err(|_| corrupt(i, format!("invalid status {}", status.value(i))))?,
                )
            };
            let checked_at = parse_checked_at(checked.value(i))
                .ok_or_else(|| corrupt(i, format!("invalid checked_at {:?}", checked.value(i))))?;

            out.push(CoverageRecord {
                key,
                source_url: url.value(i).to_string(),
                is_available: has_parquet.value(i),
                probe_status_code,
                content_length: (!length.is_null(i)).then(|| length.value(i)),
                checked_at,
                note: (!notes.is_null(i)).then(|| notes.value(i).to_string()),
            });
        }
        Ok(out)
    }
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_checked_at(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

impl LedgerStore for CsvLedgerStore {
    fn load(&self) -> Result<Vec<CoverageRecord>, LedgerError> {
        if !self.path.exists() {
            debug!("No coverage file at {}; starting empty", self.path.display());
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)?;
        let reader = ReaderBuilder::new(Self::schema())
            .with_header(true)
            .build(file)?;

        let mut records = Vec::new();
        for batch in reader {
            let batch = batch?;
            let offset = records.len();
            records.extend(Self::from_batch(&batch, offset)?);
        }
        Ok(records)
    }

    fn save(&self, records: &[CoverageRecord]) -> Result<(), LedgerError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let batch = Self::to_batch(records)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = WriterBuilder::new().with_header(true).build(&mut tmp);
            writer.write(&batch)?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        debug!("Wrote {} coverage records to {}", records.len(), self.path.display());
        Ok(())
    }
}

// ── In-memory ─────────────────────────────────────────────────

/// Ledger held in memory; clones share the snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    records: Arc<Mutex<Vec<CoverageRecord>>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<CoverageRecord>) -> Self {
        let store = Self::default();
        *store.records.lock().unwrap_or_else(|e| e.into_inner()) = records;
        store
    }

    pub fn snapshot(&self) -> Vec<CoverageRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of `save` calls so far.
    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self) -> Result<Vec<CoverageRecord>, LedgerError> {
        Ok(self.snapshot())
    }

    fn save(&self, records: &[CoverageRecord]) -> Result<(), LedgerError> {
        *self.records.lock().unwrap_or_else(|e| e.into_inner()) = records.to_vec();
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Vec<CoverageRecord> {
        let checked_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        vec![
            CoverageRecord {
                key: PartitionKey::new(Service::Yellow, 2024, 1).unwrap(),
                source_url: "https://host/yellow_tripdata_2024-01.parquet".into(),
                is_available: true,
                probe_status_code: Some(200),
                content_length: Some(49_961_641),
                checked_at,
                note: None,
            },
            CoverageRecord {
                key: PartitionKey::new(Service::Green, 2025, 12).unwrap(),
                source_url: "https://host/green_tripdata_2025-12.parquet".into(),
                is_available: false,
                probe_status_code: None,
                content_length: None,
                checked_at,
                note: Some("error:timeout".into()),
            },
        ]
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvLedgerStore::new(dir.path().join("nope.csv"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn saved_file_has_header_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs").join("coverage_matrix.csv");
        let store = CsvLedgerStore::new(&path);
        store.save(&sample()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("service_type,year,month,url,has_parquet,http_status,content_length,checked_at,notes")
        );
        assert_eq!(
            lines.next(),
            Some("yellow,2024,1,https://host/yellow_tripdata_2024-01.parquet,true,200,49961641,2024-05-01T10:00:00Z,")
        );

        assert_eq!(store.load().unwrap(), sample());
    }

    #[test]
    fn save_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvLedgerStore::new(dir.path().join("coverage.csv"));
        store.save(&sample()).unwrap();
        store.save(&sample()[..1]).unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn invalid_month_is_reported_with_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage.csv");
        fs::write(
            &path,
            "service_type,year,month,url,has_parquet,http_status,content_length,checked_at,notes\n\
             yellow,2024,13,u,true,200,,2024-05-01T10:00:00Z,\n",
        )
        .unwrap();
        let err = CsvLedgerStore::new(&path).load().unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { row: 1, .. }), "{err}");
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let parsed = parse_checked_at("2024-05-01T10:00:00.123456").unwrap();
        assert_eq!(parsed.to_rfc3339_opts(SecondsFormat::Secs, true), "2024-05-01T10:00:00Z");
        assert!(parse_checked_at("yesterday").is_none());
    }
}
