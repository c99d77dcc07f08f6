//! Schema-drift tolerant batch normalisation.
//!
//! Source files change shape over the years (columns renamed in case,
//! optional columns appearing, integer columns written as doubles). Every
//! batch is projected onto the canonical layout of its fact table; anything
//! that cannot be converted becomes NULL instead of failing the batch.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef, AsArray, Int64Array, StringArray};
use arrow::compute::{cast_with_options, CastOptions};
use arrow::datatypes::{DataType, SchemaRef, TimeUnit, TimestampMicrosecondType};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tlc_core::{PartitionKey, TIMESTAMP_FORMAT};
use tlc_warehouse::tables::{source_columns, trip_schema, ColumnKind, ColumnSpec};
use uuid::Uuid;

use crate::error::LoadError;

/// Lineage values stamped onto every row of one batch.
#[derive(Debug, Clone)]
pub struct BatchStamp {
    pub run_id: Uuid,
    pub ingest_ts: String,
    pub key: PartitionKey,
    pub source_url: String,
}

impl BatchStamp {
    /// Stamp with `ingest_ts` taken from the wall clock now.
    pub fn now(run_id: Uuid, key: PartitionKey, source_url: &str) -> Self {
        Self {
            run_id,
            ingest_ts: Utc::now().naive_utc().format(TIMESTAMP_FORMAT).to_string(),
            key,
            source_url: source_url.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchNormalizer {
    columns: &'static [ColumnSpec],
    schema: SchemaRef,
}

fn safe_cast() -> CastOptions<'static> {
    CastOptions {
        safe: true,
        ..CastOptions::default()
    }
}

impl BatchNormalizer {
    pub fn new(service: tlc_core::Service) -> Self {
        Self {
            columns: source_columns(service),
            schema: trip_schema(service),
        }
    }

    /// Canonical output schema: source columns then lineage columns.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn normalize(&self, batch: &RecordBatch, stamp: &BatchStamp) -> Result<RecordBatch, LoadError> {
        let rows = batch.num_rows();
        let input = batch.schema();

        // First occurrence wins when two source columns differ only in case.
        let mut by_name: HashMap<String, usize> = HashMap::new();
        for (idx, field) in input.fields().iter().enumerate() {
            by_name.entry(field.name().to_lowercase()).or_insert(idx);
        }

        let mut out: Vec<ArrayRef> = Vec::with_capacity(self.schema.fields().len());
        for spec in self.columns {
            let target = spec.kind.arrow_type();
            let array = match by_name.get(spec.name) {
                None => new_null_array(&target, rows),
                Some(&idx) => {
                    let source = batch.column(idx);
                    match spec.kind {
                        ColumnKind::Timestamp => normalize_datetimes(source)?,
                        _ => cast_or_null(source, &target)?,
                    }
                }
            };
            out.push(array);
        }

        out.push(repeat_str(&stamp.run_id.to_string(), rows));
        out.push(repeat_str(&stamp.ingest_ts, rows));
        out.push(Arc::new(Int64Array::from(vec![stamp.key.year() as i64; rows])));
        out.push(Arc::new(Int64Array::from(vec![stamp.key.month() as i64; rows])));
        out.push(repeat_str(stamp.key.service().as_str(), rows));
        out.push(repeat_str(&stamp.source_url, rows));

        Ok(RecordBatch::try_new(self.schema.clone(), out)?)
    }
}

fn repeat_str(value: &str, rows: usize) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(std::iter::repeat(value).take(rows)))
}

/// Safe cast; a type pair arrow cannot cast at all yields an all-null column.
fn cast_or_null(array: &ArrayRef, target: &DataType) -> Result<ArrayRef, LoadError> {
    if array.data_type() == target {
        return Ok(array.clone());
    }
    if !arrow::compute::can_cast_types(array.data_type(), target) {
        return Ok(new_null_array(target, array.len()));
    }
    Ok(cast_with_options(array, target, &safe_cast())?)
}

/// Render any datetime-like column as `%Y-%m-%d %H:%M:%S` text.
///
/// Timestamps of every unit and dates go through microseconds; text is
/// parsed with a few common layouts. Unparsable values become NULL.
pub fn normalize_datetimes(array: &ArrayRef) -> Result<ArrayRef, LoadError> {
    match array.data_type() {
        DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64 => {
            let micros = cast_with_options(
                array,
                &DataType::Timestamp(TimeUnit::Microsecond, None),
                &safe_cast(),
            )?;
            let micros = micros.as_primitive::<TimestampMicrosecondType>();
            let out: StringArray = micros
                .iter()
                .map(|v| {
                    v.and_then(DateTime::from_timestamp_micros)
                        .map(|dt| dt.naive_utc().format(TIMESTAMP_FORMAT).to_string())
                })
                .collect();
            Ok(Arc::new(out))
        }
        _ => {
            let text = cast_or_null(array, &DataType::Utf8)?;
            let text = text.as_string::<i32>();
            let out: StringArray = text
                .iter()
                .map(|v| v.and_then(parse_datetime_text).map(|dt| dt.format(TIMESTAMP_FORMAT).to_string()))
                .collect();
            Ok(Arc::new(out))
        }
    }
}

fn parse_datetime_text(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%m/%d/%Y %H:%M:%S", "%m/%d/%Y %I:%M:%S %p"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
