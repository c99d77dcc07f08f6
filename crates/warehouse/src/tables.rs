//! Table catalogue: canonical column lists and arrow types for every table
//! the pipeline writes. The migrations in `migrations/` create the same
//! columns; new nullable columns are added there, never at load time.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use tlc_core::Service;

use crate::error::WarehouseError;

pub const YELLOW_TABLE: &str = "yellow_trips";
pub const GREEN_TABLE: &str = "green_trips";
pub const AUDIT_TABLE: &str = "load_audit";
pub const ZONES_TABLE: &str = "taxi_zones";

pub const KNOWN_TABLES: [&str; 4] = [YELLOW_TABLE, GREEN_TABLE, AUDIT_TABLE, ZONES_TABLE];

/// Logical column kind. Datetimes travel as canonical text and are parsed by
/// the warehouse on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
    Timestamp,
}

impl ColumnKind {
    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnKind::Integer => DataType::Int64,
            ColumnKind::Float => DataType::Float64,
            ColumnKind::Text | ColumnKind::Timestamp => DataType::Utf8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec { name, kind }
}

use ColumnKind::{Float, Integer, Text, Timestamp};

pub const YELLOW_COLUMNS: &[ColumnSpec] = &[
    col("vendorid", Integer),
    col("tpep_pickup_datetime", Timestamp),
    col("tpep_dropoff_datetime", Timestamp),
    col("passenger_count", Integer),
    col("trip_distance", Float),
    col("ratecodeid", Integer),
    col("store_and_fwd_flag", Text),
    col("pulocationid", Integer),
    col("dolocationid", Integer),
    col("payment_type", Integer),
    col("fare_amount", Float),
    col("extra", Float),
    col("mta_tax", Float),
    col("tip_amount", Float),
    col("tolls_amount", Float),
    col("improvement_surcharge", Float),
    col("total_amount", Float),
    col("congestion_surcharge", Float),
    col("airport_fee", Float),
    col("cbd_congestion_fee", Float),
];

pub const GREEN_COLUMNS: &[ColumnSpec] = &[
    col("vendorid", Integer),
    col("lpep_pickup_datetime", Timestamp),
    col("lpep_dropoff_datetime", Timestamp),
    col("passenger_count", Integer),
    col("trip_distance", Float),
    col("ratecodeid", Integer),
    col("store_and_fwd_flag", Text),
    col("pulocationid", Integer),
    col("dolocationid", Integer),
    col("payment_type", Integer),
    col("fare_amount", Float),
    col("extra", Float),
    col("mta_tax", Float),
    col("tip_amount", Float),
    col("tolls_amount", Float),
    col("improvement_surcharge", Float),
    col("total_amount", Float),
    col("congestion_surcharge", Float),
    col("trip_type", Integer),
    col("cbd_congestion_fee", Float),
    col("ehail_fee", Float),
];

/// Lineage columns stamped onto every trip row.
pub const META_COLUMNS: &[ColumnSpec] = &[
    col("run_id", Text),
    col("ingest_ts", Text),
    col("year", Integer),
    col("month", Integer),
    col("service_type", Text),
    col("source_url", Text),
];

pub const AUDIT_COLUMNS: &[ColumnSpec] = &[
    col("service_type", Text),
    col("year", Integer),
    col("month", Integer),
    col("row_count", Integer),
    col("latest_ingest_ts", Timestamp),
    col("status", Text),
    col("note", Text),
];

pub const ZONES_COLUMNS: &[ColumnSpec] = &[
    col("locationid", Integer),
    col("borough", Text),
    col("zone", Text),
    col("service_zone", Text),
];

/// Columns read from a service's source files, before lineage stamping.
pub fn source_columns(service: Service) -> &'static [ColumnSpec] {
    match service {
        Service::Yellow => YELLOW_COLUMNS,
        Service::Green => GREEN_COLUMNS,
    }
}

/// Full canonical row layout of a fact table: source columns, then lineage.
pub fn trip_columns(service: Service) -> Vec<ColumnSpec> {
    source_columns(service)
        .iter()
        .chain(META_COLUMNS.iter())
        .copied()
        .collect()
}

pub fn schema_of(columns: &[ColumnSpec]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|c| Field::new(c.name, c.kind.arrow_type(), true))
        .collect();
    Arc::new(Schema::new(fields))
}

pub fn trip_schema(service: Service) -> SchemaRef {
    schema_of(&trip_columns(service))
}

pub fn audit_schema() -> SchemaRef {
    schema_of(AUDIT_COLUMNS)
}

pub fn zones_schema() -> SchemaRef {
    schema_of(ZONES_COLUMNS)
}

/// Column layout of a known table.
pub fn columns_for(table: &str) -> Option<Vec<ColumnSpec>> {
    match table {
        YELLOW_TABLE => Some(trip_columns(Service::Yellow)),
        GREEN_TABLE => Some(trip_columns(Service::Green)),
        AUDIT_TABLE => Some(AUDIT_COLUMNS.to_vec()),
        ZONES_TABLE => Some(ZONES_COLUMNS.to_vec()),
        _ => None,
    }
}

/// Accepts plain SQL identifiers only (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn validate_identifier(ident: &str) -> Result<&str, WarehouseError> {
    let mut chars = ident.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if ok {
        Ok(ident)
    } else {
        Err(WarehouseError::InvalidIdentifier(ident.to_string()))
    }
}
