//! Partition identity: one (service, year, month) slice of the trip dataset.
//!
//! Every other component keys its work and its records by [`PartitionKey`].
//! The ordering derived here (service, then year, then month) is the canonical
//! ordering used for the expected grid, the coverage file and the audit table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Trip-record dataset variant. Declaration order is the canonical sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Yellow,
    Green,
}

impl Service {
    pub const ALL: [Service; 2] = [Service::Yellow, Service::Green];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Yellow => "yellow",
            Service::Green => "green",
        }
    }

    /// Warehouse fact table holding this service's trips.
    pub fn table_name(&self) -> &'static str {
        match self {
            Service::Yellow => "yellow_trips",
            Service::Green => "green_trips",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yellow" => Ok(Service::Yellow),
            "green" => Ok(Service::Green),
            _ => Err(CoreError::UnknownService(s.to_string())),
        }
    }
}

/// Identity of one unit of ingestion work.
///
/// Fields are private so the month range can only be established through
/// [`PartitionKey::new`]; deserialization goes through the same check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawPartitionKey")]
pub struct PartitionKey {
    service: Service,
    year: i32,
    month: u8,
}

#[derive(Deserialize)]
struct RawPartitionKey {
    service: Service,
    year: i32,
    month: u32,
}

impl TryFrom<RawPartitionKey> for PartitionKey {
    type Error = CoreError;

    fn try_from(raw: RawPartitionKey) -> Result<Self, Self::Error> {
        PartitionKey::new(raw.service, raw.year, raw.month)
    }
}

impl PartitionKey {
    pub fn new(service: Service, year: i32, month: u32) -> Result<Self, CoreError> {
        if !(1..=12).contains(&month) {
            return Err(CoreError::InvalidMonth(month));
        }
        Ok(Self {
            service,
            year,
            month: month as u8,
        })
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month as u32
    }

    /// Source file name, e.g. `yellow_tripdata_2024-01.parquet`.
    pub fn file_name(&self) -> String {
        format!(
            "{}_tripdata_{}-{:02}.parquet",
            self.service, self.year, self.month
        )
    }

    /// Human-readable label used in log lines, e.g. `yellow 2024-01`.
    pub fn label(&self) -> String {
        format!("{} {}-{:02}", self.service, self.year, self.month)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{:02}", self.service, self.year, self.month)
    }
}

/// Full expected grid: services × years × 12 months, ordered by key.
///
/// Duplicate services are collapsed. An inverted year range yields an empty grid.
pub fn enumerate(services: &[Service], year_from: i32, year_to: i32) -> Vec<PartitionKey> {
    let mut services = services.to_vec();
    services.sort();
    services.dedup();

    let mut keys = Vec::new();
    for service in services {
        for year in year_from..=year_to {
            for month in 1..=12u8 {
                keys.push(PartitionKey {
                    service,
                    year,
                    month,
                });
            }
        }
    }
    keys
}

/// Canonical remote location of a partition's parquet file.
pub fn source_url(base: &str, key: &PartitionKey) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.file_name())
}
