//! Idempotent bulk loader: delete a partition's prior rows, then stream its
//! source parquet files into the warehouse in bounded batches.

pub mod batches;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod locks;
pub mod normalize;
pub mod zones;

pub use batches::{RowGroupBatches, SourceBatch};
pub use error::{FetchError, LoadError};
pub use fetch::{stage, FileFetcher, HttpFetcher, SourceFetcher};
pub use loader::{plan_loads, BulkLoader, LoadSummary};
pub use locks::PartitionLocks;
pub use normalize::{BatchNormalizer, BatchStamp};
pub use zones::{read_zones, ZonesLoader};
