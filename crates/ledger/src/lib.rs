//! Coverage ledger: one persisted probe result per partition, updated by
//! non-destructive upsert.

pub mod coverage;
pub mod error;
pub mod store;

pub use coverage::{merge_records, summarize_by_service, CoverageLedger, MergeSummary, ServiceCoverage};
pub use error::LedgerError;
pub use store::{CsvLedgerStore, LedgerStore, MemoryLedgerStore};
