use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("warehouse error: {0}")]
    Warehouse(#[from] tlc_warehouse::WarehouseError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// A partition-count row the reconciler cannot interpret.
    #[error("malformed count row {row}: {reason}")]
    MalformedCounts { row: usize, reason: String },
}
