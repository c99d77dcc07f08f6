use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// A persisted row that cannot be turned back into a record.
    #[error("corrupt ledger row {row}: {reason}")]
    Corrupt { row: usize, reason: String },
}
