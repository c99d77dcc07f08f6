use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid month {0}: expected 1..=12")]
    InvalidMonth(u32),

    #[error("unknown service type: {0:?}")]
    UnknownService(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
