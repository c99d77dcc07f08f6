pub mod cancel;
pub mod config;
pub mod error;
pub mod partition;
pub mod record;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use config::Config;
pub use error::*;
pub use partition::{enumerate, source_url, PartitionKey, Service};
pub use record::*;
