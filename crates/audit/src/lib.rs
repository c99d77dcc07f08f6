//! Audit reconciler: derive per-partition load status from the expected
//! grid, the coverage ledger and warehouse truth, then publish it as a
//! full snapshot.

pub mod auditor;
pub mod counts;
pub mod error;
pub mod publish;
pub mod reconcile;

pub use auditor::{Auditor, StatusSummary};
pub use counts::{PartitionCount, WarehouseCounts};
pub use error::AuditError;
pub use publish::{audit_batch, publish};
pub use reconcile::reconcile;
