use arrow::record_batch::RecordBatch;
use async_trait::async_trait;

use crate::error::WarehouseError;
use crate::result::QueryResult;
use crate::statement::{Query, Statement};

/// One warehouse session, checked out of a [`WarehousePool`].
///
/// Dropping the session returns the underlying connection to its pool, on
/// every exit path.
#[async_trait]
pub trait Warehouse: Send {
    /// Run a statement and return the number of rows it affected.
    async fn execute(&mut self, stmt: &Statement) -> Result<u64, WarehouseError>;

    /// Append a batch to a table. Columns are matched by name.
    async fn bulk_load(&mut self, table: &str, batch: &RecordBatch) -> Result<u64, WarehouseError>;

    async fn query(&mut self, query: &Query) -> Result<QueryResult, WarehouseError>;

    /// Cheap liveness check.
    async fn ping(&mut self) -> Result<(), WarehouseError>;

    /// Replace a table's full contents with `batch`. Readers see either the
    /// old or the new contents on backends with transactions.
    async fn replace_table(&mut self, table: &str, batch: &RecordBatch)
        -> Result<u64, WarehouseError>;
}

#[async_trait]
pub trait WarehousePool: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn Warehouse>, WarehouseError>;

    /// Apply pending schema migrations. Run once at startup.
    async fn migrate(&self) -> Result<(), WarehouseError>;

    fn backend_name(&self) -> &'static str;
}
