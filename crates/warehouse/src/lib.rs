pub mod error;
pub mod memory;
pub mod pool;
pub mod postgres;
pub mod result;
pub mod statement;
pub mod tables;

pub use error::WarehouseError;
pub use memory::{FaultOp, MemoryWarehouse};
pub use pool::{Warehouse, WarehousePool};
pub use postgres::PgWarehousePool;
pub use result::QueryResult;
pub use statement::{Query, Statement};
