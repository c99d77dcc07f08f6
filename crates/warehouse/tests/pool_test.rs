//! Integration tests for the warehouse capability through the pool traits.
//!
//! Callers only ever see `Arc<dyn WarehousePool>` and `Box<dyn Warehouse>`,
//! so these tests drive the in-memory backend exactly that way.

use std::sync::Arc;

use arrow::array::{Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use tlc_core::{PartitionKey, Service};
use tlc_warehouse::tables::{audit_schema, zones_schema, AUDIT_TABLE, ZONES_TABLE};
use tlc_warehouse::{FaultOp, MemoryWarehouse, Query, Statement, WarehousePool};

fn zones(ids: &[i64]) -> RecordBatch {
    let n = ids.len();
    RecordBatch::try_new(
        zones_schema(),
        vec![
            Arc::new(Int64Array::from(ids.to_vec())),
            Arc::new(StringArray::from(vec!["Queens"; n])),
            Arc::new(StringArray::from(vec![Some("Jamaica Bay"); n])),
            Arc::new(StringArray::from(vec![None::<&str>; n])),
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn replace_table_is_all_or_nothing() {
    let memory = MemoryWarehouse::new();
    let pool: Arc<dyn WarehousePool> = Arc::new(memory.clone());

    let mut session = pool.acquire().await.unwrap();
    session.replace_table(ZONES_TABLE, &zones(&[1, 2, 3])).await.unwrap();
    assert_eq!(memory.row_count(ZONES_TABLE), 3);

    memory.fail_next(FaultOp::ReplaceTable);
    assert!(session.replace_table(ZONES_TABLE, &zones(&[9])).await.is_err());
    // Previous contents survive a failed replace.
    assert_eq!(memory.row_count(ZONES_TABLE), 3);

    let rows = memory.rows(ZONES_TABLE);
    assert_eq!(rows[0].get("service_zone"), Some(&None));
    assert_eq!(rows[2].get("locationid"), Some(&Some("3".to_string())));
}

#[tokio::test]
async fn selective_delete_keeps_rows_outside_the_grid() {
    let memory = MemoryWarehouse::new();
    let pool: Arc<dyn WarehousePool> = Arc::new(memory.clone());
    let mut session = pool.acquire().await.unwrap();

    let batch = RecordBatch::try_new(
        audit_schema(),
        vec![
            Arc::new(StringArray::from(vec!["yellow", "yellow", "green"])),
            Arc::new(Int64Array::from(vec![2014, 2020, 2020])),
            Arc::new(Int64Array::from(vec![1, 1, 1])),
            Arc::new(Int64Array::from(vec![10, 20, 30])),
            Arc::new(StringArray::from(vec![None::<&str>, None, None])),
            Arc::new(StringArray::from(vec!["OK", "OK", "OK"])),
            Arc::new(StringArray::from(vec![None::<&str>, None, None])),
        ],
    )
    .unwrap();
    session.bulk_load(AUDIT_TABLE, &batch).await.unwrap();

    let removed = session
        .execute(&Statement::DeleteServiceYears {
            table: AUDIT_TABLE.into(),
            services: vec![Service::Yellow],
            year_from: 2015,
            year_to: 2025,
        })
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(memory.row_count(AUDIT_TABLE), 2);
}

#[tokio::test]
async fn session_info_and_executed_log() {
    let memory = MemoryWarehouse::new();
    let pool: Arc<dyn WarehousePool> = Arc::new(memory.clone());
    pool.migrate().await.unwrap();
    assert_eq!(pool.backend_name(), "memory");

    let mut session = pool.acquire().await.unwrap();
    session.ping().await.unwrap();
    let info = session.query(&Query::SessionInfo).await.unwrap();
    assert_eq!(info.get_value(0, "schema_name"), Some("memory"));

    let key = PartitionKey::new(Service::Yellow, 2023, 7).unwrap();
    session.execute(&Statement::delete_partition(&key)).await.unwrap();
    drop(session);

    assert_eq!(
        memory.executed(),
        vec!["DELETE FROM yellow_trips WHERE year = 2023 AND month = 7 AND service_type = 'yellow'"]
    );
    assert_eq!(memory.open_sessions(), 0);
}

#[tokio::test]
async fn acquire_fault_is_a_connection_error() {
    let memory = MemoryWarehouse::new();
    memory.fail_next(FaultOp::Acquire);
    let err = memory.acquire().await.err().unwrap();
    assert!(err.is_connection());
    assert!(memory.acquire().await.is_ok());
}
