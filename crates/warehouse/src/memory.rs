//! In-memory warehouse used by tests and `--dry-run`.
//!
//! Rows are stored as column-name → text maps, rendered with arrow's display
//! formatter so they compare the same way the Postgres text casts do. Faults
//! can be injected per operation to exercise the loader's error paths.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use async_trait::async_trait;
use tlc_core::{PartitionKey, Service};
use tracing::debug;

use crate::error::WarehouseError;
use crate::pool::{Warehouse, WarehousePool};
use crate::result::QueryResult;
use crate::statement::{Query, Statement};
use crate::tables::KNOWN_TABLES;

pub type MemoryRow = BTreeMap<String, Option<String>>;

/// Operation a one-shot injected fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    Acquire,
    /// Any `execute` call.
    Execute,
    /// Only `Statement::DeletePartition`.
    DeletePartition,
    BulkLoad,
    /// `bulk_load` failing as if the connection dropped mid-copy.
    BulkLoadConnection,
    Query,
    ReplaceTable,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Vec<MemoryRow>>,
    faults: Vec<FaultOp>,
    failing_pings: usize,
    acquired: usize,
    released: usize,
    statements: Vec<String>,
}

impl State {
    fn take_fault(&mut self, op: FaultOp) -> Result<(), WarehouseError> {
        match self.faults.iter().position(|f| *f == op) {
            Some(idx) => {
                self.faults.remove(idx);
                let message = format!("injected {:?} fault", op);
                Err(match op {
                    FaultOp::BulkLoadConnection => WarehouseError::Connection(message),
                    _ => WarehouseError::Database(message),
                })
            }
            None => Ok(()),
        }
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut Vec<MemoryRow>, WarehouseError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| WarehouseError::UnknownTable(table.to_string()))
    }
}

/// Shared handle; clones see the same tables.
#[derive(Debug, Clone)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWarehouse {
    /// A warehouse with every catalogue table present and empty.
    pub fn new() -> Self {
        let mut state = State::default();
        for table in KNOWN_TABLES {
            state.tables.insert(table.to_string(), Vec::new());
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next call matching `op`.
    pub fn fail_next(&self, op: FaultOp) {
        self.lock().faults.push(op);
    }

    /// Fail the next `n` pings with a connection error.
    pub fn fail_pings(&self, n: usize) {
        self.lock().failing_pings = n;
    }

    pub fn rows(&self, table: &str) -> Vec<MemoryRow> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map(|r| r.len()).unwrap_or(0)
    }

    /// Rows of the key's fact table belonging to that partition.
    pub fn partition_rows(&self, key: &PartitionKey) -> usize {
        let state = self.lock();
        state
            .tables
            .get(key.service().table_name())
            .map(|rows| rows.iter().filter(|r| row_in_partition(r, key)).count())
            .unwrap_or(0)
    }

    /// Insert `rows` minimal trip rows for a partition.
    pub fn seed_partition(&self, key: &PartitionKey, rows: usize, ingest_ts: &str) {
        let mut state = self.lock();
        let table = state
            .tables
            .entry(key.service().table_name().to_string())
            .or_default();
        for _ in 0..rows {
            let mut row = MemoryRow::new();
            row.insert("year".into(), Some(key.year().to_string()));
            row.insert("month".into(), Some(key.month().to_string()));
            row.insert("service_type".into(), Some(key.service().to_string()));
            row.insert("ingest_ts".into(), Some(ingest_ts.to_string()));
            table.push(row);
        }
    }

    /// SQL text of every statement executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn acquired(&self) -> usize {
        self.lock().acquired
    }

    pub fn released(&self) -> usize {
        self.lock().released
    }

    /// Sessions currently checked out.
    pub fn open_sessions(&self) -> usize {
        let state = self.lock();
        state.acquired - state.released
    }
}

fn row_in_partition(row: &MemoryRow, key: &PartitionKey) -> bool {
    field_eq(row, "year", &key.year().to_string())
        && field_eq(row, "month", &key.month().to_string())
        && field_eq(row, "service_type", key.service().as_str())
}

fn field_eq(row: &MemoryRow, col: &str, value: &str) -> bool {
    matches!(row.get(col), Some(Some(v)) if v == value)
}

fn field_i32(row: &MemoryRow, col: &str) -> Option<i32> {
    row.get(col)?.as_deref()?.parse().ok()
}

fn batch_rows(batch: &RecordBatch) -> Result<Vec<MemoryRow>, WarehouseError> {
    let schema = batch.schema();
    let options = FormatOptions::default();
    let mut formatters = Vec::with_capacity(batch.num_columns());
    for column in batch.columns() {
        formatters.push(ArrayFormatter::try_new(column.as_ref(), &options)?);
    }

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let mut row = MemoryRow::new();
        for (idx, field) in schema.fields().iter().enumerate() {
            let value = if batch.column(idx).is_null(i) {
                None
            } else {
                Some(formatters[idx].value(i).to_string())
            };
            row.insert(field.name().clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

fn partition_counts(rows: &[MemoryRow], service: Service) -> QueryResult {
    let mut groups: BTreeMap<(i32, i32), (u64, Option<String>)> = BTreeMap::new();
    for row in rows.iter().filter(|r| field_eq(r, "service_type", service.as_str())) {
        let (Some(year), Some(month)) = (field_i32(row, "year"), field_i32(row, "month")) else {
            continue;
        };
        let entry = groups.entry((year, month)).or_insert((0, None));
        entry.0 += 1;
        if let Some(Some(ts)) = row.get("ingest_ts") {
            if entry.1.as_deref().map_or(true, |cur| ts.as_str() > cur) {
                entry.1 = Some(ts.clone());
            }
        }
    }

    let columns = ["service_type", "year", "month", "row_count", "latest_ingest_ts"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    let rows = groups
        .into_iter()
        .map(|((year, month), (count, latest))| {
            vec![
                Some(service.to_string()),
                Some(year.to_string()),
                Some(month.to_string()),
                Some(count.to_string()),
                latest,
            ]
        })
        .collect();
    QueryResult::new(columns, rows)
}

// ── Session ───────────────────────────────────────────────────

pub struct MemorySession {
    state: Arc<Mutex<State>>,
}

impl MemorySession {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.lock().released += 1;
    }
}

#[async_trait]
impl Warehouse for MemorySession {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64, WarehouseError> {
        stmt.validate()?;
        let mut state = self.lock();
        state.take_fault(FaultOp::Execute)?;
        if matches!(stmt, Statement::DeletePartition { .. }) {
            state.take_fault(FaultOp::DeletePartition)?;
        }
        state.statements.push(stmt.sql());

        match stmt {
            Statement::DeletePartition { table, key } => {
                let rows = state.table_mut(table)?;
                let before = rows.len();
                rows.retain(|r| !row_in_partition(r, key));
                Ok((before - rows.len()) as u64)
            }
            Statement::Truncate { table } => {
                let rows = state.table_mut(table)?;
                let removed = rows.len();
                rows.clear();
                Ok(removed as u64)
            }
            Statement::DeleteServiceYears {
                table,
                services,
                year_from,
                year_to,
            } => {
                let rows = state.table_mut(table)?;
                let before = rows.len();
                rows.retain(|r| {
                    let in_service = services.iter().any(|s| field_eq(r, "service_type", s.as_str()));
                    let in_years = field_i32(r, "year")
                        .map(|y| (*year_from..=*year_to).contains(&y))
                        .unwrap_or(false);
                    !(in_service && in_years)
                });
                Ok((before - rows.len()) as u64)
            }
            Statement::Raw(sql) => Err(WarehouseError::Unsupported(sql.clone())),
        }
    }

    async fn bulk_load(&mut self, table: &str, batch: &RecordBatch) -> Result<u64, WarehouseError> {
        let new_rows = batch_rows(batch)?;
        let mut state = self.lock();
        state.take_fault(FaultOp::BulkLoad)?;
        state.take_fault(FaultOp::BulkLoadConnection)?;
        let rows = state.table_mut(table)?;
        let n = new_rows.len() as u64;
        rows.extend(new_rows);
        debug!(table, rows = n, "memory bulk load");
        Ok(n)
    }

    async fn query(&mut self, query: &Query) -> Result<QueryResult, WarehouseError> {
        query.validate()?;
        let mut state = self.lock();
        state.take_fault(FaultOp::Query)?;
        match query {
            Query::PartitionCounts { table, service } => {
                let rows = state.table_mut(table)?;
                Ok(partition_counts(rows, *service))
            }
            Query::SessionInfo => Ok(QueryResult::new(
                vec!["user_name".into(), "database_name".into(), "schema_name".into()],
                vec![vec![
                    Some("memory".into()),
                    Some("memory".into()),
                    Some("memory".into()),
                ]],
            )),
            Query::Raw(sql) => Err(WarehouseError::Unsupported(sql.clone())),
        }
    }

    async fn ping(&mut self) -> Result<(), WarehouseError> {
        let mut state = self.lock();
        if state.failing_pings > 0 {
            state.failing_pings -= 1;
            return Err(WarehouseError::Connection("injected ping failure".into()));
        }
        Ok(())
    }

    async fn replace_table(
        &mut self,
        table: &str,
        batch: &RecordBatch,
    ) -> Result<u64, WarehouseError> {
        let new_rows = batch_rows(batch)?;
        let mut state = self.lock();
        state.take_fault(FaultOp::ReplaceTable)?;
        state.statements.push(Statement::truncate(table).sql());
        let rows = state.table_mut(table)?;
        let n = new_rows.len() as u64;
        *rows = new_rows;
        Ok(n)
    }
}

#[async_trait]
impl WarehousePool for MemoryWarehouse {
    async fn acquire(&self) -> Result<Box<dyn Warehouse>, WarehouseError> {
        let mut state = self.lock();
        if let Some(idx) = state.faults.iter().position(|f| *f == FaultOp::Acquire) {
            state.faults.remove(idx);
            return Err(WarehouseError::Connection("injected acquire failure".into()));
        }
        state.acquired += 1;
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
        }))
    }

    async fn migrate(&self) -> Result<(), WarehouseError> {
        let mut state = self.lock();
        for table in KNOWN_TABLES {
            state.tables.entry(table.to_string()).or_default();
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    fn key(month: u32) -> PartitionKey {
        PartitionKey::new(Service::Yellow, 2024, month).unwrap()
    }

    fn trip_batch(month: i64, n: usize) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("year", DataType::Int64, true),
            Field::new("month", DataType::Int64, true),
            Field::new("service_type", DataType::Utf8, true),
            Field::new("ingest_ts", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![2024; n])),
                Arc::new(Int64Array::from(vec![month; n])),
                Arc::new(StringArray::from(vec!["yellow"; n])),
                Arc::new(StringArray::from(vec!["2024-05-01 10:00:00"; n])),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn delete_partition_only_touches_its_partition() {
        let wh = MemoryWarehouse::new();
        let mut session = wh.acquire().await.unwrap();
        session.bulk_load("yellow_trips", &trip_batch(1, 3)).await.unwrap();
        session.bulk_load("yellow_trips", &trip_batch(2, 2)).await.unwrap();

        let removed = session.execute(&Statement::delete_partition(&key(1))).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(wh.partition_rows(&key(1)), 0);
        assert_eq!(wh.partition_rows(&key(2)), 2);
    }

    #[tokio::test]
    async fn sessions_are_released_on_drop() {
        let wh = MemoryWarehouse::new();
        {
            let _a = wh.acquire().await.unwrap();
            let _b = wh.acquire().await.unwrap();
            assert_eq!(wh.open_sessions(), 2);
        }
        assert_eq!(wh.acquired(), 2);
        assert_eq!(wh.released(), 2);
        assert_eq!(wh.open_sessions(), 0);
    }

    #[tokio::test]
    async fn injected_faults_fire_once() {
        let wh = MemoryWarehouse::new();
        wh.fail_next(FaultOp::DeletePartition);
        wh.fail_pings(1);
        let mut session = wh.acquire().await.unwrap();

        assert!(session.ping().await.unwrap_err().is_connection());
        assert!(session.ping().await.is_ok());

        // Truncate is not a DeletePartition, so the fault is still armed.
        session.execute(&Statement::truncate("yellow_trips")).await.unwrap();
        assert!(session.execute(&Statement::delete_partition(&key(1))).await.is_err());
        assert!(session.execute(&Statement::delete_partition(&key(1))).await.is_ok());
    }

    #[tokio::test]
    async fn bulk_load_connection_fault_is_a_connection_error() {
        let wh = MemoryWarehouse::new();
        wh.fail_next(FaultOp::BulkLoadConnection);
        let mut session = wh.acquire().await.unwrap();

        let err = session.bulk_load("yellow_trips", &trip_batch(1, 2)).await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(wh.partition_rows(&key(1)), 0);
        session.bulk_load("yellow_trips", &trip_batch(1, 2)).await.unwrap();
        assert_eq!(wh.partition_rows(&key(1)), 2);
    }

    #[tokio::test]
    async fn partition_counts_group_by_month() {
        let wh = MemoryWarehouse::new();
        wh.seed_partition(&key(1), 4, "2024-05-01 09:00:00");
        wh.seed_partition(&key(1), 1, "2024-05-02 09:00:00");
        wh.seed_partition(&key(3), 2, "2024-05-01 09:00:00");

        let mut session = wh.acquire().await.unwrap();
        let result = session.query(&Query::partition_counts(Service::Yellow)).await.unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.get_value(0, "month"), Some("1"));
        assert_eq!(result.get_value(0, "row_count"), Some("5"));
        assert_eq!(result.get_value(0, "latest_ingest_ts"), Some("2024-05-02 09:00:00"));
        assert_eq!(result.get_value(1, "row_count"), Some("2"));
    }

    #[tokio::test]
    async fn unknown_tables_and_raw_sql_are_rejected() {
        let wh = MemoryWarehouse::new();
        let mut session = wh.acquire().await.unwrap();
        let err = session.bulk_load("fhv_trips", &trip_batch(1, 1)).await.unwrap_err();
        assert!(matches!(err, WarehouseError::UnknownTable(_)));
        let err = session.execute(&Statement::Raw("VACUUM".into())).await.unwrap_err();
        assert!(matches!(err, WarehouseError::Unsupported(_)));
    }

    #[tokio::test]
    async fn replace_table_swaps_contents() {
        let wh = MemoryWarehouse::new();
        let mut session = wh.acquire().await.unwrap();
        session.bulk_load("load_audit", &trip_batch(1, 5)).await.unwrap();
        let n = session.replace_table("load_audit", &trip_batch(2, 2)).await.unwrap();
        assert_eq!(n, 2);
        let rows = wh.rows("load_audit");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("month"), Some(&Some("2".to_string())));
    }
}
