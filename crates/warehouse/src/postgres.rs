use std::time::Duration;

use arrow::csv::WriterBuilder;
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, Connection, PgPool, Postgres, Row};
use tlc_core::config::WarehouseConfig;
use tracing::{debug, info};

use crate::error::WarehouseError;
use crate::pool::{Warehouse, WarehousePool};
use crate::result::QueryResult;
use crate::statement::{Query, Statement};
use crate::tables::validate_identifier;

/// PostgreSQL-backed warehouse.
///
/// Every pooled connection has its `search_path` pinned to the configured
/// schema, so statements use unqualified table names.
#[derive(Debug, Clone)]
pub struct PgWarehousePool {
    pool: PgPool,
    schema: String,
}

impl PgWarehousePool {
    pub async fn connect(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        let schema = validate_identifier(&config.schema)?.to_string();
        let search_path = format!("SET search_path TO {}", schema);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                let sql = search_path.clone();
                Box::pin(async move {
                    sqlx::query(&sql).execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect(&config.connection_string())
            .await?;

        info!(
            "PostgreSQL connected: {}:{}/{} (schema {})",
            config.host, config.port, config.database, schema
        );
        Ok(Self { pool, schema })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }
}

#[async_trait]
impl WarehousePool for PgWarehousePool {
    async fn acquire(&self) -> Result<Box<dyn Warehouse>, WarehouseError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgSession { conn }))
    }

    async fn migrate(&self) -> Result<(), WarehouseError> {
        let create = format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema);
        sqlx::query(&create).execute(&self.pool).await?;
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations applied successfully");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// A checked-out connection. Dropping it returns the connection to the pool.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

// ── COPY helpers ──────────────────────────────────────────────

fn copy_statement(table: &str, schema: &Schema) -> Result<String, WarehouseError> {
    validate_identifier(table)?;
    let mut cols = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        cols.push(validate_identifier(field.name())?);
    }
    Ok(format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv)",
        table,
        cols.join(", ")
    ))
}

/// Headerless CSV, nulls as empty unquoted fields (COPY's csv NULL).
fn encode_csv(batch: &RecordBatch) -> Result<Vec<u8>, WarehouseError> {
    let mut buf = Vec::new();
    {
        let mut writer = WriterBuilder::new().with_header(false).build(&mut buf);
        writer.write(batch)?;
    }
    Ok(buf)
}

/// Decode one cell as text. Typed queries cast to text server-side; raw
/// queries fall back through the common scalar types.
fn cell_text(row: &PgRow, idx: usize) -> Result<Option<String>, WarehouseError> {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return Ok(v.map(|n| n.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return Ok(v.map(|n| n.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return Ok(v.map(|n| n.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return Ok(v.map(|b| b.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return Ok(v.map(|t| t.format(tlc_core::TIMESTAMP_FORMAT).to_string()));
    }
    Err(WarehouseError::Unsupported(format!(
        "column {} has a type that cannot be rendered as text",
        row.columns()[idx].name()
    )))
}

async fn copy_batch(
    conn: &mut sqlx::PgConnection,
    table: &str,
    batch: &RecordBatch,
) -> Result<u64, WarehouseError> {
    let sql = copy_statement(table, batch.schema().as_ref())?;
    let payload = encode_csv(batch)?;
    let mut copy = conn.copy_in_raw(&sql).await?;
    copy.send(payload).await?;
    let rows = copy.finish().await?;
    Ok(rows)
}

#[async_trait]
impl Warehouse for PgSession {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64, WarehouseError> {
        stmt.validate()?;
        let sql = stmt.sql();
        debug!(sql = %sql, "execute");
        let done = sqlx::query(&sql).execute(&mut *self.conn).await?;
        Ok(done.rows_affected())
    }

    async fn bulk_load(&mut self, table: &str, batch: &RecordBatch) -> Result<u64, WarehouseError> {
        if batch.num_rows() == 0 {
            return Ok(0);
        }
        copy_batch(&mut self.conn, table, batch).await
    }

    async fn query(&mut self, query: &Query) -> Result<QueryResult, WarehouseError> {
        query.validate()?;
        let sql = query.sql();
        let rows = sqlx::query(&sql).fetch_all(&mut *self.conn).await?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => Vec::new(),
        };
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut cells = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                cells.push(cell_text(row, idx)?);
            }
            out.push(cells);
        }
        Ok(QueryResult::new(columns, out))
    }

    async fn ping(&mut self) -> Result<(), WarehouseError> {
        self.conn.ping().await?;
        Ok(())
    }

    async fn replace_table(
        &mut self,
        table: &str,
        batch: &RecordBatch,
    ) -> Result<u64, WarehouseError> {
        let truncate = Statement::truncate(table);
        truncate.validate()?;

        let mut tx = self.conn.begin().await?;
        sqlx::query(&truncate.sql()).execute(&mut *tx).await?;
        let rows = if batch.num_rows() == 0 {
            0
        } else {
            copy_batch(&mut tx, table, batch).await?
        };
        tx.commit().await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field};
    use std::sync::Arc;

    fn zones_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("locationid", DataType::Int64, true),
            Field::new("zone", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![Some(1), None])),
                Arc::new(StringArray::from(vec![Some("Newark Airport"), Some("Jamaica Bay, Queens")])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn copy_statement_lists_columns() {
        let batch = zones_batch();
        let sql = copy_statement("taxi_zones", batch.schema().as_ref()).unwrap();
        assert_eq!(sql, "COPY taxi_zones (locationid, zone) FROM STDIN WITH (FORMAT csv)");
        assert!(copy_statement("taxi zones", batch.schema().as_ref()).is_err());
    }

    #[test]
    fn csv_payload_has_no_header_and_empty_nulls() {
        let payload = String::from_utf8(encode_csv(&zones_batch()).unwrap()).unwrap();
        let lines: Vec<&str> = payload.lines().collect();
        assert_eq!(lines, vec!["1,Newark Airport", ",\"Jamaica Bay, Queens\""]);
    }
}
