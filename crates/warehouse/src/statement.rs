//! Typed SQL builders.
//!
//! Callers describe *what* to run; backends either render the statement to
//! SQL (`sql()`) or interpret it directly (the in-memory warehouse). Table
//! names are unqualified: the Postgres backend pins `search_path` to the
//! configured schema on every connection.

use tlc_core::{PartitionKey, Service};

use crate::error::WarehouseError;
use crate::tables::validate_identifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Remove every row of one natural partition.
    DeletePartition { table: String, key: PartitionKey },
    Truncate { table: String },
    /// Remove the rows of the given services within an inclusive year range.
    DeleteServiceYears {
        table: String,
        services: Vec<Service>,
        year_from: i32,
        year_to: i32,
    },
    Raw(String),
}

impl Statement {
    /// Delete statement against the key's own fact table.
    pub fn delete_partition(key: &PartitionKey) -> Self {
        Statement::DeletePartition {
            table: key.service().table_name().to_string(),
            key: *key,
        }
    }

    pub fn truncate(table: &str) -> Self {
        Statement::Truncate {
            table: table.to_string(),
        }
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            Statement::DeletePartition { table, .. }
            | Statement::Truncate { table }
            | Statement::DeleteServiceYears { table, .. } => Some(table),
            Statement::Raw(_) => None,
        }
    }

    pub fn validate(&self) -> Result<(), WarehouseError> {
        if let Some(table) = self.table() {
            validate_identifier(table)?;
        }
        Ok(())
    }

    pub fn sql(&self) -> String {
        match self {
            Statement::DeletePartition { table, key } => format!(
                "DELETE FROM {} WHERE year = {} AND month = {} AND service_type = '{}'",
                table,
                key.year(),
                key.month(),
                key.service()
            ),
            Statement::Truncate { table } => format!("TRUNCATE TABLE {}", table),
            Statement::DeleteServiceYears {
                table,
                services,
                year_from,
                year_to,
            } => {
                if services.is_empty() {
                    return format!("DELETE FROM {} WHERE false", table);
                }
                let list = services
                    .iter()
                    .map(|s| format!("'{}'", s))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "DELETE FROM {} WHERE service_type IN ({}) AND year BETWEEN {} AND {}",
                    table, list, year_from, year_to
                )
            }
            Statement::Raw(sql) => sql.clone(),
        }
    }
}

/// Read-only queries. Every typed query returns text columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Row count and latest ingest timestamp per (year, month) of one fact table.
    ///
    /// Columns: `service_type, year, month, row_count, latest_ingest_ts`.
    PartitionCounts { table: String, service: Service },
    /// Columns: `user_name, database_name, schema_name`.
    SessionInfo,
    Raw(String),
}

impl Query {
    pub fn partition_counts(service: Service) -> Self {
        Query::PartitionCounts {
            table: service.table_name().to_string(),
            service,
        }
    }

    pub fn validate(&self) -> Result<(), WarehouseError> {
        if let Query::PartitionCounts { table, .. } = self {
            validate_identifier(table)?;
        }
        Ok(())
    }

    pub fn sql(&self) -> String {
        match self {
            Query::PartitionCounts { table, service } => format!(
                "SELECT '{svc}' AS service_type, year::text AS year, month::text AS month, \
                 count(*)::text AS row_count, max(ingest_ts)::text AS latest_ingest_ts \
                 FROM {table} WHERE service_type = '{svc}' GROUP BY year, month",
                svc = service,
                table = table
            ),
            Query::SessionInfo => "SELECT current_user::text AS user_name, \
                 current_database()::text AS database_name, \
                 current_schema()::text AS schema_name"
                .to_string(),
            Query::Raw(sql) => sql.clone(),
        }
    }
}
