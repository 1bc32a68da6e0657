use std::str::FromStr;
use std::time::Duration;

use serde_json::{Map, Number, Value as JsonValue};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, TypeInfo, ValueRef};
use tracing::{Span, instrument};

use super::error::{DbError, map_sqlx_error};
use super::value::SqlValue;

/// A result row as column name → JSON value.
pub type Row = Map<String, JsonValue>;

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Rowid generated by the statement's own connection (INSERT only).
    pub last_insert_id: i64,
}

/// A prepared statement for [`Database::transaction`].
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self { sql: sql.into(), params }
    }
}

/// SQLite-backed Data Access Layer.
///
/// ## Generated ids
///
/// `insert` reads the generated id from the statement result
/// (`sqlite3_last_insert_rowid` of the connection that ran the INSERT), so
/// concurrent inserts on other pool connections cannot be observed.
///
/// ## Transactions
///
/// `transaction` runs all statements inside one SQL transaction. Any failure
/// rolls back the whole batch.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database URL (e.g. `sqlite://safework.db?mode=rwc`).
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| map_sqlx_error("connect", e))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self { pool })
    }

    /// Private in-memory database on a single pinned connection.
    pub async fn connect_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip(self), err)]
    pub async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }

    #[instrument(skip(self, params), fields(rows), err)]
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query", e))?;
        Span::current().record("rows", rows.len());
        rows.iter().map(row_to_json).collect()
    }

    #[instrument(skip(self, params), err)]
    pub async fn query_first(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, DbError> {
        let row = bind_all(sqlx::query(sql), params)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_first", e))?;
        row.as_ref().map(row_to_json).transpose()
    }

    #[instrument(skip(self, params), err)]
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecResult, DbError> {
        let done = bind_all(sqlx::query(sql), params)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("execute", e))?;
        Ok(ExecResult {
            rows_affected: done.rows_affected(),
            last_insert_id: done.last_insert_rowid(),
        })
    }

    /// Insert one row built from `fields`; returns the generated id.
    #[instrument(skip(self, fields), fields(table = %table), err)]
    pub async fn insert(&self, table: &str, fields: &[(&str, SqlValue)]) -> Result<i64, DbError> {
        check_identifier(table)?;
        if fields.is_empty() {
            return Err(DbError::Query {
                operation: "insert".to_string(),
                message: "no fields to insert".to_string(),
            });
        }
        let mut columns = Vec::with_capacity(fields.len());
        for (name, _) in fields {
            check_identifier(name)?;
            columns.push(*name);
        }
        let placeholders = vec!["?"; fields.len()].join(", ");
        let sql = format!("INSERT INTO {table} ({}) VALUES ({placeholders})", columns.join(", "));
        let params: Vec<SqlValue> = fields.iter().map(|(_, v)| v.clone()).collect();

        let done = self.execute(&sql, &params).await?;
        Ok(done.last_insert_id)
    }

    /// `UPDATE table SET fields WHERE where_clause`; `true` when any row changed.
    #[instrument(skip(self, fields, where_params), fields(table = %table), err)]
    pub async fn update(
        &self,
        table: &str,
        fields: &[(&str, SqlValue)],
        where_clause: &str,
        where_params: &[SqlValue],
    ) -> Result<bool, DbError> {
        check_identifier(table)?;
        let mut assignments = Vec::with_capacity(fields.len());
        for (name, _) in fields {
            check_identifier(name)?;
            assignments.push(format!("{name} = ?"));
        }
        let sql = format!("UPDATE {table} SET {} WHERE {where_clause}", assignments.join(", "));
        let params: Vec<SqlValue> = fields
            .iter()
            .map(|(_, v)| v.clone())
            .chain(where_params.iter().cloned())
            .collect();

        Ok(self.execute(&sql, &params).await?.rows_affected > 0)
    }

    #[instrument(skip(self, where_params), fields(table = %table), err)]
    pub async fn delete(&self, table: &str, where_clause: &str, where_params: &[SqlValue]) -> Result<bool, DbError> {
        check_identifier(table)?;
        let sql = format!("DELETE FROM {table} WHERE {where_clause}");
        Ok(self.execute(&sql, where_params).await?.rows_affected > 0)
    }

    pub async fn count(&self, table: &str, where_clause: Option<&str>, params: &[SqlValue]) -> Result<i64, DbError> {
        check_identifier(table)?;
        let sql = match where_clause {
            Some(w) => format!("SELECT COUNT(*) AS n FROM {table} WHERE {w}"),
            None => format!("SELECT COUNT(*) AS n FROM {table}"),
        };
        let row = self.query_first(&sql, params).await?;
        Ok(row.as_ref().and_then(|r| r.get("n")).and_then(JsonValue::as_i64).unwrap_or(0))
    }

    pub async fn exists(&self, table: &str, where_clause: &str, params: &[SqlValue]) -> Result<bool, DbError> {
        check_identifier(table)?;
        let sql = format!("SELECT 1 AS hit FROM {table} WHERE {where_clause} LIMIT 1");
        Ok(self.query_first(&sql, params).await?.is_some())
    }

    /// Run all statements atomically; results are in statement order.
    #[instrument(skip(self, statements), fields(statements = statements.len()), err)]
    pub async fn transaction(&self, statements: Vec<Statement>) -> Result<Vec<ExecResult>, DbError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut results = Vec::with_capacity(statements.len());
        for statement in &statements {
            // Dropping `tx` on error rolls back.
            let done = bind_all(sqlx::query(&statement.sql), &statement.params)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("transaction_statement", e))?;
            results.push(ExecResult {
                rows_affected: done.rows_affected(),
                last_insert_id: done.last_insert_rowid(),
            });
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(results)
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

/// Table and column names are interpolated, so only plain identifiers are accepted.
fn check_identifier(name: &str) -> Result<(), DbError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

fn row_to_json(row: &SqliteRow) -> Result<Row, DbError> {
    let mut out = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row
            .try_get_raw(idx)
            .map_err(|e| DbError::Decode(e.to_string()))?;
        let value = if raw.is_null() {
            JsonValue::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => {
                    JsonValue::from(row.try_get::<i64, _>(idx).map_err(|e| DbError::Decode(e.to_string()))?)
                }
                "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
                    let v: f64 = row.try_get(idx).map_err(|e| DbError::Decode(e.to_string()))?;
                    Number::from_f64(v).map(JsonValue::Number).unwrap_or(JsonValue::Null)
                }
                "BLOB" => {
                    let bytes: Vec<u8> = row.try_get(idx).map_err(|e| DbError::Decode(e.to_string()))?;
                    JsonValue::from(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => JsonValue::from(row.try_get::<String, _>(idx).map_err(|e| DbError::Decode(e.to_string()))?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}
