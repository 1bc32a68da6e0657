//! Error mapping for the Data Access Layer.
//!
//! | sqlx error | SQLite code | `DbError` |
//! |------------|-------------|-----------|
//! | Database (constraint, any) | 19 | `Constraint` |
//! | Database (unique / primary key) | 2067 / 1555 | `Constraint` |
//! | Database (check / not null / fk) | 275 / 1299 / 787 | `Constraint` |
//! | Database (other) | any | `Query` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` |
//! | ColumnDecode / Decode | N/A | `Decode` |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error in {operation}: {message}")]
    Query { operation: String, message: String },

    #[error("constraint violated in {operation}: {message}")]
    Constraint { operation: String, message: String },

    #[error("database unavailable in {operation}: {message}")]
    Unavailable { operation: String, message: String },

    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("failed to decode row: {0}")]
    Decode(String),
}

pub fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DbError {
    let operation = operation.to_string();
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            match db_err.code().as_deref() {
                Some("19" | "2067" | "1555" | "275" | "1299" | "787") => DbError::Constraint { operation, message },
                _ => DbError::Query { operation, message },
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => DbError::Unavailable {
            operation,
            message: err.to_string(),
        },
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            DbError::Decode(format!("{operation}: {err}"))
        }
        other => DbError::Query {
            operation,
            message: other.to_string(),
        },
    }
}
