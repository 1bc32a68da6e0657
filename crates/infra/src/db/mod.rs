//! Data Access Layer.
//!
//! A typed capability wrapper over the relational engine (SQLite via sqlx):
//! parameterized query, insert returning the generated id, update, delete,
//! count, exists, and an atomic multi-statement transaction.
//!
//! No retry, caching or survey semantics live here.

pub mod database;
pub mod error;
pub mod migrations;
pub mod value;

pub use database::{Database, ExecResult, Row, Statement};
pub use error::{DbError, map_sqlx_error};
pub use migrations::run_migrations;
pub use value::{SqlValue, format_timestamp, parse_timestamp};
