//! qy-db - Adapter layer for quarry
//!
//! Defines the [`Adapter`] and [`Connection`] traits materializations talk
//! to, a bounded [`ConnectionPool`], and the DuckDB implementation.

pub mod duckdb;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod pool;
pub mod traits;

pub use crate::duckdb::{DuckDbAdapter, DuckDbConnection};
pub use error::{DbError, DbResult};
#[cfg(any(test, feature = "test-support"))]
pub use mock::{MockAdapter, RecordedStatement};
pub use pool::{ConnectionPool, PooledConnection};
pub use traits::{Adapter, AdapterResponse, Column, Connection, CsvLoadOptions, QueryResult};
