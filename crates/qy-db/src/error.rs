//! Error types for qy-db

use thiserror::Error;

/// Warehouse errors surfaced to the runner
#[derive(Error, Debug, Clone)]
pub enum DbError {
    /// D001: the database file or catalog could not be opened
    #[error("[D001] Unable to open the warehouse: {0}")]
    Connect(String),

    /// D002: the warehouse rejected a statement
    #[error("[D002] Database error: {0}")]
    Query(String),

    /// D003: a statement named a relation that does not exist
    #[error("[D003] Relation does not exist: {0}")]
    MissingRelation(String),

    /// D004: a seed file could not be read or loaded
    #[error("[D004] Unable to load seed: {0}")]
    SeedLoad(String),

    /// D005: the pool was closed while a node waited for a connection
    #[error("[D005] Connection pool closed: {0}")]
    PoolClosed(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        let msg = err.to_string();
        let missing = ["Table with name", "View with name", "Table or view with name"]
            .iter()
            .any(|needle| msg.contains(needle))
            || (msg.starts_with("Catalog Error") && msg.contains("does not exist"));
        if missing {
            DbError::MissingRelation(msg)
        } else {
            DbError::Query(msg)
        }
    }
}
