//! Error types for the formulation index.

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Fatal to the in-flight batch only; nothing from it was committed.
    #[error("Batch integrity check failed: {0}")]
    BatchIntegrity(String),

    #[error("Update would leave {field} empty")]
    EmptyTermSet { field: &'static str },

    #[error("Store directory unavailable: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        IndexError::Database(DatabaseError::Sqlite(e))
    }
}
