use thiserror::Error;

/// Store failures. `NotFound` is distinct from transport and constraint
/// errors so callers can map it to its own surface code.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("invalid record: {0}")]
    InvalidInput(&'static str),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Point lookups report a missed row as `NotFound`, everything else as-is.
pub(crate) fn not_found(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}
