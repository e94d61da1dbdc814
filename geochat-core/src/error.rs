use thiserror::Error;

/// Store outcome taxonomy. Absence is never an error: lookups return
/// `Ok(None)` so callers can tell "not found" apart from a query failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Uniqueness violation on the named column (maps to HTTP 409).
    #[error("duplicate value for {0}")]
    Conflict(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted chat_history column did not decode to a turn sequence,
    /// or an in-memory history failed to encode before a write.
    #[error("malformed chat history: {0}")]
    MalformedHistory(#[from] serde_json::Error),
}
