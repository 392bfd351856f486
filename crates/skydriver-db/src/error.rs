use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("scan '{0}' not found")]
    NotFound(String),
    #[error("scan '{0}' already exists")]
    AlreadyExists(String),
    #[error("cannot change an existing {0}")]
    ImmutableFieldConflict(&'static str),
    #[error("backend error: {0}")]
    Backend(String),
}
