use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("invalid search: {0}")]
    InvalidSearch(String),

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error(transparent)]
    Refinery(#[from] refinery::Error),

    #[error("repository {name} not found for owner {owner}")]
    RepositoryNotFound { owner: String, name: String },

    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Maps unique key violations on insert to [`Error::Conflict`], leaving
    /// every other failure as is.
    pub(crate) fn from_insert(err: rusqlite::Error, what: String) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(what)
            }
            _ => Self::Rusqlite(err),
        }
    }
}
