use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Source(#[from] github_mirror_source::Error),

    #[error(transparent)]
    Store(#[from] github_mirror_store::Error),

    #[error("shutting down")]
    ShuttingDown,

    #[error("user {0} is not registered")]
    UnknownUser(String),
}
