use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid API base URL {0}")]
    BaseUrl(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("{0} not found on the remote platform")]
    NotFound(String),

    #[error("rate limit exhausted; resets at epoch {reset:?}")]
    RateLimited { reset: Option<u64> },

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
