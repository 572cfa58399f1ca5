//! `source` provides read access to the remote code hosting platform that the
//! mirror is populated from.
//!
//! The [`Source`] trait is the seam between the synchronisation engine and the
//! network: [`GitHubSource`] talks to the GitHub REST API, while tests provide
//! their own scripted implementations.

use std::fmt::Debug;

use async_trait::async_trait;

mod error;
pub use self::error::Error;

mod github;
pub use self::github::{GitHubSource, Opt};

mod types;
pub use self::types::{CommitInfo, RepositoryInfo};

#[async_trait]
pub trait Source: Debug + Send + Sync {
    /// Fetches the current metadata of a single repository.
    async fn repository_info(&self, owner: &str, repo: &str) -> Result<RepositoryInfo, Error>;

    /// Fetches the commit list of a single repository, newest first.
    async fn repository_commits(&self, owner: &str, repo: &str) -> Result<Vec<CommitInfo>, Error>;

    /// Fetches every repository owned by `owner`.
    async fn user_repositories(&self, owner: &str) -> Result<Vec<RepositoryInfo>, Error>;
}
