//! Persistence for mirrored users, repositories and commits.
//!
//! [`Store`] is the capability the synchronisation engine is written against.
//! [`SqliteStore`] is the on-disk implementation; [`MemoryStore`] keeps
//! everything in process and enforces the same unique keys.

use std::fmt::Debug;

use async_trait::async_trait;
use github_mirror_source::{CommitInfo, RepositoryInfo};

mod connection;
pub use connection::Connection;

mod error;
pub use error::Error;

mod memory;
pub use memory::MemoryStore;

mod sqlite;
pub use sqlite::SqliteStore;

mod types;
pub use types::*;

#[cfg(test)]
mod tests;

#[async_trait]
pub trait Store: Debug + Send + Sync {
    /// Creates a user, or updates the display name if the username is already
    /// registered.
    async fn create_or_update_user(&self, user: &NewUser) -> Result<User, Error>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, Error>;

    async fn get_repository_by_remote_id(&self, remote_id: i64)
        -> Result<Option<Repository>, Error>;

    async fn get_repository_by_owner_and_name(
        &self,
        owner_id: ID,
        name: &str,
    ) -> Result<Option<Repository>, Error>;

    /// Inserts a new repository row. Returns [`Error::Conflict`] if the remote
    /// identifier or the owner and name pair already exist.
    async fn insert_repository(
        &self,
        owner: &User,
        info: &RepositoryInfo,
    ) -> Result<Repository, Error>;

    async fn update_repository(&self, repository: &Repository) -> Result<(), Error>;

    async fn get_commit_by_sha(&self, sha: &str) -> Result<Option<Commit>, Error>;

    /// Inserts a new commit row. Returns [`Error::Conflict`] if the hash
    /// already exists.
    async fn insert_commit(
        &self,
        repository_name: &str,
        commit: &CommitInfo,
    ) -> Result<Commit, Error>;

    async fn get_commits_by_repository_name(&self, name: &str) -> Result<Vec<Commit>, Error>;

    async fn list_all_repositories(&self) -> Result<Vec<OwnedRepository>, Error>;

    async fn search_repositories(
        &self,
        owner_id: ID,
        params: &SearchParams,
    ) -> Result<Vec<Repository>, Error>;

    /// Stores freshly fetched repository metadata.
    ///
    /// Repositories are keyed by their remote identifier. A new identifier is
    /// inserted; a known one is only written if the remote update timestamp
    /// differs from the stored one, otherwise the stored row is returned as
    /// is.
    async fn upsert_repository(
        &self,
        info: &RepositoryInfo,
        owner: &User,
    ) -> Result<Repository, Error> {
        let existing = match self.get_repository_by_remote_id(info.id).await? {
            Some(repository) => repository,
            None => match self.insert_repository(owner, info).await {
                Ok(repository) => {
                    log::debug!("stored new repository {}/{}", owner.username, info.name);
                    return Ok(repository);
                }
                // Another writer inserted the same remote repository between
                // our lookup and insert.
                Err(err @ Error::Conflict(_)) => {
                    match self.get_repository_by_remote_id(info.id).await? {
                        Some(repository) => repository,
                        None => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            },
        };

        if existing.remote_updated_at == info.updated_at {
            log::trace!(
                "repository {}/{} unchanged since {}",
                owner.username,
                existing.name,
                existing.remote_updated_at
            );
            return Ok(existing);
        }

        let mut repository = existing;
        repository.apply(info);
        self.update_repository(&repository).await?;
        log::debug!("updated repository {}/{}", owner.username, repository.name);

        Ok(repository)
    }

    /// Stores the commits of a repository that must already exist, skipping
    /// any hash that is already present. Returns the number of new rows.
    ///
    /// A failed lookup skips that commit, while a failed insert aborts the
    /// rest of the batch and is returned.
    async fn insert_commits_if_absent(
        &self,
        commits: &[CommitInfo],
        repository_name: &str,
        owner: &User,
    ) -> Result<usize, Error> {
        let repository = self
            .get_repository_by_owner_and_name(owner.id, repository_name)
            .await?
            .ok_or_else(|| Error::RepositoryNotFound {
                owner: owner.username.clone(),
                name: repository_name.to_string(),
            })?;

        let mut inserted = 0;
        for commit in commits {
            match self.get_commit_by_sha(&commit.sha).await {
                Ok(Some(_)) => {
                    log::trace!("commit {} already stored; skipping", commit.sha);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("cannot look up commit {}: {}; skipping", commit.sha, e);
                    continue;
                }
            }

            match self.insert_commit(&repository.name, commit).await {
                Ok(_) => inserted += 1,
                Err(Error::Conflict(_)) => {
                    log::trace!("commit {} stored concurrently; skipping", commit.sha);
                }
                Err(e) => {
                    log::warn!("cannot store commit {}: {}", commit.sha, e);
                    return Err(e);
                }
            }
        }

        Ok(inserted)
    }
}
