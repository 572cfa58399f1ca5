//! The operations the request layer exposes, on top of the store and the
//! engine's queues.
//!
//! Nothing here waits for a worker: misses are reported straight away and the
//! background fetch they trigger only shows up on a later call.

use std::{convert::TryFrom, sync::Arc};

use github_mirror_store::{Commit, NewUser, Repository, SearchParams, Store, User};
use thiserror::Error;

use crate::engine::Dispatcher;

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("user {0} is not registered")]
    UserNotFound(String),

    #[error("repository {owner}/{repo} is not mirrored yet; check back later")]
    RepositoryNotFound { owner: String, repo: String },

    #[error(transparent)]
    Storage(#[from] github_mirror_store::Error),
}

#[derive(Debug, Clone)]
pub(crate) struct Service {
    store: Arc<dyn Store>,
    dispatcher: Dispatcher,
}

impl Service {
    pub(crate) fn new(store: Arc<dyn Store>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Registers (or re-registers) a user and queues the mirroring of all of
    /// their repositories.
    pub(crate) async fn register_user(&self, payload: NewUser) -> Result<User, Error> {
        let username = payload.username.trim();
        validate_name("username", username)?;

        let user = self
            .store
            .create_or_update_user(&NewUser {
                username: username.to_string(),
                full_name: payload.full_name,
            })
            .await?;
        log::info!("registered user {}", user.username);

        self.dispatcher.sync_user(user.clone());
        Ok(user)
    }

    /// Returns the mirrored repository. If the owner is registered but the
    /// repository isn't mirrored, a background fetch is queued and
    /// [`Error::RepositoryNotFound`] is returned anyway.
    pub(crate) async fn lookup_repository(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Repository, Error> {
        validate_name("repository name", repo)?;
        let user = self.user(owner).await?;

        match self
            .store
            .get_repository_by_owner_and_name(user.id, repo)
            .await?
        {
            Some(repository) => Ok(repository),
            None => {
                self.dispatcher.fetch_repository(&user.username, repo);
                Err(Error::RepositoryNotFound {
                    owner: user.username,
                    repo: repo.to_string(),
                })
            }
        }
    }

    pub(crate) async fn list_repository_commits(&self, repo: &str) -> Result<Vec<Commit>, Error> {
        validate_name("repository name", repo)?;

        Ok(self.store.get_commits_by_repository_name(repo).await?)
    }

    pub(crate) async fn search_repositories(
        &self,
        owner: &str,
        params: &SearchParams,
    ) -> Result<Vec<Repository>, Error> {
        if i64::try_from(params.top_stars).is_err() {
            return Err(Error::Validation(format!(
                "top_stars must be at most {}",
                i64::MAX
            )));
        }

        let user = self.user(owner).await?;
        Ok(self.store.search_repositories(user.id, params).await?)
    }

    async fn user(&self, username: &str) -> Result<User, Error> {
        validate_name("owner", username)?;

        self.store
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| Error::UserNotFound(username.to_string()))
    }
}

/// Usernames and repository names end up as single path segments upstream.
fn validate_name(what: &str, name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", what)));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(Error::Validation(format!("{} {:?} is not valid", what, name)));
    }
    Ok(())
}
