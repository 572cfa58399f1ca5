use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use github_mirror_source::{CommitInfo, RepositoryInfo};
use tokio::sync::RwLock;

use crate::{
    Commit, Error, NewUser, OwnedRepository, Repository, SearchParams, Store, User, ID,
};

/// `MemoryStore` keeps the mirror in process. It enforces the same unique
/// keys as the SQLite schema, so the shared upsert rules behave identically.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

#[derive(Debug, Default)]
struct Tables {
    last_id: ID,
    users: BTreeMap<ID, User>,
    repositories: BTreeMap<ID, Repository>,
    commits: BTreeMap<ID, Commit>,
}

impl Tables {
    fn next_id(&mut self) -> ID {
        self.last_id += 1;
        self.last_id
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_or_update_user(&self, user: &NewUser) -> Result<User, Error> {
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables
            .users
            .values_mut()
            .find(|existing| existing.username == user.username)
        {
            existing.full_name = user.full_name.clone();
            return Ok(existing.clone());
        }

        let id = tables.next_id();
        let user = User {
            id,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
        };
        tables.users.insert(id, user.clone());

        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn get_repository_by_remote_id(
        &self,
        remote_id: i64,
    ) -> Result<Option<Repository>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .repositories
            .values()
            .find(|repository| repository.remote_id == remote_id)
            .cloned())
    }

    async fn get_repository_by_owner_and_name(
        &self,
        owner_id: ID,
        name: &str,
    ) -> Result<Option<Repository>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .repositories
            .values()
            .find(|repository| repository.owner_id == owner_id && repository.name == name)
            .cloned())
    }

    async fn insert_repository(
        &self,
        owner: &User,
        info: &RepositoryInfo,
    ) -> Result<Repository, Error> {
        let mut tables = self.tables.write().await;

        if tables.repositories.values().any(|repository| {
            repository.remote_id == info.id
                || (repository.owner_id == owner.id && repository.name == info.name)
        }) {
            return Err(Error::Conflict(format!(
                "repository {} ({}/{})",
                info.id, owner.username, info.name
            )));
        }

        let id = tables.next_id();
        let repository = Repository {
            id,
            remote_id: info.id,
            owner_id: owner.id,
            name: info.name.clone(),
            description: info.description.clone(),
            url: info.html_url.clone(),
            language: info.language.clone(),
            forks_count: info.forks_count,
            stars_count: info.stargazers_count,
            open_issues: info.open_issues_count,
            watchers: info.watchers_count,
            remote_created_at: info.created_at,
            remote_updated_at: info.updated_at,
        };
        tables.repositories.insert(id, repository.clone());

        Ok(repository)
    }

    async fn update_repository(&self, repository: &Repository) -> Result<(), Error> {
        let mut tables = self.tables.write().await;

        if tables.repositories.values().any(|other| {
            other.id != repository.id
                && other.owner_id == repository.owner_id
                && other.name == repository.name
        }) {
            return Err(Error::Conflict(format!("repository {}", repository.name)));
        }

        // Updating a row that does not exist is a no-op, as it is in SQL.
        if let Some(existing) = tables.repositories.get_mut(&repository.id) {
            *existing = repository.clone();
        }

        Ok(())
    }

    async fn get_commit_by_sha(&self, sha: &str) -> Result<Option<Commit>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .commits
            .values()
            .find(|commit| commit.sha == sha)
            .cloned())
    }

    async fn insert_commit(
        &self,
        repository_name: &str,
        commit: &CommitInfo,
    ) -> Result<Commit, Error> {
        let mut tables = self.tables.write().await;

        if tables.commits.values().any(|existing| existing.sha == commit.sha) {
            return Err(Error::Conflict(format!("commit {}", commit.sha)));
        }

        let id = tables.next_id();
        let commit = Commit {
            id,
            repository_name: repository_name.to_string(),
            sha: commit.sha.clone(),
            message: commit.message.clone(),
            author: commit.author.clone(),
            date: commit.date,
            url: commit.html_url.clone(),
        };
        tables.commits.insert(id, commit.clone());

        Ok(commit)
    }

    async fn get_commits_by_repository_name(&self, name: &str) -> Result<Vec<Commit>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .commits
            .values()
            .filter(|commit| commit.repository_name == name)
            .cloned()
            .collect())
    }

    async fn list_all_repositories(&self) -> Result<Vec<OwnedRepository>, Error> {
        let tables = self.tables.read().await;

        Ok(tables
            .repositories
            .values()
            .filter_map(|repository| {
                tables
                    .users
                    .get(&repository.owner_id)
                    .map(|owner| OwnedRepository {
                        repository: repository.clone(),
                        owner: owner.clone(),
                    })
            })
            .collect())
    }

    async fn search_repositories(
        &self,
        owner_id: ID,
        params: &SearchParams,
    ) -> Result<Vec<Repository>, Error> {
        // Mirrors SQLite's LIKE, which ignores ASCII case.
        let name = params
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
            .map(str::to_ascii_lowercase);
        let language = params.language.as_deref().filter(|lang| !lang.is_empty());

        let mut repositories: Vec<Repository> = self
            .tables
            .read()
            .await
            .repositories
            .values()
            .filter(|repository| repository.owner_id == owner_id)
            .filter(|repository| match &name {
                Some(name) => repository.name.to_ascii_lowercase().contains(name.as_str()),
                None => true,
            })
            .filter(|repository| match language {
                Some(language) => repository.language.as_deref() == Some(language),
                None => true,
            })
            .cloned()
            .collect();

        if params.top_stars > 0 {
            // Stable, so equal star counts stay in id order.
            repositories.sort_by(|a, b| b.stars_count.cmp(&a.stars_count));
            repositories.truncate(params.top_stars);
        }

        Ok(repositories)
    }
}
