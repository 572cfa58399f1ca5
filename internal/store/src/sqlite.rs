use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use github_mirror_source::{CommitInfo, RepositoryInfo};
use tokio::task;

use crate::{
    Commit, Connection, Error, NewUser, OwnedRepository, Repository, SearchParams, Store, User, ID,
};

mod embedded {
    refinery::embed_migrations!("./src/migrations");
}

/// `SqliteStore` persists the mirror into an SQLite database.
///
/// Each operation opens its own connection on the blocking thread pool, so the
/// store can be shared freely between workers; the unique keys in the schema
/// keep concurrent writers from duplicating rows.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: Arc<PathBuf>,
}

impl SqliteStore {
    pub fn new<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let store = Self {
            path: Arc::new(path.as_ref().to_path_buf()),
        };

        // Apply the migrations now so we don't have to do it on each new
        // connection.
        let report = embedded::migrations::runner().run(&mut store.open_connection()?)?;
        for migration in report.applied_migrations() {
            log::info!("applied migration {}", migration);
        }

        Ok(store)
    }

    pub fn connection(&self) -> Result<Connection, Error> {
        Connection::new(self.open_connection()?)
    }

    fn open_connection(&self) -> rusqlite::Result<rusqlite::Connection> {
        rusqlite::Connection::open(self.path.as_path())
    }

    async fn with_connection<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Connection) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        task::spawn_blocking(move || f(&mut store.connection()?)).await?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_or_update_user(&self, user: &NewUser) -> Result<User, Error> {
        let user = user.clone();
        self.with_connection(move |conn| {
            conn.create_or_update_user(&user.username, &user.full_name)
        })
        .await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, Error> {
        let username = username.to_string();
        self.with_connection(move |conn| conn.get_user_by_username(&username))
            .await
    }

    async fn get_repository_by_remote_id(
        &self,
        remote_id: i64,
    ) -> Result<Option<Repository>, Error> {
        self.with_connection(move |conn| conn.get_repository_by_remote_id(remote_id))
            .await
    }

    async fn get_repository_by_owner_and_name(
        &self,
        owner_id: ID,
        name: &str,
    ) -> Result<Option<Repository>, Error> {
        let name = name.to_string();
        self.with_connection(move |conn| conn.get_repository_by_owner_and_name(owner_id, &name))
            .await
    }

    async fn insert_repository(
        &self,
        owner: &User,
        info: &RepositoryInfo,
    ) -> Result<Repository, Error> {
        let owner = owner.clone();
        let info = info.clone();
        self.with_connection(move |conn| conn.insert_repository(&owner, &info))
            .await
    }

    async fn update_repository(&self, repository: &Repository) -> Result<(), Error> {
        let repository = repository.clone();
        self.with_connection(move |conn| conn.update_repository(&repository))
            .await
    }

    async fn get_commit_by_sha(&self, sha: &str) -> Result<Option<Commit>, Error> {
        let sha = sha.to_string();
        self.with_connection(move |conn| conn.get_commit_by_sha(&sha))
            .await
    }

    async fn insert_commit(
        &self,
        repository_name: &str,
        commit: &CommitInfo,
    ) -> Result<Commit, Error> {
        let repository_name = repository_name.to_string();
        let commit = commit.clone();
        self.with_connection(move |conn| conn.insert_commit(&repository_name, &commit))
            .await
    }

    async fn get_commits_by_repository_name(&self, name: &str) -> Result<Vec<Commit>, Error> {
        let name = name.to_string();
        self.with_connection(move |conn| conn.get_commits_by_repository_name(&name))
            .await
    }

    async fn list_all_repositories(&self) -> Result<Vec<OwnedRepository>, Error> {
        self.with_connection(|conn| conn.list_all_repositories())
            .await
    }

    async fn search_repositories(
        &self,
        owner_id: ID,
        params: &SearchParams,
    ) -> Result<Vec<Repository>, Error> {
        let params = params.clone();
        self.with_connection(move |conn| conn.search_repositories(owner_id, &params))
            .await
    }
}
