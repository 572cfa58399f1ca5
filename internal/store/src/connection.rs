use std::{convert::TryFrom, time::Duration};

use github_mirror_source::{CommitInfo, RepositoryInfo};
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension, Row};

use crate::{error::Error, Commit, OwnedRepository, Repository, SearchParams, User, ID};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const REPOSITORY_COLUMNS: &str = "
    repositories.id,
    repositories.remote_id,
    repositories.owner_id,
    repositories.name,
    repositories.description,
    repositories.url,
    repositories.language,
    repositories.forks_count,
    repositories.stars_count,
    repositories.open_issues_count,
    repositories.watchers_count,
    repositories.remote_created_at,
    repositories.remote_updated_at
";

const COMMIT_COLUMNS: &str = "id, repository_name, sha, message, author, date, url";

#[derive(Debug)]
pub struct Connection {
    pub(crate) conn: rusqlite::Connection,
}

impl Connection {
    pub(crate) fn new(conn: rusqlite::Connection) -> Result<Self, Error> {
        // Every worker opens its own connection, so writers will regularly
        // collide on the database lock.
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;

        Ok(Self { conn })
    }

    pub fn create_or_update_user(
        &mut self,
        username: &str,
        full_name: &str,
    ) -> Result<User, Error> {
        self.conn
            .prepare_cached(
                "
                INSERT INTO
                    users
                (username, full_name)
                VALUES
                (?, ?)
                ON CONFLICT (username) DO UPDATE SET
                    full_name = excluded.full_name
                ",
            )?
            .execute(params![username, full_name])?;

        self.get_user_by_username(username)?
            .ok_or_else(|| Error::Rusqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn get_user_by_username(&mut self, username: &str) -> Result<Option<User>, Error> {
        Ok(self
            .conn
            .prepare_cached("SELECT id, username, full_name FROM users WHERE username = ?")?
            .query_row([username], |row| user(row, 0))
            .optional()?)
    }

    pub fn get_repository_by_remote_id(
        &mut self,
        remote_id: i64,
    ) -> Result<Option<Repository>, Error> {
        Ok(self
            .conn
            .prepare_cached(&format!(
                "SELECT {} FROM repositories WHERE remote_id = ?",
                REPOSITORY_COLUMNS
            ))?
            .query_row([remote_id], repository)
            .optional()?)
    }

    pub fn get_repository_by_owner_and_name(
        &mut self,
        owner_id: ID,
        name: &str,
    ) -> Result<Option<Repository>, Error> {
        Ok(self
            .conn
            .prepare_cached(&format!(
                "SELECT {} FROM repositories WHERE owner_id = ? AND name = ?",
                REPOSITORY_COLUMNS
            ))?
            .query_row(params![owner_id, name], repository)
            .optional()?)
    }

    pub fn insert_repository(
        &mut self,
        owner: &User,
        info: &RepositoryInfo,
    ) -> Result<Repository, Error> {
        let id = self
            .conn
            .prepare_cached(
                "
                INSERT INTO
                    repositories
                (
                    remote_id,
                    owner_id,
                    name,
                    description,
                    url,
                    language,
                    forks_count,
                    stars_count,
                    open_issues_count,
                    watchers_count,
                    remote_created_at,
                    remote_updated_at
                )
                VALUES
                (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?
            .insert(params![
                info.id,
                owner.id,
                info.name,
                info.description,
                info.html_url,
                info.language,
                info.forks_count,
                info.stargazers_count,
                info.open_issues_count,
                info.watchers_count,
                info.created_at,
                info.updated_at,
            ])
            .map_err(|e| {
                Error::from_insert(
                    e,
                    format!("repository {} ({}/{})", info.id, owner.username, info.name),
                )
            })?;

        Ok(Repository {
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
        })
    }

    pub fn update_repository(&mut self, repository: &Repository) -> Result<(), Error> {
        self.conn
            .prepare_cached(
                "
                UPDATE
                    repositories
                SET
                    name = ?,
                    description = ?,
                    url = ?,
                    language = ?,
                    forks_count = ?,
                    stars_count = ?,
                    open_issues_count = ?,
                    watchers_count = ?,
                    remote_updated_at = ?
                WHERE
                    id = ?
                ",
            )?
            .execute(params![
                repository.name,
                repository.description,
                repository.url,
                repository.language,
                repository.forks_count,
                repository.stars_count,
                repository.open_issues,
                repository.watchers,
                repository.remote_updated_at,
                repository.id,
            ])
            .map_err(|e| Error::from_insert(e, format!("repository {}", repository.name)))?;

        Ok(())
    }

    pub fn get_commit_by_sha(&mut self, sha: &str) -> Result<Option<Commit>, Error> {
        Ok(self
            .conn
            .prepare_cached(&format!("SELECT {} FROM commits WHERE sha = ?", COMMIT_COLUMNS))?
            .query_row([sha], commit)
            .optional()?)
    }

    pub fn insert_commit(
        &mut self,
        repository_name: &str,
        info: &CommitInfo,
    ) -> Result<Commit, Error> {
        let id = self
            .conn
            .prepare_cached(
                "
                INSERT INTO
                    commits
                (repository_name, sha, message, author, date, url)
                VALUES
                (?, ?, ?, ?, ?, ?)
                ",
            )?
            .insert(params![
                repository_name,
                info.sha,
                info.message,
                info.author,
                info.date,
                info.html_url,
            ])
            .map_err(|e| Error::from_insert(e, format!("commit {}", info.sha)))?;

        Ok(Commit {
            id,
            repository_name: repository_name.to_string(),
            sha: info.sha.clone(),
            message: info.message.clone(),
            author: info.author.clone(),
            date: info.date,
            url: info.html_url.clone(),
        })
    }

    pub fn get_commits_by_repository_name(&mut self, name: &str) -> Result<Vec<Commit>, Error> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {} FROM commits WHERE repository_name = ? ORDER BY id",
            COMMIT_COLUMNS
        ))?;
        let commits: Result<Vec<Commit>, rusqlite::Error> =
            stmt.query_map([name], commit)?.collect();

        Ok(commits?)
    }

    pub fn list_all_repositories(&mut self) -> Result<Vec<OwnedRepository>, Error> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "
            SELECT
                {},
                users.id,
                users.username,
                users.full_name
            FROM
                repositories
            INNER JOIN
                users ON users.id = repositories.owner_id
            ORDER BY
                repositories.id
            ",
            REPOSITORY_COLUMNS
        ))?;
        let repositories: Result<Vec<OwnedRepository>, rusqlite::Error> = stmt
            .query_map([], |row| {
                Ok(OwnedRepository {
                    repository: repository(row)?,
                    owner: user(row, 13)?,
                })
            })?
            .collect();

        Ok(repositories?)
    }

    pub fn search_repositories(
        &mut self,
        owner_id: ID,
        params: &SearchParams,
    ) -> Result<Vec<Repository>, Error> {
        let mut sql = format!(
            "SELECT {} FROM repositories WHERE owner_id = ?",
            REPOSITORY_COLUMNS
        );
        let mut values = vec![Value::Integer(owner_id)];

        if let Some(name) = params.name.as_deref().filter(|name| !name.is_empty()) {
            sql.push_str(" AND name LIKE ? ESCAPE '\\'");
            values.push(Value::Text(format!("%{}%", escape_like(name))));
        }

        if let Some(language) = params.language.as_deref().filter(|lang| !lang.is_empty()) {
            sql.push_str(" AND language = ?");
            values.push(Value::Text(language.to_string()));
        }

        if params.top_stars > 0 {
            sql.push_str(" ORDER BY stars_count DESC, id LIMIT ?");
            let limit = i64::try_from(params.top_stars).map_err(|_| {
                Error::InvalidSearch(format!("top_stars {} is too large", params.top_stars))
            })?;
            values.push(Value::Integer(limit));
        } else {
            sql.push_str(" ORDER BY id");
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let repositories: Result<Vec<Repository>, rusqlite::Error> =
            stmt.query_map(params_from_iter(values), repository)?.collect();

        Ok(repositories?)
    }
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}

fn user(row: &Row<'_>, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(offset)?,
        username: row.get(offset + 1)?,
        full_name: row.get(offset + 2)?,
    })
}

fn repository(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        remote_id: row.get(1)?,
        owner_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        url: row.get(5)?,
        language: row.get(6)?,
        forks_count: row.get(7)?,
        stars_count: row.get(8)?,
        open_issues: row.get(9)?,
        watchers: row.get(10)?,
        remote_created_at: row.get(11)?,
        remote_updated_at: row.get(12)?,
    })
}

fn commit(row: &Row<'_>) -> rusqlite::Result<Commit> {
    Ok(Commit {
        id: row.get(0)?,
        repository_name: row.get(1)?,
        sha: row.get(2)?,
        message: row.get(3)?,
        author: row.get(4)?,
        date: row.get(5)?,
        url: row.get(6)?,
    })
}
