//! Types mapping to the database tables.

use chrono::{DateTime, Utc};
use github_mirror_source::RepositoryInfo;
use serde::{Deserialize, Serialize};

pub type ID = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: ID,
    pub username: String,
    pub full_name: String,
}

/// A registration payload. The username is the handle on the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    pub username: String,
    #[serde(default)]
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Repository {
    pub id: ID,
    pub remote_id: i64,
    pub owner_id: ID,
    pub name: String,
    pub description: Option<String>,
    pub url: String,
    pub language: Option<String>,
    pub forks_count: i64,
    pub stars_count: i64,
    pub open_issues: i64,
    pub watchers: i64,
    pub remote_created_at: DateTime<Utc>,
    pub remote_updated_at: DateTime<Utc>,
}

impl Repository {
    /// Overwrites the mirrored fields with freshly fetched metadata.
    pub fn apply(&mut self, info: &RepositoryInfo) {
        self.name = info.name.clone();
        self.description = info.description.clone();
        self.url = info.html_url.clone();
        self.language = info.language.clone();
        self.forks_count = info.forks_count;
        self.stars_count = info.stargazers_count;
        self.open_issues = info.open_issues_count;
        self.watchers = info.watchers_count;
        self.remote_updated_at = info.updated_at;
    }
}

/// A repository along with the user that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedRepository {
    pub repository: Repository,
    pub owner: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    pub id: ID,
    pub repository_name: String,
    pub sha: String,
    pub message: String,
    pub author: String,
    pub date: Option<DateTime<Utc>>,
    pub url: String,
}

/// Filters for [`Store::search_repositories`](crate::Store::search_repositories).
///
/// A `top_stars` of zero means no star ordering or limit is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub top_stars: usize,
}
