//! Test doubles shared by the engine and service tests.

use std::{
    collections::{HashMap, HashSet},
    future::{self, Future},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use github_mirror_source::{CommitInfo, Error, RepositoryInfo, Source};
use github_mirror_store::{MemoryStore, NewUser, Store, User};

use crate::engine::{Context, Opt};

/// A [`Source`] answering from canned data. Unknown repositories and owners
/// are reported as not found, and stalled requests never complete.
#[derive(Debug, Default)]
pub(crate) struct ScriptedSource {
    repositories: Mutex<HashMap<String, Vec<RepositoryInfo>>>,
    commits: Mutex<HashMap<(String, String), Vec<CommitInfo>>>,
    requests: Mutex<Vec<String>>,
    stalled: Mutex<HashSet<String>>,
}

impl ScriptedSource {
    /// Adds or replaces a repository of `owner`, matched by remote id.
    pub(crate) fn set_repository(&self, owner: &str, info: RepositoryInfo) {
        let mut repositories = self.repositories.lock().unwrap();
        let owned = repositories.entry(owner.to_string()).or_default();
        owned.retain(|existing| existing.id != info.id);
        owned.push(info);
    }

    pub(crate) fn set_commits(&self, owner: &str, repo: &str, commits: Vec<CommitInfo>) {
        self.commits
            .lock()
            .unwrap()
            .insert((owner.to_string(), repo.to_string()), commits);
    }

    /// Every request received so far, in order.
    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Makes every later request matching `request` (as listed by
    /// [`requests`](Self::requests)) hang forever.
    pub(crate) fn stall(&self, request: &str) {
        self.stalled.lock().unwrap().insert(request.to_string());
    }

    async fn record(&self, request: String) {
        let stalled = self.stalled.lock().unwrap().contains(&request);
        self.requests.lock().unwrap().push(request);
        if stalled {
            future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl Source for ScriptedSource {
    async fn repository_info(&self, owner: &str, repo: &str) -> Result<RepositoryInfo, Error> {
        self.record(format!("info {}/{}", owner, repo)).await;
        self.repositories
            .lock()
            .unwrap()
            .get(owner)
            .and_then(|owned| owned.iter().find(|info| info.name == repo).cloned())
            .ok_or_else(|| Error::NotFound(format!("{}/{}", owner, repo)))
    }

    async fn repository_commits(&self, owner: &str, repo: &str) -> Result<Vec<CommitInfo>, Error> {
        self.record(format!("commits {}/{}", owner, repo)).await;
        self.commits
            .lock()
            .unwrap()
            .get(&(owner.to_string(), repo.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("commits of {}/{}", owner, repo)))
    }

    async fn user_repositories(&self, owner: &str) -> Result<Vec<RepositoryInfo>, Error> {
        self.record(format!("repositories {}", owner)).await;
        self.repositories
            .lock()
            .unwrap()
            .get(owner)
            .cloned()
            .ok_or_else(|| Error::NotFound(owner.to_string()))
    }
}

pub(crate) fn timestamp(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
}

pub(crate) fn repository_info(id: i64, name: &str, updated_day: u32) -> RepositoryInfo {
    RepositoryInfo {
        id,
        name: name.to_string(),
        description: None,
        html_url: format!("https://github.com/alice/{}", name),
        language: Some("Go".to_string()),
        forks_count: 0,
        stargazers_count: 1,
        open_issues_count: 0,
        watchers_count: 1,
        created_at: timestamp(1),
        updated_at: timestamp(updated_day),
    }
}

pub(crate) fn commit_info(sha: &str) -> CommitInfo {
    CommitInfo {
        sha: sha.to_string(),
        message: format!("commit {}", sha),
        author: "Alice".to_string(),
        date: Some(timestamp(2)),
        html_url: format!("https://github.com/alice/proj/commit/{}", sha),
    }
}

/// Engine options with no pacing, so passes run back to back in tests.
pub(crate) fn opt() -> Opt {
    Opt {
        refresh_pace: Duration::from_millis(0),
        refresh_cooldown: Duration::from_secs(3600),
        queue_capacity: 0,
        shutdown_grace: Duration::from_secs(5),
    }
}

pub(crate) struct Fixture {
    pub(crate) source: Arc<ScriptedSource>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) context: Context,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::new());

        Self {
            context: Context::new(source.clone(), store.clone()),
            source,
            store,
        }
    }

    pub(crate) async fn register(&self, username: &str) -> anyhow::Result<User> {
        Ok(self
            .store
            .create_or_update_user(&NewUser {
                username: username.to_string(),
                full_name: String::new(),
            })
            .await?)
    }
}

/// Polls `check` until it returns `Some`, failing after a few seconds.
pub(crate) async fn eventually<T, F, Fut>(mut check: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    for _ in 0..500 {
        if let Some(value) = check().await? {
            return Ok(value);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    anyhow::bail!("condition not met in time")
}
