//! Behavioural tests run against every [`Store`] implementation.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use github_mirror_source::{CommitInfo, RepositoryInfo};
use tempfile::TempDir;

use crate::{
    Commit, Error, MemoryStore, NewUser, OwnedRepository, Repository, SearchParams, SqliteStore,
    Store, User, ID,
};

fn timestamp(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
}

fn repository_info(id: i64, name: &str, updated_day: u32) -> RepositoryInfo {
    RepositoryInfo {
        id,
        name: name.to_string(),
        description: Some(format!("{} description", name)),
        html_url: format!("https://github.com/alice/{}", name),
        language: Some("Rust".to_string()),
        forks_count: 1,
        stargazers_count: 10,
        open_issues_count: 2,
        watchers_count: 10,
        created_at: timestamp(1),
        updated_at: timestamp(updated_day),
    }
}

fn commit_info(sha: &str) -> CommitInfo {
    CommitInfo {
        sha: sha.to_string(),
        message: format!("commit {}", sha),
        author: "Alice".to_string(),
        date: Some(timestamp(3)),
        html_url: format!("https://github.com/alice/proj/commit/{}", sha),
    }
}

async fn alice(store: &impl Store) -> anyhow::Result<User> {
    Ok(store
        .create_or_update_user(&NewUser {
            username: "alice".to_string(),
            full_name: "Alice".to_string(),
        })
        .await?)
}

fn sqlite_store() -> anyhow::Result<(TempDir, SqliteStore)> {
    let dir = tempfile::tempdir()?;
    let store = SqliteStore::new(dir.path().join("mirror.sqlite"))?;

    Ok((dir, store))
}

async fn check_user_registration(store: &impl Store) -> anyhow::Result<()> {
    let first = alice(store).await?;

    // Registering the same handle again updates the existing row in place.
    let second = store
        .create_or_update_user(&NewUser {
            username: "alice".to_string(),
            full_name: "Alice Liddell".to_string(),
        })
        .await?;
    assert_eq!(first.id, second.id);
    assert_eq!(second.full_name, "Alice Liddell");

    assert_eq!(
        store.get_user_by_username("alice").await?,
        Some(second.clone())
    );
    assert_eq!(store.get_user_by_username("bob").await?, None);

    Ok(())
}

async fn check_upsert_idempotent(store: &impl Store) -> anyhow::Result<()> {
    let owner = alice(store).await?;
    let info = repository_info(42, "proj", 2);

    let first = store.upsert_repository(&info, &owner).await?;

    // The same remote timestamp must not touch the row, even if other fields
    // differ in the payload.
    let mut unchanged = info.clone();
    unchanged.stargazers_count = 999;
    let second = store.upsert_repository(&unchanged, &owner).await?;

    assert_eq!(first, second);
    assert_eq!(store.list_all_repositories().await?.len(), 1);
    assert_eq!(
        store.get_repository_by_remote_id(42).await?.map(|r| r.stars_count),
        Some(10)
    );

    Ok(())
}

async fn check_upsert_change_detection(store: &impl Store) -> anyhow::Result<()> {
    let owner = alice(store).await?;
    let original = store
        .upsert_repository(&repository_info(42, "proj", 2), &owner)
        .await?;

    let mut changed = repository_info(42, "proj-renamed", 5);
    changed.language = Some("Go".to_string());
    changed.stargazers_count = 11;
    let updated = store.upsert_repository(&changed, &owner).await?;

    assert_eq!(updated.id, original.id);
    assert_eq!(updated.name, "proj-renamed");
    assert_eq!(updated.language.as_deref(), Some("Go"));
    assert_eq!(updated.stars_count, 11);
    assert_eq!(updated.remote_updated_at, timestamp(5));
    assert_eq!(updated.remote_created_at, timestamp(1));

    let stored = store
        .get_repository_by_owner_and_name(owner.id, "proj-renamed")
        .await?;
    assert_eq!(stored, Some(updated));
    assert_eq!(
        store.get_repository_by_owner_and_name(owner.id, "proj").await?,
        None
    );

    Ok(())
}

async fn check_commits_idempotent(store: &impl Store) -> anyhow::Result<()> {
    let owner = alice(store).await?;
    store
        .upsert_repository(&repository_info(42, "proj", 2), &owner)
        .await?;

    let commits = vec![commit_info("a1"), commit_info("b2")];
    assert_eq!(
        store
            .insert_commits_if_absent(&commits, "proj", &owner)
            .await?,
        2
    );

    // Overlapping batches only store the hashes we haven't seen.
    let overlapping = vec![commit_info("b2"), commit_info("c3")];
    assert_eq!(
        store
            .insert_commits_if_absent(&overlapping, "proj", &owner)
            .await?,
        1
    );
    assert_eq!(
        store
            .insert_commits_if_absent(&overlapping, "proj", &owner)
            .await?,
        0
    );

    let stored: Vec<String> = store
        .get_commits_by_repository_name("proj")
        .await?
        .into_iter()
        .map(|commit| commit.sha)
        .collect();
    assert_eq!(stored, vec!["a1", "b2", "c3"]);

    Ok(())
}

async fn check_commits_require_repository(store: &impl Store) -> anyhow::Result<()> {
    let owner = alice(store).await?;

    match store
        .insert_commits_if_absent(&[commit_info("a1")], "missing", &owner)
        .await
    {
        Err(Error::RepositoryNotFound { owner, name }) => {
            assert_eq!(owner, "alice");
            assert_eq!(name, "missing");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(store.get_commit_by_sha("a1").await?.is_none());

    Ok(())
}

async fn check_search(store: &impl Store) -> anyhow::Result<()> {
    let owner = alice(store).await?;
    let bob = store
        .create_or_update_user(&NewUser {
            username: "bob".to_string(),
            full_name: String::new(),
        })
        .await?;

    for (id, name, language, stars) in &[
        (1, "go-one", "Go", 5),
        (2, "go-two", "Go", 50),
        (3, "go-three", "Go", 20),
        (4, "rusty", "Rust", 100),
    ] {
        let mut info = repository_info(*id, name, 2);
        info.language = Some(language.to_string());
        info.stargazers_count = *stars;
        store.upsert_repository(&info, &owner).await?;
    }

    let mut foreign = repository_info(5, "go-bob", 2);
    foreign.language = Some("Go".to_string());
    foreign.stargazers_count = 1000;
    store.upsert_repository(&foreign, &bob).await?;

    let names = |repositories: Vec<Repository>| -> Vec<String> {
        repositories.into_iter().map(|r| r.name).collect()
    };

    let top_go = store
        .search_repositories(
            owner.id,
            &SearchParams {
                language: Some("Go".to_string()),
                top_stars: 2,
                ..SearchParams::default()
            },
        )
        .await?;
    assert_eq!(names(top_go), vec!["go-two", "go-three"]);

    let by_name = store
        .search_repositories(
            owner.id,
            &SearchParams {
                name: Some("GO-T".to_string()),
                ..SearchParams::default()
            },
        )
        .await?;
    assert_eq!(names(by_name), vec!["go-two", "go-three"]);

    let everything = store
        .search_repositories(owner.id, &SearchParams::default())
        .await?;
    assert_eq!(
        names(everything),
        vec!["go-one", "go-two", "go-three", "rusty"]
    );

    let all = store.list_all_repositories().await?;
    assert_eq!(all.len(), 5);
    assert!(all
        .iter()
        .any(|owned| owned.repository.name == "go-bob" && owned.owner.username == "bob"));

    Ok(())
}

async fn check_remote_identity_unique(store: &impl Store) -> anyhow::Result<()> {
    let owner = alice(store).await?;
    store
        .insert_repository(&owner, &repository_info(42, "proj", 2))
        .await?;

    assert!(matches!(
        store
            .insert_repository(&owner, &repository_info(42, "other", 2))
            .await,
        Err(Error::Conflict(_))
    ));
    assert!(matches!(
        store
            .insert_repository(&owner, &repository_info(43, "proj", 2))
            .await,
        Err(Error::Conflict(_))
    ));

    store.insert_commit("proj", &commit_info("a1")).await?;
    assert!(matches!(
        store.insert_commit("proj", &commit_info("a1")).await,
        Err(Error::Conflict(_))
    ));

    Ok(())
}

macro_rules! store_tests {
    ($($name:ident => $check:ident,)*) => {
        mod memory {
            use super::*;

            $(
                #[tokio::test]
                async fn $name() -> anyhow::Result<()> {
                    $check(&MemoryStore::new()).await
                }
            )*
        }

        mod sqlite {
            use super::*;

            $(
                #[tokio::test]
                async fn $name() -> anyhow::Result<()> {
                    let (_dir, store) = sqlite_store()?;
                    $check(&store).await
                }
            )*
        }
    };
}

store_tests! {
    test_user_registration => check_user_registration,
    test_upsert_idempotent => check_upsert_idempotent,
    test_upsert_change_detection => check_upsert_change_detection,
    test_commits_idempotent => check_commits_idempotent,
    test_commits_require_repository => check_commits_require_repository,
    test_search => check_search,
    test_remote_identity_unique => check_remote_identity_unique,
}

#[tokio::test]
async fn test_sqlite_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("mirror.sqlite");

    {
        let store = SqliteStore::new(&path)?;
        let owner = alice(&store).await?;
        store
            .upsert_repository(&repository_info(42, "proj", 2), &owner)
            .await?;
    }

    // Migrations are only applied once, and the data survives.
    let store = SqliteStore::new(&path)?;
    let all = store.list_all_repositories().await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].repository.remote_updated_at, timestamp(2));
    assert_eq!(all[0].owner.username, "alice");

    Ok(())
}

/// Wraps a [`MemoryStore`], failing lookups or inserts for chosen hashes.
///
/// The `missed_*` counters make that many lookups report nothing, the way a
/// lookup that loses a race with a concurrent insert would.
#[derive(Debug, Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing_lookups: Vec<String>,
    failing_inserts: Vec<String>,
    missed_repository_lookups: AtomicUsize,
    missed_commit_lookups: AtomicUsize,
}

fn take_miss(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Store for FlakyStore {
    async fn create_or_update_user(&self, user: &NewUser) -> Result<User, Error> {
        self.inner.create_or_update_user(user).await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, Error> {
        self.inner.get_user_by_username(username).await
    }

    async fn get_repository_by_remote_id(
        &self,
        remote_id: i64,
    ) -> Result<Option<Repository>, Error> {
        if take_miss(&self.missed_repository_lookups) {
            return Ok(None);
        }
        self.inner.get_repository_by_remote_id(remote_id).await
    }

    async fn get_repository_by_owner_and_name(
        &self,
        owner_id: ID,
        name: &str,
    ) -> Result<Option<Repository>, Error> {
        self.inner
            .get_repository_by_owner_and_name(owner_id, name)
            .await
    }

    async fn insert_repository(
        &self,
        owner: &User,
        info: &RepositoryInfo,
    ) -> Result<Repository, Error> {
        self.inner.insert_repository(owner, info).await
    }

    async fn update_repository(&self, repository: &Repository) -> Result<(), Error> {
        self.inner.update_repository(repository).await
    }

    async fn get_commit_by_sha(&self, sha: &str) -> Result<Option<Commit>, Error> {
        if self.failing_lookups.iter().any(|failing| failing == sha) {
            return Err(Error::Rusqlite(rusqlite::Error::InvalidQuery));
        }
        if take_miss(&self.missed_commit_lookups) {
            return Ok(None);
        }
        self.inner.get_commit_by_sha(sha).await
    }

    async fn insert_commit(
        &self,
        repository_name: &str,
        commit: &CommitInfo,
    ) -> Result<Commit, Error> {
        if self.failing_inserts.iter().any(|failing| failing == &commit.sha) {
            return Err(Error::Rusqlite(rusqlite::Error::InvalidQuery));
        }
        self.inner.insert_commit(repository_name, commit).await
    }

    async fn get_commits_by_repository_name(&self, name: &str) -> Result<Vec<Commit>, Error> {
        self.inner.get_commits_by_repository_name(name).await
    }

    async fn list_all_repositories(&self) -> Result<Vec<OwnedRepository>, Error> {
        self.inner.list_all_repositories().await
    }

    async fn search_repositories(
        &self,
        owner_id: ID,
        params: &SearchParams,
    ) -> Result<Vec<Repository>, Error> {
        self.inner.search_repositories(owner_id, params).await
    }
}

#[tokio::test]
async fn test_commit_lookup_failure_skips() -> anyhow::Result<()> {
    let store = FlakyStore {
        failing_lookups: vec!["b2".to_string()],
        ..FlakyStore::default()
    };
    let owner = alice(&store).await?;
    store
        .upsert_repository(&repository_info(42, "proj", 2), &owner)
        .await?;

    let commits = vec![commit_info("a1"), commit_info("b2"), commit_info("c3")];
    assert_eq!(
        store
            .insert_commits_if_absent(&commits, "proj", &owner)
            .await?,
        2
    );
    assert!(store.inner.get_commit_by_sha("b2").await?.is_none());
    assert!(store.inner.get_commit_by_sha("c3").await?.is_some());

    Ok(())
}

#[tokio::test]
async fn test_commit_insert_failure_aborts() -> anyhow::Result<()> {
    let store = FlakyStore {
        failing_inserts: vec!["b2".to_string()],
        ..FlakyStore::default()
    };
    let owner = alice(&store).await?;
    store
        .upsert_repository(&repository_info(42, "proj", 2), &owner)
        .await?;

    let commits = vec![commit_info("a1"), commit_info("b2"), commit_info("c3")];
    assert!(store
        .insert_commits_if_absent(&commits, "proj", &owner)
        .await
        .is_err());

    // Everything before the failure is kept; nothing after it is attempted.
    assert!(store.inner.get_commit_by_sha("a1").await?.is_some());
    assert!(store.inner.get_commit_by_sha("c3").await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_upsert_recovers_from_insert_conflict() -> anyhow::Result<()> {
    let store = FlakyStore::default();
    let owner = alice(&store).await?;
    let stored = store
        .upsert_repository(&repository_info(42, "proj", 2), &owner)
        .await?;

    // The lookup misses, so the insert runs into the existing row; the upsert
    // then carries on with the update.
    store.missed_repository_lookups.store(1, Ordering::SeqCst);
    let mut newer = repository_info(42, "proj", 5);
    newer.stargazers_count = 99;
    let updated = store.upsert_repository(&newer, &owner).await?;

    assert_eq!(updated.id, stored.id);
    assert_eq!(updated.stars_count, 99);
    assert_eq!(updated.remote_updated_at, timestamp(5));
    assert_eq!(store.list_all_repositories().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_commit_conflict_counts_as_present() -> anyhow::Result<()> {
    let store = FlakyStore::default();
    let owner = alice(&store).await?;
    store
        .upsert_repository(&repository_info(42, "proj", 2), &owner)
        .await?;
    store
        .insert_commits_if_absent(&[commit_info("a1")], "proj", &owner)
        .await?;

    store.missed_commit_lookups.store(1, Ordering::SeqCst);
    let commits = vec![commit_info("a1"), commit_info("b2")];
    assert_eq!(
        store
            .insert_commits_if_absent(&commits, "proj", &owner)
            .await?,
        1
    );
    assert_eq!(store.get_commits_by_repository_name("proj").await?.len(), 2);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_concurrent_writers() -> anyhow::Result<()> {
    let (_dir, store) = sqlite_store()?;
    let owner = alice(&store).await?;
    let info = repository_info(42, "proj", 2);

    let (first, second) = tokio::join!(
        store.upsert_repository(&info, &owner),
        store.upsert_repository(&info, &owner)
    );
    assert_eq!(first?.id, second?.id);
    assert_eq!(store.list_all_repositories().await?.len(), 1);

    let left = vec![commit_info("a1"), commit_info("b2")];
    let right = vec![commit_info("b2"), commit_info("c3")];
    let (left, right) = tokio::join!(
        store.insert_commits_if_absent(&left, "proj", &owner),
        store.insert_commits_if_absent(&right, "proj", &owner)
    );
    assert_eq!(left? + right?, 3);

    let stored: Vec<String> = store
        .get_commits_by_repository_name("proj")
        .await?
        .into_iter()
        .map(|commit| commit.sha)
        .collect();
    assert_eq!(stored.len(), 3);
    for sha in &["a1", "b2", "c3"] {
        assert_eq!(stored.iter().filter(|stored| stored == sha).count(), 1);
    }

    Ok(())
}

#[tokio::test]
async fn test_sqlite_rejects_unbounded_limit() -> anyhow::Result<()> {
    let (_dir, store) = sqlite_store()?;
    let owner = alice(&store).await?;

    let params = SearchParams {
        top_stars: usize::MAX,
        ..SearchParams::default()
    };
    assert!(matches!(
        store.search_repositories(owner.id, &params).await,
        Err(Error::InvalidSearch(_))
    ));

    Ok(())
}
