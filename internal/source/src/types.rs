//! Payloads returned by the remote platform.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Repository metadata as reported by the remote platform.
///
/// `id` is the remote identifier and `updated_at` is the timestamp used for
/// change detection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepositoryInfo {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub html_url: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub forks_count: i64,
    #[serde(default)]
    pub stargazers_count: i64,
    #[serde(default)]
    pub open_issues_count: i64,
    #[serde(default)]
    pub watchers_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawCommit")]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub date: Option<DateTime<Utc>>,
    pub html_url: String,
}

// The commits endpoint nests the interesting fields one level down, and the
// author may be missing entirely for commits made by deleted accounts.
#[derive(Deserialize)]
struct RawCommit {
    sha: String,
    #[serde(default)]
    html_url: String,
    commit: RawCommitDetail,
}

#[derive(Deserialize)]
struct RawCommitDetail {
    #[serde(default)]
    message: String,
    author: Option<RawSignature>,
}

#[derive(Deserialize)]
struct RawSignature {
    #[serde(default)]
    name: String,
    date: Option<DateTime<Utc>>,
}

impl From<RawCommit> for CommitInfo {
    fn from(raw: RawCommit) -> Self {
        let (author, date) = match raw.commit.author {
            Some(signature) => (signature.name, signature.date),
            None => (String::new(), None),
        };

        Self {
            sha: raw.sha,
            message: raw.commit.message,
            author,
            date,
            html_url: raw.html_url,
        }
    }
}
