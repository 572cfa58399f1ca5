use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, ACCEPT, LINK},
    Client, Response, StatusCode, Url,
};
use serde::de::DeserializeOwned;
use structopt::StructOpt;

use crate::{CommitInfo, Error, RepositoryInfo, Source};

// Command line options that are required by [`GitHubSource`].
//
// These should be injected into the global `StructOpt` implementation using the
// `flatten` attribute.
#[derive(Clone, Debug, StructOpt)]
pub struct Opt {
    #[structopt(
        long,
        env = "GITHUB_MIRROR_API_URL",
        default_value = "https://api.github.com",
        help = "base URL of the GitHub REST API"
    )]
    github_api_url: String,

    #[structopt(
        long,
        env = "GITHUB_MIRROR_USER_AGENT",
        default_value = "github-mirror",
        help = "user agent sent with every API request"
    )]
    user_agent: String,

    #[structopt(
        long,
        env = "GITHUB_MIRROR_PER_PAGE",
        default_value = "100",
        help = "page size requested from paginated endpoints"
    )]
    per_page: u32,

    #[structopt(
        long,
        env = "GITHUB_MIRROR_REQUEST_TIMEOUT",
        default_value = "30s",
        parse(try_from_str = parse_duration::parse::parse),
        help = "give up on an API request that hasn't completed after this long"
    )]
    request_timeout: Duration,
}

/// `GitHubSource` fetches repository and commit metadata from the GitHub REST
/// API.
#[derive(Debug, Clone)]
pub struct GitHubSource {
    client: Client,
    base: Url,
    per_page: u32,
}

impl GitHubSource {
    pub fn new(opt: &Opt) -> Result<Self, Error> {
        let base = Url::parse(&opt.github_api_url)
            .map_err(|e| Error::BaseUrl(format!("{}: {}", opt.github_api_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::BaseUrl(opt.github_api_url.clone()));
        }

        Ok(Self {
            client: Client::builder()
                .user_agent(&opt.user_agent)
                .timeout(opt.request_timeout)
                .build()?,
            base,
            per_page: opt.per_page,
        })
    }

    /// Appends `segments` to the base URL, percent-encoding each one so a name
    /// can never introduce extra path components.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get(&self, url: &str, resource: &str) -> Result<Response, Error> {
        log::trace!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(resource.to_string()));
        }

        if (status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS)
            && header_str(response.headers(), "x-ratelimit-remaining") == Some("0")
        {
            return Err(Error::RateLimited {
                reset: header_str(response.headers(), "x-ratelimit-reset")
                    .and_then(|reset| reset.parse().ok()),
            });
        }

        Err(Error::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }

    /// Follows `rel="next"` links until the listing is exhausted.
    async fn get_all<T>(&self, mut url: Url, resource: &str) -> Result<Vec<T>, Error>
    where
        T: DeserializeOwned,
    {
        url.query_pairs_mut()
            .append_pair("per_page", &self.per_page.to_string());

        let mut items = Vec::new();
        let mut next = Some(url.to_string());

        while let Some(url) = next.take() {
            let response = self.get(&url, resource).await?;
            next = response
                .headers()
                .get(LINK)
                .and_then(|link| link.to_str().ok())
                .and_then(next_link);

            let mut page: Vec<T> = response.json().await?;
            log::trace!("{}: received {} items", resource, page.len());
            items.append(&mut page);
        }

        Ok(items)
    }
}

#[async_trait]
impl Source for GitHubSource {
    async fn repository_info(&self, owner: &str, repo: &str) -> Result<RepositoryInfo, Error> {
        let resource = format!("repository {}/{}", owner, repo);
        let url = self.url(&["repos", owner, repo]);

        Ok(self.get(url.as_str(), &resource).await?.json().await?)
    }

    async fn repository_commits(&self, owner: &str, repo: &str) -> Result<Vec<CommitInfo>, Error> {
        self.get_all(
            self.url(&["repos", owner, repo, "commits"]),
            &format!("commits of {}/{}", owner, repo),
        )
        .await
    }

    async fn user_repositories(&self, owner: &str) -> Result<Vec<RepositoryInfo>, Error> {
        self.get_all(
            self.url(&["users", owner, "repos"]),
            &format!("repositories of {}", owner),
        )
        .await
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Extracts the `rel="next"` target from a `Link` header, which looks like:
///
/// `<https://api.github.com/users/octocat/repos?page=2>; rel="next", <...?page=5>; rel="last"`
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut url = None;
        let mut is_next = false;

        for segment in part.split(';').map(str::trim) {
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(rel) = segment.strip_prefix("rel=") {
                is_next = rel.trim_matches('"') == "next";
            }
        }

        if is_next {
            url.map(String::from)
        } else {
            None
        }
    })
}
