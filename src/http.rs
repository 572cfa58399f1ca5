//! JSON over HTTP in front of the [`Service`].
//!
//! Every response body is an envelope of the form
//! `{"success": bool, "message": string, "data": any}`.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use github_mirror_store::{NewUser, SearchParams};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::service::{Error, Service};

#[derive(Debug, Serialize)]
struct Envelope<T> {
    success: bool,
    message: String,
    data: Option<T>,
}

fn ok<T: Serialize>(message: &str, data: T) -> Response {
    Json(Envelope {
        success: true,
        message: message.to_string(),
        data: Some(data),
    })
    .into_response()
}

fn failure(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(Envelope::<()> {
            success: false,
            message,
            data: None,
        }),
    )
        .into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::UserNotFound(_) | Error::RepositoryNotFound { .. } => StatusCode::NOT_FOUND,
            Error::Storage(e) => {
                log::error!("storage failure while serving a request: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        failure(status, self.to_string())
    }
}

pub(crate) fn router(service: Service) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/{owner}/repos", get(search_repositories))
        .route("/{owner}/repos/{repo}", get(lookup_repository))
        .route("/{owner}/repos/{repo}/commits", get(list_repository_commits))
        .with_state(service)
}

/// Serves requests until `shutdown` is cancelled, then lets in-flight requests
/// finish.
pub(crate) async fn serve(
    listener: TcpListener,
    service: Service,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("listening on {}", addr);
    }

    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    log::info!("HTTP server stopped");
    Ok(())
}

async fn register(
    State(service): State<Service>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            log::debug!("rejecting registration payload: {}", rejection);
            return Error::Validation(rejection.body_text()).into_response();
        }
    };

    match service.register_user(payload).await {
        Ok(user) => ok("user created successfully", user),
        Err(e) => e.into_response(),
    }
}

async fn search_repositories(
    State(service): State<Service>,
    Path(owner): Path<String>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return Error::Validation(rejection.body_text()).into_response(),
    };

    match service.search_repositories(&owner, &params).await {
        Ok(repositories) => ok("repositories fetched successfully", repositories),
        Err(e) => e.into_response(),
    }
}

async fn lookup_repository(
    State(service): State<Service>,
    Path((owner, repo)): Path<(String, String)>,
) -> Response {
    match service.lookup_repository(&owner, &repo).await {
        Ok(repository) => ok("repository fetched successfully", repository),
        Err(e) => e.into_response(),
    }
}

async fn list_repository_commits(
    State(service): State<Service>,
    Path((_owner, repo)): Path<(String, String)>,
) -> Response {
    match service.list_repository_commits(&repo).await {
        Ok(commits) => ok("repository commits fetched successfully", commits),
        Err(e) => e.into_response(),
    }
}
