use super::{commits, Context, Error, RepoFetchRequest};
use crate::queue::Consumer;

pub(super) async fn run(context: Context, queue: Consumer<RepoFetchRequest>) {
    log::debug!("waiting for repository fetch requests");

    while let Some(request) = queue.dequeue().await {
        if let Err(e) = fetch(&context, &request).await {
            log::warn!(
                "cannot fetch requested repository {}/{}: {}",
                request.username,
                request.repository,
                e
            );
        }
    }

    log::info!("fetch queue closed; worker exiting");
}

/// Mirrors the requested repository, then hands its commits off to a helper
/// task.
pub(super) async fn fetch(context: &Context, request: &RepoFetchRequest) -> Result<(), Error> {
    log::debug!(
        "fetching requested repository {}/{}",
        request.username,
        request.repository
    );
    let info = context
        .unless_shutdown(
            context
                .source
                .repository_info(&request.username, &request.repository),
        )
        .await
        .ok_or(Error::ShuttingDown)??;

    let user = context
        .store
        .get_user_by_username(&request.username)
        .await?
        .ok_or_else(|| Error::UnknownUser(request.username.clone()))?;
    let repository = context.store.upsert_repository(&info, &user).await?;

    let helper = context.clone();
    context.helpers.spawn(async move {
        if let Err(e) = commits::sync(&helper, &user, &repository.name).await {
            log::warn!(
                "cannot mirror commits of {}/{}: {}",
                user.username,
                repository.name,
                e
            );
        }
    });

    Ok(())
}
