use github_mirror_source::RepositoryInfo;
use github_mirror_store::User;

use super::{commits, Context};
use crate::queue::Consumer;

pub(super) async fn run(context: Context, queue: Consumer<User>) {
    log::debug!("waiting for newly registered users");

    while let Some(user) = queue.dequeue().await {
        log::info!("fetching repositories for {}", user.username);
        let repositories = match context
            .unless_shutdown(context.source.user_repositories(&user.username))
            .await
        {
            Some(Ok(repositories)) => repositories,
            Some(Err(e)) => {
                log::warn!("cannot fetch repositories for {}: {}", user.username, e);
                continue;
            }
            None => {
                log::info!("abandoning repository sync for {}", user.username);
                break;
            }
        };

        // Storing is slow relative to dequeuing, so each user's batch runs as
        // its own helper task.
        let helper = context.clone();
        context
            .helpers
            .spawn(async move { mirror(&helper, &user, repositories).await });
    }

    log::info!("new user queue closed; worker exiting");
}

/// Stores each repository and then its commits. A failure only skips the
/// affected repository.
pub(super) async fn mirror(context: &Context, user: &User, repositories: Vec<RepositoryInfo>) {
    let total = repositories.len();
    let mut mirrored = 0;

    for info in repositories {
        if let Err(e) = context.store.upsert_repository(&info, user).await {
            log::warn!(
                "cannot store repository {}/{}: {}",
                user.username,
                info.name,
                e
            );
            continue;
        }
        mirrored += 1;

        if let Err(e) = commits::sync(context, user, &info.name).await {
            log::warn!(
                "cannot mirror commits of {}/{}: {}",
                user.username,
                info.name,
                e
            );
        }
    }

    log::info!(
        "mirrored {} of {} repositories for {}",
        mirrored,
        total,
        user.username
    );
}
