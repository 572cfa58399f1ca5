use github_mirror_store::User;

use super::{Context, Error};

/// Fetches the commit list of a stored repository and stores every commit that
/// isn't mirrored yet, returning how many were new.
pub(super) async fn sync(
    context: &Context,
    owner: &User,
    repository: &str,
) -> Result<usize, Error> {
    log::debug!("fetching commits for {}/{}", owner.username, repository);
    let commits = context
        .source
        .repository_commits(&owner.username, repository)
        .await?;

    let inserted = context
        .store
        .insert_commits_if_absent(&commits, repository, owner)
        .await?;
    log::debug!(
        "stored {} new of {} commits for {}/{}",
        inserted,
        commits.len(),
        owner.username,
        repository
    );

    Ok(inserted)
}
