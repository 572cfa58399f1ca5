//! Periodic re-polling of every mirrored repository.
//!
//! The scheduler and the worker cycle through the same states on every pass:
//! the worker waits for a [`RefreshSignal`], iterates over the stored
//! repositories and reports back, then the scheduler cools down before sending
//! the next signal. Closing the queue or cancelling the shutdown token ends
//! both loops.

use std::time::Duration;

use tokio::{sync::oneshot, time};
use tokio_util::sync::CancellationToken;

use super::Context;
use crate::queue::{Consumer, Producer};

#[derive(Debug)]
pub(crate) struct RefreshSignal {
    done: oneshot::Sender<CycleReport>,
}

/// Summary of one refresh pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CycleReport {
    pub(crate) checked: usize,
    pub(crate) updated: usize,
    pub(crate) unchanged: usize,
    pub(crate) failed: usize,
    /// Set if shutdown began before every repository was checked.
    pub(crate) interrupted: bool,
}

pub(super) async fn run(context: Context, pace: Duration, queue: Consumer<RefreshSignal>) {
    while let Some(signal) = queue.dequeue().await {
        log::info!("starting refresh pass");
        let report = pass(&context, pace).await;
        log::info!(
            "refresh pass done: {} checked, {} updated, {} unchanged, {} failed{}",
            report.checked,
            report.updated,
            report.unchanged,
            report.failed,
            if report.interrupted { " (interrupted)" } else { "" }
        );

        if signal.done.send(report).is_err() {
            log::debug!("refresh scheduler stopped waiting for the pass");
        }
    }

    log::info!("refresh queue closed; worker exiting");
}

/// Re-fetches every stored repository, writing only those whose remote update
/// timestamp moved. Requests are spaced `pace` apart.
pub(super) async fn pass(context: &Context, pace: Duration) -> CycleReport {
    let mut report = CycleReport::default();

    let repositories = match context.store.list_all_repositories().await {
        Ok(repositories) => repositories,
        Err(e) => {
            log::error!("cannot list repositories to refresh: {}", e);
            return report;
        }
    };

    for (i, owned) in repositories.into_iter().enumerate() {
        if i > 0 && !context.pause(pace).await {
            report.interrupted = true;
            break;
        }

        let (repository, owner) = (owned.repository, owned.owner);
        log::debug!("checking {}/{} for updates", owner.username, repository.name);

        let fetched = context
            .unless_shutdown(
                context
                    .source
                    .repository_info(&owner.username, &repository.name),
            )
            .await;
        let fetched = match fetched {
            Some(fetched) => fetched,
            None => {
                report.interrupted = true;
                break;
            }
        };
        report.checked += 1;

        let info = match fetched {
            Ok(info) => info,
            Err(e) => {
                log::warn!(
                    "cannot fetch {}/{} for refresh: {}",
                    owner.username,
                    repository.name,
                    e
                );
                report.failed += 1;
                continue;
            }
        };

        if info.updated_at == repository.remote_updated_at {
            report.unchanged += 1;
            continue;
        }

        match context.store.upsert_repository(&info, &owner).await {
            Ok(_) => report.updated += 1,
            Err(e) => {
                log::warn!(
                    "cannot update {}/{}: {}",
                    owner.username,
                    repository.name,
                    e
                );
                report.failed += 1;
            }
        }
    }

    report
}

/// Signals the refresh worker, waits for the pass to finish, then cools down
/// before the next signal.
pub(super) async fn schedule(
    queue: Producer<RefreshSignal>,
    cooldown: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let (done, report) = oneshot::channel();
        if queue.enqueue(RefreshSignal { done }).await.is_err() {
            break;
        }

        let finished = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            finished = report => finished,
        };
        if finished.is_err() {
            // The worker dropped the signal without reporting, so it has gone.
            break;
        }

        log::debug!("next refresh pass in {:?}", cooldown);
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = time::sleep(cooldown) => {}
        }
    }

    log::debug!("refresh scheduler stopped");
}
