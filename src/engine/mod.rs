//! The background synchronisation engine.
//!
//! Three workers each consume one queue:
//!
//! * [`new_user`] mirrors every repository of a freshly registered user,
//! * [`on_demand`] mirrors a single repository that a client asked for,
//! * [`refresh`] periodically re-polls every mirrored repository.
//!
//! [`start`] wires the workers up and returns an [`Engine`], which hands out
//! [`Dispatcher`]s for the request layer and owns the shutdown sequence.

use std::{future::Future, sync::Arc, time::Duration};

use github_mirror_source::Source;
use github_mirror_store::{Store, User};
use structopt::StructOpt;
use tokio::{
    task::{self, JoinHandle},
    time,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::queue::{self, Forwarder, Producer};

mod commits;

mod error;
pub(crate) use self::error::Error;

mod new_user;
mod on_demand;

mod refresh;
use self::refresh::RefreshSignal;

// Command line options that are required by the engine.
//
// These should be injected into the global `StructOpt` implementation using the
// `flatten` attribute.
#[derive(Clone, Debug, StructOpt)]
pub(crate) struct Opt {
    #[structopt(
        long,
        env = "GITHUB_MIRROR_REFRESH_PACE",
        default_value = "90s",
        parse(try_from_str = parse_duration::parse::parse),
        help = "pause between two repositories during a refresh pass"
    )]
    pub(crate) refresh_pace: Duration,

    #[structopt(
        long,
        env = "GITHUB_MIRROR_REFRESH_COOLDOWN",
        default_value = "72h",
        parse(try_from_str = parse_duration::parse::parse),
        help = "pause after a full refresh pass before the next one starts"
    )]
    pub(crate) refresh_cooldown: Duration,

    #[structopt(
        long,
        env = "GITHUB_MIRROR_QUEUE_CAPACITY",
        default_value = "0",
        help = "items each work queue buffers; 0 hands items directly to the worker"
    )]
    pub(crate) queue_capacity: usize,

    #[structopt(
        long,
        env = "GITHUB_MIRROR_SHUTDOWN_GRACE",
        default_value = "5s",
        parse(try_from_str = parse_duration::parse::parse),
        help = "how long shutdown waits for in-flight commit synchronisation"
    )]
    pub(crate) shutdown_grace: Duration,
}

/// Request to mirror a single repository, raised when a lookup misses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RepoFetchRequest {
    pub(crate) username: String,
    pub(crate) repository: String,
}

/// Everything a worker and its helper tasks need.
#[derive(Debug, Clone)]
pub(crate) struct Context {
    pub(crate) source: Arc<dyn Source>,
    pub(crate) store: Arc<dyn Store>,
    helpers: TaskTracker,
    shutdown: CancellationToken,
}

impl Context {
    pub(crate) fn new(source: Arc<dyn Source>, store: Arc<dyn Store>) -> Self {
        Self {
            source,
            store,
            helpers: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Runs `future` to completion unless shutdown begins first.
    async fn unless_shutdown<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            output = future => Some(output),
        }
    }

    /// Sleeps for `duration`, returning `false` early if shutdown begins.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = time::sleep(duration) => true,
        }
    }
}

/// The producer side of the user-facing queues. Dispatching never waits for a
/// worker.
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    new_user: Forwarder<User>,
    fetch: Forwarder<RepoFetchRequest>,
}

impl Dispatcher {
    pub(crate) fn sync_user(&self, user: User) {
        log::debug!("queueing repository sync for {}", user.username);
        self.new_user.dispatch(user);
    }

    pub(crate) fn fetch_repository(&self, username: &str, repository: &str) {
        log::debug!("queueing fetch of {}/{}", username, repository);
        self.fetch.dispatch(RepoFetchRequest {
            username: username.to_string(),
            repository: repository.to_string(),
        });
    }
}

/// Outcome of [`Engine::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Shutdown {
    /// Helper tasks still running when the grace period ran out.
    pub(crate) abandoned_helpers: usize,
}

#[derive(Debug)]
pub(crate) struct Engine {
    dispatcher: Dispatcher,
    new_user: Producer<User>,
    fetch: Producer<RepoFetchRequest>,
    refresh: Producer<RefreshSignal>,
    context: Context,
    grace: Duration,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

/// Starts the three workers and the refresh scheduler.
pub(crate) fn start(opt: &Opt, context: Context) -> Engine {
    let (new_user_tx, new_user_rx) = queue::new(opt.queue_capacity);
    let (fetch_tx, fetch_rx) = queue::new(opt.queue_capacity);
    let (refresh_tx, refresh_rx) = queue::new(opt.queue_capacity);

    let workers = vec![
        (
            "new user",
            task::spawn(new_user::run(context.clone(), new_user_rx)),
        ),
        (
            "on demand fetch",
            task::spawn(on_demand::run(context.clone(), fetch_rx)),
        ),
        (
            "refresh",
            task::spawn(refresh::run(
                context.clone(),
                opt.refresh_pace,
                refresh_rx,
            )),
        ),
        (
            "refresh scheduler",
            task::spawn(refresh::schedule(
                refresh_tx.clone(),
                opt.refresh_cooldown,
                context.shutdown.clone(),
            )),
        ),
    ];
    log::info!("synchronisation engine started");

    Engine {
        dispatcher: Dispatcher {
            new_user: new_user_tx.forwarder(),
            fetch: fetch_tx.forwarder(),
        },
        new_user: new_user_tx,
        fetch: fetch_tx,
        refresh: refresh_tx,
        context,
        grace: opt.shutdown_grace,
        workers,
    }
}

impl Engine {
    pub(crate) fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Closes every queue, waits for the workers to exit and then gives
    /// in-flight helper tasks the grace period to finish.
    pub(crate) async fn shutdown(self) -> Shutdown {
        log::info!("stopping synchronisation engine");
        self.context.shutdown.cancel();
        self.new_user.close();
        self.fetch.close();
        self.refresh.close();

        for (name, handle) in self.workers {
            match handle.await {
                Ok(()) => log::debug!("{} worker exited", name),
                Err(e) => log::error!("{} worker failed: {}", name, e),
            }
        }

        let helpers = self.context.helpers;
        helpers.close();
        let abandoned_helpers = match time::timeout(self.grace, helpers.wait()).await {
            Ok(()) => 0,
            Err(_) => {
                log::warn!(
                    "abandoning {} commit synchronisation tasks still running after {:?}",
                    helpers.len(),
                    self.grace
                );
                helpers.len()
            }
        };

        log::info!("synchronisation engine stopped");
        Shutdown { abandoned_helpers }
    }
}
