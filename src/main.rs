use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use engine::Context;
use flexi_logger::{Logger, WriteMode};
use github_mirror_source::GitHubSource;
use github_mirror_store::SqliteStore;
use service::Service;
use structopt::StructOpt;
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
};
use tokio_util::sync::CancellationToken;

mod engine;
mod http;
mod queue;
mod service;

#[cfg(test)]
mod testing;

#[derive(Debug, StructOpt)]
#[structopt(
    about = "Mirrors the GitHub repositories and commits of registered users into a local database, and serves them over HTTP."
)]
struct Opt {
    #[structopt(
        short,
        long,
        env = "GITHUB_MIRROR_DATABASE",
        default_value = "db.sqlite",
        parse(from_os_str),
        help = "SQLite database file, created if missing"
    )]
    database: PathBuf,

    #[structopt(
        short,
        long,
        env = "GITHUB_MIRROR_LISTEN",
        default_value = "0.0.0.0:8080",
        help = "address to serve HTTP requests on"
    )]
    listen: SocketAddr,

    #[structopt(flatten)]
    engine: engine::Opt,

    #[structopt(flatten)]
    github: github_mirror_source::Opt,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments.
    let opt = Opt::from_args();

    // Set up logging.
    let _logger = Logger::try_with_env_or_str("info")?
        .format(flexi_logger::colored_detailed_format)
        .write_mode(WriteMode::Async)
        .start()?;

    // Set up the persistent store and the remote platform client.
    let store = Arc::new(SqliteStore::new(&opt.database)?);
    let source = Arc::new(GitHubSource::new(&opt.github)?);

    // Start the workers before anything can enqueue.
    let engine = engine::start(&opt.engine, Context::new(source, store.clone()));
    let service = Service::new(store, engine.dispatcher());

    let listener = TcpListener::bind(opt.listen).await?;
    let stop_serving = CancellationToken::new();
    let server = tokio::spawn(http::serve(listener, service, stop_serving.clone()));

    wait_for_signal().await?;

    // Stop taking requests first, so nothing is enqueued while the engine
    // drains.
    stop_serving.cancel();
    server.await??;

    let shutdown = engine.shutdown().await;
    log::debug!("shutdown complete: {:?}", shutdown);
    Ok(())
}

async fn wait_for_signal() -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            log::info!("received SIGINT; shutting down");
        }
        _ = terminate.recv() => log::info!("received SIGTERM; shutting down"),
    }

    Ok(())
}
