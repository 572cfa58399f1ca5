//! Hand-off queues between producers and the single worker consuming each
//! queue.
//!
//! A queue with zero capacity is a rendezvous: [`Producer::enqueue`] completes
//! only once the worker has taken the item. Request handlers must never wait
//! on that, so they go through a [`Forwarder`]: items are staged without
//! blocking and a single background task enqueues them in the order they were
//! dispatched.

use std::fmt::Debug;

use thiserror::Error;
use tokio::task;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum Error {
    #[error("queue is closed")]
    Closed,
}

/// Creates a queue holding up to `capacity` items that have not yet been
/// dequeued.
pub(crate) fn new<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let (tx, rx) = flume::bounded(capacity);
    let closed = CancellationToken::new();

    (
        Producer {
            tx,
            closed: closed.clone(),
        },
        Consumer { rx, closed },
    )
}

#[derive(Debug)]
pub(crate) struct Producer<T> {
    tx: flume::Sender<T>,
    closed: CancellationToken,
}

// Derive would require `T: Clone`.
impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T> Producer<T>
where
    T: Debug + Send + 'static,
{
    /// Waits until the item has been accepted by the queue. Fails once the
    /// queue is closed, including while waiting.
    pub(crate) async fn enqueue(&self, item: T) -> Result<(), Error> {
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::Closed),
            result = self.tx.send_async(item) => result.map_err(|_| Error::Closed),
        }
    }

    /// Spawns the task that feeds this queue from a staging channel, and
    /// returns the handle used to stage items. The task exits once the queue
    /// is closed.
    pub(crate) fn forwarder(&self) -> Forwarder<T> {
        let (staging, staged) = flume::unbounded::<T>();
        let producer = self.clone();

        task::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = producer.closed.cancelled() => break,
                    item = staged.recv_async() => match item {
                        Ok(item) => item,
                        Err(_) => break,
                    },
                };

                let description = format!("{:?}", &item);
                if let Err(e) = producer.enqueue(item).await {
                    log::warn!("dropping {}: {}", description, e);
                }
            }

            for item in staged.drain() {
                log::warn!("dropping {:?}: {}", item, Error::Closed);
            }
        });

        Forwarder {
            staging,
            closed: self.closed.clone(),
        }
    }

    pub(crate) fn close(&self) {
        self.closed.cancel();
    }
}

/// Stages items for a queue without ever blocking the caller. Items reach the
/// queue in the order they were dispatched, across every clone.
#[derive(Debug)]
pub(crate) struct Forwarder<T> {
    staging: flume::Sender<T>,
    closed: CancellationToken,
}

impl<T> Clone for Forwarder<T> {
    fn clone(&self) -> Self {
        Self {
            staging: self.staging.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T: Debug> Forwarder<T> {
    /// Stages `item`. It is dropped with a warning if the queue closes before
    /// the worker takes it.
    pub(crate) fn dispatch(&self, item: T) {
        if self.closed.is_cancelled() {
            log::warn!("dropping {:?}: {}", item, Error::Closed);
            return;
        }

        if let Err(flume::SendError(item)) = self.staging.send(item) {
            log::warn!("dropping {:?}: {}", item, Error::Closed);
        }
    }
}

#[derive(Debug)]
pub(crate) struct Consumer<T> {
    rx: flume::Receiver<T>,
    closed: CancellationToken,
}

impl<T> Consumer<T> {
    /// Waits for the next item. Returns `None` once the queue is closed and
    /// every item accepted before closure has been handed out.
    pub(crate) async fn dequeue(&self) -> Option<T> {
        tokio::select! {
            biased;
            result = self.rx.recv_async() => result.ok(),
            _ = self.closed.cancelled() => None,
        }
    }
}
