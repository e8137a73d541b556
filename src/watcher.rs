//! Live event pipeline for a single directory.
//!
//! A producer task waits for raw batches from the native service, translates and filters
//! them, and pushes the survivors into a bounded queue. A consumer task drains the queue and
//! calls the [`EventHandler`](EventHandler) once per event, in arrival order.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::{abortable, AbortHandle};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::block_in_place;
use tokio_stream::wrappers::ReceiverStream;

use crate::constraints::{EventFilter, Verdict};
use crate::error::{Error, Result};
use crate::events::{Event, EventHandler, EventKind};
use crate::native::{RawEvent, RawEventKind, RawEventStream, WatchService};
use crate::pool::PoolHandle;

/// Default capacity of a watcher's event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

/// A queued event and whether its handler should see it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct Queued {
    pub event: Event,
    pub deliver: bool,
}

impl Queued {
    pub fn new(event: Event, verdict: Verdict) -> Self {
        Self {
            event,
            deliver: verdict == Verdict::Deliver,
        }
    }
}

pub(crate) type EventSender = mpsc::Sender<Queued>;
pub(crate) type EventReceiver = mpsc::Receiver<Queued>;

pub(crate) fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}

/// The consuming half of an event queue.
///
/// Aborting the consumer drops the receiver, which discards whatever is still queued and
/// makes pending sends of every producer fail.
#[derive(Debug)]
pub(crate) struct Consumer {
    abort_handle: AbortHandle,
}

impl Consumer {
    pub fn spawn<F>(pool: &PoolHandle, label: PathBuf, rx: EventReceiver, handler: F) -> Self
    where
        F: FnMut(Queued) + Send + 'static,
    {
        let (consumer, abort_handle) = abortable(consume(label, rx, handler));
        pool.spawn(async move {
            drop(consumer.await);
        });
        Self { abort_handle }
    }

    pub fn stop(&self) {
        self.abort_handle.abort();
    }
}

async fn consume<F>(label: PathBuf, rx: EventReceiver, mut handler: F)
where
    F: FnMut(Queued),
{
    let mut events = ReceiverStream::new(rx);
    while let Some(queued) = events.next().await {
        debug!("Consumed {}", queued.event);
        let delivered = block_in_place(|| catch_unwind(AssertUnwindSafe(|| handler(queued))));
        if delivered.is_err() {
            error!(
                "Event handler panicked, no further events will be delivered from {:?}",
                label
            );
            return;
        }
    }
}

async fn produce(
    directory: PathBuf,
    mut stream: RawEventStream,
    filter: Arc<dyn EventFilter>,
    tx: EventSender,
) {
    while let Some(batch) = stream.next().await {
        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                error!("Unable to read events of {:?}: {}", directory, e);
                return;
            }
        };
        debug!("Received {} event(s) for {:?}", batch.len(), directory);

        for raw in batch {
            let event = match translate(&directory, raw) {
                Some(event) => event,
                None => continue,
            };
            let verdict = filter.verdict(&event);
            if verdict == Verdict::Reject {
                continue;
            }
            // Waits while the queue is full.
            if tx.send(Queued::new(event, verdict)).await.is_err() {
                // The consumer is gone.
                return;
            }
        }
    }
}

fn translate(directory: &Path, raw: RawEvent) -> Option<Event> {
    let kind = match raw.kind {
        RawEventKind::Create => EventKind::Created,
        RawEventKind::Delete => EventKind::Deleted,
        RawEventKind::Modify => EventKind::Modified,
        RawEventKind::Overflow => {
            warn!(
                "Native event queue of {:?} overflowed. File events could be lost.",
                directory
            );
            return None;
        }
    };
    raw.name.map(|name| Event::new(directory.join(name), kind))
}

/// A live watch on a single directory.
///
/// Stopping (or dropping) the watcher cancels the native registration and terminates its
/// producer, and its consumer if it owns one. Events still queued are discarded.
#[derive(Debug)]
pub struct DirectoryWatcher {
    directory: PathBuf,
    producer: AbortHandle,
    consumer: Option<Consumer>,
}

impl DirectoryWatcher {
    /// Watch `directory`, delivering every event `filter` accepts to `handler`.
    ///
    /// # Errors
    /// Return error when the native service refuses to watch `directory`.
    pub fn start<H: EventHandler>(
        service: &dyn WatchService,
        pool: &PoolHandle,
        directory: &Path,
        filter: Arc<dyn EventFilter>,
        capacity: usize,
        handler: H,
    ) -> Result<Self> {
        let stream = register(service, pool, directory)?;
        let (tx, rx) = event_queue(capacity);
        let mut handler = handler;
        let consumer = Consumer::spawn(pool, directory.to_path_buf(), rx, move |queued| {
            if queued.deliver {
                handler.handle_event(queued.event);
            }
        });
        let mut watcher = Self::spawn_producer(pool, directory, stream, filter, tx);
        watcher.consumer = Some(consumer);
        Ok(watcher)
    }

    /// Watch `directory`, pushing accepted events into an existing queue.
    ///
    /// # Errors
    /// Return error when the native service refuses to watch `directory`.
    pub(crate) fn attach(
        service: &dyn WatchService,
        pool: &PoolHandle,
        directory: &Path,
        filter: Arc<dyn EventFilter>,
        tx: EventSender,
    ) -> Result<Self> {
        let stream = register(service, pool, directory)?;
        Ok(Self::spawn_producer(pool, directory, stream, filter, tx))
    }

    fn spawn_producer(
        pool: &PoolHandle,
        directory: &Path,
        stream: RawEventStream,
        filter: Arc<dyn EventFilter>,
        tx: EventSender,
    ) -> Self {
        let (producer, abort_handle) =
            abortable(produce(directory.to_path_buf(), stream, filter, tx));
        pool.spawn(async move {
            drop(producer.await);
        });
        info!("Watching started: {:?}", directory);
        Self {
            directory: directory.to_path_buf(),
            producer: abort_handle,
            consumer: None,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn stop(self) {
        info!("Watching stopped: {:?}", self.directory);
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.producer.abort();
        if let Some(consumer) = &self.consumer {
            consumer.stop();
        }
    }
}

fn register(
    service: &dyn WatchService,
    pool: &PoolHandle,
    directory: &Path,
) -> Result<RawEventStream> {
    let _guard = pool.enter();
    service
        .register(directory)
        .map_err(|source| Error::Register {
            path: directory.to_path_buf(),
            source,
        })
}
