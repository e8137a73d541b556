//! Linux `inotify` binding.
//!
//! One inotify instance serves every directory registered with a service. A reader task drains
//! it and routes each event to the streams subscribed to its watch descriptor.
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::future::{abortable, AbortHandle};
use futures_util::{pin_mut, StreamExt};
use inotify::{EventMask, EventStream, Inotify, WatchDescriptor, WatchMask, Watches};
use log::{debug, error};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{RawEvent, RawEventKind, RawEventStream, WatchService};

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

fn watch_mask() -> WatchMask {
    WatchMask::CREATE
        | WatchMask::MOVED_TO
        | WatchMask::DELETE
        | WatchMask::MOVED_FROM
        | WatchMask::MODIFY
        | WatchMask::ATTRIB
        | WatchMask::ONLYDIR
        | WatchMask::DONT_FOLLOW
}

type BatchSender = mpsc::UnboundedSender<io::Result<Vec<RawEvent>>>;

/// [`WatchService`](WatchService) backed by a single `inotify` instance.
///
/// The instance is opened on the first registration and closed once every stream it feeds has
/// been dropped. Its reader runs on the runtime the opening registration was made from.
#[derive(Debug)]
pub struct InotifyService {
    buffer_size: usize,
    shared: Mutex<Weak<Shared>>,
}

impl InotifyService {
    /// Use a read buffer of `buffer_size` bytes.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            shared: Mutex::new(Weak::new()),
        }
    }

    fn shared(&self) -> io::Result<Arc<Shared>> {
        let mut slot = lock(&self.shared);
        if let Some(shared) = slot.upgrade() {
            return Ok(shared);
        }

        let inotify = Inotify::init()?;
        let watches = inotify.watches();
        let events = inotify.into_event_stream(vec![0; self.buffer_size])?;
        let state = Arc::new(Mutex::new(State {
            watches,
            routes: HashMap::new(),
            next_id: 0,
        }));
        let (reader, reader_handle) = abortable(read_events(events, Arc::clone(&state)));
        tokio::spawn(async move {
            drop(reader.await);
        });
        debug!("Opened inotify instance");

        let shared = Arc::new(Shared {
            state,
            reader: reader_handle,
        });
        *slot = Arc::downgrade(&shared);
        Ok(shared)
    }
}

impl Default for InotifyService {
    fn default() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }
}

impl WatchService for InotifyService {
    fn register(&self, directory: &Path) -> io::Result<RawEventStream> {
        let shared = self.shared()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (wd, id) = {
            let mut state = lock(&shared.state);
            let wd = state.watches.add(directory, watch_mask())?;
            let id = state.next_id;
            state.next_id += 1;
            state.routes.entry(wd.clone()).or_default().insert(id, tx);
            (wd, id)
        };
        debug!("Registered inotify watch on {:?}", directory);

        Ok(RawEventStream::new(DirectoryEvents {
            events: UnboundedReceiverStream::new(rx),
            subscription: Subscription {
                shared,
                wd,
                id,
                directory: directory.to_path_buf(),
            },
        }))
    }
}

struct State {
    watches: Watches,
    /// Subscribers per watch descriptor. The kernel hands out the same descriptor when one
    /// directory is registered twice.
    routes: HashMap<WatchDescriptor, HashMap<u64, BatchSender>>,
    next_id: u64,
}

#[derive(Debug)]
struct Shared {
    state: Arc<Mutex<State>>,
    reader: AbortHandle,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("watched", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        debug!("Closing inotify instance");
        self.reader.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_events(events: EventStream<Vec<u8>>, state: Arc<Mutex<State>>) {
    pin_mut!(events);
    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                error!("Unable to read inotify events: {}", e);
                let mut state = lock(&state);
                for tx in state.routes.values().flat_map(HashMap::values) {
                    drop(tx.send(Err(io::Error::new(e.kind(), e.to_string()))));
                }
                state.routes.clear();
                return;
            }
        };

        let mut state = lock(&state);
        if event.mask.contains(EventMask::Q_OVERFLOW) {
            for tx in state.routes.values().flat_map(HashMap::values) {
                drop(tx.send(Ok(vec![RawEvent::overflow()])));
            }
        } else if event.mask.contains(EventMask::IGNORED) {
            // The kernel dropped the watch, e.g. the directory was deleted. Its streams end.
            state.routes.remove(&event.wd);
        } else if let Some(kind) = translate(event.mask) {
            let raw = RawEvent {
                kind,
                name: event.name.map(PathBuf::from),
            };
            if let Some(subscribers) = state.routes.get(&event.wd) {
                for tx in subscribers.values() {
                    drop(tx.send(Ok(vec![raw.clone()])));
                }
            }
        }
    }
}

fn translate(mask: EventMask) -> Option<RawEventKind> {
    if mask.contains(EventMask::Q_OVERFLOW) {
        Some(RawEventKind::Overflow)
    } else if mask.intersects(EventMask::CREATE | EventMask::MOVED_TO) {
        Some(RawEventKind::Create)
    } else if mask.intersects(EventMask::DELETE | EventMask::MOVED_FROM) {
        Some(RawEventKind::Delete)
    } else if mask.intersects(EventMask::MODIFY | EventMask::ATTRIB) {
        Some(RawEventKind::Modify)
    } else {
        None
    }
}

/// One stream's claim on a watch descriptor. The watch is removed with its last claim.
struct Subscription {
    shared: Arc<Shared>,
    wd: WatchDescriptor,
    id: u64,
    directory: PathBuf,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut state = lock(&self.shared.state);
        let State { watches, routes, .. } = &mut *state;
        let last = match routes.get_mut(&self.wd) {
            Some(subscribers) => subscribers.remove(&self.id).is_some() && subscribers.is_empty(),
            // Already dropped by the kernel.
            None => false,
        };
        if last {
            routes.remove(&self.wd);
            match watches.remove(self.wd.clone()) {
                Ok(()) => debug!("Removed inotify watch on {:?}", self.directory),
                Err(e) => debug!("Unable to remove watch on {:?}: {}", self.directory, e),
            }
        }
    }
}

struct DirectoryEvents {
    events: UnboundedReceiverStream<io::Result<Vec<RawEvent>>>,
    subscription: Subscription,
}

impl Stream for DirectoryEvents {
    type Item = io::Result<Vec<RawEvent>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}
