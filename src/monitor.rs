//! Merges a directory snapshot with the live event stream.
//!
//! The watcher is registered before the snapshot is read, and its events are held back until
//! the snapshot has been delivered. Every entry that existed before the monitor started is
//! therefore reported as [`Initial`](EventKind::Initial) before any live event about it.
use std::env;
use std::fmt::{Debug, Formatter};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info};

use crate::constraints::Constraints;
use crate::error::{Error, Result};
use crate::events::{Event, EventHandler};
use crate::native::{InotifyService, WatchService};
use crate::pool::{WorkerPool, DEFAULT_WORKER_THREADS};
use crate::reader;
use crate::recursive::RecursiveWatcher;
use crate::watcher::{DirectoryWatcher, DEFAULT_QUEUE_CAPACITY};

/// Lifecycle of a [`Monitor`](Monitor). States are only ever entered in this order.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MonitorState {
    /// Not started yet.
    Starting,
    /// Watching, live events are held back while the snapshot is read.
    Buffering,
    /// Live events are delivered as they arrive.
    Streaming,
    Stopped,
}

struct GateInner {
    reading_complete: bool,
    buffer: Vec<Event>,
    handler: Box<dyn EventHandler>,
}

/// Holds live events back until the snapshot has been delivered.
struct Gate {
    inner: Mutex<GateInner>,
}

impl Gate {
    fn new(handler: Box<dyn EventHandler>) -> Self {
        Self {
            inner: Mutex::new(GateInner {
                reading_complete: false,
                buffer: Vec::new(),
                handler,
            }),
        }
    }

    fn offer(&self, event: Event) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.reading_complete {
            inner.handler.handle_event(event);
        } else {
            debug!("Buffering {}", event);
            inner.buffer.push(event);
        }
    }

    /// Deliver `snapshot`, then everything buffered so far, and let later events through.
    fn open(&self, snapshot: Vec<Event>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let GateInner {
            reading_complete,
            buffer,
            handler,
        } = &mut *inner;
        debug!(
            "Delivering {} snapshot and {} buffered event(s)",
            snapshot.len(),
            buffer.len()
        );
        for event in snapshot.into_iter().chain(buffer.drain(..)) {
            handler.handle_event(event);
        }
        *reading_complete = true;
    }
}

enum Watcher {
    Single(DirectoryWatcher),
    Recursive(RecursiveWatcher),
}

impl Watcher {
    fn stop(self) {
        match self {
            Self::Single(watcher) => watcher.stop(),
            Self::Recursive(watcher) => watcher.stop(),
        }
    }
}

/// Builds a [`Monitor`](Monitor).
pub struct MonitorBuilder {
    root: PathBuf,
    constraints: Constraints,
    queue_capacity: usize,
    worker_threads: usize,
    service: Option<Arc<dyn WatchService>>,
}

impl MonitorBuilder {
    #[must_use]
    pub fn constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Capacity of the event queue. The watcher stops reading native events while it is full.
    #[must_use]
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    #[must_use]
    pub fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Native binding to watch directories with. Defaults to [`InotifyService`](InotifyService).
    #[must_use]
    pub fn service(mut self, service: Arc<dyn WatchService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn build(self, handler: impl EventHandler) -> Monitor {
        Monitor {
            root: self.root,
            constraints: self.constraints,
            service: self
                .service
                .unwrap_or_else(|| Arc::new(InotifyService::default())),
            queue_capacity: self.queue_capacity,
            worker_threads: self.worker_threads,
            handler: Some(Box::new(handler)),
            state: MonitorState::Starting,
            watcher: None,
            pool: None,
        }
    }
}

/// Reports every entry below a directory, then every change to it, to one handler.
///
/// A monitor is single-use: once stopped it can't be started again.
pub struct Monitor {
    root: PathBuf,
    constraints: Constraints,
    service: Arc<dyn WatchService>,
    queue_capacity: usize,
    worker_threads: usize,
    handler: Option<Box<dyn EventHandler>>,
    state: MonitorState,
    watcher: Option<Watcher>,
    pool: Option<WorkerPool>,
}

impl Monitor {
    pub fn builder(root: impl Into<PathBuf>) -> MonitorBuilder {
        MonitorBuilder {
            root: root.into(),
            constraints: Constraints::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_threads: DEFAULT_WORKER_THREADS,
            service: None,
        }
    }

    pub fn new(
        root: impl Into<PathBuf>,
        constraints: Constraints,
        handler: impl EventHandler,
    ) -> Self {
        Self::builder(root).constraints(constraints).build(handler)
    }

    pub const fn state(&self) -> MonitorState {
        self.state
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start watching and deliver the snapshot.
    ///
    /// The snapshot, and the live events seen while it was read, are delivered on the calling
    /// thread before this returns. Later events are delivered from a worker thread.
    ///
    /// # Errors
    /// Return error when the monitor has been started before, or when the root can't be
    /// watched or read. Nothing is left running in the latter case and the monitor is stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.state != MonitorState::Starting {
            return Err(Error::AlreadyStarted);
        }
        let handler = self.handler.take().ok_or(Error::AlreadyStarted)?;
        let result = self.launch(handler);
        if result.is_err() {
            self.stop();
        }
        result
    }

    fn launch(&mut self, handler: Box<dyn EventHandler>) -> Result<()> {
        let root = absolute(&self.root)?;
        if !root.is_dir() {
            return Err(Error::NotADirectory(root));
        }
        self.root = root;

        let pool = WorkerPool::new(self.worker_threads)?;
        let gate = Arc::new(Gate::new(handler));
        let sink = {
            let gate = Arc::clone(&gate);
            move |event| gate.offer(event)
        };
        let watcher = if self.constraints.is_recursive() {
            Watcher::Recursive(RecursiveWatcher::start(
                Arc::clone(&self.service),
                pool.handle(),
                &self.root,
                self.constraints.clone(),
                self.queue_capacity,
                sink,
            )?)
        } else {
            Watcher::Single(DirectoryWatcher::start(
                &*self.service,
                &pool.handle(),
                &self.root,
                Arc::new(self.constraints.clone()),
                self.queue_capacity,
                sink,
            )?)
        };
        self.watcher = Some(watcher);
        self.pool = Some(pool);

        self.transition(MonitorState::Buffering);
        let snapshot = reader::read(&self.root, &self.constraints)?;
        gate.open(snapshot);
        self.transition(MonitorState::Streaming);
        Ok(())
    }

    /// Stop watching. Events not delivered yet are discarded.
    ///
    /// Calling it more than once, or on a monitor that was never started, is a no-op.
    pub fn stop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        drop(self.pool.take());
        self.handler = None;
        if self.state != MonitorState::Stopped {
            self.transition(MonitorState::Stopped);
        }
    }

    fn transition(&mut self, state: MonitorState) {
        info!("Monitor of {:?}: {:?} -> {:?}", self.root, self.state, state);
        self.state = state;
    }
}

impl Debug for Monitor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("root", &self.root)
            .field("constraints", &self.constraints)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Resolve `path` against the working directory and drop its `.` and `..` components.
///
/// Resolution is lexical: links are left in place, so reported paths stay below the root as
/// given.
fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .map_err(|source| Error::Read {
                path: path.to_path_buf(),
                source,
            })?
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use tempfile::tempdir;

    use super::{Gate, Monitor, MonitorState};
    use crate::constraints::Constraints;
    use crate::error::Error;
    use crate::events::{Event, EventKind};
    use crate::native::mock::ChannelService;

    fn collector() -> (Arc<Mutex<Vec<Event>>>, impl FnMut(Event) + Send + 'static) {
        let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let events = Arc::clone(&events);
            move |event| events.lock().unwrap().push(event)
        };
        (events, sink)
    }

    #[test]
    fn must_hold_back_events_until_open() {
        let (events, sink) = collector();
        let gate = Gate::new(Box::new(sink));

        gate.offer(Event::new("/r/live", EventKind::Created));
        assert!(events.lock().unwrap().is_empty());

        gate.open(vec![Event::initial("/r/a"), Event::initial("/r/b")]);
        gate.offer(Event::new("/r/a", EventKind::Deleted));

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                Event::initial("/r/a"),
                Event::initial("/r/b"),
                Event::new("/r/live", EventKind::Created),
                Event::new("/r/a", EventKind::Deleted),
            ]
        );
    }

    #[test]
    fn must_walk_through_states() {
        let dir = tempdir().expect("to be created");
        File::create(dir.path().join("a")).expect("to be created");
        let service = ChannelService::new();
        let (events, sink) = collector();
        let mut monitor = Monitor::builder(dir.path()).service(service.clone()).build(sink);
        assert_eq!(monitor.state(), MonitorState::Starting);

        monitor.start().expect("to be started");
        assert_eq!(monitor.state(), MonitorState::Streaming);
        assert_eq!(
            *events.lock().unwrap(),
            vec![Event::initial(dir.path().join("a"))]
        );
        assert!(service.is_watching(dir.path()));

        assert!(matches!(monitor.start(), Err(Error::AlreadyStarted)));

        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Stopped);
        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert!(matches!(monitor.start(), Err(Error::AlreadyStarted)));
    }

    #[test]
    fn must_reject_non_directory_root() {
        let dir = tempdir().expect("to be created");
        let file = dir.path().join("file");
        File::create(&file).expect("to be created");
        let mut monitor = Monitor::builder(&file)
            .service(ChannelService::new())
            .build(|_| {});

        match monitor.start() {
            Err(Error::NotADirectory(path)) => assert_eq!(path, file),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }

    #[test]
    fn must_release_resources_when_start_fails() {
        let dir = tempdir().expect("to be created");
        std::fs::create_dir(dir.path().join("locked")).expect("to be created");
        let service = ChannelService::new();
        service.fail(&dir.path().join("locked"));
        let mut monitor = Monitor::builder(dir.path())
            .constraints(Constraints::default().with_recursive(true))
            .service(service.clone())
            .build(|_| {});

        assert!(matches!(monitor.start(), Err(Error::Register { .. })));
        assert_eq!(monitor.state(), MonitorState::Stopped);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !service.watching().is_empty() {
            assert!(Instant::now() < deadline, "registrations to be cancelled");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn must_make_root_absolute() {
        let monitor = Monitor::builder("relative").build(|_| {});
        assert_eq!(monitor.root(), Path::new("relative"));
        let root = super::absolute(monitor.root()).expect("to be resolved");
        assert!(root.is_absolute());
        assert!(root.ends_with("relative"));
    }

    #[test]
    fn must_normalize_root() {
        let cwd = std::env::current_dir().expect("to be known");
        assert_eq!(
            super::absolute(Path::new("a/./b/../c")).expect("to be resolved"),
            cwd.join("a/c")
        );
        assert_eq!(
            super::absolute(Path::new("/x/./y/../z")).expect("to be resolved"),
            Path::new("/x/z")
        );
        assert_eq!(
            super::absolute(Path::new("/x/y/")).expect("to be resolved"),
            Path::new("/x/y")
        );
    }

    #[test]
    fn must_report_paths_below_normalized_root() {
        let dir = tempdir().expect("to be created");
        std::fs::create_dir(dir.path().join("sub")).expect("to be created");
        File::create(dir.path().join("sub/file")).expect("to be created");
        let service = ChannelService::new();
        let (events, sink) = collector();
        let mut monitor = Monitor::builder(dir.path().join("sub/../sub/."))
            .service(service.clone())
            .build(sink);
        monitor.start().expect("to be started");
        assert_eq!(
            *events.lock().unwrap(),
            vec![Event::initial(dir.path().join("sub/file"))]
        );
        assert_eq!(service.watching(), vec![dir.path().join("sub")]);
        monitor.stop();
    }
}
