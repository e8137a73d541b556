//! Recursive watching emulated on top of single-directory watchers.
//!
//! Every directory of the tree gets its own [`DirectoryWatcher`](DirectoryWatcher). All of them
//! feed one shared queue, drained by one consumer that also maintains the registry: a created
//! directory is watched and caught up, a deleted one is unwatched together with its
//! descendants.
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info, warn};

use crate::constraints::{Constraints, EventFilter, Verdict};
use crate::error::{Error, Result};
use crate::events::{Event, EventHandler, EventKind};
use crate::flags::FileType;
use crate::native::WatchService;
use crate::pool::PoolHandle;
use crate::reader::walk;
use crate::watcher::{event_queue, Consumer, DirectoryWatcher, EventSender, Queued};

type Registry = DashMap<PathBuf, DirectoryWatcher>;

/// Filter used by the watchers of a tree.
///
/// Besides the events the user constraints accept, it tracks directory creations and
/// deletions of watched directories, so the registry can follow the shape of the tree.
struct TreeFilter {
    constraints: Constraints,
    registry: Arc<Registry>,
}

impl EventFilter for TreeFilter {
    fn accepts(&self, event: &Event) -> bool {
        self.verdict(event) != Verdict::Reject
    }

    fn verdict(&self, event: &Event) -> Verdict {
        if self.constraints.matches(event) {
            return Verdict::Deliver;
        }
        let structural = match event.kind {
            EventKind::Created => matches!(FileType::of(&event.path), Ok(FileType::Directory)),
            EventKind::Deleted => self.registry.contains_key(&event.path),
            EventKind::Initial | EventKind::Modified => false,
        };
        if structural {
            Verdict::Track
        } else {
            Verdict::Reject
        }
    }
}

struct Tree {
    root: PathBuf,
    constraints: Constraints,
    service: Arc<dyn WatchService>,
    pool: PoolHandle,
    registry: Arc<Registry>,
    filter: Arc<dyn EventFilter>,
    tx: EventSender,
}

impl Tree {
    /// Register a watcher for `directory`. Return false if it is already watched.
    fn watch(&self, directory: &Path) -> Result<bool> {
        match self.registry.entry(directory.to_path_buf()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                let watcher = DirectoryWatcher::attach(
                    &*self.service,
                    &self.pool,
                    directory,
                    Arc::clone(&self.filter),
                    self.tx.clone(),
                )?;
                entry.insert(watcher);
                Ok(true)
            }
        }
    }

    /// Stop the watcher of `directory` and of every watched directory below it.
    fn unwatch(&self, directory: &Path) {
        let doomed: Vec<PathBuf> = self
            .registry
            .iter()
            .filter(|entry| entry.key().starts_with(directory))
            .map(|entry| entry.key().clone())
            .collect();
        for path in doomed {
            if let Some((_, watcher)) = self.registry.remove(&path) {
                watcher.stop();
            }
        }
    }

    fn dispatch(&self, queued: Queued, handler: &mut dyn EventHandler) {
        let path = queued.event.path.clone();
        match queued.event.kind {
            EventKind::Initial | EventKind::Created => {
                let directory = (path != self.root
                    && matches!(FileType::of(&path), Ok(FileType::Directory)))
                .then(|| path);
                let fresh = directory.filter(|directory| match self.watch(directory) {
                    Ok(fresh) => fresh,
                    Err(e) => {
                        warn!("Skipping directory: {}", e);
                        false
                    }
                });
                self.forward(queued, handler);
                if let Some(directory) = fresh {
                    self.catch_up(&directory, handler);
                }
            }
            EventKind::Deleted => {
                self.unwatch(&path);
                self.forward(queued, handler);
            }
            EventKind::Modified => self.forward(queued, handler),
        }
    }

    /// Report what was created in `directory` before its watcher was registered.
    fn catch_up(&self, directory: &Path, handler: &mut dyn EventHandler) {
        debug!("Catching up with {:?}", directory);
        let caught_up = walk(directory, false, |path, _| {
            let event = Event::initial(path);
            let verdict = if self.constraints.matches(&event) {
                Verdict::Deliver
            } else {
                Verdict::Track
            };
            self.dispatch(Queued::new(event, verdict), handler);
            Ok(())
        });
        if let Err(e) = caught_up {
            warn!("Unable to catch up with {:?}: {}", directory, e);
        }
    }

    /// The verdict was taken when the event was read. The entry may be gone by now.
    fn forward(&self, queued: Queued, handler: &mut dyn EventHandler) {
        if queued.deliver {
            handler.handle_event(queued.event);
        }
    }
}

/// Watches a directory and the whole tree below it.
///
/// Directories that exist when the watcher starts are watched before it returns. Directories
/// created later are watched once their creation is seen, and their entries are reported as
/// [`Initial`](EventKind::Initial) events so nothing created before the registration is lost.
/// An entry created exactly at that moment may be reported twice.
pub struct RecursiveWatcher {
    tree: Arc<Tree>,
    consumer: Consumer,
}

impl RecursiveWatcher {
    /// Watch the tree at `root`, delivering every event `constraints` accept to `handler`.
    ///
    /// # Errors
    /// Return error when `root` or a directory below it can't be registered or listed. Nothing
    /// is left running in that case.
    pub fn start<H: EventHandler>(
        service: Arc<dyn WatchService>,
        pool: PoolHandle,
        root: &Path,
        constraints: Constraints,
        capacity: usize,
        handler: H,
    ) -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let filter = Arc::new(TreeFilter {
            constraints: constraints.clone(),
            registry: Arc::clone(&registry),
        });
        let (tx, rx) = event_queue(capacity);
        let tree = Arc::new(Tree {
            root: root.to_path_buf(),
            constraints,
            service,
            pool,
            registry,
            filter,
            tx,
        });

        let dispatcher = Arc::clone(&tree);
        let mut handler = handler;
        let consumer = Consumer::spawn(&tree.pool, root.to_path_buf(), rx, move |queued| {
            dispatcher.dispatch(queued, &mut handler);
        });
        let watcher = Self { tree, consumer };

        watcher.tree.watch(root)?;
        walk(root, true, |path, file_type| {
            if file_type != FileType::Directory {
                return Ok(());
            }
            match watcher.tree.watch(path) {
                Ok(_) => Ok(()),
                Err(Error::Register { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                    debug!("Skipping vanished directory {:?}", path);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })?;
        info!(
            "Watching {} directories below {:?}",
            watcher.tree.registry.len(),
            root
        );
        Ok(watcher)
    }

    pub fn root(&self) -> &Path {
        &self.tree.root
    }

    /// Directories currently watched, sorted.
    pub fn watched(&self) -> Vec<PathBuf> {
        let mut watched: Vec<_> = self
            .tree
            .registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        watched.sort();
        watched
    }

    pub fn stop(self) {
        info!("Stopping watchers below {:?}", self.tree.root);
    }
}

impl Drop for RecursiveWatcher {
    fn drop(&mut self) {
        self.consumer.stop();
        let paths: Vec<PathBuf> = self
            .tree
            .registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for path in paths {
            if let Some((_, watcher)) = self.tree.registry.remove(&path) {
                watcher.stop();
            }
        }
    }
}
