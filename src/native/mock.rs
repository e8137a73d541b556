//! A channel-backed [`WatchService`](WatchService) for driving deterministic scenarios.
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{RawEvent, RawEventStream, WatchService};

type BatchSender = mpsc::UnboundedSender<io::Result<Vec<RawEvent>>>;

#[derive(Default)]
pub struct ChannelService {
    senders: Mutex<HashMap<PathBuf, BatchSender>>,
    failing: Mutex<HashSet<PathBuf>>,
}

impl ChannelService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every later registration of `directory` fail.
    pub fn fail(&self, directory: &Path) {
        self.failing.lock().unwrap().insert(directory.to_path_buf());
    }

    /// Push a batch to the watcher of `directory`. Return false if nobody is listening.
    pub fn emit(&self, directory: &Path, batch: Vec<RawEvent>) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(directory)
            .map_or(false, |tx| tx.send(Ok(batch)).is_ok())
    }

    pub fn emit_error(&self, directory: &Path) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(directory)
            .map_or(false, |tx| {
                tx.send(Err(io::Error::new(io::ErrorKind::Other, "native failure")))
                    .is_ok()
            })
    }

    /// Whether `directory` is registered and its stream has not been dropped.
    pub fn is_watching(&self, directory: &Path) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(directory)
            .map_or(false, |tx| !tx.is_closed())
    }

    pub fn watching(&self) -> Vec<PathBuf> {
        let mut watching: Vec<_> = self
            .senders
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(path, _)| path.clone())
            .collect();
        watching.sort();
        watching
    }
}

impl WatchService for ChannelService {
    fn register(&self, directory: &Path) -> io::Result<RawEventStream> {
        if self.failing.lock().unwrap().contains(directory) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap()
            .insert(directory.to_path_buf(), tx);
        Ok(RawEventStream::new(UnboundedReceiverStream::new(rx)))
    }
}
