//! The native change-notification capability the monitor is built on.
//!
//! A native service watches a single directory, without recursion and without history, and
//! reports changes as batches of [`RawEvent`](RawEvent)s. Dropping the returned
//! [`RawEventStream`](RawEventStream) cancels the registration.
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;

pub use self::inotify::InotifyService;

mod inotify;
#[cfg(test)]
pub(crate) mod mock;

/// The kind of a [`RawEvent`](RawEvent).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RawEventKind {
    Create,
    Delete,
    Modify,
    /// The native queue saturated and some events were not reported.
    Overflow,
}

/// A change reported by the native service, relative to the watched directory.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct RawEvent {
    pub kind: RawEventKind,
    /// Name of the changed entry. `None` when the event concerns the watched directory itself.
    pub name: Option<PathBuf>,
}

impl RawEvent {
    pub fn new(kind: RawEventKind, name: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            name: Some(name.into()),
        }
    }

    pub const fn overflow() -> Self {
        Self {
            kind: RawEventKind::Overflow,
            name: None,
        }
    }
}

/// A stream of raw event batches for one registered directory.
///
/// Polling waits for the next batch. Dropping the stream cancels the registration.
pub struct RawEventStream {
    stream: Pin<Box<dyn Stream<Item = io::Result<Vec<RawEvent>>> + Send>>,
}

impl RawEventStream {
    pub fn new(stream: impl Stream<Item = io::Result<Vec<RawEvent>>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
        }
    }
}

impl Stream for RawEventStream {
    type Item = io::Result<Vec<RawEvent>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

/// A native per-directory change-notification service.
pub trait WatchService: Send + Sync + 'static {
    /// Start watching `directory`.
    ///
    /// Called from within the worker pool's runtime context, so implementations may register
    /// IO resources with it.
    ///
    /// # Errors
    /// Return error when `directory` can't be watched, e.g. it vanished or access is denied.
    fn register(&self, directory: &Path) -> io::Result<RawEventStream>;
}
