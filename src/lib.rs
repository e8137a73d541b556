//! An ordered, optionally recursive change monitor for a directory tree.
//!
//! A [`Monitor`](Monitor) first reports every entry that already exists below its root as an
//! [`Initial`](EventKind::Initial) event, then every change as a
//! [`Created`](EventKind::Created), [`Modified`](EventKind::Modified) or
//! [`Deleted`](EventKind::Deleted) event. The watch is registered before the snapshot is read,
//! so nothing that happens while the monitor starts is lost, and no live event about a
//! pre-existing entry is delivered before its snapshot event.
//!
//! ## Features
//!
//! - Recursive watching on top of a non-recursive native primitive (Linux `inotify`).
//! - Filtering by file name substrings, file name patterns and file types.
//! - A bounded queue per monitor, with backpressure instead of silently dropped events.
//!
//! ## Example
//!
//! ```rust
//! use fsmonitor::{Constraints, Event, FileTypes, Monitor};
//! use log::info;
//!
//! # let dir = tempfile::tempdir().expect("to be created");
//! # let root = dir.path();
//! let constraints = Constraints::default()
//!     .with_file_types(FileTypes::REGULAR | FileTypes::DIRECTORY)
//!     .with_recursive(true);
//! let mut monitor = Monitor::new(root, constraints, |event: Event| {
//!     info!("{}", event);
//! });
//! monitor.start().expect("monitor to be started");
//! // ...
//! monitor.stop();
//! ```
//!
//! ## Delivery
//!
//! Events of one directory are delivered in the order the kernel reports them. Events of
//! different directories are delivered in the order they were queued. An entry created inside a
//! brand new directory, right when that directory's watch is being registered, may be reported
//! twice: once as `Created` and once as `Initial`.
//!
//! ## License
//!
//! This project is licensed under MIT License.

pub use constraints::{Constraints, EventFilter, Verdict};
pub use error::{Error, Result};
pub use events::{Event, EventHandler, EventKind};
pub use flags::{FileType, FileTypes};
pub use monitor::{Monitor, MonitorBuilder, MonitorState};
pub use native::{InotifyService, RawEvent, RawEventKind, RawEventStream, WatchService};

pub mod constraints;
mod error;
pub mod events;
pub mod flags;
mod monitor;
pub mod native;
pub mod pool;
pub mod reader;
pub mod recursive;
pub mod watcher;
