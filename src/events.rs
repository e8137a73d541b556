//! Events delivered to the caller and the callback trait that receives them.
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// The kind of change an [`Event`](Event) reports.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EventKind {
    /// The entry existed when the monitor started.
    Initial,
    Created,
    Deleted,
    Modified,
}

impl EventKind {
    /// Whether this kind comes from the live stream rather than the startup snapshot.
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Initial)
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initial => "INITIAL",
            Self::Created => "CREATED",
            Self::Deleted => "DELETED",
            Self::Modified => "MODIFIED",
        };
        f.write_str(name)
    }
}

/// A filesystem change notification.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Event {
    pub path: PathBuf,
    pub kind: EventKind,
}

impl Event {
    pub fn new(path: impl Into<PathBuf>, kind: EventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn initial(path: impl Into<PathBuf>) -> Self {
        Self::new(path, EventKind::Initial)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.path.display())
    }
}

/// Receives events, one call per delivered event, in delivery order.
pub trait EventHandler: Send + 'static {
    fn handle_event(&mut self, ev: Event);
}

impl<T> EventHandler for T
where
    T: FnMut(Event) + Send + 'static,
{
    fn handle_event(&mut self, ev: Event) {
        self(ev)
    }
}
