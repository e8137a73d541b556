use std::io;
use std::path::PathBuf;

/// Fatal errors surfaced while setting up a monitor.
///
/// Recoverable per-entry failures (an entry vanishing while it is inspected) never
/// show up here: they are logged and the entry is skipped.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to build worker pool: {0}")]
    Runtime(#[source] io::Error),
    #[error("unable to watch {path:?}: {source}")]
    Register {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("monitor has already been started")]
    AlreadyStarted,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
