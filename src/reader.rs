//! Synchronous snapshot of the entries that already exist below a directory.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::constraints::Constraints;
use crate::error::{Error, Result};
use crate::events::Event;
use crate::flags::FileType;

/// Visit every entry below `root` in pre-order, `root` itself excluded.
///
/// Entries of one directory are visited in file name order. Only immediate children are
/// visited unless `recursive` is set. Symbolic links are never descended into. An error
/// returned by `visit` aborts the walk.
///
/// # Errors
/// Return error when `root`, or a sub-directory that still exists, can't be listed, including
/// when its listing breaks off midway. An entry whose type can't be read is skipped.
pub fn walk<F>(root: &Path, recursive: bool, mut visit: F) -> Result<()>
where
    F: FnMut(&Path, FileType) -> Result<()>,
{
    walk_dir(root, recursive, true, &mut visit)
}

fn walk_dir<F>(dir: &Path, recursive: bool, is_root: bool, visit: &mut F) -> Result<()>
where
    F: FnMut(&Path, FileType) -> Result<()>,
{
    let entries = match list_dir(dir) {
        Ok(entries) => entries,
        // Removed after its parent was listed.
        Err(e) if !is_root && e.kind() == io::ErrorKind::NotFound => {
            debug!("Skipping vanished directory {:?}", dir);
            return Ok(());
        }
        Err(source) => {
            return Err(Error::Read {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    for (path, file_type) in entries {
        visit(&path, file_type)?;
        if recursive && file_type == FileType::Directory {
            walk_dir(&path, recursive, false, visit)?;
        }
    }
    Ok(())
}

fn list_dir(dir: &Path) -> io::Result<Vec<(PathBuf, FileType)>> {
    collect_entries(dir, fs::read_dir(dir)?)
}

/// A directory entry as yielded by a listing.
trait Listed {
    fn path(&self) -> PathBuf;
    fn file_type(&self) -> io::Result<FileType>;
}

impl Listed for fs::DirEntry {
    fn path(&self) -> PathBuf {
        fs::DirEntry::path(self)
    }

    fn file_type(&self) -> io::Result<FileType> {
        fs::DirEntry::file_type(self).map(FileType::from_std)
    }
}

/// A listing that fails midway fails as a whole. A single entry whose type can't be read is
/// skipped.
fn collect_entries<E, I>(dir: &Path, listing: I) -> io::Result<Vec<(PathBuf, FileType)>>
where
    E: Listed,
    I: IntoIterator<Item = io::Result<E>>,
{
    let mut entries = Vec::new();
    for entry in listing {
        let entry = entry?;
        match entry.file_type() {
            Ok(file_type) => entries.push((entry.path(), file_type)),
            Err(e) => debug!(
                "Skipping {:?} in {:?}, unable to read its type: {}",
                entry.path(),
                dir,
                e
            ),
        }
    }
    entries.sort_by(|(a, _), (b, _)| a.file_name().cmp(&b.file_name()));
    Ok(entries)
}

/// Take a snapshot of `root` as a sequence of [`Initial`](crate::EventKind::Initial) events.
///
/// Recursion follows [`Constraints::is_recursive`](Constraints::is_recursive). Constraints are
/// applied per entry: a directory that doesn't match is still descended into.
///
/// # Errors
/// Return error when the walk fails, see [`walk`](walk).
pub fn read(root: &Path, constraints: &Constraints) -> Result<Vec<Event>> {
    info!("Reading started path={:?}", root);
    let mut events = Vec::new();
    walk(root, constraints.is_recursive(), |path, _| {
        let event = Event::initial(path);
        if constraints.matches(&event) {
            debug!("Read {}", event);
            events.push(event);
        }
        Ok(())
    })?;
    info!("Reading completed path={:?} events={}", root, events.len());
    Ok(events)
}
