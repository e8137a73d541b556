//! Filesystem entry types and sets of them.
use std::fmt::{Display, Formatter};
use std::fs::{self, FileType as StdFileType};
use std::io;
use std::path::Path;

/// The type of a filesystem entry. Symbolic links are never followed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FileType {
    Regular,
    Directory,
    Link,
    Other,
}

impl FileType {
    /// Read the current type of the entry at `path`.
    ///
    /// # Errors
    /// Return error when the entry no longer exists or its metadata can't be read.
    pub fn of(path: &Path) -> io::Result<Self> {
        fs::symlink_metadata(path).map(|metadata| Self::from_std(metadata.file_type()))
    }

    pub(crate) fn from_std(file_type: StdFileType) -> Self {
        if file_type.is_symlink() {
            Self::Link
        } else if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::Regular
        } else {
            Self::Other
        }
    }

    pub const fn flag(self) -> FileTypes {
        match self {
            Self::Regular => FileTypes::REGULAR,
            Self::Directory => FileTypes::DIRECTORY,
            Self::Link => FileTypes::LINK,
            Self::Other => FileTypes::OTHER,
        }
    }
}

bitflags::bitflags! {
  /// A set of [`FileType`](FileType)s. The empty set places no restriction on types.
  #[derive(Default)]
  pub struct FileTypes: u8 {
    const REGULAR = 0b0001;
    const DIRECTORY = 0b0010;
    const LINK = 0b0100;
    const OTHER = 0b1000;
  }
}

impl FileTypes {
    /// Whether `file_type` is a member of this set.
    pub fn includes(self, file_type: FileType) -> bool {
        self.contains(file_type.flag())
    }
}

impl From<FileType> for FileTypes {
    fn from(file_type: FileType) -> Self {
        file_type.flag()
    }
}

impl FromIterator<FileType> for FileTypes {
    fn from_iter<I: IntoIterator<Item = FileType>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::empty(), |acc, file_type| acc | file_type.flag())
    }
}

impl Display for FileTypes {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.contains(Self::REGULAR) {
            let _d = write!(f, "REGULAR ");
        }
        if self.contains(Self::DIRECTORY) {
            let _d = write!(f, "DIRECTORY ");
        }
        if self.contains(Self::LINK) {
            let _d = write!(f, "LINK ");
        }
        if self.contains(Self::OTHER) {
            let _d = write!(f, "OTHER ");
        }
        write!(f, "")
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::os::unix::fs::symlink;

    use tempfile::tempdir;

    use super::{FileType, FileTypes};

    #[test]
    fn must_read_entry_types() {
        let dir = tempdir().expect("to be created");
        let file = dir.path().join("file");
        let link = dir.path().join("link");
        File::create(&file).expect("to be created");
        symlink(&file, &link).expect("to be linked");

        assert_eq!(FileType::of(dir.path()).expect("to be read"), FileType::Directory);
        assert_eq!(FileType::of(&file).expect("to be read"), FileType::Regular);
        assert_eq!(FileType::of(&link).expect("to be read"), FileType::Link);
        assert!(FileType::of(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn must_collect_types_into_set() {
        let set: FileTypes = [FileType::Regular, FileType::Link].into_iter().collect();
        assert!(set.includes(FileType::Regular));
        assert!(set.includes(FileType::Link));
        assert!(!set.includes(FileType::Directory));
        assert_eq!(set.to_string(), "REGULAR LINK ");
    }
}
