use std::time::SystemTime;

use bitflags::bitflags;
use cap_std::fs::OpenOptions;
use serde::{Deserialize, Serialize};

/// What kind of object a path names.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    File,
    Directory,
    /// Anything else a backend may report (symlinks, devices, sockets).
    Other,
}

/// The metadata every backend reports. Only the file type is relied upon
/// by the storage algorithms; the rest is informational.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub file_type: FileType,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl Metadata {
    pub fn file(size: u64, modified: Option<SystemTime>) -> Self {
        Self {
            file_type: FileType::File,
            size,
            modified,
        }
    }

    pub fn directory(modified: Option<SystemTime>) -> Self {
        Self {
            file_type: FileType::Directory,
            size: 0,
            modified,
        }
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

impl From<cap_std::fs::Metadata> for Metadata {
    fn from(value: cap_std::fs::Metadata) -> Self {
        let file_type = if value.is_dir() {
            FileType::Directory
        } else if value.is_file() {
            FileType::File
        } else {
            FileType::Other
        };

        Self {
            file_type,
            size: if file_type == FileType::Directory {
                0
            } else {
                value.len()
            },
            modified: value.modified().ok().map(cap_std::time::SystemTime::into_std),
        }
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub metadata: Metadata,
}

impl DirEntry {
    pub fn is_file(&self) -> bool {
        self.metadata.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.metadata.is_dir()
    }
}

/// The optional operations a backend implements natively. The storage
/// facade consults these before delegating, and synthesizes rename and
/// copy where they are missing.
#[repr(transparent)]
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Capabilities(u8);

bitflags! {
    impl Capabilities: u8 {
        const RENAME = 0b0001;
        const COPY = 0b0010;
        const READ_STREAM = 0b0100;
        const WRITE_STREAM = 0b1000;
    }
}

/// How [`Backend::write_file`](super::Backend::write_file) treats an
/// existing or missing target.
#[repr(transparent)]
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct WriteFlags(u32);

bitflags! {
    impl WriteFlags: u32 {
        /// Create the file if it does not exist.
        const CREATE = 0x0000_0001;
        /// Discard existing contents.
        const TRUNCATE = 0x0000_0002;
        /// Add to the end of existing contents.
        const APPEND = 0x0000_0004;
        /// Fail if the file already exists.
        const EXCLUSIVE = 0x0000_0008;

        const OVERWRITE = Self::CREATE.bits() | Self::TRUNCATE.bits();
    }
}

impl From<WriteFlags> for OpenOptions {
    fn from(flags: WriteFlags) -> Self {
        let mut opts = OpenOptions::new();
        opts.write(true);

        if flags.contains(WriteFlags::CREATE) {
            opts.create(true);
        }

        if flags.contains(WriteFlags::EXCLUSIVE) {
            opts.create_new(true);
        }

        if flags.contains(WriteFlags::APPEND) {
            opts.append(true);
        } else if flags.contains(WriteFlags::TRUNCATE) {
            opts.truncate(true);
        }

        opts
    }
}

/// A byte range to read. The default reads the whole file.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ReadOptions {
    pub fn range(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length: Some(length),
        }
    }

    pub fn is_whole_file(&self) -> bool {
        self.offset == 0 && self.length.is_none()
    }

    /// Cut the requested range out of a fully-read buffer.
    pub fn apply(&self, data: Vec<u8>) -> Vec<u8> {
        if self.is_whole_file() {
            return data;
        }

        let len = data.len();
        let start = usize::try_from(self.offset).map_or(len, |offset| offset.min(len));
        let end = match self.length {
            Some(length) => usize::try_from(length)
                .map_or(len, |length| start.saturating_add(length).min(len)),
            None => len,
        };

        data[start..end].to_vec()
    }
}

/// Options for directory-shaped operations: `mkdir`, `rmdir` and `copy`.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DirOptions {
    pub recursive: bool,
}

impl DirOptions {
    pub fn recursive() -> Self {
        Self { recursive: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_options_slice() {
        let data = b"hello world".to_vec();

        assert_eq!(ReadOptions::default().apply(data.clone()), b"hello world");
        assert_eq!(ReadOptions::range(6, 5).apply(data.clone()), b"world");
        assert_eq!(ReadOptions::range(6, 100).apply(data.clone()), b"world");
        assert!(ReadOptions::range(100, 5).apply(data).is_empty());
    }

    #[test]
    fn overwrite_is_create_and_truncate() {
        assert!(WriteFlags::OVERWRITE.contains(WriteFlags::CREATE));
        assert!(WriteFlags::OVERWRITE.contains(WriteFlags::TRUNCATE));
        assert!(!WriteFlags::OVERWRITE.contains(WriteFlags::EXCLUSIVE));
    }
}
