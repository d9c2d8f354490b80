use std::ops::Deref;

use async_trait::async_trait;
use camino::Utf8Path;
use tokio::io::{AsyncRead, AsyncWrite};
use trait_enum::trait_enum;

use super::{
    Capabilities,
    ContentStore,
    DirEntry,
    Error,
    LocalDir,
    MemoryFs,
    Metadata,
    ReadOptions,
    WriteFlags,
};

pub type ReadStream = Box<dyn AsyncRead + Send + Unpin>;
pub type WriteStream = Box<dyn AsyncWrite + Send + Unpin>;

/// A storage technology that can be mounted into the virtual filesystem.
///
/// Paths passed to a backend are always absolute within that backend, using
/// `/` as the separator (`/` is the backend's own root, `/a/b` a path below
/// it). Translating them to native addressing is the backend's job.
///
/// Read-only backends must refuse every mutating call with
/// [`Error::ReadOnly`]. The optional operations at the bottom of the trait
/// default to [`Error::NotSupported`]; a backend that overrides them should
/// advertise so through [`Backend::capabilities`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// The identifier this backend is registered and mounted under.
    fn id(&self) -> &str;

    fn is_read_only(&self) -> bool;

    fn capabilities(&self) -> Capabilities;

    async fn exists(&self, path: &Utf8Path) -> Result<bool, Error>;

    /// Fails with [`Error::NotFound`] if nothing exists at `path`.
    async fn stat(&self, path: &Utf8Path) -> Result<Metadata, Error>;

    async fn read_file(&self, path: &Utf8Path, options: ReadOptions) -> Result<Vec<u8>, Error>;

    /// Write `data` to the file at `path`. The parent directory must exist.
    async fn write_file(&self, path: &Utf8Path, data: &[u8], flags: WriteFlags)
    -> Result<(), Error>;

    /// Create a directory. Without `recursive` the parent must exist and the
    /// directory must not; with it, missing ancestors are created and an
    /// existing directory is not an error.
    async fn mkdir(&self, path: &Utf8Path, recursive: bool) -> Result<(), Error>;

    /// List a directory, sorted by name. Fails with [`Error::NotADirectory`]
    /// when `path` is a file.
    async fn read_dir(&self, path: &Utf8Path) -> Result<Vec<DirEntry>, Error>;

    async fn remove_file(&self, path: &Utf8Path) -> Result<(), Error>;

    async fn remove_dir(&self, path: &Utf8Path, recursive: bool) -> Result<(), Error>;

    async fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), Error> {
        let _ = (from, to);
        Err(Error::not_supported(format!("{} cannot rename", self.id())))
    }

    async fn copy_file(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), Error> {
        let _ = (from, to);
        Err(Error::not_supported(format!("{} cannot copy", self.id())))
    }

    async fn open_read_stream(&self, path: &Utf8Path) -> Result<ReadStream, Error> {
        let _ = path;
        Err(Error::not_supported(format!(
            "{} cannot stream reads",
            self.id()
        )))
    }

    async fn open_write_stream(
        &self,
        path: &Utf8Path,
        flags: WriteFlags,
    ) -> Result<WriteStream, Error> {
        let _ = (path, flags);
        Err(Error::not_supported(format!(
            "{} cannot stream writes",
            self.id()
        )))
    }
}

/// An opaque wrapper for one of the built-in [`Backend`] implementations.
#[repr(transparent)]
pub struct BackendInstance {
    inner: BackendInstanceInner,
}

impl Deref for BackendInstance {
    type Target = dyn Backend;

    fn deref(&self) -> &Self::Target {
        self.inner.deref()
    }
}

impl std::fmt::Debug for BackendInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendInstance")
            .field("id", &self.id())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

impl From<LocalDir> for BackendInstance {
    fn from(local_dir: LocalDir) -> Self {
        Self {
            inner: BackendInstanceInner::LocalDir(local_dir),
        }
    }
}

impl From<MemoryFs> for BackendInstance {
    fn from(memory_fs: MemoryFs) -> Self {
        Self {
            inner: BackendInstanceInner::MemoryFs(memory_fs),
        }
    }
}

impl From<ContentStore> for BackendInstance {
    fn from(content_store: ContentStore) -> Self {
        Self {
            inner: BackendInstanceInner::ContentStore(content_store),
        }
    }
}

trait_enum! {
    enum BackendInstanceInner: Backend {
        LocalDir,
        MemoryFs,
        ContentStore
    }
}
