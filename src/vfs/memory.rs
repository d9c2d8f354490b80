//! In-memory filesystem backend. All data is lost when it is dropped.

use std::io::Cursor;

use async_trait::async_trait;
use camino::Utf8Path;
use parking_lot::RwLock;

use super::{
    Backend,
    Capabilities,
    DirEntry,
    Error,
    Metadata,
    ReadOptions,
    ReadStream,
    WriteFlags,
    tree::Tree,
};

pub struct MemoryFs {
    id: String,
    read_only: bool,
    capabilities: Capabilities,
    tree: RwLock<Tree<Vec<u8>>>,
}

impl MemoryFs {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            read_only: false,
            capabilities: Capabilities::RENAME | Capabilities::COPY | Capabilities::READ_STREAM,
            tree: RwLock::new(Tree::new()),
        }
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Restrict which optional operations this backend offers. Only flags
    /// it actually implements are kept.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities
            & (Capabilities::RENAME | Capabilities::COPY | Capabilities::READ_STREAM);
        self
    }

    fn check_writable(&self) -> Result<(), Error> {
        if self.read_only {
            Err(Error::ReadOnly(self.id.clone()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Backend for MemoryFs {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn exists(&self, path: &Utf8Path) -> Result<bool, Error> {
        Ok(self.tree.read().exists(path))
    }

    async fn stat(&self, path: &Utf8Path) -> Result<Metadata, Error> {
        self.tree.read().stat(path)
    }

    async fn read_file(&self, path: &Utf8Path, options: ReadOptions) -> Result<Vec<u8>, Error> {
        let data = self.tree.read().file(path)?.clone();
        Ok(options.apply(data))
    }

    async fn write_file(
        &self,
        path: &Utf8Path,
        data: &[u8],
        flags: WriteFlags,
    ) -> Result<(), Error> {
        self.check_writable()?;

        let mut tree = self.tree.write();
        let content = match tree.check_write(path, flags)? {
            Some(existing) if flags.contains(WriteFlags::APPEND) => {
                let mut content = existing.clone();
                content.extend_from_slice(data);
                content
            }
            Some(existing) if !flags.contains(WriteFlags::TRUNCATE) => {
                let mut content = existing.clone();
                let overlap = data.len().min(content.len());
                content[..overlap].copy_from_slice(&data[..overlap]);
                content.extend_from_slice(&data[overlap..]);
                content
            }
            _ => data.to_vec(),
        };
        tree.put_file(path, content);

        Ok(())
    }

    async fn mkdir(&self, path: &Utf8Path, recursive: bool) -> Result<(), Error> {
        self.check_writable()?;
        self.tree.write().mkdir(path, recursive)
    }

    async fn read_dir(&self, path: &Utf8Path) -> Result<Vec<DirEntry>, Error> {
        self.tree.read().list(path)
    }

    async fn remove_file(&self, path: &Utf8Path) -> Result<(), Error> {
        self.check_writable()?;
        self.tree.write().remove_file(path).map(drop)
    }

    async fn remove_dir(&self, path: &Utf8Path, recursive: bool) -> Result<(), Error> {
        self.check_writable()?;
        self.tree.write().remove_dir(path, recursive).map(drop)
    }

    async fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), Error> {
        if !self.capabilities.contains(Capabilities::RENAME) {
            return Err(Error::not_supported(format!("{} cannot rename", self.id)));
        }

        self.check_writable()?;
        self.tree.write().rename(from, to)
    }

    async fn copy_file(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), Error> {
        if !self.capabilities.contains(Capabilities::COPY) {
            return Err(Error::not_supported(format!("{} cannot copy", self.id)));
        }

        self.check_writable()?;

        let mut tree = self.tree.write();
        let content = tree.file(from)?.clone();
        tree.check_write(to, WriteFlags::OVERWRITE)?;
        tree.put_file(to, content);

        Ok(())
    }

    async fn open_read_stream(&self, path: &Utf8Path) -> Result<ReadStream, Error> {
        if !self.capabilities.contains(Capabilities::READ_STREAM) {
            return Err(Error::not_supported(format!(
                "{} cannot stream reads",
                self.id
            )));
        }

        let data = self.tree.read().file(path)?.clone();
        Ok(Box::new(Cursor::new(data)))
    }
}
