use std::{
    io,
    io::{Read, Seek, SeekFrom, Write},
    sync::Arc,
};

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{
    ambient_authority,
    fs::OpenOptions,
    fs_utf8::Dir,
};
use tracing::{Level, event};

use super::{
    Backend,
    Capabilities,
    DirEntry,
    Error,
    Metadata,
    ReadOptions,
    ReadStream,
    WriteFlags,
    WriteStream,
};
use crate::vfs::error::IntoIoError;

/// A backend serving a directory on the host filesystem.
///
/// All access goes through a cap-std [`Dir`] capability for the base
/// directory, so no path handed to this backend can reach outside of it.
pub struct LocalDir {
    id: String,
    base_path: Utf8PathBuf,
    read_only: bool,
    root_dir: Arc<Dir>,
}

impl LocalDir {
    /// Open `base_path` as a backend, creating it first if `auto_create` is
    /// set.
    pub fn new(
        id: impl Into<String>,
        base_path: Utf8PathBuf,
        auto_create: bool,
        read_only: bool,
    ) -> Result<Self, Error> {
        if auto_create && !read_only {
            std::fs::create_dir_all(&base_path)
                .into_io_error(format!("failed to create LocalDir root {base_path}"))?;
        }

        let root_dir = Arc::new(
            Dir::open_ambient_dir(base_path.as_path(), ambient_authority())
                .into_io_error(format!("failed to open LocalDir root {base_path}"))?,
        );

        let id = id.into();
        event!(Level::DEBUG, backend = %id, base = %base_path, read_only, "opened local directory");

        Ok(Self {
            id,
            base_path,
            read_only,
            root_dir,
        })
    }

    pub fn base_path(&self) -> &Utf8Path {
        &self.base_path
    }

    fn check_writable(&self) -> Result<(), Error> {
        if self.read_only {
            Err(Error::ReadOnly(self.id.clone()))
        } else {
            Ok(())
        }
    }

    /// Run a blocking filesystem call against the root directory.
    async fn with_root<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&Dir) -> Result<T, Error> + Send + 'static,
    {
        let root_dir = Arc::clone(&self.root_dir);

        tokio::task::spawn_blocking(move || f(&root_dir))
            .await
            .unwrap_or_else(|e| {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }

                panic!("task failed: {e}");
            })
    }
}

/// Backend paths are rooted at `/`; cap-std wants them relative to the
/// directory handle.
fn relative(path: &Utf8Path) -> Utf8PathBuf {
    match path.as_str().trim_start_matches('/') {
        "" => Utf8PathBuf::from("."),
        rest => Utf8PathBuf::from(rest),
    }
}

fn metadata_of(dir: &Dir, path: &Utf8Path) -> io::Result<cap_std::fs::Metadata> {
    if path == "." {
        dir.dir_metadata()
    } else {
        dir.metadata(path)
    }
}

#[async_trait]
impl Backend for LocalDir {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn capabilities(&self) -> Capabilities {
        if self.read_only {
            Capabilities::READ_STREAM
        } else {
            Capabilities::all()
        }
    }

    async fn exists(&self, path: &Utf8Path) -> Result<bool, Error> {
        let path = relative(path);

        self.with_root(move |root_dir| match metadata_of(root_dir, &path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into_io_error(format!("failed to check {path}"))),
        })
        .await
    }

    async fn stat(&self, path: &Utf8Path) -> Result<Metadata, Error> {
        let path = relative(path);

        self.with_root(move |root_dir| {
            let metadata = metadata_of(root_dir, &path)
                .into_io_error(format!("failed to get metadata for {path}"))?;
            Ok(Metadata::from(metadata))
        })
        .await
    }

    async fn read_file(&self, path: &Utf8Path, options: ReadOptions) -> Result<Vec<u8>, Error> {
        let path = relative(path);

        self.with_root(move |root_dir| {
            if options.is_whole_file() {
                return root_dir
                    .read(&path)
                    .into_io_error(format!("failed to read {path}"));
            }

            let mut file = root_dir
                .open(&path)
                .into_io_error(format!("failed to open {path}"))?;
            file.seek(SeekFrom::Start(options.offset))
                .into_io_error("failed to seek file")?;

            let mut buf = Vec::new();
            match options.length {
                Some(length) => file.take(length).read_to_end(&mut buf),
                None => file.read_to_end(&mut buf),
            }
            .into_io_error(format!("failed to read {path}"))?;

            Ok(buf)
        })
        .await
    }

    async fn write_file(
        &self,
        path: &Utf8Path,
        data: &[u8],
        flags: WriteFlags,
    ) -> Result<(), Error> {
        self.check_writable()?;

        let path = relative(path);
        let data = data.to_vec();

        self.with_root(move |root_dir| {
            let mut file = root_dir
                .open_with(&path, &OpenOptions::from(flags))
                .into_io_error(format!("couldn't open file {path}"))?;
            file.write_all(&data)
                .into_io_error(format!("failed to write {path}"))?;
            Ok(())
        })
        .await
    }

    async fn mkdir(&self, path: &Utf8Path, recursive: bool) -> Result<(), Error> {
        self.check_writable()?;

        let path = relative(path);

        self.with_root(move |root_dir| {
            if path == "." {
                return if recursive {
                    Ok(())
                } else {
                    Err(Error::AlreadyExists("/".to_string()))
                };
            }

            if recursive {
                root_dir.create_dir_all(&path)
            } else {
                root_dir.create_dir(&path)
            }
            .into_io_error(format!("failed to create directory {path}"))
        })
        .await
    }

    async fn read_dir(&self, path: &Utf8Path) -> Result<Vec<DirEntry>, Error> {
        let backend_path = path.to_owned();
        let path = relative(path);

        self.with_root(move |root_dir| {
            let metadata = metadata_of(root_dir, &path)
                .into_io_error(format!("couldn't open directory {path}"))?;
            if !metadata.is_dir() {
                return Err(Error::NotADirectory(backend_path));
            }

            let mut entries = Vec::new();

            for entry in root_dir
                .read_dir(&path)
                .into_io_error("couldn't get directory entries")?
            {
                let entry = entry.into_io_error("couldn't get directory entry")?;

                let name = entry.file_name().into_io_error("couldn't get file name")?;
                let metadata = entry
                    .metadata()
                    .into_io_error("couldn't get file metadata")?;

                entries.push(DirEntry {
                    name,
                    metadata: Metadata::from(metadata),
                });
            }

            entries.sort_by(|a, b| a.name.cmp(&b.name));

            Ok(entries)
        })
        .await
    }

    async fn remove_file(&self, path: &Utf8Path) -> Result<(), Error> {
        self.check_writable()?;

        let path = relative(path);

        self.with_root(move |root_dir| {
            root_dir
                .remove_file(&path)
                .into_io_error(format!("failed to remove file {path}"))
        })
        .await
    }

    async fn remove_dir(&self, path: &Utf8Path, recursive: bool) -> Result<(), Error> {
        self.check_writable()?;

        let path = relative(path);
        if path == "." {
            return Err(Error::invalid_argument("cannot remove the backend root"));
        }

        self.with_root(move |root_dir| {
            if recursive {
                root_dir.remove_dir_all(&path)
            } else {
                root_dir.remove_dir(&path)
            }
            .into_io_error(format!("failed to remove directory {path}"))
        })
        .await
    }

    async fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), Error> {
        self.check_writable()?;

        let from = relative(from);
        let to = relative(to);

        self.with_root(move |root_dir| {
            root_dir
                .rename(&from, root_dir, &to)
                .into_io_error(format!("failed to rename {from} to {to}"))
        })
        .await
    }

    async fn copy_file(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), Error> {
        self.check_writable()?;

        let from = relative(from);
        let to = relative(to);

        self.with_root(move |root_dir| {
            root_dir
                .copy(&from, root_dir, &to)
                .into_io_error(format!("failed to copy {from} to {to}"))?;
            Ok(())
        })
        .await
    }

    async fn open_read_stream(&self, path: &Utf8Path) -> Result<ReadStream, Error> {
        let path = relative(path);

        let file = self
            .with_root(move |root_dir| {
                root_dir
                    .open(&path)
                    .into_io_error(format!("couldn't open file {path}"))
            })
            .await?;

        Ok(Box::new(tokio::fs::File::from_std(file.into_std())))
    }

    async fn open_write_stream(
        &self,
        path: &Utf8Path,
        flags: WriteFlags,
    ) -> Result<WriteStream, Error> {
        self.check_writable()?;

        let path = relative(path);

        let file = self
            .with_root(move |root_dir| {
                root_dir
                    .open_with(&path, &OpenOptions::from(flags))
                    .into_io_error(format!("couldn't open file {path}"))
            })
            .await?;

        Ok(Box::new(tokio::fs::File::from_std(file.into_std())))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    use super::*;
    use crate::vfs::ErrorKind;

    fn p(path: &str) -> &Utf8Path {
        Utf8Path::new(path)
    }

    fn local_dir(read_only: bool) -> (tempfile::TempDir, LocalDir) {
        let tmp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let backend = LocalDir::new("local", base, false, read_only).unwrap();
        (tmp, backend)
    }

    #[tokio::test]
    async fn auto_create_base_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(tmp.path().join("nested/data")).unwrap();

        let backend = LocalDir::new("local", base.clone(), true, false).unwrap();
        assert!(base.is_dir());
        assert!(backend.stat(p("/")).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn missing_base_dir_fails_without_auto_create() {
        let tmp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(tmp.path().join("absent")).unwrap();

        let err = LocalDir::new("local", base, false, false)
            .err()
            .expect("opening a missing directory should fail");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn write_read_round_trip() {
        let (_tmp, backend) = local_dir(false);

        backend
            .write_file(p("/a.txt"), b"hello", WriteFlags::OVERWRITE)
            .await
            .unwrap();

        assert!(backend.exists(p("/a.txt")).await.unwrap());
        assert_eq!(
            backend
                .read_file(p("/a.txt"), ReadOptions::default())
                .await
                .unwrap(),
            b"hello"
        );
        assert_eq!(
            backend
                .read_file(p("/a.txt"), ReadOptions::range(1, 3))
                .await
                .unwrap(),
            b"ell"
        );
    }

    #[tokio::test]
    async fn mkdir_semantics() {
        let (_tmp, backend) = local_dir(false);

        backend.mkdir(p("/a/b"), true).await.unwrap();
        backend.mkdir(p("/a/b"), true).await.unwrap();

        let err = backend.mkdir(p("/a/b"), false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = backend.mkdir(p("/x/y"), false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn read_dir_lists_sorted_entries() {
        let (_tmp, backend) = local_dir(false);
        backend.mkdir(p("/dir/sub"), true).await.unwrap();
        backend
            .write_file(p("/dir/b.txt"), b"b", WriteFlags::OVERWRITE)
            .await
            .unwrap();
        backend
            .write_file(p("/dir/a.txt"), b"a", WriteFlags::OVERWRITE)
            .await
            .unwrap();

        let entries = backend.read_dir(p("/dir")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt", "sub"]);
        assert!(entries[2].is_dir());

        let err = backend.read_dir(p("/dir/a.txt")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[tokio::test]
    async fn remove_dir_requires_recursive_when_not_empty() {
        let (_tmp, backend) = local_dir(false);
        backend.mkdir(p("/d"), false).await.unwrap();
        backend
            .write_file(p("/d/f"), b"", WriteFlags::OVERWRITE)
            .await
            .unwrap();

        let err = backend.remove_dir(p("/d"), false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        backend.remove_dir(p("/d"), true).await.unwrap();
        assert!(!backend.exists(p("/d")).await.unwrap());
    }

    #[tokio::test]
    async fn native_rename_and_copy() {
        let (_tmp, backend) = local_dir(false);
        backend
            .write_file(p("/a"), b"data", WriteFlags::OVERWRITE)
            .await
            .unwrap();

        backend.copy_file(p("/a"), p("/b")).await.unwrap();
        backend.rename(p("/a"), p("/c")).await.unwrap();

        assert!(!backend.exists(p("/a")).await.unwrap());
        for path in ["/b", "/c"] {
            assert_eq!(
                backend
                    .read_file(p(path), ReadOptions::default())
                    .await
                    .unwrap(),
                b"data"
            );
        }
    }

    #[tokio::test]
    async fn read_only_rejects_mutation() {
        let (tmp, backend) = local_dir(true);
        std::fs::write(tmp.path().join("seed"), b"seed").unwrap();

        let err = backend
            .write_file(p("/new"), b"x", WriteFlags::OVERWRITE)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(!tmp.path().join("new").exists());

        let err = backend.remove_file(p("/seed")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(tmp.path().join("seed").exists());
    }

    #[tokio::test]
    async fn streams_round_trip() {
        let (_tmp, backend) = local_dir(false);

        let mut writer = backend
            .open_write_stream(p("/s.bin"), WriteFlags::OVERWRITE)
            .await
            .unwrap();
        writer.write_all(b"streaming").await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        let mut reader = backend.open_read_stream(p("/s.bin")).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"streaming");
    }
}
