//! The storage facade every caller goes through.
//!
//! Single-backend operations resolve the virtual path, refuse mutations on
//! read-only backends, and hand the backend-relative path over. Copy and
//! rename may span two backends and are built out of the other operations
//! when no native one applies. Errors leaving this module carry the
//! operation and virtual path as [`Error::Context`] around the original.

use std::{future::Future, pin::Pin, sync::Arc, time::Instant};

use camino::Utf8Path;
use metrics::{counter, histogram};
use tracing::{Level, event, instrument};

use super::{
    BackendInstance,
    Capabilities,
    DirEntry,
    DirOptions,
    Error,
    FileType,
    Metadata,
    MountEntry,
    MountRegistry,
    PathResolver,
    ReadOptions,
    ReadStream,
    ResolvedPath,
    ResultExt as _,
    WriteFlags,
    WriteStream,
    path,
};
use crate::metrics::Metrics;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Time an operation and count it, and its failure if any.
async fn record<T>(
    op: &'static str,
    operation: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    let start_time = Instant::now();
    let result = operation.await;

    histogram!(Metrics::OPERATION_DURATION, "op" => op).record(start_time.elapsed());
    counter!(Metrics::OPERATIONS, "op" => op).increment(1);
    if let Err(err) = &result {
        counter!(Metrics::OPERATION_ERRORS, "op" => op, "kind" => err.kind().as_str())
            .increment(1);
    }

    result
}

fn check_writable(resolved: &ResolvedPath) -> Result<(), Error> {
    if resolved.backend.is_read_only() {
        Err(Error::ReadOnly(resolved.backend.id().to_string()))
    } else {
        Ok(())
    }
}

fn check_capability(resolved: &ResolvedPath, capability: Capabilities) -> Result<(), Error> {
    if resolved.backend.capabilities().contains(capability) {
        Ok(())
    } else {
        Err(Error::not_supported(format!(
            "backend `{}` does not support {capability:?}",
            resolved.backend.id()
        )))
    }
}

#[derive(Clone)]
pub struct StorageOps {
    resolver: PathResolver,
}

impl StorageOps {
    pub fn new(registry: Arc<MountRegistry>) -> Self {
        Self {
            resolver: PathResolver::new(registry),
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn registry(&self) -> &Arc<MountRegistry> {
        self.resolver.registry()
    }

    pub fn mounts(&self) -> Vec<MountEntry> {
        self.registry().mounts()
    }

    #[instrument(level = "debug", skip(self), err(level = "debug"))]
    pub async fn exists(&self, path: &str) -> Result<bool, Error> {
        record("exists", async {
            let resolved = self.resolver.resolve(path)?;
            resolved.backend.exists(&resolved.relative_path).await
        })
        .await
        .at("exists", path)
    }

    #[instrument(level = "debug", skip(self), err(level = "debug"))]
    pub async fn stat(&self, path: &str) -> Result<Metadata, Error> {
        record("stat", async {
            let resolved = self.resolver.resolve(path)?;
            resolved.backend.stat(&resolved.relative_path).await
        })
        .await
        .at("stat", path)
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, Error> {
        self.read_file_with(path, ReadOptions::default()).await
    }

    #[instrument(level = "debug", skip(self), err(level = "debug"))]
    pub async fn read_file_with(&self, path: &str, options: ReadOptions) -> Result<Vec<u8>, Error> {
        record("read", async {
            let resolved = self.resolver.resolve(path)?;
            let data = resolved
                .backend
                .read_file(&resolved.relative_path, options)
                .await?;

            counter!(Metrics::BYTES_READ).increment(data.len() as u64);
            Ok(data)
        })
        .await
        .at("read", path)
    }

    /// Create or replace the file at `path`, creating parent directories as
    /// needed.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), Error> {
        self.write_file_with(path, data, WriteFlags::OVERWRITE).await
    }

    #[instrument(level = "debug", skip(self, data), fields(size = data.len()), err(level = "debug"))]
    pub async fn write_file_with(
        &self,
        path: &str,
        data: &[u8],
        flags: WriteFlags,
    ) -> Result<(), Error> {
        record("write", async {
            let resolved = self.resolver.resolve(path)?;
            check_writable(&resolved)?;
            resolved.ensure_parent().await?;

            resolved
                .backend
                .write_file(&resolved.relative_path, data, flags)
                .await?;

            counter!(Metrics::BYTES_WRITTEN).increment(data.len() as u64);
            Ok(())
        })
        .await
        .at("write", path)
    }

    #[instrument(level = "debug", skip(self), err(level = "debug"))]
    pub async fn mkdir(&self, path: &str, options: DirOptions) -> Result<(), Error> {
        record("mkdir", async {
            let resolved = self.resolver.resolve(path)?;
            check_writable(&resolved)?;
            resolved.ensure_parent().await?;

            resolved
                .backend
                .mkdir(&resolved.relative_path, options.recursive)
                .await
        })
        .await
        .at("mkdir", path)
    }

    #[instrument(level = "debug", skip(self), err(level = "debug"))]
    pub async fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, Error> {
        record("readdir", async {
            let resolved = self.resolver.resolve(path)?;
            resolved.backend.read_dir(&resolved.relative_path).await
        })
        .await
        .at("readdir", path)
    }

    #[instrument(level = "debug", skip(self), err(level = "debug"))]
    pub async fn unlink(&self, path: &str) -> Result<(), Error> {
        record("unlink", async {
            let resolved = self.resolver.resolve(path)?;
            check_writable(&resolved)?;
            resolved.backend.remove_file(&resolved.relative_path).await
        })
        .await
        .at("unlink", path)
    }

    #[instrument(level = "debug", skip(self), err(level = "debug"))]
    pub async fn rmdir(&self, path: &str, options: DirOptions) -> Result<(), Error> {
        record("rmdir", async {
            let resolved = self.resolver.resolve(path)?;
            check_writable(&resolved)?;
            resolved
                .backend
                .remove_dir(&resolved.relative_path, options.recursive)
                .await
        })
        .await
        .at("rmdir", path)
    }

    #[instrument(level = "debug", skip(self), err(level = "debug"))]
    pub async fn create_read_stream(&self, path: &str) -> Result<ReadStream, Error> {
        record("read_stream", async {
            let resolved = self.resolver.resolve(path)?;
            check_capability(&resolved, Capabilities::READ_STREAM)?;
            resolved
                .backend
                .open_read_stream(&resolved.relative_path)
                .await
        })
        .await
        .at("open read stream", path)
    }

    #[instrument(level = "debug", skip(self), err(level = "debug"))]
    pub async fn create_write_stream(
        &self,
        path: &str,
        flags: WriteFlags,
    ) -> Result<WriteStream, Error> {
        record("write_stream", async {
            let resolved = self.resolver.resolve(path)?;
            check_writable(&resolved)?;
            check_capability(&resolved, Capabilities::WRITE_STREAM)?;
            resolved.ensure_parent().await?;

            resolved
                .backend
                .open_write_stream(&resolved.relative_path, flags)
                .await
        })
        .await
        .at("open write stream", path)
    }

    pub async fn ensure_parent_directories(&self, path: &str) -> Result<(), Error> {
        record("ensure_parents", async {
            let resolved = self.resolver.resolve(path)?;
            check_writable(&resolved)?;
            resolved.ensure_parent().await
        })
        .await
        .at("create parents of", path)
    }

    /// Copy a file, or with `recursive` a directory tree, from `src` to
    /// `dst`. The two may live on different backends.
    ///
    /// Directories are copied depth first, one entry at a time. A failure
    /// part way through leaves whatever was already copied in place.
    #[instrument(level = "debug", skip(self), err(level = "debug"))]
    pub async fn copy(&self, src: &str, dst: &str, options: DirOptions) -> Result<(), Error> {
        record("copy", async {
            let from = self.resolver.resolve(src)?;
            let to = self.resolver.resolve(dst)?;
            check_writable(&to)?;

            self.copy_resolved(from, to, options.recursive).await
        })
        .await
        .at("copy", format!("{src} -> {dst}"))
    }

    fn copy_resolved(
        &self,
        from: ResolvedPath,
        to: ResolvedPath,
        recursive: bool,
    ) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            let metadata = from
                .backend
                .stat(&from.relative_path)
                .await
                .at("stat", &from.virtual_path)?;

            let same_backend = from.same_backend(&to);
            if same_backend && path::is_within(&to.relative_path, &from.relative_path) {
                return Err(Error::invalid_argument(format!(
                    "cannot copy {} into itself",
                    from.virtual_path
                )));
            }

            match metadata.file_type {
                FileType::File => {
                    to.ensure_parent().await.at("create parents of", &to.virtual_path)?;

                    if same_backend && from.backend.capabilities().contains(Capabilities::COPY) {
                        return from
                            .backend
                            .copy_file(&from.relative_path, &to.relative_path)
                            .await;
                    }

                    event!(
                        Level::DEBUG,
                        from = %from.virtual_path,
                        to = %to.virtual_path,
                        "copying file contents between backends"
                    );
                    counter!(Metrics::FALLBACKS, "op" => "copy").increment(1);

                    let data = from
                        .backend
                        .read_file(&from.relative_path, ReadOptions::default())
                        .await
                        .at("read", &from.virtual_path)?;
                    to.backend
                        .write_file(&to.relative_path, &data, WriteFlags::OVERWRITE)
                        .await
                        .at("write", &to.virtual_path)
                }
                FileType::Directory => {
                    if !recursive {
                        return Err(Error::invalid_argument(format!(
                            "{} is a directory and the copy is not recursive",
                            from.virtual_path
                        )));
                    }

                    to.ensure_parent().await.at("create parents of", &to.virtual_path)?;
                    to.backend
                        .mkdir(&to.relative_path, true)
                        .await
                        .at("mkdir", &to.virtual_path)?;

                    let entries = from
                        .backend
                        .read_dir(&from.relative_path)
                        .await
                        .at("readdir", &from.virtual_path)?;

                    for entry in entries {
                        self.copy_resolved(from.child(&entry.name), to.child(&entry.name), true)
                            .await?;
                    }

                    Ok(())
                }
                FileType::Other => Err(Error::not_supported(format!(
                    "{} is neither a file nor a directory",
                    from.virtual_path
                ))),
            }
        })
    }

    /// Move `src` to `dst`. Within one backend that can rename natively
    /// this is a single call; otherwise it is a recursive copy followed by
    /// removing the source, and both paths exist until the removal lands.
    #[instrument(level = "debug", skip(self), err(level = "debug"))]
    pub async fn rename(&self, src: &str, dst: &str) -> Result<(), Error> {
        record("rename", async {
            let from = self.resolver.resolve(src)?;
            let to = self.resolver.resolve(dst)?;
            check_writable(&from)?;
            check_writable(&to)?;

            if from.relative_path == "/" {
                return Err(Error::invalid_argument(format!(
                    "cannot rename mount point {}",
                    from.virtual_path
                )));
            }

            let same_backend = from.same_backend(&to);
            if same_backend && from.relative_path == to.relative_path {
                return Ok(());
            }

            if same_backend && from.backend.capabilities().contains(Capabilities::RENAME) {
                to.ensure_parent().await?;
                return from
                    .backend
                    .rename(&from.relative_path, &to.relative_path)
                    .await;
            }

            event!(
                Level::DEBUG,
                from = %from.virtual_path,
                to = %to.virtual_path,
                "renaming through copy and delete"
            );
            counter!(Metrics::FALLBACKS, "op" => "rename").increment(1);

            let is_dir = from.backend.stat(&from.relative_path).await?.is_dir();
            if to.backend.exists(&to.relative_path).await? {
                let target_is_dir = to.backend.stat(&to.relative_path).await?.is_dir();
                if is_dir || target_is_dir {
                    return Err(Error::AlreadyExists(to.virtual_path.to_string()));
                }
            }

            let source = from.clone();
            self.copy_resolved(from, to, true).await?;

            remove(&source.backend, &source.relative_path, is_dir)
                .await
                .at("remove", &source.virtual_path)
        })
        .await
        .at("rename", format!("{src} -> {dst}"))
    }
}

async fn remove(
    backend: &BackendInstance,
    path: &Utf8Path,
    is_dir: bool,
) -> Result<(), Error> {
    if is_dir {
        backend.remove_dir(path, true).await
    } else {
        backend.remove_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{ErrorKind, MemoryFs};

    fn storage(backends: Vec<(&str, MemoryFs)>) -> StorageOps {
        let registry = Arc::new(MountRegistry::new());
        for (mount_point, backend) in backends {
            let id = registry.register_backend(backend).unwrap().id().to_string();
            registry.mount(mount_point, &id).unwrap();
        }

        StorageOps::new(registry)
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let storage = storage(vec![("/mem", MemoryFs::new("mem"))]);

        storage.write_file("/mem/a/b/c.txt", b"deep").await.unwrap();

        assert!(storage.stat("/mem/a/b").await.unwrap().is_dir());
        assert_eq!(storage.read_file("/mem/a/b/c.txt").await.unwrap(), b"deep");
    }

    #[tokio::test]
    async fn errors_keep_kind_and_gain_path() {
        let storage = storage(vec![("/mem", MemoryFs::new("mem"))]);

        let err = storage.read_file("/mem/missing.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("/mem/missing.txt"));

        let err = storage.read_file("/nowhere/file").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn read_only_mount_rejects_every_mutation() {
        let storage = storage(vec![
            ("/ro", MemoryFs::new("ro").read_only(true)),
            ("/rw", MemoryFs::new("rw")),
        ]);
        storage.write_file("/rw/f", b"x").await.unwrap();

        let failures = [
            storage.write_file("/ro/f", b"x").await,
            storage.mkdir("/ro/d", DirOptions::recursive()).await,
            storage.unlink("/ro/f").await,
            storage.rmdir("/ro/d", DirOptions::recursive()).await,
            storage.copy("/rw/f", "/ro/f", DirOptions::default()).await,
            storage.rename("/rw/f", "/ro/f").await,
            storage.rename("/ro/f", "/rw/g").await,
        ];

        for result in failures {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::PermissionDenied);
        }

        assert!(storage.readdir("/ro").await.unwrap().is_empty());
        assert!(storage.exists("/rw/f").await.unwrap());
    }

    #[tokio::test]
    async fn recursive_mkdir_is_idempotent() {
        let storage = storage(vec![("/mem", MemoryFs::new("mem"))]);

        storage.mkdir("/mem/a/b", DirOptions::recursive()).await.unwrap();
        storage.mkdir("/mem/a/b", DirOptions::recursive()).await.unwrap();

        let err = storage
            .mkdir("/mem/a/b", DirOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn copy_tree_across_backends() {
        let storage = storage(vec![("/a", MemoryFs::new("a")), ("/b", MemoryFs::new("b"))]);
        storage.write_file("/a/src/one.txt", b"1").await.unwrap();
        storage.write_file("/a/src/sub/two.txt", b"2").await.unwrap();
        storage.mkdir("/a/src/empty", DirOptions::default()).await.unwrap();

        storage
            .copy("/a/src", "/b/dst", DirOptions::recursive())
            .await
            .unwrap();

        assert_eq!(storage.read_file("/b/dst/one.txt").await.unwrap(), b"1");
        assert_eq!(storage.read_file("/b/dst/sub/two.txt").await.unwrap(), b"2");
        assert!(storage.stat("/b/dst/empty").await.unwrap().is_dir());
        assert!(storage.exists("/a/src/one.txt").await.unwrap());
    }

    #[tokio::test]
    async fn non_recursive_directory_copy_creates_nothing() {
        let storage = storage(vec![("/a", MemoryFs::new("a")), ("/b", MemoryFs::new("b"))]);
        storage.write_file("/a/src/one.txt", b"1").await.unwrap();

        let err = storage
            .copy("/a/src", "/b/nested/dst", DirOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(storage.readdir("/b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn copy_into_own_subtree_is_rejected() {
        let storage = storage(vec![("/a", MemoryFs::new("a"))]);
        storage.write_file("/a/src/one.txt", b"1").await.unwrap();

        let err = storage
            .copy("/a/src", "/a/src/inner", DirOptions::recursive())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(!storage.exists("/a/src/inner").await.unwrap());
    }

    #[tokio::test]
    async fn copy_falls_back_without_native_copy() {
        let storage = storage(vec![(
            "/mem",
            MemoryFs::new("mem").with_capabilities(Capabilities::empty()),
        )]);
        storage.write_file("/mem/a", b"payload").await.unwrap();

        storage
            .copy("/mem/a", "/mem/b", DirOptions::default())
            .await
            .unwrap();

        assert_eq!(storage.read_file("/mem/b").await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn rename_across_backends_matches_copy_and_unlink() {
        let storage = storage(vec![("/a", MemoryFs::new("a")), ("/b", MemoryFs::new("b"))]);
        storage.write_file("/a/f", b"moved").await.unwrap();
        storage.write_file("/a/g", b"moved").await.unwrap();

        storage.rename("/a/f", "/b/f").await.unwrap();

        storage.copy("/a/g", "/b/g", DirOptions::default()).await.unwrap();
        storage.unlink("/a/g").await.unwrap();

        for name in ["f", "g"] {
            assert!(!storage.exists(&format!("/a/{name}")).await.unwrap());
            assert_eq!(
                storage.read_file(&format!("/b/{name}")).await.unwrap(),
                b"moved"
            );
        }
    }

    #[tokio::test]
    async fn rename_synthesized_for_directories() {
        let storage = storage(vec![(
            "/mem",
            MemoryFs::new("mem").with_capabilities(Capabilities::COPY),
        )]);
        storage.write_file("/mem/dir/f", b"x").await.unwrap();

        storage.rename("/mem/dir", "/mem/moved").await.unwrap();

        assert!(!storage.exists("/mem/dir").await.unwrap());
        assert_eq!(storage.read_file("/mem/moved/f").await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn rename_onto_existing_target_matches_native() {
        for capabilities in [Capabilities::RENAME, Capabilities::empty()] {
            let storage = storage(vec![(
                "/m",
                MemoryFs::new("m").with_capabilities(capabilities),
            )]);
            storage.write_file("/m/src/x", b"new").await.unwrap();
            storage.write_file("/m/dst/x", b"old").await.unwrap();
            storage.write_file("/m/dst/keep", b"keep").await.unwrap();
            storage.write_file("/m/a", b"a").await.unwrap();
            storage.write_file("/m/b", b"b").await.unwrap();

            let err = storage.rename("/m/src", "/m/dst").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AlreadyExists, "{capabilities:?}");
            let err = storage.rename("/m/a", "/m/dst").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AlreadyExists, "{capabilities:?}");

            assert_eq!(storage.read_file("/m/src/x").await.unwrap(), b"new");
            assert_eq!(storage.read_file("/m/dst/x").await.unwrap(), b"old");
            assert!(storage.exists("/m/dst/keep").await.unwrap());
            assert!(storage.exists("/m/a").await.unwrap());

            storage.rename("/m/a", "/m/b").await.unwrap();
            assert!(!storage.exists("/m/a").await.unwrap());
            assert_eq!(storage.read_file("/m/b").await.unwrap(), b"a");
        }
    }

    #[tokio::test]
    async fn streams_require_capability() {
        let storage = storage(vec![(
            "/mem",
            MemoryFs::new("mem").with_capabilities(Capabilities::empty()),
        )]);
        storage.write_file("/mem/a", b"x").await.unwrap();

        let err = storage.create_read_stream("/mem/a").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotSupported);

        let err = storage
            .create_write_stream("/mem/b", WriteFlags::OVERWRITE)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }
}
