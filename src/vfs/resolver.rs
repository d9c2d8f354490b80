use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{Level, event};

use super::{BackendInstance, Error, MountRegistry, path};

/// A virtual path mapped onto the backend that serves it.
#[derive(Clone)]
pub struct ResolvedPath {
    pub backend: Arc<BackendInstance>,
    /// The mount point that matched.
    pub mount_point: Utf8PathBuf,
    /// The normalized virtual path.
    pub virtual_path: Utf8PathBuf,
    /// The same path in the backend's own coordinates, always starting with
    /// `/`.
    pub relative_path: Utf8PathBuf,
}

impl ResolvedPath {
    /// The resolution of the entry `name` inside this directory. Children
    /// always stay on the same backend.
    pub fn child(&self, name: &str) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            mount_point: self.mount_point.clone(),
            virtual_path: path::join(&self.virtual_path, name),
            relative_path: path::join(&self.relative_path, name),
        }
    }

    pub fn same_backend(&self, other: &ResolvedPath) -> bool {
        Arc::ptr_eq(&self.backend, &other.backend)
    }

    /// Create this path's parent directory and any missing ancestors.
    pub async fn ensure_parent(&self) -> Result<(), Error> {
        let Some(parent) = path::parent(&self.relative_path) else {
            return Ok(());
        };

        if self.backend.exists(&parent).await? {
            return Ok(());
        }

        event!(
            Level::DEBUG,
            backend = %self.backend.id(),
            %parent,
            "creating missing parent directories"
        );
        self.backend.mkdir(&parent, true).await
    }
}

impl std::fmt::Debug for ResolvedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedPath")
            .field("backend", &self.backend.id())
            .field("mount_point", &self.mount_point)
            .field("virtual_path", &self.virtual_path)
            .field("relative_path", &self.relative_path)
            .finish()
    }
}

/// Maps virtual paths to backends by longest mount-point match.
#[derive(Clone)]
pub struct PathResolver {
    registry: Arc<MountRegistry>,
}

impl PathResolver {
    pub fn new(registry: Arc<MountRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MountRegistry> {
        &self.registry
    }

    pub fn resolve(&self, virtual_path: &str) -> Result<ResolvedPath, Error> {
        let virtual_path = path::normalize(virtual_path)?;

        let Some((mount_point, backend)) = self.registry.longest_match(&virtual_path) else {
            return Err(Error::NoMount(virtual_path));
        };

        let relative_path = relative_to(&virtual_path, &mount_point);

        Ok(ResolvedPath {
            backend,
            mount_point,
            virtual_path,
            relative_path,
        })
    }

    /// Create the parent directory of `virtual_path`, and any of its
    /// ancestors, on the backend that owns it.
    pub async fn ensure_parent_directories(&self, virtual_path: &str) -> Result<(), Error> {
        self.resolve(virtual_path)?.ensure_parent().await
    }
}

fn relative_to(virtual_path: &Utf8Path, mount_point: &Utf8Path) -> Utf8PathBuf {
    if mount_point == "/" {
        return virtual_path.to_owned();
    }

    match &virtual_path.as_str()[mount_point.as_str().len()..] {
        "" => Utf8PathBuf::from("/"),
        rest => Utf8PathBuf::from(rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{ErrorKind, MemoryFs};

    fn resolver(mounts: &[(&str, &str)]) -> PathResolver {
        let registry = Arc::new(MountRegistry::new());
        for (mount_point, id) in mounts {
            if registry.get_backend(id).is_none() {
                registry.register_backend(MemoryFs::new(*id)).unwrap();
            }
            registry.mount(mount_point, id).unwrap();
        }

        PathResolver::new(registry)
    }

    #[test]
    fn nested_mounts_pick_the_longest_prefix() {
        let resolver = resolver(&[("/a", "outer"), ("/a/b", "inner")]);

        let resolved = resolver.resolve("/a/b/c").unwrap();
        assert_eq!(resolved.backend.id(), "inner");
        assert_eq!(resolved.relative_path, "/c");

        let resolved = resolver.resolve("/a/x").unwrap();
        assert_eq!(resolved.backend.id(), "outer");
        assert_eq!(resolved.relative_path, "/x");
    }

    #[test]
    fn prefixes_match_whole_segments() {
        let resolver = resolver(&[("/local", "local")]);

        let err = resolver.resolve("/local2/file").unwrap_err();
        assert!(matches!(err, Error::NoMount(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn mount_point_itself_is_backend_root() {
        let resolver = resolver(&[("/local", "local")]);

        let resolved = resolver.resolve("/local/").unwrap();
        assert_eq!(resolved.relative_path, "/");
        assert_eq!(resolved.virtual_path, "/local");
    }

    #[test]
    fn root_mount_catches_everything() {
        let resolver = resolver(&[("/", "root"), ("/local", "local")]);

        let resolved = resolver.resolve("/elsewhere/./x/../y").unwrap();
        assert_eq!(resolved.backend.id(), "root");
        assert_eq!(resolved.relative_path, "/elsewhere/y");
    }

    #[test]
    fn unmount_is_seen_by_next_resolve() {
        let resolver = resolver(&[("/", "root"), ("/local", "local")]);
        resolver.registry().unmount("/local").unwrap();

        assert_eq!(resolver.resolve("/local/a").unwrap().backend.id(), "root");
    }

    #[tokio::test]
    async fn ensure_parent_directories_creates_ancestors() {
        let resolver = resolver(&[("/mem", "mem")]);

        resolver
            .ensure_parent_directories("/mem/a/b/file.txt")
            .await
            .unwrap();

        let backend = resolver.registry().get_backend("mem").unwrap();
        assert!(backend.stat(Utf8Path::new("/a/b")).await.unwrap().is_dir());
        assert!(!backend.exists(Utf8Path::new("/a/b/file.txt")).await.unwrap());
    }
}
