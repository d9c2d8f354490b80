//! The set of known backends and where each one is mounted.

use std::{collections::BTreeMap, sync::Arc};

use ahash::HashMap;
use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{Level, event};

use super::{BackendInstance, Error, path};
use crate::state::StateStore;

/// State key the mount table is saved under.
pub const MOUNTS_KEY: &str = "mounts";

/// One row of the mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountEntry {
    pub path: Utf8PathBuf,
    pub backend_id: String,
}

/// Owns every registered backend and the mount table pointing into them.
///
/// Changes are visible to the next resolution immediately. The locks only
/// guard the maps themselves; nothing here is held across I/O.
#[derive(Default)]
pub struct MountRegistry {
    backends: RwLock<HashMap<String, Arc<BackendInstance>>>,
    mounts: RwLock<BTreeMap<Utf8PathBuf, String>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own id. Ids are unique.
    pub fn register_backend(
        &self,
        backend: impl Into<BackendInstance>,
    ) -> Result<Arc<BackendInstance>, Error> {
        let backend = Arc::new(backend.into());
        let id = backend.id().to_string();

        let mut backends = self.backends.write();
        if backends.contains_key(&id) {
            return Err(Error::AlreadyExists(format!("backend `{id}`")));
        }

        event!(
            Level::INFO,
            backend = %id,
            read_only = backend.is_read_only(),
            "registered backend"
        );
        backends.insert(id, Arc::clone(&backend));

        Ok(backend)
    }

    pub fn get_backend(&self, id: &str) -> Option<Arc<BackendInstance>> {
        self.backends.read().get(id).cloned()
    }

    /// Registered backend ids, sorted.
    pub fn backend_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.backends.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Mount `backend_id` at `mount_point`, returning the normalized mount
    /// point.
    pub fn mount(&self, mount_point: &str, backend_id: &str) -> Result<Utf8PathBuf, Error> {
        if !mount_point.starts_with('/') {
            return Err(Error::invalid_argument(format!(
                "mount point must be absolute: {mount_point}"
            )));
        }

        let mount_point = path::normalize(mount_point)?;

        if !self.backends.read().contains_key(backend_id) {
            return Err(Error::UnknownBackend(backend_id.to_string()));
        }

        let mut mounts = self.mounts.write();
        if mounts.contains_key(&mount_point) {
            return Err(Error::AlreadyExists(format!("mount point {mount_point}")));
        }

        event!(Level::INFO, %mount_point, backend = %backend_id, "mounted backend");
        mounts.insert(mount_point.clone(), backend_id.to_string());

        Ok(mount_point)
    }

    pub fn unmount(&self, mount_point: &str) -> Result<(), Error> {
        let mount_point = path::normalize(mount_point)?;

        match self.mounts.write().remove(&mount_point) {
            Some(backend_id) => {
                event!(Level::INFO, %mount_point, backend = %backend_id, "unmounted backend");
                Ok(())
            }
            None => Err(Error::NoMount(mount_point)),
        }
    }

    /// The mount table, ordered by mount point.
    pub fn mounts(&self) -> Vec<MountEntry> {
        self.mounts
            .read()
            .iter()
            .map(|(path, backend_id)| MountEntry {
                path: path.clone(),
                backend_id: backend_id.clone(),
            })
            .collect()
    }

    /// The most specific mount containing `path`, along with its backend.
    /// `path` must already be normalized.
    pub fn longest_match(
        &self,
        path: &Utf8Path,
    ) -> Option<(Utf8PathBuf, Arc<BackendInstance>)> {
        let (mount_point, backend_id) = {
            let mounts = self.mounts.read();
            let (mount_point, backend_id) = mounts
                .iter()
                .filter(|(mount_point, _)| path::is_within(path, mount_point))
                .max_by_key(|(mount_point, _)| path::depth(mount_point))?;
            (mount_point.clone(), backend_id.clone())
        };

        let backend = self.get_backend(&backend_id)?;
        Some((mount_point, backend))
    }

    /// Whether any mount table has been saved to `state`.
    pub fn has_mount_config(state: &dyn StateStore) -> bool {
        state.get(MOUNTS_KEY).is_some()
    }

    /// Mount every record saved in `state`, in order. Records naming an
    /// unknown backend or clashing with an existing mount are skipped with a
    /// warning. Returns how many mounts were made.
    pub fn load_mount_config(&self, state: &dyn StateStore) -> Result<usize, Error> {
        let entries: Vec<MountEntry> = state.get_or(MOUNTS_KEY, Vec::new())?;
        let mut mounted = 0;

        for entry in entries {
            match self.mount(entry.path.as_str(), &entry.backend_id) {
                Ok(_) => mounted += 1,
                Err(err) => event!(
                    Level::WARN,
                    path = %entry.path,
                    backend = %entry.backend_id,
                    error = %err,
                    "skipping saved mount"
                ),
            }
        }

        Ok(mounted)
    }

    pub fn save_mount_config(&self, state: &dyn StateStore) -> Result<(), Error> {
        state.put(MOUNTS_KEY, &self.mounts())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        state::MemoryStore,
        vfs::{ErrorKind, MemoryFs},
    };

    fn registry() -> MountRegistry {
        let registry = MountRegistry::new();
        registry.register_backend(MemoryFs::new("a")).unwrap();
        registry.register_backend(MemoryFs::new("b")).unwrap();
        registry
    }

    #[test]
    fn duplicate_backends_are_rejected() {
        let registry = registry();

        let err = registry.register_backend(MemoryFs::new("a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(registry.backend_ids(), ["a", "b"]);
    }

    #[test]
    fn mount_validates_and_normalizes() {
        let registry = registry();

        assert_eq!(registry.mount("/data/", "a").unwrap(), "/data");

        let err = registry.mount("/data", "b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = registry.mount("/other", "missing").unwrap_err();
        assert!(matches!(err, Error::UnknownBackend(_)));

        let err = registry.mount("relative", "a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn unmount_removes_entry() {
        let registry = registry();
        registry.mount("/data", "a").unwrap();

        registry.unmount("/data").unwrap();
        assert!(registry.mounts().is_empty());
        assert_eq!(
            registry.unmount("/data").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn longest_match_prefers_deepest_mount() {
        let registry = registry();
        registry.mount("/", "a").unwrap();
        registry.mount("/a/b", "b").unwrap();

        let (mount_point, backend) = registry.longest_match(Utf8Path::new("/a/b/c")).unwrap();
        assert_eq!(mount_point, "/a/b");
        assert_eq!(backend.id(), "b");

        let (mount_point, backend) = registry.longest_match(Utf8Path::new("/a/x")).unwrap();
        assert_eq!(mount_point, "/");
        assert_eq!(backend.id(), "a");
    }

    #[test]
    fn unknown_backends_are_skipped_on_load() {
        let registry = registry();
        let state = MemoryStore::new();
        state
            .set(
                MOUNTS_KEY,
                json!([
                    {"path": "/gone", "backendId": "nonexistent"},
                    {"path": "/data", "backendId": "a"},
                ]),
            )
            .unwrap();

        assert_eq!(registry.load_mount_config(&state).unwrap(), 1);
        assert_eq!(
            registry.mounts(),
            [MountEntry {
                path: "/data".into(),
                backend_id: "a".into()
            }]
        );
    }

    #[test]
    fn mount_table_round_trips() {
        let state = MemoryStore::new();

        let registry = registry();
        assert!(!MountRegistry::has_mount_config(&state));
        registry.mount("/one", "a").unwrap();
        registry.mount("/two", "b").unwrap();
        registry.save_mount_config(&state).unwrap();

        assert_eq!(
            state.get(MOUNTS_KEY),
            Some(json!([
                {"path": "/one", "backendId": "a"},
                {"path": "/two", "backendId": "b"},
            ]))
        );

        let restored = self::registry();
        assert_eq!(restored.load_mount_config(&state).unwrap(), 2);
        assert_eq!(restored.mounts(), registry.mounts());
    }
}
