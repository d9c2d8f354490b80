//! Startup wiring: build backends from configuration, mount them, and hand
//! out the resulting [`StorageOps`].

use std::sync::Arc;

use tracing::{Level, event, instrument};

use crate::{
    config::{Config, ContentConfig, LocalConfig},
    state::{JsonFileStore, StateStore},
    vfs::{BlobClient, ContentStore, Error, LocalDir, MountRegistry, StorageOps},
};

/// Backend id of the local directory.
pub const LOCAL_BACKEND_ID: &str = "local";
/// Backend id of the content-addressed store.
pub const CONTENT_BACKEND_ID: &str = "content";

/// The storage layer of a running process. Construct one at startup and
/// pass it, or its [`StorageOps`], to whatever needs storage.
pub struct StorageService {
    state: Arc<dyn StateStore>,
    storage: StorageOps,
}

impl StorageService {
    /// Start with the state file named in `config`.
    pub fn start(config: &Config) -> Result<Self, Error> {
        let state = Arc::new(JsonFileStore::open(config.state.path.clone())?);
        Self::start_with_state(config, state)
    }

    /// Build and register every configured backend, then mount them.
    ///
    /// A backend that fails to build is logged and left out rather than
    /// failing startup. If `state` holds a saved mount table it is restored,
    /// and any registered backend the table never mentions is mounted at its
    /// configured mount point if that is still free. Otherwise each
    /// registered backend is mounted at its configured mount point. Either
    /// way a changed table is saved.
    #[instrument(skip_all, err)]
    pub fn start_with_state(config: &Config, state: Arc<dyn StateStore>) -> Result<Self, Error> {
        let registry = Arc::new(MountRegistry::new());
        let mut defaults = Vec::new();

        match local_backend(&config.local) {
            Ok(local_dir) => {
                registry.register_backend(local_dir)?;
                defaults.push((config.local.mount_point.as_str(), LOCAL_BACKEND_ID));
            }
            Err(err) => event!(
                Level::WARN,
                base_dir = %config.local.base_dir,
                error = %err,
                "local backend unavailable, skipping"
            ),
        }

        match content_backend(&config.content, &state) {
            Ok(Some(content_store)) => {
                registry.register_backend(content_store)?;
                defaults.push((config.content.mount_point.as_str(), CONTENT_BACKEND_ID));
            }
            Ok(None) => event!(
                Level::WARN,
                "no content endpoint configured, skipping content backend"
            ),
            Err(err) => event!(
                Level::WARN,
                error = %err,
                "content backend unavailable, skipping"
            ),
        }

        if MountRegistry::has_mount_config(&*state) {
            let mounted = registry.load_mount_config(&*state)?;
            event!(Level::INFO, mounted, "restored saved mounts");

            if mount_unlisted_backends(&registry, defaults) {
                registry.save_mount_config(&*state)?;
            }
        } else {
            for (mount_point, backend_id) in defaults {
                registry.mount(mount_point, backend_id)?;
            }
            registry.save_mount_config(&*state)?;
        }

        Ok(Self {
            state,
            storage: StorageOps::new(registry),
        })
    }

    pub fn storage(&self) -> &StorageOps {
        &self.storage
    }

    pub fn registry(&self) -> &Arc<MountRegistry> {
        self.storage.registry()
    }

    /// Persist the current mount table.
    pub fn save_mounts(&self) -> Result<(), Error> {
        self.registry().save_mount_config(&*self.state)
    }
}

/// Mount backends that the saved table never mentions at their default
/// mount point, provided nothing else holds it. Returns whether the table
/// changed.
fn mount_unlisted_backends(registry: &MountRegistry, defaults: Vec<(&str, &str)>) -> bool {
    let listed = registry.mounts();
    let mut changed = false;

    for (mount_point, backend_id) in defaults {
        if listed.iter().any(|entry| entry.backend_id == backend_id) {
            continue;
        }

        match registry.mount(mount_point, backend_id) {
            Ok(path) => {
                event!(Level::INFO, %path, backend_id, "mounted newly available backend");
                changed = true;
            }
            Err(err) => event!(
                Level::WARN,
                mount_point,
                backend_id,
                error = %err,
                "default mount point unavailable, leaving backend unmounted"
            ),
        }
    }

    changed
}

fn local_backend(config: &LocalConfig) -> Result<LocalDir, Error> {
    LocalDir::new(
        LOCAL_BACKEND_ID,
        config.base_dir.clone(),
        config.auto_create,
        config.read_only,
    )
}

fn content_backend(
    config: &ContentConfig,
    state: &Arc<dyn StateStore>,
) -> Result<Option<ContentStore>, Error> {
    let Some(endpoint) = config.endpoint.clone() else {
        return Ok(None);
    };

    let client = BlobClient::new(endpoint, config.access_token.clone(), config.timeout)?;
    let content_store = ContentStore::new(CONTENT_BACKEND_ID, client, config.read_only)
        .with_state(Arc::clone(state))?;

    Ok(Some(content_store))
}
