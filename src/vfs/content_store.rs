//! Content-addressed backend.
//!
//! File contents are uploaded to a remote blob service and fetched back by
//! the SHA-256 of their bytes. Blobs are immutable and nameless, so this
//! backend keeps its own [`Tree`] mapping paths to hashes, optionally
//! persisted through a [`StateStore`].
//!
//! The blob service contract is deliberately small:
//!
//! - `POST {endpoint}/blobs` with the raw bytes as body answers
//!   `{"hash": "<lowercase hex sha256>"}`.
//! - `GET {endpoint}/blobs/<hash>` answers the raw bytes, or 404.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use camino::Utf8Path;
use parking_lot::RwLock;
use reqwest::{Client, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tracing::{Level, event, instrument};
use url::Url;

use super::{
    Backend,
    Capabilities,
    DirEntry,
    Error,
    Metadata,
    ReadOptions,
    WriteFlags,
    error::{IntoHttpError, IntoJsonError},
    tree::{Payload, Tree},
};
use crate::state::StateStore;

/// Lowercase hex SHA-256 of `data`, the address a blob is stored under.
pub fn content_hash(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    hash: String,
}

/// HTTP client for the blob service.
#[derive(Clone)]
pub struct BlobClient {
    endpoint: Url,
    access_token: Option<String>,
    client: Client,
}

impl BlobClient {
    pub fn new(
        mut endpoint: Url,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        if endpoint.cannot_be_a_base() {
            return Err(Error::invalid_argument(format!(
                "blob endpoint {endpoint} cannot be used as a base URL"
            )));
        }

        // Url::join replaces the last segment unless the base ends in a slash.
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .into_http_error("failed to build HTTP client")?;

        Ok(Self {
            endpoint,
            access_token,
            client,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.endpoint
            .join(path)
            .map_err(|err| Error::invalid_argument(format!("bad blob URL {path}: {err}")))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Upload `data`, returning its hash once the service has confirmed it.
    #[instrument(skip_all, fields(size = data.len()), err)]
    pub async fn put(&self, data: &[u8]) -> Result<String, Error> {
        let expected = content_hash(data);

        let response = self
            .authorize(self.client.post(self.url("blobs")?))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await
            .into_http_error("failed to upload blob")?
            .error_for_status()
            .into_http_error("blob service rejected upload")?;

        let PutResponse { hash } = response
            .json::<PutResponse>()
            .await
            .into_http_error("failed to decode upload response")?;

        if hash != expected {
            return Err(Error::HashMismatch {
                expected,
                actual: hash,
            });
        }

        event!(Level::DEBUG, %hash, "uploaded blob");

        Ok(hash)
    }

    /// Download the blob stored under `hash`, checking that the bytes
    /// actually hash to it.
    #[instrument(skip(self), err)]
    pub async fn get(&self, hash: &str) -> Result<Vec<u8>, Error> {
        let response = self
            .authorize(self.client.get(self.url(&format!("blobs/{hash}"))?))
            .send()
            .await
            .into_http_error(format!("failed to fetch blob {hash}"))?
            .error_for_status()
            .into_http_error(format!("blob service refused blob {hash}"))?;

        let data = response
            .bytes()
            .await
            .into_http_error(format!("failed to read blob {hash}"))?
            .to_vec();

        let actual = content_hash(&data);
        if actual != hash {
            return Err(Error::HashMismatch {
                expected: hash.to_string(),
                actual,
            });
        }

        Ok(data)
    }
}

/// What the name index stores for each file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub hash: String,
    pub size: u64,
}

impl Payload for ContentRef {
    fn size(&self) -> u64 {
        self.size
    }
}

pub struct ContentStore {
    id: String,
    read_only: bool,
    client: BlobClient,
    index: RwLock<Tree<ContentRef>>,
    state: Option<Arc<dyn StateStore>>,
    /// Serializes index changes with their persistence.
    commits: tokio::sync::Mutex<()>,
}

impl ContentStore {
    pub fn new(id: impl Into<String>, client: BlobClient, read_only: bool) -> Self {
        Self {
            id: id.into(),
            read_only,
            client,
            index: RwLock::new(Tree::new()),
            state: None,
            commits: tokio::sync::Mutex::new(()),
        }
    }

    /// Keep the name index in `state`, loading whatever was saved there
    /// before.
    pub fn with_state(mut self, state: Arc<dyn StateStore>) -> Result<Self, Error> {
        if let Some(index) = state.get_as::<Tree<ContentRef>>(&self.index_key())? {
            event!(Level::DEBUG, backend = %self.id, "loaded content index");
            self.index = RwLock::new(index);
        }

        self.state = Some(state);
        Ok(self)
    }

    fn index_key(&self) -> String {
        format!("content_index.{}", self.id)
    }

    fn check_writable(&self) -> Result<(), Error> {
        if self.read_only {
            Err(Error::ReadOnly(self.id.clone()))
        } else {
            Ok(())
        }
    }

    /// Apply `change` to the index and persist the result. If persisting
    /// fails the index is restored to what it was before.
    async fn commit<R>(
        &self,
        change: impl FnOnce(&mut Tree<ContentRef>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let _commit = self.commits.lock().await;

        let Some(state) = &self.state else {
            return change(&mut *self.index.write());
        };

        let (previous, result, snapshot) = {
            let mut index = self.index.write();
            let previous = index.clone();
            let result = change(&mut *index)?;
            let snapshot = serde_json::to_value(&*index)
                .into_json_error(format!("failed to encode content index {}", self.id));
            (previous, result, snapshot)
        };

        let persisted = match snapshot {
            Ok(snapshot) => {
                let state = Arc::clone(state);
                let key = self.index_key();
                tokio::task::spawn_blocking(move || state.set(&key, snapshot))
                    .await
                    .unwrap_or_else(|e| {
                        if e.is_panic() {
                            std::panic::resume_unwind(e.into_panic());
                        }

                        panic!("task failed: {e}");
                    })
            }
            Err(err) => Err(err),
        };

        if let Err(err) = persisted {
            event!(Level::WARN, backend = %self.id, error = %err, "failed to save content index");
            *self.index.write() = previous;
            return Err(err);
        }

        Ok(result)
    }

    fn lookup(&self, path: &Utf8Path) -> Result<ContentRef, Error> {
        self.index.read().file(path).cloned()
    }
}

#[async_trait]
impl Backend for ContentStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::COPY
    }

    async fn exists(&self, path: &Utf8Path) -> Result<bool, Error> {
        Ok(self.index.read().exists(path))
    }

    async fn stat(&self, path: &Utf8Path) -> Result<Metadata, Error> {
        self.index.read().stat(path)
    }

    async fn read_file(&self, path: &Utf8Path, options: ReadOptions) -> Result<Vec<u8>, Error> {
        let ContentRef { hash, .. } = self.lookup(path)?;
        let data = self.client.get(&hash).await?;

        Ok(options.apply(data))
    }

    async fn write_file(
        &self,
        path: &Utf8Path,
        data: &[u8],
        flags: WriteFlags,
    ) -> Result<(), Error> {
        self.check_writable()?;

        let existing = self.index.read().check_write(path, flags)?.cloned();

        let content = match existing {
            Some(existing) if flags.contains(WriteFlags::APPEND) => {
                let mut content = self.client.get(&existing.hash).await?;
                content.extend_from_slice(data);
                content
            }
            Some(existing) if !flags.contains(WriteFlags::TRUNCATE) => {
                let mut content = self.client.get(&existing.hash).await?;
                let overlap = data.len().min(content.len());
                content[..overlap].copy_from_slice(&data[..overlap]);
                content.extend_from_slice(&data[overlap..]);
                content
            }
            _ => data.to_vec(),
        };

        let hash = self.client.put(&content).await?;
        let size = content.len() as u64;

        self.commit(|index| {
            // The upload happened without the lock held; re-check the target.
            index.check_write(path, flags)?;
            index.put_file(path, ContentRef { hash, size });
            Ok(())
        })
        .await
    }

    async fn mkdir(&self, path: &Utf8Path, recursive: bool) -> Result<(), Error> {
        self.check_writable()?;
        self.commit(|index| index.mkdir(path, recursive)).await
    }

    async fn read_dir(&self, path: &Utf8Path) -> Result<Vec<DirEntry>, Error> {
        self.index.read().list(path)
    }

    async fn remove_file(&self, path: &Utf8Path) -> Result<(), Error> {
        self.check_writable()?;
        self.commit(|index| index.remove_file(path).map(drop)).await
    }

    async fn remove_dir(&self, path: &Utf8Path, recursive: bool) -> Result<(), Error> {
        self.check_writable()?;
        self.commit(|index| index.remove_dir(path, recursive).map(drop))
            .await
    }

    async fn copy_file(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), Error> {
        self.check_writable()?;

        self.commit(|index| {
            let content = index.file(from)?.clone();
            index.check_write(to, WriteFlags::OVERWRITE)?;
            index.put_file(to, content);
            Ok(())
        })
        .await
    }
}
