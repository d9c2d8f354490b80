//! Small persisted key/value state.
//!
//! The storage layer keeps the little it needs to survive a restart (the
//! mount table, the content store's name index) in a [`StateStore`]. Values
//! are JSON so callers can store whatever serde can describe.

use std::{collections::BTreeMap, io::Write as _};

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{Level, event};

use crate::vfs::{
    Error,
    error::{IntoIoError, IntoJsonError},
};

pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<(), Error>;
}

impl dyn StateStore + '_ {
    /// Read `key` as a `T`, falling back to `default` when it is missing.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, Error> {
        match self.get(key) {
            Some(value) => serde_json::from_value(value)
                .into_json_error(format!("failed to decode state key {key}")),
            None => Ok(default),
        }
    }

    /// Read `key` as a `T` if it is present.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        self.get(key)
            .map(|value| {
                serde_json::from_value(value)
                    .into_json_error(format!("failed to decode state key {key}"))
            })
            .transpose()
    }

    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), Error> {
        let value = serde_json::to_value(value)
            .into_json_error(format!("failed to encode state key {key}"))?;
        self.set(key, value)
    }
}

/// A store that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), Error> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// A store kept as a single JSON object in a file.
///
/// Every `set` rewrites the whole file through a temporary sibling and a
/// rename, so a crash never leaves a half-written state file behind.
pub struct JsonFileStore {
    path: Utf8PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, Error> {
        let path = path.into();

        let values = match std::fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)
                .into_json_error(format!("failed to parse state file {path}"))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                event!(Level::DEBUG, %path, "no state file yet, starting empty");
                BTreeMap::new()
            }
            Err(err) => return Err(err.into_io_error(format!("failed to read state file {path}"))),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> Result<(), Error> {
        let data = serde_json::to_vec_pretty(values)
            .into_json_error("failed to encode state")?;

        let tmp_path = Utf8PathBuf::from(format!("{}.tmp", self.path));

        let mut file = std::fs::File::create(&tmp_path)
            .into_io_error(format!("failed to create {tmp_path}"))?;
        file.write_all(&data)
            .into_io_error(format!("failed to write {tmp_path}"))?;
        file.sync_all()
            .into_io_error(format!("failed to sync {tmp_path}"))?;
        drop(file);

        std::fs::rename(&tmp_path, &self.path)
            .into_io_error(format!("failed to replace state file {}", self.path))
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), Error> {
        let mut values = self.values.lock();
        let previous = values.insert(key.to_string(), value);

        if let Err(err) = self.persist(&values) {
            match previous {
                Some(previous) => values.insert(key.to_string(), previous),
                None => values.remove(key),
            };
            return Err(err);
        }

        Ok(())
    }
}
