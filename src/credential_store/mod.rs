//! Persisted login credentials keyed by `node#{id}`.
//!
//! Entries are written when a node is created or a script negotiates new
//! access, and removed once the node is confirmed destroyed. Each operation
//! touches a single key, so implementations only need per-entry atomicity.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::domain::LoginCredentials;

const NODE_KEY_PREFIX: &str = "node#";
const TEMP_SUFFIX: &str = ".tmp";

/// Returns the store key for a node id.
#[must_use]
pub fn credential_key(node_id: &str) -> String {
    format!("{NODE_KEY_PREFIX}{node_id}")
}

/// Returns the node id encoded in a store key, if it is a node key.
#[must_use]
pub fn node_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(NODE_KEY_PREFIX)
}

/// Errors raised by credential stores.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialStoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when stored content is not valid JSON.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the store path has no file name.
    #[error("credential store path {path} is missing a file name")]
    InvalidPath {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// Raised when a store operation was cancelled or panicked.
    #[error("credential store operation did not complete: {message}")]
    Interrupted {
        /// Join failure reported by the runtime.
        message: String,
    },
}

/// String-keyed credential map shared by every orchestrator operation.
pub trait CredentialStore: Send + Sync {
    /// Returns the credentials stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError`] when the backing storage fails.
    fn get(&self, key: &str) -> Result<Option<LoginCredentials>, CredentialStoreError>;

    /// Stores `credentials` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError`] when the backing storage fails.
    fn put(&self, key: &str, credentials: &LoginCredentials) -> Result<(), CredentialStoreError>;

    /// Removes `key`, returning what was stored.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError`] when the backing storage fails.
    fn remove(&self, key: &str) -> Result<Option<LoginCredentials>, CredentialStoreError>;

    /// Lists every key.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError`] when the backing storage fails.
    fn keys(&self) -> Result<Vec<String>, CredentialStoreError>;
}

/// Runs `operation` against `store` on the blocking thread pool, so file
/// backed stores never stall runtime workers.
async fn off_runtime<T, F>(
    store: &Arc<dyn CredentialStore>,
    operation: F,
) -> Result<T, CredentialStoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn CredentialStore) -> Result<T, CredentialStoreError> + Send + 'static,
{
    let handle = Arc::clone(store);
    tokio::task::spawn_blocking(move || operation(handle.as_ref()))
        .await
        .map_err(|err| CredentialStoreError::Interrupted {
            message: err.to_string(),
        })?
}

/// Async [`CredentialStore::get`].
///
/// # Errors
///
/// Returns the store's error, or [`CredentialStoreError::Interrupted`].
pub async fn load(
    store: &Arc<dyn CredentialStore>,
    key: String,
) -> Result<Option<LoginCredentials>, CredentialStoreError> {
    off_runtime(store, move |inner| inner.get(&key)).await
}

/// Async [`CredentialStore::put`].
///
/// # Errors
///
/// Returns the store's error, or [`CredentialStoreError::Interrupted`].
pub async fn save(
    store: &Arc<dyn CredentialStore>,
    key: String,
    credentials: LoginCredentials,
) -> Result<(), CredentialStoreError> {
    off_runtime(store, move |inner| inner.put(&key, &credentials)).await
}

/// Async [`CredentialStore::remove`].
///
/// # Errors
///
/// Returns the store's error, or [`CredentialStoreError::Interrupted`].
pub async fn discard(
    store: &Arc<dyn CredentialStore>,
    key: String,
) -> Result<Option<LoginCredentials>, CredentialStoreError> {
    off_runtime(store, move |inner| inner.remove(&key)).await
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    entries: Mutex<BTreeMap<String, LoginCredentials>>,
}

impl InMemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, LoginCredentials>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<LoginCredentials>, CredentialStoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn put(&self, key: &str, credentials: &LoginCredentials) -> Result<(), CredentialStoreError> {
        self.entries().insert(key.to_owned(), credentials.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<Option<LoginCredentials>, CredentialStoreError> {
        Ok(self.entries().remove(key))
    }

    fn keys(&self) -> Result<Vec<String>, CredentialStoreError> {
        Ok(self.entries().keys().cloned().collect())
    }
}

/// Store persisted as a JSON object in a single file.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// original, so readers never observe a half-written document.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: Utf8PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Creates a store backed by `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn update<T>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, LoginCredentials>) -> T,
    ) -> Result<T, CredentialStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = read_entries(&self.path)?;
        let outcome = change(&mut entries);
        write_entries(&self.path, &entries)?;
        Ok(outcome)
    }

    fn snapshot(&self) -> Result<BTreeMap<String, LoginCredentials>, CredentialStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        read_entries(&self.path)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: &str) -> Result<Option<LoginCredentials>, CredentialStoreError> {
        Ok(self.snapshot()?.remove(key))
    }

    fn put(&self, key: &str, credentials: &LoginCredentials) -> Result<(), CredentialStoreError> {
        self.update(|entries| {
            entries.insert(key.to_owned(), credentials.clone());
        })
    }

    fn remove(&self, key: &str) -> Result<Option<LoginCredentials>, CredentialStoreError> {
        self.update(|entries| entries.remove(key))
    }

    fn keys(&self) -> Result<Vec<String>, CredentialStoreError> {
        Ok(self.snapshot()?.into_keys().collect())
    }
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), CredentialStoreError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let parent = if parent.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        parent
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| CredentialStoreError::InvalidPath {
            path: path.to_path_buf(),
        })?;
    Ok((parent, file_name))
}

fn read_entries(
    path: &Utf8Path,
) -> Result<BTreeMap<String, LoginCredentials>, CredentialStoreError> {
    let (parent, file_name) = split_path(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => {
            return Err(CredentialStoreError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            });
        }
    };

    let contents = match dir.read_to_string(file_name) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => {
            return Err(CredentialStoreError::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            });
        }
    };

    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    serde_json::from_str(&contents).map_err(|err| CredentialStoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn write_entries(
    path: &Utf8Path,
    entries: &BTreeMap<String, LoginCredentials>,
) -> Result<(), CredentialStoreError> {
    let (parent, file_name) = split_path(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| {
        CredentialStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| {
        CredentialStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }
    })?;

    let rendered =
        serde_json::to_string_pretty(entries).map_err(|err| CredentialStoreError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

    let temp_name = format!("{file_name}{TEMP_SUFFIX}");
    dir.write(&temp_name, rendered)
        .map_err(|err| CredentialStoreError::Io {
            path: parent.join(&temp_name),
            message: err.to_string(),
        })?;
    dir.rename(&temp_name, &dir, file_name)
        .map_err(|err| CredentialStoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

#[cfg(test)]
mod tests;
