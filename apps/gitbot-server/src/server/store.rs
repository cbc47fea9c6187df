use std::{path::Path, sync::Arc};

use gitbot_core::UserId;
use object_store::{
    local::LocalFileSystem, memory::InMemory, path::Path as ObjectPath, GetOptions, ObjectStore,
    PutOptions, PutPayload,
};
use serde::{de::DeserializeOwned, Serialize};

use super::metrics::record_store_corrupt_record;

/// Named records kept in the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Owners,
    Blocked,
    UserIssues(UserId),
}

impl StoreKey {
    fn path(&self) -> ObjectPath {
        match self {
            Self::Owners => ObjectPath::from("admin/owners.json"),
            Self::Blocked => ObjectPath::from("admin/blocked.json"),
            // One percent-encoded segment, whatever the id contains.
            Self::UserIssues(user_id) => {
                ObjectPath::from("users").join(format!("user-{user_id}.json"))
            }
        }
    }

    /// Bounded label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Owners => "owners",
            Self::Blocked => "blocked",
            Self::UserIssues(_) => "user_issues",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] object_store::Error),
    #[error("record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Whole-value JSON records over an object store.
///
/// The local filesystem backend stages every put in a temporary file and
/// renames it into place, so a concurrent `load` sees either the old or the
/// new record, never a torn one.
#[derive(Clone)]
pub struct KvStore {
    inner: Arc<dyn ObjectStore>,
}

impl KvStore {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
        }
    }

    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or opened.
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(root)?;
        let local = LocalFileSystem::new_with_prefix(root)?;
        Ok(Self {
            inner: Arc::new(local),
        })
    }

    /// Load a record. Missing and malformed records both come back as `None`;
    /// the latter is logged and counted.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the backend cannot be read.
    pub async fn load<T: DeserializeOwned>(&self, key: &StoreKey) -> Result<Option<T>, StoreError> {
        let path = key.path();
        let payload = match self.inner.get_opts(&path, GetOptions::default()).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        match serde_json::from_slice(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                record_store_corrupt_record(key.kind());
                tracing::warn!(
                    event = "store.load",
                    outcome = "corrupt",
                    key = %path,
                    error = %error
                );
                Ok(None)
            }
        }
    }

    /// Overwrite a record with `value`.
    ///
    /// # Errors
    /// Returns [`StoreError`] if encoding or the write fails. The previous
    /// record is left in place on failure.
    pub async fn save<T: Serialize>(&self, key: &StoreKey, value: &T) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(value)?;
        self.inner
            .put_opts(&key.path(), PutPayload::from(payload), PutOptions::default())
            .await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn put_raw(&self, key: &StoreKey, payload: &'static [u8]) {
        self.inner
            .put_opts(
                &key.path(),
                PutPayload::from_static(payload),
                PutOptions::default(),
            )
            .await
            .unwrap();
    }
}
