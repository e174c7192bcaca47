use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use santa_core::{KeyValueStore, StoreError};
use tracing::{debug, warn};
use uuid::Uuid;

// Clones share the same entries.
#[derive(Clone, Debug)]
pub struct FileStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(%err, path = %path.display(), "ignoring corrupt store file");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!(%err, path = %path.display(), "store file unreadable");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), keys = entries.len(), "opened store");
        Self {
            inner: Arc::new(Mutex::new(Inner { path, entries })),
        }
    }

    pub fn path(&self) -> PathBuf {
        match self.inner.lock() {
            Ok(inner) => inner.path.clone(),
            Err(poisoned) => poisoned.into_inner().path.clone(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }
}

impl Inner {
    fn flush(&self) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&self.entries)?;
        let tmp = temp_path(&self.path);
        std::fs::write(&tmp, json)?;
        if let Err(err) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4()))
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.entries.insert(key.to_string(), value.to_string());
        inner.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.entries.remove(key).is_some() {
            inner.flush()?;
        }
        Ok(())
    }
}
