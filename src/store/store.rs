use std::{
    collections::HashMap,
    future::Future,
    io::ErrorKind,
    ops::Deref,
    path::PathBuf,
    sync::Mutex,
};

use anyhow::Result;
use fs4::tokio::AsyncFileExt;
use serde_json::Value;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
    sync::broadcast,
};
use tracing::{debug, warn};

use super::{StoreChange, StoreKey};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Interface for abstracting the persisted key-value state.
///
/// The contract is deliberately small: async whole-value get/set per key with
/// last-writer-wins ordering and read-after-write consistency for the writer,
/// plus a broadcast of change notifications. The core depends only on this,
/// never on the storage medium behind it.
pub trait StateStore: Send + Sync + 'static {
    fn get(&self, key: StoreKey) -> impl Future<Output = Result<Option<Value>>> + Send;

    fn set(&self, key: StoreKey, value: Value) -> impl Future<Output = Result<()>> + Send;

    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

impl<T: Deref + Send + Sync + 'static> StateStore for T
where
    T::Target: StateStore,
{
    fn get(&self, key: StoreKey) -> impl Future<Output = Result<Option<Value>>> + Send {
        self.deref().get(key)
    }

    fn set(&self, key: StoreKey, value: Value) -> impl Future<Output = Result<()>> + Send {
        self.deref().set(key, value)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.deref().subscribe()
    }
}

/// File-backed realization of [StateStore]: one JSON document per key under
/// the application directory. File locks serialize writers across processes.
pub struct FileStore {
    dir: PathBuf,
    changes: broadcast::Sender<StoreChange>,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self { dir, changes })
    }

    async fn overwrite(file: &mut File, value: &Value) -> Result<()> {
        file.set_len(0).await?;
        let buffer = serde_json::to_vec(value)?;
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }
}

impl StateStore for FileStore {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>> {
        let path = self.dir.join(key.file_name());
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        file.lock_shared()?;
        let mut contents = String::new();
        let read_result = file.read_to_string(&mut contents).await;
        file.unlock_async().await?;
        read_result?;

        if contents.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(&contents) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // Might happen after a shutdown cut a write short.
                warn!("Corrupted value under {key} in {path:?}: {e}");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: StoreKey, value: Value) -> Result<()> {
        let path = self.dir.join(key.file_name());
        debug!("Writing {key} to {path:?}");
        let mut file = File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(&path)
            .await?;

        // Semi-safe acquire-release for the file
        file.lock_exclusive()?;
        let result = Self::overwrite(&mut file, &value).await;
        file.unlock_async().await?;
        result?;

        let _ = self.changes.send(StoreChange { key, value });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// In-memory realization of [StateStore] with the same observable semantics.
/// Backs short-lived surfaces and tests.
pub struct MemoryStore {
    values: Mutex<HashMap<StoreKey, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: Mutex::new(HashMap::new()),
            changes,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStore {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>> {
        let values = self.values.lock().expect("state lock poisoned");
        Ok(values.get(&key).cloned())
    }

    async fn set(&self, key: StoreKey, value: Value) -> Result<()> {
        self.values
            .lock()
            .expect("state lock poisoned")
            .insert(key, value.clone());
        let _ = self.changes.send(StoreChange { key, value });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
