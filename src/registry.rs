//! Durable instance registry.
//!
//! Each managed server owns `<root>/servers/<name>/`; its record lives at
//! `fuji.json` inside that directory. Records are rewritten whole via a
//! temp-file-then-rename so a crash mid-write never corrupts existing
//! state. There is no cross-invocation cache; every CLI run reloads from
//! disk.

use std::{collections::BTreeMap, io::ErrorKind, path::PathBuf};

use tokio::fs;
use tracing::debug;

use crate::{config::FujiConfig, error::RegistryError, instance::ServerInstance};

const RECORD_FILE: &str = "fuji.json";
const LOCK_FILE: &str = ".lock";

pub struct Registry {
    servers_dir: PathBuf,
}

impl Registry {
    pub fn new(servers_dir: PathBuf) -> Self {
        Self { servers_dir }
    }

    pub fn open(config: &FujiConfig) -> Self {
        Self::new(config.servers_dir())
    }

    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.servers_dir.join(name)
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.instance_dir(name).join(RECORD_FILE)
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.instance_dir(name).join(LOCK_FILE)
    }

    pub async fn get(&self, name: &str) -> Result<ServerInstance, RegistryError> {
        let path = self.record_path(name);

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RegistryError::NotFound(name.to_string()));
            }
            Err(err) => return Err(io_err(path, err)),
        };

        serde_json::from_slice(&data).map_err(|err| RegistryError::CorruptState {
            name: name.to_string(),
            path,
            reason: err.to_string(),
        })
    }

    /// Scan every instance directory. A missing `servers/` directory means
    /// a first run: the mapping is empty, not an error. An unreadable
    /// record is an error; the caller must be able to tell "empty" from
    /// "corrupt".
    pub async fn load_all(
        &self,
    ) -> Result<BTreeMap<String, ServerInstance>, RegistryError> {
        let mut instances = BTreeMap::new();

        let mut entries = match fs::read_dir(&self.servers_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(instances),
            Err(err) => return Err(io_err(self.servers_dir.clone(), err)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| io_err(self.servers_dir.clone(), err))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|err| io_err(entry.path(), err))?;
            if !meta.is_dir() {
                continue;
            }

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            if !self.record_path(&name).exists() {
                debug!("Skipping '{name}': directory has no record file");
                continue;
            }

            let instance = self.get(&name).await?;
            instances.insert(name, instance);
        }

        Ok(instances)
    }

    /// Persist a brand-new instance. The instance directory must not exist
    /// yet; every directory is exclusively owned by its instance.
    pub async fn insert(&self, instance: &ServerInstance) -> Result<(), RegistryError> {
        let dir = self.instance_dir(&instance.name);
        if dir.exists() {
            return Err(RegistryError::DuplicateName(instance.name.clone()));
        }

        fs::create_dir_all(&dir)
            .await
            .map_err(|err| io_err(dir, err))?;

        self.persist(instance).await
    }

    pub async fn update(&self, instance: &ServerInstance) -> Result<(), RegistryError> {
        if !self.record_path(&instance.name).exists() {
            return Err(RegistryError::NotFound(instance.name.clone()));
        }

        self.persist(instance).await
    }

    async fn persist(&self, instance: &ServerInstance) -> Result<(), RegistryError> {
        let path = self.record_path(&instance.name);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_vec_pretty(instance).map_err(|err| {
            RegistryError::CorruptState {
                name: instance.name.clone(),
                path: path.clone(),
                reason: err.to_string(),
            }
        })?;

        fs::write(&tmp, json)
            .await
            .map_err(|err| io_err(tmp.clone(), err))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|err| io_err(path, err))
    }

    /// Remove the record only; the Supervisor owns directory removal.
    pub async fn remove(&self, name: &str) -> Result<(), RegistryError> {
        let path = self.record_path(name);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(RegistryError::NotFound(name.to_string()))
            }
            Err(err) => Err(io_err(path, err)),
        }
    }

    /// Claim the transition lock for one instance. First writer wins:
    /// the lock file is created with `create_new`, so a racing invocation
    /// observes `Conflict` instead of proceeding.
    pub async fn lock(&self, name: &str) -> Result<TransitionLock, RegistryError> {
        let path = self.lock_path(name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => Ok(TransitionLock { path }),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(RegistryError::Conflict(name.to_string()))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // parent directory missing: no such instance
                Err(RegistryError::NotFound(name.to_string()))
            }
            Err(err) => Err(io_err(path, err)),
        }
    }
}

/// Held for the duration of a state-transition critical section; the lock
/// file disappears when the guard drops.
#[derive(Debug)]
pub struct TransitionLock {
    path: PathBuf,
}

impl Drop for TransitionLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn io_err(path: PathBuf, source: std::io::Error) -> RegistryError {
    RegistryError::Io { path, source }
}
