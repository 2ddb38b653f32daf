use std::{collections::BTreeMap, io::ErrorKind, path::PathBuf};

use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, instrument};

use crate::app_config::AppConfig;

/// Key name to ISO-8601 timestamp. Ordered so the file and the API output are stable.
pub type StatusRecord = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum StatusError {
    /// The key is not part of the record.
    #[error("Unknown status key {0}")]
    InvalidKey(String),

    #[error("Status file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Status file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StatusError>;

/// The current time the way it is stored in the record, e.g. `2024-03-01T09:30:00.000Z`.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The single status record, kept as one JSON file. All access goes through one mutex, so a
/// read-modify-write can't interleave with another and lose its key.
#[derive(Debug)]
pub struct StatusStore {
    path: PathBuf,

    /// Keys a freshly created record starts out with. Once the file exists its own key set is
    /// authoritative.
    initial_keys: Vec<String>,

    lock: Mutex<()>,
}

impl StatusStore {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let store = Self {
            path: config.status_file.clone(),
            initial_keys: config.status_keys.clone(),
            lock: Mutex::new(()),
        };
        store.create_parent_dir().await?;
        Ok(store)
    }

    async fn create_parent_dir(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            debug!("Creating status dir at {}", dir.display());
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Return the record, creating it with every key set to now if it doesn't exist yet.
    #[instrument(skip_all)]
    pub async fn read(&self) -> Result<StatusRecord> {
        let _guard = self.lock.lock().await;
        self.load_or_init().await
    }

    /// Whether `key` is part of the record. Creates the record like [`Self::read`] does.
    pub async fn has_key(&self, key: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        Ok(self.load_or_init().await?.contains_key(key))
    }

    /// Set one key and return the record as written. The whole record is rewritten.
    #[instrument(skip(self, timestamp))]
    pub async fn update(&self, key: &str, timestamp: &str) -> Result<StatusRecord> {
        let _guard = self.lock.lock().await;
        let mut record = self.load_or_init().await?;

        match record.get_mut(key) {
            Some(value) => *value = timestamp.to_string(),
            None => return Err(StatusError::InvalidKey(key.to_string())),
        }

        self.write(&record).await?;
        info!("Status updated");
        Ok(record)
    }

    // Callers must hold the lock.
    async fn load_or_init(&self) -> Result<StatusRecord> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let now = now_timestamp();
                let record: StatusRecord = self
                    .initial_keys
                    .iter()
                    .map(|k| (k.clone(), now.clone()))
                    .collect();
                self.write(&record).await?;
                info!("Created status record at {}", self.path.display());
                Ok(record)
            }
            Err(e) => Err(e.into()),
        }
    }

    // Write to a sibling file and rename over the record so readers never see half a file.
    async fn write(&self, record: &StatusRecord) -> Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
