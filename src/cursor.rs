use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::Result;

const LAST_ID_KEY: &str = "last_id";

/// Durable "highest message id fully processed" watermark.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Returns 0 when no prior state exists.
    async fn load(&self) -> Result<i64>;

    async fn save(&self, last_id: i64) -> Result<()>;
}

/// Stores the cursor as `{"last_id": N}` in a JSON file. Other keys in the file are kept.
#[derive(Debug, Clone)]
pub struct JsonFileCursorStore {
    path: PathBuf,
}

impl JsonFileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the state document. Missing or corrupt files read as an empty document.
    async fn read_document(&self) -> Result<Map<String, Value>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No state file at {}", self.path.display());
                return Ok(Map::new());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => {
                warn!(
                    "State file {} is not a JSON object, starting from 0",
                    self.path.display()
                );
                Ok(Map::new())
            }
            Err(e) => {
                warn!(
                    "State file {} is corrupt ({}), starting from 0",
                    self.path.display(),
                    e
                );
                Ok(Map::new())
            }
        }
    }
}

#[async_trait]
impl CursorStore for JsonFileCursorStore {
    async fn load(&self) -> Result<i64> {
        let document = self.read_document().await?;
        let last_id = match document.get(LAST_ID_KEY) {
            None => 0,
            Some(value) => value.as_i64().unwrap_or_else(|| {
                warn!("Ignoring non-integer {} value {}", LAST_ID_KEY, value);
                0
            }),
        };
        Ok(last_id)
    }

    async fn save(&self, last_id: i64) -> Result<()> {
        let mut document = self.read_document().await?;
        document.insert(LAST_ID_KEY.to_string(), Value::from(last_id));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, serde_json::to_vec(&Value::Object(document))?).await?;
        fs::rename(&tmp_path, &self.path).await?;

        debug!("Saved {}={} to {}", LAST_ID_KEY, last_id, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("ledger-sync-{}-{}", std::process::id(), name))
            .join("state.json")
    }

    #[tokio::test]
    async fn test_missing_file_loads_zero() {
        let store = JsonFileCursorStore::new(scratch_path("missing"));
        assert_eq!(store.load().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let path = scratch_path("roundtrip");
        let store = JsonFileCursorStore::new(&path);

        store.save(41).await.unwrap();
        assert_eq!(store.load().await.unwrap(), 41);

        store.save(57).await.unwrap();
        assert_eq!(store.load().await.unwrap(), 57);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_zero() {
        let path = scratch_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileCursorStore::new(&path);
        assert_eq!(store.load().await.unwrap(), 0);

        std::fs::write(&path, r#"{"last_id": "twelve"}"#).unwrap();
        assert_eq!(store.load().await.unwrap(), 0);

        std::fs::write(&path, r#"{"other": true}"#).unwrap();
        assert_eq!(store.load().await.unwrap(), 0);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_save_keeps_unrelated_keys() {
        let path = scratch_path("extra-keys");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"last_id": 3, "channel": "caixa"}"#).unwrap();

        let store = JsonFileCursorStore::new(&path);
        store.save(9).await.unwrap();

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["last_id"], 9);
        assert_eq!(saved["channel"], "caixa");

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
