//! JSON document store
//!
//! One JSON document per file, human-diffable. Writes go to a uniquely named
//! sibling temp file which is synced and then renamed over the target, so a
//! crash mid-write leaves either the old or the new document, never a torn one.

use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// Typed handle on a persisted JSON document
#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document; a missing file yields `T::default()`
    pub async fn load(&self) -> Result<T> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the document, treating unreadable content as empty
    pub async fn load_or_default(&self) -> T {
        match self.load().await {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Discarding unreadable document {}: {}",
                    self.path.display(),
                    e
                );
                T::default()
            }
        }
    }

    /// Atomically replace the document
    pub async fn save(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = self.temp_path();

        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &self.path).await
        };

        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!("Saved {} ({} bytes)", self.path.display(), bytes.len());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        items: Vec<String>,
    }

    #[tokio::test]
    async fn test_missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonStore<Doc> = JsonStore::new(dir.path().join("doc.json"));
        assert_eq!(store.load().await.unwrap(), Doc::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonStore<Doc> = JsonStore::new(dir.path().join("nested/doc.json"));
        let doc = Doc {
            items: vec!["a".into(), "b".into()],
        };

        store.save(&doc).await.unwrap();
        assert_eq!(store.load().await.unwrap(), doc);

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_errors_but_load_or_default_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store: JsonStore<Doc> = JsonStore::new(&path);
        assert!(store.load().await.is_err());
        assert_eq!(store.load_or_default().await, Doc::default());
    }
}
