//! File-backed status store
//!
//! Each object lives in `<root>/<kind>/<name>.json` with a resource version
//! bumped on every save. Saving with a stale version fails with
//! [`CoreError::Conflict`], which callers treat as retryable.

use crate::error::{CoreError, Result};
use crate::model::{Cluster, Machine};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

const STORE_VERSION: u32 = 1;
const BACKUP_SUFFIX: &str = "json.backup";
const TEMP_SUFFIX: &str = "json.tmp";

/// Objects persisted by the store
pub trait StoredObject: Serialize + DeserializeOwned {
    const KIND: &'static str;

    fn object_name(&self) -> &str;
}

impl StoredObject for Cluster {
    const KIND: &'static str = "clusters";

    fn object_name(&self) -> &str {
        self.name()
    }
}

impl StoredObject for Machine {
    const KIND: &'static str = "machines";

    fn object_name(&self) -> &str {
        self.name()
    }
}

/// An object with its store metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u32,
    pub resource_version: u64,
    pub updated_at: DateTime<Utc>,
    pub object: T,
}

pub struct StatusStore {
    root: PathBuf,
}

impl StatusStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn kind_dir<T: StoredObject>(&self) -> PathBuf {
        self.root.join(T::KIND)
    }

    fn object_path<T: StoredObject>(&self, name: &str) -> PathBuf {
        self.kind_dir::<T>().join(format!("{}.json", name))
    }

    async fn read<T: StoredObject>(&self, path: &Path) -> Result<Option<Versioned<T>>> {
        if !fs::try_exists(path).await? {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await?;
        let stored: Versioned<T> = serde_json::from_str(&content)?;
        if stored.version > STORE_VERSION {
            return Err(CoreError::UnsupportedVersion {
                found: stored.version,
                supported: STORE_VERSION,
            });
        }
        Ok(Some(stored))
    }

    /// Load an object, `None` when it was never saved
    pub async fn load<T: StoredObject>(&self, name: &str) -> Result<Option<Versioned<T>>> {
        let stored = self.read(&self.object_path::<T>(name)).await?;
        if let Some(stored) = &stored {
            tracing::debug!(
                kind = T::KIND,
                name,
                resource_version = stored.resource_version,
                "Loaded object"
            );
        }
        Ok(stored)
    }

    /// Save an object read at `expected` (0 for a new object) and return
    /// the new resource version
    pub async fn save<T: StoredObject>(&self, object: &T, expected: u64) -> Result<u64> {
        let dir = self.kind_dir::<T>();
        if !fs::try_exists(&dir).await? {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created store directory: {}", dir.display());
        }

        let path = self.object_path::<T>(object.object_name());
        let found = self
            .read::<T>(&path)
            .await?
            .map(|s| s.resource_version)
            .unwrap_or(0);
        if found != expected {
            return Err(CoreError::Conflict {
                path,
                expected,
                found,
            });
        }

        let stored = Versioned {
            version: STORE_VERSION,
            resource_version: found + 1,
            updated_at: Utc::now(),
            object,
        };
        // The live file is only ever replaced by a rename
        let temp = path.with_extension(TEMP_SUFFIX);
        fs::write(&temp, serde_json::to_string_pretty(&stored)?).await?;
        if found > 0 {
            fs::copy(&path, path.with_extension(BACKUP_SUFFIX)).await?;
        }
        fs::rename(&temp, &path).await?;

        tracing::debug!(
            kind = T::KIND,
            name = object.object_name(),
            resource_version = stored.resource_version,
            "Saved object"
        );
        Ok(stored.resource_version)
    }

    /// Remove an object and its backup; missing files are ignored
    pub async fn remove<T: StoredObject>(&self, name: &str) -> Result<bool> {
        let path = self.object_path::<T>(name);
        let existed = fs::try_exists(&path).await?;
        if existed {
            fs::remove_file(&path).await?;
        }
        let backup = path.with_extension(BACKUP_SUFFIX);
        if fs::try_exists(&backup).await? {
            fs::remove_file(&backup).await?;
        }
        Ok(existed)
    }

    /// Names of every stored object of a kind, sorted
    pub async fn list<T: StoredObject>(&self) -> Result<Vec<String>> {
        let dir = self.kind_dir::<T>();
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            names.push(name.to_string());
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NetworkSpec, Role};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_save_load() {
        let temp_dir = tempdir().unwrap();
        let store = StatusStore::new(temp_dir.path());

        let mut cluster = Cluster::new("demo", "3f1c", NetworkSpec::default());
        cluster.status.resources.net.track("default", "vpc-1");

        let version = store.save(&cluster, 0).await.unwrap();
        assert_eq!(version, 1);

        let loaded = store.load::<Cluster>("demo").await.unwrap().unwrap();
        assert_eq!(loaded.resource_version, 1);
        assert_eq!(loaded.object.status.resources.net.get("default"), Some("vpc-1"));
    }

    #[tokio::test]
    async fn test_missing_object() {
        let temp_dir = tempdir().unwrap();
        let store = StatusStore::new(temp_dir.path());
        assert!(store.load::<Machine>("nope").await.unwrap().is_none());
        assert!(!store.remove::<Machine>("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_save_conflicts() {
        let temp_dir = tempdir().unwrap();
        let store = StatusStore::new(temp_dir.path());
        let machine = Machine::new("demo-md-0", "m1", "demo", Role::Worker);

        store.save(&machine, 0).await.unwrap();
        store.save(&machine, 1).await.unwrap();

        let err = store.save(&machine, 1).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict { expected: 1, found: 2, .. }));
        assert!(err.is_retryable());

        let backup = temp_dir.path().join("machines").join("demo-md-0.json.backup");
        assert!(backup.exists());
    }

    #[tokio::test]
    async fn test_list_and_remove() {
        let temp_dir = tempdir().unwrap();
        let store = StatusStore::new(temp_dir.path());
        for name in ["b", "a"] {
            store
                .save(&Cluster::new(name, "u", NetworkSpec::default()), 0)
                .await
                .unwrap();
        }
        store
            .save(&Cluster::new("a", "u", NetworkSpec::default()), 1)
            .await
            .unwrap();

        assert_eq!(store.list::<Cluster>().await.unwrap(), vec!["a", "b"]);
        assert!(!temp_dir.path().join("clusters").join("a.json.tmp").exists());
        assert!(store.remove::<Cluster>("a").await.unwrap());
        assert_eq!(store.list::<Cluster>().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_interrupted_save_keeps_live_file() {
        let temp_dir = tempdir().unwrap();
        let store = StatusStore::new(temp_dir.path());
        let mut cluster = Cluster::new("demo", "3f1c", NetworkSpec::default());
        cluster.status.resources.net.track("default", "vpc-1");
        store.save(&cluster, 0).await.unwrap();

        // A save that died after writing its temp file
        let dir = temp_dir.path().join("clusters");
        std::fs::write(dir.join("demo.json.tmp"), "{ truncated").unwrap();

        let loaded = store.load::<Cluster>("demo").await.unwrap().unwrap();
        assert_eq!(loaded.resource_version, 1);
        assert_eq!(store.list::<Cluster>().await.unwrap(), vec!["demo"]);

        cluster.status.resources.subnet.track("10.0.2.0/24", "subnet-1");
        assert_eq!(store.save(&cluster, 1).await.unwrap(), 2);
        assert!(!dir.join("demo.json.tmp").exists());
        let backup: Versioned<Cluster> =
            serde_json::from_str(&std::fs::read_to_string(dir.join("demo.json.backup")).unwrap()).unwrap();
        assert_eq!(backup.resource_version, 1);
        let loaded = store.load::<Cluster>("demo").await.unwrap().unwrap();
        assert_eq!(loaded.object.status.resources.subnet.get("10.0.2.0/24"), Some("subnet-1"));
    }
}
