use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use crate::errors::Result;

/// Flat `<name>_version -> version` map persisted as JSON beside the binaries.
pub struct VersionStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

fn key_for(name: &str) -> String {
    format!("{}_version", name)
}

impl VersionStore {
    /// Opens the store, starting empty when the file is missing or unreadable.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("⚠️ [PROVISION] Ignoring unreadable version store {:?}: {}", path, e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn installed_version(&self, name: &str) -> Option<String> {
        self.entries.lock().await.get(&key_for(name)).cloned()
    }

    pub async fn set_installed_version(&self, name: &str, version: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key_for(name), version.to_string());
        self.persist(&entries).await
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(&key_for(name)).is_some() {
            self.persist(&entries).await?;
        }
        Ok(())
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(entries)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
