//! JSON file holding the simulated remote objects

use crate::error::{LocalError, Result};
use serde::{Deserialize, Serialize};
use siteflow_cloud::RemoteObject;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Contents of the store file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Store {
    /// Counter for generated ids
    #[serde(default)]
    pub next_id: u64,

    /// Objects keyed by `type/id`
    #[serde(default)]
    pub objects: BTreeMap<String, RemoteObject>,

    /// Idempotency key -> object key
    #[serde(default)]
    pub idempotency: BTreeMap<String, String>,
}

impl Store {
    pub fn key(resource_type: &str, id: &str) -> String {
        format!("{}/{}", resource_type, id)
    }

    pub fn get(&self, resource_type: &str, id: &str) -> Option<&RemoteObject> {
        self.objects.get(&Self::key(resource_type, id))
    }

    pub fn insert(&mut self, object: RemoteObject) {
        self.objects
            .insert(Self::key(&object.resource_type, &object.id), object);
    }

    /// Remove an object and every idempotency entry pointing at it
    pub fn remove(&mut self, resource_type: &str, id: &str) -> Option<RemoteObject> {
        let key = Self::key(resource_type, id);
        self.idempotency.retain(|_, target| target != &key);
        self.objects.remove(&key)
    }

    /// Object previously created with this key, if it still exists
    pub fn replay(&self, idempotency_key: &str) -> Option<&RemoteObject> {
        self.idempotency
            .get(idempotency_key)
            .and_then(|key| self.objects.get(key))
    }

    pub fn remember(&mut self, idempotency_key: &str, object: &RemoteObject) {
        self.idempotency.insert(
            idempotency_key.to_string(),
            Self::key(&object.resource_type, &object.id),
        );
    }

    /// Next generated id in the CloudFront style (`E` + 13 hex digits)
    pub fn generate_id(&mut self) -> String {
        self.next_id += 1;
        format!("E{:013X}", self.next_id)
    }

    /// Load the store; a missing file is an empty store
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content).map_err(|e| LocalError::StoreCorrupted {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
