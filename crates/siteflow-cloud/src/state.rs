//! State management for managed resources
//!
//! Manages the `.siteflow/state.json` snapshot which records the last-known
//! actual state of every resource, and the `lock.json` file that keeps two
//! runs from mutating the same snapshot.

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use siteflow_core::{ID_ATTRIBUTE, PROJECT_DIR, Reference, ResourceGraph, ResourceId};
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Persisted snapshot of actual state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// State file version
    pub version: u32,

    /// Bumped on every mutation
    pub serial: u64,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by `type.name`
    pub resources: BTreeMap<String, ResourceState>,

    /// Output values from the last successful apply
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputValue>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self) {
        self.serial += 1;
        self.updated_at = Utc::now();
    }

    /// Add or update a resource
    pub fn set_resource(&mut self, state: ResourceState) {
        self.resources.insert(state.address().key(), state);
        self.touch();
    }

    /// Remove a resource
    pub fn remove_resource(&mut self, id: &ResourceId) -> Option<ResourceState> {
        let result = self.resources.remove(&id.key());
        if result.is_some() {
            self.touch();
        }
        result
    }

    /// Get a resource by address
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.resources.get(&id.key())
    }

    pub fn addresses(&self) -> Vec<ResourceId> {
        self.resources.values().map(|r| r.address()).collect()
    }

    /// Replace the recorded outputs; bumps the serial only when they change
    pub fn set_outputs(&mut self, outputs: BTreeMap<String, OutputValue>) {
        if self.outputs != outputs {
            self.outputs = outputs;
            self.touch();
        }
    }

    /// Resolve a reference against materialized attributes
    ///
    /// `id` is the remote id; other attributes come from the last-known
    /// remote attributes, falling back to the last applied inputs.
    pub fn lookup(&self, reference: &Reference) -> Option<Value> {
        let state = self.get(&reference.target)?;
        if reference.attribute == ID_ATTRIBUTE {
            return Some(Value::String(state.id.clone()));
        }
        state
            .attributes
            .get(&reference.attribute)
            .or_else(|| state.inputs.get(&reference.attribute))
            .cloned()
    }

    /// Dependency graph recorded in the snapshot (used to order deletes)
    pub fn graph(&self) -> Result<ResourceGraph> {
        self.graph_of(self.addresses().into_iter().collect())
    }

    /// Dependency graph restricted to the given resources
    pub fn graph_of(&self, ids: BTreeSet<ResourceId>) -> Result<ResourceGraph> {
        let dependencies = ids
            .iter()
            .filter_map(|id| self.get(id))
            .map(|state| {
                (
                    state.address(),
                    state.dependencies.iter().cloned().collect(),
                )
            })
            .collect();
        Ok(ResourceGraph::from_dependencies(dependencies)?)
    }
}

/// State of a single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Remote id assigned by the control plane
    pub id: String,

    /// Resource type
    pub resource_type: String,

    /// Name in the site document
    pub name: String,

    /// Current status
    pub status: ResourceStatus,

    /// Resolved declared attributes last applied
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,

    /// Last-known remote attributes (inputs plus computed)
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,

    /// Resources this one depended on when it was applied
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,

    #[serde(default)]
    pub prevent_destroy: bool,

    /// When the resource was created
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(address: &ResourceId, id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_type: address.resource_type.clone(),
            name: address.name.clone(),
            status: ResourceStatus::Ready,
            inputs: BTreeMap::new(),
            attributes: BTreeMap::new(),
            dependencies: Vec::new(),
            prevent_destroy: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn address(&self) -> ResourceId {
        ResourceId::new(&self.resource_type, &self.name)
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_inputs(mut self, inputs: BTreeMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<ResourceId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_prevent_destroy(mut self, prevent_destroy: bool) -> Self {
        self.prevent_destroy = prevent_destroy;
        self
    }

    pub fn is_tainted(&self) -> bool {
        self.status == ResourceStatus::Tainted
    }
}

/// Status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Resource exists and matches its last applied inputs
    Ready,
    /// Resource exists remotely but its creation did not complete
    Tainted,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Ready => write!(f, "ready"),
            ResourceStatus::Tainted => write!(f, "tainted"),
        }
    }
}

/// An evaluated output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub value: Value,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// State manager for reading/writing state files
#[derive(Debug, Clone)]
pub struct StateManager {
    /// Directory holding state.json and lock.json
    state_dir: PathBuf,
}

impl StateManager {
    /// State under `<project_root>/.siteflow`
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            state_dir: project_root.as_ref().join(PROJECT_DIR),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Get the state file path
    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    /// Get the backup file path
    fn backup_path(&self) -> PathBuf {
        self.state_dir.join(STATE_BACKUP)
    }

    /// Get the lock file path
    fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    /// Ensure the state directory exists
    async fn ensure_state_dir(&self) -> Result<()> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).await?;
            tracing::debug!("Created state directory: {}", self.state_dir.display());
        }
        Ok(())
    }

    /// Load the current snapshot
    pub async fn load(&self) -> Result<Snapshot> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, returning empty snapshot");
            return Ok(Snapshot::new());
        }

        let content = fs::read_to_string(&path).await?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|e| CloudError::StateError(format!("{}: {}", path.display(), e)))?;

        if snapshot.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                snapshot.version, STATE_VERSION
            )));
        }

        tracing::debug!(
            serial = snapshot.serial,
            resources = snapshot.resources.len(),
            "Loaded state"
        );
        Ok(snapshot)
    }

    /// Save the snapshot, keeping the previous file as a backup
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let content = serde_json::to_string_pretty(snapshot)?;

        if path.exists() {
            fs::copy(&path, self.backup_path()).await?;
        }

        // atomic replace
        let tmp = self.state_dir.join(format!("{}.tmp", STATE_FILE));
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;

        tracing::debug!(
            serial = snapshot.serial,
            resources = snapshot.resources.len(),
            "Saved state"
        );
        Ok(())
    }

    /// Acquire a lock for exclusive access
    ///
    /// A lock older than `stale_after` is broken with a warning.
    pub async fn acquire_lock(&self, operation: &str, stale_after: Duration) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();
        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            operation: operation.to_string(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&lock_info)?;

        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(content.as_bytes()).await?;
                    file.flush().await?;
                    tracing::debug!(operation, "Acquired state lock");
                    return Ok(StateLock {
                        lock_path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let existing = self.lock_info().await?;
                    let Some(existing) = existing else {
                        continue;
                    };

                    let age = Utc::now().signed_duration_since(existing.acquired_at);
                    let stale = age.to_std().map(|a| a >= stale_after).unwrap_or(false);
                    if !stale {
                        return Err(CloudError::LockError(format!(
                            "State is locked by {} (pid {}, {}) since {}",
                            existing.holder, existing.pid, existing.operation, existing.acquired_at
                        )));
                    }

                    tracing::warn!(
                        holder = %existing.holder,
                        pid = existing.pid,
                        "Removing stale lock"
                    );
                    self.break_stale_lock(&existing).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CloudError::LockError(format!(
            "Could not acquire {}",
            lock_path.display()
        )))
    }

    /// Move the stale lock aside, then delete it
    ///
    /// Another run may have broken the same stale lock and taken a fresh one
    /// in between; a fresh lock moved aside by mistake is linked back.
    async fn break_stale_lock(&self, stale: &LockInfo) -> Result<()> {
        let lock_path = self.lock_path();
        let aside = self.state_dir.join(format!(
            "{}.stale.{}.{}",
            LOCK_FILE,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));

        match fs::rename(&lock_path, &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let moved: Option<LockInfo> = fs::read_to_string(&aside)
            .await
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok());
        if moved.as_ref().is_some_and(|moved| moved != stale) {
            tracing::debug!("Fresh lock moved aside; restoring it");
            match fs::hard_link(&aside, &lock_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
        fs::remove_file(&aside).await?;
        Ok(())
    }

    /// Current lock holder, if any
    pub async fn lock_info(&self) -> Result<Option<LockInfo>> {
        match fs::read_to_string(self.lock_path()).await {
            Ok(content) => {
                let info = serde_json::from_str(&content).map_err(|e| {
                    CloudError::LockError(format!("Unreadable lock file: {}", e))
                })?;
                Ok(Some(info))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the lock regardless of its holder. Returns whether a lock existed.
    pub async fn force_unlock(&self) -> Result<bool> {
        match fs::remove_file(self.lock_path()).await {
            Ok(()) => {
                tracing::warn!("State lock removed by force");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Lock information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder: String,
    pub pid: u32,
    pub operation: String,
    pub acquired_at: DateTime<Utc>,
}

/// RAII guard for state lock
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            match fs::remove_file(&self.lock_path).await {
                Ok(()) => tracing::debug!("Released state lock"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
