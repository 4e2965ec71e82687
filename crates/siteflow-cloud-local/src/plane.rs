//! Local control plane implementation

use crate::catalog;
use crate::error::LocalError;
use crate::store::Store;
use async_trait::async_trait;
use serde_json::Value;
use siteflow_cloud::{
    AuthStatus, CloudError, ControlPlane, RemoteObject, Request, ResourceSchema, Result,
};
use siteflow_core::{PROJECT_DIR, ProviderConfig};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Default store file name inside the project directory
pub const DEFAULT_STORE_FILE: &str = "cloud.json";

pub const DEFAULT_REGION: &str = "us-east-1";

/// Control plane that keeps its objects in a JSON file
///
/// Behaves like the hosted services it stands in for: ids are assigned on
/// create, computed attributes are filled in, bucket names are unique and
/// force-new attributes cannot be changed by `update`.
pub struct LocalControlPlane {
    path: PathBuf,
    region: String,
    /// Delay added to every call
    latency: Duration,
    schemas: HashMap<String, ResourceSchema>,
    lock: Mutex<()>,
}

impl LocalControlPlane {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            region: DEFAULT_REGION.to_string(),
            latency: Duration::ZERO,
            schemas: catalog::schemas(),
            lock: Mutex::new(()),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Build from a `provider "local"` block; `path` is relative to the project root
    pub fn from_provider(project_root: &Path, config: &ProviderConfig) -> Self {
        let path = match config.config.get("path") {
            Some(p) => project_root.join(p),
            None => project_root.join(PROJECT_DIR).join(DEFAULT_STORE_FILE),
        };
        let mut plane = Self::new(path);
        if let Some(region) = &config.region {
            plane = plane.with_region(region.clone());
        }
        if let Some(ms) = config.config.get("latency_ms") {
            match ms.parse::<u64>() {
                Ok(ms) => plane = plane.with_latency(Duration::from_millis(ms)),
                Err(_) => warn!(value = %ms, "Ignoring invalid latency_ms"),
            }
        }
        plane
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// All objects currently in the store
    pub async fn objects(&self) -> Result<Vec<RemoteObject>> {
        let _guard = self.lock.lock().await;
        let store = Store::load(&self.path).await?;
        Ok(store.objects.into_values().collect())
    }

    /// Change an attribute behind the reconciler's back
    pub async fn modify_out_of_band(
        &self,
        resource_type: &str,
        id: &str,
        attribute: &str,
        value: Value,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut store = Store::load(&self.path).await?;
        let key = Store::key(resource_type, id);
        let object = store
            .objects
            .get_mut(&key)
            .ok_or_else(|| CloudError::ResourceNotFound(key.clone()))?;
        object.attributes.insert(attribute.to_string(), value);
        store.save(&self.path).await?;
        Ok(())
    }

    /// Delete an object behind the reconciler's back
    pub async fn delete_out_of_band(&self, resource_type: &str, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut store = Store::load(&self.path).await?;
        store.remove(resource_type, id);
        store.save(&self.path).await?;
        Ok(())
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn schema_for(&self, resource_type: &str) -> Result<&ResourceSchema> {
        self.schemas
            .get(resource_type)
            .ok_or_else(|| CloudError::UnknownResourceType(resource_type.to_string()))
    }

    fn check_required(&self, request: &Request) -> Result<()> {
        let schema = self.schema_for(&request.resource_type)?;
        for name in &schema.required {
            if !request.attributes.contains_key(name) {
                return Err(CloudError::ValidationFailed {
                    resource: format!("{}.{}", request.resource_type, request.name),
                    message: format!("missing required attribute `{}`", name),
                });
            }
        }
        Ok(())
    }

    fn merged_attributes(&self, request: &Request, id: &str) -> BTreeMap<String, Value> {
        let mut attributes = request.attributes.clone();
        attributes.extend(catalog::computed_attributes(
            &request.resource_type,
            id,
            &self.region,
        ));
        attributes
    }
}

fn bucket_name(request: &Request) -> std::result::Result<String, LocalError> {
    match request.attributes.get("bucket") {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(LocalError::NotAString {
            resource_type: request.resource_type.clone(),
            attribute: "bucket".to_string(),
        }),
    }
}

#[async_trait]
impl ControlPlane for LocalControlPlane {
    fn name(&self) -> &str {
        "local"
    }

    fn display_name(&self) -> &str {
        "Local (simulated)"
    }

    fn schema(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.schemas.get(resource_type)
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        match Store::load(&self.path).await {
            Ok(_) => Ok(AuthStatus::ok(format!(
                "{} ({})",
                self.path.display(),
                self.region
            ))),
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<RemoteObject>> {
        self.simulate_latency().await;
        let _guard = self.lock.lock().await;
        let store = Store::load(&self.path).await?;
        Ok(store.get(resource_type, id).cloned())
    }

    #[instrument(skip(self, request), fields(resource_type = %request.resource_type, name = %request.name))]
    async fn create(&self, request: &Request) -> Result<RemoteObject> {
        self.check_required(request)?;
        self.simulate_latency().await;

        let _guard = self.lock.lock().await;
        let mut store = Store::load(&self.path).await?;

        if let Some(existing) = store.replay(&request.idempotency_key) {
            let same = request
                .attributes
                .iter()
                .all(|(name, value)| existing.attributes.get(name) == Some(value));
            if !same {
                warn!(id = %existing.id, "Idempotency key reused with different attributes");
                return Err(CloudError::ResourceAlreadyExists(format!(
                    "{} (idempotency key `{}` was used with different attributes)",
                    Store::key(&existing.resource_type, &existing.id),
                    request.idempotency_key
                )));
            }
            debug!(id = %existing.id, "Replaying create for idempotency key");
            return Ok(existing.clone());
        }

        let id = if catalog::is_bucket_scoped(&request.resource_type) {
            let bucket = bucket_name(request)?;
            if store.get(&request.resource_type, &bucket).is_some() {
                return Err(CloudError::ResourceAlreadyExists(Store::key(
                    &request.resource_type,
                    &bucket,
                )));
            }
            if request.resource_type != catalog::S3_BUCKET
                && store.get(catalog::S3_BUCKET, &bucket).is_none()
            {
                return Err(CloudError::ResourceNotFound(Store::key(
                    catalog::S3_BUCKET,
                    &bucket,
                )));
            }
            bucket
        } else {
            store.generate_id()
        };

        let object = RemoteObject {
            attributes: self.merged_attributes(request, &id),
            id,
            resource_type: request.resource_type.clone(),
        };
        store.insert(object.clone());
        store.remember(&request.idempotency_key, &object);
        store.save(&self.path).await?;

        info!(id = %object.id, "Created object");
        Ok(object)
    }

    #[instrument(skip(self, request), fields(resource_type = %request.resource_type, id = %id))]
    async fn update(&self, id: &str, request: &Request) -> Result<RemoteObject> {
        self.check_required(request)?;
        let schema = self.schema_for(&request.resource_type)?;
        self.simulate_latency().await;

        let _guard = self.lock.lock().await;
        let mut store = Store::load(&self.path).await?;

        let current = store
            .get(&request.resource_type, id)
            .ok_or_else(|| CloudError::ResourceNotFound(Store::key(&request.resource_type, id)))?;

        for name in &schema.force_new {
            if current.attributes.get(name) != request.attributes.get(name) {
                return Err(CloudError::ValidationFailed {
                    resource: Store::key(&request.resource_type, id),
                    message: format!("`{}` cannot be changed in place", name),
                });
            }
        }

        let object = RemoteObject {
            id: id.to_string(),
            resource_type: request.resource_type.clone(),
            attributes: self.merged_attributes(request, id),
        };
        store.insert(object.clone());
        store.save(&self.path).await?;

        info!("Updated object");
        Ok(object)
    }

    #[instrument(skip(self))]
    async fn delete(&self, resource_type: &str, id: &str, idempotency_key: &str) -> Result<()> {
        self.simulate_latency().await;
        let _guard = self.lock.lock().await;
        let mut store = Store::load(&self.path).await?;

        if store.remove(resource_type, id).is_none() {
            debug!("Object already gone");
            return Ok(());
        }
        store.save(&self.path).await?;

        info!("Deleted object");
        Ok(())
    }
}
