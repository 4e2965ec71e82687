//! Control plane trait definition

use crate::error::Result;
use crate::schema::ResourceSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Control plane abstraction trait
///
/// The reconciler only talks to the outside world through this trait.
/// Every mutating call carries an idempotency key; a repeated `create`
/// with the same key returns the object created the first time.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Returns the control plane name (e.g., "local")
    fn name(&self) -> &str;

    /// Returns the display name for UI
    fn display_name(&self) -> &str;

    /// Schema of a resource type, `None` if the type is not supported
    fn schema(&self, resource_type: &str) -> Option<&ResourceSchema>;

    /// Check if the control plane is reachable and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Read a remote object; `None` if it no longer exists
    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<RemoteObject>>;

    /// Create an object from its resolved attributes
    async fn create(&self, request: &Request) -> Result<RemoteObject>;

    /// Change an existing object in place
    async fn update(&self, id: &str, request: &Request) -> Result<RemoteObject>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, resource_type: &str, id: &str, idempotency_key: &str) -> Result<()>;
}

/// A create or update call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub resource_type: String,

    /// Name of the declaration (informational)
    pub name: String,

    /// Fully resolved attributes
    pub attributes: BTreeMap<String, Value>,

    pub idempotency_key: String,
}

/// An object as reported by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub id: String,
    pub resource_type: String,
    /// Declared plus computed attributes
    pub attributes: BTreeMap<String, Value>,
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Retry configuration for control plane operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(retry.saturating_sub(1) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}
