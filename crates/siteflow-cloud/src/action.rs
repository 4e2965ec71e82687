//! Planned actions and apply results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use siteflow_core::ResourceId;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;

/// Represents a planned action for a single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Resource address (`type.name`)
    pub address: ResourceId,

    /// Type of action to perform
    pub action_type: ActionType,

    /// Dependency level the action runs in
    pub level: usize,

    /// Actions in earlier levels that must succeed first
    #[serde(default)]
    pub depends_on: Vec<ResourceId>,

    /// Attribute-level changes (empty for deletes and no-ops)
    #[serde(default)]
    pub changes: Vec<AttributeChange>,

    /// Human readable reason for the action
    pub description: String,
}

impl Action {
    /// Key sent with every control plane call for this action
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.action_type, self.address)
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource in place
    Update,
    /// Delete then re-create a resource
    Replace,
    /// Delete a resource
    Delete,
    /// No changes needed
    NoOp,
}

impl ActionType {
    /// Marker shown in front of the address in plan output
    pub fn symbol(&self) -> &'static str {
        match self {
            ActionType::Create => "+",
            ActionType::Update => "~",
            ActionType::Replace => "-/+",
            ActionType::Delete => "-",
            ActionType::NoOp => " ",
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, ActionType::Replace | ActionType::Delete)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// A single attribute difference between the snapshot and the desired state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub attribute: String,

    /// Value recorded in the snapshot, if any
    pub before: Option<Value>,

    /// Desired value; `None` when removed or unknown
    pub after: Option<Value>,

    /// The desired value is only known after apply
    #[serde(default)]
    pub after_unknown: bool,

    /// Changing this attribute forces a replace
    #[serde(default)]
    pub forces_replacement: bool,
}

/// Plan containing all actions to be applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Actions ordered by level
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,

    /// Snapshot serial the plan was computed against
    pub snapshot_serial: u64,

    /// Whether this plan destroys everything in the snapshot
    #[serde(default)]
    pub destroy: bool,

    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(actions: Vec<Action>, snapshot_serial: u64) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            actions,
            has_changes,
            snapshot_serial,
            destroy: false,
            created_at: Utc::now(),
        }
    }

    pub fn empty(snapshot_serial: u64) -> Self {
        Self::new(Vec::new(), snapshot_serial)
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Get the action for a resource
    pub fn action(&self, address: &ResourceId) -> Option<&Action> {
        self.actions.iter().find(|a| &a.address == address)
    }

    /// Actions grouped by level, in execution order
    pub fn levels(&self) -> Vec<Vec<&Action>> {
        let mut levels: BTreeMap<usize, Vec<&Action>> = BTreeMap::new();
        for action in &self.actions {
            levels.entry(action.level).or_default().push(action);
        }
        levels.into_values().collect()
    }

    /// Address, action type and attribute changes of every action, by address
    ///
    /// Known values are part of it, so two plans with equal fingerprints
    /// write the same values.
    pub fn fingerprint(&self) -> Vec<(&ResourceId, ActionType, &[AttributeChange])> {
        let mut entries: Vec<_> = self
            .actions
            .iter()
            .map(|a| (&a.address, a.action_type, a.changes.as_slice()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            replace: self.actions_by_type(ActionType::Replace).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }

    /// Write the plan as JSON (for `site apply --plan`)
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.no_change
        )
    }
}

/// Result of applying a plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Successfully applied actions
    pub succeeded: Vec<ActionResult>,

    /// Failed actions
    pub failed: Vec<ActionResult>,

    /// Actions not attempted because a dependency failed or the run was cancelled
    pub skipped: Vec<ActionResult>,

    /// Whether the run was cancelled
    pub cancelled: bool,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled
    }

    pub fn add_success(&mut self, action: &Action, message: String) {
        self.succeeded.push(ActionResult::new(action, true, message, None));
    }

    pub fn add_failure(&mut self, action: &Action, error: String) {
        self.failed
            .push(ActionResult::new(action, false, String::new(), Some(error)));
    }

    pub fn add_skipped(&mut self, action: &Action, reason: String) {
        self.skipped
            .push(ActionResult::new(action, false, reason, None));
    }
}

/// Result of a single action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    /// Address of the resource
    pub address: ResourceId,

    pub action_type: ActionType,

    /// Whether the action succeeded
    pub success: bool,

    /// Success message or skip reason
    pub message: String,

    /// Error message if failed
    pub error: Option<String>,
}

impl ActionResult {
    fn new(action: &Action, success: bool, message: String, error: Option<String>) -> Self {
        Self {
            address: action.address.clone(),
            action_type: action.action_type,
            success,
            message,
            error,
        }
    }
}
