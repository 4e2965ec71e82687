//! Per-type resource schemas

use crate::error::{CloudError, Result};
use serde_json::Value;
use siteflow_core::ResourceId;
use std::collections::BTreeMap;

/// What a control plane knows about one resource type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSchema {
    pub resource_type: String,

    /// Attributes that must be declared
    pub required: Vec<String>,

    /// Attributes the control plane cannot change in place
    pub force_new: Vec<String>,

    /// Attributes assigned by the control plane
    pub computed: Vec<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    pub fn required(mut self, attributes: &[&str]) -> Self {
        self.required = to_strings(attributes);
        self
    }

    pub fn force_new(mut self, attributes: &[&str]) -> Self {
        self.force_new = to_strings(attributes);
        self
    }

    pub fn computed(mut self, attributes: &[&str]) -> Self {
        self.computed = to_strings(attributes);
        self
    }

    pub fn is_force_new(&self, attribute: &str) -> bool {
        self.force_new.iter().any(|a| a == attribute)
    }

    pub fn is_computed(&self, attribute: &str) -> bool {
        self.computed.iter().any(|a| a == attribute)
    }

    /// Check declared attributes; values may still be unknown (`None`)
    pub fn validate(
        &self,
        address: &ResourceId,
        attributes: &BTreeMap<String, Option<Value>>,
    ) -> Result<()> {
        let invalid = |message: String| CloudError::ValidationFailed {
            resource: address.to_string(),
            message,
        };

        for name in &self.required {
            if !attributes.contains_key(name) {
                return Err(invalid(format!("missing required attribute `{}`", name)));
            }
        }
        for name in attributes.keys() {
            if self.is_computed(name) {
                return Err(invalid(format!(
                    "`{}` is computed by the control plane and cannot be set",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn to_strings(attributes: &[&str]) -> Vec<String> {
    attributes.iter().map(|s| s.to_string()).collect()
}
