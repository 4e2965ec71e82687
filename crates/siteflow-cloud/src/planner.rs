//! Plan computation
//!
//! Diffs the desired site against the persisted snapshot and produces an
//! ordered [`Plan`]. Desired resources are planned level by level so that
//! references to resources still to be created resolve to *unknown*.

use crate::action::{Action, ActionType, AttributeChange, Plan};
use crate::error::{CloudError, Result};
use crate::provider::ControlPlane;
use crate::schema::ResourceSchema;
use crate::state::Snapshot;
use serde_json::Value;
use siteflow_core::{ID_ATTRIBUTE, Reference, Resource, ResourceGraph, ResourceId, Site, SiteError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Resolved attributes; `None` means known only after apply
pub type ResolvedAttributes = BTreeMap<String, Option<Value>>;

/// Computes plans against a control plane's schemas
pub struct Planner<'a> {
    plane: &'a dyn ControlPlane,
}

impl<'a> Planner<'a> {
    pub fn new(plane: &'a dyn ControlPlane) -> Self {
        Self { plane }
    }

    fn schema(&self, id: &ResourceId) -> Result<&'a ResourceSchema> {
        self.plane
            .schema(&id.resource_type)
            .ok_or_else(|| CloudError::UnknownResourceType(id.resource_type.clone()))
    }

    /// Check every declaration against its schema without a snapshot
    pub fn validate(&self, site: &Site) -> Result<()> {
        for (id, resource) in &site.resources {
            let schema = self.schema(id)?;
            let attributes = resolve(resource, &|_| None);
            schema.validate(id, &attributes)?;
        }
        self.check_references(site)
    }

    /// Every referenced attribute must be declared on its target, computed, or `id`
    fn check_references(&self, site: &Site) -> Result<()> {
        let from_resources = site.resources.iter().flat_map(|(id, resource)| {
            resource
                .attributes
                .values()
                .flat_map(|expr| expr.references())
                .map(move |r| (id.to_string(), r))
        });
        let from_outputs = site.outputs.values().flat_map(|output| {
            output
                .value
                .references()
                .into_iter()
                .map(move |r| (format!("output.{}", output.name), r))
        });

        for (from, reference) in from_resources.chain(from_outputs) {
            if reference.attribute == ID_ATTRIBUTE {
                continue;
            }
            let Some(target) = site.resource(&reference.target) else {
                return Err(SiteError::UnresolvedReference {
                    from,
                    target: reference.target.to_string(),
                }
                .into());
            };
            let schema = self.schema(&reference.target)?;
            if !target.attributes.contains_key(&reference.attribute)
                && !schema.is_computed(&reference.attribute)
            {
                return Err(CloudError::ValidationFailed {
                    resource: from,
                    message: format!(
                        "`{}` has no attribute `{}`",
                        reference.target, reference.attribute
                    ),
                });
            }
        }
        Ok(())
    }

    /// Plan converging the snapshot to the site
    pub fn plan(&self, site: &Site, graph: &ResourceGraph, snapshot: &Snapshot) -> Result<Plan> {
        self.check_references(site)?;
        let levels = graph.levels();
        let mut actions = Vec::new();
        // Resources whose attributes are unknown until apply
        let mut pending: BTreeSet<ResourceId> = BTreeSet::new();
        // Resolved inputs of resources planned for update
        let mut updated: HashMap<ResourceId, ResolvedAttributes> = HashMap::new();

        for (level, ids) in levels.iter().enumerate() {
            for id in ids {
                let Some(resource) = site.resource(id) else {
                    continue;
                };
                let schema = self.schema(id)?;

                let lookup = |reference: &Reference| -> Option<Value> {
                    if pending.contains(&reference.target) {
                        return None;
                    }
                    if let Some(inputs) = updated.get(&reference.target)
                        && let Some(value) = inputs.get(&reference.attribute)
                    {
                        return value.clone();
                    }
                    snapshot.lookup(reference)
                };
                let inputs = resolve(resource, &lookup);
                schema.validate(id, &inputs)?;

                let action = self.diff(resource, schema, &inputs, snapshot, level)?;
                debug!(resource = %id, action = %action.action_type, "Planned");

                match action.action_type {
                    ActionType::Create | ActionType::Replace => {
                        pending.insert(id.clone());
                    }
                    ActionType::Update => {
                        updated.insert(id.clone(), inputs);
                    }
                    _ => {}
                }
                actions.push(action);
            }
        }

        // Resources with no surviving declaration
        let orphans: BTreeSet<ResourceId> = snapshot
            .addresses()
            .into_iter()
            .filter(|id| !site.resources.contains_key(id))
            .collect();
        actions.extend(delete_actions(snapshot, orphans, levels.len())?);

        Ok(Plan::new(actions, snapshot.serial))
    }

    /// Plan deleting everything in the snapshot
    pub fn plan_destroy(&self, snapshot: &Snapshot) -> Result<Plan> {
        let all = snapshot.addresses().into_iter().collect();
        let mut plan = Plan::new(delete_actions(snapshot, all, 0)?, snapshot.serial);
        plan.destroy = true;
        Ok(plan)
    }

    fn diff(
        &self,
        resource: &Resource,
        schema: &ResourceSchema,
        inputs: &ResolvedAttributes,
        snapshot: &Snapshot,
        level: usize,
    ) -> Result<Action> {
        let id = &resource.id;
        let depends_on: Vec<ResourceId> = resource.dependencies().into_iter().collect();
        let action = |action_type: ActionType,
                      changes: Vec<AttributeChange>,
                      description: String| Action {
            address: id.clone(),
            action_type,
            level,
            depends_on: depends_on.clone(),
            changes,
            description,
        };

        let Some(prior) = snapshot.get(id) else {
            let changes = inputs
                .iter()
                .map(|(name, value)| AttributeChange {
                    attribute: name.clone(),
                    before: None,
                    after: value.clone(),
                    after_unknown: value.is_none(),
                    forces_replacement: false,
                })
                .collect();
            return Ok(action(
                ActionType::Create,
                changes,
                format!("{} will be created", id),
            ));
        };

        let names: BTreeSet<&String> = inputs.keys().chain(prior.inputs.keys()).collect();
        let mut changes = Vec::new();
        for name in names {
            // last-known remote value, so drift found by refresh is put back
            let before = prior
                .attributes
                .get(name)
                .or_else(|| prior.inputs.get(name));
            let (after, after_unknown) = match inputs.get(name) {
                Some(Some(value)) => (Some(value), false),
                Some(None) => (None, true),
                None => (None, false),
            };
            if !after_unknown && after == before {
                continue;
            }
            changes.push(AttributeChange {
                attribute: name.clone(),
                before: before.cloned(),
                after: after.cloned(),
                after_unknown,
                forces_replacement: schema.is_force_new(name),
            });
        }

        let (action_type, description) = if prior.is_tainted() {
            (
                ActionType::Replace,
                format!("{} is tainted and will be replaced", id),
            )
        } else if changes.is_empty() {
            (ActionType::NoOp, format!("{} is up to date", id))
        } else if let Some(change) = changes.iter().find(|c| c.forces_replacement) {
            (
                ActionType::Replace,
                format!(
                    "{} must be replaced (`{}` cannot change in place)",
                    id, change.attribute
                ),
            )
        } else {
            (ActionType::Update, format!("{} will be updated in place", id))
        };

        if action_type == ActionType::Replace && resource.lifecycle.prevent_destroy {
            return Err(CloudError::PreventDestroy {
                resource: id.to_string(),
                action: action_type.to_string(),
            });
        }

        Ok(action(action_type, changes, description))
    }
}

/// Evaluate every attribute of a declaration
fn resolve<F>(resource: &Resource, lookup: &F) -> ResolvedAttributes
where
    F: Fn(&Reference) -> Option<Value>,
{
    resource
        .attributes
        .iter()
        .map(|(name, expr)| (name.clone(), expr.evaluate(lookup)))
        .collect()
}

/// Delete actions for snapshot resources, dependents first, levels numbered from `base`
fn delete_actions(
    snapshot: &Snapshot,
    ids: BTreeSet<ResourceId>,
    base: usize,
) -> Result<Vec<Action>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let graph = snapshot.graph_of(ids)?;
    let mut actions = Vec::new();
    for (offset, level) in graph.reverse_levels().into_iter().enumerate() {
        for id in level {
            if snapshot.get(&id).is_some_and(|s| s.prevent_destroy) {
                return Err(CloudError::PreventDestroy {
                    resource: id.to_string(),
                    action: ActionType::Delete.to_string(),
                });
            }
            // A dependency may only go once its dependents are gone
            let depends_on = graph.dependents(&id).cloned().collect();
            actions.push(Action {
                description: format!("{} will be deleted", id),
                address: id,
                action_type: ActionType::Delete,
                level: base + offset,
                depends_on,
                changes: Vec::new(),
            });
        }
    }
    Ok(actions)
}
