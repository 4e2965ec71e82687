//! SiteFlow reconciler engine
//!
//! Computes and executes the operations that converge the actual state of
//! a site's resources to the state its KDL definition describes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 site CLI                     │
//! │        (plan / apply / destroy / refresh)    │
//! └──────────────────┬───────────────────────────┘
//!                    │
//! ┌──────────────────▼───────────────────────────┐
//! │               siteflow-cloud                 │
//! │  Planner ── diff Site against Snapshot       │
//! │  Reconciler ── levels, retries, drift guard  │
//! │  StateManager ── state.json + lock.json      │
//! │  trait ControlPlane { read/create/update/.. }│
//! └──────────────────┬───────────────────────────┘
//!                    │
//!          ┌─────────▼─────────┐
//!          │ siteflow-cloud-   │
//!          │ local (simulated) │
//!          └───────────────────┘
//! ```

pub mod action;
pub mod error;
pub mod outputs;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod schema;
pub mod state;

// Re-exports
pub use action::{Action, ActionResult, ActionType, ApplyResult, AttributeChange, Plan, PlanSummary};
pub use error::{CloudError, Result};
pub use outputs::evaluate_outputs;
pub use planner::{Planner, ResolvedAttributes};
pub use provider::{AuthStatus, ControlPlane, RemoteObject, Request, RetryConfig};
pub use reconciler::{CancelToken, Reconciler, ReconcilerOptions, RefreshReport, with_retry};
pub use schema::ResourceSchema;
pub use state::{
    LockInfo, OutputValue, ResourceState, ResourceStatus, Snapshot, StateLock, StateManager,
};
