//! End-to-end reconciliation against the local control plane

use async_trait::async_trait;
use serde_json::{Value, json};
use siteflow_cloud::{
    ActionType, AuthStatus, CancelToken, CloudError, ControlPlane, Reconciler, ReconcilerOptions,
    RemoteObject, Request, ResourceSchema, ResourceStatus, RetryConfig, StateManager,
};
use siteflow_cloud_local::LocalControlPlane;
use siteflow_core::{ResourceId, Site, parse_kdl_string};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;

fn site_kdl(bucket: &str, index_document: &str, with_policy: bool) -> String {
    let mut kdl = format!(
        r#"
        project "static-site"

        resource "s3-bucket" "site" {{
            bucket "{bucket}"
        }}

        resource "s3-bucket-website" "site" {{
            bucket "${{s3-bucket.site.id}}"
            index_document "{index_document}"
        }}

        resource "s3-bucket-public-access-block" "site" {{
            bucket "${{s3-bucket.site.id}}"
            block_public_policy #false
        }}

        resource "cloudfront-distribution" "cdn" {{
            origin_domain_name "${{s3-bucket-website.site.website_endpoint}}"
            origin_id "s3-website"
        }}

        output "cdn_domain" "${{cloudfront-distribution.cdn.domain_name}}"
        "#
    );
    if with_policy {
        kdl.push_str(
            r#"
        resource "s3-bucket-policy" "site" {
            bucket "${s3-bucket.site.id}"
            policy "{}"
            depends-on "s3-bucket-public-access-block.site"
        }
        "#,
        );
    }
    kdl
}

fn site(bucket: &str, index_document: &str, with_policy: bool) -> Site {
    parse_kdl_string(&site_kdl(bucket, index_document, with_policy), "test".to_string()).unwrap()
}

fn default_site() -> Site {
    site("my-site", "index.html", true)
}

fn id(address: &str) -> ResourceId {
    ResourceId::parse(address).unwrap()
}

fn fast_options() -> ReconcilerOptions {
    ReconcilerOptions {
        parallelism: 4,
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        },
        ..Default::default()
    }
}

/// Wraps the local plane and injects failures
struct Faulty {
    inner: LocalControlPlane,
    /// Next N creates fail with a retryable error
    transient_failures: AtomicU32,
    /// Next create succeeds remotely but reports a partial failure
    taint_next_create: AtomicBool,
    /// Creates of these types always fail
    broken_types: HashSet<String>,
}

impl Faulty {
    fn new(root: &Path) -> Self {
        Self {
            inner: local_plane(root),
            transient_failures: AtomicU32::new(0),
            taint_next_create: AtomicBool::new(false),
            broken_types: HashSet::new(),
        }
    }
}

#[async_trait]
impl ControlPlane for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    fn display_name(&self) -> &str {
        "Faulty"
    }

    fn schema(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.inner.schema(resource_type)
    }

    async fn check_auth(&self) -> siteflow_cloud::Result<AuthStatus> {
        self.inner.check_auth().await
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> siteflow_cloud::Result<Option<RemoteObject>> {
        self.inner.read(resource_type, id).await
    }

    async fn create(&self, request: &Request) -> siteflow_cloud::Result<RemoteObject> {
        if self.broken_types.contains(&request.resource_type) {
            return Err(CloudError::ApiError("InvalidArgument".to_string()));
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CloudError::Throttled("slow down".to_string()));
        }

        let object = self.inner.create(request).await?;
        if self.taint_next_create.swap(false, Ordering::SeqCst) {
            return Err(CloudError::PartiallyCreated {
                resource: format!("{}.{}", request.resource_type, request.name),
                id: object.id,
                message: "configuration step failed".to_string(),
            });
        }
        Ok(object)
    }

    async fn update(&self, id: &str, request: &Request) -> siteflow_cloud::Result<RemoteObject> {
        self.inner.update(id, request).await
    }

    async fn delete(
        &self,
        resource_type: &str,
        id: &str,
        idempotency_key: &str,
    ) -> siteflow_cloud::Result<()> {
        self.inner.delete(resource_type, id, idempotency_key).await
    }
}

fn local_plane(root: &Path) -> LocalControlPlane {
    LocalControlPlane::new(root.join(".siteflow").join("cloud.json"))
}

fn reconciler(root: &Path) -> Reconciler {
    Reconciler::new(Arc::new(local_plane(root)), StateManager::new(root)).with_options(fast_options())
}

fn faulty_reconciler(root: &Path, plane: Faulty) -> Reconciler {
    Reconciler::new(Arc::new(plane), StateManager::new(root)).with_options(fast_options())
}

async fn converge(root: &Path, site: &Site) {
    let reconciler = reconciler(root);
    let plan = reconciler.plan(site).await.unwrap();
    let result = reconciler
        .apply(site, &plan, &CancelToken::new())
        .await
        .unwrap();
    assert!(result.is_success(), "{:?}", result.failed);
}

fn action_type(plan: &siteflow_cloud::Plan, address: &str) -> ActionType {
    plan.action(&id(address)).unwrap().action_type
}

#[tokio::test]
async fn test_apply_converges_and_replans_empty() {
    let temp = TempDir::new().unwrap();
    let site = default_site();
    let reconciler = reconciler(temp.path());

    let plan = reconciler.plan(&site).await.unwrap();
    assert_eq!(plan.summary().create, 5);
    assert_eq!(plan.levels().len(), 3);

    let result = reconciler
        .apply(&site, &plan, &CancelToken::new())
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.succeeded.len(), 5);

    let snapshot = reconciler.state().load().await.unwrap();
    assert_eq!(snapshot.resources.len(), 5);
    let website = snapshot.get(&id("s3-bucket-website.site")).unwrap();
    assert_eq!(website.id, "my-site");
    assert_eq!(website.inputs["bucket"], json!("my-site"));

    let cdn = snapshot.get(&id("cloudfront-distribution.cdn")).unwrap();
    assert_eq!(
        cdn.inputs["origin_domain_name"],
        json!("my-site.s3-website-us-east-1.amazonaws.com")
    );
    assert_eq!(snapshot.outputs["cdn_domain"].value, cdn.attributes["domain_name"]);

    let objects = local_plane(temp.path()).objects().await.unwrap();
    assert_eq!(objects.len(), 5);

    let again = reconciler.plan(&site).await.unwrap();
    assert!(!again.has_changes);
    assert_eq!(again.summary().no_change, 5);
}

#[tokio::test]
async fn test_update_in_place() {
    let temp = TempDir::new().unwrap();
    converge(temp.path(), &default_site()).await;

    let changed = site("my-site", "home.html", true);
    let reconciler = reconciler(temp.path());
    let plan = reconciler.plan(&changed).await.unwrap();
    assert_eq!(action_type(&plan, "s3-bucket-website.site"), ActionType::Update);
    assert_eq!(action_type(&plan, "cloudfront-distribution.cdn"), ActionType::NoOp);

    let result = reconciler
        .apply(&changed, &plan, &CancelToken::new())
        .await
        .unwrap();
    assert!(result.is_success());

    let remote = local_plane(temp.path())
        .read("s3-bucket-website", "my-site")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remote.attributes["index_document"], json!("home.html"));
}

#[tokio::test]
async fn test_force_new_change_replaces_dependents() {
    let temp = TempDir::new().unwrap();
    converge(temp.path(), &default_site()).await;

    let renamed = site("renamed-site", "index.html", true);
    let reconciler = reconciler(temp.path());
    let plan = reconciler.plan(&renamed).await.unwrap();

    assert_eq!(action_type(&plan, "s3-bucket.site"), ActionType::Replace);
    assert_eq!(action_type(&plan, "s3-bucket-website.site"), ActionType::Replace);
    assert_eq!(action_type(&plan, "s3-bucket-policy.site"), ActionType::Replace);
    assert_eq!(
        action_type(&plan, "cloudfront-distribution.cdn"),
        ActionType::Update
    );

    let result = reconciler
        .apply(&renamed, &plan, &CancelToken::new())
        .await
        .unwrap();
    assert!(result.is_success(), "{:?}", result.failed);

    let plane = local_plane(temp.path());
    assert!(plane.read("s3-bucket", "my-site").await.unwrap().is_none());
    assert!(plane.read("s3-bucket", "renamed-site").await.unwrap().is_some());

    let snapshot = reconciler.state().load().await.unwrap();
    let cdn = snapshot.get(&id("cloudfront-distribution.cdn")).unwrap();
    assert_eq!(
        cdn.inputs["origin_domain_name"],
        json!("renamed-site.s3-website-us-east-1.amazonaws.com")
    );
    assert!(!reconciler.plan(&renamed).await.unwrap().has_changes);
}

#[tokio::test]
async fn test_removed_declaration_is_deleted() {
    let temp = TempDir::new().unwrap();
    converge(temp.path(), &default_site()).await;

    let without_policy = site("my-site", "index.html", false);
    let reconciler = reconciler(temp.path());
    let plan = reconciler.plan(&without_policy).await.unwrap();
    assert_eq!(plan.summary().delete, 1);
    assert_eq!(action_type(&plan, "s3-bucket-policy.site"), ActionType::Delete);

    reconciler
        .apply(&without_policy, &plan, &CancelToken::new())
        .await
        .unwrap();

    let plane = local_plane(temp.path());
    assert!(plane.read("s3-bucket-policy", "my-site").await.unwrap().is_none());
    let snapshot = reconciler.state().load().await.unwrap();
    assert!(snapshot.get(&id("s3-bucket-policy.site")).is_none());
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let temp = TempDir::new().unwrap();
    let plane = Faulty::new(temp.path());
    plane.transient_failures.store(2, Ordering::SeqCst);

    let site = default_site();
    let reconciler = faulty_reconciler(temp.path(), plane);
    let plan = reconciler.plan(&site).await.unwrap();
    let result = reconciler
        .apply(&site, &plan, &CancelToken::new())
        .await
        .unwrap();

    assert!(result.is_success(), "{:?}", result.failed);
}

#[tokio::test]
async fn test_failure_skips_dependents_and_keeps_progress() {
    let temp = TempDir::new().unwrap();
    let mut plane = Faulty::new(temp.path());
    plane.broken_types.insert("s3-bucket-website".to_string());

    let site = default_site();
    let reconciler = faulty_reconciler(temp.path(), plane);
    let plan = reconciler.plan(&site).await.unwrap();
    let result = reconciler
        .apply(&site, &plan, &CancelToken::new())
        .await
        .unwrap();

    assert!(!result.is_success());
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].address, id("s3-bucket-website.site"));
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].address, id("cloudfront-distribution.cdn"));

    // independent branches still completed and were recorded
    let snapshot = reconciler.state().load().await.unwrap();
    let recorded: Vec<String> = snapshot.resources.keys().cloned().collect();
    assert_eq!(
        recorded,
        vec![
            "s3-bucket-policy.site",
            "s3-bucket-public-access-block.site",
            "s3-bucket.site",
        ]
    );
    assert!(snapshot.outputs.is_empty());

    // a clean run finishes the rest
    converge(temp.path(), &site).await;
    let snapshot = reconciler.state().load().await.unwrap();
    assert_eq!(snapshot.resources.len(), 5);
}

#[tokio::test]
async fn test_partial_create_is_tainted_then_replaced() {
    let temp = TempDir::new().unwrap();
    let plane = Faulty::new(temp.path());
    plane.taint_next_create.store(true, Ordering::SeqCst);

    let site = default_site();
    let reconciler = faulty_reconciler(temp.path(), plane);
    let plan = reconciler.plan(&site).await.unwrap();
    let result = reconciler
        .apply(&site, &plan, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].address, id("s3-bucket.site"));
    assert_eq!(result.skipped.len(), 4);

    let snapshot = reconciler.state().load().await.unwrap();
    let bucket = snapshot.get(&id("s3-bucket.site")).unwrap();
    assert_eq!(bucket.status, ResourceStatus::Tainted);
    assert_eq!(bucket.id, "my-site");

    let plan = reconciler.plan(&site).await.unwrap();
    assert_eq!(action_type(&plan, "s3-bucket.site"), ActionType::Replace);

    let result = reconciler
        .apply(&site, &plan, &CancelToken::new())
        .await
        .unwrap();
    assert!(result.is_success(), "{:?}", result.failed);
    let snapshot = reconciler.state().load().await.unwrap();
    assert!(!snapshot.get(&id("s3-bucket.site")).unwrap().is_tainted());
}

#[tokio::test]
async fn test_stale_plan_is_rejected() {
    let temp = TempDir::new().unwrap();
    let site = default_site();
    let reconciler = reconciler(temp.path());

    let plan = reconciler.plan(&site).await.unwrap();
    reconciler
        .apply(&site, &plan, &CancelToken::new())
        .await
        .unwrap();

    let err = reconciler
        .apply(&site, &plan, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::RemoteConflict(_)));
}

#[tokio::test]
async fn test_plan_for_other_site_is_rejected() {
    let temp = TempDir::new().unwrap();
    let reconciler = reconciler(temp.path());

    let plan = reconciler.plan(&default_site()).await.unwrap();
    let other = site("my-site", "index.html", false);
    let err = reconciler
        .apply(&other, &plan, &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::RemoteConflict(_)));
    assert!(local_plane(temp.path()).objects().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_out_of_band_change_blocks_update() {
    let temp = TempDir::new().unwrap();
    converge(temp.path(), &default_site()).await;

    local_plane(temp.path())
        .modify_out_of_band(
            "s3-bucket-website",
            "my-site",
            "error_document",
            Value::from("oops.html"),
        )
        .await
        .unwrap();

    let changed = site("my-site", "home.html", true);
    let reconciler = reconciler(temp.path());
    let plan = reconciler.plan(&changed).await.unwrap();
    let err = reconciler
        .apply(&changed, &plan, &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::RemoteConflict(_)));
    let remote = local_plane(temp.path())
        .read("s3-bucket-website", "my-site")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remote.attributes["index_document"], json!("index.html"));
}

#[tokio::test]
async fn test_refresh_detects_drift_and_removal() {
    let temp = TempDir::new().unwrap();
    let site = default_site();
    converge(temp.path(), &site).await;

    let plane = local_plane(temp.path());
    plane
        .modify_out_of_band("s3-bucket", "my-site", "versioning", json!(true))
        .await
        .unwrap();
    plane
        .delete_out_of_band("s3-bucket-public-access-block", "my-site")
        .await
        .unwrap();

    let reconciler = reconciler(temp.path());
    let report = reconciler.refresh().await.unwrap();
    assert_eq!(report.checked, 5);
    assert_eq!(report.drifted, vec![id("s3-bucket.site")]);
    assert_eq!(report.removed, vec![id("s3-bucket-public-access-block.site")]);

    let plan = reconciler.plan(&site).await.unwrap();
    assert_eq!(
        action_type(&plan, "s3-bucket-public-access-block.site"),
        ActionType::Create
    );
    assert_eq!(action_type(&plan, "s3-bucket.site"), ActionType::NoOp);
}

#[tokio::test]
async fn test_drift_in_declared_attribute_is_put_back() {
    let temp = TempDir::new().unwrap();
    let site = default_site();
    converge(temp.path(), &site).await;

    let plane = local_plane(temp.path());
    plane
        .modify_out_of_band(
            "s3-bucket-website",
            "my-site",
            "index_document",
            json!("hacked.html"),
        )
        .await
        .unwrap();

    let reconciler = reconciler(temp.path());
    let report = reconciler.refresh().await.unwrap();
    assert_eq!(report.drifted, vec![id("s3-bucket-website.site")]);

    let plan = reconciler.plan(&site).await.unwrap();
    let website = plan.action(&id("s3-bucket-website.site")).unwrap();
    assert_eq!(website.action_type, ActionType::Update);
    assert_eq!(website.changes[0].attribute, "index_document");
    assert_eq!(website.changes[0].before, Some(json!("hacked.html")));
    assert_eq!(website.changes[0].after, Some(json!("index.html")));

    let result = reconciler
        .apply(&site, &plan, &CancelToken::new())
        .await
        .unwrap();
    assert!(result.is_success(), "{:?}", result.failed);

    let remote = plane.read("s3-bucket-website", "my-site").await.unwrap().unwrap();
    assert_eq!(remote.attributes["index_document"], json!("index.html"));
    assert!(!reconciler.plan(&site).await.unwrap().has_changes);
}

#[tokio::test]
async fn test_saved_plan_with_other_values_is_rejected() {
    let temp = TempDir::new().unwrap();
    converge(temp.path(), &default_site()).await;

    let reconciler = reconciler(temp.path());
    let reviewed = reconciler
        .plan(&site("my-site", "home.html", true))
        .await
        .unwrap();
    let saved = temp.path().join("site.plan.json");
    reviewed.save(&saved).await.unwrap();
    let loaded = siteflow_cloud::Plan::load(&saved).await.unwrap();

    // same actions, different value than the one reviewed
    let edited = site("my-site", "other.html", true);
    let err = reconciler
        .apply(&edited, &loaded, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::RemoteConflict(_)));

    let remote = local_plane(temp.path())
        .read("s3-bucket-website", "my-site")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remote.attributes["index_document"], json!("index.html"));

    let applied = reconciler
        .apply(&site("my-site", "home.html", true), &loaded, &CancelToken::new())
        .await
        .unwrap();
    assert!(applied.is_success(), "{:?}", applied.failed);
}

#[tokio::test]
async fn test_cancelled_run_does_nothing() {
    let temp = TempDir::new().unwrap();
    let site = default_site();
    let reconciler = reconciler(temp.path());
    let plan = reconciler.plan(&site).await.unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = reconciler.apply(&site, &plan, &cancel).await.unwrap();

    assert!(result.cancelled);
    assert!(result.succeeded.is_empty());
    assert_eq!(result.skipped.len(), 5);
    assert!(local_plane(temp.path()).objects().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_held_lock_blocks_apply() {
    let temp = TempDir::new().unwrap();
    let site = default_site();
    let reconciler = reconciler(temp.path());
    let plan = reconciler.plan(&site).await.unwrap();

    let lock = reconciler
        .state()
        .acquire_lock("apply", Duration::from_secs(3600))
        .await
        .unwrap();
    let err = reconciler
        .apply(&site, &plan, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::LockError(_)));

    lock.release().await.unwrap();
    assert!(
        reconciler
            .apply(&site, &plan, &CancelToken::new())
            .await
            .unwrap()
            .is_success()
    );
}

#[tokio::test]
async fn test_destroy_removes_everything() {
    let temp = TempDir::new().unwrap();
    let site = default_site();
    converge(temp.path(), &site).await;

    let reconciler = reconciler(temp.path());
    let plan = reconciler.plan_destroy().await.unwrap();
    assert_eq!(plan.summary().delete, 5);
    assert!(matches!(
        reconciler.apply(&site, &plan, &CancelToken::new()).await,
        Err(CloudError::InvalidConfig(_))
    ));

    let result = reconciler
        .destroy(&plan, &CancelToken::new())
        .await
        .unwrap();
    assert!(result.is_success(), "{:?}", result.failed);

    let snapshot = reconciler.state().load().await.unwrap();
    assert!(snapshot.resources.is_empty());
    assert!(snapshot.outputs.is_empty());
    assert!(local_plane(temp.path()).objects().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_prevent_destroy_blocks_destroy() {
    let temp = TempDir::new().unwrap();
    let kdl = r#"
        resource "s3-bucket" "site" {
            bucket "keep-me"
            lifecycle {
                prevent-destroy #true
            }
        }
    "#;
    let site = parse_kdl_string(kdl, "test".to_string()).unwrap();
    converge(temp.path(), &site).await;

    let err = reconciler(temp.path()).plan_destroy().await.unwrap_err();
    assert!(matches!(err, CloudError::PreventDestroy { .. }));
}

#[tokio::test]
async fn test_parallelism_one_still_converges() {
    let temp = TempDir::new().unwrap();
    let site = default_site();
    let plane = local_plane(temp.path()).with_latency(Duration::from_millis(2));
    let reconciler = Reconciler::new(Arc::new(plane), StateManager::new(temp.path()))
        .with_options(ReconcilerOptions {
            parallelism: 1,
            ..fast_options()
        });

    let plan = reconciler.plan(&site).await.unwrap();
    let result = reconciler
        .apply(&site, &plan, &CancelToken::new())
        .await
        .unwrap();
    assert!(result.is_success());
}
