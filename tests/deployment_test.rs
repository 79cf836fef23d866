//! Orchestrator scenarios against in-memory collaborators.
//!
//! Every test drives the full `init` + `deploy` path with real project trees
//! in a temp directory; only the external systems are faked.

mod support;

use deploy_tool::progress::ProgressEvent;
use deploy_tool::{
    CloudGateway, DeployError, DeploymentRecord, DeploymentStore, Environment, FrameworkVariant,
    GatewayError, LifecycleStatus, ProjectId, ProvisioningFailure, ResourceHandle, ResourceKind,
    ResourceSpec, ResourceStatus, StrategyKind,
};
use support::{Harness, PUBLIC_ADDRESS, VITE_MANIFEST};

use ResourceKind::{BucketPolicy, ComputeInstance, KeyPair, ObjectStoreBucket, SecurityGroup};

fn stages(history: &[deploy_tool::DeploymentRecord]) -> Vec<LifecycleStatus> {
    let mut stages: Vec<LifecycleStatus> = history.iter().map(|r| r.status).collect();
    stages.dedup();
    stages
}

#[tokio::test]
async fn test_react_project_is_exposed_as_static_site() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();

    let project = orchestrator.init(&h.react_project()).await.unwrap();
    assert_eq!(project.detection.framework, FrameworkVariant::React);
    assert!(project.origin.is_none());

    let record = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap();

    assert_eq!(record.status, LifecycleStatus::Exposed);
    assert_eq!(record.strategy, StrategyKind::StaticSite);
    assert_eq!(record.resource_kinds(), vec![ObjectStoreBucket, BucketPolicy]);
    assert!(record
        .resources
        .iter()
        .all(|h| h.status == ResourceStatus::Active));

    let bucket = record.resources[0].external_id.clone();
    assert!(bucket.starts_with("static-site-staging-"));
    assert_eq!(
        record.public_url.as_deref(),
        Some(format!("http://{}.s3-website.ap-south-1.amazonaws.com", bucket).as_str())
    );

    assert_eq!(h.builder.commands(), vec!["npm install", "npm run build"]);
    let uploads = h.gateway.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, bucket);
    assert!(uploads[0].1.ends_with("build"));

    let stored = h
        .store
        .load(&project.id, Environment::Staging)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn test_lifecycle_is_saved_at_every_stage() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    let project = orchestrator.init(&h.react_project()).await.unwrap();

    orchestrator
        .deploy(&project.id, Environment::Dev)
        .await
        .unwrap();

    assert_eq!(
        stages(&h.store.history()),
        vec![
            LifecycleStatus::Detected,
            LifecycleStatus::Building,
            LifecycleStatus::Provisioning,
            LifecycleStatus::Deploying,
            LifecycleStatus::Exposed,
        ]
    );
}

#[tokio::test]
async fn test_vite_project_uploads_dist() {
    let h = Harness::with_output_dir("dist");
    h.write("package.json", VITE_MANIFEST);
    h.write("vite.config.ts", "export default {};\n");
    let orchestrator = h.orchestrator();

    let project = orchestrator.init(&h.source()).await.unwrap();
    assert_eq!(project.detection.framework, FrameworkVariant::ReactVite);

    orchestrator
        .deploy(&project.id, Environment::Dev)
        .await
        .unwrap();
    let uploads = h.gateway.uploads();
    assert!(uploads[0].1.ends_with("dist"));
}

#[tokio::test]
async fn test_nextjs_project_runs_on_a_host() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    let project = orchestrator.init(&h.nextjs_project()).await.unwrap();
    assert_eq!(project.detection.framework, FrameworkVariant::NextJs);

    let record = orchestrator
        .deploy(&project.id, Environment::Prod)
        .await
        .unwrap();

    assert_eq!(record.status, LifecycleStatus::Exposed);
    assert_eq!(record.strategy, StrategyKind::ContainerizedHost);
    assert_eq!(
        record.resource_kinds(),
        vec![ComputeInstance, SecurityGroup, KeyPair]
    );
    assert_eq!(
        record.public_url.as_deref(),
        Some(format!("http://{}:3000", PUBLIC_ADDRESS).as_str())
    );

    // no local build; the host builds from the generated descriptor
    assert!(h.builder.commands().is_empty());
    assert!(h.project_root().join("Dockerfile").is_file());
    let deployments = h.remote.deployments();
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].0, PUBLIC_ADDRESS);
    assert!(deployments[0].1.ends_with("Dockerfile"));
}

#[tokio::test]
async fn test_failed_policy_leaves_only_the_bucket() {
    let h = Harness::new();
    h.gateway.fail_create(
        BucketPolicy,
        GatewayError::PermissionDenied("AccessDenied".to_string()),
    );
    let orchestrator = h.orchestrator();
    let project = orchestrator.init(&h.react_project()).await.unwrap();

    let err = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::ProvisioningFailed {
            kind: BucketPolicy,
            failure: ProvisioningFailure::PermissionDenied,
            ..
        }
    ));
    assert_eq!(err.exit_code(), 4);

    let record = h
        .store
        .load(&project.id, Environment::Staging)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, LifecycleStatus::Failed);
    assert_eq!(record.resource_kinds(), vec![ObjectStoreBucket]);
    assert_eq!(record.resources[0].status, ResourceStatus::Active);
    let failure = record.last_error.unwrap();
    assert_eq!(failure.code, "E_PROVISIONING_FAILED");
    assert_eq!(failure.stage, LifecycleStatus::Provisioning);
    assert!(record.public_url.is_none());
}

#[tokio::test]
async fn test_records_never_track_more_than_was_created() {
    let h = Harness::new();
    h.gateway.fail_create(
        KeyPair,
        GatewayError::QuotaExceeded("KeyPairLimitExceeded".to_string()),
    );
    let orchestrator = h.orchestrator();
    let project = orchestrator.init(&h.nextjs_project()).await.unwrap();

    orchestrator
        .deploy(&project.id, Environment::Prod)
        .await
        .unwrap_err();

    for snapshot in h.store.history() {
        let confirmed = snapshot
            .resources
            .iter()
            .filter(|r| r.status == ResourceStatus::Active)
            .count();
        assert!(confirmed <= h.gateway.live_kinds().len());
    }

    // the security group was created in the same wave and is kept
    let record = h
        .store
        .load(&project.id, Environment::Prod)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.resource_kinds(), vec![ComputeInstance, SecurityGroup]);
    assert_eq!(h.gateway.live_kinds(), vec![ComputeInstance, SecurityGroup]);
}

#[tokio::test]
async fn test_concurrent_deploy_is_rejected() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    let project = orchestrator.init(&h.react_project()).await.unwrap();
    let (entered, release) = h.builder.hold();

    let first = {
        let orchestrator = h.orchestrator();
        let id = project.id.clone();
        tokio::spawn(async move { orchestrator.deploy(&id, Environment::Dev).await })
    };
    entered.notified().await;

    let err = orchestrator
        .deploy(&project.id, Environment::Dev)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::DeploymentInProgress { .. }));
    assert_eq!(err.exit_code(), 7);

    // other environments are independent
    let (_, staging_release) = h.builder.hold();
    staging_release.notify_one();
    orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap();

    release.notify_one();
    let record = first.await.unwrap().unwrap();
    assert_eq!(record.status, LifecycleStatus::Exposed);
    assert_eq!(record.resource_kinds(), vec![ObjectStoreBucket, BucketPolicy]);
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    let source = h.react_project();

    let first = orchestrator.init(&source).await.unwrap();
    let second = orchestrator.init(&source).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_init_picks_up_a_changed_tree() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    let source = h.react_project();
    orchestrator.init(&source).await.unwrap();

    h.write("vite.config.js", "export default {};\n");
    let project = orchestrator.init(&source).await.unwrap();
    assert_eq!(project.detection.framework, FrameworkVariant::ReactVite);
}

#[tokio::test]
async fn test_init_of_unsupported_tree_fails() {
    let h = Harness::new();
    h.write("README.md", "# notes\n");
    let err = h.orchestrator().init(&h.source()).await.unwrap_err();
    assert!(matches!(err, DeployError::UnsupportedFramework { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_init_from_remote_origin() {
    let h = Harness::new();
    let origin = "https://github.com/acme/shop.git";

    let project = h.orchestrator().init(origin).await.unwrap();

    assert_eq!(h.fetcher.origins(), vec![origin]);
    assert_eq!(project.origin.as_deref(), Some(origin));
    assert!(project.id.as_str().starts_with("shop-"));
    assert!(project.root.ends_with("source"));
    assert!(project.root.join("package.json").is_file());
    assert!(!project.root.join(".git").exists());
    assert_eq!(project.detection.framework, FrameworkVariant::React);
}

#[tokio::test]
async fn test_deploy_requires_init() {
    let h = Harness::new();
    let err = h
        .orchestrator()
        .deploy(&deploy_tool::ProjectId::new("ghost"), Environment::Dev)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::ProjectNotInitialized(_)));
}

#[tokio::test]
async fn test_redeploy_reuses_resources() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    let project = orchestrator.init(&h.react_project()).await.unwrap();

    let first = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap();
    let second = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap();

    assert_eq!(second.status, LifecycleStatus::Exposed);
    assert_eq!(second.resources, first.resources);
    assert_eq!(second.public_url, first.public_url);
    assert_eq!(h.gateway.creates(), vec![ObjectStoreBucket, BucketPolicy]);
    assert_eq!(h.gateway.uploads().len(), 2);
    assert_eq!(h.builder.commands().len(), 4);

    let reused = h
        .events
        .events()
        .iter()
        .filter(|e| matches!(e, ProgressEvent::ResourceReused { .. }))
        .count();
    assert_eq!(reused, 2);
}

#[tokio::test]
async fn test_failed_upload_resumes_without_rebuilding() {
    let h = Harness::new();
    h.gateway
        .fail_upload(GatewayError::Other("connection reset by peer".to_string()));
    let orchestrator = h.orchestrator();
    let project = orchestrator.init(&h.react_project()).await.unwrap();

    let err = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::DeployFailed(_)));
    let failed = h
        .store
        .load(&project.id, Environment::Staging)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.failed_stage(), Some(LifecycleStatus::Deploying));
    assert_eq!(failed.resources.len(), 2);

    h.gateway.heal();
    let record = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap();

    assert_eq!(record.status, LifecycleStatus::Exposed);
    assert!(record.last_error.is_none());
    assert_eq!(record.resources, failed.resources);
    assert_eq!(h.builder.commands().len(), 2);
    assert_eq!(h.gateway.creates().len(), 2);
    assert_eq!(h.gateway.uploads().len(), 1);

    let reused: Vec<_> = h
        .events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ProgressEvent::ArtifactsReused { path, failed_stage } => Some((path, failed_stage)),
            _ => None,
        })
        .collect();
    assert_eq!(reused.len(), 1);
    assert_eq!(reused[0].0, project.root.join("build"));
    assert_eq!(reused[0].1, LifecycleStatus::Deploying);
}

#[tokio::test]
async fn test_interrupted_run_is_failed_then_resumed() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    let project = orchestrator.init(&h.react_project()).await.unwrap();
    h.write("build/index.html", "<!doctype html>\n");

    // a process died mid-provisioning after its bucket was confirmed
    let bucket_name = "shop-staging-site";
    let bucket_id = h
        .gateway
        .create(
            ObjectStoreBucket,
            &ResourceSpec {
                name: bucket_name.to_string(),
                region: "ap-south-1".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let mut bucket = ResourceHandle::intent(ObjectStoreBucket, bucket_name, "ap-south-1");
    bucket.external_id = bucket_id.clone();
    bucket.status = ResourceStatus::Active;
    let mut stale = DeploymentRecord::new(
        project.id.clone(),
        Environment::Staging,
        project.detection.clone(),
        StrategyKind::StaticSite,
    );
    stale.status = LifecycleStatus::Provisioning;
    stale.track(bucket);
    h.store.save(&stale).await.unwrap();
    let before = h.store.history().len();

    let record = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap();

    let history = h.store.history();
    let recovered = &history[before];
    assert_eq!(recovered.status, LifecycleStatus::Failed);
    let failure = recovered.last_error.as_ref().unwrap();
    assert_eq!(failure.stage, LifecycleStatus::Provisioning);
    assert_eq!(failure.code, "E_CANCELLED");

    assert_eq!(record.status, LifecycleStatus::Exposed);
    assert_eq!(record.resource_kinds(), vec![ObjectStoreBucket, BucketPolicy]);
    assert_eq!(record.resources[0].external_id, bucket_id);
    assert_eq!(h.gateway.creates(), vec![ObjectStoreBucket, BucketPolicy]);
    assert!(h.builder.commands().is_empty());
    assert_eq!(h.gateway.uploads(), vec![(bucket_id, project.root.join("build"))]);
}

#[tokio::test]
async fn test_failed_build_is_rerun() {
    let h = Harness::new();
    h.builder.fail_with("npm ERR! Missing script: \"build\"");
    let orchestrator = h.orchestrator();
    let project = orchestrator.init(&h.react_project()).await.unwrap();

    let err = orchestrator
        .deploy(&project.id, Environment::Dev)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::BuildFailed(_)));
    assert_eq!(err.exit_code(), 3);
    assert!(h.gateway.creates().is_empty());

    let failed = h
        .store
        .load(&project.id, Environment::Dev)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.failed_stage(), Some(LifecycleStatus::Building));
    assert!(failed.resources.is_empty());

    h.builder.succeed();
    let record = orchestrator
        .deploy(&project.id, Environment::Dev)
        .await
        .unwrap();
    assert_eq!(record.status, LifecycleStatus::Exposed);
    assert_eq!(h.builder.commands().len(), 3);
}

#[tokio::test]
async fn test_lost_create_reply_is_recorded_and_adopted() {
    let h = Harness::new();
    h.gateway.lose_reply(BucketPolicy);
    let orchestrator = h.orchestrator();
    let project = orchestrator.init(&h.react_project()).await.unwrap();

    let err = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::ProvisioningFailed {
            failure: ProvisioningFailure::Timeout,
            ..
        }
    ));

    let failed = h
        .store
        .load(&project.id, Environment::Staging)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.resource_kinds(), vec![ObjectStoreBucket, BucketPolicy]);
    assert_eq!(failed.resources[1].status, ResourceStatus::Orphaned);
    assert_eq!(failed.resources[1].external_id, failed.resources[0].external_id);

    h.gateway.heal();
    let record = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap();
    assert_eq!(record.status, LifecycleStatus::Exposed);
    assert!(record
        .resources
        .iter()
        .all(|r| r.status == ResourceStatus::Active));
    assert_eq!(h.gateway.creates(), vec![ObjectStoreBucket, BucketPolicy]);
}

#[tokio::test]
async fn test_half_created_bucket_is_configured_on_adoption() {
    let h = Harness::new();
    h.gateway.lose_reply(ObjectStoreBucket);
    let orchestrator = h.orchestrator();
    let project = orchestrator.init(&h.react_project()).await.unwrap();

    let err = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::ProvisioningFailed {
            failure: ProvisioningFailure::Timeout,
            ..
        }
    ));
    let failed = h
        .store
        .load(&project.id, Environment::Staging)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.resources[0].status, ResourceStatus::Orphaned);
    let bucket_id = failed.resources[0].external_id.clone();
    assert!(!h.gateway.is_configured(ObjectStoreBucket, &bucket_id));

    h.gateway.heal();
    let record = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap();

    assert_eq!(record.status, LifecycleStatus::Exposed);
    assert_eq!(record.resources[0].external_id, bucket_id);
    assert!(h
        .gateway
        .configures()
        .contains(&(ObjectStoreBucket, bucket_id.clone())));
    assert!(h.gateway.is_configured(ObjectStoreBucket, &bucket_id));
    assert_eq!(h.gateway.creates(), vec![ObjectStoreBucket, BucketPolicy]);
    assert_eq!(h.gateway.uploads().len(), 1);
}

#[tokio::test]
async fn test_bucket_that_cannot_be_configured_stays_unconfirmed() {
    let h = Harness::new();
    h.gateway.lose_reply(ObjectStoreBucket);
    let orchestrator = h.orchestrator();
    let project = orchestrator.init(&h.react_project()).await.unwrap();
    orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap_err();

    h.gateway.heal();
    h.gateway.fail_configure(
        ObjectStoreBucket,
        GatewayError::PermissionDenied("AccessDenied: s3:PutBucketPolicy".to_string()),
    );
    let err = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::ProvisioningFailed {
            failure: ProvisioningFailure::PermissionDenied,
            ..
        }
    ));

    let record = h
        .store
        .load(&project.id, Environment::Staging)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, LifecycleStatus::Failed);
    assert_eq!(record.resource_kinds(), vec![ObjectStoreBucket]);
    assert_ne!(record.resources[0].status, ResourceStatus::Active);
    assert_eq!(h.gateway.creates(), vec![ObjectStoreBucket]);
    assert!(h.gateway.uploads().is_empty());
}

#[tokio::test]
async fn test_init_waits_for_running_deploys_of_a_remote_project() {
    let h = Harness::new();
    let origin = "https://github.com/acme/shop.git";
    let lock = h
        .store
        .try_lock(&ProjectId::derive(origin), Environment::Prod)
        .await
        .unwrap();

    let err = h.orchestrator().init(origin).await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::DeploymentInProgress {
            environment: Environment::Prod,
            ..
        }
    ));
    assert_eq!(err.exit_code(), 7);
    assert!(h.fetcher.origins().is_empty());

    drop(lock);
    let project = h.orchestrator().init(origin).await.unwrap();
    assert_eq!(h.fetcher.origins(), vec![origin]);

    // the locks taken for the fetch are released once init returns
    let record = h
        .orchestrator()
        .deploy(&project.id, Environment::Prod)
        .await
        .unwrap();
    assert_eq!(record.status, LifecycleStatus::Exposed);
}

#[tokio::test]
async fn test_strategy_change_requires_rollback() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    let source = h.react_project();
    let project = orchestrator.init(&source).await.unwrap();
    let exposed = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap();

    h.write("next.config.js", "module.exports = {};\n");

    let err = orchestrator
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::StrategyMismatch { .. }));
    assert_eq!(err.exit_code(), 6);

    let stored = h
        .store
        .load(&project.id, Environment::Staging)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, exposed);

    let err = orchestrator.init(&source).await.unwrap_err();
    assert!(matches!(err, DeployError::StrategyMismatch { .. }));
}

#[tokio::test]
async fn test_cancelled_build_fails_the_record() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    let project = orchestrator.init(&h.react_project()).await.unwrap();
    let (entered, _release) = h.builder.hold();

    let run = {
        let orchestrator = h.orchestrator();
        let id = project.id.clone();
        tokio::spawn(async move { orchestrator.deploy(&id, Environment::Dev).await })
    };
    entered.notified().await;
    h.cancel.cancel();

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, DeployError::Cancelled(_)));
    assert_eq!(err.exit_code(), 130);

    let record = h
        .store
        .load(&project.id, Environment::Dev)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, LifecycleStatus::Failed);
    assert_eq!(record.failed_stage(), Some(LifecycleStatus::Building));
}
