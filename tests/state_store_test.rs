//! Deployments persisted through the file-backed store.

mod support;

use deploy_tool::{
    DeployError, DeploymentOrchestrator, DeploymentStore, Environment, FileDeploymentStore,
    LifecycleStatus, RollbackManager, RollbackOptions,
};
use deploy_tool::progress::NoOpHandler;
use std::sync::Arc;
use std::time::Duration;
use support::Harness;

async fn file_store(h: &Harness) -> Arc<FileDeploymentStore> {
    Arc::new(
        FileDeploymentStore::new(h.dir.path().join("state"))
            .await
            .unwrap(),
    )
}

fn orchestrator(h: &Harness, store: Arc<FileDeploymentStore>) -> DeploymentOrchestrator {
    let store: Arc<dyn DeploymentStore> = store;
    let mut collaborators = h.collaborators();
    collaborators.store = store;
    DeploymentOrchestrator::new(collaborators, h.settings())
}

#[tokio::test]
async fn test_deployment_survives_a_restart() {
    let h = Harness::new();
    let store = file_store(&h).await;
    let project = orchestrator(&h, store.clone())
        .init(&h.react_project())
        .await
        .unwrap();
    store.set_current_project(&project.id).await.unwrap();
    let record = orchestrator(&h, store.clone())
        .deploy(&project.id, Environment::Staging)
        .await
        .unwrap();

    let path = store
        .project_dir(&project.id)
        .join("deployments")
        .join("staging.json");
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["status"], "EXPOSED");
    assert_eq!(json["strategy"], "static-site");
    assert_eq!(json["resources"][0]["kind"], "object-store-bucket");
    assert_eq!(json["resources"][1]["kind"], "bucket-policy");

    let reopened = file_store(&h).await;
    assert_eq!(
        reopened.current_project().await.unwrap(),
        Some(project.id.clone())
    );
    assert_eq!(
        reopened.load_project(&project.id).await.unwrap(),
        Some(project.clone())
    );
    assert_eq!(
        reopened.load(&project.id, Environment::Staging).await.unwrap(),
        Some(record)
    );
    assert_eq!(reopened.list(&project.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_lock_is_shared_between_store_instances() {
    let h = Harness::new();
    let store = file_store(&h).await;
    let project = orchestrator(&h, store.clone())
        .init(&h.react_project())
        .await
        .unwrap();

    let _held = store
        .try_lock(&project.id, Environment::Prod)
        .await
        .unwrap();

    let other = file_store(&h).await;
    let err = orchestrator(&h, other)
        .deploy(&project.id, Environment::Prod)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::DeploymentInProgress { .. }));
    assert!(store
        .load(&project.id, Environment::Prod)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_failed_run_then_rollback_on_disk() {
    let h = Harness::new();
    h.gateway.fail_upload(deploy_tool::GatewayError::Timeout(
        "Read timeout on endpoint URL".to_string(),
    ));
    let store = file_store(&h).await;
    let orchestrator = orchestrator(&h, store.clone());
    let project = orchestrator.init(&h.react_project()).await.unwrap();

    orchestrator
        .deploy(&project.id, Environment::Dev)
        .await
        .unwrap_err();
    let failed = file_store(&h)
        .await
        .load(&project.id, Environment::Dev)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, LifecycleStatus::Failed);
    assert_eq!(failed.resources.len(), 2);

    let manager = RollbackManager::new(
        store.clone(),
        h.gateway.clone(),
        Arc::new(NoOpHandler),
        Duration::from_secs(5),
    );
    manager
        .rollback(&project.id, Environment::Dev, &RollbackOptions::default())
        .await
        .unwrap();

    assert!(!store
        .project_dir(&project.id)
        .join("deployments")
        .join("dev.json")
        .exists());
    assert!(h.gateway.live_kinds().is_empty());
}
