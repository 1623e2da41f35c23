use atheneum_core::embedding::DeterministicProvider;
use atheneum_core::metrics::MetricsRegistry;
use atheneum_core::model::ProjectPatch;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use storage::embedded::EmbeddedBackendFactory;
use tempfile::tempdir;
use tenancy::apikey::Scope;
use tenancy::manager::{ManagerError, ProjectManager};

const DIMS: usize = 16;

fn manager(dir: &Path) -> ProjectManager {
    ProjectManager::new(
        Arc::new(EmbeddedBackendFactory::new(dir)),
        Arc::new(DeterministicProvider::new(DIMS)),
        Arc::new(MetricsRegistry::new()),
    )
}

fn scopes(list: &[Scope]) -> BTreeSet<Scope> {
    list.iter().copied().collect()
}

#[tokio::test]
async fn create_and_fetch_project() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());

    let project = manager
        .create_project("audio-ml", "audio search", None, HashMap::new())
        .await
        .unwrap();

    assert!(project.collection_name.starts_with("kb_"));
    let fetched = manager.get_project(project.project_id).await.unwrap();
    assert_eq!(fetched, project);
    assert_eq!(manager.list_projects().await.len(), 1);

    // The backend collection exists and is queryable.
    let backend = manager.get_backend(project.project_id).await.unwrap();
    assert_eq!(backend.get_statistics().await.unwrap().total_documents, 0);
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());

    manager
        .create_project("shared-name", "", None, HashMap::new())
        .await
        .unwrap();
    let result = manager
        .create_project("shared-name", "", None, HashMap::new())
        .await;

    assert!(matches!(result, Err(ManagerError::DuplicateName(_))));
}

#[tokio::test]
async fn update_renames_and_rejects_collisions() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());

    let first = manager
        .create_project("first", "", None, HashMap::new())
        .await
        .unwrap();
    manager
        .create_project("second", "", None, HashMap::new())
        .await
        .unwrap();

    let updated = manager
        .update_project(
            first.project_id,
            ProjectPatch {
                name: Some("renamed".to_string()),
                ..ProjectPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "renamed");
    assert!(updated.updated_at >= first.updated_at);

    let collision = manager
        .update_project(
            first.project_id,
            ProjectPatch {
                name: Some("second".to_string()),
                ..ProjectPatch::default()
            },
        )
        .await;
    assert!(matches!(collision, Err(ManagerError::DuplicateName(_))));
}

#[tokio::test]
async fn model_change_is_allowed_only_while_empty() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());

    let project = manager
        .create_project("modelled", "", Some("m0".to_string()), HashMap::new())
        .await
        .unwrap();

    // Empty project: the model may change.
    let updated = manager
        .update_project(
            project.project_id,
            ProjectPatch {
                embedding_model: Some("m1".to_string()),
                ..ProjectPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.embedding_model, "m1");

    // With a document present the same change is a conflict.
    let backend = manager.get_backend(project.project_id).await.unwrap();
    backend
        .add_documents(
            &["d1_chunk0".to_string()],
            &[vec![0.25; DIMS]],
            &["content".to_string()],
            &[HashMap::new()],
        )
        .await
        .unwrap();

    let result = manager
        .update_project(
            project.project_id,
            ProjectPatch {
                embedding_model: Some("m2".to_string()),
                ..ProjectPatch::default()
            },
        )
        .await;
    assert!(matches!(result, Err(ManagerError::ModelChangeConflict)));
}

#[tokio::test]
async fn delete_cascades_and_is_idempotent() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());

    let project = manager
        .create_project("doomed", "", None, HashMap::new())
        .await
        .unwrap();
    manager
        .create_api_key(project.project_id, "k", scopes(&[Scope::Read]), None)
        .await
        .unwrap();

    manager.delete_project(project.project_id).await.unwrap();

    assert!(manager.get_project(project.project_id).await.is_none());
    assert!(manager.get_backend(project.project_id).await.is_err());
    assert!(manager.get_project_cache(project.project_id).await.is_err());
    assert!(!dir
        .path()
        .join(format!("{}.json", project.collection_name))
        .exists());

    // Idempotent.
    manager.delete_project(project.project_id).await.unwrap();
}

#[tokio::test]
async fn key_lifecycle_matches_scope_rules() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());
    let project = manager
        .create_project("keys", "", None, HashMap::new())
        .await
        .unwrap();

    let generated = manager
        .create_api_key(project.project_id, "k1", scopes(&[Scope::Read]), Some(90))
        .await
        .unwrap();

    let (validated_project, validated_key) = manager
        .validate_api_key(&generated.raw_key, Scope::Read)
        .await
        .unwrap();
    assert_eq!(validated_project, project.project_id);
    assert_eq!(validated_key, generated.api_key.key_id);

    let write_attempt = manager
        .validate_api_key(&generated.raw_key, Scope::Write)
        .await;
    assert!(matches!(write_attempt, Err(ManagerError::Key(_))));

    manager
        .revoke_api_key(project.project_id, &generated.api_key.key_id)
        .await
        .unwrap();
    let after_revoke = manager
        .validate_api_key(&generated.raw_key, Scope::Read)
        .await;
    assert!(matches!(after_revoke, Err(ManagerError::Key(_))));

    let listed = manager.list_api_keys(project.project_id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].revoked);
}

#[tokio::test]
async fn keys_do_not_cross_validate_between_projects() {
    let dir = tempdir().unwrap();
    let manager = manager(dir.path());

    let p1 = manager
        .create_project("p1", "", None, HashMap::new())
        .await
        .unwrap();
    manager
        .create_project("p2", "", None, HashMap::new())
        .await
        .unwrap();

    let generated = manager
        .create_api_key(p1.project_id, "k", scopes(&[Scope::Admin]), None)
        .await
        .unwrap();

    let (validated_project, _) = manager
        .validate_api_key(&generated.raw_key, Scope::Read)
        .await
        .unwrap();
    assert_eq!(validated_project, p1.project_id);
}

#[tokio::test]
async fn state_round_trips_through_disk() {
    let dir = tempdir().unwrap();
    let state_path = dir.path().join("manager.json");

    let exported = {
        let manager = manager(dir.path()).with_state_path(&state_path);
        manager
            .create_project("alpha", "first", Some("m0".to_string()), HashMap::from([
                ("team".to_string(), "search".to_string()),
            ]))
            .await
            .unwrap();
        manager
            .create_project("beta", "second", None, HashMap::new())
            .await
            .unwrap();
        manager.export_projects().await
    };

    let restored = manager(dir.path()).with_state_path(&state_path);
    restored.load().await.unwrap();

    assert_eq!(restored.export_projects().await, exported);
}

#[tokio::test]
async fn export_import_into_empty_manager_is_identical() {
    let dir = tempdir().unwrap();
    let source = manager(dir.path());
    source
        .create_project("alpha", "first", Some("m0".to_string()), HashMap::new())
        .await
        .unwrap();
    source
        .create_project("beta", "second", None, HashMap::new())
        .await
        .unwrap();
    let exported = source.export_projects().await;

    let other_dir = tempdir().unwrap();
    let target = manager(other_dir.path());
    target.import_projects(exported.clone()).await.unwrap();

    assert_eq!(target.export_projects().await, exported);
}

#[tokio::test]
async fn load_refuses_binary_state_file() {
    let dir = tempdir().unwrap();
    let state_path = dir.path().join("manager.json");
    tokio::fs::write(&state_path, [0x80u8, 0x04, 0x95])
        .await
        .unwrap();

    let manager = manager(dir.path()).with_state_path(&state_path);
    assert!(matches!(
        manager.load().await,
        Err(ManagerError::InvalidStateFile(_))
    ));
}
