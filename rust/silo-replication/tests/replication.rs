//! End-to-end replication scenarios over the in-memory collaborators.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use silo_core::data::{
    reserved_folder_name, ActorId, ApprovalStatus, BlindIndex, BoundPolicy, CipherText,
    EnvironmentId, Folder, FolderId, ImportId, JobId, KeyEncoding, Membership, MembershipId,
    Operation, PolicyId, ProjectId, Secret, SecretId, SecretImport, SecretKind, SecretVersion,
    SecretVersionId,
};
use silo_core::error::ReplicationError;
use silo_replication::{
    replicate_folder, replication_lock_key, spawn_failure_logger, success_key,
    worker_queue::{QueueConfig, WorkerQueue},
    Actor, JobClient, MemoryPolicyOracle, MemorySyncEnqueuer, QueueJobClient, ReplicationContext,
    ReplicationJob, ReplicationJobProcessor, ReplicationStamp, SecretOperation,
};
use silo_storage::{EphemeralStore, LockStore, MemoryCoordinator, MemoryReplicaStore};
use tokio::sync::mpsc::unbounded_channel;

type TestContext =
    ReplicationContext<MemoryReplicaStore, MemoryCoordinator, MemoryPolicyOracle, MemorySyncEnqueuer>;

struct Fixture {
    store: MemoryReplicaStore,
    coordinator: MemoryCoordinator,
    policies: MemoryPolicyOracle,
    syncer: MemorySyncEnqueuer,
}

impl Fixture {
    fn context(&self) -> TestContext {
        ReplicationContext::new(
            self.store.clone(),
            self.coordinator.clone(),
            self.policies.clone(),
            self.syncer.clone(),
        )
    }
}

fn cipher(data: &str) -> CipherText {
    CipherText::new("iv", "tag", data)
}

fn folder(id: &str, env: &str, path: &str) -> Folder {
    Folder {
        id: FolderId::from(id),
        env_id: EnvironmentId::from(env),
        parent_id: None,
        name: path.trim_start_matches('/').to_owned(),
        path: path.to_owned(),
        is_reserved: false,
    }
}

fn source_secret(id: &str, folder_id: &str, blind_index: &str, version: u32) -> Secret {
    Secret {
        id: SecretId::from(id),
        folder_id: FolderId::from(folder_id),
        blind_index: Some(BlindIndex::from(blind_index)),
        kind: SecretKind::Shared,
        version,
        is_replicated: false,
        key_encoding: KeyEncoding::Utf8,
        algorithm: "aes-256-gcm".into(),
        metadata: None,
        secret_key: cipher("key"),
        secret_value: cipher(&format!("value-of-{id}")),
        secret_comment: None,
        skip_multiline_encoding: None,
        tags: vec!["replication".into()],
    }
}

fn version_of(secret: &Secret, latest_replicated_version: Option<u32>) -> SecretVersion {
    SecretVersion {
        id: SecretVersionId::generate(),
        secret_id: secret.id.clone(),
        version: secret.version,
        latest_replicated_version,
        is_replicated: false,
        blind_index: secret.blind_index.clone(),
        kind: secret.kind,
        key_encoding: secret.key_encoding,
        algorithm: secret.algorithm.clone(),
        metadata: secret.metadata.clone(),
        secret_key: secret.secret_key.clone(),
        secret_value: secret.secret_value.clone(),
        secret_comment: secret.secret_comment.clone(),
        skip_multiline_encoding: secret.skip_multiline_encoding,
        tags: secret.tags.clone(),
    }
}

fn import(id: &str, destination_folder: &str) -> SecretImport {
    SecretImport {
        id: ImportId::from(id),
        folder_id: FolderId::from(destination_folder),
        import_path: "/src".into(),
        import_env: EnvironmentId::from("env-src"),
        is_replication: true,
        last_replicated: None,
        replication_status: None,
        is_replication_success: None,
    }
}

fn job(operations: Vec<(&str, Operation)>, actor: Actor) -> ReplicationJob {
    ReplicationJob {
        job_id: JobId::from("job-1"),
        secrets: operations
            .into_iter()
            .map(|(id, operation)| SecretOperation {
                id: SecretId::from(id),
                operation,
            })
            .collect(),
        folder_id: FolderId::from("f-src"),
        secret_path: "/src".into(),
        environment_id: EnvironmentId::from("env-src"),
        project_id: ProjectId::from("proj-1"),
        actor,
        actor_id: ActorId::from("user-1"),
        pick_only_import_ids: None,
        dedupe_replication_queue: Some(HashSet::from(["replication-hint".to_owned()])),
        dedupe_queue: Some(HashSet::from(["sync-hint".to_owned()])),
    }
}

/// One source folder with secret `sec-x` at version 1, one destination
/// subscribed via import `imp-1`, no policies bound.
async fn fixture() -> Fixture {
    let store = MemoryReplicaStore::new();

    store
        .add_environment(EnvironmentId::from("env-src"), "dev")
        .await;
    store
        .add_environment(EnvironmentId::from("env-dst"), "prod")
        .await;
    store.add_folder(folder("f-src", "env-src", "/src")).await;
    store.add_folder(folder("f-dst", "env-dst", "/app")).await;
    store.add_import(import("imp-1", "f-dst")).await;

    let secret = source_secret("sec-x", "f-src", "bi-x", 1);
    store.add_version(version_of(&secret, None)).await;
    store.add_secret(secret).await;

    Fixture {
        store,
        coordinator: MemoryCoordinator::new(),
        policies: MemoryPolicyOracle::new(),
        syncer: MemorySyncEnqueuer::new(),
    }
}

async fn reserved_folder(fixture: &Fixture, destination: &str, import_id: &str) -> Option<Folder> {
    let expected = reserved_folder_name(&ImportId::from(import_id));
    fixture
        .store
        .child_folders(&FolderId::from(destination))
        .await
        .into_iter()
        .find(|child| child.name == expected && child.is_reserved)
}

#[tokio::test]
async fn s1_first_replication_writes_through_to_a_fresh_reserved_folder() -> Result<()> {
    let fixture = fixture().await;

    replicate_folder(fixture.context(), job(vec![("sec-x", Operation::Create)], Actor::Service))
        .await?;

    let reserve = reserved_folder(&fixture, "f-dst", "imp-1")
        .await
        .expect("reserved folder should exist");
    assert_eq!(reserve.env_id, EnvironmentId::from("env-dst"));

    let replicas = fixture.store.secrets_in_folder(&reserve.id).await;
    assert_eq!(replicas.len(), 1);
    assert!(replicas[0].is_replicated);
    assert_eq!(replicas[0].blind_index, Some(BlindIndex::from("bi-x")));
    assert_eq!(replicas[0].secret_value, cipher("value-of-sec-x"));
    assert_ne!(replicas[0].id, SecretId::from("sec-x"));

    let batches = fixture.syncer.batches().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].folder_id, reserve.id);
    assert_eq!(batches[0].secret_path, "/app");
    assert_eq!(batches[0].environment_slug, "prod");
    assert_eq!(batches[0].secrets.len(), 1);
    assert_eq!(batches[0].secrets[0].operation, Operation::Create);
    assert_eq!(
        batches[0].dedupe_queue,
        Some(HashSet::from(["sync-hint".to_owned()]))
    );
    assert_eq!(
        batches[0].dedupe_replication_queue,
        Some(HashSet::from(["replication-hint".to_owned()]))
    );

    let source_versions = fixture.store.versions_of(&SecretId::from("sec-x")).await;
    assert!(source_versions.iter().all(|version| version.is_replicated));

    let import = fixture
        .store
        .get_import(&ImportId::from("imp-1"))
        .await
        .expect("import should exist");
    assert_eq!(import.is_replication_success, Some(true));
    assert_eq!(import.replication_status, None);
    assert!(import.last_replicated.is_some());

    let marker: Option<ReplicationStamp> = fixture
        .coordinator
        .get_key(success_key(&JobId::from("job-1"), &ImportId::from("imp-1")))
        .await?;
    assert!(marker.is_some());

    Ok(())
}

#[tokio::test]
async fn s2_an_update_with_no_local_copy_becomes_a_create() -> Result<()> {
    let fixture = fixture().await;

    replicate_folder(fixture.context(), job(vec![("sec-x", Operation::Update)], Actor::Service))
        .await?;

    let reserve = reserved_folder(&fixture, "f-dst", "imp-1")
        .await
        .expect("reserved folder should exist");
    let replicas = fixture.store.secrets_in_folder(&reserve.id).await;
    assert_eq!(replicas.len(), 1);
    assert_eq!(replicas[0].version, 1);

    let batches = fixture.syncer.batches().await;
    assert_eq!(batches[0].secrets[0].operation, Operation::Create);

    Ok(())
}

#[tokio::test]
async fn s3_a_create_with_an_existing_local_copy_becomes_an_update() -> Result<()> {
    let fixture = fixture().await;

    // The reserved folder already exists and already holds a copy of bi-x
    // at version 3.
    let reserve = Folder {
        id: FolderId::from("f-reserve"),
        env_id: EnvironmentId::from("env-dst"),
        parent_id: Some(FolderId::from("f-dst")),
        name: reserved_folder_name(&ImportId::from("imp-1")),
        path: format!("/app/{}", reserved_folder_name(&ImportId::from("imp-1"))),
        is_reserved: true,
    };
    fixture.store.add_folder(reserve.clone()).await;

    let mut local = source_secret("sec-local", "f-reserve", "bi-x", 3);
    local.is_replicated = true;
    fixture.store.add_version(version_of(&local, Some(3))).await;
    fixture.store.add_secret(local).await;

    replicate_folder(fixture.context(), job(vec![("sec-x", Operation::Create)], Actor::Service))
        .await?;

    // No second reserved folder, no second secret; the local copy advanced
    // to version 4 instead.
    let children = fixture
        .store
        .child_folders(&FolderId::from("f-dst"))
        .await;
    assert_eq!(children.len(), 1);

    let replicas = fixture.store.secrets_in_folder(&reserve.id).await;
    assert_eq!(replicas.len(), 1);
    assert_eq!(replicas[0].id, SecretId::from("sec-local"));
    assert_eq!(replicas[0].version, 4);
    assert_eq!(replicas[0].secret_value, cipher("value-of-sec-x"));

    let local_versions = fixture.store.versions_of(&SecretId::from("sec-local")).await;
    assert_eq!(local_versions.len(), 2);

    let batches = fixture.syncer.batches().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].secrets[0].operation, Operation::Update);
    assert_eq!(batches[0].secrets[0].version, 4);

    Ok(())
}

#[tokio::test]
async fn s4_a_bound_policy_routes_user_changes_to_an_approval_request() -> Result<()> {
    let fixture = fixture().await;

    fixture
        .policies
        .bind_policy(
            ProjectId::from("proj-1"),
            "prod",
            "/app",
            BoundPolicy {
                id: PolicyId::from("pol-1"),
                name: "prod-review".into(),
            },
        )
        .await;
    fixture
        .store
        .add_membership(Membership {
            id: MembershipId::from("mem-1"),
            project_id: ProjectId::from("proj-1"),
            user_id: ActorId::from("user-1"),
        })
        .await;

    replicate_folder(fixture.context(), job(vec![("sec-x", Operation::Create)], Actor::User))
        .await?;

    let reserve = reserved_folder(&fixture, "f-dst", "imp-1")
        .await
        .expect("reserved folder should exist");

    // Nothing was written into the reserved folder and nothing was synced
    // downstream; the change is parked as an open approval request.
    assert!(fixture.store.secrets_in_folder(&reserve.id).await.is_empty());
    assert!(fixture.syncer.batches().await.is_empty());

    let requests = fixture.store.approval_requests_in_folder(&reserve.id).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].policy_id, PolicyId::from("pol-1"));
    assert_eq!(requests[0].status, ApprovalStatus::Open);
    assert_eq!(requests[0].committer_id, MembershipId::from("mem-1"));
    assert!(requests[0].is_replicated);
    assert!(!requests[0].has_merged);
    assert!(!requests[0].slug.is_empty());

    let changes = fixture.store.approval_secrets_of(&requests[0].id).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].op, Operation::Create);
    assert!(changes[0].is_replicated);
    assert_eq!(changes[0].secret_id, None);
    assert_eq!(changes[0].secret_value, cipher("value-of-sec-x"));

    let tags = fixture.store.approval_tags_of(&requests[0].id).await;
    assert_eq!(tags, vec!["replication".to_owned()]);

    Ok(())
}

#[tokio::test]
async fn s5_replaying_a_completed_job_is_a_no_op() -> Result<()> {
    let fixture = fixture().await;

    replicate_folder(fixture.context(), job(vec![("sec-x", Operation::Create)], Actor::Service))
        .await?;
    replicate_folder(fixture.context(), job(vec![("sec-x", Operation::Create)], Actor::Service))
        .await?;

    let reserve = reserved_folder(&fixture, "f-dst", "imp-1")
        .await
        .expect("reserved folder should exist");

    // Without the marker the replay would classify as an update and append
    // a second version; with it, nothing moved.
    let replicas = fixture.store.secrets_in_folder(&reserve.id).await;
    assert_eq!(replicas.len(), 1);
    assert_eq!(replicas[0].version, 1);
    assert_eq!(fixture.store.versions_of(&replicas[0].id).await.len(), 1);
    assert_eq!(fixture.syncer.batches().await.len(), 1);
    assert!(fixture
        .store
        .approval_requests_in_folder(&reserve.id)
        .await
        .is_empty());

    let source_versions = fixture.store.versions_of(&SecretId::from("sec-x")).await;
    assert!(source_versions.iter().all(|version| version.is_replicated));

    Ok(())
}

#[tokio::test]
async fn s6_one_failing_import_does_not_poison_the_others() -> Result<()> {
    let fixture = fixture().await;

    fixture
        .store
        .add_environment(EnvironmentId::from("env-dst2"), "stage")
        .await;
    fixture
        .store
        .add_folder(folder("f-dst2", "env-dst2", "/app2"))
        .await;
    fixture.store.add_import(import("imp-2", "f-dst2")).await;

    // Pre-create the second import's reserved folder so the persistence
    // fault can be aimed at it.
    let poisoned = Folder {
        id: FolderId::from("f-reserve2"),
        env_id: EnvironmentId::from("env-dst2"),
        parent_id: Some(FolderId::from("f-dst2")),
        name: reserved_folder_name(&ImportId::from("imp-2")),
        path: format!("/app2/{}", reserved_folder_name(&ImportId::from("imp-2"))),
        is_reserved: true,
    };
    fixture.store.add_folder(poisoned.clone()).await;
    fixture.store.inject_insert_fault(poisoned.id.clone()).await;

    replicate_folder(fixture.context(), job(vec![("sec-x", Operation::Create)], Actor::Service))
        .await?;

    let healthy = fixture
        .store
        .get_import(&ImportId::from("imp-1"))
        .await
        .expect("import should exist");
    assert_eq!(healthy.is_replication_success, Some(true));
    assert_eq!(healthy.replication_status, None);

    let failed = fixture
        .store
        .get_import(&ImportId::from("imp-2"))
        .await
        .expect("import should exist");
    assert_eq!(failed.is_replication_success, Some(false));
    let status = failed.replication_status.expect("failure should be recorded");
    assert!(status.contains("Transaction failed"));
    assert!(status.len() <= 500);
    assert!(failed.last_replicated.is_some());

    // The healthy import still produced its write and its sync batch.
    let reserve = reserved_folder(&fixture, "f-dst", "imp-1")
        .await
        .expect("reserved folder should exist");
    assert_eq!(fixture.store.secrets_in_folder(&reserve.id).await.len(), 1);
    assert!(fixture.store.secrets_in_folder(&poisoned.id).await.is_empty());
    assert_eq!(fixture.syncer.batches().await.len(), 1);

    // The version promotion runs after the per-import loop regardless of
    // per-import outcomes.
    let source_versions = fixture.store.versions_of(&SecretId::from("sec-x")).await;
    assert!(source_versions.iter().all(|version| version.is_replicated));

    Ok(())
}

#[tokio::test]
async fn it_never_replicates_personal_secrets() -> Result<()> {
    let fixture = fixture().await;

    let mut personal = source_secret("sec-p", "f-src", "bi-p", 1);
    personal.kind = SecretKind::Personal;
    fixture.store.add_version(version_of(&personal, None)).await;
    fixture.store.add_secret(personal).await;

    replicate_folder(
        fixture.context(),
        job(
            vec![("sec-x", Operation::Create), ("sec-p", Operation::Create)],
            Actor::Service,
        ),
    )
    .await?;

    let reserve = reserved_folder(&fixture, "f-dst", "imp-1")
        .await
        .expect("reserved folder should exist");
    let replicas = fixture.store.secrets_in_folder(&reserve.id).await;
    assert_eq!(replicas.len(), 1);
    assert_eq!(replicas[0].blind_index, Some(BlindIndex::from("bi-x")));

    Ok(())
}

#[tokio::test]
async fn it_skips_versions_that_precede_the_replication_watermark() -> Result<()> {
    let fixture = fixture().await;

    let stale = source_secret("sec-stale", "f-src", "bi-stale", 3);
    fixture
        .store
        .add_version(version_of(&stale, Some(5)))
        .await;
    fixture.store.add_secret(stale).await;

    replicate_folder(
        fixture.context(),
        job(
            vec![
                ("sec-x", Operation::Create),
                ("sec-stale", Operation::Create),
            ],
            Actor::Service,
        ),
    )
    .await?;

    let reserve = reserved_folder(&fixture, "f-dst", "imp-1")
        .await
        .expect("reserved folder should exist");
    let replicas = fixture.store.secrets_in_folder(&reserve.id).await;
    assert_eq!(replicas.len(), 1);
    assert_eq!(replicas[0].blind_index, Some(BlindIndex::from("bi-x")));

    Ok(())
}

#[tokio::test]
async fn it_deletes_the_replicas_own_row_on_delete() -> Result<()> {
    let fixture = fixture().await;

    replicate_folder(fixture.context(), job(vec![("sec-x", Operation::Create)], Actor::Service))
        .await?;

    let reserve = reserved_folder(&fixture, "f-dst", "imp-1")
        .await
        .expect("reserved folder should exist");
    assert_eq!(fixture.store.secrets_in_folder(&reserve.id).await.len(), 1);

    // A distinct job id so the first job's success marker does not
    // short-circuit the delete.
    let mut delete_job = job(vec![("sec-x", Operation::Delete)], Actor::Service);
    delete_job.job_id = JobId::from("job-2");
    replicate_folder(fixture.context(), delete_job).await?;

    assert!(fixture.store.secrets_in_folder(&reserve.id).await.is_empty());

    let batches = fixture.syncer.batches().await;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].secrets.len(), 1);
    assert_eq!(batches[1].secrets[0].operation, Operation::Delete);

    Ok(())
}

#[tokio::test]
async fn it_fails_the_job_when_the_replication_locks_are_held() -> Result<()> {
    let fixture = fixture().await;

    let _lease = fixture
        .coordinator
        .acquire(
            vec![replication_lock_key(&SecretId::from("sec-x"))],
            Duration::from_millis(50),
            Duration::from_secs(60),
        )
        .await?;

    let result = replicate_folder(
        fixture.context(),
        job(vec![("sec-x", Operation::Create)], Actor::Service),
    )
    .await;

    assert!(matches!(
        result,
        Err(ReplicationError::LockUnavailable(_))
    ));

    // Nothing was written anywhere.
    assert!(reserved_folder(&fixture, "f-dst", "imp-1").await.is_none());
    assert!(fixture.syncer.batches().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn it_aborts_the_whole_job_when_the_committer_has_no_membership() -> Result<()> {
    let fixture = fixture().await;

    fixture
        .policies
        .bind_policy(
            ProjectId::from("proj-1"),
            "prod",
            "/app",
            BoundPolicy {
                id: PolicyId::from("pol-1"),
                name: "prod-review".into(),
            },
        )
        .await;

    let result = replicate_folder(
        fixture.context(),
        job(vec![("sec-x", Operation::Create)], Actor::User),
    )
    .await;

    assert!(matches!(
        result,
        Err(ReplicationError::MembershipMissing(_, _))
    ));

    // The abort happened before any success bookkeeping.
    let import = fixture
        .store
        .get_import(&ImportId::from("imp-1"))
        .await
        .expect("import should exist");
    assert_eq!(import.is_replication_success, None);

    let reserve = reserved_folder(&fixture, "f-dst", "imp-1")
        .await
        .expect("reserved folder should exist");
    assert!(fixture
        .store
        .approval_requests_in_folder(&reserve.id)
        .await
        .is_empty());

    Ok(())
}

#[tokio::test]
async fn it_only_touches_picked_imports_when_a_pick_list_is_given() -> Result<()> {
    let fixture = fixture().await;

    fixture
        .store
        .add_environment(EnvironmentId::from("env-dst2"), "stage")
        .await;
    fixture
        .store
        .add_folder(folder("f-dst2", "env-dst2", "/app2"))
        .await;
    fixture.store.add_import(import("imp-2", "f-dst2")).await;

    let mut picked_job = job(vec![("sec-x", Operation::Create)], Actor::Service);
    picked_job.pick_only_import_ids = Some(HashSet::from([ImportId::from("imp-2")]));
    replicate_folder(fixture.context(), picked_job).await?;

    assert!(reserved_folder(&fixture, "f-dst", "imp-1").await.is_none());
    assert!(reserved_folder(&fixture, "f-dst2", "imp-2").await.is_some());

    Ok(())
}

#[tokio::test]
async fn it_replicates_jobs_submitted_through_the_queue_client() -> Result<()> {
    let fixture = fixture().await;
    let (failure_tx, failure_rx) = unbounded_channel();

    let queue = WorkerQueue::spawn(
        ReplicationJobProcessor::new(fixture.context()),
        QueueConfig {
            max_in_flight: 2,
            retries: 1,
            job_timeout: Duration::from_secs(30),
        },
        Some(failure_tx),
    )?;
    let client = QueueJobClient::new(queue);
    let _logger = spawn_failure_logger(failure_rx);

    client.submit(job(vec![("sec-x", Operation::Create)], Actor::Service))?;

    let mut reserve = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        reserve = reserved_folder(&fixture, "f-dst", "imp-1").await;
        if let Some(folder) = &reserve {
            if !fixture.store.secrets_in_folder(&folder.id).await.is_empty() {
                break;
            }
        }
    }

    let reserve = reserve.expect("reserved folder should exist");
    assert_eq!(fixture.store.secrets_in_folder(&reserve.id).await.len(), 1);
    assert_eq!(fixture.syncer.batches().await.len(), 1);

    Ok(())
}
