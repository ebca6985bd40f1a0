//! End-to-end ingestion behavior against a live PostgreSQL.
//!
//! These tests need a PostgreSQL reachable through `DATABASE_URL` and are
//! ignored by default; run them with `cargo test -- --ignored`. The
//! database is shared and workers poll whole tables, so every test holds
//! [`DB_GATE`] across its mutating span and asserts only on rows it
//! registered itself.

use chrono::NaiveDate;
use mdas_core::aggregation::AggregationTier;
use mdas_core::claim::{AcquireOutcome, ClaimManager, ReleaseOutcome, StaleClaimSweeper};
use mdas_core::codec::{LayoutRegistry, TddfDecoder, SAMPLE_BATCH_HEADER_LINE, SAMPLE_DETAIL_LINE};
use mdas_core::config::{ConfigManager, SweeperConfig};
use mdas_core::database::{DatabaseConnection, DatabaseMigrations};
use mdas_core::events::EventPublisher;
use mdas_core::ingestion::{DecodeRunner, IngestionWorker, UploadValidator, ValidationVerdict};
use mdas_core::models::{ExtractRecord, FileUpload, NewFileUpload, ScopeGeneration};
use mdas_core::state_machine::{UploadEvent, UploadState, UploadStateMachine};
use mdas_core::storage::{ContentStore, LocalContentStore};
use mdas_core::IngestionCore;
use sqlx::PgPool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

/// One schema setup per process. A second `run_all` in the same run can
/// re-drop a fresh test schema under other tests' feet.
static MIGRATED: OnceCell<()> = OnceCell::const_new();

/// Workers poll and sweepers reclaim across the whole table, so each test
/// holds this from its first registered row to its last assertion.
static DB_GATE: Mutex<()> = Mutex::const_new(());

async fn test_pool() -> PgPool {
    let db = DatabaseConnection::new()
        .await
        .expect("set DATABASE_URL to a reachable PostgreSQL");
    MIGRATED
        .get_or_try_init(|| DatabaseMigrations::run_all(db.pool()))
        .await
        .expect("schema migration failed");
    db.pool().clone()
}

fn test_config() -> Arc<ConfigManager> {
    let config_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config");
    ConfigManager::load_from_directory_with_env(Some(config_dir), "test")
        .expect("test configuration should load")
}

fn unique_ref(prefix: &str) -> String {
    format!("{prefix}/{}.tddf", Uuid::new_v4())
}

fn unique_filename(prefix: &str) -> String {
    format!("{prefix}-{}.tddf", Uuid::new_v4())
}

/// Header, two identical details, and one line with an unrecognized tag
fn sample_file_lines() -> Vec<String> {
    let mut unknown = SAMPLE_DETAIL_LINE.to_string();
    unknown.replace_range(17..19, "93");
    vec![
        SAMPLE_BATCH_HEADER_LINE.to_string(),
        SAMPLE_DETAIL_LINE.to_string(),
        SAMPLE_DETAIL_LINE.to_string(),
        unknown,
    ]
}

async fn register(pool: &PgPool, prefix: &str, storage_ref: &str) -> FileUpload {
    FileUpload::create(
        pool,
        NewFileUpload {
            filename: unique_filename(prefix),
            size_bytes: 420,
            storage_ref: storage_ref.to_string(),
        },
    )
    .await
    .expect("upload registration")
}

#[tokio::test]
#[ignore] // needs a PostgreSQL reachable through DATABASE_URL
async fn full_pipeline_lands_a_mixed_file_in_done() {
    let pool = test_pool().await;
    let config_manager = test_config();
    let core = IngestionCore::from_pool_and_config(pool.clone(), config_manager.clone())
        .expect("core should assemble");

    let content_dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(LocalContentStore::new(content_dir.path()));
    let storage_ref = unique_ref("pipeline");
    let lines = sample_file_lines();
    store
        .store(&storage_ref, lines.join("\n").as_bytes())
        .await
        .expect("content write");

    let _db = DB_GATE.lock().await;
    let upload = core
        .register_upload(NewFileUpload {
            filename: unique_filename("settlement"),
            size_bytes: lines.join("\n").len() as i64,
            storage_ref: storage_ref.clone(),
        })
        .await
        .expect("registration");

    let worker = IngestionWorker::new(
        pool.clone(),
        config_manager.config(),
        store,
        core.event_publisher.clone(),
    )
    .expect("worker should build");

    let stats = worker.run_once().await.expect("worker pass");
    assert!(stats.files_claimed >= 1);

    let status = core.upload_status(upload.id).await.expect("status lookup");
    assert_eq!(status.phase(), UploadState::Done);
    assert!(!status.is_claimed());
    assert_eq!(status.upload.layout_version.as_deref(), Some("2022.2"));
    assert_eq!(status.upload.lines_seen, 4);
    assert_eq!(status.upload.lines_decoded, 4);
    assert_eq!(status.upload.lines_failed, 0);

    let records = ExtractRecord::list_for_upload(&pool, upload.id)
        .await
        .expect("record listing");
    assert_eq!(records.len(), 4);

    // The repeated detail line resolves to one winner and one duplicate
    let duplicates: Vec<&ExtractRecord> = records.iter().filter(|r| r.is_duplicate).collect();
    assert_eq!(duplicates.len(), 1);
    let winner_id = duplicates[0]
        .duplicate_of
        .expect("duplicate points at its winner");
    let winner = records
        .iter()
        .find(|r| r.id == winner_id)
        .expect("winner lives in the same upload");
    assert!(!winner.is_duplicate);
    assert_eq!(winner.business_key, duplicates[0].business_key);
    assert!(winner.line_no < duplicates[0].line_no);
}

#[tokio::test]
#[ignore] // needs a PostgreSQL reachable through DATABASE_URL
async fn decode_pass_is_idempotent_over_committed_lines() {
    let pool = test_pool().await;
    let _db = DB_GATE.lock().await;
    let upload = register(&pool, "idempotent", &unique_ref("idempotent")).await;

    // Hold a claim so no polling worker adopts the upload mid-test
    let claims = ClaimManager::new(pool.clone());
    let fence = "test-idempotence-fence";
    assert!(matches!(
        claims.try_acquire(upload.id, fence).await.expect("claim"),
        AcquireOutcome::Granted(_)
    ));

    let lines = sample_file_lines();
    let validator = UploadValidator::new(pool.clone());
    let report = match validator
        .validate(upload.id, &lines)
        .await
        .expect("validation pass")
    {
        ValidationVerdict::Passed(report) => report,
        ValidationVerdict::Unprocessable { reason } => {
            panic!("sample file should validate: {reason}")
        }
    };
    assert_eq!(report.lines_seen, 4);
    assert_eq!(report.recognized_lines, 3);

    let registry = LayoutRegistry::builtin().expect("builtin layouts");
    let layout = registry.get("2022.2").expect("2022.2 is builtin");
    let runner = DecodeRunner::new(pool.clone(), TddfDecoder::new(layout));

    let first = runner.run(upload.id).await.expect("first decode pass");
    assert_eq!(first.lines_decoded, 4);
    assert_eq!(first.lines_failed, 0);

    let after_first = ExtractRecord::list_for_upload(&pool, upload.id)
        .await
        .expect("record listing");

    // A rerun over fully committed lines changes nothing and reports the
    // stored tallies rather than zero
    let second = runner.run(upload.id).await.expect("second decode pass");
    assert_eq!(second.lines_decoded, first.lines_decoded);
    assert_eq!(second.lines_skipped, first.lines_skipped);
    assert_eq!(second.lines_failed, first.lines_failed);

    let after_second = ExtractRecord::list_for_upload(&pool, upload.id)
        .await
        .expect("record listing");
    assert_eq!(after_first.len(), after_second.len());
    for (a, b) in after_first.iter().zip(after_second.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.created_at, b.created_at);
        assert_eq!(a.business_key, b.business_key);
    }

    claims.release(upload.id, fence).await.expect("release");
}

#[tokio::test]
#[ignore] // needs a PostgreSQL reachable through DATABASE_URL
async fn claims_grant_one_owner_at_a_time() {
    let pool = test_pool().await;
    let publisher = EventPublisher::new(16);

    let _db = DB_GATE.lock().await;
    let upload = register(&pool, "claims", &unique_ref("claims")).await;
    let claims = ClaimManager::new(pool.clone());

    let first = match claims.try_acquire(upload.id, "owner-a").await.expect("acquire") {
        AcquireOutcome::Granted(claim) => claim,
        AcquireOutcome::Denied => panic!("fresh upload should be claimable"),
    };

    // Park the upload outside the worker backlog so the claim interplay
    // below is not raced by a polling worker
    let mut machine = UploadStateMachine::new(
        upload.clone(),
        "owner-a",
        pool.clone(),
        publisher.clone(),
    );
    let landed = machine
        .transition(UploadEvent::fail_fatal("parked for claim testing"))
        .await
        .expect("transition under held claim");
    assert_eq!(landed, UploadState::Failed);

    assert!(matches!(
        claims.try_acquire(upload.id, "owner-b").await.expect("acquire"),
        AcquireOutcome::Denied
    ));
    assert!(matches!(
        claims.release(upload.id, "owner-b").await.expect("release"),
        ReleaseOutcome::NotOwner
    ));

    // Same-owner re-acquire refreshes the expiry instead of denying
    let refreshed = match claims.try_acquire(upload.id, "owner-a").await.expect("acquire") {
        AcquireOutcome::Granted(claim) => claim,
        AcquireOutcome::Denied => panic!("holder should be able to refresh its own claim"),
    };
    assert!(refreshed.expires_at >= first.expires_at);

    assert!(matches!(
        claims.release(upload.id, "owner-a").await.expect("release"),
        ReleaseOutcome::Released
    ));
    assert!(matches!(
        claims.try_acquire(upload.id, "owner-b").await.expect("acquire"),
        AcquireOutcome::Granted(_)
    ));
    claims.release(upload.id, "owner-b").await.expect("release");
}

#[tokio::test]
#[ignore] // needs a PostgreSQL reachable through DATABASE_URL
async fn sweeper_fails_uploads_abandoned_mid_decode() {
    let pool = test_pool().await;
    let publisher = EventPublisher::new(16);

    let _db = DB_GATE.lock().await;
    let upload = register(&pool, "sweep", &unique_ref("sweep")).await;
    let claims = ClaimManager::new(pool.clone());
    let crashed = "crashed-worker";
    assert!(matches!(
        claims.try_acquire(upload.id, crashed).await.expect("claim"),
        AcquireOutcome::Granted(_)
    ));

    // Walk the upload into `decoding`, the phase a crash strands it in.
    // Workers never poll that phase; only the sweeper can recover it.
    let mut machine =
        UploadStateMachine::new(upload.clone(), crashed, pool.clone(), publisher.clone());
    machine
        .transition(UploadEvent::Validate)
        .await
        .expect("validate transition");
    machine
        .transition(UploadEvent::StartDecoding)
        .await
        .expect("decoding transition");

    // Shrink the claim to a TTL that lapses within the test
    assert!(matches!(
        claims
            .try_acquire_with_ttl(upload.id, crashed, Duration::from_millis(50))
            .await
            .expect("ttl refresh"),
        AcquireOutcome::Granted(_)
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let sweeper = StaleClaimSweeper::new(pool.clone(), SweeperConfig::default(), publisher);
    let stats = sweeper.sweep_once().await.expect("sweep pass");
    assert!(stats.scanned >= 1);

    let refreshed = FileUpload::find_by_id(&pool, upload.id)
        .await
        .expect("lookup")
        .expect("upload still exists");
    assert_eq!(refreshed.current_phase(), Some(UploadState::Failed));

    let errors = refreshed.errors.as_array().expect("errors is a json array");
    let last = errors.last().expect("reclaim appended an error entry");
    assert_eq!(last["message"], "claim expired");
    assert_eq!(last["retryable"], true);

    assert!(claims
        .current_claim(upload.id)
        .await
        .expect("claim lookup")
        .is_none());
}

#[tokio::test]
#[ignore] // needs a PostgreSQL reachable through DATABASE_URL
async fn sweeper_requeues_reclaimed_uploads_when_configured() {
    let pool = test_pool().await;
    let publisher = EventPublisher::new(16);

    let _db = DB_GATE.lock().await;
    let upload = register(&pool, "requeue", &unique_ref("requeue")).await;
    let claims = ClaimManager::new(pool.clone());
    let crashed = "crashed-worker-requeue";
    assert!(matches!(
        claims.try_acquire(upload.id, crashed).await.expect("claim"),
        AcquireOutcome::Granted(_)
    ));

    let mut machine =
        UploadStateMachine::new(upload.clone(), crashed, pool.clone(), publisher.clone());
    machine
        .transition(UploadEvent::Validate)
        .await
        .expect("validate transition");
    machine
        .transition(UploadEvent::StartDecoding)
        .await
        .expect("decoding transition");

    assert!(matches!(
        claims
            .try_acquire_with_ttl(upload.id, crashed, Duration::from_millis(50))
            .await
            .expect("ttl refresh"),
        AcquireOutcome::Granted(_)
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let config = SweeperConfig {
        requeue_on_reclaim: true,
        ..SweeperConfig::default()
    };
    let sweeper = StaleClaimSweeper::new(pool.clone(), config, publisher);
    sweeper.sweep_once().await.expect("sweep pass");

    // The reclaim failure is retryable, so the sweeper walks the upload
    // back into the validated backlog
    let refreshed = FileUpload::find_by_id(&pool, upload.id)
        .await
        .expect("lookup")
        .expect("upload still exists");
    assert_eq!(refreshed.current_phase(), Some(UploadState::Validated));
}

#[tokio::test]
#[ignore] // needs a PostgreSQL reachable through DATABASE_URL
async fn operator_retry_honors_failure_retryability() {
    let pool = test_pool().await;
    let core = IngestionCore::from_pool_and_config(pool.clone(), test_config())
        .expect("core should assemble");
    let publisher = EventPublisher::new(16);
    let claims = ClaimManager::new(pool.clone());
    let _db = DB_GATE.lock().await;

    // Transient failure: retry is allowed
    let transient = register(&pool, "retryable", &unique_ref("retryable")).await;
    assert!(matches!(
        claims.try_acquire(transient.id, "setup").await.expect("claim"),
        AcquireOutcome::Granted(_)
    ));
    let mut machine =
        UploadStateMachine::new(transient.clone(), "setup", pool.clone(), publisher.clone());
    machine
        .transition(UploadEvent::fail_with_error("decode step failed: synthetic"))
        .await
        .expect("failure transition");
    claims.release(transient.id, "setup").await.expect("release");

    let landed = core
        .retry_upload(transient.id, "operator-7")
        .await
        .expect("retryable failure should accept a retry");
    assert_eq!(landed, UploadState::Retrying);

    // Fatal failure: the retry guard refuses
    let fatal = register(&pool, "fatal", &unique_ref("fatal")).await;
    assert!(matches!(
        claims.try_acquire(fatal.id, "setup").await.expect("claim"),
        AcquireOutcome::Granted(_)
    ));
    let mut machine =
        UploadStateMachine::new(fatal.clone(), "setup", pool.clone(), publisher.clone());
    machine
        .transition(UploadEvent::fail_fatal("no recognizable record tags"))
        .await
        .expect("failure transition");
    claims.release(fatal.id, "setup").await.expect("release");

    let denied = core.retry_upload(fatal.id, "operator-7").await;
    assert!(denied.is_err(), "fatal failures must not be retryable");

    let status = core.upload_status(fatal.id).await.expect("status lookup");
    assert_eq!(status.phase(), UploadState::Failed);
    assert!(!status.is_claimed(), "denied retry must not leak a claim");
}

#[tokio::test]
#[ignore] // needs a PostgreSQL reachable through DATABASE_URL
async fn upload_status_reports_the_active_claim() {
    let pool = test_pool().await;
    let core = IngestionCore::from_pool_and_config(pool.clone(), test_config())
        .expect("core should assemble");
    let publisher = EventPublisher::new(16);
    let claims = ClaimManager::new(pool.clone());

    let _db = DB_GATE.lock().await;
    let upload = register(&pool, "status", &unique_ref("status")).await;
    assert!(matches!(
        claims.try_acquire(upload.id, "status-probe").await.expect("claim"),
        AcquireOutcome::Granted(_)
    ));

    // Park outside the worker backlog before asserting on claim state
    let mut machine = UploadStateMachine::new(
        upload.clone(),
        "status-probe",
        pool.clone(),
        publisher,
    );
    machine
        .transition(UploadEvent::fail_fatal("parked for status testing"))
        .await
        .expect("transition under held claim");

    let held = core.upload_status(upload.id).await.expect("status lookup");
    assert_eq!(held.phase(), UploadState::Failed);
    assert!(held.is_claimed());
    assert_eq!(
        held.claim.as_ref().map(|c| c.owner_id.as_str()),
        Some("status-probe")
    );

    claims
        .release(upload.id, "status-probe")
        .await
        .expect("release");
    let released = core.upload_status(upload.id).await.expect("status lookup");
    assert!(!released.is_claimed());

    assert!(
        core.upload_status(i64::MAX).await.is_err(),
        "unknown ids should not resolve"
    );
}

#[tokio::test]
#[ignore] // needs a PostgreSQL reachable through DATABASE_URL
async fn aggregates_match_the_deduplicated_records() {
    let pool = test_pool().await;
    let config_manager = test_config();
    let core = IngestionCore::from_pool_and_config(pool.clone(), config_manager.clone())
        .expect("core should assemble");

    let content_dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(LocalContentStore::new(content_dir.path()));
    let storage_ref = unique_ref("aggregate");
    let lines = sample_file_lines();
    store
        .store(&storage_ref, lines.join("\n").as_bytes())
        .await
        .expect("content write");

    let _db = DB_GATE.lock().await;
    let upload = core
        .register_upload(NewFileUpload {
            filename: unique_filename("aggregate"),
            size_bytes: lines.join("\n").len() as i64,
            storage_ref,
        })
        .await
        .expect("registration");

    let worker = IngestionWorker::new(
        pool.clone(),
        config_manager.config(),
        store,
        core.event_publisher.clone(),
    )
    .expect("worker should build");
    worker.run_once().await.expect("worker pass");

    let status = core.upload_status(upload.id).await.expect("status lookup");
    assert_eq!(status.phase(), UploadState::Done);

    // The sample detail settles on 2022-11-28
    let on = NaiveDate::from_ymd_opt(2022, 11, 28).expect("valid date");
    let scope = "detail_transaction";
    let bucket = core.request_aggregate(scope, on).await.expect("aggregate");

    assert_eq!(bucket.scope_key, scope);
    let tier = AggregationTier::from_str(&bucket.tier).expect("stored tier parses");
    assert_eq!(bucket.period_key, tier.period_key(on));

    // The bucket must agree with a direct scan over the same slice,
    // which excludes duplicate-marked records
    let (start, end) = tier.period_bounds(on);
    let metrics = ExtractRecord::scope_metrics(&pool, scope, start, end)
        .await
        .expect("direct scan");
    assert_eq!(bucket.record_count, metrics.record_count);
    assert_eq!(bucket.total_amount_cents, metrics.total_amount_cents);
    assert!(bucket.record_count >= 1);

    let current = ScopeGeneration::current(&pool, scope).await.expect("generation");
    assert!(current >= bucket.generation);

    // A generation bump invalidates the bucket; the next read rebuilds
    // at a newer stamp
    ScopeGeneration::bump(&pool, scope).await.expect("bump");
    let rebuilt = core.request_aggregate(scope, on).await.expect("aggregate");
    assert!(rebuilt.generation > bucket.generation);
}
