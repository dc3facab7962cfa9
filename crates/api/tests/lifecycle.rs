//! Lifecycle engine tests driven by the scripted stub runner.
//!
//! These exercise the dispatch state machine directly against a real
//! database: submission is asynchronous, progress is monotonic, terminal
//! states are sealed, and a delete mid-run discards late callbacks.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::{test_config, wait_for_run, wait_for_status};
use mediaforge_api::engine::JobLifecycle;
use mediaforge_api::error::AppError;
use mediaforge_api::middleware::auth::AuthUser;
use mediaforge_core::error::CoreError;
use mediaforge_core::job::JobOptions;
use mediaforge_db::models::job::SubmitJob;
use mediaforge_db::models::status::JobStatus;
use mediaforge_db::repositories::JobRepo;
use mediaforge_runner::StubRunner;
use sqlx::PgPool;

fn build_lifecycle(pool: PgPool) -> (JobLifecycle, Arc<StubRunner>) {
    let runner = Arc::new(StubRunner::new());
    let lifecycle = JobLifecycle::new(pool, runner.clone(), test_config().storage);
    (lifecycle, runner)
}

fn submission(title: &str) -> SubmitJob {
    SubmitJob {
        title: title.to_string(),
        description: String::new(),
        options: JobOptions::default(),
    }
}

fn owner(user_id: i64) -> AuthUser {
    AuthUser {
        user_id,
        role: "user".to_string(),
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_submit_returns_before_processing_starts(pool: PgPool) {
    let (lifecycle, runner) = build_lifecycle(pool.clone());

    let job = lifecycle
        .submit(1, submission("Async job"), Some("in.mp4".into()))
        .await
        .unwrap();

    // The returned row is the pending snapshot; dispatch has not finished.
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress, 0);
    assert!(job.started_at.is_none());

    // The dispatch transitions it to processing without any runner event.
    wait_for_run(&runner).await;
    wait_for_status(&pool, job.id, JobStatus::Processing).await;
    let row = JobRepo::find_by_id(&pool, job.id, None)
        .await
        .unwrap()
        .unwrap();
    assert!(row.started_at.is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_full_run_to_completion(pool: PgPool) {
    let (lifecycle, runner) = build_lifecycle(pool.clone());

    let job = lifecycle
        .submit(1, submission("Happy path"), Some("in.mp4".into()))
        .await
        .unwrap();
    wait_for_run(&runner).await;
    let script = runner.next_script();

    script.progress(40).await;
    // Monotonicity: a stale lower report cannot move progress backwards.
    script.progress(25).await;
    script.done("/outputs/out1.mp4").await;

    wait_for_status(&pool, job.id, JobStatus::Completed).await;
    let row = JobRepo::find_by_id(&pool, job.id, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.progress, 100);
    assert_eq!(row.output_ref.as_deref(), Some("/outputs/out1.mp4"));
    assert!(row.completed_at.is_some());
    assert_eq!(row.cpu_time_secs, Some(1));
    assert!(row.error_message.is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_progress_is_capped_below_completion(pool: PgPool) {
    let (lifecycle, runner) = build_lifecycle(pool.clone());

    let job = lifecycle
        .submit(1, submission("Capped"), Some("in.mp4".into()))
        .await
        .unwrap();
    wait_for_run(&runner).await;
    let script = runner.next_script();

    // An overeager 100 from the runner is clamped to 99; 100 is reserved
    // for the completion write.
    script.progress(100).await;
    wait_for_status(&pool, job.id, JobStatus::Processing).await;
    for _ in 0..200 {
        let row = JobRepo::find_by_id(&pool, job.id, None)
            .await
            .unwrap()
            .unwrap();
        if row.progress > 0 {
            assert_eq!(row.progress, 99);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    script.done("/outputs/out.mp4").await;
    wait_for_status(&pool, job.id, JobStatus::Completed).await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_failure_records_message_and_no_output(pool: PgPool) {
    let (lifecycle, runner) = build_lifecycle(pool.clone());

    let job = lifecycle
        .submit(1, submission("Doomed"), Some("in.mp4".into()))
        .await
        .unwrap();
    wait_for_run(&runner).await;
    let script = runner.next_script();

    script.progress(10).await;
    script.fail("codec initialization failed").await;

    wait_for_status(&pool, job.id, JobStatus::Failed).await;
    let row = JobRepo::find_by_id(&pool, job.id, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        row.error_message.as_deref(),
        Some("codec initialization failed")
    );
    assert!(row.output_ref.is_none());
    assert!(row.completed_at.is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_submission_without_upload_still_reaches_runner(pool: PgPool) {
    let (lifecycle, runner) = build_lifecycle(pool.clone());

    // A plain JSON submission has no uploaded file; it gets a fabricated
    // input locator and flows through the runner like any other job.
    let job = lifecycle
        .submit(1, submission("No upload"), None)
        .await
        .unwrap();
    assert!(job.input_ref.is_some());

    wait_for_run(&runner).await;
    let script = runner.next_script();
    script.progress(30).await;
    script.done("/outputs/out.mp4").await;

    wait_for_status(&pool, job.id, JobStatus::Completed).await;
    let row = JobRepo::find_by_id(&pool, job.id, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.progress, 100);
    assert_eq!(row.output_ref.as_deref(), Some("/outputs/out.mp4"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_runner_vanishing_fails_the_job(pool: PgPool) {
    let (lifecycle, runner) = build_lifecycle(pool.clone());

    let job = lifecycle
        .submit(1, submission("Abandoned"), Some("in.mp4".into()))
        .await
        .unwrap();
    wait_for_run(&runner).await;

    // Dropping the script closes the event stream with no terminal event.
    drop(runner.next_script());

    wait_for_status(&pool, job.id, JobStatus::Failed).await;
    let row = JobRepo::find_by_id(&pool, job.id, None)
        .await
        .unwrap()
        .unwrap();
    assert!(row
        .error_message
        .as_deref()
        .unwrap()
        .contains("without a result"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_delete_mid_run_discards_late_callbacks(pool: PgPool) {
    let (lifecycle, runner) = build_lifecycle(pool.clone());

    let job = lifecycle
        .submit(1, submission("Deleted early"), Some("in.mp4".into()))
        .await
        .unwrap();
    wait_for_run(&runner).await;
    wait_for_status(&pool, job.id, JobStatus::Processing).await;
    let script = runner.next_script();

    lifecycle.remove(job.id, &owner(1)).await.unwrap();

    // Late callbacks hit a missing row and are discarded, not resurrected.
    script.try_progress(70).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let row = JobRepo::find_by_id(&pool, job.id, None).await.unwrap();
    assert!(row.is_none(), "deleted job must stay deleted");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_get_masks_foreign_jobs_as_not_found(pool: PgPool) {
    let (lifecycle, _runner) = build_lifecycle(pool.clone());

    let job = lifecycle
        .submit(1, submission("Private"), Some("in.mp4".into()))
        .await
        .unwrap();

    let err = lifecycle.get(job.id, &owner(2)).await.unwrap_err();
    assert_matches!(err, AppError::Core(CoreError::NotFound { entity: "Job", .. }));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_output_path_refuses_unfinished_jobs(pool: PgPool) {
    let (lifecycle, runner) = build_lifecycle(pool.clone());

    let job = lifecycle
        .submit(1, submission("Unfinished"), Some("in.mp4".into()))
        .await
        .unwrap();

    let err = lifecycle.output_path(job.id, &owner(1)).await.unwrap_err();
    assert_matches!(err, AppError::Core(CoreError::NotReady(_)));

    wait_for_run(&runner).await;
    let script = runner.next_script();
    script.done("/outputs/final.mp4").await;
    wait_for_status(&pool, job.id, JobStatus::Completed).await;

    let (row, path) = lifecycle.output_path(job.id, &owner(1)).await.unwrap();
    assert_eq!(row.progress, 100);
    assert_eq!(path.to_str(), Some("/outputs/final.mp4"));
}
