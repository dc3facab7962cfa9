//! Job lifecycle manager.
//!
//! Owns the orchestration of a job's asynchronous execution: `submit`
//! creates the pending row and schedules the dispatch without awaiting
//! it, the dispatch task drives the transformation runner and persists
//! every state change, and the read/delete paths enforce ownership.
//!
//! Ordering: all persisted writes for one job id are produced by that
//! job's single dispatch task, so they apply in production order. A
//! delete racing the dispatch is handled by the repository's status
//! guards -- late writes match zero rows and are logged, never retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mediaforge_core::error::CoreError;
use mediaforge_core::job::JobOptions;
use mediaforge_core::types::DbId;
use mediaforge_db::models::job::{Job, SubmitJob};
use mediaforge_db::models::status::JobStatus;
use mediaforge_db::repositories::JobRepo;
use mediaforge_db::DbPool;
use mediaforge_runner::{RunnerEvent, TransformRunner};
use uuid::Uuid;
use validator::Validate;

use crate::config::StorageConfig;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;

/// Orchestrates job creation, dispatch, and ownership-checked access.
pub struct JobLifecycle {
    pool: DbPool,
    runner: Arc<dyn TransformRunner>,
    storage: StorageConfig,
}

impl JobLifecycle {
    pub fn new(pool: DbPool, runner: Arc<dyn TransformRunner>, storage: StorageConfig) -> Self {
        Self {
            pool,
            runner,
            storage,
        }
    }

    /// Where uploaded inputs are stored.
    pub fn upload_dir(&self) -> &Path {
        &self.storage.upload_dir
    }

    /// Validate and create a job, then schedule its dispatch.
    ///
    /// Returns the pending row immediately; the dispatch task is spawned
    /// and never awaited by the request path.
    pub async fn submit(
        &self,
        owner_id: DbId,
        input: SubmitJob,
        input_ref: Option<String>,
    ) -> AppResult<Job> {
        input
            .validate()
            .map_err(|e| AppError::Core(CoreError::Validation(e.to_string())))?;

        // A plain JSON submission carries no upload; fabricate an input
        // locator and let the runner decide the outcome.
        let input_ref =
            input_ref.unwrap_or_else(|| format!("input_{}.mp4", Uuid::new_v4()));

        let job = JobRepo::create(&self.pool, owner_id, &input, Some(input_ref.as_str())).await?;

        tracing::info!(
            job_id = job.id,
            owner_id,
            title = %job.title,
            "Job submitted"
        );

        let pool = self.pool.clone();
        let runner = Arc::clone(&self.runner);
        let options = job.options();
        let job_id = job.id;
        tokio::spawn(async move {
            dispatch(pool, runner, job_id, input_ref, options).await;
        });

        Ok(job)
    }

    /// Ownership-checked read. Cross-owner access is masked as `NotFound`
    /// so the response does not leak whether the job exists.
    pub async fn get(&self, id: DbId, auth: &AuthUser) -> AppResult<Job> {
        JobRepo::find_by_id(&self.pool, id, auth.owner_scope())
            .await?
            .ok_or(AppError::Core(CoreError::NotFound {
                entity: "Job",
                id,
            }))
    }

    /// Ownership-checked delete. Releases the job's artifacts best-effort.
    ///
    /// Deleting a job whose dispatch is in flight is permitted: the
    /// dispatch's later writes match zero rows and are discarded.
    pub async fn remove(&self, id: DbId, auth: &AuthUser) -> AppResult<()> {
        let job = JobRepo::delete(&self.pool, id, auth.owner_scope())
            .await?
            .ok_or(AppError::Core(CoreError::NotFound {
                entity: "Job",
                id,
            }))?;

        if let Some(output) = &job.output_ref {
            remove_artifact(output, "output").await;
        }
        if let Some(input) = &job.input_ref {
            remove_artifact(input, "input").await;
        }

        tracing::info!(job_id = id, user_id = auth.user_id, "Job deleted");
        Ok(())
    }

    /// Resolve the output artifact path for a completed job.
    ///
    /// Fails with `NotReady` before completion, so callers can distinguish
    /// "come back later" (400) from "no such job" (404).
    pub async fn output_path(&self, id: DbId, auth: &AuthUser) -> AppResult<(Job, PathBuf)> {
        let job = self.get(id, auth).await?;

        if job.status != JobStatus::Completed {
            return Err(AppError::Core(CoreError::NotReady(format!(
                "Job {id} is {} and has no output yet",
                job.status.as_str()
            ))));
        }

        let output = job.output_ref.clone().ok_or_else(|| {
            // Completed implies output_ref; a missing one is a bug.
            AppError::InternalError(format!("completed job {id} has no output reference"))
        })?;

        Ok((job, PathBuf::from(output)))
    }
}

/// Drive one job's transformation to a terminal state.
///
/// This is the only writer for the job's dispatch-path columns, which
/// gives the per-id ordering guarantee. Every persistence failure is
/// logged and ends the task; there is no retry policy here.
async fn dispatch(
    pool: DbPool,
    runner: Arc<dyn TransformRunner>,
    job_id: DbId,
    input_ref: String,
    options: JobOptions,
) {
    match JobRepo::mark_started(&pool, job_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(job_id, "Job vanished before dispatch started, discarding");
            return;
        }
        Err(e) => {
            tracing::error!(job_id, error = %e, "Failed to mark job started");
            return;
        }
    }

    let input = PathBuf::from(input_ref);

    let mut handle = runner.run(&input, &options).await;

    while let Some(event) = handle.recv().await {
        match event {
            RunnerEvent::Progress(percent) => {
                match JobRepo::update_progress(&pool, job_id, percent).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(job_id, "Job deleted mid-processing, discarding progress");
                        return;
                    }
                    Err(e) => {
                        tracing::error!(job_id, error = %e, "Failed to persist progress");
                        return;
                    }
                }
            }

            RunnerEvent::Done {
                output_path,
                cpu_time_secs,
            } => {
                let output = output_path.to_string_lossy().into_owned();
                match JobRepo::complete(&pool, job_id, &output, cpu_time_secs).await {
                    Ok(true) => {
                        tracing::info!(job_id, output = %output, "Job completed");
                        // The original upload is no longer needed.
                        remove_artifact(&input.to_string_lossy(), "input").await;
                    }
                    Ok(false) => {
                        tracing::warn!(job_id, "Job deleted mid-processing, discarding result");
                        // Nobody owns the artifact anymore.
                        remove_artifact(&output, "orphaned output").await;
                    }
                    Err(e) => {
                        tracing::error!(job_id, error = %e, "Failed to persist completion");
                    }
                }
                return;
            }

            RunnerEvent::Failed(message) => {
                record_failure(&pool, job_id, &message, &input).await;
                return;
            }
        }
    }

    // The runner closed its event stream without a terminal event. That
    // violates the runner contract; the job must still end up terminal.
    tracing::error!(job_id, "Runner ended without a terminal event");
    record_failure(&pool, job_id, "runner terminated without a result", &input).await;
}

/// Persist a failure and best-effort clean the input artifact.
async fn record_failure(pool: &DbPool, job_id: DbId, message: &str, input: &Path) {
    match JobRepo::fail(pool, job_id, message).await {
        Ok(true) => tracing::warn!(job_id, error = message, "Job failed"),
        Ok(false) => tracing::warn!(job_id, "Job deleted mid-processing, discarding failure"),
        Err(e) => tracing::error!(job_id, error = %e, "Failed to persist job failure"),
    }
    remove_artifact(&input.to_string_lossy(), "input").await;
}

/// Delete an artifact file, logging (not escalating) failures.
async fn remove_artifact(path: &str, what: &str) {
    if path.is_empty() {
        return;
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path, what, "Removed artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path, what, error = %e, "Failed to remove artifact"),
    }
}
