//! Handlers for the `/jobs` resource.
//!
//! All endpoints require authentication via [`AuthUser`]. Admin users see
//! and manage all jobs; regular users are scoped to their own. Cross-owner
//! access by id is reported as 404, not 403, so responses never reveal
//! whether another user's job exists.

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mediaforge_core::error::CoreError;
use mediaforge_core::job::JobOptions;
use mediaforge_core::listing::{Page, Sort};
use mediaforge_core::types::DbId;
use mediaforge_db::models::job::{JobListQuery, SubmitJob, UpdateJob};
use mediaforge_db::repositories::JobRepo;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::{DataResponse, PageResponse};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Submit a new transcoding job without an input file. Returns 201 with
/// the pending job; the dispatch is scheduled, not awaited.
pub async fn submit_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<SubmitJob>,
) -> AppResult<impl IntoResponse> {
    let job = state.lifecycle.submit(auth.user_id, input, None).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

/// POST /api/v1/jobs/upload
///
/// Multipart submit: an input file plus optional `title`, `description`,
/// `resolution`, `quality`, `codec` fields. The upload is stored under a
/// UUID-prefixed name and the job is dispatched against it.
pub async fn upload_job(
    auth: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut title: Option<String> = None;
    let mut description = String::new();
    let mut options = JobOptions::default();
    let mut input_ref: Option<String> = None;
    let mut original_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "title" => title = Some(read_text(field).await?),
            "description" => description = read_text(field).await?,
            "resolution" => options.resolution = read_text(field).await?,
            "quality" => options.quality = read_text(field).await?,
            "codec" => options.codec = read_text(field).await?,
            "file" | "video" => {
                let file_name = field
                    .file_name()
                    .map(sanitize_file_name)
                    .unwrap_or_else(|| "upload.bin".to_string());
                original_name = Some(file_name.clone());
                input_ref = Some(save_upload(&state, &file_name, field).await?);
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    let Some(input_ref) = input_ref else {
        return Err(AppError::Core(CoreError::Validation(
            "no input file uploaded".into(),
        )));
    };

    let input = SubmitJob {
        // Default the title from the upload, as clients often omit it.
        title: title.unwrap_or_else(|| {
            format!(
                "Transcode: {}",
                original_name.as_deref().unwrap_or("upload")
            )
        }),
        description,
        options,
    };

    let job = state
        .lifecycle
        .submit(auth.user_id, input, Some(input_ref))
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// List / get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Paginated, filtered, sorted listing. Admin users see all jobs; regular
/// users see only their own. Unknown sort fields fall back to
/// `created_at`; invalid order falls back to descending; pages past the
/// end return empty item lists.
pub async fn list_jobs(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let sort = Sort::parse(params.sort.as_deref(), params.order.as_deref());
    let page = Page::parse(params.page, params.per_page);

    let (items, total) =
        JobRepo::list(&state.pool, auth.owner_scope(), &params, sort, page).await?;

    Ok(Json(PageResponse::new(items, total, page)))
}

/// GET /api/v1/jobs/{id}
///
/// Job detail, ownership-checked.
pub async fn get_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.lifecycle.get(job_id, &auth).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Update (runner callback path)
// ---------------------------------------------------------------------------

/// PUT /api/v1/jobs/{id}
///
/// Partial update of `{status, progress, error_message, cpu_time_secs}`.
/// This is the transformation runner's callback path, not an end-user
/// surface: only `runner` and `admin` roles may call it.
pub async fn update_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
    Json(update): Json<UpdateJob>,
) -> AppResult<impl IntoResponse> {
    if !auth.is_runner() {
        return Err(AppError::Core(CoreError::Forbidden(
            "Job updates are reserved for the transformation runner".into(),
        )));
    }
    if update.is_empty() {
        return Err(AppError::BadRequest("No fields to update".into()));
    }
    update
        .validate()
        .map_err(|e| AppError::Core(CoreError::Validation(e.to_string())))?;

    let updated = JobRepo::update_fields(&state.pool, job_id, &update).await?;
    if !updated {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: job_id,
        }));
    }

    tracing::debug!(job_id, caller = auth.user_id, "Job updated via callback path");
    Ok(Json(DataResponse { data: serde_json::json!({ "updated": true }) }))
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// DELETE /api/v1/jobs/{id}
///
/// Ownership-checked delete. Permitted while processing; the in-flight
/// dispatch finds the row gone and discards its late callbacks.
pub async fn delete_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.lifecycle.remove(job_id, &auth).await?;
    Ok(Json(DataResponse {
        data: serde_json::json!({ "deleted": job_id }),
    }))
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/download
///
/// Streams the output artifact of a completed job. 400 (`NOT_READY`)
/// before completion; 404 if the file has gone missing on disk.
pub async fn download_output(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<Response> {
    let (job, path) = state.lifecycle.output_path(job_id, &auth).await?;

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(job_id, path = %path.display(), "Output file missing on disk");
            return Err(AppError::Core(CoreError::NotFound {
                entity: "OutputFile",
                id: job_id,
            }));
        }
        Err(e) => return Err(AppError::InternalError(e.to_string())),
    };

    let size = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .len();

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("job_{}.mp4", job.id));

    let stream = ReaderStream::new(file);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_LENGTH, size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::InternalError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read a text field from a multipart body.
async fn read_text(field: axum::extract::multipart::Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart field: {e}")))
}

/// Keep only the final path component of a client-supplied file name.
fn sanitize_file_name(name: &str) -> String {
    std::path::Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.bin".to_string())
}

/// Stream an uploaded file field to the upload directory under a
/// UUID-prefixed name. Returns the stored path as the input locator.
async fn save_upload(
    state: &AppState,
    file_name: &str,
    mut field: axum::extract::multipart::Field<'_>,
) -> AppResult<String> {
    let dir = state.lifecycle.upload_dir();
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| AppError::InternalError(format!("cannot create upload dir: {e}")))?;

    let path = dir.join(format!("{}-{}", Uuid::new_v4(), file_name));
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| AppError::InternalError(format!("cannot create upload file: {e}")))?;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::BadRequest(format!("Upload stream error: {e}")))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::InternalError(format!("cannot write upload: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| AppError::InternalError(format!("cannot flush upload: {e}")))?;

    Ok(path.to_string_lossy().into_owned())
}
