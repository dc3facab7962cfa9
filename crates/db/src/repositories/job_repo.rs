//! Repository for the `jobs` table.
//!
//! Every status-changing write carries a `WHERE status = ...` guard so a
//! late callback can never overwrite a terminal state, and progress writes
//! clamp with `GREATEST` so persisted progress is monotonic regardless of
//! delivery order. Dispatch-path methods return `bool` (row matched) so a
//! callback racing a delete is a logged no-op, not an error.

use mediaforge_core::listing::{Page, Sort};
use mediaforge_core::job::MAX_RUNNING_PROGRESS;
use mediaforge_core::types::DbId;
use sqlx::PgPool;

use crate::models::job::{Job, JobListQuery, SubmitJob, UpdateJob};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, owner_id, title, description, input_ref, output_ref, options, \
    status, progress, error_message, cpu_time_secs, \
    created_at, started_at, completed_at";

/// Provides CRUD operations and dispatch-path writes for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Create a new pending job with progress 0.
    pub async fn create(
        pool: &PgPool,
        owner_id: DbId,
        input: &SubmitJob,
        input_ref: Option<&str>,
    ) -> Result<Job, sqlx::Error> {
        let options = serde_json::to_value(input.options.clone().normalized())
            .unwrap_or_else(|_| serde_json::json!({}));

        let query = format!(
            "INSERT INTO jobs (owner_id, title, description, input_ref, options) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(owner_id)
            .bind(input.title.trim())
            .bind(&input.description)
            .bind(input_ref)
            .bind(options)
            .fetch_one(pool)
            .await
    }

    /// Find a job by ID. When `owner` is `Some`, restricts to that owner's
    /// rows (a non-matching owner sees nothing, same as a missing row);
    /// `None` is the admin view.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
        owner: Option<DbId>,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE id = $1 AND ($2::bigint IS NULL OR owner_id = $2)"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(owner)
            .fetch_optional(pool)
            .await
    }

    /// List jobs with filters, sorting, and pagination. Returns the page of
    /// rows and the total match count (before pagination).
    ///
    /// `sort` and `page` must come from `mediaforge_core::listing`
    /// normalization; the sort field is interpolated into the SQL and is
    /// only safe because it is drawn from the allow-list.
    pub async fn list(
        pool: &PgPool,
        owner: Option<DbId>,
        params: &JobListQuery,
        sort: Sort,
        page: Page,
    ) -> Result<(Vec<Job>, i64), sqlx::Error> {
        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        // The title filter is a substring match, so LIKE metacharacters in
        // the user's text must match literally.
        let title = params.title.as_deref().map(escape_like);

        if owner.is_some() {
            conditions.push(format!("owner_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.status.is_some() {
            conditions.push(format!("status = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.title.is_some() {
            // Case-insensitive substring match.
            conditions.push(format!("title ILIKE '%' || ${bind_idx} || '%'"));
            bind_idx += 1;
        }
        if params.resolution.is_some() {
            conditions.push(format!("options->>'resolution' = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.quality.is_some() {
            conditions.push(format!("options->>'quality' = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.codec.is_some() {
            conditions.push(format!("options->>'codec' = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_query = format!("SELECT COUNT(*) FROM jobs {where_clause}");
        let mut count = sqlx::query_scalar::<_, i64>(&count_query);
        if let Some(uid) = owner {
            count = count.bind(uid);
        }
        if let Some(status) = params.status {
            count = count.bind(status);
        }
        if let Some(title) = &title {
            count = count.bind(title);
        }
        if let Some(resolution) = &params.resolution {
            count = count.bind(resolution);
        }
        if let Some(quality) = &params.quality {
            count = count.bind(quality);
        }
        if let Some(codec) = &params.codec {
            count = count.bind(codec);
        }
        let total = count.fetch_one(pool).await?;

        let data_query = format!(
            "SELECT {COLUMNS} FROM jobs \
             {where_clause} \
             ORDER BY {field} {order} \
             LIMIT ${limit_idx} OFFSET ${offset_idx}",
            field = sort.field,
            order = sort.order.as_sql(),
            limit_idx = bind_idx,
            offset_idx = bind_idx + 1,
        );
        let mut rows = sqlx::query_as::<_, Job>(&data_query);
        if let Some(uid) = owner {
            rows = rows.bind(uid);
        }
        if let Some(status) = params.status {
            rows = rows.bind(status);
        }
        if let Some(title) = &title {
            rows = rows.bind(title);
        }
        if let Some(resolution) = &params.resolution {
            rows = rows.bind(resolution);
        }
        if let Some(quality) = &params.quality {
            rows = rows.bind(quality);
        }
        if let Some(codec) = &params.codec {
            rows = rows.bind(codec);
        }
        let items = rows
            .bind(page.per_page)
            .bind(page.offset())
            .fetch_all(pool)
            .await?;

        Ok((items, total))
    }

    /// Apply a partial update (runner callback path). Only supplied fields
    /// are written. A status change also maintains `started_at` /
    /// `completed_at`, and terminal rows are never modified. Progress is
    /// derived as 100 when the row lands in `completed` and is otherwise
    /// clamped to `[0, 99]`, keeping `progress = 100` iff `completed`.
    ///
    /// Returns `false` if no row matched.
    pub async fn update_fields(
        pool: &PgPool,
        id: DbId,
        update: &UpdateJob,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET \
                 status = COALESCE($2, status), \
                 progress = CASE \
                     WHEN COALESCE($2, status) = 'completed'::job_status THEN 100 \
                     ELSE LEAST(GREATEST(COALESCE($3, progress), 0), $6) END, \
                 error_message = COALESCE($4, error_message), \
                 cpu_time_secs = COALESCE($5, cpu_time_secs), \
                 started_at = CASE \
                     WHEN $2 = 'processing'::job_status THEN COALESCE(started_at, NOW()) \
                     ELSE started_at END, \
                 completed_at = CASE \
                     WHEN $2 IN ('completed'::job_status, 'failed'::job_status) \
                         THEN COALESCE(completed_at, NOW()) \
                     ELSE completed_at END \
             WHERE id = $1 AND status NOT IN ('completed', 'failed')",
        )
        .bind(id)
        .bind(update.status)
        .bind(update.progress)
        .bind(&update.error_message)
        .bind(update.cpu_time_secs)
        .bind(MAX_RUNNING_PROGRESS)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a job, owner-scoped like [`Self::find_by_id`]. Returns the
    /// deleted row so the caller can release its artifacts.
    pub async fn delete(
        pool: &PgPool,
        id: DbId,
        owner: Option<DbId>,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "DELETE FROM jobs \
             WHERE id = $1 AND ($2::bigint IS NULL OR owner_id = $2) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(owner)
            .fetch_optional(pool)
            .await
    }

    // -----------------------------------------------------------------
    // Dispatch-path writes. All writes for one job id flow through its
    // single dispatch task, so these execute in production order; the
    // status guards below protect against a delete racing the dispatch.
    // -----------------------------------------------------------------

    /// Transition pending -> processing and set `started_at`.
    pub async fn mark_started(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'processing', started_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist a progress report, clamped to `[current, 99]`. Only rows
    /// still in `processing` are touched, so progress can never resurrect
    /// or overwrite a terminal state.
    pub async fn update_progress(
        pool: &PgPool,
        id: DbId,
        reported: i16,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET progress = LEAST(GREATEST(progress, $2), $3) \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(reported.max(0))
        .bind(MAX_RUNNING_PROGRESS)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Transition processing -> completed: sets the output locator,
    /// progress 100, `completed_at`, and the CPU time metric (falling back
    /// to wall-clock elapsed since `started_at`).
    pub async fn complete(
        pool: &PgPool,
        id: DbId,
        output_ref: &str,
        cpu_time_secs: Option<i32>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = 'completed', output_ref = $2, progress = 100, \
                 completed_at = NOW(), error_message = NULL, \
                 cpu_time_secs = COALESCE($3, \
                     EXTRACT(EPOCH FROM NOW() - started_at)::INTEGER) \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(output_ref)
        .bind(cpu_time_secs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Transition to failed: records the error message and `completed_at`.
    /// Allowed from `pending` as well so a dispatch that dies before
    /// `mark_started` still lands in a terminal state.
    pub async fn fail(pool: &PgPool, id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = 'failed', error_message = $2, output_ref = NULL, \
                 completed_at = NOW(), \
                 cpu_time_secs = EXTRACT(EPOCH FROM \
                     COALESCE(NOW() - started_at, INTERVAL '0'))::INTEGER \
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Escape LIKE/ILIKE metacharacters so a filter string matches literally.
/// Postgres treats backslash as the default LIKE escape character.
fn escape_like(pattern: &str) -> String {
    pattern
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
