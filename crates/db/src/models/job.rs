//! Job entity model and DTOs.

use mediaforge_core::job::JobOptions;
use mediaforge_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::{Validate, ValidationError};

use super::status::JobStatus;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub owner_id: DbId,
    pub title: String,
    pub description: String,
    /// Opaque locator for the submitted input (upload path), if any.
    pub input_ref: Option<String>,
    /// Opaque locator for the produced output. Set iff `completed`.
    pub output_ref: Option<String>,
    /// Immutable [`JobOptions`] snapshot, stored as JSONB.
    pub options: serde_json::Value,
    pub status: JobStatus,
    pub progress: i16,
    /// Set iff `failed`.
    pub error_message: Option<String>,
    pub cpu_time_secs: Option<i32>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl Job {
    /// Decode the options snapshot. Rows written by this service always
    /// hold a valid snapshot; anything else falls back to the defaults.
    pub fn options(&self) -> JobOptions {
        serde_json::from_value(self.options.clone()).unwrap_or_default()
    }
}

/// DTO for submitting a new job via `POST /jobs`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitJob {
    /// Stored trimmed, so whitespace-only is as invalid as empty.
    #[validate(custom(function = title_not_blank))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: JobOptions,
}

fn title_not_blank(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::new("title_blank")
            .with_message("title must not be empty".into()));
    }
    Ok(())
}

/// Partial update applied by the runner callback path (`PUT /jobs/{id}`).
///
/// Only supplied fields are written; everything else is left untouched.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateJob {
    pub status: Option<JobStatus>,
    #[validate(range(min = 0, max = 100, message = "progress must be between 0 and 100"))]
    pub progress: Option<i16>,
    pub error_message: Option<String>,
    pub cpu_time_secs: Option<i32>,
}

impl UpdateJob {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.progress.is_none()
            && self.error_message.is_none()
            && self.cpu_time_secs.is_none()
    }
}

/// Query parameters for `GET /jobs`, raw as deserialized from the URL.
///
/// Normalization (sort allow-list, page clamping) happens in
/// `mediaforge_core::listing` before any SQL is built.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    pub page: Option<i64>,
    /// Page size; `limit` is accepted as an alias.
    #[serde(alias = "limit")]
    pub per_page: Option<i64>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub status: Option<JobStatus>,
    /// Case-insensitive substring match on the title.
    pub title: Option<String>,
    pub resolution: Option<String>,
    pub quality: Option<String>,
    pub codec: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_titles_fail_validation() {
        for title in ["", "   ", "\t\n"] {
            let input = SubmitJob {
                title: title.to_string(),
                description: String::new(),
                options: JobOptions::default(),
            };
            assert!(input.validate().is_err(), "{title:?} should be rejected");
        }
    }

    #[test]
    fn padded_titles_pass_validation() {
        let input = SubmitJob {
            title: "  t1  ".to_string(),
            description: String::new(),
            options: JobOptions::default(),
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn out_of_range_progress_fails_validation() {
        for progress in [-1, 101, 150] {
            let update = UpdateJob {
                progress: Some(progress),
                ..UpdateJob::default()
            };
            assert!(update.validate().is_err(), "{progress} should be rejected");
        }
        let update = UpdateJob {
            progress: Some(100),
            ..UpdateJob::default()
        };
        assert!(update.validate().is_ok());
    }
}
