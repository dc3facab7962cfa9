//! Pure job-domain logic: transformation options and progress rules.
//!
//! The persisted entity and its status enum live in `mediaforge-db`; this
//! module holds only what can be computed without a database.

use serde::{Deserialize, Serialize};

/// Highest progress a job may report while still running. 100 is reserved
/// for the completion write so `progress = 100` holds iff `completed`.
pub const MAX_RUNNING_PROGRESS: i16 = 99;

/// Known output resolutions, mapped to ffmpeg `scale` targets.
pub const RESOLUTIONS: &[(&str, &str)] = &[
    ("480p", "854x480"),
    ("720p", "1280x720"),
    ("1080p", "1920x1080"),
    ("4k", "3840x2160"),
];

/// Known quality tiers. Slower tiers trade CPU time for output quality.
pub const QUALITIES: &[&str] = &["fast", "medium", "slow"];

/// Known codecs.
pub const CODECS: &[&str] = &["h264", "h265"];

/// Transformation options snapshot, immutable once a job is created.
///
/// Persisted as JSONB on the job row. Unknown values are accepted and
/// normalized to the defaults by [`JobOptions::normalized`] so a stray
/// client value cannot produce an unrunnable job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_codec")]
    pub codec: String,
}

fn default_resolution() -> String {
    "720p".to_string()
}

fn default_quality() -> String {
    "medium".to_string()
}

fn default_codec() -> String {
    "h264".to_string()
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            quality: default_quality(),
            codec: default_codec(),
        }
    }
}

impl JobOptions {
    /// Replace unknown option values with the defaults.
    pub fn normalized(mut self) -> Self {
        if !RESOLUTIONS.iter().any(|(name, _)| *name == self.resolution) {
            self.resolution = default_resolution();
        }
        if !QUALITIES.contains(&self.quality.as_str()) {
            self.quality = default_quality();
        }
        if !CODECS.contains(&self.codec.as_str()) {
            self.codec = default_codec();
        }
        self
    }

    /// The ffmpeg `-s` target for this resolution, e.g. `1280x720`.
    pub fn scale_target(&self) -> &'static str {
        RESOLUTIONS
            .iter()
            .find(|(name, _)| *name == self.resolution)
            .map(|(_, size)| *size)
            .unwrap_or("1280x720")
    }
}

/// Clamp a reported progress value to `[current, MAX_RUNNING_PROGRESS]`.
///
/// Progress is monotonically non-decreasing while a job is processing and
/// can never reach 100 before the completion write.
pub fn clamp_progress(current: i16, reported: i16) -> i16 {
    reported.max(current).min(MAX_RUNNING_PROGRESS)
}
