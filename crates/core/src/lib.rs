//! Pure domain logic for the media transcoding job service.
//!
//! This crate has zero internal dependencies. It holds the error taxonomy,
//! shared type aliases, the job state machine, listing normalization, and
//! submit validation. Anything touching Postgres or HTTP lives in
//! `mediaforge-db` / `mediaforge-api`.

pub mod error;
pub mod job;
pub mod listing;
pub mod roles;
pub mod types;
