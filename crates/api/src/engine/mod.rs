//! Job orchestration engine.

pub mod lifecycle;

pub use lifecycle::JobLifecycle;
