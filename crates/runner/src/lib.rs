//! Transformation Runner boundary.
//!
//! The lifecycle manager treats the actual media transformation as an
//! opaque long-running operation: it hands over an input locator and an
//! options snapshot, then consumes an ordered event stream. A run emits
//! zero or more non-decreasing [`RunnerEvent::Progress`] events strictly
//! before exactly one terminal event ([`RunnerEvent::Done`] xor
//! [`RunnerEvent::Failed`]).
//!
//! [`FfmpegRunner`] is the production implementation; [`StubRunner`] is a
//! test double whose events are injected by the test.

pub mod ffmpeg;
pub mod stub;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mediaforge_core::job::JobOptions;
use tokio::sync::mpsc;

pub use ffmpeg::FfmpegRunner;
pub use stub::StubRunner;

/// Events reported by a run, in production order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    /// Periodic progress report in percent. Values are non-decreasing.
    Progress(i16),
    /// The run finished and produced an output artifact.
    Done {
        output_path: PathBuf,
        cpu_time_secs: Option<i32>,
    },
    /// The run failed. The message is recorded on the job row.
    Failed(String),
}

/// Receiving end of a single run's event stream.
///
/// Dropping the handle does not cancel the underlying run; the producer
/// side simply sees a closed channel and exits after its next send.
pub struct RunHandle {
    events: mpsc::Receiver<RunnerEvent>,
}

impl RunHandle {
    pub fn new(events: mpsc::Receiver<RunnerEvent>) -> Self {
        Self { events }
    }

    /// Next event, or `None` once the producer is done.
    pub async fn recv(&mut self) -> Option<RunnerEvent> {
        self.events.recv().await
    }
}

/// An opaque long-running media transformation.
///
/// Implementations must uphold the event-ordering contract documented on
/// [`RunnerEvent`]. `run` itself must not block on the transformation:
/// the work happens in a spawned task and is observed via the handle.
#[async_trait]
pub trait TransformRunner: Send + Sync {
    async fn run(&self, input: &Path, options: &JobOptions) -> RunHandle;
}
