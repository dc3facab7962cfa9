//! Manually-driven runner for tests.
//!
//! The test holds a [`StubRunner`] and scripts each run by sending
//! [`RunnerEvent`]s through the controller it obtains up front. This makes
//! the asynchrony of `submit` observable: the test can assert on the
//! pending row before releasing any events.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use mediaforge_core::job::JobOptions;
use tokio::sync::mpsc;

use crate::{RunHandle, RunnerEvent, TransformRunner};

/// Controller for one scripted run.
pub struct RunScript {
    tx: mpsc::Sender<RunnerEvent>,
}

impl RunScript {
    pub async fn progress(&self, percent: i16) {
        self.tx
            .send(RunnerEvent::Progress(percent))
            .await
            .expect("dispatch dropped the run handle");
    }

    pub async fn done(&self, output: &str) {
        self.tx
            .send(RunnerEvent::Done {
                output_path: output.into(),
                cpu_time_secs: Some(1),
            })
            .await
            .expect("dispatch dropped the run handle");
    }

    pub async fn fail(&self, message: &str) {
        self.tx
            .send(RunnerEvent::Failed(message.to_string()))
            .await
            .expect("dispatch dropped the run handle");
    }

    /// Send an event, ignoring a closed channel. For tests that delete the
    /// job mid-run and still fire late callbacks.
    pub async fn try_progress(&self, percent: i16) {
        let _ = self.tx.send(RunnerEvent::Progress(percent)).await;
    }
}

/// A [`TransformRunner`] whose runs do nothing until the test drives them.
///
/// Each call to `run` hands the next scripted channel to the dispatch and
/// queues a matching [`RunScript`] for the test via [`StubRunner::next_script`].
#[derive(Default)]
pub struct StubRunner {
    scripts: Mutex<Vec<RunScript>>,
}

impl StubRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The controller for the most recently started run.
    ///
    /// Panics if no run has started yet; tests should poll the job status
    /// (or yield) until the dispatch has called `run`.
    pub fn next_script(&self) -> RunScript {
        self.scripts
            .lock()
            .expect("stub runner lock poisoned")
            .pop()
            .expect("no run started yet")
    }

    pub fn has_script(&self) -> bool {
        !self.scripts.lock().expect("stub runner lock poisoned").is_empty()
    }
}

#[async_trait]
impl TransformRunner for StubRunner {
    async fn run(&self, _input: &Path, _options: &JobOptions) -> RunHandle {
        let (tx, rx) = mpsc::channel(8);
        self.scripts
            .lock()
            .expect("stub runner lock poisoned")
            .push(RunScript { tx });
        RunHandle::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn scripted_events_arrive_in_order() {
        let runner = StubRunner::new();
        let mut handle = runner.run(Path::new("in.mp4"), &JobOptions::default()).await;
        let script = runner.next_script();

        script.progress(10).await;
        script.progress(40).await;
        script.done("out1").await;

        assert_matches!(handle.recv().await, Some(RunnerEvent::Progress(10)));
        assert_matches!(handle.recv().await, Some(RunnerEvent::Progress(40)));
        assert_matches!(
            handle.recv().await,
            Some(RunnerEvent::Done { output_path, .. }) if output_path == Path::new("out1")
        );
    }

    #[tokio::test]
    async fn dropped_handle_does_not_panic_the_script() {
        let runner = StubRunner::new();
        let handle = runner.run(Path::new("in.mp4"), &JobOptions::default()).await;
        drop(handle);

        let script = runner.next_script();
        script.try_progress(50).await;
    }
}
