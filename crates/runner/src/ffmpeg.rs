//! ffmpeg-backed transformation runner.
//!
//! Spawns `ffmpeg` as a child process with arguments derived from the job
//! options, and translates its `-progress` key/value output into
//! [`RunnerEvent::Progress`] reports. Output duration for the percent
//! calculation comes from a prior `ffprobe` call; when probing fails the
//! run still works, it just emits no progress events.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use mediaforge_core::job::{JobOptions, MAX_RUNNING_PROGRESS};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;

use crate::{RunHandle, RunnerEvent, TransformRunner};

/// How many trailing stderr bytes to keep for the failure message.
const STDERR_TAIL_BYTES: usize = 2048;

/// Event channel depth. Progress reports are tiny and infrequent; a slow
/// consumer briefly backpressures the reader task, nothing more.
const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// Directory where output artifacts are written.
    output_dir: PathBuf,
}

impl FfmpegRunner {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl TransformRunner for FfmpegRunner {
    async fn run(&self, input: &Path, options: &JobOptions) -> RunHandle {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let input = input.to_path_buf();
        let options = options.clone();
        let output_dir = self.output_dir.clone();

        tokio::spawn(async move {
            let event = execute(&input, &options, &output_dir, &tx).await;
            // Exactly one terminal event per run. If the consumer is gone
            // (job deleted, server shutting down) the send just fails.
            let _ = tx.send(event).await;
        });

        RunHandle::new(rx)
    }
}

/// Run the transcode to completion and return the terminal event.
async fn execute(
    input: &Path,
    options: &JobOptions,
    output_dir: &Path,
    tx: &mpsc::Sender<RunnerEvent>,
) -> RunnerEvent {
    if !input.exists() {
        return RunnerEvent::Failed(format!("input file not found: {}", input.display()));
    }
    if let Err(e) = tokio::fs::create_dir_all(output_dir).await {
        return RunnerEvent::Failed(format!("cannot create output directory: {e}"));
    }

    let duration_secs = probe_duration(input).await;
    if duration_secs.is_none() {
        tracing::warn!(input = %input.display(), "ffprobe failed, progress reporting disabled");
    }

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "job".to_string());
    let output_path = output_dir.join(format!("{stem}_transcoded.mp4"));

    let started = Instant::now();

    let mut child = match tokio::process::Command::new("ffmpeg")
        .args(transcode_args(input, &output_path, options))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return RunnerEvent::Failed(format!("failed to spawn ffmpeg: {e}")),
    };

    // Drain stderr concurrently: ffmpeg blocks once the pipe fills, and
    // this task must never sit behind the stdout loop.
    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            let start = buf.len().saturating_sub(STDERR_TAIL_BYTES);
            buf[start..].to_string()
        })
    });

    // `-progress pipe:1` writes key=value lines to stdout. The pipe is
    // drained to EOF even when no percent can be computed, so ffmpeg never
    // dies on EPIPE mid-transcode.
    if let Some(stdout) = child.stdout.take() {
        pump_progress(stdout, duration_secs, tx).await;
    }

    let stderr_tail = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    match child.wait().await {
        Ok(status) if status.success() => RunnerEvent::Done {
            output_path,
            cpu_time_secs: Some(started.elapsed().as_secs() as i32),
        },
        Ok(status) => {
            discard_partial_output(&output_path).await;
            RunnerEvent::Failed(format!(
                "ffmpeg exited with {status}: {}",
                stderr_tail.trim()
            ))
        }
        Err(e) => {
            discard_partial_output(&output_path).await;
            RunnerEvent::Failed(format!("failed to wait for ffmpeg: {e}"))
        }
    }
}

/// Read `-progress` lines to EOF, reporting percent events along the way.
///
/// Always consumes the whole stream: with an unknown duration, or after
/// the event consumer goes away, lines are still read and discarded so
/// ffmpeg can keep writing.
async fn pump_progress<R>(stdout: R, total_secs: Option<f64>, tx: &mpsc::Sender<RunnerEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    let mut last_percent: i16 = 0;
    let mut reporting = true;

    while let Ok(Some(line)) = lines.next_line().await {
        if !reporting {
            continue;
        }
        let Some(total) = total_secs else { continue };
        if let Some(percent) = progress_percent(&line, total) {
            if percent > last_percent {
                last_percent = percent;
                if tx.send(RunnerEvent::Progress(percent)).await.is_err() {
                    reporting = false;
                }
            }
        }
    }
}

/// Remove a partially-written output file after a failed run. Best-effort:
/// a cleanup failure is logged, never escalated.
async fn discard_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial output");
        }
    }
}

/// Run `ffprobe` and return the container duration in seconds.
async fn probe_duration(path: &Path) -> Option<f64> {
    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| *d > 0.0)
}

/// Build the ffmpeg argument list for a transcode.
///
/// Preset/CRF/filter choices per quality tier: `slow` maximizes quality
/// (and CPU time), `fast` favors throughput.
fn transcode_args(input: &Path, output: &Path, options: &JobOptions) -> Vec<String> {
    let codec = match options.codec.as_str() {
        "h265" => "libx265",
        _ => "libx264",
    };
    let (preset, crf, threads) = match options.quality.as_str() {
        "slow" => ("veryslow", "15", "1"),
        "fast" => ("slow", "23", "4"),
        _ => ("slower", "18", "2"),
    };

    let mut filters = vec![
        "scale=iw:ih:flags=lanczos".to_string(),
        "unsharp=5:5:1.0:5:5:0.0".to_string(),
        "eq=contrast=1.1:brightness=0.05:saturation=1.1".to_string(),
    ];
    if options.quality == "slow" {
        filters.push("hqdn3d=4:3:6:4.5".to_string());
    }

    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-c:v".into(),
        codec.into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-preset".into(),
        preset.into(),
        "-crf".into(),
        crf.into(),
        "-threads".into(),
        threads.into(),
        "-s".into(),
        options.scale_target().into(),
        "-vf".into(),
        filters.join(","),
        "-progress".into(),
        "pipe:1".into(),
        "-nostats".into(),
    ];
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Parse one `-progress` line into a percent of `total_secs`.
///
/// ffmpeg reports `out_time_us=<microseconds>` (and a legacy `out_time_ms`
/// key that also carries microseconds).
fn progress_percent(line: &str, total_secs: f64) -> Option<i16> {
    let (key, value) = line.trim().split_once('=')?;
    if key != "out_time_us" && key != "out_time_ms" {
        return None;
    }
    let elapsed_secs = value.parse::<f64>().ok()? / 1_000_000.0;
    let percent = (elapsed_secs / total_secs * 100.0).floor() as i16;
    Some(percent.clamp(0, MAX_RUNNING_PROGRESS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_quality_maps_to_veryslow_single_thread() {
        let options = JobOptions {
            quality: "slow".into(),
            codec: "h265".into(),
            resolution: "1080p".into(),
        };
        let args = transcode_args(Path::new("in.mp4"), Path::new("out.mp4"), &options);

        let find = |flag: &str| {
            let idx = args.iter().position(|a| a == flag).unwrap();
            args[idx + 1].clone()
        };
        assert_eq!(find("-c:v"), "libx265");
        assert_eq!(find("-preset"), "veryslow");
        assert_eq!(find("-crf"), "15");
        assert_eq!(find("-threads"), "1");
        assert_eq!(find("-s"), "1920x1080");
        assert!(find("-vf").contains("hqdn3d"));
    }

    #[test]
    fn default_quality_skips_denoise_filter() {
        let args = transcode_args(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            &JobOptions::default(),
        );
        let vf = args[args.iter().position(|a| a == "-vf").unwrap() + 1].clone();
        assert!(!vf.contains("hqdn3d"));
        assert!(vf.contains("lanczos"));
    }

    #[tokio::test]
    async fn pump_reports_each_percent_once_in_order() {
        let input: &[u8] =
            b"out_time_us=30000000\nspeed=1.5x\nout_time_us=30000000\nout_time_us=45000000\n";
        let (tx, mut rx) = mpsc::channel(8);

        pump_progress(input, Some(60.0), &tx).await;
        drop(tx);

        assert_eq!(rx.recv().await, Some(RunnerEvent::Progress(50)));
        assert_eq!(rx.recv().await, Some(RunnerEvent::Progress(75)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn pump_drains_stream_when_duration_is_unknown() {
        let input = b"out_time_us=30000000\nframe=42\n".repeat(500);
        let (tx, mut rx) = mpsc::channel(1);

        // Must reach EOF without filling the channel or stalling.
        pump_progress(input.as_slice(), None, &tx).await;
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn pump_drains_stream_after_consumer_is_gone() {
        let input = b"out_time_us=30000000\nout_time_us=45000000\n".repeat(500);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        // A closed consumer stops reporting, not draining.
        pump_progress(input.as_slice(), Some(60.0), &tx).await;
    }

    #[test]
    fn progress_lines_parse_to_clamped_percent() {
        // 30s of a 60s file.
        assert_eq!(progress_percent("out_time_us=30000000", 60.0), Some(50));
        assert_eq!(progress_percent("out_time_ms=30000000", 60.0), Some(50));
        // Past the end clamps below 100.
        assert_eq!(
            progress_percent("out_time_us=90000000", 60.0),
            Some(MAX_RUNNING_PROGRESS)
        );
        // Unrelated keys are ignored.
        assert_eq!(progress_percent("frame=42", 60.0), None);
        assert_eq!(progress_percent("speed=1.5x", 60.0), None);
    }
}
