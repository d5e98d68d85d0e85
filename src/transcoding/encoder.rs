//! The external encoder seam and a process-backed implementation

use super::pipeline::JobHandle;
use crate::catalog::BitrateLevel;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdout, Command};

/// Everything an encoder needs to produce one rendition
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeRequest {
    pub job_id: String,
    pub recording_id: String,
    pub profile: BitrateLevel,
    pub input_path: PathBuf,
    /// Variant playlist path; segments are written next to it
    pub output_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("Failed to run encoder: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoder exited with {}", describe_exit(.code))]
    Exited { code: Option<i32> },

    #[error("Encoder timed out after {0:?}")]
    Timeout(Duration),

    #[error("Encoding cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Produces one rendition of a source video.
///
/// Implementations should poll [`JobHandle::is_cancelled`] (or await
/// [`JobHandle::cancelled`]) and return [`EncoderError::Cancelled`] promptly.
/// Progress is optional but, when reported, goes through
/// [`JobHandle::report_progress`].
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, request: EncodeRequest, handle: JobHandle) -> Result<(), EncoderError>;
}

/// Runs an ffmpeg-compatible program once per rendition, writing an HLS
/// variant playlist and its `.ts` segments.
#[derive(Debug, Clone)]
pub struct CommandEncoder {
    program: String,
    probe_program: Option<String>,
    timeout: Duration,
    segment_seconds: u32,
}

impl Default for CommandEncoder {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            probe_program: Some("ffprobe".to_string()),
            timeout: Duration::from_secs(60 * 60),
            segment_seconds: 10,
        }
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

impl CommandEncoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Upper bound on a single encode; the child is killed when it expires
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program used to read the source duration for percent progress.
    /// `None` disables probing and only speed is reported.
    pub fn probe_program(mut self, program: Option<String>) -> Self {
        self.probe_program = program;
        self
    }

    pub fn segment_seconds(mut self, seconds: u32) -> Self {
        self.segment_seconds = seconds.max(1);
        self
    }

    /// Command-line arguments for one rendition
    pub fn build_args(&self, request: &EncodeRequest) -> Vec<String> {
        let output_dir = request.output_path.parent().unwrap_or_else(|| Path::new("."));
        let segment_pattern = output_dir.join(format!(
            "{}_{}_%03d.ts",
            request.recording_id, request.profile.bitrate_kbps
        ));
        let bitrate = format!("{}k", request.profile.bitrate_kbps);

        vec![
            "-y".to_string(),
            "-nostats".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-i".to_string(),
            request.input_path.to_string_lossy().into_owned(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-b:v".to_string(),
            bitrate.clone(),
            "-maxrate".to_string(),
            bitrate,
            "-bufsize".to_string(),
            format!("{}k", request.profile.bitrate_kbps * 2),
            "-vf".to_string(),
            format!(
                "scale={}:{}",
                request.profile.resolution.width, request.profile.resolution.height
            ),
            "-r".to_string(),
            format!("{}", request.profile.frame_rate),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "128k".to_string(),
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            self.segment_seconds.to_string(),
            "-hls_playlist_type".to_string(),
            "vod".to_string(),
            "-hls_segment_filename".to_string(),
            segment_pattern.to_string_lossy().into_owned(),
            request.output_path.to_string_lossy().into_owned(),
        ]
    }

    async fn probe_duration(&self, input: &Path) -> Option<f64> {
        let program = self.probe_program.as_ref()?;
        let output = Command::new(program)
            .args(["-v", "error"])
            .args(["-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(input)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
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
            .filter(|secs| secs.is_finite() && *secs > 0.0)
    }
}

/// Forward `-progress` key/value blocks to the job handle
async fn forward_progress(stdout: ChildStdout, total_secs: Option<f64>, handle: JobHandle) {
    let mut lines = BufReader::new(stdout).lines();
    let mut position_secs = 0.0_f64;
    let mut speed = 0.0_f64;

    while let Ok(Some(line)) = lines.next_line().await {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "out_time_us" | "out_time_ms" => {
                // ffmpeg reports microseconds under both keys
                if let Ok(micros) = value.trim().parse::<f64>() {
                    position_secs = micros / 1_000_000.0;
                }
            }
            "speed" => {
                if let Ok(parsed) = value.trim().trim_end_matches('x').parse::<f64>() {
                    speed = parsed;
                }
            }
            "progress" => {
                let percent = match total_secs {
                    Some(total) => position_secs / total * 100.0,
                    None => continue,
                };
                if let Err(e) = handle.report_progress(percent.min(99.0), speed).await {
                    log::debug!("Dropping progress for job {}: {}", handle.job_id(), e);
                    return;
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Encoder for CommandEncoder {
    async fn encode(&self, request: EncodeRequest, handle: JobHandle) -> Result<(), EncoderError> {
        if let Some(dir) = request.output_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let total_secs = self.probe_duration(&request.input_path).await;

        let mut child = Command::new(&self.program)
            .args(self.build_args(&request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        log::debug!(
            "Spawned {} for job {} ({} kbps)",
            self.program,
            request.job_id,
            request.profile.bitrate_kbps
        );

        let reporter = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(forward_progress(stdout, total_secs, handle.clone())));

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = handle.cancelled() => Outcome::Cancelled,
            _ = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
        };

        if let Some(reporter) = reporter {
            reporter.abort();
        }

        match outcome {
            Outcome::Exited(status) => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(EncoderError::Exited { code: status.code() })
                }
            }
            Outcome::Cancelled => {
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill encoder for job {}: {}", request.job_id, e);
                }
                Err(EncoderError::Cancelled)
            }
            Outcome::TimedOut => {
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill encoder for job {}: {}", request.job_id, e);
                }
                Err(EncoderError::Timeout(self.timeout))
            }
        }
    }
}
