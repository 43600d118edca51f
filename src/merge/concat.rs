//! External concatenation step.
//!
//! [`AudioConcatenator`] is the seam between orchestration and the external
//! audio tool. The production implementation, [`FfmpegConcatenator`], runs
//! FFmpeg once per group with the `concat` filter, re-encoding everything to
//! a uniform MP3 stream (44.1 kHz, stereo, 192 kb/s) so inputs with differing
//! parameters can be joined.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ConcatError;

/// Default executable name.
pub const DEFAULT_TOOL_PATH: &str = "ffmpeg";

/// Default per-group time budget.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Time budget for the availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes of stderr kept in error messages.
const STDERR_TAIL: usize = 2048;

const SAMPLE_RATE: &str = "44100";
const CHANNELS: &str = "2";
const BITRATE: &str = "192k";
const CODEC: &str = "libmp3lame";

/// Joins an ordered list of audio files into one output file.
#[async_trait]
pub trait AudioConcatenator: Send + Sync {
    /// Concatenate `inputs` in order into `output`.
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ConcatError>;

    /// Extension of the files this concatenator produces.
    fn output_extension(&self) -> &str {
        "mp3"
    }
}

/// Runs FFmpeg as a child process per group.
#[derive(Debug, Clone)]
pub struct FfmpegConcatenator {
    program: PathBuf,
    timeout: Duration,
}

impl FfmpegConcatenator {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn tool_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Command-line arguments for one group.
    pub fn args(inputs: &[PathBuf], output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];
        for input in inputs {
            args.push("-i".into());
            args.push(input.display().to_string());
        }

        let streams: String = (0..inputs.len()).map(|i| format!("[{}:a]", i)).collect();
        args.push("-filter_complex".into());
        args.push(format!("{}concat=n={}:v=0:a=1[out]", streams, inputs.len()));

        for arg in [
            "-map", "[out]", "-ar", SAMPLE_RATE, "-ac", CHANNELS, "-b:a", BITRATE, "-c:a", CODEC,
        ] {
            args.push(arg.into());
        }
        args.push(output.display().to_string());
        args
    }
}

impl Default for FfmpegConcatenator {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_PATH, DEFAULT_TOOL_TIMEOUT)
    }
}

#[async_trait]
impl AudioConcatenator for FfmpegConcatenator {
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ConcatError> {
        if inputs.is_empty() {
            return Err(ConcatError::EmptyGroup);
        }

        let tool = self.tool_name();
        debug!(tool = %tool, inputs = inputs.len(), output = %output.display(), "Starting concatenation");

        let child = Command::new(&self.program)
            .args(Self::args(inputs, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConcatError::Spawn {
                tool: tool.clone(),
                message: e.to_string(),
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = %tool, timeout_secs = self.timeout.as_secs(), "Concatenation timed out");
                return Err(ConcatError::TimedOut {
                    tool,
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let output_status = result.map_err(|e| ConcatError::Spawn {
            tool: tool.clone(),
            message: e.to_string(),
        })?;

        if !output_status.status.success() {
            return Err(ConcatError::Failed {
                tool,
                status: output_status.status.to_string(),
                stderr: stderr_tail(&output_status.stderr),
            });
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(ConcatError::MissingOutput {
                tool,
                path: output.to_path_buf(),
            });
        }

        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    let mut start = trimmed.len().saturating_sub(STDERR_TAIL);
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

/// Check that `program` can be executed by running it with `-version`.
pub async fn probe_tool(program: &Path) -> bool {
    let probe = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            warn!(tool = %program.display(), error = %e, "Tool probe failed");
            false
        }
        Err(_) => {
            warn!(tool = %program.display(), "Tool probe timed out");
            false
        }
    }
}
