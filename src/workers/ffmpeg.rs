//! ffmpeg invocation for HLS packaging.
//!
//! The conversion tool is treated as an opaque subprocess: we build its
//! arguments, drain its stderr while it runs, and classify the outcome.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::modules::transcode::model::playlist_name;

/// Only the trailing part of ffmpeg's stderr is kept for diagnostics.
pub const STDERR_TAIL_BYTES: usize = 4 * 1024;

pub const COPY_CODEC: &str = "copy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeSettings {
    pub video_codec: String,
    pub audio_codec: String,
    pub segment_duration_seconds: u32,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            video_codec: COPY_CODEC.to_string(),
            audio_codec: COPY_CODEC.to_string(),
            segment_duration_seconds: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ffmpeg failed (exit code {exit_code:?}): {stderr_tail}")]
    Failed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("I/O error while transcoding: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    /// True when the input itself was rejected, as opposed to the
    /// environment failing to run the tool.
    pub fn is_rejection(&self) -> bool {
        matches!(self, TranscodeError::Failed { .. })
    }

    /// Non-empty diagnostic text suitable for the job record.
    pub fn diagnostic(&self) -> String {
        match self {
            TranscodeError::Failed { exit_code, stderr_tail } if stderr_tail.trim().is_empty() => {
                match exit_code {
                    Some(0) => "ffmpeg exited successfully but wrote no playlist".to_string(),
                    Some(code) => format!("ffmpeg exited with status {} and no diagnostic output", code),
                    None => "ffmpeg was terminated without diagnostic output".to_string(),
                }
            }
            TranscodeError::Failed { stderr_tail, .. } => stderr_tail.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub playlist: PathBuf,
    /// Playlist and segments, sorted by file name.
    pub files: Vec<PathBuf>,
    pub elapsed: Duration,
}

/// Seam between the worker loop and the conversion tool.
#[async_trait]
pub trait MediaConverter: Send + Sync {
    async fn convert(
        &self,
        input: &Path,
        output_dir: &Path,
        basename: &str,
    ) -> Result<TranscodeOutput, TranscodeError>;
}

pub struct Transcoder {
    settings: TranscodeSettings,
    ffmpeg_path: String,
    time_limit: Option<Duration>,
}

impl Transcoder {
    pub fn new(settings: TranscodeSettings, ffmpeg_path: impl Into<String>, time_limit: Option<Duration>) -> Self {
        Self {
            settings,
            ffmpeg_path: ffmpeg_path.into(),
            time_limit,
        }
    }

    pub fn build_args(&self, input: &Path, output_dir: &Path, basename: &str) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ];

        let video = self.settings.video_codec.as_str();
        let audio = self.settings.audio_codec.as_str();
        if video == COPY_CODEC && audio == COPY_CODEC {
            args.extend(["-codec".to_string(), COPY_CODEC.to_string()]);
        } else {
            args.extend([
                "-c:v".to_string(),
                video.to_string(),
                "-c:a".to_string(),
                audio.to_string(),
            ]);
        }

        args.extend([
            "-f".to_string(),
            "hls".to_string(),
            "-start_number".to_string(),
            "0".to_string(),
            "-hls_time".to_string(),
            self.settings.segment_duration_seconds.to_string(),
            "-hls_list_size".to_string(),
            "0".to_string(),
            "-hls_segment_filename".to_string(),
            output_dir
                .join(format!("{}-segment_%04d.ts", basename))
                .to_string_lossy()
                .to_string(),
        ]);

        args.push(output_dir.join(playlist_name(basename)).to_string_lossy().to_string());
        args
    }
}

#[async_trait]
impl MediaConverter for Transcoder {
    async fn convert(
        &self,
        input: &Path,
        output_dir: &Path,
        basename: &str,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let started = Instant::now();
        let args = self.build_args(input, output_dir, basename);
        let playlist = output_dir.join(playlist_name(basename));

        debug!("Running {} {}", self.ffmpeg_path, args.join(" "));

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                program: self.ffmpeg_path.clone(),
                source,
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("ffmpeg stderr was not captured"))?;

        // stderr is read to EOF before waiting so a full pipe never blocks the child.
        let run = async {
            let tail = drain_tail(stderr, STDERR_TAIL_BYTES).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, tail))
        };

        let outcome = match self.time_limit {
            Some(limit) => timeout(limit, run).await.ok(),
            None => Some(run.await),
        };

        let (status, stderr_tail) = match outcome {
            Some(result) => result?,
            None => {
                child.kill().await?;
                return Err(TranscodeError::Failed {
                    exit_code: None,
                    stderr_tail: format!(
                        "ffmpeg did not finish within {}s and was killed",
                        self.time_limit.map(|d| d.as_secs()).unwrap_or_default()
                    ),
                });
            }
        };

        if !status.success() || !tokio::fs::try_exists(&playlist).await? {
            return Err(TranscodeError::Failed {
                exit_code: status.code(),
                stderr_tail,
            });
        }

        let files = collect_outputs(output_dir).await?;
        let elapsed = started.elapsed();
        info!(
            "ffmpeg produced {} files for {} in {:.1}s",
            files.len(),
            basename,
            elapsed.as_secs_f64()
        );

        Ok(TranscodeOutput {
            playlist,
            files,
            elapsed,
        })
    }
}

/// Reads `reader` to EOF, logging each line and keeping only the last
/// `limit` bytes.
pub async fn drain_tail<R>(reader: R, limit: usize) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut tail: Vec<u8> = Vec::with_capacity(limit * 2);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).await?;
        if read == 0 {
            break;
        }

        debug!(target: "ffmpeg", "{}", String::from_utf8_lossy(&line).trim_end());
        tail.extend_from_slice(&line);
        if tail.len() > limit * 2 {
            tail.drain(..tail.len() - limit);
        }
    }

    Ok(tail_excerpt(&tail, limit))
}

/// Last `limit` bytes of `bytes`, starting on a UTF-8 character boundary.
pub fn tail_excerpt(bytes: &[u8], limit: usize) -> String {
    let mut start = bytes.len().saturating_sub(limit);
    while start < bytes.len() && (bytes[start] & 0xC0) == 0x80 {
        start += 1;
    }
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

/// Playlist and segment files in `dir`, sorted by name.
pub async fn collect_outputs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_output = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| ext == "m3u8" || ext == "ts");
        if is_output && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
