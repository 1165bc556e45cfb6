use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::modules::transcode::model::playlist_name;
use crate::workers::ffmpeg::{MediaConverter, TranscodeError, TranscodeOutput, collect_outputs};

/// What the scripted converter does on every call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Writes a playlist plus `segments` segment files.
    Succeed { segments: usize },
    /// Rejects the input with the given stderr excerpt.
    Fail(String),
    Panic,
}

/// Converter that writes HLS-shaped files without running ffmpeg.
#[derive(Debug)]
pub struct ScriptedConverter {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedConverter {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaConverter for ScriptedConverter {
    async fn convert(
        &self,
        input: &Path,
        output_dir: &Path,
        basename: &str,
    ) -> Result<TranscodeOutput, TranscodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // The worker must have staged the source before converting.
        tokio::fs::metadata(input).await?;

        match &self.script {
            Script::Succeed { segments } => {
                let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n");
                for i in 0..*segments {
                    let name = format!("{}-segment_{:04}.ts", basename, i);
                    tokio::fs::write(output_dir.join(&name), b"\x47segment").await?;
                    playlist.push_str(&format!("#EXTINF:10.0,\n{}\n", name));
                }
                playlist.push_str("#EXT-X-ENDLIST\n");

                let playlist_path = output_dir.join(playlist_name(basename));
                tokio::fs::write(&playlist_path, playlist).await?;

                Ok(TranscodeOutput {
                    playlist: playlist_path,
                    files: collect_outputs(output_dir).await?,
                    elapsed: Duration::from_millis(5),
                })
            }
            Script::Fail(stderr) => Err(TranscodeError::Failed {
                exit_code: Some(1),
                stderr_tail: stderr.clone(),
            }),
            Script::Panic => panic!("converter crashed"),
        }
    }
}
