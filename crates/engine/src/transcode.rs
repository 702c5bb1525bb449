use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use log::debug;

/// How the output file beside the source is named
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingMode {
    /// `<stem>.temp.mp4` — renamed onto the original by the commit engine
    TempForInPlace,
    /// `<stem><suffix>.mp4` — the final name, recorded as-is
    Suffixed,
}

/// One encode invocation: source, destination directory, naming, and the
/// fixed quality/rate parameters.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub source: PathBuf,
    pub dest_dir: PathBuf,
    pub naming: NamingMode,
    pub suffix: String,
    pub video_crf: u8,
    pub audio_bitrate_kbps: u32,
}

/// Terminal result of an encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeOutcome {
    Success,
    Failed { detail: String },
}

/// Cancellable handle to an in-flight encode.
///
/// `try_outcome` never blocks; `cancel` is safe to call at any time,
/// including after completion or repeatedly.
pub trait EncodeHandle: Send {
    fn try_outcome(&mut self) -> Result<Option<EncodeOutcome>>;
    fn cancel(&mut self);
}

/// External encode collaborator. Output naming is synchronous; the encode
/// itself starts asynchronously and is observed through the returned handle.
pub trait Transcoder: Send + Sync {
    fn output_path(&self, req: &EncodeRequest) -> PathBuf {
        derive_output_path(req)
    }

    fn start(&self, req: &EncodeRequest) -> Result<Box<dyn EncodeHandle>>;
}

/// Derive the output path for a request following its naming mode
pub fn derive_output_path(req: &EncodeRequest) -> PathBuf {
    let stem = req
        .source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    match req.naming {
        NamingMode::TempForInPlace => req.dest_dir.join(format!("{}.temp.mp4", stem)),
        NamingMode::Suffixed => req.dest_dir.join(format!("{}{}.mp4", stem, req.suffix)),
    }
}

/// Transcoder backed by a local ffmpeg binary.
///
/// Fixed target: H.264 at the configured CRF, AAC at the configured bitrate,
/// MP4 container with `+faststart` for progressive playback.
pub struct FfmpegTranscoder {
    ffmpeg_bin: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_bin: PathBuf) -> Self {
        FfmpegTranscoder { ffmpeg_bin }
    }

    fn build_args(req: &EncodeRequest, output: &Path) -> Vec<String> {
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            req.source.to_string_lossy().into_owned(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-crf".to_string(),
            req.video_crf.to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            format!("{}k", req.audio_bitrate_kbps),
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

impl Transcoder for FfmpegTranscoder {
    fn start(&self, req: &EncodeRequest) -> Result<Box<dyn EncodeHandle>> {
        let output = self.output_path(req);
        let args = Self::build_args(req, &output);
        debug!("ffmpeg args: {:?}", args);

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "Failed to spawn ffmpeg at {} for: {}",
                self.ffmpeg_bin.display(),
                req.source.display()
            )
        })?;

        // Drain stderr as it arrives so the pipe never fills; the collected
        // lines become the diagnostic text on failure.
        let diagnostics = Arc::new(Mutex::new(Vec::new()));
        if let Some(stderr) = child.stderr.take() {
            let sink = Arc::clone(&diagnostics);
            tokio::spawn(async move {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(mut sink) = sink.lock() {
                        sink.push(line);
                    }
                }
            });
        }

        Ok(Box::new(FfmpegHandle {
            child,
            diagnostics,
            outcome: None,
        }))
    }
}

struct FfmpegHandle {
    child: tokio::process::Child,
    diagnostics: Arc<Mutex<Vec<String>>>,
    outcome: Option<EncodeOutcome>,
}

impl FfmpegHandle {
    fn collect_diagnostics(&self) -> String {
        self.diagnostics
            .lock()
            .map(|lines| lines.join("\n"))
            .unwrap_or_default()
    }
}

impl EncodeHandle for FfmpegHandle {
    fn try_outcome(&mut self) -> Result<Option<EncodeOutcome>> {
        if let Some(outcome) = &self.outcome {
            return Ok(Some(outcome.clone()));
        }
        let status = match self.child.try_wait().context("Failed to poll ffmpeg process")? {
            Some(s) => s,
            None => return Ok(None),
        };
        let outcome = if status.success() {
            EncodeOutcome::Success
        } else {
            let detail = format!(
                "ffmpeg exit code {}: {}",
                status.code().unwrap_or(-1),
                self.collect_diagnostics()
            );
            EncodeOutcome::Failed { detail }
        };
        self.outcome = Some(outcome.clone());
        Ok(Some(outcome))
    }

    fn cancel(&mut self) {
        // No-op once the process has already exited
        let _ = self.child.start_kill();
    }
}
