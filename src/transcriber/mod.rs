//! Audio acquisition and speech-to-text
//!
//! `yt-dlp` pulls the best audio stream and converts it to 16 kHz mono WAV,
//! then `whisper-cli` writes a plain-text transcript next to it. Both run as
//! child processes under one overall timeout; intermediate files are removed
//! whatever the outcome.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{PipelineError, Result};
use crate::storage::validate_video_id;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcript text for one catalog video.
    async fn transcribe(&self, video_id: &str) -> Result<String>;
}

pub struct WhisperCli {
    pub yt_dlp_path: PathBuf,
    pub whisper_cli_path: PathBuf,
    pub model_path: PathBuf,
    pub work_dir: PathBuf,
    pub timeout: Duration,
}

#[async_trait]
impl Transcriber for WhisperCli {
    async fn transcribe(&self, video_id: &str) -> Result<String> {
        validate_video_id(video_id)?;

        if !self.model_path.exists() {
            return Err(PipelineError::Upstream(format!(
                "whisper model not found: {}",
                self.model_path.display()
            )));
        }
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let job_dir = self.work_dir.join(format!("{}-{}", video_id, uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&job_dir).await?;

        let result = tokio::time::timeout(self.timeout, self.run_job(video_id, &job_dir)).await;

        if let Err(e) = tokio::fs::remove_dir_all(&job_dir).await {
            log::warn!("Failed to clean up {}: {}", job_dir.display(), e);
        }

        match result {
            Ok(inner) => inner,
            Err(_) => Err(PipelineError::Upstream(format!(
                "transcription of {} timed out after {}s",
                video_id,
                self.timeout.as_secs()
            ))),
        }
    }
}

impl WhisperCli {
    async fn run_job(&self, video_id: &str, job_dir: &Path) -> Result<String> {
        let audio_path = self.download_audio(video_id, job_dir).await?;
        let output_base = job_dir.join(video_id);
        self.run_whisper(video_id, &audio_path, &output_base).await?;

        let transcript_path = output_base.with_extension("txt");
        let text = tokio::fs::read_to_string(&transcript_path).await.map_err(|e| {
            PipelineError::Upstream(format!(
                "whisper-cli produced no transcript at {}: {}",
                transcript_path.display(),
                e
            ))
        })?;

        let text = text.trim().to_string();
        if text.is_empty() {
            log::warn!("Transcript for {} is empty (no speech detected)", video_id);
        }
        Ok(text)
    }

    async fn download_audio(&self, video_id: &str, job_dir: &Path) -> Result<PathBuf> {
        let output_template = job_dir.join(format!("{}.%(ext)s", video_id));
        let url = format!("https://www.youtube.com/watch?v={}", video_id);

        log::info!("Downloading audio for {}", video_id);

        let output = Command::new(&self.yt_dlp_path)
            .arg("-f")
            .arg("ba")
            .arg("-x")
            .arg("--audio-format")
            .arg("wav")
            .arg("--postprocessor-args")
            .arg("ffmpeg:-ar 16000 -ac 1")
            .arg("--no-playlist")
            .arg("--quiet")
            .arg("-o")
            .arg(&output_template)
            .arg(&url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::Upstream(format!("Failed to spawn yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Upstream(format!(
                "yt-dlp failed with status {}: {}",
                output.status,
                last_line(&stderr)
            )));
        }

        let audio_path = job_dir.join(format!("{}.wav", video_id));
        if !audio_path.exists() {
            return Err(PipelineError::Upstream(format!(
                "yt-dlp finished but {} is missing",
                audio_path.display()
            )));
        }
        Ok(audio_path)
    }

    async fn run_whisper(&self, video_id: &str, audio_path: &Path, output_base: &Path) -> Result<()> {
        log::info!("Running whisper-cli on {}", audio_path.display());

        let mut child = Command::new(&self.whisper_cli_path)
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg(audio_path)
            .arg("-otxt")
            .arg("-of")
            .arg(output_base)
            .arg("-pp")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::Upstream(format!("Failed to spawn whisper-cli: {}", e)))?;

        let mut last_error_line = String::new();
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            let mut last_logged = -1;
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_progress(&line) {
                    Some(progress) if progress / 10 > last_logged / 10 => {
                        log::info!("Transcribing {}: {}%", video_id, progress);
                        last_logged = progress;
                    }
                    Some(_) => {}
                    None if !line.trim().is_empty() => last_error_line = line,
                    None => {}
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| PipelineError::Upstream(format!("Failed to wait for whisper-cli: {}", e)))?;

        if !status.success() {
            return Err(PipelineError::Upstream(format!(
                "whisper-cli failed with status {}: {}",
                status, last_error_line
            )));
        }
        Ok(())
    }
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
}

/// Percentage from a whisper-cli `-pp` line, e.g.
/// `whisper_print_progress_callback: progress =  42%`.
fn parse_progress(line: &str) -> Option<i32> {
    if !line.contains("progress") {
        return None;
    }
    line.split_whitespace().find_map(|part| {
        part.strip_suffix('%')
            .unwrap_or(part)
            .parse::<i32>()
            .ok()
            .filter(|n| (0..=100).contains(n))
    })
}
