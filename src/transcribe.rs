//! Speech-to-text for audio challenges.
//!
//! [`CommandTranscriber`] converts the downloaded MP3 to 16 kHz mono WAV with
//! `ffmpeg` and hands the WAV path to an external recognizer command that
//! prints the transcript on stdout.

use crate::error::{HindexError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Outcome of a speech-to-text attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcription {
    /// Recognized text
    Text(String),
    /// Audio could not be understood
    Unrecognized,
}

/// Speech-to-text capability
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an MP3 audio clip
    async fn transcribe(&self, audio: &[u8]) -> Result<Transcription>;
}

/// Transcriber backed by `ffmpeg` and an external recognizer command
#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    ffmpeg: PathBuf,
    recognizer: Vec<String>,
    work_dir: PathBuf,
}

impl CommandTranscriber {
    /// Create a new CommandTranscriber
    ///
    /// # Arguments
    ///
    /// * `ffmpeg` - Path to the ffmpeg executable
    /// * `recognizer` - Recognizer program followed by its arguments; the WAV
    ///   path is appended as the last argument
    /// * `work_dir` - Directory for the intermediate audio files
    pub fn new(ffmpeg: PathBuf, recognizer: Vec<String>, work_dir: PathBuf) -> Result<Self> {
        if recognizer.is_empty() {
            return Err(HindexError::Config(
                "Recognizer command must not be empty".to_string(),
            ));
        }
        Ok(Self {
            ffmpeg,
            recognizer,
            work_dir,
        })
    }

    async fn convert(&self, mp3: &PathBuf, wav: &PathBuf) -> Result<()> {
        let output = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(mp3)
            .args(["-ar", "16000", "-ac", "1"])
            .arg(wav)
            .output()
            .await
            .map_err(|e| HindexError::Transcription(format!("Failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            return Err(HindexError::Transcription(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<Transcription> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let mp3 = self.work_dir.join("audio.mp3");
        let wav = self.work_dir.join("audio.wav");

        tokio::fs::write(&mp3, audio).await?;
        self.convert(&mp3, &wav).await?;
        debug!(wav = ?wav, "Converted challenge audio");

        let (program, args) = self
            .recognizer
            .split_first()
            .ok_or_else(|| HindexError::Config("Recognizer command must not be empty".to_string()))?;

        let output = Command::new(program)
            .args(args)
            .arg(&wav)
            .output()
            .await
            .map_err(|e| {
                HindexError::Transcription(format!("Failed to run recognizer '{}': {}", program, e))
            })?;

        if !output.status.success() {
            warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Recognizer did not understand the audio"
            );
            return Ok(Transcription::Unrecognized);
        }

        Ok(parse_transcript(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Normalize recognizer output into a transcription
pub fn parse_transcript(stdout: &str) -> Transcription {
    let text = stdout.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        Transcription::Unrecognized
    } else {
        info!(text = %text, "Captcha text");
        Transcription::Text(text)
    }
}
