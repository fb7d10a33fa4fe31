use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
const AUDIO_EXTENSIONS: &[&str] = &["ogg", "mp3", "wav", "m4a", "aac", "flac"];

/// Container Discord uses for recorded voice messages.
const NATIVE_VOICE_EXTENSION: &str = "ogg";

const GENERIC_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentCategory {
    Image,
    Voice,
    Document,
}

/// A fetched attachment: name, declared type and payload.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
    pub url: String,
}

/// An attachment ready for upload.
#[derive(Debug, Clone)]
pub struct ClassifiedAttachment {
    pub category: AttachmentCategory,
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Extension first; the content type only decides when the extension says nothing.
pub fn categorize(filename: &str, content_type: Option<&str>) -> AttachmentCategory {
    if let Some(ext) = extension(filename) {
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return AttachmentCategory::Image;
        }
        if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            return AttachmentCategory::Voice;
        }
    }

    let content_type = content_type.unwrap_or(GENERIC_CONTENT_TYPE).to_ascii_lowercase();
    if content_type.starts_with("image/") {
        AttachmentCategory::Image
    } else if content_type.starts_with("audio/") {
        AttachmentCategory::Voice
    } else {
        AttachmentCategory::Document
    }
}

/// Converts a voice clip to the canonical upload format.
#[async_trait]
pub trait VoiceTranscoder: Send + Sync {
    async fn to_wav(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Runs the `ffmpeg` binary to produce 16 kHz mono WAV.
pub struct FfmpegTranscoder {
    program: String,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl VoiceTranscoder for FfmpegTranscoder {
    async fn to_wav(&self, data: &[u8]) -> Result<Vec<u8>> {
        // ffmpeg needs seekable input for ogg, so go through files
        let dir = tempfile::tempdir()
            .map_err(|e| RelayError::Conversion(format!("failed to create temp dir: {e}")))?;
        let input_path = dir.path().join("input.ogg");
        let output_path = dir.path().join("output.wav");

        tokio::fs::write(&input_path, data)
            .await
            .map_err(|e| RelayError::Conversion(format!("failed to write temp input: {e}")))?;

        let output = Command::new(&self.program)
            .arg("-i")
            .arg(&input_path)
            .args(["-ar", "16000", "-ac", "1", "-y"])
            .arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RelayError::Conversion(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RelayError::Conversion(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let wav = tokio::fs::read(&output_path)
            .await
            .map_err(|e| RelayError::Conversion(format!("failed to read converted audio: {e}")))?;

        debug!("Converted voice clip ({} bytes) to WAV ({} bytes)", data.len(), wav.len());
        Ok(wav)
    }
}

/// Classifies attachments and, when configured, transcodes voice messages.
pub struct AttachmentClassifier {
    transcoder: Option<Box<dyn VoiceTranscoder>>,
}

impl AttachmentClassifier {
    pub fn new(transcoder: Option<Box<dyn VoiceTranscoder>>) -> Self {
        Self { transcoder }
    }

    pub async fn classify(&self, attachment: Attachment) -> ClassifiedAttachment {
        let category = categorize(&attachment.filename, attachment.content_type.as_deref());
        let content_type = attachment
            .content_type
            .clone()
            .unwrap_or_else(|| GENERIC_CONTENT_TYPE.to_string());

        let mut classified = ClassifiedAttachment {
            category,
            filename: attachment.filename,
            content_type,
            data: attachment.data,
        };

        if category != AttachmentCategory::Voice
            || extension(&classified.filename).as_deref() != Some(NATIVE_VOICE_EXTENSION)
        {
            return classified;
        }

        let Some(transcoder) = &self.transcoder else {
            return classified;
        };

        match transcoder.to_wav(&classified.data).await {
            Ok(wav) => {
                classified.filename = Path::new(&classified.filename)
                    .with_extension("wav")
                    .to_string_lossy()
                    .into_owned();
                classified.content_type = "audio/wav".to_string();
                classified.data = wav;
            }
            Err(e) => {
                warn!(
                    "Forwarding {} unconverted: {}",
                    classified.filename, e
                );
            }
        }

        classified
    }
}
