use tracing::{debug, info, warn};

use crate::api::{ApiClient, ChatResponse};
use crate::attachment::{Attachment, AttachmentClassifier, FfmpegTranscoder, VoiceTranscoder};
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::platform::{InboundAttachment, IncomingMessage};
use crate::request::build_request;

/// What the dispatcher needs to know about a relayed message.
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    pub response: ChatResponse,
    /// The request carried a voice clip, so an audio reply may be played back.
    pub had_voice: bool,
}

/// The per-message pipeline: fetch attachments, classify, build the request, call the API.
/// Platform-agnostic, receives an IncomingMessage.
pub struct Relay {
    api: ApiClient,
    http: reqwest::Client,
    classifier: AttachmentClassifier,
    config: Config,
}

impl Relay {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let transcoder: Option<Box<dyn VoiceTranscoder>> = if config.voice.transcode_ogg {
            Some(Box::new(FfmpegTranscoder::new(&config.voice.ffmpeg_path)))
        } else {
            None
        };
        Ok(Self::with_classifier(
            config.clone(),
            ApiClient::new(&config.api)?,
            AttachmentClassifier::new(transcoder),
        ))
    }

    /// Attachment downloads share the API client, and with it the configured timeout.
    pub fn with_classifier(config: Config, api: ApiClient, classifier: AttachmentClassifier) -> Self {
        Self {
            http: api.http().clone(),
            api,
            classifier,
            config,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    async fn fetch_attachment(&self, inbound: &InboundAttachment) -> Result<Attachment> {
        debug!("Fetching {} ({} bytes)", inbound.filename, inbound.size);
        let response = self
            .http
            .get(&inbound.url)
            .send()
            .await
            .map_err(|e| RelayError::attachment_fetch(&inbound.filename, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::attachment_fetch(
                &inbound.filename,
                format!("HTTP {status}"),
            ));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| RelayError::attachment_fetch(&inbound.filename, e))?;

        Ok(Attachment {
            filename: inbound.filename.clone(),
            content_type: inbound.content_type.clone(),
            data: data.to_vec(),
            url: inbound.url.clone(),
        })
    }

    /// Relay one message to the assistant and return its reply.
    pub async fn process_message(&self, incoming: &IncomingMessage) -> Result<RelayOutcome> {
        let mut classified = Vec::with_capacity(incoming.attachments.len());
        for inbound in &incoming.attachments {
            // A failed download skips the file, the text still goes through
            match self.fetch_attachment(inbound).await {
                Ok(attachment) => {
                    info!(
                        "Fetched attachment {} ({} bytes) from {}",
                        attachment.filename,
                        attachment.data.len(),
                        attachment.url
                    );
                    classified.push(self.classifier.classify(attachment).await);
                }
                Err(e) => warn!("Skipping attachment: {}", e),
            }
        }

        let request = build_request(
            &incoming.text,
            &incoming.user_id,
            classified,
            &self.config.keys,
            self.config.api.include_audio,
        );

        let response = self.api.send_chat(&request).await?;

        Ok(RelayOutcome {
            response,
            had_voice: request.has_voice(),
        })
    }
}
