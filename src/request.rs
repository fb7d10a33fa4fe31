use tracing::debug;

use crate::attachment::{AttachmentCategory, ClassifiedAttachment};
use crate::config::KeysConfig;

/// One file part of the outbound multipart body.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// The outbound `/chat` request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub query: String,
    pub user_id: String,
    pub include_audio: bool,
    pub credentials: KeysConfig,
    pub images: Vec<FilePart>,
    /// At most one of `voice` and `document` is set.
    pub voice: Option<FilePart>,
    pub document: Option<FilePart>,
}

impl From<ClassifiedAttachment> for FilePart {
    fn from(a: ClassifiedAttachment) -> Self {
        Self {
            filename: a.filename,
            content_type: a.content_type,
            data: a.data,
        }
    }
}

fn bool_field(value: bool) -> String {
    let token = if value { "true" } else { "false" };
    token.to_string()
}

impl ChatRequest {
    pub fn has_voice(&self) -> bool {
        self.voice.is_some()
    }

    /// Text fields in wire order. Credentials appear only when set and non-empty.
    pub fn text_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("query", self.query.clone()),
            ("user_id", self.user_id.clone()),
            ("include_audio", bool_field(self.include_audio)),
        ];

        let keys = &self.credentials;
        for (name, value) in [
            ("google_api_key", &keys.google_api_key),
            ("tavily_key", &keys.tavily_key),
            ("pse", &keys.pse),
            ("openai_api_key", &keys.openai_api_key),
            ("composio_key", &keys.composio_key),
            ("hf_token", &keys.hf_token),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                fields.push((name, value.to_string()));
            }
        }

        fields
    }

    /// File parts with their form field names: `images` (repeated), `voice`, `document`.
    pub fn file_parts(&self) -> Vec<(&'static str, &FilePart)> {
        let mut parts: Vec<(&'static str, &FilePart)> =
            self.images.iter().map(|image| ("images", image)).collect();
        if let Some(voice) = &self.voice {
            parts.push(("voice", voice));
        }
        if let Some(document) = &self.document {
            parts.push(("document", document));
        }
        parts
    }
}

/// Assemble a request from the message text and its classified attachments.
///
/// Images are unbounded. The first voice clip or document takes the single
/// voice/document slot and later ones are dropped. A voice clip always turns
/// `include_audio` on.
pub fn build_request(
    text: &str,
    user_id: &str,
    attachments: Vec<ClassifiedAttachment>,
    credentials: &KeysConfig,
    include_audio: bool,
) -> ChatRequest {
    let mut request = ChatRequest {
        query: text.to_string(),
        user_id: user_id.to_string(),
        include_audio,
        credentials: credentials.clone(),
        ..Default::default()
    };

    for attachment in attachments {
        match attachment.category {
            AttachmentCategory::Image => request.images.push(attachment.into()),
            category if request.voice.is_some() || request.document.is_some() => {
                debug!(
                    "Dropping {:?} attachment {}: voice/document slot already used",
                    category, attachment.filename
                );
            }
            AttachmentCategory::Voice => request.voice = Some(attachment.into()),
            AttachmentCategory::Document => request.document = Some(attachment.into()),
        }
    }

    if request.voice.is_some() {
        request.include_audio = true;
    }

    request
}
