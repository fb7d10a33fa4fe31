/// Failures of the relay pipeline, one variant per external system it talks to.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Network, DNS or timeout failure talking to the assistant API.
    #[error("failed to reach {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The assistant API answered with a non-200 status.
    #[error("assistant API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("invalid assistant API response: {0}")]
    InvalidResponse(String),

    #[error("failed to fetch attachment {filename}: {reason}")]
    AttachmentFetch { filename: String, reason: String },

    /// Voice transcoding failed. Callers fall back to the original bytes.
    #[error("voice conversion failed: {0}")]
    Conversion(String),

    #[error("voice playback failed: {0}")]
    Playback(String),
}

impl RelayError {
    pub fn transport(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            source,
        }
    }

    pub fn attachment_fetch(filename: impl Into<String>, reason: impl ToString) -> Self {
        Self::AttachmentFetch {
            filename: filename.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
