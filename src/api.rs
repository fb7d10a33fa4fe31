use std::time::Duration;

use anyhow::Context;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::config::ApiConfig;
use crate::error::{RelayError, Result};
use crate::request::{ChatRequest, FilePart};

pub const FALLBACK_REPLY: &str = "Sorry, I could not process your request.";

/// Parsed `/chat` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub text: String,
    pub audio_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    audio_url: Option<String>,
}

impl From<WireResponse> for ChatResponse {
    fn from(wire: WireResponse) -> Self {
        Self {
            text: wire
                .response
                .unwrap_or_else(|| FALLBACK_REPLY.to_string()),
            audio_url: wire.audio_url.filter(|url| !url.trim().is_empty()),
        }
    }
}

/// Client for the assistant's `/chat` and `/reset` endpoints.
///
/// Every call is attempted exactly once; callers own the user-facing messaging.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

fn file_part(file: &FilePart) -> Part {
    let part = Part::bytes(file.data.clone()).file_name(file.filename.clone());
    match part.mime_str(&file.content_type) {
        Ok(part) => part,
        Err(_) => {
            debug!(
                "Invalid content type {:?} for {}, sending as octet-stream",
                file.content_type, file.filename
            );
            Part::bytes(file.data.clone())
                .file_name(file.filename.clone())
                .mime_str("application/octet-stream")
                .unwrap_or_else(|_| Part::bytes(file.data.clone()))
        }
    }
}

fn to_form(request: &ChatRequest) -> Form {
    let mut form = Form::new();
    for (name, value) in request.text_fields() {
        form = form.text(name, value);
    }
    for (name, file) in request.file_parts() {
        form = form.part(name, file_part(file));
    }
    form
}

/// HTTP client honouring the configured request timeout.
pub fn http_client(timeout: Option<Duration>) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("Failed to build HTTP client")
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let client = http_client(config.timeout())?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config
                .bearer_token
                .clone()
                .filter(|token| !token.trim().is_empty()),
        })
    }

    /// The underlying client, shared for attachment and audio downloads.
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    fn post(&self, path: &str) -> (String, reqwest::RequestBuilder) {
        let url = format!("{}/{}", self.base_url, path);
        let mut builder = self.client.post(&url);
        if let Some(token) = &self.bearer_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        (url, builder)
    }

    pub async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let (url, builder) = self.post("chat");

        debug!(
            "Sending chat request to {} ({} file part(s), include_audio={})",
            url,
            request.file_parts().len(),
            request.include_audio
        );

        let response = builder
            .multipart(to_form(request))
            .send()
            .await
            .map_err(|e| RelayError::transport(&url, e))?;

        let status = response.status();
        // A timeout can still fire while the body streams in
        let body = response
            .bytes()
            .await
            .map_err(|e| RelayError::transport(&url, e))?;

        if status != reqwest::StatusCode::OK {
            let body = String::from_utf8_lossy(&body).into_owned();
            error!("API error: {} - {}", status, body);
            return Err(RelayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let wire: WireResponse = serde_json::from_slice(&body)
            .map_err(|e| RelayError::InvalidResponse(e.to_string()))?;

        Ok(wire.into())
    }

    /// Clear the assistant's memory. Failures are logged, never returned.
    pub async fn reset_conversation(&self) -> bool {
        let (url, builder) = self.post("reset");

        match builder.send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => true,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!("Reset failed: {} - {}", status, body);
                false
            }
            Err(e) => {
                warn!("Reset request to {} failed: {}", url, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::{AttachmentCategory, ClassifiedAttachment};
    use crate::config::KeysConfig;
    use crate::request::build_request;
    use mockito::Matcher;

    fn client_for(url: &str, token: Option<&str>) -> ApiClient {
        ApiClient::new(&ApiConfig {
            base_url: format!("{url}/"),
            bearer_token: token.map(str::to_string),
            timeout_secs: Some(5),
            include_audio: false,
        })
        .unwrap()
    }

    #[test]
    fn test_missing_response_uses_fallback() {
        let wire: WireResponse = serde_json::from_str(r#"{"audio_url": ""}"#).unwrap();
        let response = ChatResponse::from(wire);
        assert_eq!(response.text, FALLBACK_REPLY);
        assert_eq!(response.audio_url, None);

        let wire: WireResponse = serde_json::from_str(r#"{"response": null}"#).unwrap();
        assert_eq!(ChatResponse::from(wire).text, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_send_chat_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat")
            .match_header("authorization", "Bearer secret")
            .match_header("content-type", Matcher::Regex("multipart/form-data".into()))
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="query"\r\n\r\nhello"#.into()),
                Matcher::Regex(r#"name="include_audio"\r\n\r\nfalse"#.into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"response": "hi there"}"#)
            .create_async()
            .await;

        let client = client_for(&server.url(), Some("secret"));
        let request = build_request("hello", "42", vec![], &KeysConfig::default(), false);
        let response = client.send_chat(&request).await.unwrap();

        assert_eq!(response.text, "hi there");
        assert_eq!(response.audio_url, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_chat_uploads_voice_part() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat")
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="voice"; filename="clip.ogg""#.into()),
                Matcher::Regex(r#"name="include_audio"\r\n\r\ntrue"#.into()),
            ]))
            .with_status(200)
            .with_body(r#"{"response": "ok", "audio_url": "https://cdn.example.com/a.wav"}"#)
            .create_async()
            .await;

        let client = client_for(&server.url(), None);
        let voice = ClassifiedAttachment {
            category: AttachmentCategory::Voice,
            filename: "clip.ogg".into(),
            content_type: "audio/ogg".into(),
            data: b"OggS".to_vec(),
        };
        let request = build_request("", "42", vec![voice], &KeysConfig::default(), false);
        let response = client.send_chat(&request).await.unwrap();

        assert_eq!(
            response.audio_url.as_deref(),
            Some("https://cdn.example.com/a.wav")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_chat_non_200_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat")
            .with_status(503)
            .with_body("model loading")
            .create_async()
            .await;

        let client = client_for(&server.url(), None);
        let request = build_request("hello", "42", vec![], &KeysConfig::default(), false);
        match client.send_chat(&request).await {
            Err(RelayError::Api { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "model loading");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_chat_bad_json_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let client = client_for(&server.url(), None);
        let request = build_request("hello", "42", vec![], &KeysConfig::default(), false);
        let err = client.send_chat(&request).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_transport_error() {
        // Nothing listens on port 1
        let client = client_for("http://127.0.0.1:1", None);
        let request = build_request("hello", "42", vec![], &KeysConfig::default(), false);
        let err = client.send_chat(&request).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_stalled_body_times_out_as_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_chunked_body(|w| {
                std::thread::sleep(std::time::Duration::from_secs(3));
                w.write_all(br#"{"response": "too late"}"#)
            })
            .expect(1)
            .create_async()
            .await;

        let client = ApiClient::new(&ApiConfig {
            base_url: server.url(),
            bearer_token: None,
            timeout_secs: Some(1),
            include_audio: false,
        })
        .unwrap();
        let request = build_request("hello", "42", vec![], &KeysConfig::default(), false);
        let err = client.send_chat(&request).await.unwrap_err();

        match &err {
            RelayError::Transport { source, .. } => assert!(source.is_timeout()),
            other => panic!("expected transport error, got {other:?}"),
        }
        assert!(crate::dispatch::error_reply("<@42>", &err).contains("couldn't reach"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reset_success_and_failure() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("POST", "/reset")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server.url(), Some("secret"));
        assert!(client.reset_conversation().await);
        ok.assert_async().await;

        let mut failing = mockito::Server::new_async().await;
        let _mock = failing
            .mock("POST", "/reset")
            .with_status(500)
            .create_async()
            .await;
        let client = client_for(&failing.url(), None);
        assert!(!client.reset_conversation().await);

        let client = client_for("http://127.0.0.1:1", None);
        assert!(!client.reset_conversation().await);
    }
}
