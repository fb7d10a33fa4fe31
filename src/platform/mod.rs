pub mod discord;

/// A message received from the chat platform
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    /// Platform-specific user ID as string
    pub user_id: String,
    /// Display name of the user
    pub user_name: String,
    /// Text that mentions the author in a reply (e.g. `<@1234>`)
    pub mention: String,
    /// Guild the message was sent in; `None` for direct messages
    pub guild_id: Option<u64>,
    /// The message text, possibly empty
    pub text: String,
    pub attachments: Vec<InboundAttachment>,
}

/// An attachment as announced by the platform, before its bytes are fetched
#[derive(Debug, Clone)]
pub struct InboundAttachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub url: String,
    pub size: u64,
}

impl IncomingMessage {
    /// Nothing to relay: no text and no files. Whitespace-only text still counts.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.attachments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_empty() {
        assert!(IncomingMessage::default().is_empty());

        let spaces = IncomingMessage {
            text: "   ".into(),
            ..Default::default()
        };
        assert!(!spaces.is_empty());

        let file_only = IncomingMessage {
            attachments: vec![InboundAttachment {
                filename: "a.png".into(),
                content_type: None,
                url: "https://cdn.example/a.png".into(),
                size: 1,
            }],
            ..Default::default()
        };
        assert!(!file_only.is_empty());
    }
}
