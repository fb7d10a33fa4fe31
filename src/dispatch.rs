use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::api::ChatResponse;
use crate::error::RelayError;

/// Discord rejects messages over 2000 characters.
const MAX_MESSAGE_LEN: usize = 1900;

pub const PLAYBACK_CONFIRMATION: &str = "Playing the audio response in the voice channel.";

/// Where replies to one conversation are sent.
#[async_trait]
pub trait ReplyChannel: Send + Sync {
    async fn send_text(&self, text: &str) -> anyhow::Result<()>;
}

/// Playback into a guild's active voice connection.
#[async_trait]
pub trait VoicePlayer: Send + Sync {
    async fn is_connected(&self, guild_id: u64) -> bool;

    /// Blocks until the clip has finished playing.
    async fn play(&self, guild_id: u64, audio_url: &str) -> Result<(), RelayError>;
}

/// Facts about the originating message the dispatcher decides on.
#[derive(Debug, Clone)]
pub struct ReplyContext {
    pub mention: String,
    pub guild_id: Option<u64>,
    pub had_voice: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioRoute {
    Play,
    Link,
}

/// Play only replies to voice messages, and only into a live connection.
pub fn audio_route(had_voice: bool, connected: bool) -> AudioRoute {
    if had_voice && connected {
        AudioRoute::Play
    } else {
        AudioRoute::Link
    }
}

/// User-facing text for a failed relay.
pub fn error_reply(mention: &str, err: &RelayError) -> String {
    let text = match err {
        RelayError::Transport { .. } => "Sorry, I couldn't reach the assistant right now. Please try again later.",
        RelayError::Api { .. } | RelayError::InvalidResponse(_) => {
            "Sorry, I encountered an error processing your request."
        }
        RelayError::AttachmentFetch { .. } => "Sorry, I couldn't download your attachment.",
        RelayError::Conversion(_) | RelayError::Playback(_) => {
            "Sorry, something went wrong handling the audio."
        }
    };
    format!("{mention}, {text}")
}

/// Split a reply into chunks of at most `max_chars` characters. Discord counts
/// characters, not bytes. Cuts after the last newline in the window, else after
/// the last space, else hard at the limit.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while let Some((limit, _)) = rest.char_indices().nth(max_chars) {
        let window = &rest[..limit];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map_or(limit, |pos| pos + 1);
        let (chunk, tail) = rest.split_at(cut);
        chunks.push(chunk.to_string());
        rest = tail;
    }

    chunks.push(rest.to_string());
    chunks
}

pub struct ResponseDispatcher<'a> {
    channel: &'a dyn ReplyChannel,
    voice: Option<&'a dyn VoicePlayer>,
}

impl<'a> ResponseDispatcher<'a> {
    pub fn new(channel: &'a dyn ReplyChannel, voice: Option<&'a dyn VoicePlayer>) -> Self {
        Self { channel, voice }
    }

    /// Send the reply and route any audio. Failures end here: logged, answered
    /// with a fallback message when possible.
    pub async fn dispatch(&self, ctx: &ReplyContext, response: &ChatResponse) {
        if let Err(e) = self.try_dispatch(ctx, response).await {
            error!("Failed to send response: {:#}", e);
            self.send_fallback(ctx).await;
        }
    }

    /// Tell the user the relay failed.
    pub async fn dispatch_error(&self, ctx: &ReplyContext, err: &RelayError) {
        warn!("Relay failed: {}", err);
        if let Err(e) = self.channel.send_text(&error_reply(&ctx.mention, err)).await {
            error!("Failed to send error reply: {:#}", e);
        }
    }

    async fn try_dispatch(&self, ctx: &ReplyContext, response: &ChatResponse) -> anyhow::Result<()> {
        let reply = format!("{}, {}", ctx.mention, response.text);
        for chunk in split_message(&reply, MAX_MESSAGE_LEN) {
            self.channel.send_text(&chunk).await?;
        }

        let Some(audio_url) = response.audio_url.as_deref() else {
            return Ok(());
        };

        let player = match (self.voice, ctx.guild_id) {
            (Some(player), Some(guild_id)) => {
                let connected = player.is_connected(guild_id).await;
                match audio_route(ctx.had_voice, connected) {
                    AudioRoute::Play => Some((player, guild_id)),
                    AudioRoute::Link => None,
                }
            }
            _ => None,
        };

        match player {
            Some((player, guild_id)) => {
                self.channel.send_text(PLAYBACK_CONFIRMATION).await?;
                if let Err(e) = player.play(guild_id, audio_url).await {
                    warn!("Playback in guild {} failed: {}", guild_id, e);
                    self.send_audio_link(audio_url).await?;
                } else {
                    info!("Finished playing audio response in guild {}", guild_id);
                }
            }
            None => self.send_audio_link(audio_url).await?,
        }

        Ok(())
    }

    async fn send_audio_link(&self, audio_url: &str) -> anyhow::Result<()> {
        self.channel
            .send_text(&format!("Audio response: {audio_url}"))
            .await
    }

    async fn send_fallback(&self, ctx: &ReplyContext) {
        let text = format!(
            "{}, Sorry, I encountered an error sending the response.",
            ctx.mention
        );
        if let Err(e) = self.channel.send_text(&text).await {
            error!("Failed to send fallback message: {:#}", e);
        }
    }
}
