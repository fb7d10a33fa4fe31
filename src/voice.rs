use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serenity::all::{ChannelId, GuildId};
use songbird::tracks::{ControlError, PlayMode};
use songbird::Songbird;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::dispatch::VoicePlayer;
use crate::error::{RelayError, Result};

/// Extension of the URL path, kept so the decoder can probe the format.
fn url_extension(audio_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(audio_url).ok()?;
    Path::new(url.path())
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
}

/// Download `audio_url` into a temporary file. The file is removed when the
/// returned guard drops.
pub async fn download_to_temp(http: &reqwest::Client, audio_url: &str) -> Result<NamedTempFile> {
    let response = http
        .get(audio_url)
        .send()
        .await
        .map_err(|e| RelayError::Playback(format!("failed to download {audio_url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(RelayError::Playback(format!(
            "failed to download {audio_url}: HTTP {status}"
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| RelayError::Playback(format!("failed to read {audio_url}: {e}")))?;

    let suffix = url_extension(audio_url).unwrap_or_default();
    let file = tempfile::Builder::new()
        .prefix("relaybot-audio-")
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| RelayError::Playback(format!("failed to create temp file: {e}")))?;

    tokio::fs::write(file.path(), &bytes)
        .await
        .map_err(|e| RelayError::Playback(format!("failed to write temp file: {e}")))?;

    debug!("Downloaded {} bytes of audio to {}", bytes.len(), file.path().display());
    Ok(file)
}

/// Plays audio replies through songbird.
pub struct SongbirdPlayer {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    poll_interval: Duration,
}

impl SongbirdPlayer {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client, poll_interval: Duration) -> Self {
        Self {
            manager,
            http,
            poll_interval,
        }
    }
}

#[async_trait]
impl VoicePlayer for SongbirdPlayer {
    async fn is_connected(&self, guild_id: u64) -> bool {
        match self.manager.get(GuildId::new(guild_id)) {
            Some(call) => call.lock().await.current_connection().is_some(),
            None => false,
        }
    }

    async fn play(&self, guild_id: u64, audio_url: &str) -> Result<()> {
        let call = self
            .manager
            .get(GuildId::new(guild_id))
            .ok_or_else(|| RelayError::Playback(format!("not connected to voice in guild {guild_id}")))?;

        // Held until playback ends; dropping it deletes the file
        let audio = download_to_temp(&self.http, audio_url).await?;

        let track = {
            let mut handler = call.lock().await;
            let input = songbird::input::File::new(audio.path().to_path_buf());
            handler.play_input(input.into())
        };

        info!("Playing {} in guild {}", audio_url, guild_id);

        loop {
            tokio::time::sleep(self.poll_interval).await;
            match track.get_info().await {
                Ok(state) => match state.playing {
                    PlayMode::End | PlayMode::Stop => break,
                    PlayMode::Errored(e) => {
                        return Err(RelayError::Playback(format!("track errored: {e:?}")));
                    }
                    _ => {}
                },
                // The driver drops finished tracks
                Err(ControlError::Finished) => break,
                Err(e) => return Err(RelayError::Playback(e.to_string())),
            }
        }

        drop(audio);
        Ok(())
    }
}

/// Join `channel_id` in `guild_id`, replacing any connection in that guild.
pub async fn join_channel(manager: &Songbird, guild_id: GuildId, channel_id: ChannelId) -> anyhow::Result<()> {
    manager
        .join(guild_id, channel_id)
        .await
        .with_context(|| format!("Failed to join voice channel {channel_id}"))?;
    info!("Joined voice channel {} in guild {}", channel_id, guild_id);
    Ok(())
}

/// Leave the guild's voice channel. Returns false when there was none.
pub async fn leave_channel(manager: &Songbird, guild_id: GuildId) -> anyhow::Result<bool> {
    if manager.get(guild_id).is_none() {
        return Ok(false);
    }
    manager
        .remove(guild_id)
        .await
        .with_context(|| format!("Failed to leave voice in guild {guild_id}"))?;
    info!("Left voice in guild {}", guild_id);
    Ok(true)
}
