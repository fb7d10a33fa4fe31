use std::sync::Arc;

use anyhow::{Context as _, Result};
use serenity::all::{
    ChannelId, CommandInteraction, Context, CreateCommand, EditInteractionResponse, EventHandler,
    GatewayIntents, GuildId, Http, Interaction, Mentionable, Message, Ready, UserId,
};
use serenity::gateway::{ConnectionStage, ShardStageUpdateEvent};
use serenity::model::event::ResumedEvent;
use serenity::async_trait;
use serenity::Client;
use songbird::SerenityInit;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dispatch::{ReplyChannel, ReplyContext, ResponseDispatcher, VoicePlayer};
use crate::health::BotStatus;
use crate::platform::{InboundAttachment, IncomingMessage};
use crate::relay::Relay;
use crate::voice::{self, SongbirdPlayer};

/// Replies into the channel a message came from.
struct ChannelReply {
    http: Arc<Http>,
    channel_id: ChannelId,
}

#[async_trait]
impl ReplyChannel for ChannelReply {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.channel_id
            .say(&self.http, text)
            .await
            .with_context(|| format!("Failed to send message to channel {}", self.channel_id))?;
        Ok(())
    }
}

pub struct Handler {
    relay: Arc<Relay>,
    config: Arc<Config>,
    status: Arc<BotStatus>,
    http: reqwest::Client,
}

impl Handler {
    pub fn new(relay: Arc<Relay>, config: Arc<Config>, status: Arc<BotStatus>) -> Self {
        Self {
            config,
            status,
            http: relay.api().http().clone(),
            relay,
        }
    }

    /// Required gateway intents for the bot.
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
            | GatewayIntents::GUILD_VOICE_STATES
    }

    fn commands(&self) -> Vec<CreateCommand> {
        let assistant = &self.config.discord.assistant_name;
        let mut commands = vec![CreateCommand::new("reset")
            .description(format!("Reset the conversation with {assistant}"))];
        if self.config.voice.playback {
            commands.push(CreateCommand::new("join").description("Join your voice channel"));
            commands.push(CreateCommand::new("leave").description("Leave the voice channel"));
        }
        commands
    }

    async fn voice_player(&self, ctx: &Context) -> Option<SongbirdPlayer> {
        if !self.config.voice.playback {
            return None;
        }
        let manager = songbird::get(ctx).await?;
        Some(SongbirdPlayer::new(
            manager,
            self.http.clone(),
            self.config.voice.poll_interval(),
        ))
    }

    async fn handle_command(&self, ctx: &Context, command: &CommandInteraction) -> String {
        let mention = command.user.mention().to_string();
        let assistant = &self.config.discord.assistant_name;

        match command.data.name.as_str() {
            "reset" => {
                if self.relay.api().reset_conversation().await {
                    format!("{mention}, {assistant}'s memory has been reset successfully.")
                } else {
                    format!("{mention}, Failed to reset {assistant}'s memory.")
                }
            }
            "join" => match self.join_user_channel(ctx, command).await {
                Ok(Some(channel_id)) => format!("{mention}, Joined {}.", channel_id.mention()),
                Ok(None) => format!("{mention}, You need to be in a voice channel first."),
                Err(e) => {
                    error!("Join failed: {:#}", e);
                    format!("{mention}, Sorry, I couldn't join your voice channel.")
                }
            },
            "leave" => match self.leave(ctx, command.guild_id).await {
                Ok(true) => format!("{mention}, Left the voice channel."),
                Ok(false) => format!("{mention}, I'm not in a voice channel."),
                Err(e) => {
                    error!("Leave failed: {:#}", e);
                    format!("{mention}, Sorry, I couldn't leave the voice channel.")
                }
            },
            other => {
                warn!("Unknown command: {}", other);
                format!("{mention}, Unknown command.")
            }
        }
    }

    async fn join_user_channel(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
    ) -> Result<Option<ChannelId>> {
        let Some(guild_id) = command.guild_id else {
            return Ok(None);
        };
        let Some(channel_id) = user_voice_channel(ctx, guild_id, command.user.id) else {
            return Ok(None);
        };
        let manager = songbird::get(ctx)
            .await
            .context("Songbird voice client not registered")?;
        voice::join_channel(&manager, guild_id, channel_id).await?;
        Ok(Some(channel_id))
    }

    async fn leave(&self, ctx: &Context, guild_id: Option<GuildId>) -> Result<bool> {
        let Some(guild_id) = guild_id else {
            return Ok(false);
        };
        let manager = songbird::get(ctx)
            .await
            .context("Songbird voice client not registered")?;
        voice::leave_channel(&manager, guild_id).await
    }
}

/// The voice channel `user_id` currently sits in, from the cache.
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|state| state.channel_id)
}

/// Track gateway connectivity for the status page.
fn apply_stage(status: &BotStatus, stage: &ConnectionStage) {
    if matches!(stage, ConnectionStage::Connected) {
        status.set_connected(status.guild_count());
    } else {
        status.set_disconnected();
    }
}

fn to_incoming(msg: &Message) -> IncomingMessage {
    IncomingMessage {
        user_id: msg.author.id.to_string(),
        user_name: msg.author.name.clone(),
        mention: msg.author.mention().to_string(),
        guild_id: msg.guild_id.map(|g| g.get()),
        text: msg.content.clone(),
        attachments: msg
            .attachments
            .iter()
            .map(|a| InboundAttachment {
                filename: a.filename.clone(),
                content_type: a.content_type.clone(),
                url: a.url.clone(),
                size: u64::from(a.size),
            })
            .collect(),
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            bot_name = %ready.user.name,
            guilds = ready.guilds.len(),
            "Logged in to Discord"
        );
        self.status.set_connected(ready.guilds.len());

        let Some(guild_id) = self.config.discord.guild_id else {
            return;
        };
        match GuildId::new(guild_id)
            .set_commands(&ctx.http, self.commands())
            .await
        {
            Ok(synced) => info!("Synced {} commands to guild {}", synced.len(), guild_id),
            Err(e) => error!("Error syncing commands: {}", e),
        }
    }

    async fn resume(&self, _ctx: Context, _event: ResumedEvent) {
        debug!("Discord session resumed");
        self.status.set_connected(self.status.guild_count());
    }

    async fn shard_stage_update(&self, _ctx: Context, event: ShardStageUpdateEvent) {
        debug!(
            shard = ?event.shard_id,
            "Shard stage {:?} -> {:?}",
            event.old,
            event.new
        );
        apply_stage(&self.status, &event.new);
    }

    async fn cache_ready(&self, _ctx: Context, guilds: Vec<GuildId>) {
        debug!(guild_count = guilds.len(), "Discord cache ready");
        self.status.set_guild_count(guilds.len());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        // Skip bot messages, our own included
        if msg.author.bot || msg.author.id == ctx.cache.current_user().id {
            return;
        }

        let incoming = to_incoming(&msg);
        if incoming.is_empty() {
            return;
        }

        info!(
            "Discord message from {} ({}): {} [{} attachment(s)]",
            incoming.user_name,
            incoming.user_id,
            incoming.text,
            incoming.attachments.len()
        );

        msg.channel_id.broadcast_typing(&ctx.http).await.ok();

        let channel = ChannelReply {
            http: ctx.http.clone(),
            channel_id: msg.channel_id,
        };
        let player = self.voice_player(&ctx).await;
        let dispatcher = ResponseDispatcher::new(
            &channel,
            player.as_ref().map(|p| p as &dyn VoicePlayer),
        );

        let mut reply_ctx = ReplyContext {
            mention: incoming.mention.clone(),
            guild_id: incoming.guild_id,
            had_voice: false,
        };

        match self.relay.process_message(&incoming).await {
            Ok(outcome) => {
                reply_ctx.had_voice = outcome.had_voice;
                dispatcher.dispatch(&reply_ctx, &outcome.response).await;
            }
            Err(e) => dispatcher.dispatch_error(&reply_ctx, &e).await,
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };

        info!(
            "Command /{} from {} ({})",
            command.data.name, command.user.name, command.user.id
        );

        // Acknowledge first: reset and join can outlast the interaction deadline
        if let Err(e) = command.defer(&ctx.http).await {
            error!("Failed to acknowledge /{}: {}", command.data.name, e);
            return;
        }

        let text = self.handle_command(&ctx, &command).await;
        let response = EditInteractionResponse::new().content(text);
        if let Err(e) = command.edit_response(&ctx.http, response).await {
            error!("Failed to respond to /{}: {}", command.data.name, e);
        }
    }
}

/// Run the Discord bot until the gateway connection ends.
pub async fn run(relay: Arc<Relay>, config: Arc<Config>, status: Arc<BotStatus>) -> Result<()> {
    info!("Starting Discord bot...");

    let handler = Handler::new(relay, config.clone(), status.clone());
    let mut client = Client::builder(&config.discord.bot_token, Handler::intents())
        .event_handler(handler)
        .register_songbird()
        .await
        .context("Failed to create Discord client")?;

    let result = client.start().await.context("Discord client stopped");
    status.set_disconnected();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intents_include_voice_and_content() {
        let intents = Handler::intents();
        assert!(intents.contains(GatewayIntents::MESSAGE_CONTENT));
        assert!(intents.contains(GatewayIntents::GUILD_VOICE_STATES));
    }

    #[test]
    fn test_commands_follow_playback_flag() {
        let mut config = Config::default();
        config.discord.guild_id = Some(1);
        let relay = Arc::new(Relay::new(config.clone()).unwrap());

        let handler = Handler::new(relay.clone(), Arc::new(config.clone()), Arc::new(BotStatus::new()));
        assert_eq!(handler.commands().len(), 3);

        config.voice.playback = false;
        let handler = Handler::new(relay, Arc::new(config), Arc::new(BotStatus::new()));
        assert_eq!(handler.commands().len(), 1);
    }

    #[test]
    fn test_shard_stage_drives_status() {
        let status = BotStatus::new();
        status.set_guild_count(2);

        apply_stage(&status, &ConnectionStage::Connected);
        assert!(status.is_connected());
        assert_eq!(status.guild_count(), 2);

        apply_stage(&status, &ConnectionStage::Resuming);
        assert!(!status.is_connected());

        apply_stage(&status, &ConnectionStage::Connected);
        assert!(status.is_connected());
    }
}
