use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Guild the slash commands are registered on.
    #[serde(default)]
    pub guild_id: Option<u64>,
    /// Name used in command replies ("Cortana's memory has been reset").
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_url")]
    pub base_url: String,
    /// Sent as `Authorization: Bearer <token>` when present.
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Default for the `include_audio` field; voice messages always force it on.
    #[serde(default)]
    pub include_audio: bool,
}

/// Third-party keys forwarded opaquely with every chat request.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct KeysConfig {
    pub google_api_key: Option<String>,
    pub tavily_key: Option<String>,
    pub pse: Option<String>,
    pub openai_api_key: Option<String>,
    pub composio_key: Option<String>,
    pub hf_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VoiceConfig {
    /// Convert `.ogg` voice messages to 16 kHz mono WAV before upload.
    #[serde(default = "default_true")]
    pub transcode_ogg: bool,
    /// Play audio replies into the guild's voice channel when connected.
    #[serde(default = "default_true")]
    pub playback: bool,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_assistant_name() -> String {
    "Cortana".to_string()
}

fn default_api_url() -> String {
    "https://wolf1997-cortana-api.hf.space".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_health_port() -> u16 {
    7860
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            guild_id: None,
            assistant_name: default_assistant_name(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            bearer_token: None,
            timeout_secs: None,
            include_audio: false,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            transcode_ogg: true,
            playback: true,
            ffmpeg_path: default_ffmpeg_path(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_health_port(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl VoiceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Config {
    /// Load the TOML file at `path` (if it exists), then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the environment. `lookup` is `std::env::var` outside tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("DISCORD_BOT_TOKEN") {
            self.discord.bot_token = token;
        }
        if let Some(guild) = get("DISCORD_GUILD_ID") {
            let id = guild
                .trim()
                .parse::<u64>()
                .with_context(|| format!("DISCORD_GUILD_ID is not a valid id: {guild}"))?;
            self.discord.guild_id = Some(id);
        }
        if let Some(url) = get("RELAY_API_URL") {
            self.api.base_url = url;
        }
        if let Some(token) = get("RELAY_API_TOKEN") {
            self.api.bearer_token = Some(token);
        }
        if let Some(secs) = get("RELAY_API_TIMEOUT_SECS") {
            let secs = secs
                .trim()
                .parse::<u64>()
                .with_context(|| format!("RELAY_API_TIMEOUT_SECS is not a number: {secs}"))?;
            self.api.timeout_secs = Some(secs);
        }
        if let Some(port) = get("PORT") {
            self.health.port = port
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT is not a valid port: {port}"))?;
        }

        let keys = &mut self.keys;
        for (name, slot) in [
            ("GOOGLE_API_KEY", &mut keys.google_api_key),
            ("TAVILY_KEY", &mut keys.tavily_key),
            ("PSE", &mut keys.pse),
            ("OPENAI_API_KEY", &mut keys.openai_api_key),
            ("COMPOSIO_API_KEY", &mut keys.composio_key),
            ("HF_TOKEN", &mut keys.hf_token),
        ] {
            if let Some(value) = get(name) {
                *slot = Some(value);
            }
        }

        Ok(())
    }

    /// Startup credentials are the only fatal configuration errors.
    pub fn validate(&self) -> Result<()> {
        if self.discord.bot_token.trim().is_empty() {
            anyhow::bail!("Discord bot token is missing (set DISCORD_BOT_TOKEN or [discord] bot_token)");
        }
        if self.discord.guild_id.is_none() {
            anyhow::bail!("Discord guild id is missing (set DISCORD_GUILD_ID or [discord] guild_id)");
        }
        if self.api.base_url.trim().is_empty() {
            anyhow::bail!("Assistant API base URL is empty");
        }
        Ok(())
    }

    /// The base URL without a trailing slash, ready for `{base}/chat`.
    pub fn api_base(&self) -> &str {
        self.api.base_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_from_empty_file() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.health.port, 7860);
        assert!(config.health.enabled);
        assert!(config.voice.transcode_ogg);
        assert!(!config.api.include_audio);
        assert_eq!(config.api.timeout(), None);
        assert_eq!(config.discord.assistant_name, "Cortana");
    }

    #[test]
    fn test_parse_sections() {
        let config: Config = toml::from_str(
            r#"
[discord]
bot_token = "abc"
guild_id = 42

[api]
base_url = "http://localhost:8000/"
bearer_token = "secret"
timeout_secs = 90

[keys]
tavily_key = "tv"

[voice]
playback = false
"#,
        )
        .unwrap();
        assert_eq!(config.discord.guild_id, Some(42));
        assert_eq!(config.api_base(), "http://localhost:8000");
        assert_eq!(config.api.timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.keys.tavily_key.as_deref(), Some("tv"));
        assert!(!config.voice.playback);
        assert!(config.voice.transcode_ogg);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("DISCORD_BOT_TOKEN", "token"),
                ("DISCORD_GUILD_ID", "123"),
                ("RELAY_API_TOKEN", "bearer"),
                ("HF_TOKEN", "hf"),
                ("PSE", ""),
                ("PORT", "8080"),
            ]))
            .unwrap();
        assert_eq!(config.discord.bot_token, "token");
        assert_eq!(config.discord.guild_id, Some(123));
        assert_eq!(config.api.bearer_token.as_deref(), Some("bearer"));
        assert_eq!(config.keys.hf_token.as_deref(), Some("hf"));
        assert_eq!(config.keys.pse, None);
        assert_eq!(config.health.port, 8080);
    }

    #[test]
    fn test_invalid_guild_id_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("DISCORD_GUILD_ID", "not-a-number")]))
            .unwrap_err();
        assert!(err.to_string().contains("DISCORD_GUILD_ID"));
    }

    #[test]
    fn test_missing_credentials_fail_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.discord.bot_token = "token".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("guild id"));

        config.discord.guild_id = Some(1);
        config.validate().unwrap();
    }
}
