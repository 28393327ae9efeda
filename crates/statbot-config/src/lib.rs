//! Statbot Configuration
//!
//! TOML configuration loading with environment variable overrides

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_BOT_NAME: &str = "StatsBot";
pub const DEFAULT_COMMAND_PREFIX: &str = "!";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub bot: BotConfig,
    pub bridge: Option<BridgeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Shown in replies and used to drop the bot's own messages.
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    #[serde(default)]
    pub admin_ids: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_reply: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Snapshot file; defaults to `<data_dir>/data/storage.json`.
    #[serde(default)]
    pub persist_path: Option<String>,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_reply_delay_min_ms")]
    pub reply_delay_min_ms: u64,
    #[serde(default = "default_reply_delay_max_ms")]
    pub reply_delay_max_ms: u64,
    #[serde(default = "default_max_inflight_replies")]
    pub max_inflight_replies: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            command_prefix: default_command_prefix(),
            admin_ids: Vec::new(),
            auto_reply: true,
            poll_interval_ms: default_poll_interval_ms(),
            persist_path: None,
            flush_interval_secs: default_flush_interval_secs(),
            reply_delay_min_ms: default_reply_delay_min_ms(),
            reply_delay_max_ms: default_reply_delay_max_ms(),
            max_inflight_replies: default_max_inflight_replies(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub base_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_bot_name() -> String {
    DEFAULT_BOT_NAME.to_string()
}

fn default_command_prefix() -> String {
    DEFAULT_COMMAND_PREFIX.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_flush_interval_secs() -> u64 {
    DEFAULT_FLUSH_INTERVAL_SECS
}

fn default_reply_delay_min_ms() -> u64 {
    1000
}

fn default_reply_delay_max_ms() -> u64 {
    3000
}

fn default_max_inflight_replies() -> usize {
    16
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        if path == "~" {
            home
        } else {
            home.join(path.trim_start_matches("~/"))
        }
    } else {
        PathBuf::from(path)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("statbot").join("config.toml"))
    }

    /// Applies `STATBOT_*` overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("STATBOT_BOT_NAME") {
            self.bot.bot_name = name;
        }
        if let Some(prefix) = lookup("STATBOT_COMMAND_PREFIX") {
            self.bot.command_prefix = prefix;
        }
        if let Some(ids) = lookup("STATBOT_ADMIN_IDS") {
            self.bot.admin_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(flag) = lookup("STATBOT_AUTO_REPLY") {
            self.bot.auto_reply = !flag.trim().eq_ignore_ascii_case("false");
        }
        if let Some(base_url) = lookup("STATBOT_BRIDGE_URL") {
            match self.bridge.as_mut() {
                Some(bridge) => bridge.base_url = base_url,
                None => {
                    self.bridge = Some(BridgeConfig {
                        base_url,
                        auth_token: None,
                        request_timeout_secs: None,
                    })
                }
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let bot = &self.bot;
        if bot.bot_name.trim().is_empty() {
            anyhow::bail!("bot.bot_name cannot be empty");
        }
        if bot.command_prefix.trim().is_empty() {
            anyhow::bail!("bot.command_prefix cannot be empty");
        }
        if bot.poll_interval_ms == 0 {
            anyhow::bail!("bot.poll_interval_ms must be greater than zero");
        }
        if bot.flush_interval_secs == 0 {
            anyhow::bail!("bot.flush_interval_secs must be greater than zero");
        }
        if bot.reply_delay_min_ms > bot.reply_delay_max_ms {
            anyhow::bail!(
                "bot.reply_delay_min_ms ({}) is greater than bot.reply_delay_max_ms ({})",
                bot.reply_delay_min_ms,
                bot.reply_delay_max_ms
            );
        }
        if bot.max_inflight_replies == 0 {
            anyhow::bail!("bot.max_inflight_replies must be greater than zero");
        }
        if bot.admin_ids.iter().any(|id| id.trim().is_empty()) {
            anyhow::bail!("bot.admin_ids cannot contain empty entries");
        }

        if let Some(bridge) = &self.bridge {
            let parsed = url::Url::parse(bridge.base_url.trim()).map_err(|e| {
                anyhow::anyhow!("Invalid bridge.base_url '{}': {}", bridge.base_url, e)
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!(
                    "bridge.base_url must use http or https, got '{}'",
                    parsed.scheme()
                );
            }
            if bridge.request_timeout_secs == Some(0) {
                anyhow::bail!("bridge.request_timeout_secs must be greater than zero");
            }
        }

        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        match &self.core.data_dir {
            Some(data_dir) => expand_home(data_dir),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".statbot"),
        }
    }

    pub fn persist_path(&self) -> PathBuf {
        match &self.bot.persist_path {
            Some(path) => expand_home(path),
            None => self.data_dir().join("data").join("storage.json"),
        }
    }

    pub fn log_level(&self) -> &str {
        self.core.log_level.as_deref().unwrap_or("info")
    }

    /// Starter file written by `statbot config init`.
    pub fn template() -> String {
        format!(
            r#"[core]
# data_dir = "~/.statbot"
log_level = "info"

[bot]
bot_name = "{DEFAULT_BOT_NAME}"
command_prefix = "{DEFAULT_COMMAND_PREFIX}"
admin_ids = []
auto_reply = true
poll_interval_ms = {DEFAULT_POLL_INTERVAL_MS}
flush_interval_secs = {DEFAULT_FLUSH_INTERVAL_SECS}

[bridge]
base_url = "http://127.0.0.1:3000"
"#
        )
    }
}
