use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::chat::UserId;

/// Realtime chat server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "chat-server", version, about = "Realtime chat server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "CHAT_PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "CHAT_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./chat.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "CHAT_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (message history DB, JWT key)
    #[arg(long, env = "CHAT_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Print an access token for the given user id and exit
    #[arg(long, value_name = "USER_ID")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_token: Option<UserId>,

    /// Chat core tuning (loaded from [chat] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatConfig>,
}

/// A room that exists from startup and is never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultRoom {
    pub id: String,
    pub name: String,
}

/// Limits and timers for the chat core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Maximum number of user-created rooms (default: 10)
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Maximum members per room (default: 50)
    #[serde(default = "default_room_capacity")]
    pub room_capacity: usize,

    /// Outbound frames buffered per session before it counts as a slow consumer (default: 256)
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,

    /// Empty non-default rooms idle longer than this are removed (default: 36000 = 10 hours)
    #[serde(default = "default_idle_room_retention")]
    pub idle_room_retention_secs: u64,

    /// Interval between idle-room sweeps (default: 1800 = 30 minutes)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Lifetime of tokens printed by --issue-token (default: 86400 = 24 hours)
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: i64,

    /// Rooms created at startup
    #[serde(default = "default_rooms")]
    pub default_rooms: Vec<DefaultRoom>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_rooms: default_max_rooms(),
            room_capacity: default_room_capacity(),
            send_queue_capacity: default_send_queue_capacity(),
            idle_room_retention_secs: default_idle_room_retention(),
            sweep_interval_secs: default_sweep_interval(),
            token_ttl_secs: default_token_ttl(),
            default_rooms: default_rooms(),
        }
    }
}

impl ChatConfig {
    /// The idle-room retention window, or `None` if it does not fit a `TimeDelta`.
    pub fn idle_retention(&self) -> Option<TimeDelta> {
        i64::try_from(self.idle_room_retention_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
    }

    /// Reject values the chat core cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.idle_retention().is_none() {
            return Err(format!(
                "chat.idle_room_retention_secs is out of range: {}",
                self.idle_room_retention_secs
            ));
        }
        if self.send_queue_capacity == 0 {
            return Err("chat.send_queue_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

fn default_max_rooms() -> usize {
    10
}

fn default_room_capacity() -> usize {
    50
}

fn default_send_queue_capacity() -> usize {
    256
}

fn default_idle_room_retention() -> u64 {
    36_000
}

fn default_sweep_interval() -> u64 {
    1800
}

fn default_token_ttl() -> i64 {
    86_400
}

fn default_rooms() -> Vec<DefaultRoom> {
    [
        ("room-1", "Study Lounge"),
        ("room-2", "Leisure Lounge"),
        ("room-3", "Tech Talk"),
    ]
    .into_iter()
    .map(|(id, name)| DefaultRoom {
        id: id.to_string(),
        name: name.to_string(),
    })
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./chat.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            issue_token: None,
            chat: Some(ChatConfig::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHAT_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        let config: Config = Self::figment(cli, &config_path).extract()?;
        config.chat().validate().map_err(figment::Error::from)?;
        Ok(config)
    }

    fn figment(cli: Config, config_path: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("CHAT_").split("__"))
            .merge(Serialized::defaults(cli))
    }

    /// The `[chat]` section, or its defaults.
    pub fn chat(&self) -> ChatConfig {
        self.chat.clone().unwrap_or_default()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Realtime Chat Server Configuration
# Place this file at ./chat.toml or specify with --config <path>
# All settings can be overridden via environment variables (CHAT_PORT,
# CHAT_CHAT__MAX_ROOMS, etc.) or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the message history database and JWT signing key
# data_dir = "./data"

# ---- Chat core ----
# [chat]

# Maximum number of user-created rooms (default rooms do not count)
# max_rooms = 10

# Maximum members per room
# room_capacity = 50

# Frames buffered per connection; a client that falls further behind is disconnected
# send_queue_capacity = 256

# Empty user-created rooms idle longer than this are removed (seconds, default 10 hours)
# idle_room_retention_secs = 36000

# How often the idle-room sweep runs (seconds, default 30 minutes)
# sweep_interval_secs = 1800

# Lifetime of tokens printed by --issue-token (seconds)
# token_ttl_secs = 86400

# Rooms that exist from startup and can never be deleted
# [[chat.default_rooms]]
# id = "room-1"
# name = "Study Lounge"
"#
    .to_string()
}
