use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Database {
    /// Postgres connection string. When absent (and `DATABASE_URL` is unset)
    /// the bot falls back to a local SQLite file.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Bot {
    pub token: String,
    /// Chat id of the channel users must join. The bot must be an
    /// administrator of this channel for membership checks to work.
    pub channel_id: i64,
    /// Public link to the channel, shown in the subscription prompt.
    pub channel_link: String,
    pub admin_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct Referral {
    #[serde(default = "default_threshold")]
    pub threshold: i64,
}

impl Default for Referral {
    fn default() -> Self {
        Referral {
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Broadcast {
    /// Pause between consecutive sends, to stay under upstream rate limits.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// How long an opened admin broadcast session stays valid.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl Default for Broadcast {
    fn default() -> Self {
        Broadcast {
            delay_ms: default_delay_ms(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: Database,
    pub bot: Bot,
    #[serde(default)]
    pub referral: Referral,
    #[serde(default)]
    pub broadcast: Broadcast,
}

fn default_threshold() -> i64 {
    30
}

fn default_delay_ms() -> u64 {
    35
}

fn default_session_ttl_secs() -> u64 {
    600
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config.toml"))
            .build()?;

        config.try_deserialize()
    }
}
