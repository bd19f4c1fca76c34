use super::ConfigError;
use super::validator::is_clock_time;
use chrono_tz::Tz;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bot: BotConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub token: SecretString,
    /// Register slash commands on this guild only; global registration otherwise.
    #[serde(default)]
    pub guild_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            url.clone()
        } else if let Some(ref file) = self.filename {
            format!("sqlite://{}", file)
        } else {
            String::new()
        }
    }

    pub fn sqlite_path(&self) -> Option<String> {
        let url = self.connection_string();
        if url.is_empty() || (url.contains("://") && !url.starts_with("sqlite://")) {
            return None;
        }
        Some(url.strip_prefix("sqlite://").unwrap_or(&url).to_string())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_web_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: default_web_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Which instant closes sign-ups automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    #[default]
    MatchStart,
    /// The event's deadline time; events without one lock at match start.
    Deadline,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    #[serde(default)]
    pub lock_policy: LockPolicy,
    #[serde(default = "default_reminder_opens_before")]
    pub reminder_opens_before_minutes: i64,
    #[serde(default = "default_reminder_closes_before")]
    pub reminder_closes_before_minutes: i64,
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_seconds: u64,
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
}

impl ScheduleConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_seconds)
    }

    pub fn reminder_opens_before(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reminder_opens_before_minutes)
    }

    pub fn reminder_closes_before(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reminder_closes_before_minutes)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
            lock_policy: LockPolicy::default(),
            reminder_opens_before_minutes: default_reminder_opens_before(),
            reminder_closes_before_minutes: default_reminder_closes_before(),
            delivery_timeout_seconds: default_delivery_timeout(),
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistrationConfig {
    #[serde(default)]
    pub weapon_select: bool,
    #[serde(default = "default_flow_timeout")]
    pub flow_timeout_seconds: u64,
    #[serde(default = "default_notice_seconds")]
    pub notice_seconds: u64,
}

impl RegistrationConfig {
    pub const MIN_FLOW_TIMEOUT: u64 = 60;
    pub const MAX_FLOW_TIMEOUT: u64 = 180;

    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(
            self.flow_timeout_seconds
                .clamp(Self::MIN_FLOW_TIMEOUT, Self::MAX_FLOW_TIMEOUT),
        )
    }

    pub fn notice_lifetime(&self) -> Duration {
        Duration::from_secs(self.notice_seconds)
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            weapon_select: false,
            flow_timeout_seconds: default_flow_timeout(),
            notice_seconds: default_notice_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_date")]
    pub date: String,
    #[serde(default = "default_time")]
    pub time: String,
    #[serde(default = "default_teams")]
    pub teams: Vec<String>,
    #[serde(default = "default_color")]
    pub color: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            date: default_date(),
            time: default_time(),
            teams: default_teams(),
            color: default_color(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub log_channel_id: Option<u64>,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, |key| std::env::var(key).ok())
    }

    pub fn from_yaml(
        content: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.apply_env_overrides(env);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.token.expose_secret().trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "bot.token cannot be empty".to_string(),
            ));
        }

        if self.database.sqlite_path().is_none() {
            return Err(ConfigError::InvalidConfig(
                "database.url must name a sqlite database".to_string(),
            ));
        }

        if self.web.enabled && self.web.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "web.port must be between 1 and 65535".to_string(),
            ));
        }

        if self.schedule.tick_seconds == 0 {
            return Err(ConfigError::InvalidConfig(
                "schedule.tick_seconds must be positive".to_string(),
            ));
        }

        if self.schedule.reminder_closes_before_minutes < 0
            || self.schedule.reminder_opens_before_minutes
                <= self.schedule.reminder_closes_before_minutes
        {
            return Err(ConfigError::InvalidConfig(
                "schedule.reminder_opens_before_minutes must be greater than reminder_closes_before_minutes"
                    .to_string(),
            ));
        }

        if self.defaults.teams.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "defaults.teams needs at least one team".to_string(),
            ));
        }

        if !is_clock_time(&self.defaults.time) {
            return Err(ConfigError::InvalidConfig(format!(
                "defaults.time `{}` is not HH:MM",
                self.defaults.time
            )));
        }

        if self.defaults.color > 0xFF_FF_FF {
            return Err(ConfigError::InvalidConfig(
                "defaults.color must be a 24-bit RGB value".to_string(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(value) = env("GUILDWAR_BOT_TOKEN") {
            self.bot.token = SecretString::from(value);
        }
        if let Some(value) = env("GUILDWAR_DATABASE_URL") {
            self.database.url = Some(value);
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_web_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9005
}

fn default_tick_seconds() -> u64 {
    60
}

fn default_reminder_opens_before() -> i64 {
    30
}

fn default_reminder_closes_before() -> i64 {
    15
}

fn default_delivery_timeout() -> u64 {
    10
}

fn default_timezone() -> Tz {
    chrono_tz::Asia::Bangkok
}

fn default_flow_timeout() -> u64 {
    120
}

fn default_notice_seconds() -> u64 {
    5
}

fn default_title() -> String {
    "Guild War Roster".to_string()
}

fn default_date() -> String {
    "Today".to_string()
}

fn default_time() -> String {
    "19:30".to_string()
}

fn default_teams() -> Vec<String> {
    vec!["Team ATK".to_string(), "Team Flex".to_string()]
}

fn default_color() -> u32 {
    0x00f7ff
}
