use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{
    ChannelId, Colour, CreateEmbed, CreateEmbedFooter, CreateMessage, Http, Timestamp,
};
use tracing::{debug, warn};

/// Who triggered an audited action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: u64,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl Actor {
    pub fn new(user_id: u64, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    /// Actions taken by the bot itself, such as scheduled locks.
    pub fn system() -> Self {
        Self::new(0, "scheduler")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Created,
    Registered,
    Absence,
    Withdrew,
    Locked,
    Unlocked,
    Closed,
    Rescheduled,
    Deleted,
}

impl AuditAction {
    pub fn title(&self) -> &'static str {
        match self {
            AuditAction::Created => "📝 War created",
            AuditAction::Registered => "⚔️ Registered",
            AuditAction::Absence => "🏳️ Absence",
            AuditAction::Withdrew => "🗑️ Withdrew",
            AuditAction::Locked => "🔒 Locked",
            AuditAction::Unlocked => "🔓 Unlocked",
            AuditAction::Closed => "💾 War closed",
            AuditAction::Rescheduled => "🕒 Rescheduled",
            AuditAction::Deleted => "🧹 War deleted",
        }
    }

    pub fn colour(&self) -> Colour {
        match self {
            AuditAction::Registered | AuditAction::Created | AuditAction::Closed => {
                Colour::DARK_GREEN
            }
            AuditAction::Absence | AuditAction::Rescheduled | AuditAction::Unlocked => {
                Colour::ORANGE
            }
            AuditAction::Withdrew | AuditAction::Locked | AuditAction::Deleted => Colour::RED,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor: Actor,
    pub action: AuditAction,
    pub details: String,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(actor: &Actor, action: AuditAction, details: impl Into<String>) -> Self {
        Self {
            actor: actor.clone(),
            action,
            details: details.into(),
            at: Utc::now(),
        }
    }
}

/// Destination for activity records. Recording never fails the caller.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry);
}

pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, entry: AuditEntry) {
        debug!(action = ?entry.action, actor = entry.actor.user_id, "audit sink disabled");
    }
}

/// Posts an embed per entry into a log channel.
pub struct DiscordAuditSink {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl DiscordAuditSink {
    pub fn new(http: Arc<Http>, channel_id: u64) -> Self {
        Self {
            http,
            channel_id: ChannelId::new(channel_id),
        }
    }
}

#[async_trait]
impl AuditSink for DiscordAuditSink {
    async fn record(&self, entry: AuditEntry) {
        let mut embed = CreateEmbed::new()
            .title(entry.action.title())
            .description(format!(
                "**User:** <@{}>\n**Action:** {}",
                entry.actor.user_id, entry.details
            ))
            .colour(entry.action.colour())
            .footer(CreateEmbedFooter::new(format!("ID: {}", entry.actor.user_id)));

        if let Ok(ts) = Timestamp::from_unix_timestamp(entry.at.timestamp()) {
            embed = embed.timestamp(ts);
        }

        if let Some(avatar) = &entry.actor.avatar_url {
            embed = embed.thumbnail(avatar);
        }

        if let Err(e) = self
            .channel_id
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await
        {
            warn!(
                channel_id = self.channel_id.get(),
                action = ?entry.action,
                "failed to write audit log: {}",
                e
            );
        }
    }
}
