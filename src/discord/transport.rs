use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use serenity::all::{
    ChannelId, CreateAllowedMentions, CreateMessage, EditMessage, Http, MessageId, UserId,
};
use tracing::debug;

use crate::db::{Event, Registration};
use crate::discord::components::dashboard_rows;
use crate::discord::embed::{dashboard_embed, reminder_text};
use crate::roster::dates::resolve_instant;
use crate::roster::{DashboardView, RosterTransport, TransportError};

/// Delivers dashboards and reminders through the Discord REST API.
pub struct DiscordTransport {
    http: Arc<Http>,
    timezone: Tz,
}

impl DiscordTransport {
    pub fn new(http: Arc<Http>, timezone: Tz) -> Self {
        Self { http, timezone }
    }
}

#[async_trait]
impl RosterTransport for DiscordTransport {
    async fn push_dashboard(
        &self,
        event: &Event,
        view: &DashboardView,
    ) -> Result<(), TransportError> {
        let channel = ChannelId::new(event.location.channel_id);
        let message = MessageId::new(event.location.message_id);
        let edit = EditMessage::new()
            .content("")
            .embed(dashboard_embed(view))
            .components(dashboard_rows(
                event.id,
                view.status.locked,
                view.status.closed,
            ));

        channel
            .edit_message(&self.http, message, edit)
            .await
            .map_err(|e| TransportError(format!("failed to edit dashboard: {e}")))?;
        debug!(event_id = %event.id, "dashboard pushed");
        Ok(())
    }

    async fn send_reminder(
        &self,
        event: &Event,
        registrations: &[Registration],
    ) -> Result<(), TransportError> {
        let start = resolve_instant(&event.date_expr, &event.match_time, Utc::now(), self.timezone)
            .map(|s| s.timestamp());
        let users: Vec<UserId> = registrations
            .iter()
            .map(|r| UserId::new(r.user_id))
            .collect();
        let message = CreateMessage::new()
            .content(reminder_text(event, start, registrations))
            .allowed_mentions(CreateAllowedMentions::new().users(users));

        ChannelId::new(event.location.channel_id)
            .send_message(&self.http, message)
            .await
            .map_err(|e| TransportError(format!("failed to send reminder: {e}")))?;
        Ok(())
    }
}
