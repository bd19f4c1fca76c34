use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use secrecy::ExposeSecret;
use serenity::all::{
    Client as SerenityClient, Command, Context as SerenityContext,
    EventHandler as SerenityEventHandler, GatewayIntents, GuildId, Interaction, Member,
    Permissions, Ready, User,
};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, error, info, warn};

use crate::audit::Actor;
use crate::config::Config;
use crate::registration::RegistrationFlow;
use crate::roster::{RosterError, RosterService};
use crate::session::SessionManager;
use crate::web::metrics::Metrics;

const INITIAL_LOGIN_RETRY_SECONDS: u64 = 2;
const MAX_LOGIN_RETRY_SECONDS: u64 = 300;
const READY_TIMEOUT_SECONDS: u64 = 30;

pub mod commands;
pub mod components;
pub mod embed;
pub mod interactions;
pub mod transport;

pub use self::transport::DiscordTransport;

/// Services the interaction handlers operate on.
pub struct BotContext {
    pub config: Arc<Config>,
    pub roster: Arc<RosterService>,
    pub flows: Arc<RegistrationFlow>,
    pub sessions: Arc<SessionManager>,
}

impl BotContext {
    pub fn notice_lifetime(&self) -> Duration {
        self.config.registration.notice_lifetime()
    }
}

#[derive(Clone)]
pub struct DiscordClient {
    config: Arc<Config>,
    bot: Arc<BotContext>,
    login_state: Arc<AsyncMutex<DiscordLoginState>>,
}

#[derive(Default)]
struct DiscordLoginState {
    is_logged_in: bool,
    gateway_task: Option<tokio::task::JoinHandle<()>>,
}

struct InteractionHandler {
    ready_sender: Arc<AsyncMutex<Option<oneshot::Sender<()>>>>,
    bot: Arc<BotContext>,
}

#[serenity::async_trait]
impl SerenityEventHandler for InteractionHandler {
    async fn ready(&self, ctx: SerenityContext, ready: Ready) {
        info!(
            "discord gateway ready as {} ({})",
            ready.user.name, ready.user.id
        );

        let definitions = commands::definitions();
        let registered = match self.bot.config.bot.guild_id {
            Some(guild_id) => GuildId::new(guild_id)
                .set_commands(&ctx.http, definitions)
                .await
                .map(|c| c.len()),
            None => Command::set_global_commands(&ctx.http, definitions)
                .await
                .map(|c| c.len()),
        };
        match registered {
            Ok(count) => info!(count, "slash commands registered"),
            Err(err) => error!("failed to register slash commands: {err}"),
        }

        if let Some(sender) = self.ready_sender.lock().await.take() {
            let _ = sender.send(());
        }
    }

    async fn interaction_create(&self, ctx: SerenityContext, interaction: Interaction) {
        Metrics::interaction_received();
        let result = match &interaction {
            Interaction::Command(command) => commands::handle(&ctx, &self.bot, command).await,
            Interaction::Component(component) => {
                interactions::handle_component(&ctx, &self.bot, component).await
            }
            Interaction::Modal(modal) => interactions::handle_modal(&ctx, &self.bot, modal).await,
            other => {
                debug!(kind = ?other.kind(), "ignoring interaction");
                Ok(())
            }
        };

        if let Err(err) = result {
            error!("failed to handle interaction {}: {err}", interaction.id());
        }
    }
}

impl DiscordClient {
    pub fn new(config: Arc<Config>, bot: Arc<BotContext>) -> Self {
        Self {
            config,
            bot,
            login_state: Arc::new(AsyncMutex::new(DiscordLoginState::default())),
        }
    }

    pub async fn login(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if state.is_logged_in {
            return Ok(());
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let event_handler = InteractionHandler {
            ready_sender: Arc::new(AsyncMutex::new(Some(ready_tx))),
            bot: self.bot.clone(),
        };

        let mut gateway_client = SerenityClient::builder(
            self.config.bot.token.expose_secret(),
            GatewayIntents::GUILDS,
        )
        .event_handler(event_handler)
        .await
        .map_err(|err| anyhow!("failed to build discord gateway client: {err}"))?;

        let gateway_task = tokio::spawn(async move {
            if let Err(err) = gateway_client.start().await {
                error!("discord gateway stopped: {err}");
            }
        });

        match tokio::time::timeout(Duration::from_secs(READY_TIMEOUT_SECONDS), ready_rx).await {
            Ok(Ok(())) => {
                state.is_logged_in = true;
                state.gateway_task = Some(gateway_task);
                info!("discord bot login succeeded and gateway is connected");
                Ok(())
            }
            Ok(Err(_)) => {
                gateway_task.abort();
                Err(anyhow!("discord gateway exited before receiving Ready event"))
            }
            Err(_) => {
                gateway_task.abort();
                Err(anyhow!("timed out waiting for discord Ready event"))
            }
        }
    }

    /// Logs in, retrying with exponential backoff until the gateway is ready.
    pub async fn start(&self) -> Result<()> {
        let mut retry_seconds = INITIAL_LOGIN_RETRY_SECONDS;

        loop {
            match self.login().await {
                Ok(()) => {
                    info!("discord client is ready");
                    return Ok(());
                }
                Err(err) => {
                    error!(
                        "failed to start discord client: {err}. retrying in {} seconds",
                        retry_seconds
                    );
                    tokio::time::sleep(Duration::from_secs(retry_seconds)).await;
                    retry_seconds = (retry_seconds * 2).min(MAX_LOGIN_RETRY_SECONDS);
                }
            }
        }
    }

    /// Resolves when the gateway task ends, which only happens on a fatal
    /// gateway error or after `stop`.
    pub async fn wait(&self) -> Result<()> {
        let task = self.login_state.lock().await.gateway_task.take();
        match task {
            Some(task) => task
                .await
                .map_err(|err| anyhow!("discord gateway task join error: {err}")),
            None => Err(anyhow!("discord client is not logged in")),
        }
    }

    pub async fn stop(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if !state.is_logged_in {
            return Ok(());
        }

        if let Some(gateway_task) = state.gateway_task.take() {
            gateway_task.abort();
            match gateway_task.await {
                Ok(()) => info!("discord gateway task exited"),
                Err(join_err) if join_err.is_cancelled() => {
                    info!("discord gateway task aborted")
                }
                Err(join_err) => {
                    error!("discord gateway task join error: {join_err}");
                }
            }
        }

        state.is_logged_in = false;
        info!("discord client stopped");
        Ok(())
    }
}

pub fn has_admin_permissions(permissions: Permissions) -> bool {
    permissions.administrator() || permissions.manage_guild()
}

/// Interaction payloads carry the member's resolved permissions.
pub fn is_admin(member: Option<&Member>) -> bool {
    member
        .and_then(|m| m.permissions)
        .is_some_and(has_admin_permissions)
}

/// Guild nickname first, then the global display name.
pub fn display_name(user: &User, member: Option<&Member>) -> String {
    member
        .map(|m| m.display_name().to_string())
        .unwrap_or_else(|| user.display_name().to_string())
}

pub fn actor(user: &User, member: Option<&Member>) -> Actor {
    Actor {
        user_id: user.id.get(),
        display_name: display_name(user, member),
        avatar_url: Some(user.face()),
    }
}

/// Text shown to the member for a failed action.
pub fn user_message(err: &RosterError) -> String {
    match err {
        RosterError::Validation(message) => format!("⚠️ {message}"),
        RosterError::NotFound(_) => "❌ This war no longer exists.".to_string(),
        RosterError::Locked(_) => "🔒 Registration is locked for this war.".to_string(),
        RosterError::Transport(_) | RosterError::Database(_) => {
            "❌ Something went wrong, please try again.".to_string()
        }
    }
}

/// Runs `delete` once `lifetime` has passed. Used for self-expiring notices.
pub fn expire_after<F>(lifetime: Duration, delete: F)
where
    F: Future<Output = serenity::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(lifetime).await;
        if let Err(err) = delete.await {
            warn!("failed to remove expired notice: {err}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn admin_permissions() {
        assert!(has_admin_permissions(Permissions::ADMINISTRATOR));
        assert!(has_admin_permissions(
            Permissions::MANAGE_GUILD | Permissions::SEND_MESSAGES
        ));
        assert!(!has_admin_permissions(
            Permissions::SEND_MESSAGES | Permissions::MANAGE_MESSAGES
        ));
        assert!(!is_admin(None));
    }

    #[test]
    fn errors_map_to_member_messages() {
        assert_eq!(
            user_message(&RosterError::Validation("Pick a team.".into())),
            "⚠️ Pick a team."
        );
        assert!(user_message(&RosterError::Locked(Uuid::nil())).starts_with("🔒"));
        assert!(user_message(&RosterError::NotFound(Uuid::nil())).contains("no longer exists"));
    }
}
