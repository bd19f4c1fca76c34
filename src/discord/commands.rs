//! Slash command definitions and handlers. Admin commands rely on Discord's
//! `default_member_permissions` gate and are re-checked on arrival.

use anyhow::Result;
use chrono::Utc;
use serenity::all::{
    CommandInteraction, CommandOptionType, Context, CreateCommand, CreateCommandOption,
    CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    ChannelId, MessageId, Permissions, ResolvedValue, RoleId, UserId,
};
use tracing::{info, warn};

use crate::db::Event;
use crate::discord::components::setup_rows;
use crate::discord::embed::{leaderboard_embed, missing_text, setup_embed};
use crate::discord::{BotContext, actor, is_admin, user_message};

pub const LEADERBOARD_SIZE: i64 = 10;
const MEMBER_PAGE: u64 = 1000;

pub fn definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("setup_war")
            .description("Compose and post a new guild war roster")
            .default_member_permissions(Permissions::MANAGE_GUILD),
        CreateCommand::new("leaderboard")
            .description("Top members by wars attended"),
        CreateCommand::new("check_missing")
            .description("List members of a role who have not responded to the current war")
            .default_member_permissions(Permissions::MANAGE_GUILD)
            .add_option(
                CreateCommandOption::new(CommandOptionType::Role, "role", "Role to check")
                    .required(true),
            ),
        CreateCommand::new("war_reschedule")
            .description("Move the current war to a new date and time")
            .default_member_permissions(Permissions::MANAGE_GUILD)
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "date",
                    "Today, Tomorrow or DD/MM",
                )
                .required(true),
            )
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "time", "Start time, HH:MM")
                    .required(true),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::String,
                "deadline",
                "Sign-up deadline, HH:MM",
            )),
        CreateCommand::new("war_delete")
            .description("Delete the current war and its roster message")
            .default_member_permissions(Permissions::MANAGE_GUILD),
    ]
}

fn reply(content: impl Into<String>) -> CreateInteractionResponse {
    CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(content)
            .ephemeral(true),
    )
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command.data.options().into_iter().find_map(|option| match option.value {
        ResolvedValue::String(value) if option.name == name => Some(value),
        _ => None,
    })
}

pub async fn handle(ctx: &Context, bot: &BotContext, command: &CommandInteraction) -> Result<()> {
    let admin_only = matches!(
        command.data.name.as_str(),
        "setup_war" | "check_missing" | "war_reschedule" | "war_delete"
    );
    if admin_only && !is_admin(command.member.as_deref()) {
        command
            .create_response(&ctx.http, reply("⛔ Only server managers can do that."))
            .await?;
        return Ok(());
    }

    match command.data.name.as_str() {
        "setup_war" => setup_war(ctx, bot, command).await,
        "leaderboard" => leaderboard(ctx, bot, command).await,
        "check_missing" => check_missing(ctx, bot, command).await,
        "war_reschedule" => reschedule(ctx, bot, command).await,
        "war_delete" => delete(ctx, bot, command).await,
        other => {
            warn!(command = other, "unknown slash command");
            Ok(())
        }
    }
}

async fn setup_war(ctx: &Context, bot: &BotContext, command: &CommandInteraction) -> Result<()> {
    let draft = bot.sessions.draft(command.user.id.get());
    let panel = CreateInteractionResponseMessage::new()
        .embed(setup_embed(&draft))
        .components(setup_rows(&draft, Utc::now(), bot.roster.timezone()))
        .ephemeral(true);
    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(panel))
        .await?;
    Ok(())
}

async fn leaderboard(ctx: &Context, bot: &BotContext, command: &CommandInteraction) -> Result<()> {
    let response = match bot.roster.leaderboard(LEADERBOARD_SIZE).await {
        Ok(entries) => CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new().embed(leaderboard_embed(&entries)),
        ),
        Err(err) => reply(user_message(&err)),
    };
    command.create_response(&ctx.http, response).await?;
    Ok(())
}

async fn current_event(bot: &BotContext, command: &CommandInteraction) -> Result<Option<Event>> {
    Ok(bot
        .roster
        .latest_live_event(Some(command.channel_id.get()))
        .await?)
}

/// Ids of non-bot guild members holding `role`, paging through the member list.
async fn role_members(ctx: &Context, command: &CommandInteraction, role: RoleId) -> Result<Vec<u64>> {
    let Some(guild_id) = command.guild_id else {
        return Ok(Vec::new());
    };

    let mut ids = Vec::new();
    let mut after: Option<UserId> = None;
    loop {
        let page = guild_id.members(&ctx.http, Some(MEMBER_PAGE), after).await?;
        let fetched = page.len() as u64;
        after = page.last().map(|m| m.user.id);
        ids.extend(
            page.into_iter()
                .filter(|m| !m.user.bot && m.roles.contains(&role))
                .map(|m| m.user.id.get()),
        );
        if fetched < MEMBER_PAGE {
            break;
        }
    }
    Ok(ids)
}

async fn check_missing(
    ctx: &Context,
    bot: &BotContext,
    command: &CommandInteraction,
) -> Result<()> {
    let role = command
        .data
        .options()
        .into_iter()
        .find_map(|option| match option.value {
            ResolvedValue::Role(role) => Some((role.id, role.name.clone())),
            _ => None,
        });
    let Some((role_id, role_name)) = role else {
        command
            .create_response(&ctx.http, reply("⚠️ Pick a role to check."))
            .await?;
        return Ok(());
    };

    command.defer(&ctx.http).await?;

    let content = match current_event(bot, command).await? {
        None => "📭 There is no open war to check.".to_string(),
        Some(event) => {
            let candidates = role_members(ctx, command, role_id).await?;
            match bot.roster.missing_members(event.id, &candidates).await {
                Ok(missing) => {
                    info!(event_id = %event.id, role = %role_name, missing = missing.len(), "missing members checked");
                    missing_text(&role_name, &missing)
                }
                Err(err) => user_message(&err),
            }
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}

async fn reschedule(ctx: &Context, bot: &BotContext, command: &CommandInteraction) -> Result<()> {
    let (Some(date), Some(time)) = (string_option(command, "date"), string_option(command, "time"))
    else {
        command
            .create_response(&ctx.http, reply("⚠️ Date and time are required."))
            .await?;
        return Ok(());
    };
    let deadline = string_option(command, "deadline");

    let Some(event) = current_event(bot, command).await? else {
        command
            .create_response(&ctx.http, reply("📭 There is no open war to reschedule."))
            .await?;
        return Ok(());
    };

    let who = actor(&command.user, command.member.as_deref());
    let content = match bot
        .roster
        .reschedule(event.id, date, time, deadline, &who)
        .await
    {
        Ok(event) => format!(
            "🕒 **{}** moved to {} {}. Reminders will go out again.",
            event.title, event.date_expr, event.match_time
        ),
        Err(err) => user_message(&err),
    };
    command.create_response(&ctx.http, reply(content)).await?;
    Ok(())
}

async fn delete(ctx: &Context, bot: &BotContext, command: &CommandInteraction) -> Result<()> {
    let Some(event) = current_event(bot, command).await? else {
        command
            .create_response(&ctx.http, reply("📭 There is no open war to delete."))
            .await?;
        return Ok(());
    };

    let who = actor(&command.user, command.member.as_deref());
    let content = match bot.roster.delete(event.id, &who).await {
        Ok(event) => {
            let channel = ChannelId::new(event.location.channel_id);
            let message = MessageId::new(event.location.message_id);
            if let Err(err) = channel.delete_message(&ctx.http, message).await {
                warn!(event_id = %event.id, "could not remove dashboard message: {err}");
            }
            format!("🧹 **{}** was deleted.", event.title)
        }
        Err(err) => user_message(&err),
    };
    command.create_response(&ctx.http, reply(content)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_has_a_handler_name() {
        let names: Vec<String> = definitions()
            .iter()
            .map(|c| {
                serde_json::to_value(c).unwrap()["name"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(
            names,
            ["setup_war", "leaderboard", "check_missing", "war_reschedule", "war_delete"]
        );
    }
}
