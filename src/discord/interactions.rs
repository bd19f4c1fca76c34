//! Button, select and modal handlers for dashboards, the sign-up flow and the
//! setup panel.

use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use serenity::all::{
    ActionRowComponent, ComponentInteraction, ComponentInteractionDataKind, Context,
    CreateInteractionResponse, CreateInteractionResponseFollowup,
    CreateInteractionResponseMessage, CreateMessage, CreateModal, CreateThread,
    EditInteractionResponse, InputTextStyle, ModalInteraction, ModalInteractionData,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{Actor, AuditAction, AuditEntry};
use crate::db::{AvailabilityTag, DeliveryLocation, Registration, Role, Slot, Weapon};
use crate::discord::components::{
    ComponentAction, DashboardButton, FlowComponent, MANUAL_DATE, ModalKind, OTHER_AVAILABILITY,
    SetupComponent, dashboard_rows, flow_prompt, setup_rows, text_input,
};
use crate::discord::embed::{dashboard_embed, setup_embed};
use crate::discord::{BotContext, actor, display_name, expire_after, is_admin, user_message};
use crate::registration::{FlowInput, FlowOutcome, FlowState};
use crate::roster::RosterError;
use crate::session::{EventDraft, parse_color};
use crate::web::metrics::Metrics;

/// Discord caps message content at 2000 characters.
const MESSAGE_LIMIT: usize = 2000;

fn ephemeral(content: impl Into<String>) -> CreateInteractionResponse {
    CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(content)
            .ephemeral(true),
    )
}

/// Replaces the message the component sits on with plain text.
fn replace_with(content: impl Into<String>) -> CreateInteractionResponse {
    CreateInteractionResponse::UpdateMessage(
        CreateInteractionResponseMessage::new()
            .content(content)
            .embeds(Vec::new())
            .components(Vec::new()),
    )
}

fn select_values(component: &ComponentInteraction) -> Vec<String> {
    match &component.data.kind {
        ComponentInteractionDataKind::StringSelect { values } => values.clone(),
        _ => Vec::new(),
    }
}

fn modal_values(data: &ModalInteractionData) -> HashMap<String, String> {
    data.components
        .iter()
        .flat_map(|row| row.components.iter())
        .filter_map(|component| match component {
            ActionRowComponent::InputText(input) => Some((
                input.custom_id.clone(),
                input.value.clone().unwrap_or_default(),
            )),
            _ => None,
        })
        .collect()
}

fn field<'a>(values: &'a HashMap<String, String>, name: &str) -> &'a str {
    values.get(name).map(String::as_str).unwrap_or_default()
}

fn committed_text(registration: &Registration) -> String {
    match &registration.slot {
        Slot::Team {
            team,
            role,
            availability,
            weapons,
        } => {
            let mut text = format!(
                "✅ Signed up for **{team}** as **{role}** · 🕒 {}",
                availability.label()
            );
            if !weapons.is_empty() {
                let names: Vec<&str> = weapons.iter().map(Weapon::label).collect();
                text.push_str(&format!(" · 🗡️ {}", names.join("/")));
            }
            text
        }
        Slot::Absence { reason } => format!("🏳️ Absence noted: {reason}"),
    }
}

/// Translates a sign-up component into a flow input.
pub fn flow_input(component: FlowComponent, values: &[String]) -> Option<FlowInput> {
    let first = values.first().map(String::as_str);
    match component {
        FlowComponent::Role => first.map(|v| FlowInput::Role(Role::parse(v))),
        FlowComponent::Team => first.map(|v| FlowInput::Team(v.to_string())),
        FlowComponent::Availability => {
            if values.iter().any(|v| v == OTHER_AVAILABILITY) {
                return Some(FlowInput::RequestCustomAvailability);
            }
            Some(FlowInput::Availability(
                values
                    .iter()
                    .filter_map(|v| AvailabilityTag::from_token(v))
                    .collect(),
            ))
        }
        FlowComponent::Weapons => Some(FlowInput::Weapons(
            values.iter().filter_map(|v| Weapon::from_token(v)).collect(),
        )),
        FlowComponent::SkipWeapons => Some(FlowInput::SkipWeapons),
        FlowComponent::Cancel => None,
    }
}

fn absence_modal(event_id: Uuid) -> CreateInteractionResponse {
    CreateInteractionResponse::Modal(
        CreateModal::new(ModalKind::Absence(event_id).custom_id(), "Report absence").components(
            vec![text_input(
                "reason",
                "Why can't you make it?",
                InputTextStyle::Paragraph,
                None,
                true,
            )],
        ),
    )
}

fn custom_availability_modal(event_id: Uuid) -> CreateInteractionResponse {
    CreateInteractionResponse::Modal(
        CreateModal::new(
            ModalKind::CustomAvailability(event_id).custom_id(),
            "Your availability",
        )
        .components(vec![text_input(
            "availability",
            "When can you play?",
            InputTextStyle::Short,
            None,
            true,
        )]),
    )
}

fn setup_panel(bot: &BotContext, draft: &EventDraft) -> CreateInteractionResponseMessage {
    CreateInteractionResponseMessage::new()
        .content("")
        .embed(setup_embed(draft))
        .components(setup_rows(draft, Utc::now(), bot.roster.timezone()))
}

pub async fn handle_component(
    ctx: &Context,
    bot: &BotContext,
    component: &ComponentInteraction,
) -> Result<()> {
    let Some(action) = ComponentAction::parse(&component.data.custom_id) else {
        debug!(custom_id = %component.data.custom_id, "ignoring foreign component");
        return Ok(());
    };

    match action {
        ComponentAction::Dashboard(button, event_id) => {
            dashboard_button(ctx, bot, component, button, event_id).await
        }
        ComponentAction::Flow(flow, event_id) => {
            flow_component(ctx, bot, component, flow, event_id).await
        }
        ComponentAction::Setup(op) => setup_component(ctx, bot, component, op).await,
    }
}

/// Answers a rejected write with a short-lived ephemeral notice.
async fn locked_notice(ctx: &Context, bot: &BotContext, component: &ComponentInteraction) -> Result<()> {
    Metrics::registration_rejected();
    component
        .create_response(&ctx.http, ephemeral(user_message(&RosterError::Locked(Uuid::nil()))))
        .await?;
    let http = ctx.http.clone();
    let interaction = component.clone();
    expire_after(bot.notice_lifetime(), async move {
        interaction.delete_response(&http).await
    });
    Ok(())
}

async fn dashboard_button(
    ctx: &Context,
    bot: &BotContext,
    component: &ComponentInteraction,
    button: DashboardButton,
    event_id: Uuid,
) -> Result<()> {
    let user_id = component.user.id.get();
    let who = actor(&component.user, component.member.as_ref());

    if matches!(button, DashboardButton::ToggleLock | DashboardButton::Close)
        && !is_admin(component.member.as_ref())
    {
        component
            .create_response(&ctx.http, ephemeral("⛔ Only server managers can do that."))
            .await?;
        return Ok(());
    }

    let response = match button {
        DashboardButton::Join => match bot.flows.start(event_id, user_id).await {
            Ok(FlowOutcome::Prompt { event, state }) => {
                let (content, rows) = flow_prompt(&event, &state);
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content(content)
                        .components(rows)
                        .ephemeral(true),
                )
            }
            Ok(FlowOutcome::Committed(registration)) => ephemeral(committed_text(&registration)),
            Err(RosterError::Locked(_)) => return locked_notice(ctx, bot, component).await,
            Err(err) => ephemeral(user_message(&err)),
        },
        DashboardButton::Absence => match bot.roster.mutable_event(event_id).await {
            Ok(_) => absence_modal(event_id),
            Err(RosterError::Locked(_)) => return locked_notice(ctx, bot, component).await,
            Err(err) => ephemeral(user_message(&err)),
        },
        DashboardButton::Leave => match bot.roster.withdraw(event_id, &who).await {
            Ok(true) => {
                bot.flows.cancel(event_id, user_id);
                ephemeral("🗑️ Your registration was removed.")
            }
            Ok(false) => ephemeral("You are not on this roster."),
            Err(RosterError::Locked(_)) => return locked_notice(ctx, bot, component).await,
            Err(err) => ephemeral(user_message(&err)),
        },
        DashboardButton::Refresh => match bot.roster.render(event_id).await {
            Ok(view) => CreateInteractionResponse::UpdateMessage(
                CreateInteractionResponseMessage::new()
                    .embed(dashboard_embed(&view))
                    .components(dashboard_rows(event_id, view.status.locked, view.status.closed)),
            ),
            Err(err) => ephemeral(user_message(&err)),
        },
        DashboardButton::Copy => match bot.roster.roster_text(event_id).await {
            Ok(text) => {
                let text: String = text.chars().take(MESSAGE_LIMIT - 10).collect();
                ephemeral(format!("```\n{text}\n```"))
            }
            Err(err) => ephemeral(user_message(&err)),
        },
        DashboardButton::ToggleLock | DashboardButton::Close => {
            // the service edits the dashboard itself, so only acknowledge here
            component.defer(&ctx.http).await?;
            let content = admin_action(bot, button, event_id, &who).await;
            component
                .create_followup(
                    &ctx.http,
                    CreateInteractionResponseFollowup::new()
                        .content(content)
                        .ephemeral(true),
                )
                .await?;
            return Ok(());
        }
    };

    component.create_response(&ctx.http, response).await?;
    Ok(())
}

async fn admin_action(
    bot: &BotContext,
    button: DashboardButton,
    event_id: Uuid,
    who: &Actor,
) -> String {
    if button == DashboardButton::Close {
        return match bot.roster.close(event_id, who).await {
            Ok(count) => format!("💾 War closed. Saved attendance for {count} members."),
            Err(err) => user_message(&err),
        };
    }

    let event = match bot.roster.event(event_id).await {
        Ok(event) => event,
        Err(err) => return user_message(&err),
    };
    match bot.roster.set_locked(event_id, !event.is_locked(), who).await {
        Ok(event) if event.is_locked() => "🔒 Registration locked.".to_string(),
        Ok(_) => "🔓 Registration reopened.".to_string(),
        Err(err) => user_message(&err),
    }
}

async fn flow_component(
    ctx: &Context,
    bot: &BotContext,
    component: &ComponentInteraction,
    flow: FlowComponent,
    event_id: Uuid,
) -> Result<()> {
    let user_id = component.user.id.get();
    let Some(input) = flow_input(flow, &select_values(component)) else {
        bot.flows.cancel(event_id, user_id);
        component
            .create_response(&ctx.http, replace_with("Sign-up cancelled."))
            .await?;
        return Ok(());
    };

    let name = display_name(&component.user, component.member.as_ref());
    let outcome = bot.flows.handle(event_id, user_id, &name, input).await;
    respond_to_flow(ctx, bot, FlowReply::Component(component), outcome).await
}

enum FlowReply<'a> {
    Component(&'a ComponentInteraction),
    Modal(&'a ModalInteraction),
}

impl FlowReply<'_> {
    async fn respond(&self, ctx: &Context, response: CreateInteractionResponse) -> Result<()> {
        match self {
            FlowReply::Component(c) => c.create_response(&ctx.http, response).await?,
            FlowReply::Modal(m) => m.create_response(&ctx.http, response).await?,
        }
        Ok(())
    }

    fn expire(&self, ctx: &Context, bot: &BotContext) {
        let http = ctx.http.clone();
        match self {
            FlowReply::Component(c) => {
                let interaction = (*c).clone();
                expire_after(bot.notice_lifetime(), async move {
                    interaction.delete_response(&http).await
                });
            }
            FlowReply::Modal(m) => {
                let interaction = (*m).clone();
                expire_after(bot.notice_lifetime(), async move {
                    interaction.delete_response(&http).await
                });
            }
        }
    }
}

async fn respond_to_flow(
    ctx: &Context,
    bot: &BotContext,
    reply: FlowReply<'_>,
    outcome: Result<FlowOutcome, RosterError>,
) -> Result<()> {
    match outcome {
        Ok(FlowOutcome::Prompt { event, state }) => {
            if let (FlowState::AwaitingCustomAvailability { .. }, FlowReply::Component(_)) =
                (&state, &reply)
            {
                return reply.respond(ctx, custom_availability_modal(event.id)).await;
            }
            let (content, rows) = flow_prompt(&event, &state);
            reply
                .respond(
                    ctx,
                    CreateInteractionResponse::UpdateMessage(
                        CreateInteractionResponseMessage::new()
                            .content(content)
                            .components(rows),
                    ),
                )
                .await
        }
        Ok(FlowOutcome::Committed(registration)) => {
            reply.respond(ctx, replace_with(committed_text(&registration))).await
        }
        Err(err @ RosterError::Locked(_)) => {
            Metrics::registration_rejected();
            reply.respond(ctx, replace_with(user_message(&err))).await?;
            reply.expire(ctx, bot);
            Ok(())
        }
        Err(err @ RosterError::Validation(_)) => {
            Metrics::registration_rejected();
            reply.respond(ctx, ephemeral(user_message(&err))).await
        }
        Err(err) => reply.respond(ctx, replace_with(user_message(&err))).await,
    }
}

async fn setup_component(
    ctx: &Context,
    bot: &BotContext,
    component: &ComponentInteraction,
    op: SetupComponent,
) -> Result<()> {
    let admin_id = component.user.id.get();
    let draft = bot.sessions.draft(admin_id);

    let response = match op {
        SetupComponent::Date => {
            let value = select_values(component).into_iter().next().unwrap_or_default();
            if value == MANUAL_DATE {
                CreateInteractionResponse::Modal(
                    CreateModal::new(ModalKind::SetupDate.custom_id(), "War date").components(
                        vec![text_input(
                            "date",
                            "Date (Today, Tomorrow or DD/MM)",
                            InputTextStyle::Short,
                            Some(draft.date.as_str()),
                            true,
                        )],
                    ),
                )
            } else {
                match bot.sessions.set_schedule(admin_id, &value, &draft.time) {
                    Ok(draft) => {
                        CreateInteractionResponse::UpdateMessage(setup_panel(bot, &draft))
                    }
                    Err(err) => ephemeral(user_message(&err)),
                }
            }
        }
        SetupComponent::Edit => CreateInteractionResponse::Modal(
            CreateModal::new(ModalKind::SetupDetails.custom_id(), "War details").components(vec![
                text_input("title", "Title", InputTextStyle::Short, Some(draft.title.as_str()), true),
                text_input("time", "Start time (HH:MM)", InputTextStyle::Short, Some(draft.time.as_str()), true),
                text_input(
                    "deadline",
                    "Sign-up deadline (HH:MM, blank for start)",
                    InputTextStyle::Short,
                    draft.deadline.as_deref(),
                    false,
                ),
                text_input(
                    "color",
                    "Colour (#RRGGBB)",
                    InputTextStyle::Short,
                    Some(format!("#{:06x}", draft.color).as_str()),
                    false,
                ),
            ]),
        ),
        SetupComponent::AddTeam => CreateInteractionResponse::Modal(
            CreateModal::new(ModalKind::SetupTeam.custom_id(), "Add team").components(vec![
                text_input("team", "Team name", InputTextStyle::Short, None, true),
            ]),
        ),
        SetupComponent::RemoveTeam => match bot.sessions.remove_last_team(admin_id) {
            Ok(draft) => CreateInteractionResponse::UpdateMessage(setup_panel(bot, &draft)),
            Err(err) => ephemeral(user_message(&err)),
        },
        SetupComponent::Cancel => {
            bot.sessions.cancel(admin_id);
            replace_with("Setup cancelled.")
        }
        SetupComponent::Confirm => {
            component.defer(&ctx.http).await?;
            let content = post_war(ctx, bot, component).await;
            component
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new()
                        .content(content)
                        .embeds(Vec::new())
                        .components(Vec::new()),
                )
                .await?;
            return Ok(());
        }
    };

    component.create_response(&ctx.http, response).await?;
    Ok(())
}

/// Posts a placeholder, stores the event against it, then renders into it.
async fn post_war(ctx: &Context, bot: &BotContext, component: &ComponentInteraction) -> String {
    let channel = component.channel_id;
    let placeholder = match channel
        .send_message(&ctx.http, CreateMessage::new().content("⏳ Preparing roster…"))
        .await
    {
        Ok(message) => message,
        Err(err) => {
            warn!("failed to post roster message: {err}");
            return "❌ I could not post in this channel. Check my permissions.".to_string();
        }
    };

    let location = DeliveryLocation {
        channel_id: channel.get(),
        message_id: placeholder.id.get(),
    };
    let who = actor(&component.user, component.member.as_ref());
    let event = match bot.sessions.commit(who.user_id, location).await {
        Ok(event) => event,
        Err(err) => {
            if let Err(e) = placeholder.delete(&ctx.http).await {
                debug!("failed to remove placeholder: {e}");
            }
            return user_message(&err);
        }
    };

    if let Err(err) = bot.roster.refresh(event.id).await {
        warn!(event_id = %event.id, "initial dashboard render failed: {err}");
    }

    let thread = CreateThread::new(format!("💬 {}", event.title));
    if let Err(err) = channel
        .create_thread_from_message(&ctx.http, placeholder.id, thread)
        .await
    {
        debug!(event_id = %event.id, "thread not created: {err}");
    }

    bot.roster
        .record_audit(AuditEntry::new(&who, AuditAction::Created, event.title.clone()))
        .await;
    info!(event_id = %event.id, channel_id = channel.get(), "war posted");
    format!("✅ **{}** is live.", event.title)
}

pub async fn handle_modal(ctx: &Context, bot: &BotContext, modal: &ModalInteraction) -> Result<()> {
    let Some(kind) = ModalKind::parse(&modal.data.custom_id) else {
        debug!(custom_id = %modal.data.custom_id, "ignoring foreign modal");
        return Ok(());
    };
    let values = modal_values(&modal.data);
    let user_id = modal.user.id.get();
    let name = display_name(&modal.user, modal.member.as_ref());

    let response = match kind {
        ModalKind::Absence(event_id) => {
            match bot.flows.absence(event_id, user_id, &name, field(&values, "reason")).await {
                Ok(registration) => ephemeral(committed_text(&registration)),
                Err(err) => {
                    if matches!(err, RosterError::Locked(_) | RosterError::Validation(_)) {
                        Metrics::registration_rejected();
                    }
                    modal
                        .create_response(&ctx.http, ephemeral(user_message(&err)))
                        .await?;
                    if matches!(err, RosterError::Locked(_)) {
                        FlowReply::Modal(modal).expire(ctx, bot);
                    }
                    return Ok(());
                }
            }
        }
        ModalKind::CustomAvailability(event_id) => {
            let input = FlowInput::CustomAvailability(field(&values, "availability").to_string());
            let outcome = bot.flows.handle(event_id, user_id, &name, input).await;
            return respond_to_flow(ctx, bot, FlowReply::Modal(modal), outcome).await;
        }
        ModalKind::SetupDetails => {
            let result = details_color(field(&values, "color")).and_then(|color| {
                bot.sessions.set_details(
                    user_id,
                    field(&values, "title"),
                    field(&values, "time"),
                    Some(field(&values, "deadline")),
                    color,
                )
            });
            match result {
                Ok(draft) => CreateInteractionResponse::UpdateMessage(setup_panel(bot, &draft)),
                Err(err) => ephemeral(user_message(&err)),
            }
        }
        ModalKind::SetupDate => {
            let time = bot.sessions.draft(user_id).time;
            match bot.sessions.set_schedule(user_id, field(&values, "date"), &time) {
                Ok(draft) => CreateInteractionResponse::UpdateMessage(setup_panel(bot, &draft)),
                Err(err) => ephemeral(user_message(&err)),
            }
        }
        ModalKind::SetupTeam => match bot.sessions.add_team(user_id, field(&values, "team")) {
            Ok(draft) => CreateInteractionResponse::UpdateMessage(setup_panel(bot, &draft)),
            Err(err) => ephemeral(user_message(&err)),
        },
    };

    modal.create_response(&ctx.http, response).await?;
    Ok(())
}

fn details_color(raw: &str) -> Result<Option<u32>, RosterError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_color(raw).map(Some).ok_or_else(|| {
        RosterError::Validation(format!("`{}` is not a #RRGGBB colour.", raw.trim()))
    })
}
