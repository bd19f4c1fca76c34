//! Custom-id codec and action-row builders for dashboard, sign-up and setup
//! components. Ids look like `gw:<action>:<event id>`, or `gw:setup:<op>` for
//! the per-organizer setup panel.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serenity::all::{
    ButtonStyle, CreateActionRow, CreateButton, CreateInputText, CreateSelectMenu,
    CreateSelectMenuKind, CreateSelectMenuOption, InputTextStyle,
};
use uuid::Uuid;

use crate::db::{AvailabilityTag, Event, Role, Weapon};
use crate::registration::FlowState;
use crate::roster::dates::upcoming_dates;
use crate::session::EventDraft;

const PREFIX: &str = "gw";

/// Select value that opens the free-text availability modal.
pub const OTHER_AVAILABILITY: &str = "other";
/// Select value that opens the manual date modal.
pub const MANUAL_DATE: &str = "manual";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardButton {
    Join,
    Absence,
    Leave,
    Refresh,
    Copy,
    ToggleLock,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowComponent {
    Role,
    Team,
    Availability,
    Weapons,
    SkipWeapons,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupComponent {
    Date,
    Edit,
    AddTeam,
    RemoveTeam,
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentAction {
    Dashboard(DashboardButton, Uuid),
    Flow(FlowComponent, Uuid),
    Setup(SetupComponent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModalKind {
    Absence(Uuid),
    CustomAvailability(Uuid),
    SetupDetails,
    SetupDate,
    SetupTeam,
}

const DASHBOARD_TOKENS: [(DashboardButton, &str); 7] = [
    (DashboardButton::Join, "join"),
    (DashboardButton::Absence, "absence"),
    (DashboardButton::Leave, "leave"),
    (DashboardButton::Refresh, "refresh"),
    (DashboardButton::Copy, "copy"),
    (DashboardButton::ToggleLock, "lock"),
    (DashboardButton::Close, "close"),
];

const FLOW_TOKENS: [(FlowComponent, &str); 6] = [
    (FlowComponent::Role, "role"),
    (FlowComponent::Team, "team"),
    (FlowComponent::Availability, "avail"),
    (FlowComponent::Weapons, "weapon"),
    (FlowComponent::SkipWeapons, "wskip"),
    (FlowComponent::Cancel, "fcancel"),
];

const SETUP_TOKENS: [(SetupComponent, &str); 6] = [
    (SetupComponent::Date, "date"),
    (SetupComponent::Edit, "edit"),
    (SetupComponent::AddTeam, "addteam"),
    (SetupComponent::RemoveTeam, "rmteam"),
    (SetupComponent::Confirm, "confirm"),
    (SetupComponent::Cancel, "cancel"),
];

fn token_of<T: PartialEq + Copy>(table: &[(T, &'static str)], value: T) -> &'static str {
    table
        .iter()
        .find(|(v, _)| *v == value)
        .map(|(_, t)| *t)
        .unwrap_or_default()
}

fn value_of<T: Copy>(table: &[(T, &'static str)], token: &str) -> Option<T> {
    table.iter().find(|(_, t)| *t == token).map(|(v, _)| *v)
}

impl ComponentAction {
    pub fn custom_id(&self) -> String {
        match self {
            ComponentAction::Dashboard(button, id) => {
                format!("{PREFIX}:{}:{id}", token_of(&DASHBOARD_TOKENS, *button))
            }
            ComponentAction::Flow(component, id) => {
                format!("{PREFIX}:{}:{id}", token_of(&FLOW_TOKENS, *component))
            }
            ComponentAction::Setup(op) => {
                format!("{PREFIX}:setup:{}", token_of(&SETUP_TOKENS, *op))
            }
        }
    }

    pub fn parse(custom_id: &str) -> Option<Self> {
        let rest = custom_id.strip_prefix(PREFIX)?.strip_prefix(':')?;
        let (action, arg) = rest.split_once(':')?;
        if action == "setup" {
            return value_of(&SETUP_TOKENS, arg).map(ComponentAction::Setup);
        }

        let id: Uuid = arg.parse().ok()?;
        if let Some(button) = value_of(&DASHBOARD_TOKENS, action) {
            return Some(ComponentAction::Dashboard(button, id));
        }
        value_of(&FLOW_TOKENS, action).map(|c| ComponentAction::Flow(c, id))
    }
}

impl ModalKind {
    pub fn custom_id(&self) -> String {
        match self {
            ModalKind::Absence(id) => format!("{PREFIX}:m:absence:{id}"),
            ModalKind::CustomAvailability(id) => format!("{PREFIX}:m:custom:{id}"),
            ModalKind::SetupDetails => format!("{PREFIX}:m:setup"),
            ModalKind::SetupDate => format!("{PREFIX}:m:setupdate"),
            ModalKind::SetupTeam => format!("{PREFIX}:m:addteam"),
        }
    }

    pub fn parse(custom_id: &str) -> Option<Self> {
        let rest = custom_id.strip_prefix(PREFIX)?.strip_prefix(":m:")?;
        match rest.split_once(':') {
            Some(("absence", id)) => id.parse().ok().map(ModalKind::Absence),
            Some(("custom", id)) => id.parse().ok().map(ModalKind::CustomAvailability),
            Some(_) => None,
            None => match rest {
                "setup" => Some(ModalKind::SetupDetails),
                "setupdate" => Some(ModalKind::SetupDate),
                "addteam" => Some(ModalKind::SetupTeam),
                _ => None,
            },
        }
    }
}

fn button(action: ComponentAction, label: &str, style: ButtonStyle) -> CreateButton {
    CreateButton::new(action.custom_id()).label(label).style(style)
}

fn select(
    custom_id: String,
    placeholder: &str,
    options: Vec<CreateSelectMenuOption>,
    max_values: u8,
) -> CreateActionRow {
    let menu = CreateSelectMenu::new(custom_id, CreateSelectMenuKind::String { options })
        .placeholder(placeholder)
        .min_values(1)
        .max_values(max_values);
    CreateActionRow::SelectMenu(menu)
}

pub fn role_emoji(role: &Role) -> &'static str {
    match role {
        Role::Dps => "⚔️",
        Role::Tank => "🛡️",
        Role::Heal => "🌿",
        Role::Other(_) => "❔",
    }
}

/// Buttons under the public dashboard. Member buttons stay enabled while
/// locked so presses get the locked notice; a closed war only offers reads.
pub fn dashboard_rows(event_id: Uuid, locked: bool, closed: bool) -> Vec<CreateActionRow> {
    let dash = |b| ComponentAction::Dashboard(b, event_id);
    let read_row = CreateActionRow::Buttons(vec![
        button(dash(DashboardButton::Refresh), "🔄 Refresh", ButtonStyle::Secondary),
        button(dash(DashboardButton::Copy), "📋 Copy list", ButtonStyle::Secondary),
    ]);
    if closed {
        return vec![read_row];
    }

    let member_row = CreateActionRow::Buttons(vec![
        button(dash(DashboardButton::Join), "⚔️ Join", ButtonStyle::Primary),
        button(dash(DashboardButton::Absence), "🏳️ Absence", ButtonStyle::Secondary),
        button(dash(DashboardButton::Leave), "🗑️ Leave", ButtonStyle::Danger),
    ]);
    let (lock_label, lock_style) = if locked {
        ("🔓 Unlock", ButtonStyle::Success)
    } else {
        ("🔒 Lock", ButtonStyle::Danger)
    };
    let admin_row = CreateActionRow::Buttons(vec![
        button(dash(DashboardButton::ToggleLock), lock_label, lock_style),
        button(dash(DashboardButton::Close), "💾 Close war", ButtonStyle::Success),
    ]);
    vec![member_row, read_row, admin_row]
}

fn cancel_row(event_id: Uuid) -> CreateActionRow {
    CreateActionRow::Buttons(vec![button(
        ComponentAction::Flow(FlowComponent::Cancel, event_id),
        "Cancel",
        ButtonStyle::Secondary,
    )])
}

/// Prompt text and components for a sign-up step.
pub fn flow_prompt(event: &Event, state: &FlowState) -> (String, Vec<CreateActionRow>) {
    let flow = |c| ComponentAction::Flow(c, event.id).custom_id();
    match state {
        FlowState::RoleSelect => {
            let options = Role::SELECTABLE
                .iter()
                .map(|r| {
                    CreateSelectMenuOption::new(format!("{} {}", role_emoji(r), r), r.as_str())
                })
                .collect();
            (
                format!("**{}**\nStep 1: pick your role.", event.title),
                vec![
                    select(flow(FlowComponent::Role), "Role", options, 1),
                    cancel_row(event.id),
                ],
            )
        }
        FlowState::TeamSelect { role } => {
            let options = event
                .teams
                .iter()
                .map(|t| CreateSelectMenuOption::new(t, t))
                .collect();
            (
                format!("{} **{role}**\nStep 2: pick your team.", role_emoji(role)),
                vec![
                    select(flow(FlowComponent::Team), "Team", options, 1),
                    cancel_row(event.id),
                ],
            )
        }
        FlowState::AvailabilitySelect { role, team } => {
            let mut options: Vec<_> = AvailabilityTag::all()
                .iter()
                .map(|tag| CreateSelectMenuOption::new(tag.label(), tag.token()))
                .collect();
            options.push(
                CreateSelectMenuOption::new("Other…", OTHER_AVAILABILITY)
                    .description("Describe your availability in your own words"),
            );
            let max = u8::try_from(options.len()).unwrap_or(u8::MAX);
            (
                format!(
                    "{} **{role}** in **{team}**\nStep 3: when can you play?",
                    role_emoji(role)
                ),
                vec![
                    select(flow(FlowComponent::Availability), "Availability", options, max),
                    cancel_row(event.id),
                ],
            )
        }
        FlowState::AwaitingCustomAvailability { role, team } => (
            format!(
                "{} **{role}** in **{team}**\nWaiting for your availability note.",
                role_emoji(role)
            ),
            vec![cancel_row(event.id)],
        ),
        FlowState::WeaponSelect {
            role,
            team,
            availability,
        } => {
            let options = Weapon::CATALOG
                .iter()
                .map(|w| CreateSelectMenuOption::new(w.label(), w.token()))
                .collect();
            (
                format!(
                    "{} **{role}** in **{team}** · 🕒 {}\nStep 4: pick up to {} weapons.",
                    role_emoji(role),
                    availability.label(),
                    Weapon::MAX_LOADOUT
                ),
                vec![
                    select(
                        flow(FlowComponent::Weapons),
                        "Weapons",
                        options,
                        Weapon::MAX_LOADOUT as u8,
                    ),
                    CreateActionRow::Buttons(vec![
                        button(
                            ComponentAction::Flow(FlowComponent::SkipWeapons, event.id),
                            "Skip",
                            ButtonStyle::Secondary,
                        ),
                        button(
                            ComponentAction::Flow(FlowComponent::Cancel, event.id),
                            "Cancel",
                            ButtonStyle::Secondary,
                        ),
                    ]),
                ],
            )
        }
    }
}

/// `(label, description, selected)` for each date the picker offers. The
/// label doubles as the stored date expression.
pub fn date_choices(
    current: &str,
    now: DateTime<Utc>,
    tz: Tz,
) -> Vec<(String, String, bool)> {
    upcoming_dates(now, tz)
        .into_iter()
        .map(|(label, date)| {
            let selected = current.eq_ignore_ascii_case(&label);
            (label, date.format("%A, %d %B").to_string(), selected)
        })
        .collect()
}

/// Setup panel: date picker plus edit and confirm buttons.
pub fn setup_rows(draft: &EventDraft, now: DateTime<Utc>, tz: Tz) -> Vec<CreateActionRow> {
    let setup = ComponentAction::Setup;
    let mut options: Vec<_> = date_choices(&draft.date, now, tz)
        .into_iter()
        .map(|(label, description, selected)| {
            CreateSelectMenuOption::new(label.clone(), label)
                .description(description)
                .default_selection(selected)
        })
        .collect();
    options.push(
        CreateSelectMenuOption::new("Type a date…", MANUAL_DATE)
            .description("Any DD/MM date"),
    );

    vec![
        select(setup(SetupComponent::Date).custom_id(), "War date", options, 1),
        CreateActionRow::Buttons(vec![
            button(setup(SetupComponent::Edit), "✏️ Edit details", ButtonStyle::Primary),
            button(setup(SetupComponent::AddTeam), "➕ Add team", ButtonStyle::Secondary),
            button(setup(SetupComponent::RemoveTeam), "➖ Remove team", ButtonStyle::Secondary)
                .disabled(draft.teams.len() <= 1),
        ]),
        CreateActionRow::Buttons(vec![
            button(setup(SetupComponent::Confirm), "✅ Post war", ButtonStyle::Success),
            button(setup(SetupComponent::Cancel), "✖️ Cancel", ButtonStyle::Danger),
        ]),
    ]
}

pub fn text_input(
    id: &str,
    label: &str,
    style: InputTextStyle,
    value: Option<&str>,
    required: bool,
) -> CreateActionRow {
    let mut input = CreateInputText::new(style, label, id).required(required);
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        input = input.value(value);
    }
    CreateActionRow::InputText(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Bangkok;
    use test_case::test_case;

    fn id() -> Uuid {
        Uuid::parse_str("6f1c2a70-58a4-4b77-9f54-0d8fe2c1b0aa").unwrap()
    }

    #[test_case(ComponentAction::Dashboard(DashboardButton::Join, id()), "gw:join:6f1c2a70-58a4-4b77-9f54-0d8fe2c1b0aa"; "join button")]
    #[test_case(ComponentAction::Dashboard(DashboardButton::ToggleLock, id()), "gw:lock:6f1c2a70-58a4-4b77-9f54-0d8fe2c1b0aa"; "lock toggle")]
    #[test_case(ComponentAction::Flow(FlowComponent::Availability, id()), "gw:avail:6f1c2a70-58a4-4b77-9f54-0d8fe2c1b0aa"; "availability select")]
    #[test_case(ComponentAction::Setup(SetupComponent::RemoveTeam), "gw:setup:rmteam"; "setup remove team")]
    fn component_ids(action: ComponentAction, expected: &str) {
        assert_eq!(action.custom_id(), expected);
        assert_eq!(ComponentAction::parse(expected), Some(action));
    }

    #[test_case("gw:join:not-a-uuid"; "bad uuid")]
    #[test_case("gw:explode:6f1c2a70-58a4-4b77-9f54-0d8fe2c1b0aa"; "unknown action")]
    #[test_case("gw:setup:launch"; "unknown setup op")]
    #[test_case("r:j:m:6f1c2a70-58a4-4b77-9f54-0d8fe2c1b0aa"; "foreign prefix")]
    #[test_case("gw:m:absence:6f1c2a70-58a4-4b77-9f54-0d8fe2c1b0aa"; "modal id")]
    fn rejects_unknown_component_ids(raw: &str) {
        assert_eq!(ComponentAction::parse(raw), None);
    }

    #[test]
    fn modal_ids_parse_back() {
        for kind in [
            ModalKind::Absence(id()),
            ModalKind::CustomAvailability(id()),
            ModalKind::SetupDetails,
            ModalKind::SetupDate,
            ModalKind::SetupTeam,
        ] {
            assert_eq!(ModalKind::parse(&kind.custom_id()), Some(kind));
        }
        assert_eq!(ModalKind::parse("gw:m:custom:nope"), None);
        assert_eq!(ModalKind::parse("gw:setup:edit"), None);
    }

    #[test]
    fn custom_ids_fit_discord_limit() {
        let longest = ComponentAction::Flow(FlowComponent::Cancel, id()).custom_id();
        assert!(longest.len() <= 100);
    }

    #[test]
    fn closed_dashboard_only_offers_read_actions() {
        assert_eq!(dashboard_rows(id(), true, true).len(), 1);
        assert_eq!(dashboard_rows(id(), false, false).len(), 3);
    }

    #[test]
    fn date_picker_marks_current_choice() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 3, 0, 0).unwrap();
        let choices = date_choices("tomorrow", now, Bangkok);
        assert_eq!(choices.len(), 14);
        assert_eq!(choices[0].0, "Today");
        assert_eq!(choices[1], ("Tomorrow".to_string(), "Saturday, 15 March".to_string(), true));
        assert_eq!(choices[2].0, "16/03");
        assert_eq!(choices.iter().filter(|c| c.2).count(), 1);
    }
}
