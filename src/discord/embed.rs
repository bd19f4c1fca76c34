//! Converts rendered views into Discord embeds and message text.

use serenity::all::{Colour, CreateEmbed, CreateEmbedFooter};

use crate::db::{Event, LeaderboardEntry, Registration};
use crate::discord::components::role_emoji;
use crate::roster::dashboard::{DashboardView, RosterLine, ScheduleLine, TeamSection};
use crate::session::EventDraft;

/// Discord rejects embed field values longer than this.
pub const FIELD_LIMIT: usize = 1024;
/// Discord rejects embeds whose title, description, fields and footer add up
/// to more than this.
pub const EMBED_LIMIT: usize = 6000;
const DIVIDER: &str = "▬▬▬▬▬▬▬▬▬▬▬▬";
const BLANK: &str = "\u{200b}";

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Joins lines until the field limit, then summarises the remainder.
pub fn fit_lines(lines: &[String], limit: usize) -> String {
    let whole = lines.join("\n");
    if char_len(&whole) <= limit {
        return whole;
    }

    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        let extra = usize::from(!out.is_empty()) + line.chars().count();
        let remaining = lines.len() - i;
        let tail = format!("\n… and {remaining} more");
        // room for the summary only matters while more lines follow
        let reserve = if remaining > 1 { tail.chars().count() + 12 } else { 0 };
        if out.chars().count() + extra + reserve > limit {
            if out.is_empty() {
                return line.chars().take(limit.saturating_sub(1)).collect::<String>() + "…";
            }
            out.push_str(&tail);
            return out;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

fn main_line(line: &RosterLine) -> String {
    let mut text = format!(
        "> `{}.` {} **{}** 🕒 `{}`",
        line.number.unwrap_or_default(),
        role_emoji(&line.role),
        line.display_name,
        line.availability
    );
    if !line.weapons.is_empty() {
        text.push_str(&format!(" 🗡️ {}", line.weapons.join("/")));
    }
    text
}

fn side_list(icon: &str, label: &str, lines: &[RosterLine]) -> Option<String> {
    if lines.is_empty() {
        return None;
    }
    let names: Vec<String> = lines
        .iter()
        .map(|l| format!("{} ({})", l.display_name, l.availability))
        .collect();
    Some(format!("{icon} **{label}:** {}", names.join(", ")))
}

enum FieldValue {
    Text(String),
    /// Cut to whatever share of the embed budget the field is given.
    Lines(Vec<String>),
}

fn team_fields(team: &TeamSection) -> [(String, FieldValue); 2] {
    let header = format!(
        "🔥 **Total: {}** (⚔️ `{}` 🛡️ `{}` 🌿 `{}`)\n{}",
        team.counts.total,
        team.counts.dps,
        team.counts.tank,
        team.counts.heal,
        team.bar.render()
    );

    let mut lines: Vec<String> = team.main.iter().map(main_line).collect();
    if lines.is_empty() {
        lines.push("*... empty ...*".to_string());
    }
    lines.extend(side_list("⏰", "Late join", &team.late));
    lines.extend(side_list("🪑", "Standby", &team.standby));

    [
        (
            format!("{DIVIDER}\n🛡️ {}", team.name.to_uppercase()),
            FieldValue::Text(header),
        ),
        (BLANK.to_string(), FieldValue::Lines(lines)),
    ]
}

/// Splits `budget` between lists needing `needs` characters each. Short lists
/// take what they need and the rest share what remains equally.
fn share_budget(needs: &[usize], budget: usize) -> Vec<usize> {
    let mut limits = vec![0; needs.len()];
    let mut order: Vec<usize> = (0..needs.len()).collect();
    order.sort_by_key(|&i| needs[i]);

    let mut left = budget;
    for (served, &i) in order.iter().enumerate() {
        let fair = left / (needs.len() - served);
        let take = needs[i].min(fair).min(FIELD_LIMIT);
        limits[i] = take;
        left -= take;
    }
    limits
}

fn schedule_text(view: &DashboardView) -> String {
    match &view.schedule {
        ScheduleLine::Resolved {
            unix,
            day_label,
            deadline,
            ..
        } => {
            let mut text = format!("📅 **{day_label}**\n⏰ <t:{unix}:t> · <t:{unix}:R>");
            if let Some(deadline) = deadline {
                text.push_str(&format!("\n⏳ Sign-ups close <t:{}:t>", deadline.timestamp()));
            }
            text
        }
        ScheduleLine::Raw { date, time } => format!("📅 **{date}** ⏰ **{time}**"),
    }
}

/// `(name, value)` pairs in display order, holding at most `budget`
/// characters between them. Kept separate from the builder so the layout can
/// be checked without a Discord round trip.
pub fn dashboard_fields(view: &DashboardView, budget: usize) -> Vec<(String, String)> {
    let mut fields: Vec<(String, FieldValue)> = view.teams.iter().flat_map(team_fields).collect();

    let absences: Vec<String> = view
        .absences
        .iter()
        .map(|a| format!("❌ `{}` : {}", a.display_name, a.reason))
        .collect();
    fields.push((
        format!("{DIVIDER}\n🏳️ ABSENCE ({})", absences.len()),
        if absences.is_empty() {
            FieldValue::Text("*... none ...*".to_string())
        } else {
            FieldValue::Lines(absences)
        },
    ));

    let fixed: usize = fields
        .iter()
        .map(|(name, value)| {
            char_len(name)
                + match value {
                    FieldValue::Text(text) => char_len(text),
                    FieldValue::Lines(_) => 0,
                }
        })
        .sum();
    let needs: Vec<usize> = fields
        .iter()
        .filter_map(|(_, value)| match value {
            FieldValue::Lines(lines) => Some(char_len(&lines.join("\n"))),
            FieldValue::Text(_) => None,
        })
        .collect();
    let mut limits = share_budget(&needs, budget.saturating_sub(fixed)).into_iter();

    fields
        .into_iter()
        .map(|(name, value)| match value {
            FieldValue::Text(text) => (name, text),
            FieldValue::Lines(lines) => {
                let limit = limits.next().unwrap_or(FIELD_LIMIT);
                (name, fit_lines(&lines, limit))
            }
        })
        .collect()
}

fn dashboard_title(view: &DashboardView) -> String {
    format!("⚔️ {}", view.title)
}

fn dashboard_description(view: &DashboardView) -> String {
    format!(
        "```ansi\n\u{1b}[1;33m⏰ START {}\u{1b}[0m\n```{}",
        view.match_time,
        schedule_text(view)
    )
}

fn dashboard_footer(view: &DashboardView) -> String {
    format!(
        "{} · {} joined · Last updated {}",
        view.status.label,
        view.participant_count(),
        view.rendered_label
    )
}

/// Characters left for fields once the title, description and footer are in.
pub fn field_budget(view: &DashboardView) -> usize {
    let chrome = char_len(&dashboard_title(view))
        + char_len(&dashboard_description(view))
        + char_len(&dashboard_footer(view));
    EMBED_LIMIT.saturating_sub(chrome)
}

pub fn dashboard_embed(view: &DashboardView) -> CreateEmbed {
    CreateEmbed::new()
        .title(dashboard_title(view))
        .description(dashboard_description(view))
        .colour(Colour::new(view.status.color))
        .fields(
            dashboard_fields(view, field_budget(view))
                .into_iter()
                .map(|(name, value)| (name, value, false)),
        )
        .footer(CreateEmbedFooter::new(dashboard_footer(view)))
}

pub fn setup_embed(draft: &EventDraft) -> CreateEmbed {
    CreateEmbed::new()
        .title("⚙️ War setup")
        .description("Adjust the details, then post the roster to this channel.")
        .colour(Colour::new(draft.color))
        .field("Title", &draft.title, false)
        .field("Date", &draft.date, true)
        .field("Start", &draft.time, true)
        .field(
            "Deadline",
            draft.deadline.as_deref().unwrap_or("at start"),
            true,
        )
        .field("Teams", draft.teams.join("\n"), false)
        .field("Colour", format!("#{:06x}", draft.color), true)
}

const MEDALS: [&str; 3] = ["🥇", "🥈", "🥉"];

pub fn leaderboard_text(entries: &[LeaderboardEntry]) -> String {
    if entries.is_empty() {
        return "No attendance recorded yet.".to_string();
    }
    let lines: Vec<String> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let rank = MEDALS
                .get(i)
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("`#{}`", i + 1));
            format!("{rank} **{}** · {} wars", e.username, e.joined_count)
        })
        .collect();
    format!("🏆 **Attendance leaderboard**\n{}", lines.join("\n"))
}

pub fn leaderboard_embed(entries: &[LeaderboardEntry]) -> CreateEmbed {
    CreateEmbed::new()
        .description(leaderboard_text(entries))
        .colour(Colour::GOLD)
}

pub fn reminder_text(event: &Event, start_unix: Option<i64>, members: &[Registration]) -> String {
    let when = match start_unix {
        Some(unix) => format!("<t:{unix}:R>"),
        None => format!("at {}", event.match_time),
    };
    let mentions: Vec<String> = members.iter().map(|r| format!("<@{}>", r.user_id)).collect();
    let mut text = format!("⏰ **{}** starts {when}!", event.title);
    if !mentions.is_empty() {
        text.push('\n');
        text.push_str(&mentions.join(" "));
    }
    text
}

/// Mentions for `/check_missing`, cut to fit one message.
pub fn missing_text(role_name: &str, missing: &[u64]) -> String {
    if missing.is_empty() {
        return format!("✅ Everyone with **{role_name}** has responded.");
    }
    let mentions: Vec<String> = missing.iter().map(|id| format!("<@{id}>")).collect();
    format!(
        "📣 **{}** member(s) of **{role_name}** have not signed up:\n{}",
        missing.len(),
        fit_lines(&mentions, 1800).replace('\n', " ")
    )
}
