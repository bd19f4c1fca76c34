use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{Event, Registration, Role, RosterBucket, Slot};
use crate::roster::dates::resolve_instant;

pub const BAR_WIDTH: usize = 10;
pub const LOCKED_COLOR: u32 = 0xff2e4c;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BarUnit {
    Dps,
    Tank,
    Heal,
    Empty,
}

impl BarUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            BarUnit::Dps => "🟥",
            BarUnit::Tank => "🟦",
            BarUnit::Heal => "🟩",
            BarUnit::Empty => "⚫",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoleCounts {
    pub dps: usize,
    pub tank: usize,
    pub heal: usize,
    pub other: usize,
    pub total: usize,
}

impl RoleCounts {
    fn add(&mut self, role: &Role) {
        match role {
            Role::Dps => self.dps += 1,
            Role::Tank => self.tank += 1,
            Role::Heal => self.heal += 1,
            Role::Other(_) => self.other += 1,
        }
        self.total += 1;
    }

    /// Members that take a slot in the capacity bar.
    pub fn headcount(&self) -> usize {
        self.dps + self.tank + self.heal
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityBar {
    pub units: Vec<BarUnit>,
}

impl CapacityBar {
    pub fn from_counts(counts: &RoleCounts) -> Self {
        let headcount = counts.headcount();

        let (dps, tank, heal) = if headcount == 0 {
            (0, 0, 0)
        } else if headcount <= BAR_WIDTH {
            (counts.dps, counts.tank, counts.heal)
        } else {
            let dps = counts.dps * BAR_WIDTH / headcount;
            let tank = counts.tank * BAR_WIDTH / headcount;
            let heal = if counts.heal > 0 {
                BAR_WIDTH - dps - tank
            } else {
                0
            };
            (dps, tank, heal)
        };

        let mut units = Vec::with_capacity(BAR_WIDTH);
        units.extend(std::iter::repeat_n(BarUnit::Dps, dps));
        units.extend(std::iter::repeat_n(BarUnit::Tank, tank));
        units.extend(std::iter::repeat_n(BarUnit::Heal, heal));
        units.resize(BAR_WIDTH, BarUnit::Empty);
        Self { units }
    }

    pub fn render(&self) -> String {
        self.units.iter().map(BarUnit::symbol).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterLine {
    /// 1-based position; only main-list entries are numbered.
    pub number: Option<usize>,
    pub user_id: u64,
    pub display_name: String,
    pub role: Role,
    pub availability: String,
    pub weapons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamSection {
    pub name: String,
    pub counts: RoleCounts,
    pub bar: CapacityBar,
    pub main: Vec<RosterLine>,
    pub late: Vec<RosterLine>,
    pub standby: Vec<RosterLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbsenceLine {
    pub user_id: u64,
    pub display_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleLine {
    Resolved {
        start: DateTime<Utc>,
        unix: i64,
        /// e.g. `Friday, 25/12`
        day_label: String,
        deadline: Option<DateTime<Utc>>,
    },
    /// The stored strings, shown as typed when they cannot be resolved.
    Raw { date: String, time: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusBanner {
    pub locked: bool,
    pub closed: bool,
    pub label: &'static str,
    pub color: u32,
}

impl StatusBanner {
    fn for_event(event: &Event) -> Self {
        let label = if event.is_closed() {
            "🏁 WAR CLOSED"
        } else if event.is_locked() {
            "🔒 SYSTEM LOCKED"
        } else {
            "🟢 OPEN REGISTRATION"
        };
        Self {
            locked: event.is_locked(),
            closed: event.is_closed(),
            label,
            color: if event.is_locked() {
                LOCKED_COLOR
            } else {
                event.color
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardView {
    pub event_id: Uuid,
    pub title: String,
    pub match_time: String,
    pub status: StatusBanner,
    pub schedule: ScheduleLine,
    pub teams: Vec<TeamSection>,
    pub absences: Vec<AbsenceLine>,
    pub rendered_at: DateTime<Utc>,
    /// `rendered_at` as wall-clock time in the guild's timezone.
    pub rendered_label: String,
}

impl DashboardView {
    pub fn participant_count(&self) -> usize {
        self.teams
            .iter()
            .map(|t| t.main.len() + t.late.len() + t.standby.len())
            .sum()
    }
}

struct TeamBuckets<'a> {
    main: Vec<&'a Registration>,
    late: Vec<&'a Registration>,
    standby: Vec<&'a Registration>,
}

fn line(registration: &Registration, number: Option<usize>) -> Option<RosterLine> {
    let Slot::Team {
        role,
        availability,
        weapons,
        ..
    } = &registration.slot
    else {
        return None;
    };
    Some(RosterLine {
        number,
        user_id: registration.user_id,
        display_name: registration.display_name.clone(),
        role: role.clone(),
        availability: availability.label(),
        weapons: weapons.iter().map(|w| w.label().to_string()).collect(),
    })
}

fn role_of(registration: &Registration) -> Option<&Role> {
    match &registration.slot {
        Slot::Team { role, .. } => Some(role),
        Slot::Absence { .. } => None,
    }
}

pub fn resolve_schedule(event: &Event, now: DateTime<Utc>, tz: Tz) -> ScheduleLine {
    match resolve_instant(&event.date_expr, &event.match_time, now, tz) {
        Some(start) => ScheduleLine::Resolved {
            start: start.with_timezone(&Utc),
            unix: start.timestamp(),
            day_label: start.format("%A, %d/%m").to_string(),
            deadline: event
                .deadline_time
                .as_deref()
                .and_then(|d| resolve_instant(&event.date_expr, d, now, tz))
                .map(|d| d.with_timezone(&Utc)),
        },
        None => ScheduleLine::Raw {
            date: event.date_expr.clone(),
            time: event.match_time.clone(),
        },
    }
}

/// Builds the dashboard for one event. Pure: the same inputs give the same view.
pub fn render_dashboard(
    event: &Event,
    registrations: &[Registration],
    now: DateTime<Utc>,
    tz: Tz,
) -> DashboardView {
    let mut ordered: Vec<&Registration> = registrations.iter().collect();
    ordered.sort_by(|a, b| {
        a.joined_at
            .cmp(&b.joined_at)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    let mut buckets: HashMap<&str, TeamBuckets<'_>> = event
        .teams
        .iter()
        .map(|name| {
            (
                name.as_str(),
                TeamBuckets {
                    main: Vec::new(),
                    late: Vec::new(),
                    standby: Vec::new(),
                },
            )
        })
        .collect();
    let mut absences = Vec::new();

    for registration in ordered {
        match &registration.slot {
            Slot::Absence { reason } => absences.push(AbsenceLine {
                user_id: registration.user_id,
                display_name: registration.display_name.clone(),
                reason: reason.clone(),
            }),
            Slot::Team {
                team, availability, ..
            } => {
                // rows for a team that was renamed or removed are not shown
                let Some(bucket) = buckets.get_mut(team.as_str()) else {
                    continue;
                };
                match availability.classify() {
                    RosterBucket::Main => bucket.main.push(registration),
                    RosterBucket::Late => bucket.late.push(registration),
                    RosterBucket::Standby => bucket.standby.push(registration),
                }
            }
        }
    }

    let teams = event
        .teams
        .iter()
        .filter_map(|name| {
            let mut bucket = buckets.remove(name.as_str())?;

            bucket.main.sort_by(|a, b| {
                let (ra, rb) = (role_of(a), role_of(b));
                ra.map(Role::priority)
                    .cmp(&rb.map(Role::priority))
                    .then_with(|| a.display_name.cmp(&b.display_name))
                    .then_with(|| a.user_id.cmp(&b.user_id))
            });

            let mut counts = RoleCounts::default();
            for role in bucket.main.iter().filter_map(|r| role_of(r)) {
                counts.add(role);
            }

            Some(TeamSection {
                name: name.clone(),
                bar: CapacityBar::from_counts(&counts),
                counts,
                main: bucket
                    .main
                    .iter()
                    .enumerate()
                    .filter_map(|(i, r)| line(r, Some(i + 1)))
                    .collect(),
                late: bucket.late.iter().filter_map(|r| line(r, None)).collect(),
                standby: bucket.standby.iter().filter_map(|r| line(r, None)).collect(),
            })
        })
        .collect();

    DashboardView {
        event_id: event.id,
        title: event.title.clone(),
        match_time: event.match_time.clone(),
        status: StatusBanner::for_event(event),
        schedule: resolve_schedule(event, now, tz),
        teams,
        absences,
        rendered_at: now,
        rendered_label: now.with_timezone(&tz).format("%H:%M:%S").to_string(),
    }
}

/// Plain-text export used by the dashboard's copy button.
pub fn roster_text(event: &Event, registrations: &[Registration]) -> String {
    let mut text = format!(
        "⚔️ {}\n📅 {} ⏰ {}\n\n",
        event.title, event.date_expr, event.match_time
    );

    for team in &event.teams {
        text.push_str(&format!("🛡️ {team}\n"));
        let members: Vec<String> = registrations
            .iter()
            .filter_map(|r| match &r.slot {
                Slot::Team { team: t, role, .. } if t == team => {
                    Some(format!("- {} ({})", r.display_name, role))
                }
                _ => None,
            })
            .collect();
        if members.is_empty() {
            text.push_str("- empty -\n");
        } else {
            text.push_str(&members.join("\n"));
            text.push('\n');
        }
        text.push('\n');
    }

    text.push_str("🏳️ Absence\n");
    let absent: Vec<String> = registrations
        .iter()
        .filter_map(|r| match &r.slot {
            Slot::Absence { reason } => Some(format!("- {} ({})", r.display_name, reason)),
            Slot::Team { .. } => None,
        })
        .collect();
    if absent.is_empty() {
        text.push_str("- none -");
    } else {
        text.push_str(&absent.join("\n"));
    }
    text
}
