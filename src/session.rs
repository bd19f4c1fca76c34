use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tracing::info;

use crate::config::DefaultsConfig;
use crate::db::{ABSENCE_TEAM, DeliveryLocation, Event, EventStore, NewEvent};
use crate::roster::RosterError;
use crate::roster::dates::{normalize_clock, pin_date};

/// An event being composed by one organizer before it is posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub title: String,
    pub date: String,
    pub time: String,
    pub deadline: Option<String>,
    pub teams: Vec<String>,
    pub color: u32,
}

impl EventDraft {
    fn from_defaults(defaults: &DefaultsConfig) -> Self {
        Self {
            title: defaults.title.clone(),
            date: defaults.date.clone(),
            time: defaults.time.clone(),
            deadline: None,
            teams: defaults.teams.clone(),
            color: defaults.color,
        }
    }
}

/// One embed holds at most 25 fields; each team takes two.
pub const MAX_TEAMS: usize = 10;

fn invalid(message: impl Into<String>) -> RosterError {
    RosterError::Validation(message.into())
}

/// Parses `#00f7ff`, `0x00f7ff` or `00f7ff`.
pub fn parse_color(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let hex = raw
        .strip_prefix('#')
        .or_else(|| raw.strip_prefix("0x"))
        .unwrap_or(raw);
    if hex.len() != 6 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

/// Per-organizer drafts. Edits from two places at once are last-write-wins.
pub struct SessionManager {
    drafts: Mutex<HashMap<u64, EventDraft>>,
    defaults: DefaultsConfig,
    store: Arc<dyn EventStore>,
    timezone: Tz,
}

impl SessionManager {
    pub fn new(store: Arc<dyn EventStore>, defaults: DefaultsConfig, timezone: Tz) -> Self {
        Self {
            drafts: Mutex::new(HashMap::new()),
            defaults,
            store,
            timezone,
        }
    }

    pub fn draft(&self, admin_id: u64) -> EventDraft {
        self.drafts
            .lock()
            .entry(admin_id)
            .or_insert_with(|| EventDraft::from_defaults(&self.defaults))
            .clone()
    }

    fn edit<F>(&self, admin_id: u64, f: F) -> Result<EventDraft, RosterError>
    where
        F: FnOnce(&mut EventDraft) -> Result<(), RosterError>,
    {
        let mut drafts = self.drafts.lock();
        let draft = drafts
            .entry(admin_id)
            .or_insert_with(|| EventDraft::from_defaults(&self.defaults));
        // validate on a copy so a rejected edit leaves the draft unchanged
        let mut next = draft.clone();
        f(&mut next)?;
        *draft = next.clone();
        Ok(next)
    }

    pub fn set_title(&self, admin_id: u64, title: &str) -> Result<EventDraft, RosterError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(invalid("Title cannot be empty."));
        }
        self.edit(admin_id, |d| {
            d.title = title.to_string();
            Ok(())
        })
    }

    pub fn set_schedule(
        &self,
        admin_id: u64,
        date: &str,
        time: &str,
    ) -> Result<EventDraft, RosterError> {
        let date = date.trim();
        if date.is_empty() {
            return Err(invalid("Date cannot be empty."));
        }
        let time = normalize_clock(time)
            .ok_or_else(|| invalid(format!("`{}` is not a valid HH:MM time.", time.trim())))?;
        self.edit(admin_id, |d| {
            d.date = date.to_string();
            d.time = time;
            Ok(())
        })
    }

    /// An empty value clears the deadline.
    pub fn set_deadline(
        &self,
        admin_id: u64,
        deadline: Option<&str>,
    ) -> Result<EventDraft, RosterError> {
        let deadline = match deadline.map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => Some(
                normalize_clock(raw)
                    .ok_or_else(|| invalid(format!("`{raw}` is not a valid HH:MM time.")))?,
            ),
            None => None,
        };
        self.edit(admin_id, |d| {
            d.deadline = deadline;
            Ok(())
        })
    }

    pub fn add_team(&self, admin_id: u64, name: &str) -> Result<EventDraft, RosterError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid("Team name cannot be empty."));
        }
        if name.eq_ignore_ascii_case(ABSENCE_TEAM) {
            return Err(invalid(format!("`{ABSENCE_TEAM}` is reserved.")));
        }
        self.edit(admin_id, |d| {
            if d.teams.iter().any(|t| t.eq_ignore_ascii_case(name)) {
                return Err(invalid(format!("Team `{name}` already exists.")));
            }
            if d.teams.len() >= MAX_TEAMS {
                return Err(invalid(format!("A war can have at most {MAX_TEAMS} teams.")));
            }
            d.teams.push(name.to_string());
            Ok(())
        })
    }

    pub fn remove_last_team(&self, admin_id: u64) -> Result<EventDraft, RosterError> {
        self.edit(admin_id, |d| {
            if d.teams.len() <= 1 {
                return Err(invalid("A war needs at least one team."));
            }
            d.teams.pop();
            Ok(())
        })
    }

    pub fn set_color(&self, admin_id: u64, color: u32) -> Result<EventDraft, RosterError> {
        if color > 0xFF_FF_FF {
            return Err(invalid("Colour must be a 24-bit RGB value."));
        }
        self.edit(admin_id, |d| {
            d.color = color;
            Ok(())
        })
    }

    /// Applies the whole details form. Every field is checked before the
    /// first one is stored, so an invalid form leaves the draft untouched.
    pub fn set_details(
        &self,
        admin_id: u64,
        title: &str,
        time: &str,
        deadline: Option<&str>,
        color: Option<u32>,
    ) -> Result<EventDraft, RosterError> {
        if title.trim().is_empty() {
            return Err(invalid("Title cannot be empty."));
        }
        for clock in std::iter::once(time).chain(deadline.filter(|d| !d.trim().is_empty())) {
            if normalize_clock(clock).is_none() {
                return Err(invalid(format!("`{}` is not a valid HH:MM time.", clock.trim())));
            }
        }
        if color.is_some_and(|c| c > 0xFF_FF_FF) {
            return Err(invalid("Colour must be a 24-bit RGB value."));
        }

        let date = self.draft(admin_id).date;
        self.set_title(admin_id, title)?;
        self.set_schedule(admin_id, &date, time)?;
        let draft = self.set_deadline(admin_id, deadline)?;
        match color {
            Some(color) => self.set_color(admin_id, color),
            None => Ok(draft),
        }
    }

    /// Returns whether a draft existed.
    pub fn cancel(&self, admin_id: u64) -> bool {
        self.drafts.lock().remove(&admin_id).is_some()
    }

    /// Creates the event. The draft is only dropped when the write succeeds.
    pub async fn commit(
        &self,
        admin_id: u64,
        location: DeliveryLocation,
    ) -> Result<Event, RosterError> {
        self.commit_at(admin_id, location, Utc::now()).await
    }

    /// Relative dates in the draft are fixed to the calendar day at `now`.
    pub async fn commit_at(
        &self,
        admin_id: u64,
        location: DeliveryLocation,
        now: DateTime<Utc>,
    ) -> Result<Event, RosterError> {
        let draft = self.draft(admin_id);
        let new_event = NewEvent {
            title: draft.title,
            date_expr: pin_date(&draft.date, now, self.timezone),
            match_time: draft.time,
            deadline_time: draft.deadline,
            teams: draft.teams,
            color: draft.color,
            location,
        };

        let event = self.store.create_event(&new_event).await?;
        self.drafts.lock().remove(&admin_id);
        info!(event_id = %event.id, admin_id, title = %event.title, "war created");
        Ok(event)
    }
}
