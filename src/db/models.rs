use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Team name stored for members who reported they cannot attend.
pub const ABSENCE_TEAM: &str = "Absence";

/// Highest round number offered in the availability picker.
pub const MAX_ROUND: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLocation {
    pub channel_id: u64,
    pub message_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub date_expr: String,
    pub match_time: String,
    pub deadline_time: Option<String>,
    pub teams: Vec<String>,
    pub color: u32,
    pub location: DeliveryLocation,
    pub active: bool,
    pub reminded: bool,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn is_locked(&self) -> bool {
        !self.active
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    pub fn has_team(&self, team: &str) -> bool {
        self.teams.iter().any(|t| t == team)
    }
}

/// Everything needed to create an event; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub title: String,
    pub date_expr: String,
    pub match_time: String,
    pub deadline_time: Option<String>,
    pub teams: Vec<String>,
    pub color: u32,
    pub location: DeliveryLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Dps,
    Tank,
    Heal,
    /// Anything a legacy row or a hand-edited database holds.
    Other(String),
}

impl Role {
    pub const SELECTABLE: [Role; 3] = [Role::Dps, Role::Tank, Role::Heal];

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dps" | "main dps" => Role::Dps,
            "tank" => Role::Tank,
            "heal" | "healer" => Role::Heal,
            _ => Role::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Dps => "DPS",
            Role::Tank => "Tank",
            Role::Heal => "Heal",
            Role::Other(value) => value,
        }
    }

    /// Ordering key used for roster numbering: tanks first, healers last.
    pub fn priority(&self) -> u8 {
        match self {
            Role::Tank => 1,
            Role::Dps => 2,
            Role::Heal => 3,
            Role::Other(_) => 99,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::parse(&value)
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AvailabilityTag {
    FullTime,
    Round(u8),
    LateJoin,
    Standby,
}

impl AvailabilityTag {
    pub fn all() -> Vec<AvailabilityTag> {
        let mut tags = vec![AvailabilityTag::FullTime];
        tags.extend((1..=MAX_ROUND).map(AvailabilityTag::Round));
        tags.push(AvailabilityTag::LateJoin);
        tags.push(AvailabilityTag::Standby);
        tags
    }

    pub fn token(&self) -> String {
        match self {
            AvailabilityTag::FullTime => "full".to_string(),
            AvailabilityTag::Round(n) => format!("r{n}"),
            AvailabilityTag::LateJoin => "late".to_string(),
            AvailabilityTag::Standby => "standby".to_string(),
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "full" => Some(AvailabilityTag::FullTime),
            "late" => Some(AvailabilityTag::LateJoin),
            "standby" => Some(AvailabilityTag::Standby),
            other => {
                let n: u8 = other.strip_prefix('r')?.parse().ok()?;
                (1..=MAX_ROUND)
                    .contains(&n)
                    .then_some(AvailabilityTag::Round(n))
            }
        }
    }

    pub fn label(&self) -> String {
        match self {
            AvailabilityTag::FullTime => "Full Time".to_string(),
            AvailabilityTag::Round(n) => format!("Round {n}"),
            AvailabilityTag::LateJoin => "Late Join".to_string(),
            AvailabilityTag::Standby => "Standby".to_string(),
        }
    }
}

impl TryFrom<String> for AvailabilityTag {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AvailabilityTag::from_token(&value).ok_or_else(|| format!("unknown availability tag `{value}`"))
    }
}

impl From<AvailabilityTag> for String {
    fn from(value: AvailabilityTag) -> Self {
        value.token()
    }
}

/// Which roster list a registration lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterBucket {
    Main,
    Late,
    Standby,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    #[serde(default)]
    pub tags: BTreeSet<AvailabilityTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Availability {
    pub fn from_tags(tags: impl IntoIterator<Item = AvailabilityTag>) -> Self {
        Self {
            tags: tags.into_iter().collect(),
            note: None,
        }
    }

    /// Free-text answer; replaces any previously picked tags.
    pub fn custom(text: &str) -> Self {
        let text = text.trim();
        Self {
            tags: BTreeSet::new(),
            note: (!text.is_empty()).then(|| text.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.note.is_none()
    }

    /// Standby wins over late join, late join wins over main.
    pub fn classify(&self) -> RosterBucket {
        if self.tags.contains(&AvailabilityTag::Standby) {
            RosterBucket::Standby
        } else if self.tags.contains(&AvailabilityTag::LateJoin) {
            RosterBucket::Late
        } else {
            RosterBucket::Main
        }
    }

    pub fn label(&self) -> String {
        let mut parts: Vec<String> = self.tags.iter().map(AvailabilityTag::label).collect();
        if let Some(note) = &self.note {
            parts.push(note.clone());
        }
        if parts.is_empty() {
            "-".to_string()
        } else {
            parts.join(", ")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weapon {
    Sword,
    Spear,
    Twinblades,
    Blade,
    Fan,
    Umbrella,
    RopeDart,
    Bow,
}

impl Weapon {
    pub const CATALOG: [Weapon; 8] = [
        Weapon::Sword,
        Weapon::Spear,
        Weapon::Twinblades,
        Weapon::Blade,
        Weapon::Fan,
        Weapon::Umbrella,
        Weapon::RopeDart,
        Weapon::Bow,
    ];

    pub const MAX_LOADOUT: usize = 2;

    pub fn token(&self) -> &'static str {
        match self {
            Weapon::Sword => "sword",
            Weapon::Spear => "spear",
            Weapon::Twinblades => "twinblades",
            Weapon::Blade => "blade",
            Weapon::Fan => "fan",
            Weapon::Umbrella => "umbrella",
            Weapon::RopeDart => "rope_dart",
            Weapon::Bow => "bow",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::CATALOG.into_iter().find(|w| w.token() == token)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Weapon::Sword => "Sword",
            Weapon::Spear => "Spear",
            Weapon::Twinblades => "Twinblades",
            Weapon::Blade => "Blade",
            Weapon::Fan => "Fan",
            Weapon::Umbrella => "Umbrella",
            Weapon::RopeDart => "Rope Dart",
            Weapon::Bow => "Bow",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Slot {
    Team {
        team: String,
        role: Role,
        availability: Availability,
        #[serde(default)]
        weapons: Vec<Weapon>,
    },
    Absence {
        reason: String,
    },
}

impl Slot {
    pub fn is_absence(&self) -> bool {
        matches!(self, Slot::Absence { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub event_id: Uuid,
    pub user_id: u64,
    pub display_name: String,
    pub slot: Slot,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Joined,
    Absence,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Joined => "Joined",
            AttendanceStatus::Absence => "Absence",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: u64,
    pub username: String,
    pub joined_count: i64,
}
