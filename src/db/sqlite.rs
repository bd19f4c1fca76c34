use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_types::{BigInt, Text};
use diesel::sqlite::SqliteConnection;
use uuid::Uuid;

use crate::db::schema_sqlite::{attendance_history, events, registrations};

use super::{
    DatabaseError,
    models::{
        ABSENCE_TEAM, AttendanceStatus, Availability, DeliveryLocation, Event, LeaderboardEntry,
        NewEvent, Registration, Role, Slot, Weapon,
    },
};

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

// Fixed-width UTC timestamps so that TEXT ordering matches time ordering
fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("invalid datetime format: {}", e)))
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("invalid event id: {e}")))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = events)]
struct DbEvent {
    event_id: String,
    title: String,
    date_str: String,
    time_str: String,
    deadline_str: Option<String>,
    teams: String,
    color: i64,
    channel_id: i64,
    message_id: i64,
    active: bool,
    reminded: bool,
    created_at: String,
    closed_at: Option<String>,
}

impl DbEvent {
    fn to_event(&self) -> Result<Event, DatabaseError> {
        Ok(Event {
            id: parse_uuid(&self.event_id)?,
            title: self.title.clone(),
            date_expr: self.date_str.clone(),
            match_time: self.time_str.clone(),
            deadline_time: self.deadline_str.clone(),
            teams: serde_json::from_str(&self.teams)?,
            color: self.color as u32,
            location: DeliveryLocation {
                channel_id: self.channel_id as u64,
                message_id: self.message_id as u64,
            },
            active: self.active,
            reminded: self.reminded,
            created_at: string_to_datetime(&self.created_at)?,
            closed_at: self
                .closed_at
                .as_deref()
                .map(string_to_datetime)
                .transpose()?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = events)]
struct NewDbEvent<'a> {
    event_id: String,
    title: &'a str,
    date_str: &'a str,
    time_str: &'a str,
    deadline_str: Option<&'a str>,
    teams: String,
    color: i64,
    channel_id: i64,
    message_id: i64,
    active: bool,
    reminded: bool,
    created_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = registrations)]
struct DbRegistration {
    event_id: String,
    user_id: i64,
    username: String,
    team: String,
    role: String,
    availability: String,
    weapons: Option<String>,
    joined_at: String,
}

impl DbRegistration {
    fn to_registration(&self) -> Result<Registration, DatabaseError> {
        let slot = if self.team == ABSENCE_TEAM {
            Slot::Absence {
                reason: self.role.clone(),
            }
        } else {
            // rows written before availability became structured hold plain text
            let availability = serde_json::from_str::<Availability>(&self.availability)
                .unwrap_or_else(|_| Availability::custom(&self.availability));
            let weapons = match self.weapons.as_deref() {
                Some(raw) => serde_json::from_str::<Vec<Weapon>>(raw)?,
                None => Vec::new(),
            };
            Slot::Team {
                team: self.team.clone(),
                role: Role::parse(&self.role),
                availability,
                weapons,
            }
        };

        Ok(Registration {
            event_id: parse_uuid(&self.event_id)?,
            user_id: self.user_id as u64,
            display_name: self.username.clone(),
            slot,
            joined_at: string_to_datetime(&self.joined_at)?,
        })
    }
}

/// Column values of a registration, owned so the insert structs can borrow them.
struct EncodedRegistration {
    event_id: String,
    user_id: i64,
    username: String,
    team: String,
    role: String,
    availability: String,
    weapons: Option<String>,
    joined_at: String,
}

impl EncodedRegistration {
    fn encode(registration: &Registration) -> Result<Self, DatabaseError> {
        let (team, role, availability, weapons) = match &registration.slot {
            Slot::Team {
                team,
                role,
                availability,
                weapons,
            } => (
                team.clone(),
                role.as_str().to_string(),
                serde_json::to_string(availability)?,
                if weapons.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(weapons)?)
                },
            ),
            Slot::Absence { reason } => {
                (ABSENCE_TEAM.to_string(), reason.clone(), "-".to_string(), None)
            }
        };

        Ok(Self {
            event_id: registration.event_id.to_string(),
            user_id: registration.user_id as i64,
            username: registration.display_name.clone(),
            team,
            role,
            availability,
            weapons,
            joined_at: datetime_to_string(&registration.joined_at),
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = registrations)]
struct NewDbRegistration<'a> {
    event_id: &'a str,
    user_id: i64,
    username: &'a str,
    team: &'a str,
    role: &'a str,
    availability: &'a str,
    weapons: Option<&'a str>,
    joined_at: &'a str,
}

#[derive(AsChangeset)]
#[diesel(table_name = registrations, treat_none_as_null = true)]
struct UpdateDbRegistration<'a> {
    username: &'a str,
    team: &'a str,
    role: &'a str,
    availability: &'a str,
    weapons: Option<&'a str>,
}

#[derive(Insertable)]
#[diesel(table_name = attendance_history)]
struct NewAttendance {
    event_id: String,
    recorded_on: String,
    user_id: i64,
    username: String,
    status: String,
}

#[derive(Debug, QueryableByName)]
struct DbLeaderboardRow {
    #[diesel(sql_type = BigInt)]
    user_id: i64,
    #[diesel(sql_type = Text)]
    username: String,
    #[diesel(sql_type = BigInt)]
    joined_count: i64,
}

fn ensure_mutable(conn: &mut SqliteConnection, id: Uuid) -> Result<(), DatabaseError> {
    let active = events::table
        .filter(events::event_id.eq(id.to_string()))
        .select(events::active)
        .first::<bool>(conn)
        .optional()?;
    match active {
        None => Err(DatabaseError::NotFound(id)),
        Some(false) => Err(DatabaseError::Locked(id)),
        Some(true) => Ok(()),
    }
}

fn expect_updated(rows: usize, id: Uuid) -> Result<(), DatabaseError> {
    if rows == 0 {
        Err(DatabaseError::NotFound(id))
    } else {
        Ok(())
    }
}

pub fn build_pool(path: &str) -> Result<SqlitePool, DatabaseError> {
    let manager = ConnectionManager::<SqliteConnection>::new(path);
    Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| DatabaseError::Connection(e.to_string()))
}

#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, work: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, DatabaseError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            work(&mut conn)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[async_trait]
impl super::EventStore for SqliteEventStore {
    async fn create_event(&self, event: &NewEvent) -> Result<Event, DatabaseError> {
        let event = event.clone();
        self.run(move |conn| {
            let id = Uuid::new_v4();
            let created_at = Utc::now();
            let row = NewDbEvent {
                event_id: id.to_string(),
                title: &event.title,
                date_str: &event.date_expr,
                time_str: &event.match_time,
                deadline_str: event.deadline_time.as_deref(),
                teams: serde_json::to_string(&event.teams)?,
                color: i64::from(event.color),
                channel_id: event.location.channel_id as i64,
                message_id: event.location.message_id as i64,
                active: true,
                reminded: false,
                created_at: datetime_to_string(&created_at),
            };

            diesel::insert_into(events::table)
                .values(&row)
                .execute(conn)?;

            events::table
                .filter(events::event_id.eq(id.to_string()))
                .select(DbEvent::as_select())
                .first::<DbEvent>(conn)?
                .to_event()
        })
        .await
    }

    async fn get_event(&self, id: Uuid) -> Result<Event, DatabaseError> {
        self.run(move |conn| {
            events::table
                .filter(events::event_id.eq(id.to_string()))
                .select(DbEvent::as_select())
                .first::<DbEvent>(conn)
                .optional()?
                .ok_or(DatabaseError::NotFound(id))?
                .to_event()
        })
        .await
    }

    async fn list_live_events(&self) -> Result<Vec<Event>, DatabaseError> {
        self.run(|conn| {
            let rows = events::table
                .filter(events::closed_at.is_null())
                .order(events::created_at.asc())
                .select(DbEvent::as_select())
                .load::<DbEvent>(conn)?;
            rows.iter().map(DbEvent::to_event).collect()
        })
        .await
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), DatabaseError> {
        self.run(move |conn| {
            let rows = diesel::update(events::table.filter(events::event_id.eq(id.to_string())))
                .set(events::active.eq(active))
                .execute(conn)?;
            expect_updated(rows, id)
        })
        .await
    }

    async fn set_reminded(&self, id: Uuid, reminded: bool) -> Result<(), DatabaseError> {
        self.run(move |conn| {
            let rows = diesel::update(events::table.filter(events::event_id.eq(id.to_string())))
                .set(events::reminded.eq(reminded))
                .execute(conn)?;
            expect_updated(rows, id)
        })
        .await
    }

    async fn reschedule(
        &self,
        id: Uuid,
        date_expr: &str,
        match_time: &str,
        deadline_time: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let date_expr = date_expr.to_string();
        let match_time = match_time.to_string();
        let deadline_time = deadline_time.map(str::to_string);
        self.run(move |conn| {
            let rows = diesel::update(events::table.filter(events::event_id.eq(id.to_string())))
                .set((
                    events::date_str.eq(date_expr),
                    events::time_str.eq(match_time),
                    events::deadline_str.eq(deadline_time),
                    events::reminded.eq(false),
                ))
                .execute(conn)?;
            expect_updated(rows, id)
        })
        .await
    }

    async fn delete_event(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.run(move |conn| {
            conn.transaction::<_, DatabaseError, _>(|conn| {
                let key = id.to_string();
                diesel::delete(registrations::table.filter(registrations::event_id.eq(&key)))
                    .execute(conn)?;
                let rows = diesel::delete(events::table.filter(events::event_id.eq(&key)))
                    .execute(conn)?;
                expect_updated(rows, id)
            })
        })
        .await
    }

    async fn upsert_registration(&self, registration: &Registration) -> Result<(), DatabaseError> {
        let event_id = registration.event_id;
        let encoded = EncodedRegistration::encode(registration)?;
        self.run(move |conn| {
            conn.transaction::<_, DatabaseError, _>(|conn| {
                ensure_mutable(conn, event_id)?;

                let row = NewDbRegistration {
                    event_id: &encoded.event_id,
                    user_id: encoded.user_id,
                    username: &encoded.username,
                    team: &encoded.team,
                    role: &encoded.role,
                    availability: &encoded.availability,
                    weapons: encoded.weapons.as_deref(),
                    joined_at: &encoded.joined_at,
                };
                let changes = UpdateDbRegistration {
                    username: &encoded.username,
                    team: &encoded.team,
                    role: &encoded.role,
                    availability: &encoded.availability,
                    weapons: encoded.weapons.as_deref(),
                };

                diesel::insert_into(registrations::table)
                    .values(&row)
                    .on_conflict((registrations::event_id, registrations::user_id))
                    .do_update()
                    .set(&changes)
                    .execute(conn)?;
                Ok(())
            })
        })
        .await
    }

    async fn remove_registration(&self, event_id: Uuid, user_id: u64) -> Result<bool, DatabaseError> {
        self.run(move |conn| {
            conn.transaction::<_, DatabaseError, _>(|conn| {
                ensure_mutable(conn, event_id)?;
                let rows = diesel::delete(
                    registrations::table
                        .filter(registrations::event_id.eq(event_id.to_string()))
                        .filter(registrations::user_id.eq(user_id as i64)),
                )
                .execute(conn)?;
                Ok(rows > 0)
            })
        })
        .await
    }

    async fn list_registrations(&self, event_id: Uuid) -> Result<Vec<Registration>, DatabaseError> {
        self.run(move |conn| {
            let rows = registrations::table
                .filter(registrations::event_id.eq(event_id.to_string()))
                .order((registrations::joined_at.asc(), registrations::user_id.asc()))
                .select(DbRegistration::as_select())
                .load::<DbRegistration>(conn)?;
            rows.iter().map(DbRegistration::to_registration).collect()
        })
        .await
    }

    async fn close_event(
        &self,
        event_id: Uuid,
        recorded_on: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        self.run(move |conn| {
            conn.transaction::<_, DatabaseError, _>(|conn| {
                let key = event_id.to_string();
                let closed_at = events::table
                    .filter(events::event_id.eq(&key))
                    .select(events::closed_at)
                    .first::<Option<String>>(conn)
                    .optional()?;
                match closed_at {
                    None => return Err(DatabaseError::NotFound(event_id)),
                    Some(Some(_)) => return Err(DatabaseError::Closed(event_id)),
                    Some(None) => {}
                }

                let rows = registrations::table
                    .filter(registrations::event_id.eq(&key))
                    .order((registrations::joined_at.asc(), registrations::user_id.asc()))
                    .select(DbRegistration::as_select())
                    .load::<DbRegistration>(conn)?;

                let history: Vec<NewAttendance> = rows
                    .iter()
                    .map(|row| {
                        let status = if row.team == ABSENCE_TEAM {
                            AttendanceStatus::Absence
                        } else {
                            AttendanceStatus::Joined
                        };
                        NewAttendance {
                            event_id: key.clone(),
                            recorded_on: recorded_on.format("%Y-%m-%d").to_string(),
                            user_id: row.user_id,
                            username: row.username.clone(),
                            status: status.as_str().to_string(),
                        }
                    })
                    .collect();

                if !history.is_empty() {
                    diesel::insert_into(attendance_history::table)
                        .values(&history)
                        .execute(conn)?;
                }

                diesel::update(events::table.filter(events::event_id.eq(&key)))
                    .set((
                        events::closed_at.eq(Some(datetime_to_string(&at))),
                        events::active.eq(false),
                    ))
                    .execute(conn)?;
                Ok(history.len())
            })
        })
        .await
    }

    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, DatabaseError> {
        self.run(move |conn| {
            let rows = diesel::sql_query(
                "SELECT user_id, MAX(username) AS username, COUNT(*) AS joined_count \
                 FROM attendance_history WHERE status = 'Joined' \
                 GROUP BY user_id ORDER BY joined_count DESC, user_id ASC LIMIT ?",
            )
            .bind::<BigInt, _>(limit)
            .load::<DbLeaderboardRow>(conn)?;

            Ok(rows
                .into_iter()
                .map(|row| LeaderboardEntry {
                    user_id: row.user_id as u64,
                    username: row.username,
                    joined_count: row.joined_count,
                })
                .collect())
        })
        .await
    }
}
