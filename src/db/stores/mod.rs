use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::DatabaseError;
use super::models::{Event, LeaderboardEntry, NewEvent, Registration};

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create_event(&self, event: &NewEvent) -> Result<Event, DatabaseError>;
    async fn get_event(&self, id: Uuid) -> Result<Event, DatabaseError>;
    /// Events that have not been closed, oldest first.
    async fn list_live_events(&self) -> Result<Vec<Event>, DatabaseError>;
    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), DatabaseError>;
    async fn set_reminded(&self, id: Uuid, reminded: bool) -> Result<(), DatabaseError>;
    /// Moves the event and clears its reminder flag.
    async fn reschedule(
        &self,
        id: Uuid,
        date_expr: &str,
        match_time: &str,
        deadline_time: Option<&str>,
    ) -> Result<(), DatabaseError>;
    /// Removes the event together with its registrations. Attendance history is kept.
    async fn delete_event(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Inserts or replaces the row keyed by (event, user). The first `joined_at` wins.
    async fn upsert_registration(&self, registration: &Registration) -> Result<(), DatabaseError>;
    async fn remove_registration(&self, event_id: Uuid, user_id: u64) -> Result<bool, DatabaseError>;
    async fn list_registrations(&self, event_id: Uuid) -> Result<Vec<Registration>, DatabaseError>;

    /// Archives attendance for every registration, then locks and closes the
    /// event, all in one transaction. Returns the number of archived rows.
    async fn close_event(
        &self,
        event_id: Uuid,
        recorded_on: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<usize, DatabaseError>;
    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, DatabaseError>;
}
