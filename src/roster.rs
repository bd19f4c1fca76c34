//! Roster operations exposed to the transport layer: rendering, registration
//! writes, and the organizer actions on an event.

pub mod dashboard;
pub mod dates;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{Actor, AuditAction, AuditEntry, AuditSink};
use crate::web::metrics::Metrics;
use crate::db::{
    Availability, DatabaseError, Event, EventStore, LeaderboardEntry, Registration, Role, Slot,
    Weapon,
};

pub use self::dashboard::{DashboardView, render_dashboard};

#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("{0}")]
    Validation(String),
    #[error("event {0} not found")]
    NotFound(Uuid),
    #[error("event {0} is locked")]
    Locked(Uuid),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("database error: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for RosterError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(id) => RosterError::NotFound(id),
            DatabaseError::Locked(id) => RosterError::Locked(id),
            DatabaseError::Closed(_) => {
                RosterError::Validation("This war has already been closed.".to_string())
            }
            other => RosterError::Database(other),
        }
    }
}

/// Where dashboards and reminders are delivered.
#[async_trait]
pub trait RosterTransport: Send + Sync {
    async fn push_dashboard(&self, event: &Event, view: &DashboardView)
    -> Result<(), TransportError>;

    /// `registrations` are the members to mention; absences are already filtered out.
    async fn send_reminder(
        &self,
        event: &Event,
        registrations: &[Registration],
    ) -> Result<(), TransportError>;
}

/// A validated sign-up ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUp {
    pub team: String,
    pub role: Role,
    pub availability: Availability,
    /// `None` when weapon selection was skipped or disabled.
    pub weapons: Option<Vec<Weapon>>,
}

pub struct RosterService {
    store: Arc<dyn EventStore>,
    transport: Arc<dyn RosterTransport>,
    audit: Arc<dyn AuditSink>,
    timezone: Tz,
}

impl RosterService {
    pub fn new(
        store: Arc<dyn EventStore>,
        transport: Arc<dyn RosterTransport>,
        audit: Arc<dyn AuditSink>,
        timezone: Tz,
    ) -> Self {
        Self {
            store,
            transport,
            audit,
            timezone,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub async fn event(&self, event_id: Uuid) -> Result<Event, RosterError> {
        Ok(self.store.get_event(event_id).await?)
    }

    /// Fails with `Locked` when the event no longer accepts changes.
    pub async fn mutable_event(&self, event_id: Uuid) -> Result<Event, RosterError> {
        let event = self.event(event_id).await?;
        if event.is_locked() {
            return Err(RosterError::Locked(event_id));
        }
        Ok(event)
    }

    pub async fn render(&self, event_id: Uuid) -> Result<DashboardView, RosterError> {
        self.render_at(event_id, Utc::now()).await
    }

    pub async fn render_at(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DashboardView, RosterError> {
        let event = self.event(event_id).await?;
        let registrations = self.store.list_registrations(event_id).await?;
        Ok(render_dashboard(&event, &registrations, now, self.timezone))
    }

    pub async fn apply_registration(
        &self,
        event_id: Uuid,
        user_id: u64,
        display_name: &str,
        sign_up: SignUp,
    ) -> Result<Registration, RosterError> {
        let event = self.mutable_event(event_id).await?;
        validate_sign_up(&event, &sign_up)?;

        let summary = format!(
            "{} / {} / {}",
            sign_up.team,
            sign_up.role,
            sign_up.availability.label()
        );
        let registration = Registration {
            event_id,
            user_id,
            display_name: display_name.to_string(),
            slot: Slot::Team {
                team: sign_up.team,
                role: sign_up.role,
                availability: sign_up.availability,
                weapons: sign_up.weapons.unwrap_or_default(),
            },
            joined_at: Utc::now(),
        };

        let stored = self.write(&event, registration).await?;
        info!(%event_id, user_id, "registration saved: {}", summary);
        self.audit
            .record(AuditEntry::new(
                &Actor::new(user_id, display_name),
                AuditAction::Registered,
                summary,
            ))
            .await;
        Ok(stored)
    }

    pub async fn register_absence(
        &self,
        event_id: Uuid,
        user_id: u64,
        display_name: &str,
        reason: &str,
    ) -> Result<Registration, RosterError> {
        let event = self.mutable_event(event_id).await?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(RosterError::Validation(
                "Please give a reason for the absence.".to_string(),
            ));
        }

        let registration = Registration {
            event_id,
            user_id,
            display_name: display_name.to_string(),
            slot: Slot::Absence {
                reason: reason.to_string(),
            },
            joined_at: Utc::now(),
        };

        let stored = self.write(&event, registration).await?;
        info!(%event_id, user_id, "absence saved");
        self.audit
            .record(AuditEntry::new(
                &Actor::new(user_id, display_name),
                AuditAction::Absence,
                format!("Reason: {reason}"),
            ))
            .await;
        Ok(stored)
    }

    /// Returns whether the user had a registration to remove.
    pub async fn withdraw(&self, event_id: Uuid, actor: &Actor) -> Result<bool, RosterError> {
        let event = self.mutable_event(event_id).await?;
        let removed = self
            .store
            .remove_registration(event_id, actor.user_id)
            .await?;

        if removed {
            self.push_refresh(&event).await;
            self.audit
                .record(AuditEntry::new(actor, AuditAction::Withdrew, "Removed own registration"))
                .await;
        }
        Ok(removed)
    }

    pub async fn set_locked(
        &self,
        event_id: Uuid,
        locked: bool,
        actor: &Actor,
    ) -> Result<Event, RosterError> {
        let event = self.event(event_id).await?;
        if event.is_closed() && !locked {
            return Err(RosterError::Validation(
                "A closed war cannot be reopened.".to_string(),
            ));
        }

        self.store.set_active(event_id, !locked).await?;
        let event = self.event(event_id).await?;
        self.push_refresh(&event).await;

        let action = if locked {
            AuditAction::Locked
        } else {
            AuditAction::Unlocked
        };
        self.audit
            .record(AuditEntry::new(actor, action, event.title.clone()))
            .await;
        Ok(event)
    }

    /// Archives attendance, then locks and closes the event. Returns the
    /// number of archived rows.
    pub async fn close(&self, event_id: Uuid, actor: &Actor) -> Result<usize, RosterError> {
        let now = Utc::now();
        let recorded_on = now.with_timezone(&self.timezone).date_naive();
        let count = self.store.close_event(event_id, recorded_on, now).await?;

        let event = self.event(event_id).await?;
        self.push_refresh(&event).await;
        info!(%event_id, count, "war closed and attendance archived");
        self.audit
            .record(AuditEntry::new(
                actor,
                AuditAction::Closed,
                format!("Saved attendance for {count} members"),
            ))
            .await;
        Ok(count)
    }

    pub async fn reschedule(
        &self,
        event_id: Uuid,
        date_expr: &str,
        match_time: &str,
        deadline_time: Option<&str>,
        actor: &Actor,
    ) -> Result<Event, RosterError> {
        if date_expr.trim().is_empty() {
            return Err(RosterError::Validation("Date cannot be empty.".to_string()));
        }
        let date_expr = dates::pin_date(date_expr, Utc::now(), self.timezone);
        let match_time = require_clock(match_time)?;
        let deadline_time = deadline_time
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(require_clock)
            .transpose()?;

        self.store
            .reschedule(event_id, &date_expr, &match_time, deadline_time.as_deref())
            .await?;
        let event = self.event(event_id).await?;
        self.push_refresh(&event).await;
        self.audit
            .record(AuditEntry::new(
                actor,
                AuditAction::Rescheduled,
                format!("{} {}", event.date_expr, event.match_time),
            ))
            .await;
        Ok(event)
    }

    /// Deletes the event and its registrations; returns the removed event so
    /// the caller can clean up the dashboard message.
    pub async fn delete(&self, event_id: Uuid, actor: &Actor) -> Result<Event, RosterError> {
        let event = self.event(event_id).await?;
        self.store.delete_event(event_id).await?;
        info!(%event_id, "event deleted");
        self.audit
            .record(AuditEntry::new(actor, AuditAction::Deleted, event.title.clone()))
            .await;
        Ok(event)
    }

    pub async fn roster_text(&self, event_id: Uuid) -> Result<String, RosterError> {
        let event = self.event(event_id).await?;
        let registrations = self.store.list_registrations(event_id).await?;
        Ok(dashboard::roster_text(&event, &registrations))
    }

    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, RosterError> {
        Ok(self.store.leaderboard(limit).await?)
    }

    /// Most recently created open event, preferring one posted in `channel_id`.
    pub async fn latest_live_event(
        &self,
        channel_id: Option<u64>,
    ) -> Result<Option<Event>, RosterError> {
        let events = self.store.list_live_events().await?;
        let in_channel = channel_id.and_then(|channel| {
            events
                .iter()
                .rev()
                .find(|e| e.location.channel_id == channel)
                .cloned()
        });
        Ok(in_channel.or_else(|| events.last().cloned()))
    }

    /// User ids from `candidates` with no registration (of any kind) on the event.
    pub async fn missing_members(
        &self,
        event_id: Uuid,
        candidates: &[u64],
    ) -> Result<Vec<u64>, RosterError> {
        let registered: HashSet<u64> = self
            .store
            .list_registrations(event_id)
            .await?
            .into_iter()
            .map(|r| r.user_id)
            .collect();
        Ok(candidates
            .iter()
            .copied()
            .filter(|id| !registered.contains(id))
            .collect())
    }

    pub async fn refresh(&self, event_id: Uuid) -> Result<(), RosterError> {
        let event = self.event(event_id).await?;
        self.push_refresh(&event).await;
        Ok(())
    }

    pub async fn record_audit(&self, entry: AuditEntry) {
        self.audit.record(entry).await;
    }

    async fn write(
        &self,
        event: &Event,
        registration: Registration,
    ) -> Result<Registration, RosterError> {
        self.store.upsert_registration(&registration).await?;
        Metrics::registration_saved();

        // the write is committed; everything below is best-effort
        match self.store.list_registrations(event.id).await {
            Ok(registrations) => {
                self.deliver(event, &registrations).await;
                Ok(registrations
                    .into_iter()
                    .find(|r| r.user_id == registration.user_id)
                    .unwrap_or(registration))
            }
            Err(e) => {
                warn!(event_id = %event.id, "could not load roster for refresh: {}", e);
                Ok(registration)
            }
        }
    }

    /// Re-renders and pushes the dashboard. Failures are logged and dropped.
    async fn push_refresh(&self, event: &Event) {
        match self.store.list_registrations(event.id).await {
            Ok(registrations) => self.deliver(event, &registrations).await,
            Err(e) => warn!(event_id = %event.id, "could not load roster for refresh: {}", e),
        }
    }

    async fn deliver(&self, event: &Event, registrations: &[Registration]) {
        let view = render_dashboard(event, registrations, Utc::now(), self.timezone);
        let result = self.transport.push_dashboard(event, &view).await;
        Metrics::dashboard_push(result.is_ok());
        match result {
            Ok(()) => debug!(event_id = %event.id, "dashboard refreshed"),
            Err(e) => warn!(event_id = %event.id, "dashboard refresh failed: {}", e),
        }
    }
}

fn require_clock(raw: &str) -> Result<String, RosterError> {
    dates::normalize_clock(raw)
        .ok_or_else(|| RosterError::Validation(format!("`{}` is not a valid HH:MM time.", raw.trim())))
}

fn validate_sign_up(event: &Event, sign_up: &SignUp) -> Result<(), RosterError> {
    if !event.has_team(&sign_up.team) {
        return Err(RosterError::Validation(format!(
            "Team `{}` is not part of this war.",
            sign_up.team
        )));
    }
    if !Role::SELECTABLE.contains(&sign_up.role) {
        return Err(RosterError::Validation(format!(
            "Role `{}` cannot be selected.",
            sign_up.role
        )));
    }
    if sign_up.availability.is_empty() {
        return Err(RosterError::Validation(
            "Pick at least one availability option.".to_string(),
        ));
    }
    if let Some(weapons) = &sign_up.weapons {
        let distinct: HashSet<&Weapon> = weapons.iter().collect();
        if weapons.is_empty() || weapons.len() > Weapon::MAX_LOADOUT || distinct.len() != weapons.len()
        {
            return Err(RosterError::Validation(format!(
                "Choose 1 to {} different weapons, or skip.",
                Weapon::MAX_LOADOUT
            )));
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::NamedTempFile;

    use super::testing::{RecordingAudit, RecordingTransport};
    use super::*;
    use crate::db::AvailabilityTag;
    use crate::db::manager::tests::{sample_event, temp_store};

    struct Harness {
        _file: NamedTempFile,
        service: RosterService,
        transport: Arc<RecordingTransport>,
        audit: Arc<RecordingAudit>,
        event: Event,
    }

    async fn harness() -> Harness {
        let (file, store) = temp_store().await;
        let event = store.create_event(&sample_event()).await.unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let audit = Arc::new(RecordingAudit::default());
        let service = RosterService::new(
            store,
            transport.clone(),
            audit.clone(),
            chrono_tz::Asia::Bangkok,
        );
        Harness {
            _file: file,
            service,
            transport,
            audit,
            event,
        }
    }

    fn sign_up(team: &str, role: Role) -> SignUp {
        SignUp {
            team: team.to_string(),
            role,
            availability: Availability::from_tags([AvailabilityTag::FullTime]),
            weapons: None,
        }
    }

    #[tokio::test]
    async fn registration_writes_once_and_refreshes() {
        let h = harness().await;

        let stored = h
            .service
            .apply_registration(h.event.id, 7, "Kai", sign_up("Team ATK", Role::Tank))
            .await
            .unwrap();
        h.service
            .apply_registration(h.event.id, 7, "Kai", sign_up("Team Flex", Role::Heal))
            .await
            .unwrap();

        let view = h.service.render(h.event.id).await.unwrap();
        assert_eq!(view.participant_count(), 1);
        assert_eq!(view.teams[1].main[0].role, Role::Heal);
        assert_eq!(h.transport.dashboards.lock().len(), 2);
        assert_eq!(stored.user_id, 7);
        assert_eq!(
            *h.audit.entries.lock(),
            vec![AuditAction::Registered, AuditAction::Registered]
        );
    }

    #[tokio::test]
    async fn unknown_team_is_a_validation_error() {
        let h = harness().await;
        let result = h
            .service
            .apply_registration(h.event.id, 1, "A", sign_up("Team Ghost", Role::Dps))
            .await;
        assert!(matches!(result, Err(RosterError::Validation(_))));
        assert!(h.transport.dashboards.lock().is_empty());
    }

    #[tokio::test]
    async fn weapon_loadout_is_bounded() {
        let h = harness().await;
        let mut too_many = sign_up("Team ATK", Role::Dps);
        too_many.weapons = Some(vec![Weapon::Sword, Weapon::Fan, Weapon::Bow]);
        assert!(matches!(
            h.service.apply_registration(h.event.id, 1, "A", too_many).await,
            Err(RosterError::Validation(_))
        ));

        let mut pair = sign_up("Team ATK", Role::Dps);
        pair.weapons = Some(vec![Weapon::Sword, Weapon::Fan]);
        let stored = h
            .service
            .apply_registration(h.event.id, 1, "A", pair)
            .await
            .unwrap();
        assert!(matches!(stored.slot, Slot::Team { ref weapons, .. } if weapons.len() == 2));
    }

    #[tokio::test]
    async fn locked_event_rejects_every_write() {
        let h = harness().await;
        let admin = Actor::new(99, "Admin");
        h.service.set_locked(h.event.id, true, &admin).await.unwrap();

        assert!(matches!(
            h.service
                .apply_registration(h.event.id, 1, "A", sign_up("Team ATK", Role::Dps))
                .await,
            Err(RosterError::Locked(_))
        ));
        assert!(matches!(
            h.service.register_absence(h.event.id, 1, "A", "sick").await,
            Err(RosterError::Locked(_))
        ));
        assert!(matches!(
            h.service.withdraw(h.event.id, &Actor::new(1, "A")).await,
            Err(RosterError::Locked(_))
        ));

        // reads stay available
        assert!(h.service.render(h.event.id).await.unwrap().status.locked);
        assert!(h.service.roster_text(h.event.id).await.is_ok());
    }

    #[tokio::test]
    async fn failed_dashboard_push_keeps_the_write() {
        let h = harness().await;
        h.transport.fail(true);

        h.service
            .apply_registration(h.event.id, 1, "A", sign_up("Team ATK", Role::Dps))
            .await
            .expect("write succeeds even when the dashboard cannot be updated");

        let view = h.service.render(h.event.id).await.unwrap();
        assert_eq!(view.teams[0].counts.dps, 1);
    }

    /// Delegates to a real store but can fail roster reads.
    struct FailingReads {
        inner: Arc<dyn EventStore>,
        failing: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl EventStore for FailingReads {
        async fn create_event(&self, event: &crate::db::NewEvent) -> Result<Event, DatabaseError> {
            self.inner.create_event(event).await
        }
        async fn get_event(&self, id: Uuid) -> Result<Event, DatabaseError> {
            self.inner.get_event(id).await
        }
        async fn list_live_events(&self) -> Result<Vec<Event>, DatabaseError> {
            self.inner.list_live_events().await
        }
        async fn set_active(&self, id: Uuid, active: bool) -> Result<(), DatabaseError> {
            self.inner.set_active(id, active).await
        }
        async fn set_reminded(&self, id: Uuid, reminded: bool) -> Result<(), DatabaseError> {
            self.inner.set_reminded(id, reminded).await
        }
        async fn reschedule(
            &self,
            id: Uuid,
            date_expr: &str,
            match_time: &str,
            deadline_time: Option<&str>,
        ) -> Result<(), DatabaseError> {
            self.inner
                .reschedule(id, date_expr, match_time, deadline_time)
                .await
        }
        async fn delete_event(&self, id: Uuid) -> Result<(), DatabaseError> {
            self.inner.delete_event(id).await
        }
        async fn upsert_registration(&self, registration: &Registration) -> Result<(), DatabaseError> {
            self.inner.upsert_registration(registration).await
        }
        async fn remove_registration(
            &self,
            event_id: Uuid,
            user_id: u64,
        ) -> Result<bool, DatabaseError> {
            self.inner.remove_registration(event_id, user_id).await
        }
        async fn list_registrations(&self, event_id: Uuid) -> Result<Vec<Registration>, DatabaseError> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(DatabaseError::Query("database is locked".to_string()));
            }
            self.inner.list_registrations(event_id).await
        }
        async fn close_event(
            &self,
            event_id: Uuid,
            recorded_on: chrono::NaiveDate,
            at: DateTime<Utc>,
        ) -> Result<usize, DatabaseError> {
            self.inner.close_event(event_id, recorded_on, at).await
        }
        async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, DatabaseError> {
            self.inner.leaderboard(limit).await
        }
    }

    #[tokio::test]
    async fn failed_reload_after_write_still_reports_success() {
        let (_file, inner) = temp_store().await;
        let event = inner.create_event(&sample_event()).await.unwrap();
        let store = Arc::new(FailingReads {
            inner,
            failing: std::sync::atomic::AtomicBool::new(true),
        });
        let transport = Arc::new(RecordingTransport::default());
        let audit = Arc::new(RecordingAudit::default());
        let service = RosterService::new(
            store.clone(),
            transport.clone(),
            audit.clone(),
            chrono_tz::Asia::Bangkok,
        );

        let stored = service
            .apply_registration(event.id, 3, "Mo", sign_up("Team ATK", Role::Heal))
            .await
            .expect("committed write is reported as saved");
        assert_eq!(stored.user_id, 3);
        assert!(transport.dashboards.lock().is_empty());
        assert_eq!(*audit.entries.lock(), vec![AuditAction::Registered]);

        store
            .failing
            .store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(service.render(event.id).await.unwrap().participant_count(), 1);
    }

    #[tokio::test]
    async fn blank_absence_reason_is_rejected() {
        let h = harness().await;
        assert!(matches!(
            h.service.register_absence(h.event.id, 1, "A", "   ").await,
            Err(RosterError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn withdraw_reports_whether_anything_was_removed() {
        let h = harness().await;
        let user = Actor::new(1, "A");
        assert!(!h.service.withdraw(h.event.id, &user).await.unwrap());

        h.service
            .register_absence(h.event.id, 1, "A", "travel")
            .await
            .unwrap();
        assert!(h.service.withdraw(h.event.id, &user).await.unwrap());
        assert!(h.service.render(h.event.id).await.unwrap().absences.is_empty());
    }

    #[tokio::test]
    async fn close_archives_and_cannot_be_reopened() {
        let h = harness().await;
        let admin = Actor::new(99, "Admin");
        h.service
            .apply_registration(h.event.id, 1, "A", sign_up("Team ATK", Role::Dps))
            .await
            .unwrap();

        assert_eq!(h.service.close(h.event.id, &admin).await.unwrap(), 1);
        let view = h.service.render(h.event.id).await.unwrap();
        assert!(view.status.closed);
        assert!(matches!(
            h.service.set_locked(h.event.id, false, &admin).await,
            Err(RosterError::Validation(_))
        ));
        assert_eq!(h.service.leaderboard(10).await.unwrap()[0].joined_count, 1);
        assert!(h.service.latest_live_event(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reschedule_normalizes_and_validates_times() {
        let h = harness().await;
        let admin = Actor::new(99, "Admin");

        let event = h
            .service
            .reschedule(h.event.id, "25/12", "20.15", Some("19:45"), &admin)
            .await
            .unwrap();
        assert_eq!(event.match_time, "20:15");
        assert_eq!(event.deadline_time.as_deref(), Some("19:45"));

        assert!(matches!(
            h.service
                .reschedule(h.event.id, "25/12", "late", None, &admin)
                .await,
            Err(RosterError::Validation(_))
        ));

        let moved = h
            .service
            .reschedule(h.event.id, "tomorrow", "20:00", None, &admin)
            .await
            .unwrap();
        let (day, month) = moved.date_expr.split_once('/').unwrap();
        assert!(day.parse::<u32>().is_ok() && month.parse::<u32>().is_ok());
    }

    #[tokio::test]
    async fn deleted_event_renders_not_found() {
        let h = harness().await;
        h.service
            .apply_registration(h.event.id, 1, "A", sign_up("Team ATK", Role::Dps))
            .await
            .unwrap();

        h.service
            .delete(h.event.id, &Actor::new(99, "Admin"))
            .await
            .unwrap();

        assert!(matches!(
            h.service.render(h.event.id).await,
            Err(RosterError::NotFound(id)) if id == h.event.id
        ));
    }

    #[tokio::test]
    async fn missing_members_skips_anyone_registered() {
        let h = harness().await;
        h.service
            .apply_registration(h.event.id, 1, "A", sign_up("Team ATK", Role::Dps))
            .await
            .unwrap();
        h.service
            .register_absence(h.event.id, 2, "B", "work")
            .await
            .unwrap();

        let missing = h
            .service
            .missing_members(h.event.id, &[1, 2, 3, 4])
            .await
            .unwrap();
        assert_eq!(missing, vec![3, 4]);
    }
}
