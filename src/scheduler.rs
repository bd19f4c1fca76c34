use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{Actor, AuditAction, AuditEntry, AuditSink};
use crate::config::{LockPolicy, ScheduleConfig};
use crate::db::{DatabaseError, Event, EventStore};
use crate::registration::RegistrationFlow;
use crate::roster::dates::resolve_instant;
use crate::roster::{RosterTransport, render_dashboard};
use crate::web::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SchedulerAction {
    Remind { event_id: Uuid, mentioned: usize },
    Lock { event_id: Uuid },
}

/// What is due for one event at `now`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plan {
    pub remind: bool,
    pub lock: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderWindow {
    pub opens_before: Duration,
    pub closes_before: Duration,
}

impl ReminderWindow {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            opens_before: config.reminder_opens_before(),
            closes_before: config.reminder_closes_before(),
        }
    }

    pub fn contains(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        start - self.opens_before <= now && now < start - self.closes_before
    }
}

/// Decides reminder and lock triggers. Returns an empty plan when the event's
/// date or time cannot be resolved.
pub fn plan(event: &Event, now: DateTime<Utc>, config: &ScheduleConfig) -> Plan {
    let tz = config.timezone;
    let Some(start) = resolve_instant(&event.date_expr, &event.match_time, now, tz) else {
        debug!(event_id = %event.id, date = %event.date_expr, time = %event.match_time, "unresolvable schedule, skipping");
        return Plan::default();
    };
    let start = start.with_timezone(&Utc);

    let lock_at = match config.lock_policy {
        LockPolicy::MatchStart => start,
        LockPolicy::Deadline => event
            .deadline_time
            .as_deref()
            .and_then(|deadline| resolve_instant(&event.date_expr, deadline, now, tz))
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(start),
    };

    Plan {
        remind: !event.reminded && ReminderWindow::from_config(config).contains(start, now),
        lock: event.active && now >= lock_at,
    }
}

pub struct Scheduler {
    store: Arc<dyn EventStore>,
    transport: Arc<dyn RosterTransport>,
    config: ScheduleConfig,
    flows: Option<Arc<RegistrationFlow>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn EventStore>,
        transport: Arc<dyn RosterTransport>,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            flows: None,
            audit: None,
        }
    }

    /// Expired sign-up flows are swept on every tick.
    pub fn with_flows(mut self, flows: Arc<RegistrationFlow>) -> Self {
        self.flows = Some(flows);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "scheduler started, ticking every {}s",
            self.config.tick_seconds
        );

        loop {
            ticker.tick().await;
            let actions = self.tick(Utc::now()).await;
            if !actions.is_empty() {
                info!(count = actions.len(), "scheduler applied actions");
            }
            if let Some(flows) = &self.flows {
                let purged = flows.registry().purge_expired(Instant::now());
                if purged > 0 {
                    debug!(purged, "expired sign-up flows discarded");
                }
            }
        }
    }

    /// One pass over every live event. A failing event never blocks the others.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<SchedulerAction> {
        Metrics::scheduler_tick();
        let events = match self.store.list_live_events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("scheduler could not list events: {}", e);
                return Vec::new();
            }
        };

        join_all(events.into_iter().map(|event| self.process(event, now)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn process(&self, event: Event, now: DateTime<Utc>) -> Vec<SchedulerAction> {
        let plan = plan(&event, now, &self.config);
        let mut actions = Vec::new();

        if plan.remind {
            match self.remind(&event).await {
                Ok(action) => actions.push(action),
                Err(e) => warn!(event_id = %event.id, "reminder failed: {}", e),
            }
        }

        if plan.lock {
            match self.lock(&event, now).await {
                Ok(action) => actions.push(action),
                Err(e) => warn!(event_id = %event.id, "auto-lock failed: {}", e),
            }
        }

        actions
    }

    async fn remind(&self, event: &Event) -> Result<SchedulerAction, DatabaseError> {
        // flag first so a slow or failed delivery is never repeated
        self.store.set_reminded(event.id, true).await?;

        let attendees: Vec<_> = self
            .store
            .list_registrations(event.id)
            .await?
            .into_iter()
            .filter(|r| !r.slot.is_absence())
            .collect();

        match timeout(
            self.config.delivery_timeout(),
            self.transport.send_reminder(event, &attendees),
        )
        .await
        {
            Ok(Ok(())) => {
                Metrics::reminder_sent();
                info!(event_id = %event.id, mentioned = attendees.len(), "reminder sent");
            }
            Ok(Err(e)) => warn!(event_id = %event.id, "reminder delivery failed: {}", e),
            Err(_) => warn!(event_id = %event.id, "reminder delivery timed out"),
        }

        Ok(SchedulerAction::Remind {
            event_id: event.id,
            mentioned: attendees.len(),
        })
    }

    async fn lock(&self, event: &Event, now: DateTime<Utc>) -> Result<SchedulerAction, DatabaseError> {
        self.store.set_active(event.id, false).await?;
        Metrics::auto_lock();
        info!(event_id = %event.id, title = %event.title, "registration auto-locked");
        if let Some(audit) = &self.audit {
            audit
                .record(AuditEntry::new(
                    &Actor::system(),
                    AuditAction::Locked,
                    format!("{} (scheduled)", event.title),
                ))
                .await;
        }

        let event = self.store.get_event(event.id).await?;
        let registrations = self.store.list_registrations(event.id).await?;
        let view = render_dashboard(&event, &registrations, now, self.config.timezone);

        match timeout(
            self.config.delivery_timeout(),
            self.transport.push_dashboard(&event, &view),
        )
        .await
        {
            Ok(Ok(())) => Metrics::dashboard_push(true),
            Ok(Err(e)) => {
                Metrics::dashboard_push(false);
                warn!(event_id = %event.id, "dashboard refresh after lock failed: {}", e);
            }
            Err(_) => {
                Metrics::dashboard_push(false);
                warn!(event_id = %event.id, "dashboard refresh after lock timed out");
            }
        }

        Ok(SchedulerAction::Lock { event_id: event.id })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::db::manager::tests::{sample_event, team_registration, temp_store};
    use crate::db::{Registration, Role, Slot};
    use crate::config::DefaultsConfig;
    use crate::db::DeliveryLocation;
    use crate::roster::testing::{RecordingAudit, RecordingTransport};
    use crate::session::SessionManager;
    use crate::roster::{DashboardView, TransportError};

    // 2026-10-18 19:30 in Bangkok
    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 30, 0).unwrap()
    }

    fn config() -> ScheduleConfig {
        ScheduleConfig::default()
    }

    fn event(reminded: bool, active: bool) -> Event {
        let new_event = sample_event();
        Event {
            id: Uuid::nil(),
            title: new_event.title,
            date_expr: "18/10".to_string(),
            match_time: "19:30".to_string(),
            deadline_time: Some("19:00".to_string()),
            teams: new_event.teams,
            color: new_event.color,
            location: new_event.location,
            active,
            reminded,
            created_at: start() - Duration::days(1),
            closed_at: None,
        }
    }

    #[test]
    fn reminder_window_is_half_open() {
        let e = event(false, true);
        let at = |mins: i64| plan(&e, start() - Duration::minutes(mins), &config());

        assert!(!at(31).remind);
        assert!(at(30).remind);
        assert!(at(16).remind);
        assert!(!at(15).remind);
        assert!(!plan(&event(true, true), start() - Duration::minutes(20), &config()).remind);
    }

    #[test]
    fn lock_follows_policy() {
        let e = event(true, true);
        let before_deadline = start() - Duration::minutes(31);
        let after_deadline = start() - Duration::minutes(10);

        let mut cfg = config();
        assert!(!plan(&e, after_deadline, &cfg).lock);
        assert!(plan(&e, start(), &cfg).lock);

        cfg.lock_policy = LockPolicy::Deadline;
        assert!(!plan(&e, before_deadline, &cfg).lock);
        assert!(plan(&e, after_deadline, &cfg).lock);

        let mut no_deadline = e.clone();
        no_deadline.deadline_time = None;
        assert!(!plan(&no_deadline, after_deadline, &cfg).lock);
        assert!(plan(&no_deadline, start(), &cfg).lock);
    }

    #[test]
    fn locked_events_are_not_locked_again() {
        assert!(!plan(&event(true, false), start() + Duration::hours(1), &config()).lock);
    }

    #[test]
    fn unresolvable_dates_plan_nothing() {
        let mut e = event(false, true);
        e.date_expr = "someday".to_string();
        assert_eq!(plan(&e, start(), &config()), Plan::default());
    }

    async fn scheduled_store() -> (tempfile::NamedTempFile, Arc<dyn EventStore>, Event) {
        let (file, store) = temp_store().await;
        let mut new_event = sample_event();
        new_event.date_expr = "18/10".to_string();
        new_event.match_time = "19:30".to_string();
        let event = store.create_event(&new_event).await.unwrap();
        (file, store, event)
    }

    #[tokio::test]
    async fn reminder_fires_once_across_ticks() {
        let (_file, store, event) = scheduled_store().await;
        store
            .upsert_registration(&team_registration(event.id, 1, "A", "Team ATK", Role::Dps))
            .await
            .unwrap();
        store
            .upsert_registration(&Registration {
                event_id: event.id,
                user_id: 2,
                display_name: "B".to_string(),
                slot: Slot::Absence {
                    reason: "away".to_string(),
                },
                joined_at: Utc::now(),
            })
            .await
            .unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let scheduler = Scheduler::new(store.clone(), transport.clone(), config());

        let mut all = Vec::new();
        for minute in [25, 24, 20, 16] {
            all.extend(scheduler.tick(start() - Duration::minutes(minute)).await);
        }

        assert_eq!(
            all,
            vec![SchedulerAction::Remind {
                event_id: event.id,
                mentioned: 1
            }]
        );
        assert_eq!(*transport.reminders.lock(), vec![(event.id, vec![1])]);
        assert!(store.get_event(event.id).await.unwrap().reminded);
    }

    #[tokio::test]
    async fn reminder_is_not_retried_after_failed_delivery() {
        let (_file, store, event) = scheduled_store().await;
        let transport = Arc::new(RecordingTransport::default());
        transport.fail(true);
        let scheduler = Scheduler::new(store.clone(), transport.clone(), config());

        let first = scheduler.tick(start() - Duration::minutes(20)).await;
        transport.fail(false);
        let second = scheduler.tick(start() - Duration::minutes(19)).await;

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert!(transport.reminders.lock().is_empty());
    }

    #[tokio::test]
    async fn auto_lock_is_monotonic() {
        let (_file, store, event) = scheduled_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let scheduler = Scheduler::new(store.clone(), transport.clone(), config());

        let actions = scheduler.tick(start() + Duration::minutes(1)).await;
        assert!(actions.contains(&SchedulerAction::Lock { event_id: event.id }));
        assert!(store.get_event(event.id).await.unwrap().is_locked());
        assert!(transport.dashboards.lock().last().unwrap().status.locked);

        for minute in 2..5 {
            let later = scheduler.tick(start() + Duration::minutes(minute)).await;
            assert!(!later.iter().any(|a| matches!(a, SchedulerAction::Lock { .. })));
        }
        assert!(store.get_event(event.id).await.unwrap().is_locked());
    }

    #[tokio::test]
    async fn auto_lock_is_audited_as_the_scheduler() {
        let (_file, store, _event) = scheduled_store().await;
        let audit = Arc::new(RecordingAudit::default());
        let scheduler = Scheduler::new(
            store.clone(),
            Arc::new(RecordingTransport::default()),
            config(),
        )
        .with_audit(audit.clone());

        scheduler.tick(start() + Duration::minutes(1)).await;
        assert_eq!(*audit.entries.lock(), vec![AuditAction::Locked]);
    }

    #[tokio::test]
    async fn war_posted_for_tomorrow_reminds_and_locks_on_the_day() {
        let (_file, store) = temp_store().await;
        let sessions = SessionManager::new(
            store.clone(),
            DefaultsConfig::default(),
            chrono_tz::Asia::Bangkok,
        );
        sessions.set_schedule(1, "Tomorrow", "19:30").unwrap();
        let location = DeliveryLocation {
            channel_id: 10,
            message_id: 20,
        };
        // posted the evening before the war
        let event = sessions
            .commit_at(1, location, start() - Duration::days(1))
            .await
            .unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let scheduler = Scheduler::new(store.clone(), transport.clone(), config());

        assert!(scheduler.tick(start() - Duration::days(1)).await.is_empty());
        let remind = scheduler.tick(start() - Duration::minutes(25)).await;
        assert!(matches!(remind.as_slice(), [SchedulerAction::Remind { .. }]));
        let lock = scheduler.tick(start() + Duration::minutes(1)).await;
        assert_eq!(lock, vec![SchedulerAction::Lock { event_id: event.id }]);
        assert!(store.get_event(event.id).await.unwrap().is_locked());
    }

    #[tokio::test]
    async fn reschedule_rearms_the_reminder() {
        let (_file, store, event) = scheduled_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let scheduler = Scheduler::new(store.clone(), transport.clone(), config());

        scheduler.tick(start() - Duration::minutes(20)).await;
        store
            .reschedule(event.id, "18/10", "20:30", None)
            .await
            .unwrap();
        let actions = scheduler
            .tick(start() + Duration::minutes(40))
            .await;

        assert!(matches!(actions.as_slice(), [SchedulerAction::Remind { .. }]));
        assert_eq!(transport.reminders.lock().len(), 2);
    }

    struct StallingTransport;

    #[async_trait]
    impl RosterTransport for StallingTransport {
        async fn push_dashboard(
            &self,
            _event: &Event,
            _view: &DashboardView,
        ) -> Result<(), TransportError> {
            futures::future::pending().await
        }

        async fn send_reminder(
            &self,
            _event: &Event,
            _registrations: &[Registration],
        ) -> Result<(), TransportError> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn stalled_delivery_times_out_and_other_events_proceed() {
        let (_file, store, first) = scheduled_store().await;
        let mut new_event = sample_event();
        new_event.date_expr = "18/10".to_string();
        new_event.match_time = "19:00".to_string();
        let second = store.create_event(&new_event).await.unwrap();

        let mut cfg = config();
        cfg.delivery_timeout_seconds = 1;
        let scheduler = Scheduler::new(store.clone(), Arc::new(StallingTransport), cfg);

        let actions = scheduler.tick(start() + Duration::minutes(1)).await;

        assert_eq!(actions.len(), 2);
        assert!(store.get_event(first.id).await.unwrap().is_locked());
        assert!(store.get_event(second.id).await.unwrap().is_locked());
    }

    #[tokio::test]
    async fn closed_events_are_ignored() {
        let (_file, store, event) = scheduled_store().await;
        store
            .close_event(event.id, start().date_naive(), start())
            .await
            .unwrap();
        let scheduler = Scheduler::new(
            store.clone(),
            Arc::new(RecordingTransport::default()),
            config(),
        );
        assert!(scheduler.tick(start() - Duration::minutes(20)).await.is_empty());
    }
}
