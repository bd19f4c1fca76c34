use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;
use salvo::http::HeaderValue;
use salvo::http::header::CONTENT_TYPE;
use salvo::prelude::*;

static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);

static INTERACTIONS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static REGISTRATIONS_SAVED: AtomicU64 = AtomicU64::new(0);
static REGISTRATIONS_REJECTED: AtomicU64 = AtomicU64::new(0);
static DASHBOARD_PUSH_SUCCESS: AtomicU64 = AtomicU64::new(0);
static DASHBOARD_PUSH_FAILED: AtomicU64 = AtomicU64::new(0);
static REMINDERS_SENT: AtomicU64 = AtomicU64::new(0);
static AUTO_LOCKS: AtomicU64 = AtomicU64::new(0);
static SCHEDULER_TICKS: AtomicU64 = AtomicU64::new(0);

pub struct Metrics;

impl Metrics {
    /// Pins the uptime origin; later calls are no-ops.
    pub fn init() {
        Lazy::force(&STARTED_AT);
    }

    pub fn interaction_received() {
        INTERACTIONS_RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn registration_saved() {
        REGISTRATIONS_SAVED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn registration_rejected() {
        REGISTRATIONS_REJECTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dashboard_push(success: bool) {
        if success {
            DASHBOARD_PUSH_SUCCESS.fetch_add(1, Ordering::Relaxed);
        } else {
            DASHBOARD_PUSH_FAILED.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn reminder_sent() {
        REMINDERS_SENT.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auto_lock() {
        AUTO_LOCKS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scheduler_tick() {
        SCHEDULER_TICKS.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn format_prometheus() -> String {
    let counters: [(&str, &str, &str, u64); 8] = [
        (
            "roster_interactions_received_total",
            "Discord interactions handled",
            "counter",
            INTERACTIONS_RECEIVED.load(Ordering::Relaxed),
        ),
        (
            "roster_registrations_saved_total",
            "Registrations written, including absences",
            "counter",
            REGISTRATIONS_SAVED.load(Ordering::Relaxed),
        ),
        (
            "roster_registrations_rejected_total",
            "Registration steps rejected as invalid or locked",
            "counter",
            REGISTRATIONS_REJECTED.load(Ordering::Relaxed),
        ),
        (
            "roster_dashboard_push_success_total",
            "Dashboard messages updated",
            "counter",
            DASHBOARD_PUSH_SUCCESS.load(Ordering::Relaxed),
        ),
        (
            "roster_dashboard_push_failed_total",
            "Dashboard updates that failed or timed out",
            "counter",
            DASHBOARD_PUSH_FAILED.load(Ordering::Relaxed),
        ),
        (
            "roster_reminders_sent_total",
            "Pre-war reminders delivered",
            "counter",
            REMINDERS_SENT.load(Ordering::Relaxed),
        ),
        (
            "roster_auto_locks_total",
            "Events locked by the scheduler",
            "counter",
            AUTO_LOCKS.load(Ordering::Relaxed),
        ),
        (
            "roster_scheduler_ticks_total",
            "Scheduler passes over live events",
            "counter",
            SCHEDULER_TICKS.load(Ordering::Relaxed),
        ),
    ];

    let mut out = format!(
        "# HELP roster_uptime_seconds Number of seconds the bot has been running\n\
         # TYPE roster_uptime_seconds gauge\n\
         roster_uptime_seconds {}\n",
        STARTED_AT.elapsed().as_secs()
    );
    for (name, help, kind, value) in counters {
        out.push_str(&format!(
            "\n# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n"
        ));
    }
    out
}

#[handler]
pub async fn metrics_endpoint(res: &mut Response) {
    res.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    res.body(format_prometheus());
}
