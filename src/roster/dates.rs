//! Resolution of the free-form date and time strings organizers type into a
//! concrete instant in the guild's timezone.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// A `DD/MM` date further in the past than this is read as next year's.
pub const ROLLOVER_DAYS: i64 = 183;

const TODAY_KEYWORDS: [&str; 2] = ["today", "วันนี้"];
const TOMORROW_KEYWORDS: [&str; 2] = ["tomorrow", "พรุ่งนี้"];

/// Parses `HH:MM` or `HH.MM`.
pub fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    let (hours, minutes) = raw.split_once(':').or_else(|| raw.split_once('.'))?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return None;
    }
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    NaiveTime::from_hms_opt(hours, minutes, 0)
}

/// Canonical `HH:MM` form of a clock literal, if it parses.
pub fn normalize_clock(raw: &str) -> Option<String> {
    parse_clock(raw).map(|t| t.format("%H:%M").to_string())
}

/// Resolves a date expression against `today` (already in the guild's timezone).
pub fn resolve_date(expr: &str, today: NaiveDate) -> Option<NaiveDate> {
    let expr = expr.trim().to_lowercase();

    if TODAY_KEYWORDS.contains(&expr.as_str()) {
        return Some(today);
    }
    if TOMORROW_KEYWORDS.contains(&expr.as_str()) {
        return today.checked_add_days(Days::new(1));
    }

    let (day, month) = expr.split_once('/').or_else(|| expr.split_once('-'))?;
    let day: u32 = day.trim().parse().ok()?;
    let month: u32 = month.trim().parse().ok()?;

    let date = NaiveDate::from_ymd_opt(today.year(), month, day)?;
    if (today - date).num_days() > ROLLOVER_DAYS {
        NaiveDate::from_ymd_opt(today.year() + 1, month, day)
    } else {
        Some(date)
    }
}

fn is_relative(expr: &str) -> bool {
    let expr = expr.trim().to_lowercase();
    TODAY_KEYWORDS.contains(&expr.as_str()) || TOMORROW_KEYWORDS.contains(&expr.as_str())
}

/// Replaces "today"/"tomorrow" with the `DD/MM` they mean at `now`, so a
/// stored date does not move with the clock. Anything else comes back trimmed.
pub fn pin_date(expr: &str, now: DateTime<Utc>, tz: Tz) -> String {
    let expr = expr.trim();
    if !is_relative(expr) {
        return expr.to_string();
    }
    let today = now.with_timezone(&tz).date_naive();
    resolve_date(expr, today)
        .map(|date| date.format("%d/%m").to_string())
        .unwrap_or_else(|| expr.to_string())
}

/// Combines a date expression and a clock literal into one instant.
///
/// Returns `None` on anything unparseable, and for local times that do not
/// exist in `tz` (DST gaps). Ambiguous local times resolve to the earlier one.
pub fn resolve_instant(
    date_expr: &str,
    clock: &str,
    now: DateTime<Utc>,
    tz: Tz,
) -> Option<DateTime<Tz>> {
    let today = now.with_timezone(&tz).date_naive();
    let date = resolve_date(date_expr, today)?;
    let time = parse_clock(clock)?;
    tz.from_local_datetime(&date.and_time(time)).earliest()
}

/// Date labels offered by the setup date picker: today, tomorrow, then the
/// following twelve days as `DD/MM`.
pub fn upcoming_dates(now: DateTime<Utc>, tz: Tz) -> Vec<(String, NaiveDate)> {
    let today = now.with_timezone(&tz).date_naive();
    (0..14u64)
        .filter_map(|offset| {
            let date = today.checked_add_days(Days::new(offset))?;
            let value = match offset {
                0 => "Today".to_string(),
                1 => "Tomorrow".to_string(),
                _ => date.format("%d/%m").to_string(),
            };
            Some((value, date))
        })
        .collect()
}
