//! When is a subscriber due?
//!
//! A subscriber has one potential slot per local calendar day: `[send_time, send_time + window)`
//! in their timezone. The frequency decides which days' slots count. Every trigger (cron,
//! manual, retry) goes through these functions, and the slot's local date is the idempotence
//! key for the email log.

use crate::subscribers::model::{DeliveryPreferences, Frequency};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

const LOOKAHEAD_DAYS: i64 = 62;

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Whether the frequency schedules a send on this local date.
pub fn is_delivery_day(prefs: &DeliveryPreferences, date: NaiveDate) -> bool {
    match prefs.frequency {
        Frequency::Daily => true,
        Frequency::Weekly => date.weekday() == prefs.weekly_day,
        Frequency::Monthly => date.day() == prefs.monthly_day.min(days_in_month(date)),
    }
}

/// The instant the slot on `date` opens. A send time that falls into a DST gap moves forward
/// by an hour; an ambiguous one resolves to the earlier instant.
pub fn slot_start(prefs: &DeliveryPreferences, date: NaiveDate) -> Option<DateTime<Utc>> {
    let local = date.and_time(prefs.send_time.time());
    let tz = prefs.timezone;
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn local_date(prefs: &DeliveryPreferences, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&prefs.timezone).date_naive()
}

/// The local date of the slot `now` falls into, if the subscriber is due at all.
pub fn due_slot(
    prefs: &DeliveryPreferences,
    now: DateTime<Utc>,
    window: Duration,
) -> Option<NaiveDate> {
    let today = local_date(prefs, now);

    let (date, start) = match slot_start(prefs, today) {
        Some(start) if start <= now => (today, start),
        _ => {
            let yesterday = today.pred_opt()?;
            (yesterday, slot_start(prefs, yesterday)?)
        }
    };

    if start > now || now - start >= window {
        return None;
    }
    is_delivery_day(prefs, date).then_some(date)
}

/// First slot opening strictly after `now`.
pub fn next_delivery(prefs: &DeliveryPreferences, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let today = local_date(prefs, now);

    (0..=LOOKAHEAD_DAYS)
        .filter_map(|offset| today.checked_add_signed(Duration::days(offset)))
        .filter(|date| is_delivery_day(prefs, *date))
        .filter_map(|date| slot_start(prefs, date))
        .find(|start| *start > now)
}
