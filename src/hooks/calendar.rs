//! Shared calendar with recurring events.
//!
//! Recurrence is stored as a compact rule on the event; replicas expand
//! instances locally and deterministically, so the rule replicates instead
//! of the instances. Detaching one instance appends its timestamp to the
//! event's exception list, which merges as a set under concurrency.

use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use serde_json::json;

use crate::doc::records::{CalendarEvent, Frequency, RecurrenceEnd};
use crate::doc::{Container, DocHandle};
use crate::error::Result;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Upper bound on generated candidates per expansion call. A rule that
/// never intersects the requested range still terminates.
pub const MAX_EXPANSION_STEPS: usize = 1000;

pub struct Calendar {
    doc: DocHandle,
}

impl Calendar {
    pub fn new(doc: DocHandle) -> Self {
        Self { doc }
    }

    pub fn all(&self) -> Vec<CalendarEvent> {
        self.doc.typed_records(Container::CalendarEvents)
    }

    pub fn add(&self, event: &CalendarEvent) -> Result<()> {
        self.doc.insert(Container::CalendarEvents, event)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        self.doc.remove(Container::CalendarEvents, id)
    }

    /// Detach one instance of a recurring event. Adding the same instant
    /// twice (or concurrently from two devices) leaves a single entry.
    pub fn add_exception(&self, event_id: &str, instant: i64) -> Result<()> {
        self.doc
            .push_field_value(Container::CalendarEvents, event_id, "exceptions", &json!(instant))
    }

    /// Every occurrence of every event intersecting `[range_start, range_end]`,
    /// as `(event id, instant)` pairs ordered by instant.
    pub fn occurrences_between(&self, range_start: i64, range_end: i64) -> Vec<(String, i64)> {
        let mut out = Vec::new();
        for event in self.all() {
            for ts in expand_occurrences(&event, range_start, range_end) {
                out.push((event.id.clone(), ts));
            }
        }
        out.sort_by_key(|(_, ts)| *ts);
        out
    }
}

/// Expand a single event into instance timestamps within the inclusive
/// range. Pure: identical inputs produce identical output on every
/// replica. Exceptions are dropped from the output but still count toward
/// a `Count` terminator, so detaching an instance never shifts the rest
/// of the series.
pub fn expand_occurrences(event: &CalendarEvent, range_start: i64, range_end: i64) -> Vec<i64> {
    let Some(rule) = &event.recurrence else {
        let ts = event.start;
        if ts >= range_start && ts <= range_end && !event.exceptions.contains(&ts) {
            return vec![ts];
        }
        return Vec::new();
    };

    let interval = i64::from(rule.interval.max(1));
    let mut out = Vec::new();
    let mut produced: u32 = 0;
    let mut steps = 0usize;

    // Returns false when the series is exhausted past `ts`.
    let take = |ts: i64, produced: &mut u32, out: &mut Vec<i64>| -> bool {
        match rule.end {
            RecurrenceEnd::Until { until } if ts > until => return false,
            RecurrenceEnd::Count { count } if *produced >= count => return false,
            _ => {}
        }
        *produced += 1;
        if ts > range_end {
            return false;
        }
        if ts >= range_start && !event.exceptions.contains(&ts) {
            out.push(ts);
        }
        true
    };

    match rule.frequency {
        Frequency::Daily => loop {
            if steps >= MAX_EXPANSION_STEPS {
                break;
            }
            let ts = event.start + steps as i64 * interval * DAY_MS;
            steps += 1;
            if !take(ts, &mut produced, &mut out) {
                break;
            }
        },
        Frequency::Weekly => {
            let Some(start) = millis_to_utc(event.start) else {
                return out;
            };
            let mut days: Vec<i64> = rule
                .days_of_week
                .iter()
                .copied()
                .filter(|d| *d < 7)
                .map(i64::from)
                .collect();
            if days.is_empty() {
                days.push(i64::from(start.weekday().num_days_from_sunday()));
            }
            days.sort_unstable();
            days.dedup();
            let start_dow = i64::from(start.weekday().num_days_from_sunday());

            'weeks: for week in 0.. {
                for &dow in &days {
                    if steps >= MAX_EXPANSION_STEPS {
                        break 'weeks;
                    }
                    let offset_days = week * interval * 7 + dow - start_dow;
                    // Anchor week may hold slots before the series start.
                    if offset_days < 0 {
                        continue;
                    }
                    steps += 1;
                    let ts = event.start + offset_days * DAY_MS;
                    if !take(ts, &mut produced, &mut out) {
                        break 'weeks;
                    }
                }
            }
        }
        Frequency::Monthly | Frequency::Yearly => {
            let Some(start) = millis_to_utc(event.start) else {
                return out;
            };
            let step_months = match rule.frequency {
                Frequency::Yearly => interval * 12,
                _ => interval,
            };
            loop {
                if steps >= MAX_EXPANSION_STEPS {
                    break;
                }
                let months = steps as i64 * step_months;
                steps += 1;
                // Day-of-month clamps to the target month's last day.
                let Ok(months) = u32::try_from(months) else {
                    break;
                };
                let Some(instant) = start.checked_add_months(Months::new(months)) else {
                    break;
                };
                if !take(instant.timestamp_millis(), &mut produced, &mut out) {
                    break;
                }
            }
        }
    }
    out
}

fn millis_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ts).single()
}
