// =============================================================================
// Scheduler triggers (C6)
// =============================================================================
//
// Three trigger kinds, all reduced to one operation: given "now" (ms since
// epoch) and an optional last fire time, compute the next fire time. No
// cron crate is pulled in for this; the cron matcher is a small hand-rolled
// minute/hour/dow/dom/month scan, self-contained rather than reaching for a
// dependency for a narrow need.
// =============================================================================

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A field in a cron spec: `None` matches every value, `Some(set)` matches
/// only the listed values.
pub type CronField = Option<Vec<u32>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSpec {
    pub minute: CronField,
    pub hour: CronField,
    pub dow: CronField,
    pub dom: CronField,
    pub month: CronField,
}

impl CronSpec {
    fn matches(field: &CronField, value: u32) -> bool {
        field.as_ref().is_none_or_contains(value)
    }

    fn matches_at(&self, dt: &DateTime<Utc>) -> bool {
        Self::matches(&self.minute, dt.minute())
            && Self::matches(&self.hour, dt.hour())
            && Self::matches(&self.dow, dt.weekday().num_days_from_sunday())
            && Self::matches(&self.dom, dt.day())
            && Self::matches(&self.month, dt.month())
    }
}

trait FieldExt {
    fn is_none_or_contains(&self, value: u32) -> bool;
}

impl FieldExt for Option<&Vec<u32>> {
    fn is_none_or_contains(&self, value: u32) -> bool {
        match self {
            None => true,
            Some(set) => set.contains(&value),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IntervalSpec {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl IntervalSpec {
    pub fn total_ms(&self) -> i64 {
        let total_s = self.days as i64 * 86_400 + self.hours as i64 * 3_600 + self.minutes as i64 * 60 + self.seconds as i64;
        total_s * 1000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Trigger {
    Interval(IntervalSpec),
    Cron(CronSpec),
    OneShot { at: i64 },
}

impl Trigger {
    /// Compute the next fire time (ms since epoch) strictly after `after`.
    /// Returns `None` for an exhausted one-shot trigger.
    pub fn next_fire_after(&self, after: i64) -> Option<i64> {
        match self {
            Trigger::Interval(spec) => {
                let step = spec.total_ms().max(1000);
                Some(after + step)
            }
            Trigger::Cron(spec) => {
                let start = DateTime::<Utc>::from_timestamp_millis(after + 60_000)
                    .unwrap_or_else(Utc::now)
                    .with_second(0)
                    .unwrap()
                    .with_nanosecond(0)
                    .unwrap();
                // Scan forward up to two years of minutes; cron specs with
                // legal field values always resolve well within this bound.
                let limit = 2 * 366 * 24 * 60;
                let mut cursor = start;
                for _ in 0..limit {
                    if spec.matches_at(&cursor) {
                        return Some(cursor.timestamp_millis());
                    }
                    cursor += ChronoDuration::minutes(1);
                }
                None
            }
            Trigger::OneShot { at } => {
                if *at > after {
                    Some(*at)
                } else {
                    None
                }
            }
        }
    }

    /// The very first fire time for a freshly added job.
    pub fn first_fire(&self, now: i64) -> Option<i64> {
        match self {
            Trigger::OneShot { at } if *at > now => Some(*at),
            Trigger::OneShot { .. } => None,
            _ => self.next_fire_after(now - 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_advances_by_exact_step() {
        let trigger = Trigger::Interval(IntervalSpec { days: 0, hours: 0, minutes: 1, seconds: 0 });
        let next = trigger.next_fire_after(0).unwrap();
        assert_eq!(next, 60_000);
    }

    #[test]
    fn one_shot_fires_once_then_exhausts() {
        let trigger = Trigger::OneShot { at: 5_000 };
        assert_eq!(trigger.first_fire(0), Some(5_000));
        assert_eq!(trigger.next_fire_after(5_000), None);
        assert_eq!(trigger.next_fire_after(4_000), Some(5_000));
    }

    #[test]
    fn cron_every_minute_matches_field_none() {
        let spec = CronSpec { minute: None, hour: None, dow: None, dom: None, month: None };
        let trigger = Trigger::Cron(spec);
        let now = DateTime::<Utc>::from_timestamp(0, 0).unwrap().timestamp_millis();
        let next = trigger.next_fire_after(now).unwrap();
        assert_eq!(next, now + 60_000);
    }

    #[test]
    fn cron_specific_minute_is_honored() {
        let spec = CronSpec { minute: Some(vec![30]), hour: None, dow: None, dom: None, month: None };
        let trigger = Trigger::Cron(spec);
        let now = DateTime::<Utc>::from_timestamp(0, 0).unwrap().timestamp_millis(); // 1970-01-01T00:00:00Z
        let next = trigger.next_fire_after(now).unwrap();
        let dt = DateTime::<Utc>::from_timestamp_millis(next).unwrap();
        assert_eq!(dt.minute(), 30);
        assert_eq!(dt.hour(), 0);
    }

    #[test]
    fn cron_combined_hour_and_minute() {
        let spec = CronSpec { minute: Some(vec![0]), hour: Some(vec![3]), dow: None, dom: None, month: None };
        let trigger = Trigger::Cron(spec);
        let now = DateTime::<Utc>::from_timestamp(0, 0).unwrap().timestamp_millis();
        let next = trigger.next_fire_after(now).unwrap();
        let dt = DateTime::<Utc>::from_timestamp_millis(next).unwrap();
        assert_eq!(dt.hour(), 3);
        assert_eq!(dt.minute(), 0);
    }
}
