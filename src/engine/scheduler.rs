//! Per-instance deadlines aligned to candle closes.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::Timeframe;

/// Tracks when each instance is next due.
///
/// An instance without a recorded deadline is due immediately, so newly
/// registered instances run before the first sleep.
#[derive(Debug)]
pub struct Scheduler {
    buffer: chrono::Duration,
    idle: Duration,
    next_due: HashMap<i64, DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(buffer: chrono::Duration, idle: Duration) -> Self {
        Self {
            buffer,
            idle,
            next_due: HashMap::new(),
        }
    }

    /// Earliest close-plus-buffer across the timeframes.
    pub fn next_deadline(&self, timeframes: &[Timeframe], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        timeframes
            .iter()
            .map(|tf| tf.next_deadline(now, self.buffer))
            .min()
    }

    pub fn is_due(&self, instance_id: i64, now: DateTime<Utc>) -> bool {
        self.next_due
            .get(&instance_id)
            .map_or(true, |due| *due <= now)
    }

    #[cfg(test)]
    pub fn next_due(&self, instance_id: i64) -> Option<DateTime<Utc>> {
        self.next_due.get(&instance_id).copied()
    }

    pub fn reschedule(&mut self, instance_id: i64, timeframes: &[Timeframe], now: DateTime<Utc>) {
        match self.next_deadline(timeframes, now) {
            Some(due) => {
                self.next_due.insert(instance_id, due);
            }
            None => {
                self.next_due.remove(&instance_id);
            }
        }
    }

    /// Forget instances that are no longer active.
    pub fn retain(&mut self, mut keep: impl FnMut(i64) -> bool) {
        self.next_due.retain(|id, _| keep(*id));
    }

    /// Time until the earliest deadline, clamped at zero; the idle interval
    /// when nothing is scheduled.
    pub fn sleep_duration(&self, now: DateTime<Utc>) -> Duration {
        match self.next_due.values().min() {
            Some(due) => (*due - now).to_std().unwrap_or(Duration::ZERO),
            None => self.idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, h, m, s).unwrap()
    }

    fn tfs(names: &[&str]) -> Vec<Timeframe> {
        names.iter().map(|n| n.parse().unwrap()).collect()
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(chrono::Duration::seconds(5), Duration::from_secs(10))
    }

    #[test]
    fn test_new_instance_is_due_immediately() {
        let s = scheduler();
        assert!(s.is_due(1, at(12, 37, 0)));
        assert_eq!(s.next_due(1), None);
    }

    #[test]
    fn test_deadline_is_min_across_timeframes() {
        let s = scheduler();
        let due = s.next_deadline(&tfs(&["1h", "4h", "1d"]), at(12, 37, 0)).unwrap();
        assert_eq!(due, at(13, 0, 5));
        let due = s.next_deadline(&tfs(&["15m", "1h"]), at(12, 37, 0)).unwrap();
        assert_eq!(due, at(12, 45, 5));
        assert!(s.next_deadline(&[], at(12, 37, 0)).is_none());
    }

    #[test]
    fn test_reschedule_and_sleep() {
        let mut s = scheduler();
        s.reschedule(1, &tfs(&["1h"]), at(12, 37, 0));
        s.reschedule(2, &tfs(&["15m"]), at(12, 37, 0));

        assert!(!s.is_due(1, at(12, 37, 0)));
        assert!(s.is_due(2, at(12, 45, 5)));
        assert_eq!(s.sleep_duration(at(12, 37, 0)), Duration::from_secs(8 * 60 + 5));
        // Overdue clamps to zero
        assert_eq!(s.sleep_duration(at(13, 30, 0)), Duration::ZERO);
    }

    #[test]
    fn test_idle_when_nothing_scheduled() {
        let mut s = scheduler();
        assert_eq!(s.sleep_duration(at(12, 0, 0)), Duration::from_secs(10));
        s.reschedule(1, &tfs(&["1h"]), at(12, 0, 0));
        s.retain(|id| id != 1);
        assert_eq!(s.sleep_duration(at(12, 0, 0)), Duration::from_secs(10));
    }
}
