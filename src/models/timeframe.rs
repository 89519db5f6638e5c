//! Candle timeframes and their close-time alignment.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// 1970-01-05 was the first Monday after the epoch.
const FIRST_MONDAY_OFFSET: i64 = 4 * DAY;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeframeError {
    #[error("empty timeframe")]
    Empty,
    #[error("invalid timeframe count in '{0}'")]
    InvalidCount(String),
    #[error("unsupported timeframe unit in '{0}' (expected m, h, d or w)")]
    UnsupportedUnit(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    fn suffix(&self) -> char {
        match self {
            TimeUnit::Minute => 'm',
            TimeUnit::Hour => 'h',
            TimeUnit::Day => 'd',
            TimeUnit::Week => 'w',
        }
    }

    fn seconds(&self) -> i64 {
        match self {
            TimeUnit::Minute => MINUTE,
            TimeUnit::Hour => HOUR,
            TimeUnit::Day => DAY,
            TimeUnit::Week => WEEK,
        }
    }
}

/// A fixed candle bucket such as `15m`, `1h`, `4h`, `1d` or `1w`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    count: u32,
    unit: TimeUnit,
}

impl Timeframe {
    pub fn new(count: u32, unit: TimeUnit) -> Result<Self, TimeframeError> {
        if count == 0 {
            return Err(TimeframeError::InvalidCount(format!("0{}", unit.suffix())));
        }
        Ok(Self { count, unit })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Length of one candle in seconds.
    pub fn duration_secs(&self) -> i64 {
        self.count as i64 * self.unit.seconds()
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_secs() * 1000
    }

    /// The first candle close strictly after `now`.
    ///
    /// Minute timeframes align to multiples of their own length, hour
    /// timeframes to the top of the next hour, day timeframes to the next UTC
    /// midnight and week timeframes to the next Monday 00:00 UTC.
    pub fn next_close_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ts = now.timestamp();
        let next = match self.unit {
            TimeUnit::Minute => {
                let step = self.duration_secs();
                (ts.div_euclid(step) + 1) * step
            }
            TimeUnit::Hour => (ts.div_euclid(HOUR) + 1) * HOUR,
            TimeUnit::Day => (ts.div_euclid(DAY) + 1) * DAY,
            TimeUnit::Week => {
                let shifted = ts - FIRST_MONDAY_OFFSET;
                (shifted.div_euclid(WEEK) + 1) * WEEK + FIRST_MONDAY_OFFSET
            }
        };
        Utc.timestamp_opt(next, 0).single().unwrap_or(now)
    }

    /// When the next candle close becomes safe to fetch: the close plus `buffer`.
    ///
    /// A close whose buffer has not yet elapsed is still the next deadline, so
    /// a cycle that runs a little early does not skip a candle.
    pub fn next_deadline(&self, now: DateTime<Utc>, buffer: Duration) -> DateTime<Utc> {
        self.next_close_after(now - buffer) + buffer
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let unit_char = s.chars().last().ok_or(TimeframeError::Empty)?;
        let unit = match unit_char {
            'm' => TimeUnit::Minute,
            'h' => TimeUnit::Hour,
            'd' => TimeUnit::Day,
            'w' => TimeUnit::Week,
            _ => return Err(TimeframeError::UnsupportedUnit(s.to_string())),
        };
        let count: u32 = s[..s.len() - unit_char.len_utf8()]
            .parse()
            .map_err(|_| TimeframeError::InvalidCount(s.to_string()))?;
        Self::new(count, unit).map_err(|_| TimeframeError::InvalidCount(s.to_string()))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = TimeframeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_and_display() {
        let tf: Timeframe = "15m".parse().unwrap();
        assert_eq!(tf.duration_secs(), 900);
        assert_eq!(tf.to_string(), "15m");
        assert_eq!("4h".parse::<Timeframe>().unwrap().duration_secs(), 4 * 3600);
        assert_eq!("1w".parse::<Timeframe>().unwrap().duration_secs(), 7 * 86400);

        assert!(matches!("".parse::<Timeframe>(), Err(TimeframeError::Empty)));
        assert!(matches!("0h".parse::<Timeframe>(), Err(TimeframeError::InvalidCount(_))));
        assert!(matches!("1M".parse::<Timeframe>(), Err(TimeframeError::UnsupportedUnit(_))));
        assert!(matches!("xh".parse::<Timeframe>(), Err(TimeframeError::InvalidCount(_))));
    }

    #[test]
    fn test_serde_as_string() {
        let tfs: Vec<Timeframe> = serde_json::from_str(r#"["1h","4h","1d"]"#).unwrap();
        assert_eq!(tfs.len(), 3);
        assert_eq!(serde_json::to_string(&tfs).unwrap(), r#"["1h","4h","1d"]"#);
        assert!(serde_json::from_str::<Timeframe>(r#""3x""#).is_err());
    }

    #[test]
    fn test_hourly_deadline_at_minute_37() {
        let tf: Timeframe = "1h".parse().unwrap();
        let now = at("2024-03-14T12:37:00Z");
        let deadline = tf.next_deadline(now, Duration::seconds(5));
        assert_eq!((deadline - now).num_seconds(), 23 * 60 + 5);
    }

    #[test]
    fn test_minute_alignment() {
        let tf: Timeframe = "15m".parse().unwrap();
        let now = at("2024-03-14T12:37:10Z");
        assert_eq!(tf.next_close_after(now), at("2024-03-14T12:45:00Z"));

        // Exactly on a boundary moves to the following one.
        let now = at("2024-03-14T12:45:00Z");
        assert_eq!(tf.next_close_after(now), at("2024-03-14T13:00:00Z"));
    }

    #[test]
    fn test_deadline_inside_buffer_keeps_current_close() {
        let tf: Timeframe = "1h".parse().unwrap();
        let now = at("2024-03-14T13:00:02Z");
        let deadline = tf.next_deadline(now, Duration::seconds(5));
        assert_eq!(deadline, at("2024-03-14T13:00:05Z"));

        let now = at("2024-03-14T13:00:05Z");
        let deadline = tf.next_deadline(now, Duration::seconds(5));
        assert_eq!(deadline, at("2024-03-14T14:00:05Z"));
    }

    #[test]
    fn test_day_and_week_alignment() {
        let day: Timeframe = "1d".parse().unwrap();
        assert_eq!(
            day.next_close_after(at("2024-03-14T12:37:00Z")),
            at("2024-03-15T00:00:00Z")
        );

        // 2024-03-14 is a Thursday; the next Monday is 2024-03-18.
        let week: Timeframe = "1w".parse().unwrap();
        assert_eq!(
            week.next_close_after(at("2024-03-14T12:37:00Z")),
            at("2024-03-18T00:00:00Z")
        );
        assert_eq!(
            week.next_close_after(at("2024-03-18T00:00:00Z")),
            at("2024-03-25T00:00:00Z")
        );
    }
}
