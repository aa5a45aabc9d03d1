// libs/appointment-cell/src/services/clock.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{BreakPolicy, DoctorTimings};

const MINUTES_PER_HOUR: u16 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("Invalid time '{0}', expected HH:MM")]
    Malformed(String),

    #[error("Time '{0}' is outside of a 24-hour day")]
    OutOfRange(String),
}

/// Wall-clock time of day stored as minutes since midnight.
///
/// Parsed from and rendered as zero-padded `"HH:MM"`. Values produced by
/// [`ClockTime::add_minutes`] may run past 24:00; they are never wrapped,
/// so comparisons against the end of a working day stay meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn from_hm(hours: u16, minutes: u16) -> Result<Self, ClockError> {
        if hours > 23 || minutes >= MINUTES_PER_HOUR {
            return Err(ClockError::OutOfRange(format!("{}:{:02}", hours, minutes)));
        }
        Ok(Self(hours * MINUTES_PER_HOUR + minutes))
    }

    pub const fn from_minutes(minutes: u16) -> Self {
        Self(minutes)
    }

    pub const fn minutes(self) -> u16 {
        self.0
    }

    pub fn add_minutes(self, minutes: u16) -> Self {
        Self(self.0.saturating_add(minutes))
    }
}

impl FromStr for ClockTime {
    type Err = ClockError;

    /// Accepts `H:MM`, `HH:MM` and the `HH:MM:SS` form Postgres returns for
    /// `time` columns; seconds are ignored.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        let mut parts = value.split(':');

        let (hours, minutes) = match (parts.next(), parts.next()) {
            (Some(h), Some(m)) => (h, m),
            _ => return Err(ClockError::Malformed(raw.to_string())),
        };
        if let Some(seconds) = parts.next() {
            if parts.next().is_some() || seconds.len() != 2 || !seconds.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ClockError::Malformed(raw.to_string()));
            }
        }

        let digits = |s: &str, max_len: usize| {
            !s.is_empty() && s.len() <= max_len && s.bytes().all(|b| b.is_ascii_digit())
        };
        if !digits(hours, 2) || minutes.len() != 2 || !digits(minutes, 2) {
            return Err(ClockError::Malformed(raw.to_string()));
        }

        let hours: u16 = hours.parse().map_err(|_| ClockError::Malformed(raw.to_string()))?;
        let minutes: u16 = minutes.parse().map_err(|_| ClockError::Malformed(raw.to_string()))?;

        Self::from_hm(hours, minutes).map_err(|_| ClockError::OutOfRange(raw.to_string()))
    }
}

impl TryFrom<String> for ClockTime {
    type Error = ClockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / MINUTES_PER_HOUR, self.0 % MINUTES_PER_HOUR)
    }
}

pub fn add_minutes(time: ClockTime, minutes: u16) -> ClockTime {
    time.add_minutes(minutes)
}

/// Half-open: a slot may start exactly at `break_end` but not at `break_start`.
pub fn is_in_break(time: ClockTime, timings: &DoctorTimings) -> bool {
    timings.break_start <= time && time < timings.break_end
}

pub fn skip_break_if_needed(time: ClockTime, timings: &DoctorTimings) -> ClockTime {
    if is_in_break(time, timings) {
        timings.break_end
    } else {
        time
    }
}

/// True when `[time, time + minutes)` intersects `[break_start, break_end)`.
pub fn overlaps_break(time: ClockTime, minutes: u16, timings: &DoctorTimings) -> bool {
    let end = time.add_minutes(minutes);
    time < timings.break_end && timings.break_start < end
}

impl BreakPolicy {
    /// Start time for a visit of `minutes` whose natural start is `cursor`.
    pub fn place(self, cursor: ClockTime, minutes: u16, timings: &DoctorTimings) -> ClockTime {
        match self {
            BreakPolicy::StartOnly => skip_break_if_needed(cursor, timings),
            BreakPolicy::RejectOverlap if overlaps_break(cursor, minutes, timings) => timings.break_end,
            BreakPolicy::RejectOverlap => cursor,
        }
    }
}
