//! Timestamps, time windows and clocks.
//!
//! Every timestamp inside the crate is nanoseconds since the UNIX epoch.
//! Storage metadata is recorded in milliseconds and is converted with
//! [`Timestamp::from_millis`] where it is read.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::{Error, Result};

const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_SEC: i64 = 1_000_000_000;

/// An instant in nanoseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const UNIX_EPOCH: Timestamp = Timestamp(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(NANOS_PER_MILLI))
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(NANOS_PER_SEC))
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub const fn as_millis(self) -> i64 {
        self.0 / NANOS_PER_MILLI
    }

    /// Parses `YYYY-MM-DD HH:MM:SS`, interpreted as UTC.
    pub fn parse(value: &str) -> Result<Self> {
        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let parsed = PrimitiveDateTime::parse(value.trim(), format).map_err(|err| {
            Error::Configuration(format!(
                "invalid time {value:?} (expected yyyy-mm-dd hh:mm:ss): {err}"
            ))
        })?;
        Self::try_from_datetime(parsed.assume_utc())
    }

    pub fn try_from_datetime(datetime: OffsetDateTime) -> Result<Self> {
        let nanos = i64::try_from(datetime.unix_timestamp_nanos()).map_err(|_| {
            Error::Configuration(format!("time {datetime} is outside the supported range"))
        })?;
        Ok(Self(nanos))
    }

    pub fn to_datetime(self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0)).ok()
    }

    pub fn saturating_sub_secs(self, secs: i64) -> Self {
        Self(self.0.saturating_sub(secs.saturating_mul(NANOS_PER_SEC)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let formatted = self.to_datetime().and_then(|datetime| datetime.format(format).ok());
        match formatted {
            Some(text) => f.write_str(&text),
            None => write!(f, "{}ns", self.0),
        }
    }
}

/// A closed `[start, end]` window requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    start: Timestamp,
    end: Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self> {
        if start > end {
            return Err(Error::Configuration(format!(
                "min time ({start}) cannot be after max time ({end})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn from_nanos(start: i64, end: i64) -> Result<Self> {
        Self::new(Timestamp::from_nanos(start), Timestamp::from_nanos(end))
    }

    /// Fills in missing endpoints: `end` defaults to `clock`'s now and
    /// `start` to `default_span_secs` before `end`.
    pub fn resolve(
        clock: &dyn Clock,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
        default_span_secs: i64,
    ) -> Result<Self> {
        let end = end.unwrap_or_else(|| clock.now());
        let start = start.unwrap_or_else(|| end.saturating_sub_secs(default_span_secs));
        Self::new(start, end)
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Rejects windows reaching past the clock's now.
    pub fn ensure_not_future(&self, clock: &dyn Clock) -> Result<()> {
        let now = clock.now();
        if self.start > now {
            return Err(Error::Configuration(format!(
                "min time ({}) cannot be after now ({now})",
                self.start
            )));
        }
        if self.end > now {
            return Err(Error::Configuration(format!(
                "max time ({}) cannot be after now ({now})",
                self.end
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// A source of "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time from `std::time::SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Timestamp(i64::try_from(nanos).unwrap_or(i64::MAX))
    }
}

/// A clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub Timestamp);

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0
    }
}
