//! Minute-precision timestamps.
//!
//! Articles and comments store their dates as `YYYY-MM-DD HH:MM` strings.
//! [`Timestamp`] is the value type behind those strings, with a serde codec
//! that reads and writes exactly that pattern.

use core::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use time::{
    OffsetDateTime, PrimitiveDateTime,
    format_description::BorrowedFormatItem,
    macros::{datetime, format_description},
};

const FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");

/// A point in time, truncated to the minute, without an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(PrimitiveDateTime);

/// The given string is not a `YYYY-MM-DD HH:MM` timestamp
#[derive(Debug, thiserror::Error)]
#[error("Invalid timestamp `{input}`, expected `YYYY-MM-DD HH:MM`")]
pub struct InvalidTimestamp {
    input: String,
}

impl Timestamp {
    /// The zero time, `0001-01-01 00:00`.
    pub const ZERO: Self = Self(datetime!(0001-01-01 0:00));

    /// Wrap a date time, dropping seconds and anything smaller.
    #[must_use]
    pub fn new(datetime: PrimitiveDateTime) -> Self {
        let truncated = datetime
            .replace_second(0)
            .and_then(|datetime| datetime.replace_nanosecond(0))
            .unwrap_or(datetime);
        Self(truncated)
    }

    /// Current UTC time.
    #[must_use]
    pub fn now() -> Self {
        let now = OffsetDateTime::now_utc();
        Self::new(PrimitiveDateTime::new(now.date(), now.time()))
    }

    /// Parse a `YYYY-MM-DD HH:MM` string.
    ///
    /// # Errors
    /// Returns [`InvalidTimestamp`] if the input does not follow the pattern exactly.
    pub fn parse(input: &str) -> Result<Self, InvalidTimestamp> {
        PrimitiveDateTime::parse(input, FORMAT)
            .map(Self)
            .map_err(|_| InvalidTimestamp {
                input: input.to_string(),
            })
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Interpret the timestamp as UTC.
    #[must_use]
    pub const fn to_offset(&self) -> OffsetDateTime {
        self.0.assume_utc()
    }

    #[must_use]
    pub const fn datetime(&self) -> PrimitiveDateTime {
        self.0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = self.0.format(FORMAT).map_err(|_| fmt::Error)?;
        f.write_str(&formatted)
    }
}

impl FromStr for Timestamp {
    type Err = InvalidTimestamp;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(de::Error::custom)
    }
}
