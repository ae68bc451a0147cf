//! Nanosecond-precision UTC instants, and their textual chunk-id form.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// An absolute point in time, UTC, nanosecond precision.
///
/// Ordering and equality are exact at the nanosecond; two `AbsTimestamp`s
/// are equal iff their formatted chunk ids would be identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AbsTimestamp {
    /// Nanoseconds since the Unix epoch.
    nanos_since_epoch: i128,
}

impl AbsTimestamp {
    pub const ZERO: AbsTimestamp = AbsTimestamp {
        nanos_since_epoch: 0,
    };

    pub fn now() -> Self {
        Self::from_jiff(Timestamp::now())
    }

    pub fn from_jiff(ts: Timestamp) -> Self {
        let nanos = ts.as_nanosecond();
        AbsTimestamp {
            nanos_since_epoch: nanos,
        }
    }

    pub fn to_jiff(self) -> Timestamp {
        Timestamp::from_nanosecond(self.nanos_since_epoch)
            .expect("AbsTimestamp always holds a value jiff produced")
    }

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    pub fn checked_sub_nanos(self, nanos: i128) -> Option<Self> {
        self.nanos_since_epoch
            .checked_sub(nanos)
            .map(|nanos_since_epoch| AbsTimestamp { nanos_since_epoch })
    }

    /// Formats as `YYYYMMDD_HHMMSS.nnnnnnnnn`, the on-disk chunk-id form.
    pub fn format_chunk_id(self) -> String {
        let zoned = self.to_jiff().to_zoned(jiff::tz::TimeZone::UTC);
        format!(
            "{year:04}{month:02}{day:02}_{hour:02}{minute:02}{second:02}.{nanos:09}",
            year = zoned.year(),
            month = zoned.month(),
            day = zoned.day(),
            hour = zoned.hour(),
            minute = zoned.minute(),
            second = zoned.second(),
            nanos = zoned.subsec_nanosecond(),
        )
    }

    /// Parses the `YYYYMMDD_HHMMSS.nnnnnnnnn` chunk-id form back into a
    /// timestamp. Used both for `ChunkId::parse` and for `start.idx`.
    pub fn parse_chunk_id(s: &str) -> Result<Self, ParseTimestampError> {
        let (date_and_time, nanos_str) = s
            .split_once('.')
            .ok_or_else(|| ParseTimestampError::Malformed(s.to_string()))?;
        let (date, time) = date_and_time
            .split_once('_')
            .ok_or_else(|| ParseTimestampError::Malformed(s.to_string()))?;

        if date.len() != 8 || time.len() != 6 || nanos_str.len() != 9 {
            return Err(ParseTimestampError::Malformed(s.to_string()));
        }

        let malformed = || ParseTimestampError::Malformed(s.to_string());

        let year: i16 = date[0..4].parse().map_err(|_| malformed())?;
        let month: i8 = date[4..6].parse().map_err(|_| malformed())?;
        let day: i8 = date[6..8].parse().map_err(|_| malformed())?;
        let hour: i8 = time[0..2].parse().map_err(|_| malformed())?;
        let minute: i8 = time[2..4].parse().map_err(|_| malformed())?;
        let second: i8 = time[4..6].parse().map_err(|_| malformed())?;
        let nanos: i32 = nanos_str.parse().map_err(|_| malformed())?;

        let datetime = jiff::civil::datetime(year, month, day, hour, minute, second, nanos);
        let zoned = datetime
            .to_zoned(jiff::tz::TimeZone::UTC)
            .map_err(|_| malformed())?;

        Ok(Self::from_jiff(zoned.timestamp()))
    }
}

impl fmt::Display for AbsTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_chunk_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseTimestampError {
    Malformed(String),
}

impl fmt::Display for ParseTimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(s) => {
                write!(f, "malformed timestamp '{s}', expected YYYYMMDD_HHMMSS.nnnnnnnnn")
            }
        }
    }
}

impl std::error::Error for ParseTimestampError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_round_trips() {
        let ts = AbsTimestamp::now();
        let formatted = ts.format_chunk_id();
        let parsed = AbsTimestamp::parse_chunk_id(&formatted).unwrap();
        assert_eq!(ts, parsed);
    }

    #[test]
    fn ordering_matches_nanosecond_precision() {
        let a = AbsTimestamp::now();
        let b = a.checked_sub_nanos(-1).unwrap();
        assert!(b > a);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(AbsTimestamp::parse_chunk_id("not-a-timestamp").is_err());
    }
}
