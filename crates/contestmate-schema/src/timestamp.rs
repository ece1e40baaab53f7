//! Lenient timestamp decoding for backend payloads.
//!
//! The platform backend emits epoch milliseconds for `java.util.Date` fields
//! and zone-less ISO strings for `LocalDateTime` fields; both are read as UTC.
//! Jackson's array form of `LocalDateTime` (`[y, m, d, h, min, s, nanos]`) is
//! accepted too.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
    Parts(Vec<i64>),
    Other(IgnoredAny),
}

impl RawTimestamp {
    fn resolve(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => DateTime::from_timestamp_millis(ms),
            Self::Text(text) => parse(&text),
            Self::Parts(parts) => from_parts(&parts),
            Self::Other(_) => None,
        }
    }
}

/// Time fields missing from the tail of the array read as zero.
fn from_parts(parts: &[i64]) -> Option<DateTime<Utc>> {
    let field = |i: usize| parts.get(i).map_or(Some(0), |&v| u32::try_from(v).ok());
    let year = i32::try_from(*parts.first()?).ok()?;
    let month = u32::try_from(*parts.get(1)?).ok()?;
    let day = u32::try_from(*parts.get(2)?).ok()?;
    let time = NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_nano_opt(field(3)?, field(4)?, field(5)?, field(6)?)?;
    Some(time.and_utc())
}

pub fn parse(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc());
        }
    }
    text.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

/// Missing, null and unrecognised values of any JSON type decode to `None`.
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawTimestamp>::deserialize(deserializer)?.and_then(RawTimestamp::resolve))
}
