//! Platform timestamp normalization.
//!
//! The message store counts time from 2001-01-01T00:00:00Z. Older rows store
//! whole seconds; newer rows store nanoseconds. The unit is not recorded, so
//! it is inferred from magnitude: anything above 10^12 is taken to be
//! nanoseconds. This is an approximation about the data, not a property of
//! the format, and is kept as-is so previously derived timestamps stay
//! stable.

use chrono::{DateTime, Utc};

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z.
pub const PLATFORM_EPOCH_OFFSET: i64 = 978_307_200;

/// Magnitude above which a raw value is read as nanoseconds.
pub const NANOSECOND_THRESHOLD: u64 = 1_000_000_000_000;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a raw platform timestamp into an absolute UTC time.
///
/// Returns `None` for the sentinel `0`, and for values outside the range
/// chrono can represent.
///
/// ```rust
/// use persona_harness_core::timestamp::normalize;
///
/// let secs = normalize(700_000_000).unwrap();
/// let nanos = normalize(700_000_000 * 1_000_000_000).unwrap();
/// assert_eq!(secs, nanos);
/// assert!(normalize(0).is_none());
/// ```
pub fn normalize(raw: i64) -> Option<DateTime<Utc>> {
    if raw == 0 {
        return None;
    }

    let (secs, nanos) = if raw.unsigned_abs() > NANOSECOND_THRESHOLD {
        (
            raw.div_euclid(NANOS_PER_SECOND),
            raw.rem_euclid(NANOS_PER_SECOND) as u32,
        )
    } else {
        (raw, 0)
    };

    let unix_secs = secs.checked_add(PLATFORM_EPOCH_OFFSET)?;
    DateTime::from_timestamp(unix_secs, nanos)
}
