//! Time units for watchdog thresholds
//!
//! Thresholds are configured as an integer amount of some unit. Conversions
//! truncate toward zero and saturate at the `i64` bounds, so an age of 1999µs
//! is 1ms and never 2ms.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Unit in which a watchdog limit is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Length of one unit in nanoseconds
    const fn nanos(self) -> i64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60_000_000_000,
            TimeUnit::Hours => 3_600_000_000_000,
            TimeUnit::Days => 86_400_000_000_000,
        }
    }

    /// Convert `amount` expressed in `from` into this unit
    ///
    /// # Example
    ///
    /// ```
    /// use overrun::time_unit::TimeUnit;
    ///
    /// assert_eq!(TimeUnit::Milliseconds.convert(2, TimeUnit::Seconds), 2_000);
    /// assert_eq!(TimeUnit::Seconds.convert(1_999, TimeUnit::Milliseconds), 1);
    /// ```
    pub fn convert(self, amount: i64, from: TimeUnit) -> i64 {
        let (src, dst) = (from.nanos(), self.nanos());
        if src >= dst {
            amount.saturating_mul(src / dst)
        } else {
            amount / (dst / src)
        }
    }

    /// Express a duration in this unit, truncating any remainder
    pub fn from_duration(self, duration: Duration) -> i64 {
        let nanos = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        self.convert(nanos, TimeUnit::Nanoseconds)
    }

    /// Duration of `amount` units (negative amounts clamp to zero)
    pub fn to_duration(self, amount: i64) -> Duration {
        let nanos = amount.max(0).saturating_mul(self.nanos());
        Duration::from_nanos(nanos as u64)
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "µs",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "min",
            TimeUnit::Hours => "h",
            TimeUnit::Days => "d",
        };
        f.write_str(name)
    }
}

/// Render a millisecond amount compactly: `250ms`, `1.5s`, `2min`
///
/// Fractions are truncated to one decimal, so a value never reads as the next
/// whole unit before reaching it (`59_999` is `59.9s`, not `60.0s`).
pub fn format_millis(ms: i64) -> String {
    let magnitude = ms.unsigned_abs();
    let unit = if magnitude < millis_per(TimeUnit::Seconds) as u64 {
        TimeUnit::Milliseconds
    } else if magnitude < millis_per(TimeUnit::Minutes) as u64 {
        TimeUnit::Seconds
    } else {
        TimeUnit::Minutes
    };
    with_one_decimal(ms, unit)
}

fn millis_per(unit: TimeUnit) -> i64 {
    unit.nanos() / TimeUnit::Milliseconds.nanos()
}

fn with_one_decimal(ms: i64, unit: TimeUnit) -> String {
    let per = millis_per(unit);
    if per < 10 {
        return format!("{}{}", ms, unit);
    }

    let tenths = ms / (per / 10);
    let (whole, fraction) = (tenths / 10, (tenths % 10).abs());
    if fraction == 0 {
        format!("{}{}", whole, unit)
    } else {
        format!("{}.{}{}", whole, fraction, unit)
    }
}
