//! Human-readable durations.
//!
//! Durations cross two boundaries: the YAML configuration file and the
//! user-visible denial messages. Both use the compound unit notation
//! Kubernetes operators already write (`30s`, `10m`, `2h45m`), and messages
//! render back in the same notation (`2h0m0s`).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A wall-clock duration carried as a compound-unit string on the wire.
///
/// Wraps [`std::time::Duration`]; ordering and equality follow the wrapped
/// value, so `"90m"` and `"1h30m"` compare equal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HumanDuration(pub Duration);

/// Failure to parse a compound-unit duration string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    /// The input was empty or contained only whitespace.
    #[error("empty duration")]
    Empty,
    /// The input did not follow the `<number><unit>` notation.
    #[error("invalid duration {0:?}")]
    Invalid(String),
    /// A unit suffix was not one of ns, us, ms, s, m, h.
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit {
        /// The offending unit suffix.
        unit: String,
        /// The full input string.
        input: String,
    },
}

impl HumanDuration {
    /// Zero-length duration.
    pub const ZERO: HumanDuration = HumanDuration(Duration::ZERO);

    /// Build from whole seconds.
    pub fn from_secs(secs: u64) -> Self {
        HumanDuration(Duration::from_secs(secs))
    }

    /// Whether this duration is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// The wrapped standard-library duration.
    pub fn as_std(&self) -> Duration {
        self.0
    }

    /// The duration as a chrono timespan, saturating on overflow.
    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.0).unwrap_or(chrono::Duration::MAX)
    }
}

impl From<Duration> for HumanDuration {
    fn from(d: Duration) -> Self {
        HumanDuration(d)
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.0;

        if d.is_zero() {
            return write!(f, "0s");
        }

        if d < Duration::from_secs(1) {
            let nanos = d.subsec_nanos();
            return if nanos % 1_000_000 == 0 {
                write!(f, "{}ms", nanos / 1_000_000)
            } else if nanos % 1_000 == 0 {
                write!(f, "{}us", nanos / 1_000)
            } else {
                write!(f, "{nanos}ns")
            };
        }

        let total = d.as_secs();
        let hours = total / 3600;
        let minutes = (total % 3600) / 60;
        let seconds = total % 60;
        let nanos = d.subsec_nanos();

        if hours > 0 {
            write!(f, "{hours}h{minutes}m")?;
        } else if minutes > 0 {
            write!(f, "{minutes}m")?;
        }

        if nanos == 0 {
            write!(f, "{seconds}s")
        } else {
            let mut frac = format!("{nanos:09}");
            while frac.ends_with('0') {
                frac.pop();
            }
            write!(f, "{seconds}.{frac}s")
        }
    }
}

impl FromStr for HumanDuration {
    type Err = DurationParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input.trim();

        if s.is_empty() {
            return Err(DurationParseError::Empty);
        }

        // Bare zero is accepted without a unit.
        if s == "0" {
            return Ok(HumanDuration::ZERO);
        }

        let mut total = Duration::ZERO;
        let mut rest = s;

        while !rest.is_empty() {
            let number_len = rest
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .ok_or_else(|| DurationParseError::Invalid(input.to_string()))?;

            if number_len == 0 {
                return Err(DurationParseError::Invalid(input.to_string()));
            }

            let value: f64 = rest[..number_len]
                .parse()
                .map_err(|_| DurationParseError::Invalid(input.to_string()))?;

            rest = &rest[number_len..];

            let unit_len = rest
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(rest.len());
            let unit = &rest[..unit_len];
            rest = &rest[unit_len..];

            let unit_nanos: f64 = match unit {
                "ns" => 1.0,
                "us" | "µs" => 1_000.0,
                "ms" => 1_000_000.0,
                "s" => 1_000_000_000.0,
                "m" => 60.0 * 1_000_000_000.0,
                "h" => 3600.0 * 1_000_000_000.0,
                _ => {
                    return Err(DurationParseError::UnknownUnit {
                        unit: unit.to_string(),
                        input: input.to_string(),
                    })
                }
            };

            total += Duration::from_nanos((value * unit_nanos) as u64);
        }

        Ok(HumanDuration(total))
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
