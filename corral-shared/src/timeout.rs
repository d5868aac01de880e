//! Uniform timeout convention.
//!
//! Timeouts travel as signed seconds on the wire. Any negative value means
//! "wait indefinitely"; this holds for every operation kind.

use crate::constants::timeout::INFINITE_SECS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long to wait for something to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Timeout {
    /// Never give up.
    #[default]
    Infinite,
    /// Give up once the duration has elapsed.
    After(Duration),
}

impl Timeout {
    /// Convert from signed seconds; negative values mean [`Timeout::Infinite`].
    pub fn from_secs(secs: i64) -> Self {
        match u64::try_from(secs) {
            Ok(secs) => Timeout::After(Duration::from_secs(secs)),
            Err(_) => Timeout::Infinite,
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Timeout::After(Duration::from_millis(millis))
    }

    /// Signed seconds for the wire. Sub-second precision is truncated.
    pub fn as_secs(&self) -> i64 {
        match self {
            Timeout::Infinite => INFINITE_SECS,
            Timeout::After(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Timeout::Infinite)
    }

    /// The finite budget, if any.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Timeout::Infinite => None,
            Timeout::After(d) => Some(*d),
        }
    }
}

impl From<i64> for Timeout {
    fn from(secs: i64) -> Self {
        Timeout::from_secs(secs)
    }
}

impl From<Timeout> for i64 {
    fn from(timeout: Timeout) -> Self {
        timeout.as_secs()
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_seconds_mean_infinite() {
        assert_eq!(Timeout::from_secs(-1), Timeout::Infinite);
        assert_eq!(Timeout::from_secs(-30), Timeout::Infinite);
        assert_eq!(Timeout::from_secs(i64::MIN), Timeout::Infinite);
    }

    #[test]
    fn test_zero_and_positive_seconds() {
        assert_eq!(Timeout::from_secs(0), Timeout::After(Duration::ZERO));
        assert_eq!(Timeout::from_secs(30).duration(), Some(Duration::from_secs(30)));
        assert_eq!(Timeout::Infinite.duration(), None);
    }

    #[test]
    fn test_wire_round_trip() {
        assert_eq!(Timeout::Infinite.as_secs(), -1);
        assert_eq!(Timeout::from_millis(2500).as_secs(), 2);

        let parsed: Timeout = serde_json::from_str("-5").unwrap();
        assert!(parsed.is_infinite());
        assert_eq!(serde_json::to_string(&Timeout::from_secs(7)).unwrap(), "7");
    }
}
