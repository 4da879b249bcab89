//! Playback pacing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Speed modes: the multiplier applies to recorded gaps, the floor keeps
/// pages a minimum time to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Speed {
    #[default]
    RealTime,
    Fast,
    Instant,
}

impl Speed {
    pub fn multiplier(&self) -> f64 {
        match self {
            Speed::RealTime => 1.0,
            Speed::Fast => 0.5,
            Speed::Instant => 0.1,
        }
    }

    pub fn floor(&self) -> Duration {
        match self {
            Speed::Instant => Duration::from_millis(10),
            Speed::RealTime | Speed::Fast => Duration::from_millis(200),
        }
    }

    /// Pause between an event recorded at `current` and the next one
    /// recorded at `next`: `max(multiplier * gap, floor)`.
    pub fn delay(&self, current: u64, next: u64) -> Duration {
        let gap = next.saturating_sub(current) as f64 * self.multiplier();
        Duration::from_millis(gap.round() as u64).max(self.floor())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Speed::RealTime => "real-time",
            Speed::Fast => "fast",
            Speed::Instant => "instant",
        }
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Speed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "real-time" | "realtime" => Ok(Speed::RealTime),
            "fast" => Ok(Speed::Fast),
            "instant" => Ok(Speed::Instant),
            other => Err(format!(
                "unknown speed '{}' (expected real-time, fast or instant)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_scales_gap() {
        assert_eq!(Speed::RealTime.delay(1000, 3000), Duration::from_millis(2000));
        assert_eq!(Speed::Fast.delay(1000, 3000), Duration::from_millis(1000));
        assert_eq!(Speed::Instant.delay(1000, 3000), Duration::from_millis(200));
    }

    #[test]
    fn test_delay_respects_floor() {
        assert_eq!(Speed::RealTime.delay(0, 50), Duration::from_millis(200));
        assert_eq!(Speed::Fast.delay(0, 300), Duration::from_millis(200));
        assert_eq!(Speed::Instant.delay(0, 50), Duration::from_millis(10));
        assert_eq!(Speed::Instant.delay(500, 500), Duration::from_millis(10));
    }

    #[test]
    fn test_delay_with_clock_regression() {
        assert_eq!(Speed::RealTime.delay(5000, 4000), Duration::from_millis(200));
    }

    #[test]
    fn test_parse_and_serialize() {
        assert_eq!("real-time".parse::<Speed>().unwrap(), Speed::RealTime);
        assert_eq!("FAST".parse::<Speed>().unwrap(), Speed::Fast);
        assert!("warp".parse::<Speed>().unwrap_err().contains("warp"));
        assert_eq!(serde_json::to_string(&Speed::RealTime).unwrap(), "\"real-time\"");
        assert_eq!(
            serde_json::from_str::<Speed>("\"instant\"").unwrap(),
            Speed::Instant
        );
    }
}
