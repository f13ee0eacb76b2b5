// src/timeframe.rs
// Aggregation timeframes ("1m", "4h", "1d"...) as a bucket duration in seconds

use crate::errors::OverlayError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Views at or above this granularity use the high-timeframe refinement.
pub const HIGH_TIMEFRAME_SECS: i64 = 3600;
/// Views at or below this granularity use the micro refinement.
pub const MICRO_VIEW_MAX_SECS: i64 = 70;

/// Known timeframes in ascending order. The position is used as the bit index
/// of label timeframe masks.
const KNOWN: [(&str, i64); 13] = [
    ("1s", 1),
    ("5s", 5),
    ("15s", 15),
    ("30s", 30),
    ("1m", 60),
    ("3m", 180),
    ("5m", 300),
    ("15m", 900),
    ("30m", 1_800),
    ("1h", 3_600),
    ("4h", 14_400),
    ("1d", 86_400),
    ("1w", 604_800),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timeframe {
    secs: i64,
}

impl Timeframe {
    pub const M1: Timeframe = Timeframe { secs: 60 };
    pub const M5: Timeframe = Timeframe { secs: 300 };
    pub const M15: Timeframe = Timeframe { secs: 900 };
    pub const H1: Timeframe = Timeframe { secs: 3_600 };
    pub const H4: Timeframe = Timeframe { secs: 14_400 };
    pub const D1: Timeframe = Timeframe { secs: 86_400 };

    pub fn from_secs(secs: i64) -> Option<Self> {
        if secs > 0 {
            Some(Self { secs })
        } else {
            None
        }
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn is_high_timeframe_view(&self) -> bool {
        self.secs >= HIGH_TIMEFRAME_SECS
    }

    pub fn is_micro_view(&self) -> bool {
        self.secs <= MICRO_VIEW_MAX_SECS
    }

    /// Start of the bucket containing `time`.
    pub fn bucket_start(&self, time: i64) -> i64 {
        time.div_euclid(self.secs) * self.secs
    }

    pub fn is_aligned(&self, time: i64) -> bool {
        time.rem_euclid(self.secs) == 0
    }

    /// Bit for label timeframe masks. Unlisted durations share the bit of the
    /// closest known timeframe below them.
    pub fn mask_bit(&self) -> u32 {
        let idx = KNOWN
            .iter()
            .rposition(|(_, s)| *s <= self.secs)
            .unwrap_or(0);
        1u32 << idx
    }
}

/// Rank of the coarsest timeframe present in a mask (0 for an empty mask).
pub fn mask_rank(mask: u32) -> u32 {
    32 - mask.leading_zeros()
}

impl FromStr for Timeframe {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(OverlayError::UnknownTimeframe(s.to_string()));
        }

        // Plain seconds: "60"
        if let Ok(secs) = raw.parse::<i64>() {
            return Timeframe::from_secs(secs).ok_or_else(|| OverlayError::UnknownTimeframe(s.to_string()));
        }

        let lower = raw.to_lowercase();
        // Broker style: "m15", "h4", "d1"
        let (num, unit) = match lower.chars().next() {
            Some(c) if c.is_ascii_alphabetic() && lower[1..].chars().all(|d| d.is_ascii_digit()) => {
                (&lower[1..], &lower[..1])
            }
            _ => {
                let split = lower
                    .find(|c: char| !c.is_ascii_digit())
                    .ok_or_else(|| OverlayError::UnknownTimeframe(s.to_string()))?;
                (&lower[..split], &lower[split..])
            }
        };

        let n: i64 = if num.is_empty() {
            1
        } else {
            num.parse()
                .map_err(|_| OverlayError::UnknownTimeframe(s.to_string()))?
        };
        let unit_secs = match unit {
            "s" | "sec" | "secs" => 1,
            "m" | "min" | "mins" => 60,
            "h" | "hr" | "hour" | "hours" => 3_600,
            "d" | "day" | "days" => 86_400,
            "w" | "wk" | "week" | "weeks" => 604_800,
            _ => return Err(OverlayError::UnknownTimeframe(s.to_string())),
        };

        n.checked_mul(unit_secs)
            .and_then(Timeframe::from_secs)
            .ok_or_else(|| OverlayError::UnknownTimeframe(s.to_string()))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((label, _)) = KNOWN.iter().find(|(_, s)| *s == self.secs) {
            return f.write_str(label);
        }
        match self.secs {
            s if s % 604_800 == 0 => write!(f, "{}w", s / 604_800),
            s if s % 86_400 == 0 => write!(f, "{}d", s / 86_400),
            s if s % 3_600 == 0 => write!(f, "{}h", s / 3_600),
            s if s % 60 == 0 => write!(f, "{}m", s / 60),
            s => write!(f, "{}s", s),
        }
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(i64),
            Label(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Timeframe::from_secs(secs)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timeframe seconds: {}", secs))),
            Raw::Label(label) => label.parse().map_err(serde::de::Error::custom),
        }
    }
}
