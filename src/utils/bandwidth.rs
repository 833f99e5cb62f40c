//! Link bandwidth values.
//!
//! Bandwidth is stored in bits per second. Fabric files write it the way
//! Mininet's `bw` option does: a bare number is Mbit/s, and the suffixes
//! `Kbit`, `Mbit` and `Gbit` (case-insensitive) are accepted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const KBIT: u64 = 1_000;
const MBIT: u64 = 1_000_000;
const GBIT: u64 = 1_000_000_000;

/// Link bandwidth in bits per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bandwidth(u64);

impl Bandwidth {
    pub const fn from_mbps(mbps: u64) -> Self {
        Bandwidth(mbps * MBIT)
    }

    /// Rate argument for `tc netem rate`
    pub fn tc_rate(&self) -> String {
        self.to_string().to_lowercase()
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "0bit"),
            bps if bps % GBIT == 0 => write!(f, "{}Gbit", bps / GBIT),
            bps if bps % MBIT == 0 => write!(f, "{}Mbit", bps / MBIT),
            bps if bps % KBIT == 0 => write!(f, "{}Kbit", bps / KBIT),
            bps => write!(f, "{}bit", bps),
        }
    }
}

impl FromStr for Bandwidth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (num_str, unit) = trimmed.split_at(split);
        let value = num_str
            .parse::<u64>()
            .map_err(|_| format!("Invalid bandwidth format: {}", s))?;

        let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "m" | "mbit" | "mbps" => MBIT,
            "k" | "kbit" | "kbps" => KBIT,
            "g" | "gbit" | "gbps" => GBIT,
            "bit" | "bps" => 1,
            _ => return Err(format!("Invalid bandwidth format: {}", s)),
        };

        value
            .checked_mul(multiplier)
            .map(Bandwidth)
            .ok_or_else(|| format!("Bandwidth out of range: {}", s))
    }
}

impl Serialize for Bandwidth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Bandwidth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(mbps) => Ok(Bandwidth::from_mbps(mbps)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bandwidth() {
        assert_eq!("10".parse::<Bandwidth>(), Ok(Bandwidth::from_mbps(10)));
        assert_eq!("10Mbit".parse::<Bandwidth>(), Ok(Bandwidth::from_mbps(10)));
        assert_eq!("1Gbit".parse::<Bandwidth>(), Ok(Bandwidth(GBIT)));
        assert_eq!("500kbit".parse::<Bandwidth>(), Ok(Bandwidth(500_000)));
        assert_eq!("64bit".parse::<Bandwidth>(), Ok(Bandwidth(64)));

        assert!("".parse::<Bandwidth>().is_err());
        assert!("fast".parse::<Bandwidth>().is_err());
        assert!("10Tbit".parse::<Bandwidth>().is_err());
    }

    #[test]
    fn test_display_picks_largest_unit() {
        assert_eq!(Bandwidth::from_mbps(1000).to_string(), "1Gbit");
        assert_eq!(Bandwidth::from_mbps(5).to_string(), "5Mbit");
        assert_eq!(Bandwidth(1_500_000).to_string(), "1500Kbit");
        assert_eq!(Bandwidth::from_mbps(5).tc_rate(), "5mbit");
    }

    #[test]
    fn test_yaml_accepts_numbers_and_strings() {
        let numeric: Bandwidth = serde_yaml::from_str("10").unwrap();
        let text: Bandwidth = serde_yaml::from_str("\"10Mbit\"").unwrap();
        assert_eq!(numeric, text);
    }
}
