//! Link delay parsing utilities.
//!
//! This module parses propagation delay strings (e.g., "10ms", "500us")
//! into `Duration`s and renders them back in the form `tc netem` accepts.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Parse a delay string (e.g., "10ms", "500us", "1s") to a `Duration`
///
/// Supports the following formats:
/// - Raw milliseconds: "10"
/// - Microseconds: "500us", "500usec", "500usecs"
/// - Milliseconds: "10ms", "10msec", "10msecs"
/// - Seconds: "1s", "1sec", "1secs"
///
/// Bare numbers are milliseconds, the unit every delay in a fabric file
/// is normally written in.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use fabricsim::utils::duration::parse_delay;
///
/// assert_eq!(parse_delay("10ms"), Ok(Duration::from_millis(10)));
/// assert_eq!(parse_delay("10"), Ok(Duration::from_millis(10)));
/// assert_eq!(parse_delay("250us"), Ok(Duration::from_micros(250)));
/// assert!(parse_delay("fast").is_err());
/// ```
pub fn parse_delay(delay: &str) -> Result<Duration, String> {
    let delay = delay.trim();
    let num_str = extract_number_part(delay);
    let unit = &delay[num_str.len()..];

    if num_str.is_empty() {
        return Err(format!("Invalid delay format: {}", delay));
    }
    let value = num_str
        .parse::<u64>()
        .map_err(|_| format!("Invalid delay format: {}", delay))?;

    // Check longer suffixes before shorter ones
    match unit.trim() {
        "" | "ms" | "msec" | "msecs" => Ok(Duration::from_millis(value)),
        "us" | "usec" | "usecs" => Ok(Duration::from_micros(value)),
        "s" | "sec" | "secs" => Ok(Duration::from_secs(value)),
        _ => Err(format!("Invalid delay format: {}", delay)),
    }
}

/// Render a delay the way `tc netem` and fabric files spell it
///
/// Whole milliseconds render as "Nms", everything else as "Nus".
pub fn format_delay(delay: Duration) -> String {
    let micros = delay.as_micros();
    if micros % 1000 == 0 {
        format!("{}ms", micros / 1000)
    } else {
        format!("{}us", micros)
    }
}

/// Extract the numeric part from a delay string by finding the first non-digit character
fn extract_number_part(delay: &str) -> &str {
    for (i, c) in delay.char_indices() {
        if !c.is_ascii_digit() {
            return &delay[0..i];
        }
    }
    delay // If all characters are digits
}

/// Serde adapter for optional delay fields written as strings
pub mod serde_delay {
    use super::*;

    pub fn serialize<S>(delay: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match delay {
            Some(d) => serializer.serialize_some(&format_delay(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<DelayValue> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(DelayValue::Number(ms)) => Ok(Some(Duration::from_millis(ms))),
            Some(DelayValue::Text(s)) => {
                parse_delay(&s).map(Some).map_err(serde::de::Error::custom)
            }
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DelayValue {
        Number(u64),
        Text(String),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delay() {
        // Raw milliseconds
        assert_eq!(parse_delay("10"), Ok(Duration::from_millis(10)));
        assert_eq!(parse_delay("0"), Ok(Duration::ZERO));

        // Millisecond formats
        assert_eq!(parse_delay("10ms"), Ok(Duration::from_millis(10)));
        assert_eq!(parse_delay("10msec"), Ok(Duration::from_millis(10)));
        assert_eq!(parse_delay(" 20ms "), Ok(Duration::from_millis(20)));

        // Microsecond formats
        assert_eq!(parse_delay("500us"), Ok(Duration::from_micros(500)));
        assert_eq!(parse_delay("500usecs"), Ok(Duration::from_micros(500)));

        // Second formats
        assert_eq!(parse_delay("1s"), Ok(Duration::from_secs(1)));
        assert_eq!(parse_delay("2sec"), Ok(Duration::from_secs(2)));

        // Invalid formats
        assert!(parse_delay("").is_err());
        assert!(parse_delay("ms").is_err());
        assert!(parse_delay("5x").is_err());
        assert!(parse_delay("5minutes").is_err());
    }

    #[test]
    fn test_format_delay() {
        assert_eq!(format_delay(Duration::from_millis(10)), "10ms");
        assert_eq!(format_delay(Duration::from_micros(1500)), "1500us");
        assert_eq!(format_delay(Duration::from_secs(1)), "1000ms");
        let micros = Duration::from_micros(250);
        assert_eq!(parse_delay(&format_delay(micros)), Ok(micros));
    }
}
