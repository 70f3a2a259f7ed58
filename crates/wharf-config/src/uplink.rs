//! Uplink (upstream registry) configuration.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One configured upstream registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UplinkConfig {
    /// Uplink name, referenced by package rules' `proxy` lists.
    pub name: String,

    /// Base URL of the upstream registry, e.g. `https://registry.npmjs.org/`.
    pub url: String,

    /// Whether tarballs fetched through this uplink are cached locally.
    #[serde(default = "default_cache")]
    pub cache: bool,

    /// Request timeout for manifest fetches.
    #[serde(default = "default_timeout", with = "humane_duration")]
    pub timeout: Duration,

    /// Consecutive failures before the uplink is considered down.
    #[serde(default = "default_max_fails")]
    pub max_fails: u32,

    /// How long a down uplink fails fast before being retried.
    #[serde(default = "default_fail_window", with = "humane_duration")]
    pub fail_window: Duration,
}

fn default_cache() -> bool {
    true
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_fails() -> u32 {
    2
}

fn default_fail_window() -> Duration {
    Duration::from_secs(5 * 60)
}

impl Default for UplinkConfig {
    fn default() -> Self {
        UplinkConfig {
            name: String::new(),
            url: String::new(),
            cache: default_cache(),
            timeout: default_timeout(),
            max_fails: default_max_fails(),
            fail_window: default_fail_window(),
        }
    }
}

/// Parses a duration written as `1d2h3m4s`. Bare digit runs must carry a
/// unit suffix.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let mut total: u64 = 0;
    let mut chars = input.chars().peekable();

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() {
                number.push(chars.next()?);
            } else {
                break;
            }
        }
        if number.is_empty() {
            return None;
        }
        let number: u64 = number.parse().ok()?;
        let multiplier = match chars.next()? {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            _ => return None,
        };
        total = total.checked_add(number.checked_mul(multiplier)?)?;
    }

    Some(Duration::from_secs(total))
}

fn format_duration(duration: &Duration) -> String {
    format!("{}s", duration.as_secs())
}

mod humane_duration {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        parse_duration(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {text}")))
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(
            parse_duration("1d1h1m1s"),
            Some(Duration::from_secs(24 * 3600 + 3600 + 61))
        );
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration(""), Some(Duration::from_secs(0)));
    }

    #[test]
    fn test_uplink_defaults_from_toml() {
        let uplink: UplinkConfig = toml::from_str(
            r#"
name = "npmjs"
url = "https://registry.npmjs.org/"
"#,
        )
        .unwrap();
        assert!(uplink.cache);
        assert_eq!(uplink.timeout, Duration::from_secs(30));
        assert_eq!(uplink.max_fails, 2);
        assert_eq!(uplink.fail_window, Duration::from_secs(300));
    }

    #[test]
    fn test_uplink_explicit_durations() {
        let uplink: UplinkConfig = toml::from_str(
            r#"
name = "npmjs"
url = "https://registry.npmjs.org/"
cache = false
timeout = "10s"
max_fails = 5
fail_window = "2m"
"#,
        )
        .unwrap();
        assert!(!uplink.cache);
        assert_eq!(uplink.timeout, Duration::from_secs(10));
        assert_eq!(uplink.max_fails, 5);
        assert_eq!(uplink.fail_window, Duration::from_secs(120));
    }
}
