//! Runtime configuration for polling and retries.

use anyhow::{Result, anyhow, bail};
use chrono_tz::Tz;
use std::time::Duration;

pub const DEFAULT_TIMEZONE: &str = "America/Vancouver";
pub const TIMEZONE_ENV: &str = "REFERENCE_TIMEZONE";

/// Timing of recovery attempts for unhealthy feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before the single realtime retry of a cycle.
    pub backoff: Duration,
    /// Upper bound on a static schedule refresh.
    pub static_timeout: Duration,
    /// Upper bound on the realtime retry itself.
    pub realtime_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(30),
            static_timeout: Duration::from_secs(240),
            realtime_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub concurrency: usize,
    pub feed_timeout: Duration,
    pub write_timeout: Duration,
    pub retry: RetryPolicy,
    /// Zone for service days and chart labels.
    pub timezone: Tz,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            concurrency: 5,
            feed_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            timezone: chrono_tz::America::Vancouver,
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            bail!("poll interval must be positive");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        for (name, value) in [
            ("feed timeout", self.feed_timeout),
            ("write timeout", self.write_timeout),
            ("static timeout", self.retry.static_timeout),
            ("realtime retry timeout", self.retry.realtime_timeout),
        ] {
            if value.is_zero() {
                bail!("{name} must be positive");
            }
        }
        Ok(())
    }
}

/// Parses an IANA zone name such as `America/Vancouver`.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| anyhow!("unknown timezone {name:?}: {e}"))
}

/// The explicit name if given, else `REFERENCE_TIMEZONE`, else the default zone.
pub fn resolve_timezone(explicit: Option<&str>) -> Result<Tz> {
    match explicit {
        Some(name) => parse_timezone(name),
        None => match std::env::var(TIMEZONE_ENV) {
            Ok(name) => parse_timezone(&name),
            Err(_) => parse_timezone(DEFAULT_TIMEZONE),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PollerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.retry.static_timeout, Duration::from_secs(240));
        assert_eq!(config.timezone, chrono_tz::America::Vancouver);
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = PollerConfig {
            concurrency: 0,
            ..PollerConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = PollerConfig::default();
        config.retry.static_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timezone_parsing() {
        assert_eq!(
            parse_timezone("Europe/Amsterdam").unwrap(),
            chrono_tz::Europe::Amsterdam
        );
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
        assert_eq!(
            resolve_timezone(Some("UTC")).unwrap(),
            chrono_tz::UTC
        );
    }
}
