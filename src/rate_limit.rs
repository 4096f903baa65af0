//! Support for specifying rate limits for calling various APIs.

use std::{fmt, str::FromStr, time::Duration};

use leaky_bucket::RateLimiter;
use serde::{Deserializer, de};

use crate::prelude::*;

/// The period over which the rate limit is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitPeriod {
    /// Per second.
    Second,
    /// Per minute.
    Minute,
}

impl RateLimitPeriod {
    /// Convert this period to a number of seconds.
    pub fn to_duration(self) -> Duration {
        match self {
            RateLimitPeriod::Second => Duration::from_secs(1),
            RateLimitPeriod::Minute => Duration::from_secs(60),
        }
    }
}

impl fmt::Display for RateLimitPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitPeriod::Second => write!(f, "s"),
            RateLimitPeriod::Minute => write!(f, "m"),
        }
    }
}

impl FromStr for RateLimitPeriod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "s" => Ok(RateLimitPeriod::Second),
            "m" => Ok(RateLimitPeriod::Minute),
            _ => Err(anyhow!("Unsupported rate limit period: {:?}", s)),
        }
    }
}

/// A rate limit for a processor API, written as `"10/s"` or `"600/m"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimit {
    /// The maximum number of requests allowed in the period.
    pub max_requests: usize,
    /// The period over which the rate limit is applied.
    pub per_period: RateLimitPeriod,
}

impl RateLimit {
    /// Create a new [`RateLimit`].
    pub fn new(max_requests: usize, per_period: RateLimitPeriod) -> Self {
        Self {
            max_requests,
            per_period,
        }
    }

    /// Create a [`RateLimiter`] for this rate limit.
    pub fn to_rate_limiter(&self) -> RateLimiter {
        // Start with a full bucket, so a fresh batch can go at full speed.
        RateLimiter::builder()
            .initial(self.max_requests)
            .refill(self.max_requests)
            .max(self.max_requests)
            .interval(self.per_period.to_duration())
            .build()
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_requests, self.per_period)
    }
}

impl FromStr for RateLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |s: &str| -> Result<_> {
            let mut parts = s.splitn(2, '/');
            let max_requests = parts
                .next()
                .ok_or_else(|| anyhow!("Missing max requests"))?
                .parse::<usize>()?;
            let per_period = parts
                .next()
                .ok_or_else(|| anyhow!("Missing period"))?
                .parse::<RateLimitPeriod>()?;
            Ok(Self {
                max_requests,
                per_period,
            })
        };
        parse(s).with_context(|| format!("Failed to parse rate limit: {:?}", s))
    }
}

impl<'de> Deserialize<'de> for RateLimit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|err: anyhow::Error| de::Error::custom(format!("{err:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let rate_limit = RateLimit::from_str("10/s").unwrap();
        assert_eq!(rate_limit.max_requests, 10);
        assert_eq!(rate_limit.per_period, RateLimitPeriod::Second);

        let rate_limit = RateLimit::from_str("5/m").unwrap();
        assert_eq!(rate_limit.max_requests, 5);
        assert_eq!(rate_limit.per_period, RateLimitPeriod::Minute);
    }

    #[test]
    fn test_failed_parse() {
        assert!(RateLimit::from_str("10/invalid").is_err());
        assert!(RateLimit::from_str("invalid").is_err());
    }

    #[test]
    fn test_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            rate_limit: RateLimit,
        }
        let w: Wrapper = toml::from_str(r#"rate_limit = "120/m""#).unwrap();
        assert_eq!(w.rate_limit, RateLimit::new(120, RateLimitPeriod::Minute));
        assert!(toml::from_str::<Wrapper>(r#"rate_limit = "fast""#).is_err());
    }

    #[test]
    fn test_display() {
        let rate_limit = RateLimit::from_str("10/s").unwrap();
        assert_eq!(rate_limit.to_string(), "10/s");

        let rate_limit = RateLimit::from_str("5/m").unwrap();
        assert_eq!(rate_limit.to_string(), "5/m");
    }
}
