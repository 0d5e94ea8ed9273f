//! Client settings.
//!
//! Defaults hold the production values; every field can be overridden from
//! the environment.

use std::time::Duration;

use crate::ads::adapter::DEFAULT_RETRY_BACKOFF;
use crate::config::client::DEFAULT_CACHE_TTL;

/// Default ad config endpoint.
pub const DEFAULT_AD_CONFIG_URL: &str = "https://peradox.in/api/mtc/getAdConfig";

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime settings of the client core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Ad config endpoint (`MTC_AD_CONFIG_URL`).
    pub ad_config_url: String,
    /// Ad config cache lifetime (`MTC_CONFIG_TTL_SECS`).
    pub config_ttl: Duration,
    /// Delay before retrying a failed ad load (`MTC_AD_RETRY_SECS`, 0 ignored).
    pub ad_retry_backoff: Duration,
    /// HTTP request timeout (`MTC_HTTP_TIMEOUT_SECS`, 0 ignored).
    pub http_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            ad_config_url: DEFAULT_AD_CONFIG_URL.to_string(),
            config_ttl: DEFAULT_CACHE_TTL,
            ad_retry_backoff: DEFAULT_RETRY_BACKOFF,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl ClientSettings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        // Zero would turn load retries into a busy loop
        let nonzero_secs = |key: &str, default: Duration| {
            Some(secs(key, default))
                .filter(|d| !d.is_zero())
                .unwrap_or(default)
        };

        Self {
            ad_config_url: lookup("MTC_AD_CONFIG_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.ad_config_url),
            config_ttl: secs("MTC_CONFIG_TTL_SECS", defaults.config_ttl),
            ad_retry_backoff: nonzero_secs("MTC_AD_RETRY_SECS", defaults.ad_retry_backoff),
            http_timeout: nonzero_secs("MTC_HTTP_TIMEOUT_SECS", defaults.http_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_defaults_without_env() {
        let settings = ClientSettings::from_lookup(|_| None);
        assert_eq!(settings, ClientSettings::default());
        assert_eq!(settings.config_ttl, Duration::from_secs(300));
        assert_eq!(settings.ad_retry_backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let env: BTreeMap<&str, &str> = [
            ("MTC_AD_CONFIG_URL", "http://localhost:8080/ad-config"),
            ("MTC_CONFIG_TTL_SECS", "60"),
            ("MTC_AD_RETRY_SECS", "soon"),
        ]
        .into_iter()
        .collect();
        let settings = ClientSettings::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.ad_config_url, "http://localhost:8080/ad-config");
        assert_eq!(settings.config_ttl, Duration::from_secs(60));
        assert_eq!(settings.ad_retry_backoff, DEFAULT_RETRY_BACKOFF);
        assert_eq!(settings.http_timeout, DEFAULT_HTTP_TIMEOUT);
    }

    #[test]
    fn test_zero_retry_and_timeout_use_defaults() {
        let env: BTreeMap<&str, &str> = [
            ("MTC_AD_RETRY_SECS", "0"),
            ("MTC_HTTP_TIMEOUT_SECS", " 0 "),
            ("MTC_CONFIG_TTL_SECS", "0"),
        ]
        .into_iter()
        .collect();
        let settings = ClientSettings::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.ad_retry_backoff, DEFAULT_RETRY_BACKOFF);
        assert_eq!(settings.http_timeout, DEFAULT_HTTP_TIMEOUT);
        assert_eq!(settings.config_ttl, Duration::ZERO);
    }
}
