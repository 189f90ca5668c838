//! Configuration management for JWK Set clients

use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Background refresh period for each remote key set
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Minimum time between refreshes triggered by unknown key IDs
pub const DEFAULT_REFRESH_UNKNOWN_KID_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Longest a lookup waits on the refresh rate limiter
pub const DEFAULT_RATE_LIMIT_WAIT_MAX: Duration = Duration::from_secs(60);

/// Timeout for a single JWK Set request
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest duration accepted for any interval or timeout (one year)
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// JWK Set client configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfig {
    /// Remote JWK Set URLs
    pub urls: Vec<String>,
    pub refresh_interval: Duration,
    pub prioritize_remote: bool,
    pub rate_limit_wait_max: Duration,
    /// `None` disables refreshing on unknown key IDs
    pub refresh_unknown_kid_interval: Option<Duration>,
    pub refresh_unknown_kid_burst: u32,
    pub http_timeout: Duration,
    pub log_level: Option<String>,
    /// `json` or `console`
    pub log_format: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            prioritize_remote: true,
            rate_limit_wait_max: DEFAULT_RATE_LIMIT_WAIT_MAX,
            refresh_unknown_kid_interval: Some(DEFAULT_REFRESH_UNKNOWN_KID_INTERVAL),
            refresh_unknown_kid_burst: 1,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            log_level: None,
            log_format: None,
        }
    }
}

impl ClientConfig {
    /// Default configuration for the given URLs
    pub fn with_urls(urls: impl IntoIterator<Item = String>) -> Self {
        Self {
            urls: urls.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, config::ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let urls: Vec<String> = lookup("JWKSET_URLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let refresh_interval = match parse_secs(&lookup, "JWKSET_REFRESH_INTERVAL_SECS")? {
            Some(d) => d,
            None => defaults.refresh_interval,
        };

        let prioritize_remote = match lookup("JWKSET_PRIORITIZE_REMOTE") {
            Some(raw) => parse_bool("JWKSET_PRIORITIZE_REMOTE", &raw)?,
            None => defaults.prioritize_remote,
        };

        let rate_limit_wait_max = match parse_secs(&lookup, "JWKSET_RATE_LIMIT_WAIT_MAX_SECS")? {
            Some(d) => d,
            None => defaults.rate_limit_wait_max,
        };

        // Zero turns refresh-on-unknown-kid off
        let refresh_unknown_kid_interval =
            match parse_secs(&lookup, "JWKSET_REFRESH_UNKNOWN_KID_INTERVAL_SECS")? {
                Some(d) if d.is_zero() => None,
                Some(d) => Some(d),
                None => defaults.refresh_unknown_kid_interval,
            };

        let refresh_unknown_kid_burst = match lookup("JWKSET_REFRESH_UNKNOWN_KID_BURST") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| {
                config::ConfigError::Message(format!(
                    "JWKSET_REFRESH_UNKNOWN_KID_BURST must be a whole number: {}",
                    e
                ))
            })?,
            None => defaults.refresh_unknown_kid_burst,
        };

        let http_timeout = match parse_secs(&lookup, "JWKSET_HTTP_TIMEOUT_SECS")? {
            Some(d) => d,
            None => defaults.http_timeout,
        };

        let log_level = lookup("LOG_LEVEL").or_else(|| Some("info".to_string()));

        let log_format = match lookup("LOG_FORMAT") {
            Some(raw) => {
                let format = raw.trim().to_ascii_lowercase();
                if format != "json" && format != "console" {
                    return Err(config::ConfigError::Message(format!(
                        "LOG_FORMAT must be \"json\" or \"console\", got {:?}",
                        raw
                    )));
                }
                Some(format)
            }
            None => None,
        };

        Ok(Self {
            urls,
            refresh_interval,
            prioritize_remote,
            rate_limit_wait_max,
            refresh_unknown_kid_interval,
            refresh_unknown_kid_burst,
            http_timeout,
            log_level,
            log_format,
        })
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Get log format, defaulting to "console"
    pub fn log_format(&self) -> &str {
        self.log_format.as_deref().unwrap_or("console")
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>, config::ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let secs = raw.trim().parse::<u64>().map_err(|e| {
        config::ConfigError::Message(format!("{} must be a number of seconds: {}", key, e))
    })?;
    let duration = Duration::from_secs(secs);
    if duration > MAX_DURATION {
        return Err(config::ConfigError::Message(format!(
            "{} must be at most {} seconds",
            key,
            MAX_DURATION.as_secs()
        )));
    }
    Ok(Some(duration))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, config::ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(config::ConfigError::Message(format!(
            "{} must be a boolean, got {:?}",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::from_lookup(lookup_from(&[])).unwrap();

        assert!(config.urls.is_empty());
        assert_eq!(config.refresh_interval, Duration::from_secs(3600));
        assert!(config.prioritize_remote);
        assert_eq!(config.rate_limit_wait_max, Duration::from_secs(60));
        assert_eq!(config.refresh_unknown_kid_interval, Some(Duration::from_secs(300)));
        assert_eq!(config.refresh_unknown_kid_burst, 1);
        assert_eq!(config.log_level(), "info");
        assert_eq!(config.log_format(), "console");
    }

    #[test]
    fn test_config_overrides() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("JWKSET_URLS", "https://a.example/jwks.json, https://b.example/jwks.json,"),
            ("JWKSET_REFRESH_INTERVAL_SECS", "120"),
            ("JWKSET_PRIORITIZE_REMOTE", "false"),
            ("JWKSET_REFRESH_UNKNOWN_KID_INTERVAL_SECS", "0"),
            ("LOG_LEVEL", "debug"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(
            config.urls,
            vec!["https://a.example/jwks.json", "https://b.example/jwks.json"]
        );
        assert_eq!(config.refresh_interval, Duration::from_secs(120));
        assert!(!config.prioritize_remote);
        assert_eq!(config.refresh_unknown_kid_interval, None);
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.log_format(), "json");
    }

    #[test]
    fn test_config_rejects_bad_numbers() {
        let err = ClientConfig::from_lookup(lookup_from(&[("JWKSET_HTTP_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("JWKSET_HTTP_TIMEOUT_SECS"));
    }

    #[test]
    fn test_config_rejects_oversized_durations() {
        let err = ClientConfig::from_lookup(lookup_from(&[(
            "JWKSET_REFRESH_UNKNOWN_KID_INTERVAL_SECS",
            "18446744073709551615",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("at most"));

        let at_limit = MAX_DURATION.as_secs().to_string();
        let config = ClientConfig::from_lookup(lookup_from(&[(
            "JWKSET_REFRESH_INTERVAL_SECS",
            at_limit.as_str(),
        )]))
        .unwrap();
        assert_eq!(config.refresh_interval, MAX_DURATION);
    }

    #[test]
    fn test_config_rejects_unknown_log_format() {
        let err = ClientConfig::from_lookup(lookup_from(&[("LOG_FORMAT", "xml")])).unwrap_err();
        assert!(err.to_string().contains("LOG_FORMAT"));
    }

    #[test]
    fn test_with_urls_uses_defaults() {
        let config = ClientConfig::with_urls(vec!["https://a.example/jwks.json".to_string()]);
        assert_eq!(config.urls.len(), 1);
        assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);
    }
}
