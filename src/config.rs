//! Environment configuration
//!
//! Required: `DIRECTORY_PATH`, `PACK_FILES_SMALLER_THAN`, `PACK_SIZE` and at
//! least one `WEBDAV_URL`/`WEBDAV_USERNAME`/`WEBDAV_PASSWORD`/
//! `WEBDAV_FILE_MIN_SIZE`/`WEBDAV_FILE_MAX_SIZE` group. Further groups use
//! the suffixes `_2`, `_3`, ... and end at the first missing `WEBDAV_URL_n`.

use std::path::PathBuf;
use std::time::Duration;

use crate::pack::PackConfig;
use crate::pipeline::PipelineOptions;
use crate::scheduler::RetryPolicy;
use crate::window::WindowBounds;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} config is not defined in the environment variables")]
    Missing(String),
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("WEBDAV config is not defined in the environment variables")]
    NoEndpoints,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub min_size: u64,
    pub max_size: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub directory: PathBuf,
    pub pack_files_smaller_than: u64,
    pub pack_size: u64,
    pub endpoints: Vec<EndpointConfig>,
    pub state_file: PathBuf,
    pub ignore: Vec<String>,
    pub bounds: WindowBounds,
    pub retry: RetryPolicy,
    pub check_exists: bool,
    pub remote_prefix: String,
    pub report_interval: Duration,
    pub request_timeout: Duration,
    pub dry_run: bool,
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    fn parse_u64(key: &str, raw: &str) -> Result<u64, ConfigError> {
        raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
    }

    fn required_u64(&self, key: &str) -> Result<u64, ConfigError> {
        Self::parse_u64(key, &self.required(key)?)
    }

    fn u64_or(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.get(key) {
            Some(raw) => Self::parse_u64(key, &raw),
            None => Ok(default),
        }
    }

    fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
                reason: "expected true or false".into(),
            }),
        }
    }
}

fn invalid(key: &str, value: u64, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn endpoint_suffix(index: usize) -> String {
    if index == 0 {
        String::new()
    } else {
        format!("_{}", index + 1)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let directory = PathBuf::from(env.required("DIRECTORY_PATH")?);
        let pack_files_smaller_than = env.required_u64("PACK_FILES_SMALLER_THAN")?;
        let pack_size = env.required_u64("PACK_SIZE")?;
        if pack_size == 0 {
            return Err(invalid("PACK_SIZE", pack_size, "must be greater than zero"));
        }

        let mut endpoints = Vec::new();
        loop {
            let sfx = endpoint_suffix(endpoints.len());
            let Some(url) = env.get(&format!("WEBDAV_URL{sfx}")) else {
                break;
            };
            let username = env.required(&format!("WEBDAV_USERNAME{sfx}"))?;
            let password = env.required(&format!("WEBDAV_PASSWORD{sfx}"))?;
            let min_key = format!("WEBDAV_FILE_MIN_SIZE{sfx}");
            let max_key = format!("WEBDAV_FILE_MAX_SIZE{sfx}");
            let min_size = env.required_u64(&min_key)?;
            let max_size = env.required_u64(&max_key)?;
            if min_size > max_size {
                return Err(invalid(&min_key, min_size, "exceeds the maximum size"));
            }
            endpoints.push(EndpointConfig {
                url,
                username,
                password,
                min_size,
                max_size,
            });
        }
        if endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }

        let defaults = WindowBounds::default();
        let bounds = WindowBounds {
            min_concurrency: env.u64_or("MIN_CONCURRENCY", defaults.min_concurrency as u64)?
                as usize,
            max_concurrency: env.u64_or("MAX_CONCURRENCY", defaults.max_concurrency as u64)?
                as usize,
            min_queued_bytes: env.u64_or("MIN_QUEUED_BYTES", defaults.min_queued_bytes)?,
            max_queued_bytes: env.u64_or("MAX_QUEUED_BYTES", defaults.max_queued_bytes)?,
        };
        if bounds.min_concurrency == 0 {
            return Err(invalid("MIN_CONCURRENCY", 0, "must be at least 1"));
        }
        if bounds.min_concurrency > bounds.max_concurrency {
            return Err(invalid(
                "MIN_CONCURRENCY",
                bounds.min_concurrency as u64,
                "exceeds MAX_CONCURRENCY",
            ));
        }
        if bounds.min_queued_bytes > bounds.max_queued_bytes {
            return Err(invalid(
                "MIN_QUEUED_BYTES",
                bounds.min_queued_bytes,
                "exceeds MAX_QUEUED_BYTES",
            ));
        }

        let retry_defaults = RetryPolicy::default();
        let max_retries = match env.get("MAX_RETRIES") {
            Some(raw) => {
                let n = Env::<F>::parse_u64("MAX_RETRIES", &raw)?;
                Some(u32::try_from(n).map_err(|_| invalid("MAX_RETRIES", n, "too large"))?)
            }
            None => None,
        };
        let retry = RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(
                env.u64_or("RETRY_DELAY_MS", retry_defaults.base_delay.as_millis() as u64)?,
            ),
            max_delay: Duration::from_millis(
                env.u64_or("RETRY_MAX_DELAY_MS", retry_defaults.max_delay.as_millis() as u64)?,
            ),
        };

        let ignore = env
            .get("IGNORE_PATHS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let report_ms = env.u64_or("REPORT_INTERVAL_MS", 1000)?;
        if report_ms == 0 {
            return Err(invalid("REPORT_INTERVAL_MS", 0, "must be greater than zero"));
        }

        Ok(Config {
            directory,
            pack_files_smaller_than,
            pack_size,
            endpoints,
            state_file: PathBuf::from(
                env.get("STATE_FILE")
                    .unwrap_or_else(|| "davsync-state.jsonl".to_string()),
            ),
            ignore,
            bounds,
            retry,
            check_exists: env.bool_or("CHECK_EXISTS", true)?,
            remote_prefix: env.get("REMOTE_PREFIX").unwrap_or_default(),
            report_interval: Duration::from_millis(report_ms),
            request_timeout: Duration::from_secs(env.u64_or("WEBDAV_TIMEOUT_SECS", 300)?),
            dry_run: env.bool_or("DRY_RUN", false)?,
            verbose: env.bool_or("VERBOSE", false)?,
            log_file: env.get("LOG_FILE").map(PathBuf::from),
        })
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            root: self.directory.clone(),
            ignore: self.ignore.clone(),
            pack: PackConfig {
                pack_files_smaller_than: self.pack_files_smaller_than,
                pack_size: self.pack_size,
            },
            bounds: self.bounds,
            retry: self.retry,
            check_exists: self.check_exists,
            remote_prefix: self.remote_prefix.clone(),
            report_interval: self.report_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("DIRECTORY_PATH", "/data"),
        ("PACK_FILES_SMALLER_THAN", "1000000"),
        ("PACK_SIZE", "50000000"),
        ("WEBDAV_URL", "https://dav.example.com/"),
        ("WEBDAV_USERNAME", "alice"),
        ("WEBDAV_PASSWORD", "secret"),
        ("WEBDAV_FILE_MIN_SIZE", "0"),
        ("WEBDAV_FILE_MAX_SIZE", "1000000000"),
    ];

    fn with(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        let mut v = BASE.to_vec();
        v.extend_from_slice(extra);
        v
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = Config::from_lookup(lookup(BASE)).unwrap();
        assert_eq!(cfg.directory, PathBuf::from("/data"));
        assert_eq!(cfg.pack_files_smaller_than, 1_000_000);
        assert_eq!(cfg.endpoints.len(), 1);
        assert_eq!(cfg.bounds.min_concurrency, 2);
        assert_eq!(cfg.bounds.max_concurrency, 30);
        assert_eq!(cfg.bounds.max_queued_bytes, 20_000_000);
        assert_eq!(cfg.retry.max_retries, None);
        assert!(cfg.check_exists);
        assert!(!cfg.dry_run);
    }

    #[test]
    fn each_required_key_is_reported() {
        for key in [
            "DIRECTORY_PATH",
            "PACK_FILES_SMALLER_THAN",
            "PACK_SIZE",
            "WEBDAV_USERNAME",
            "WEBDAV_PASSWORD",
            "WEBDAV_FILE_MIN_SIZE",
            "WEBDAV_FILE_MAX_SIZE",
        ] {
            let pairs: Vec<_> = BASE.iter().copied().filter(|(k, _)| *k != key).collect();
            let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
            assert_eq!(err, ConfigError::Missing(key.to_string()));
        }
        let pairs: Vec<_> = BASE
            .iter()
            .copied()
            .filter(|(k, _)| *k != "WEBDAV_URL")
            .collect();
        assert_eq!(
            Config::from_lookup(lookup(&pairs)).unwrap_err(),
            ConfigError::NoEndpoints
        );
    }

    #[test]
    fn numbered_endpoint_groups_are_read_in_order() {
        let pairs = with(&[
            ("WEBDAV_URL_2", "https://big.example.com/"),
            ("WEBDAV_USERNAME_2", "bob"),
            ("WEBDAV_PASSWORD_2", "pw"),
            ("WEBDAV_FILE_MIN_SIZE_2", "1000"),
            ("WEBDAV_FILE_MAX_SIZE_2", "99999999999"),
            // Gap at _3 ends the list.
            ("WEBDAV_URL_4", "https://ignored.example.com/"),
        ]);
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.endpoints.len(), 2);
        assert_eq!(cfg.endpoints[1].username, "bob");
        assert_eq!(cfg.endpoints[1].min_size, 1000);
    }

    #[test]
    fn incomplete_second_group_is_missing() {
        let pairs = with(&[("WEBDAV_URL_2", "https://big.example.com/")]);
        assert_eq!(
            Config::from_lookup(lookup(&pairs)).unwrap_err(),
            ConfigError::Missing("WEBDAV_USERNAME_2".into())
        );
    }

    #[test]
    fn rejects_bad_numbers_and_bounds() {
        let err = Config::from_lookup(lookup(&with(&[("PACK_SIZE", "lots")])));
        assert!(err.is_err());
        let pairs: Vec<_> = BASE
            .iter()
            .copied()
            .map(|(k, v)| if k == "PACK_SIZE" { (k, "abc") } else { (k, v) })
            .collect();
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid { .. })
        ));
        let pairs = with(&[("MIN_CONCURRENCY", "40")]);
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid { .. })
        ));
        let pairs = with(&[("DRY_RUN", "maybe")]);
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn optional_settings_are_parsed() {
        let pairs = with(&[
            ("IGNORE_PATHS", "/data/cache, /data/tmp ,"),
            ("MAX_RETRIES", "5"),
            ("RETRY_DELAY_MS", "250"),
            ("CHECK_EXISTS", "no"),
            ("DRY_RUN", "1"),
            ("REMOTE_PREFIX", "/backup"),
            ("MAX_CONCURRENCY", "8"),
        ]);
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.ignore, vec!["/data/cache", "/data/tmp"]);
        assert_eq!(cfg.retry.max_retries, Some(5));
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(250));
        assert!(!cfg.check_exists);
        assert!(cfg.dry_run);
        assert_eq!(cfg.remote_prefix, "/backup");
        assert_eq!(cfg.bounds.max_concurrency, 8);
        assert_eq!(cfg.pipeline_options().bounds.max_concurrency, 8);
    }
}
