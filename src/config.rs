// src/config.rs
//! Environment-driven settings for the generator binary.

use crate::error::ConfigError;
use crate::workflow::executor::ExecutorConfig;
use crate::workflow::retry::{Jitter, RetryPolicy};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_ARK_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";

#[derive(Debug, Clone)]
pub struct Settings {
    pub ark_api_key: String,
    pub ark_base_url: String,
    pub llm_model: String,
    pub image_model: String,
    pub image_size: String,
    pub video_model: String,

    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_voice_id: String,

    pub output_dir: PathBuf,
    /// Prefix for URLs handed out by the object store; empty means plain file paths.
    pub public_base_url: Option<String>,
    /// Postgres checkpoints when set, in-memory otherwise.
    pub database_url: Option<String>,

    pub max_concurrency: Option<usize>,
    pub retry: RetryPolicy,
    pub video_poll_interval: Duration,
    pub video_timeout: Duration,
    pub max_clip_seconds: f64,
    pub stage_timeout: Duration,
    /// Per-attempt bound for image and video units; unbounded when unset.
    pub unit_timeout: Option<Duration>,

    pub bgm_path: Option<PathBuf>,
    pub bgm_volume: f64,

    /// Postgres checkpoints older than this are removed at startup.
    pub checkpoint_retention_days: Option<i64>,
}

impl Settings {
    /// Load `.env` (if present) and read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ark_api_key = get("ARK_API_KEY").ok_or(ConfigError::Missing("ARK_API_KEY"))?;

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "RETRY_MAX_ATTEMPTS", 3u32)?,
            base_delay: Duration::from_millis(parse_or(&get, "RETRY_BASE_DELAY_MS", 1000u64)?),
            multiplier: checked(
                "RETRY_MULTIPLIER",
                parse_or(&get, "RETRY_MULTIPLIER", 2.0f64)?,
                |m| m.is_finite() && *m >= 1.0,
            )?,
            max_delay: Duration::from_secs(30),
            jitter: Jitter::Full,
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "RETRY_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        let max_concurrency = match get("MAX_CONCURRENCY") {
            Some(raw) => {
                let n = parse_value::<usize>("MAX_CONCURRENCY", &raw)?;
                if n == 0 { None } else { Some(n) }
            }
            None => None,
        };

        Ok(Self {
            ark_api_key,
            ark_base_url: get("ARK_BASE_URL").unwrap_or_else(|| DEFAULT_ARK_BASE_URL.to_string()),
            llm_model: get("LLM_MODEL").unwrap_or_else(|| "doubao-seed-1-8-251228".to_string()),
            image_model: get("IMAGE_MODEL")
                .unwrap_or_else(|| "doubao-seedream-3-0-t2i-250415".to_string()),
            image_size: get("IMAGE_SIZE").unwrap_or_else(|| "1080x1920".to_string()),
            video_model: get("VIDEO_MODEL")
                .unwrap_or_else(|| "doubao-seedance-1-0-pro-fast-251015".to_string()),
            elevenlabs_api_key: get("ELEVENLABS_API_KEY"),
            elevenlabs_voice_id: get("ELEVENLABS_VOICE_ID")
                .unwrap_or_else(|| "21m00Tcm4TlvDq8ikWAM".to_string()),
            output_dir: get("OUTPUT_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("outputs")),
            public_base_url: get("PUBLIC_BASE_URL"),
            database_url: get("DATABASE_URL"),
            max_concurrency,
            retry,
            video_poll_interval: Duration::from_secs(checked(
                "VIDEO_POLL_INTERVAL_SECS",
                parse_or(&get, "VIDEO_POLL_INTERVAL_SECS", 3u64)?,
                |secs| *secs > 0,
            )?),
            video_timeout: Duration::from_secs(parse_or(&get, "VIDEO_TIMEOUT_SECS", 300u64)?),
            max_clip_seconds: checked(
                "MAX_CLIP_SECONDS",
                parse_or(&get, "MAX_CLIP_SECONDS", 5.0f64)?,
                |secs| secs.is_finite() && *secs > 0.0,
            )?,
            stage_timeout: Duration::from_secs(parse_or(&get, "STAGE_TIMEOUT_SECS", 1800u64)?),
            unit_timeout: match get("UNIT_TIMEOUT_SECS") {
                Some(raw) => Some(Duration::from_secs(checked(
                    "UNIT_TIMEOUT_SECS",
                    parse_value::<u64>("UNIT_TIMEOUT_SECS", &raw)?,
                    |secs| *secs > 0,
                )?)),
                None => None,
            },
            bgm_path: get("BGM_PATH").map(PathBuf::from),
            bgm_volume: checked(
                "BGM_VOLUME",
                parse_or(&get, "BGM_VOLUME", 0.2f64)?,
                |v| v.is_finite() && *v >= 0.0,
            )?,
            checkpoint_retention_days: match get("CHECKPOINT_RETENTION_DAYS") {
                Some(raw) => Some(checked(
                    "CHECKPOINT_RETENTION_DAYS",
                    parse_value::<i64>("CHECKPOINT_RETENTION_DAYS", &raw)?,
                    |days| *days > 0,
                )?),
                None => None,
            },
        })
    }
}

impl Settings {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            stage_timeout: self.stage_timeout,
            unit_timeout: self.unit_timeout,
            max_concurrency: self.max_concurrency,
            retry: self.retry.clone(),
            poll_interval: self.video_poll_interval,
            poll_timeout: self.video_timeout,
            max_clip_seconds: self.max_clip_seconds,
            bgm_path: self.bgm_path.as_ref().map(|p| p.to_string_lossy().to_string()),
            bgm_volume: self.bgm_volume,
            ..ExecutorConfig::default()
        }
    }
}

fn parse_value<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}

/// Reject a parsed value that is out of range.
fn checked<T, P>(name: &'static str, value: T, valid: P) -> Result<T, ConfigError>
where
    T: std::fmt::Display,
    P: Fn(&T) -> bool,
{
    if valid(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings_from(&[("ARK_API_KEY", "k")]).unwrap();
        assert_eq!(s.ark_base_url, DEFAULT_ARK_BASE_URL);
        assert_eq!(s.retry.max_attempts, 3);
        assert_eq!(s.retry.base_delay, Duration::from_secs(1));
        assert_eq!(s.retry.multiplier, 2.0);
        assert_eq!(s.video_poll_interval, Duration::from_secs(3));
        assert_eq!(s.video_timeout, Duration::from_secs(300));
        assert_eq!(s.bgm_volume, 0.2);
        assert!(s.max_concurrency.is_none());
        assert!(s.database_url.is_none());
        assert!(s.unit_timeout.is_none());
        assert!(s.checkpoint_retention_days.is_none());
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let cases = [
            ("MAX_CLIP_SECONDS", "NaN"),
            ("MAX_CLIP_SECONDS", "-1"),
            ("MAX_CLIP_SECONDS", "0"),
            ("BGM_VOLUME", "NaN"),
            ("BGM_VOLUME", "-0.5"),
            ("VIDEO_POLL_INTERVAL_SECS", "0"),
            ("RETRY_MULTIPLIER", "0.5"),
            ("UNIT_TIMEOUT_SECS", "0"),
            ("CHECKPOINT_RETENTION_DAYS", "-3"),
        ];
        for (name, value) in cases {
            let err = settings_from(&[("ARK_API_KEY", "k"), (name, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { name: n, .. } if n == name),
                "{}={} should be rejected",
                name,
                value
            );
        }
    }

    #[test]
    fn test_missing_api_key() {
        assert!(matches!(
            settings_from(&[]),
            Err(ConfigError::Missing("ARK_API_KEY"))
        ));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = settings_from(&[("ARK_API_KEY", "k"), ("MAX_CONCURRENCY", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "MAX_CONCURRENCY", .. }));
    }

    #[test]
    fn test_zero_concurrency_means_unbounded() {
        let s = settings_from(&[("ARK_API_KEY", "k"), ("MAX_CONCURRENCY", "0")]).unwrap();
        assert!(s.max_concurrency.is_none());
        let s = settings_from(&[("ARK_API_KEY", "k"), ("MAX_CONCURRENCY", "4")]).unwrap();
        assert_eq!(s.max_concurrency, Some(4));
    }

    #[test]
    fn test_executor_config_follows_settings() {
        let s = settings_from(&[
            ("ARK_API_KEY", "k"),
            ("VIDEO_TIMEOUT_SECS", "60"),
            ("BGM_PATH", "/music/calm.mp3"),
            ("MAX_CLIP_SECONDS", "3.5"),
            ("UNIT_TIMEOUT_SECS", "90"),
        ])
        .unwrap();
        let config = s.executor_config();
        assert_eq!(config.unit_timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.poll_timeout, Duration::from_secs(60));
        assert_eq!(config.bgm_path.as_deref(), Some("/music/calm.mp3"));
        assert_eq!(config.max_clip_seconds, 3.5);
        assert_eq!(config.retry, s.retry);
    }
}
