use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::Uncased,
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_INTERVAL_HOURS: u64 = 2;
pub const DEFAULT_MAX_ARTICLES_PER_SOURCE: usize = 50;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 3;
pub const DEFAULT_JOB_TIMEOUT_MINUTES: u64 = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_TICK_MS: u64 = 1_000;
pub const DEFAULT_RETENTION_HOURS: u64 = 24;
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 30;

const MAX_INTERVAL_HOURS: u64 = 24 * 366;
const MAX_JOB_TIMEOUT_MINUTES: u64 = 24 * 60;
const MAX_TICK_MS: u64 = 3_600_000;
const MAX_RETENTION_HOURS: u64 = 24 * 366 * 10;
const MAX_INITIAL_DELAY_SECS: u64 = 24 * 3600;
const MAX_RETRY_DELAY_MS: u64 = 3_600_000;

/// Legacy operator env vars, mapped onto their nested config keys.
const OPERATOR_ENV_KEYS: &[(&str, &str)] = &[
    ("SCRAPE_INTERVAL_HOURS", "scheduler.interval_hours"),
    ("MAX_ARTICLES_PER_SOURCE", "executor.max_articles_per_source"),
    ("MAX_CONCURRENT_TASKS", "executor.max_concurrent_jobs"),
    ("TASK_TIMEOUT_MINUTES", "executor.job_timeout_minutes"),
];

/// Portals scraped by default, with the JSON feed each one is read from.
const DEFAULT_SOURCES: &[(&str, &str)] = &[
    ("aktualne", "https://zpravy.aktualne.cz/feed.json"),
    ("novinky", "https://www.novinky.cz/feed.json"),
    ("idnes", "https://www.idnes.cz/feed.json"),
    ("ihned", "https://ihned.cz/feed.json"),
    ("seznamzpravy", "https://www.seznamzpravy.cz/feed.json"),
    ("blesk", "https://www.blesk.cz/feed.json"),
    ("ct24", "https://ct24.ceskatelevize.cz/feed.json"),
    ("irozhlas", "https://www.irozhlas.cz/feed.json"),
    ("lidovky", "https://www.lidovky.cz/feed.json"),
    ("denik", "https://www.denik.cz/feed.json"),
    ("forum24", "https://www.forum24.cz/feed.json"),
    ("e15", "https://www.e15.cz/feed.json"),
];

/// Top-level config (zpravy.toml + ZPRAVY_* env overrides + operator env vars).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZpravyConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
}

impl Default for ZpravyConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
            sources: default_sources(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Timer loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval registered for every source at start-up.
    /// Override with env var: SCRAPE_INTERVAL_HOURS
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
    /// How often the timer loop looks for due triggers.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Finished jobs older than this are purged.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// Scrape every source once this long after start-up. 0 disables it.
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_hours: DEFAULT_INTERVAL_HOURS,
            tick_ms: DEFAULT_TICK_MS,
            retention_hours: DEFAULT_RETENTION_HOURS,
            initial_delay_secs: DEFAULT_INITIAL_DELAY_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.saturating_mul(3600))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }

    /// `None` when the start-up scrape is disabled.
    pub fn initial_delay(&self) -> Option<Duration> {
        (self.initial_delay_secs > 0).then(|| Duration::from_secs(self.initial_delay_secs))
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Override with env var: MAX_CONCURRENT_TASKS
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Override with env var: TASK_TIMEOUT_MINUTES
    #[serde(default = "default_job_timeout_minutes")]
    pub job_timeout_minutes: u64,
    /// Cap handed to the fetcher on every call.
    /// Override with env var: MAX_ARTICLES_PER_SOURCE
    #[serde(default = "default_max_articles_per_source")]
    pub max_articles_per_source: usize,
    /// Retries after the first attempt for transient fetch failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            job_timeout_minutes: DEFAULT_JOB_TIMEOUT_MINUTES,
            max_articles_per_source: DEFAULT_MAX_ARTICLES_PER_SOURCE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl ExecutorConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_minutes.saturating_mul(60))
    }
}

/// A news portal the fetcher knows how to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub feed_url: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_interval_hours() -> u64 {
    DEFAULT_INTERVAL_HOURS
}
fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}
fn default_retention_hours() -> u64 {
    DEFAULT_RETENTION_HOURS
}
fn default_initial_delay_secs() -> u64 {
    DEFAULT_INITIAL_DELAY_SECS
}
fn default_max_concurrent_jobs() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}
fn default_job_timeout_minutes() -> u64 {
    DEFAULT_JOB_TIMEOUT_MINUTES
}
fn default_max_articles_per_source() -> usize {
    DEFAULT_MAX_ARTICLES_PER_SOURCE
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}
fn default_retry_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}
fn default_sources() -> Vec<SourceConfig> {
    DEFAULT_SOURCES
        .iter()
        .map(|(name, feed_url)| SourceConfig {
            name: name.to_string(),
            feed_url: feed_url.to_string(),
        })
        .collect()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.zpravy/zpravy.db", home)
}

impl ZpravyConfig {
    /// Load config from a TOML file with env var overrides.
    ///
    /// Precedence, lowest first:
    ///   1. built-in defaults
    ///   2. explicit path argument, else ~/.zpravy/zpravy.toml
    ///   3. ZPRAVY_* vars, `__` separating nested keys
    ///   4. SCRAPE_INTERVAL_HOURS, MAX_ARTICLES_PER_SOURCE,
    ///      MAX_CONCURRENT_TASKS, TASK_TIMEOUT_MINUTES
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ZpravyConfig = Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::ZpravyError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn figment(path: &str) -> Figment {
        let operator_keys: Vec<&str> = OPERATOR_ENV_KEYS.iter().map(|(env, _)| *env).collect();

        Figment::from(Serialized::defaults(ZpravyConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ZPRAVY_").split("__"))
            .merge(Env::raw().only(&operator_keys).map(|key| {
                OPERATOR_ENV_KEYS
                    .iter()
                    .find(|(env, _)| key.as_str().eq_ignore_ascii_case(env))
                    .map(|(_, nested)| Uncased::from(*nested))
                    .unwrap_or_else(|| key.into())
            }))
    }

    /// Reject values the executor and scheduler cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::ZpravyError;

        if self.executor.max_concurrent_jobs == 0 {
            return Err(ZpravyError::Config(
                "executor.max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        let bounds = [
            ("executor.job_timeout_minutes", self.executor.job_timeout_minutes, 1, MAX_JOB_TIMEOUT_MINUTES),
            ("executor.retry_base_delay_ms", self.executor.retry_base_delay_ms, 0, MAX_RETRY_DELAY_MS),
            ("executor.retry_max_delay_ms", self.executor.retry_max_delay_ms, 0, MAX_RETRY_DELAY_MS),
            ("scheduler.interval_hours", self.scheduler.interval_hours, 1, MAX_INTERVAL_HOURS),
            ("scheduler.tick_ms", self.scheduler.tick_ms, 1, MAX_TICK_MS),
            ("scheduler.retention_hours", self.scheduler.retention_hours, 0, MAX_RETENTION_HOURS),
            ("scheduler.initial_delay_secs", self.scheduler.initial_delay_secs, 0, MAX_INITIAL_DELAY_SECS),
        ];
        for (key, value, min, max) in bounds {
            if !(min..=max).contains(&value) {
                return Err(ZpravyError::Config(format!(
                    "{key} must be between {min} and {max}, got {value}"
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ZpravyError::Config("source name must not be empty".to_string()));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(ZpravyError::Config(format!(
                    "duplicate source: {}",
                    source.name
                )));
            }
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.zpravy/zpravy.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = ZpravyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sources.len(), 12);
        assert_eq!(config.executor.max_retries, 3);
    }

    #[test]
    fn operator_env_vars_override_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "zpravy.toml",
                r#"
                [executor]
                max_concurrent_jobs = 8
                job_timeout_minutes = 4
                "#,
            )?;
            jail.set_env("MAX_CONCURRENT_TASKS", "5");
            jail.set_env("SCRAPE_INTERVAL_HOURS", "6");
            jail.set_env("MAX_ARTICLES_PER_SOURCE", "20");

            let config = ZpravyConfig::load(Some("zpravy.toml")).expect("load");
            assert_eq!(config.executor.max_concurrent_jobs, 5);
            assert_eq!(config.executor.job_timeout_minutes, 4);
            assert_eq!(config.executor.max_articles_per_source, 20);
            assert_eq!(config.scheduler.interval_hours, 6);
            Ok(())
        });
    }

    #[test]
    fn prefixed_env_uses_double_underscore_nesting() {
        Jail::expect_with(|jail| {
            jail.set_env("ZPRAVY_EXECUTOR__MAX_RETRIES", "7");
            jail.set_env("ZPRAVY_GATEWAY__PORT", "9100");

            let config = ZpravyConfig::load(Some("missing.toml")).expect("load");
            assert_eq!(config.executor.max_retries, 7);
            assert_eq!(config.gateway.port, 9100);
            Ok(())
        });
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("MAX_CONCURRENT_TASKS", "0");
            assert!(ZpravyConfig::load(Some("missing.toml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn zero_interval_fails_load() {
        Jail::expect_with(|jail| {
            jail.set_env("SCRAPE_INTERVAL_HOURS", "0");
            let err = ZpravyConfig::load(Some("missing.toml")).unwrap_err();
            assert!(err.to_string().contains("scheduler.interval_hours"));
            Ok(())
        });
    }

    #[test]
    fn values_that_overflow_durations_are_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("SCRAPE_INTERVAL_HOURS", u64::MAX.to_string());
            assert!(ZpravyConfig::load(Some("missing.toml")).is_err());
            Ok(())
        });

        let mut config = ZpravyConfig::default();
        config.executor.job_timeout_minutes = u64::MAX / 2;
        assert!(config.validate().is_err());
        assert_eq!(
            config.executor.job_timeout(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn initial_delay_zero_disables_startup_scrape() {
        let mut config = SchedulerConfig::default();
        assert_eq!(config.initial_delay(), Some(Duration::from_secs(30)));
        config.initial_delay_secs = 0;
        assert_eq!(config.initial_delay(), None);
    }

    #[test]
    fn duplicate_sources_are_rejected() {
        let mut config = ZpravyConfig::default();
        config.sources.push(config.sources[0].clone());
        assert!(config.validate().is_err());
    }
}
