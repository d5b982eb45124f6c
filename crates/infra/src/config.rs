//! Hierarchy configuration loaded from the environment.

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_ARCHIVE_GRACE_PERIOD: Duration = Duration::from_secs(15 * 24 * 60 * 60);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_CACHE_MAX_CAPACITY: u64 = 10_000;
pub const DEFAULT_PURGE_MAX_ATTEMPTS: u32 = 5;

/// Largest worker id a Snowflake generator accepts (10 bits).
pub const MAX_WORKER_ID: u16 = 1023;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyConfig {
    /// Delay between archiving a node and its purge.
    pub archive_grace_period: Duration,
    pub cache_ttl: Duration,
    pub cache_max_capacity: u64,
    /// Attempts of a purge job before it is dead-lettered.
    pub purge_max_attempts: u32,
    pub worker_id: u16,
    /// Only detach edges whose descendant is a leaf.
    pub leaf_only_detach: bool,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            archive_grace_period: DEFAULT_ARCHIVE_GRACE_PERIOD,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_max_capacity: DEFAULT_CACHE_MAX_CAPACITY,
            purge_max_attempts: DEFAULT_PURGE_MAX_ATTEMPTS,
            worker_id: 0,
            leaf_only_detach: true,
            database_url: None,
            redis_url: None,
        }
    }
}

impl HierarchyConfig {
    /// Read `TRELLIS_*`, `DATABASE_URL` and `REDIS_URL`; unset variables keep
    /// their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let worker_id = parse(&lookup, "TRELLIS_WORKER_ID", defaults.worker_id)?;
        if worker_id > MAX_WORKER_ID {
            return Err(ConfigError::Invalid {
                var: "TRELLIS_WORKER_ID",
                value: worker_id.to_string(),
                reason: format!("must be at most {MAX_WORKER_ID}"),
            });
        }

        Ok(Self {
            archive_grace_period: Duration::from_secs(parse(
                &lookup,
                "TRELLIS_ARCHIVE_GRACE_PERIOD_SECS",
                defaults.archive_grace_period.as_secs(),
            )?),
            cache_ttl: Duration::from_secs(parse(
                &lookup,
                "TRELLIS_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
            cache_max_capacity: parse(
                &lookup,
                "TRELLIS_CACHE_MAX_CAPACITY",
                defaults.cache_max_capacity,
            )?,
            purge_max_attempts: parse(
                &lookup,
                "TRELLIS_PURGE_MAX_ATTEMPTS",
                defaults.purge_max_attempts,
            )?,
            worker_id,
            leaf_only_detach: parse(&lookup, "TRELLIS_LEAF_ONLY_DETACH", defaults.leaf_only_detach)?,
            database_url: non_empty(lookup("DATABASE_URL")),
            redis_url: non_empty(lookup("REDIS_URL")),
        })
    }

    pub fn with_archive_grace_period(mut self, period: Duration) -> Self {
        self.archive_grace_period = period;
        self
    }

    pub fn with_leaf_only_detach(mut self, enabled: bool) -> Self {
        self.leaf_only_detach = enabled;
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup(var)) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = HierarchyConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, HierarchyConfig::default());
        assert_eq!(config.archive_grace_period, Duration::from_secs(1_296_000));
    }

    #[test]
    fn variables_override_defaults() {
        let config = HierarchyConfig::from_lookup(lookup(&[
            ("TRELLIS_ARCHIVE_GRACE_PERIOD_SECS", "60"),
            ("TRELLIS_CACHE_MAX_CAPACITY", "42"),
            ("TRELLIS_WORKER_ID", "7"),
            ("TRELLIS_LEAF_ONLY_DETACH", "false"),
            ("DATABASE_URL", "postgres://localhost/trellis"),
            ("REDIS_URL", ""),
        ]))
        .unwrap();
        assert_eq!(config.archive_grace_period, Duration::from_secs(60));
        assert_eq!(config.cache_max_capacity, 42);
        assert_eq!(config.worker_id, 7);
        assert!(!config.leaf_only_detach);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/trellis"));
        assert_eq!(config.redis_url, None);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = HierarchyConfig::from_lookup(lookup(&[("TRELLIS_CACHE_TTL_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("TRELLIS_CACHE_TTL_SECS"));

        let err =
            HierarchyConfig::from_lookup(lookup(&[("TRELLIS_WORKER_ID", "4096")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "TRELLIS_WORKER_ID", .. }));
    }
}
