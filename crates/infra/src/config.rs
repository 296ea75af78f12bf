//! Process configuration.
//!
//! Defaults first, then an optional JSON document, then `WARDEN_*`
//! variables on top.

use std::str::FromStr;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use warden_core::CacheConfig;
use warden_observability::LogConfig;
use warden_observability::tracing::{LOG_FILTER_ENV, LOG_FORMAT_ENV};
use warden_org::OrgConfig;
use warden_policy::PolicyDefaults;

use crate::spooler::SpoolerConfig;

/// Path of a JSON document applied before the single variables.
pub const CONFIG_FILE_ENV: &str = "WARDEN_CONFIG_FILE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub spooler: SpoolerConfig,
    pub user_cache: CacheConfig,
    pub org: OrgConfig,
    pub policy: PolicyDefaults,
    pub log: LogConfig,
}

impl WardenConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid warden configuration document")
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup(CONFIG_FILE_ENV) {
            Some(path) => {
                let json = std::fs::read_to_string(&path)
                    .with_context(|| format!("{CONFIG_FILE_ENV}: cannot read {path}"))?;
                Self::from_json_str(&json).with_context(|| format!("{CONFIG_FILE_ENV}: {path}"))?
            }
            None => Self::default(),
        };

        let spooler = &mut config.spooler;
        override_parsed(&lookup, "WARDEN_SPOOLER_BULK_LIMIT", &mut spooler.bulk_limit)?;
        override_parsed(
            &lookup,
            "WARDEN_SPOOLER_ERROR_COUNT_UNTIL_SKIP",
            &mut spooler.error_count_until_skip,
        )?;
        override_parsed(&lookup, "WARDEN_SPOOLER_POLL_INTERVAL_MS", &mut spooler.poll_interval_ms)?;
        override_parsed(&lookup, "WARDEN_SPOOLER_LOCK_DURATION_MS", &mut spooler.lock_duration_ms)?;
        override_parsed(&lookup, "WARDEN_SPOOLER_WORKER_ID", &mut spooler.worker_id)?;
        override_parsed(
            &lookup,
            "WARDEN_USER_CACHE_MAX_ENTRIES",
            &mut config.user_cache.max_entries,
        )?;
        override_parsed(&lookup, "WARDEN_IAM_DOMAIN", &mut config.org.iam_domain)?;
        override_parsed(&lookup, "WARDEN_IAM_ID", &mut config.org.iam_id)?;

        if config.spooler.bulk_limit == 0 {
            anyhow::bail!("WARDEN_SPOOLER_BULK_LIMIT must be greater than 0");
        }

        if let Some(filter) = lookup(LOG_FILTER_ENV) {
            config.log.filter = filter;
        }
        override_parsed(&lookup, LOG_FORMAT_ENV, &mut config.log.format)?;

        Ok(config)
    }
}

fn override_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .with_context(|| format!("{key}: cannot parse `{raw}`"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use warden_observability::LogFormat;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = WardenConfig::from_lookup(vars(&[])).unwrap();
        assert_eq!(config, WardenConfig::default());
        assert_eq!(config.spooler.error_count_until_skip, 5);
    }

    #[test]
    fn variables_override_defaults() {
        let config = WardenConfig::from_lookup(vars(&[
            ("WARDEN_SPOOLER_BULK_LIMIT", "25"),
            ("WARDEN_SPOOLER_ERROR_COUNT_UNTIL_SKIP", "3"),
            ("WARDEN_SPOOLER_WORKER_ID", "node-b"),
            ("WARDEN_USER_CACHE_MAX_ENTRIES", "64"),
            ("WARDEN_IAM_DOMAIN", "id.example.com"),
            ("WARDEN_LOG_FORMAT", "pretty"),
        ]))
        .unwrap();
        assert_eq!(config.spooler.bulk_limit, 25);
        assert_eq!(config.spooler.error_count_until_skip, 3);
        assert_eq!(config.spooler.worker_id, "node-b");
        assert_eq!(config.user_cache.max_entries, 64);
        assert_eq!(config.org.iam_domain, "id.example.com");
        assert_eq!(config.log.format, LogFormat::Pretty);
    }

    #[test]
    fn parse_failures_name_the_variable() {
        let err = WardenConfig::from_lookup(vars(&[("WARDEN_SPOOLER_BULK_LIMIT", "lots")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("WARDEN_SPOOLER_BULK_LIMIT"));
    }

    #[test]
    fn zero_bulk_limit_is_rejected() {
        assert!(WardenConfig::from_lookup(vars(&[("WARDEN_SPOOLER_BULK_LIMIT", "0")])).is_err());
    }

    #[test]
    fn partial_json_keeps_the_remaining_defaults() {
        let config = WardenConfig::from_json_str(
            r#"{ "spooler": { "bulk_limit": 10 }, "org": { "iam_domain": "iam.test" } }"#,
        )
        .unwrap();
        assert_eq!(config.spooler.bulk_limit, 10);
        assert_eq!(config.spooler.poll_interval_ms, 1_000);
        assert_eq!(config.org.iam_domain, "iam.test");
        assert_eq!(config.org.iam_id, "iam");
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(WardenConfig::from_json_str("{ spooler").is_err());
    }
}
