use std::time::Duration;

use crate::error::{AppError, Result};

pub const CMC_API_URL: &str = "https://pro-api.coinmarketcap.com/v1";

/// Listings are always converted to this single reporting currency.
pub const CONVERT_CURRENCY: &str = "USD";

/// Timeout for one listings request (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_REFRESH_INTERVAL_MINUTES: u64 = 15;

/// Records requested per cycle when FETCH_LIMIT is unset.
pub const DEFAULT_FETCH_LIMIT: usize = 200;

/// Upper bound accepted for FETCH_LIMIT. The listings endpoint caps `limit` at 5000.
pub const MAX_FETCH_LIMIT: usize = 5000;

/// Size of the ranked `/cryptos` view.
pub const DEFAULT_TOP_N: usize = 50;

/// How a fetched snapshot is written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistPolicy {
    /// Insert or update keyed by coin id. Rows missing from the current fetch are kept.
    Upsert,
    /// Delete every row then insert the snapshot, in one transaction. Only sound while
    /// nothing reads the table directly during a cycle.
    Replace,
}

impl std::str::FromStr for PersistPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upsert" => Ok(PersistPolicy::Upsert),
            "replace" => Ok(PersistPolicy::Replace),
            other => Err(AppError::Config(format!(
                "PERSIST_POLICY must be 'upsert' or 'replace', got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for PersistPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistPolicy::Upsert => write!(f, "upsert"),
            PersistPolicy::Replace => write!(f, "replace"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Listings API key (API_KEY, falling back to COINMARKETCAP_API_KEY). Empty in dev mode.
    pub api_key: String,
    pub cmc_api_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Period between refresh cycles (REFRESH_INTERVAL_MINUTES)
    pub refresh_interval: Duration,
    /// Max records requested per cycle (FETCH_LIMIT)
    pub fetch_limit: usize,
    /// Default size of the ranked view (TOP_N)
    pub top_n: usize,
    /// Skip the listings API and only hydrate from the store (DEV_MODE)
    pub dev_mode: bool,
    /// Hydrate from the store at startup and defer the first fetch by one period (COLD_START)
    pub cold_start: bool,
    pub persist_policy: PersistPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dev_mode = lookup("DEV_MODE").map(|v| parse_flag(&v)).unwrap_or(false);

        let api_key = lookup("API_KEY")
            .or_else(|| lookup("COINMARKETCAP_API_KEY"))
            .map(|k| k.trim().to_string())
            .unwrap_or_default();
        if api_key.is_empty() && !dev_mode {
            return Err(AppError::Config(
                "API_KEY is required unless DEV_MODE is enabled".to_string(),
            ));
        }

        let refresh_minutes = match lookup("REFRESH_INTERVAL_MINUTES") {
            Some(v) => v.trim().parse::<u64>().map_err(|_| {
                AppError::Config("REFRESH_INTERVAL_MINUTES must be a whole number".to_string())
            })?,
            None => DEFAULT_REFRESH_INTERVAL_MINUTES,
        };
        if refresh_minutes == 0 {
            return Err(AppError::Config(
                "REFRESH_INTERVAL_MINUTES must be at least 1".to_string(),
            ));
        }
        let refresh_secs = refresh_minutes.checked_mul(60).ok_or_else(|| {
            AppError::Config("REFRESH_INTERVAL_MINUTES is too large".to_string())
        })?;

        let fetch_limit = match lookup("FETCH_LIMIT") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| AppError::Config("FETCH_LIMIT must be a whole number".to_string()))?,
            None => DEFAULT_FETCH_LIMIT,
        };
        if fetch_limit == 0 || fetch_limit > MAX_FETCH_LIMIT {
            return Err(AppError::Config(format!(
                "FETCH_LIMIT must be between 1 and {MAX_FETCH_LIMIT}"
            )));
        }

        // The ranked view is bounded by one fetch.
        let top_n = match lookup("TOP_N") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| AppError::Config("TOP_N must be a whole number".to_string()))?,
            None => DEFAULT_TOP_N.min(fetch_limit),
        };
        if top_n == 0 || top_n > fetch_limit {
            return Err(AppError::Config(format!(
                "TOP_N must be between 1 and FETCH_LIMIT ({fetch_limit})"
            )));
        }

        Ok(Self {
            api_key,
            cmc_api_url: lookup("CMC_API_URL").unwrap_or_else(|| CMC_API_URL.to_string()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            db_path: lookup("DB_PATH").unwrap_or_else(|| "coins.db".to_string()),
            api_port: lookup("API_PORT")
                .unwrap_or_else(|| "8000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            refresh_interval: Duration::from_secs(refresh_secs),
            fetch_limit,
            top_n,
            dev_mode,
            cold_start: lookup("COLD_START").map(|v| parse_flag(&v)).unwrap_or(false),
            persist_policy: match lookup("PERSIST_POLICY") {
                Some(v) => v.parse()?,
                None => PersistPolicy::Upsert,
            },
        })
    }
}

fn parse_flag(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_api_key_is_set() {
        let cfg = Config::from_lookup(lookup_from(&[("API_KEY", "k")])).unwrap();
        assert_eq!(cfg.api_key, "k");
        assert_eq!(cfg.refresh_interval, Duration::from_secs(15 * 60));
        assert_eq!(cfg.fetch_limit, DEFAULT_FETCH_LIMIT);
        assert_eq!(cfg.top_n, 50);
        assert_eq!(cfg.api_port, 8000);
        assert_eq!(cfg.persist_policy, PersistPolicy::Upsert);
        assert!(!cfg.dev_mode);
        assert!(!cfg.cold_start);
    }

    #[test]
    fn missing_api_key_is_fatal_outside_dev_mode() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err = Config::from_lookup(lookup_from(&[("API_KEY", "   ")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn dev_mode_does_not_need_an_api_key() {
        let cfg = Config::from_lookup(lookup_from(&[("DEV_MODE", "true")])).unwrap();
        assert!(cfg.dev_mode);
        assert!(cfg.api_key.is_empty());
    }

    #[test]
    fn legacy_key_name_is_accepted() {
        let cfg = Config::from_lookup(lookup_from(&[("COINMARKETCAP_API_KEY", "legacy")])).unwrap();
        assert_eq!(cfg.api_key, "legacy");
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        for (key, value) in [
            ("REFRESH_INTERVAL_MINUTES", "0"),
            ("REFRESH_INTERVAL_MINUTES", "soon"),
            ("REFRESH_INTERVAL_MINUTES", "18446744073709551615"),
            ("FETCH_LIMIT", "0"),
            ("FETCH_LIMIT", "100000"),
            ("TOP_N", "0"),
            ("TOP_N", "fifty"),
            ("TOP_N", "201"),
            ("API_PORT", "99999"),
            ("PERSIST_POLICY", "append"),
        ] {
            let result = Config::from_lookup(lookup_from(&[("API_KEY", "k"), (key, value)]));
            assert!(result.is_err(), "{key}={value} should be rejected");
        }
    }

    #[test]
    fn replace_policy_and_flags_parse() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("API_KEY", "k"),
            ("PERSIST_POLICY", "Replace"),
            ("COLD_START", "1"),
            ("FETCH_LIMIT", "50"),
            ("REFRESH_INTERVAL_MINUTES", "5"),
        ]))
        .unwrap();
        assert_eq!(cfg.persist_policy, PersistPolicy::Replace);
        assert!(cfg.cold_start);
        assert_eq!(cfg.fetch_limit, 50);
        assert_eq!(cfg.refresh_interval, Duration::from_secs(300));
    }

    #[test]
    fn default_top_n_shrinks_to_a_small_fetch_limit() {
        let cfg =
            Config::from_lookup(lookup_from(&[("API_KEY", "k"), ("FETCH_LIMIT", "20")])).unwrap();
        assert_eq!(cfg.top_n, 20);

        let err = Config::from_lookup(lookup_from(&[
            ("API_KEY", "k"),
            ("FETCH_LIMIT", "20"),
            ("TOP_N", "30"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
