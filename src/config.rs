// Process configuration, read from the environment (and `.env`, if present).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Longest TTL any cache accepts.
pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// TTL of each endpoint family's cache.
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub live_stop: Duration,
    pub live_trip: Duration,
    pub search: Duration,
    pub entity: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        CacheTtls {
            live_stop: Duration::from_secs(30),
            live_trip: Duration::from_secs(10),
            search: Duration::from_secs(60 * 60),
            entity: Duration::from_secs(500 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub origin_base_url: String,
    pub origin_timeout: Duration,
    pub allowed_origins: Vec<String>,
    pub ttls: CacheTtls,
    pub cache_max_entries: usize,
    pub cache_sweep_interval: Duration,
    pub search_limit: usize,
    pub gtfs_path: Option<PathBuf>,
    pub gtfs_url: Option<String>,
    pub snapshot_max_age_days: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bind_addr: "0.0.0.0:8080".to_string(),
            origin_base_url: String::new(),
            origin_timeout: Duration::from_secs(8),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8080".to_string(),
            ],
            ttls: CacheTtls::default(),
            cache_max_entries: 10_000,
            cache_sweep_interval: Duration::from_secs(60),
            search_limit: 25,
            gtfs_path: None,
            gtfs_url: None,
            snapshot_max_age_days: 7,
        }
    }
}

impl Settings {
    /// Reads settings from the process environment. `.env` is loaded by the
    /// binary before logging starts.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable source. Unset variables
    /// keep their defaults; `ORIGIN_BASE_URL` is required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Settings::default();

        let origin_base_url = var("ORIGIN_BASE_URL").ok_or(ConfigError::Missing("ORIGIN_BASE_URL"))?;
        if !origin_base_url.starts_with("http://") && !origin_base_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                name: "ORIGIN_BASE_URL",
                value: origin_base_url,
                reason: "must start with http:// or https://".to_string(),
            });
        }

        let allowed_origins = match var("ALLOWED_ORIGINS") {
            Some(list) => list
                .split(',')
                .map(|o| o.trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            None => defaults.allowed_origins,
        };

        let secs = |name: &'static str, default: Duration| -> Result<Duration> {
            Ok(parse_var::<u64>(name, var(name))?.map_or(default, Duration::from_secs))
        };

        let nonzero_secs = |name: &'static str, default: Duration| -> Result<Duration> {
            let value = secs(name, default)?;
            if value.is_zero() {
                return Err(invalid(name, "0", "must be greater than zero"));
            }
            Ok(value)
        };

        let ttl = |name: &'static str, default: Duration| -> Result<Duration> {
            let value = secs(name, default)?;
            if value > MAX_TTL {
                return Err(invalid(
                    name,
                    &value.as_secs().to_string(),
                    &format!("must be at most {} seconds", MAX_TTL.as_secs()),
                ));
            }
            Ok(value)
        };

        let count = |name: &'static str, default: usize| -> Result<usize> {
            let value = parse_var(name, var(name))?.unwrap_or(default);
            if value == 0 {
                return Err(invalid(name, "0", "must be greater than zero"));
            }
            Ok(value)
        };

        let ttls = CacheTtls {
            live_stop: ttl("LIVE_STOP_TTL_SECS", defaults.ttls.live_stop)?,
            live_trip: ttl("LIVE_TRIP_TTL_SECS", defaults.ttls.live_trip)?,
            search: ttl("SEARCH_TTL_SECS", defaults.ttls.search)?,
            entity: ttl("ENTITY_TTL_SECS", defaults.ttls.entity)?,
        };

        Ok(Settings {
            bind_addr: var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            origin_base_url,
            origin_timeout: nonzero_secs("ORIGIN_TIMEOUT_SECS", defaults.origin_timeout)?,
            allowed_origins,
            ttls,
            cache_max_entries: count("CACHE_MAX_ENTRIES", defaults.cache_max_entries)?,
            cache_sweep_interval: nonzero_secs("CACHE_SWEEP_SECS", defaults.cache_sweep_interval)?,
            search_limit: count("SEARCH_LIMIT", defaults.search_limit)?,
            gtfs_path: var("GTFS_PATH").map(PathBuf::from),
            gtfs_url: var("GTFS_URL"),
            snapshot_max_age_days: parse_var("SNAPSHOT_MAX_AGE_DAYS", var("SNAPSHOT_MAX_AGE_DAYS"))?
                .unwrap_or(defaults.snapshot_max_age_days),
        })
    }
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<T>(name: &'static str, raw: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value.parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_origin_is_set() {
        let settings = settings_from(&[("ORIGIN_BASE_URL", "https://operator.example")]).unwrap();

        assert_eq!(settings.bind_addr, "0.0.0.0:8080");
        assert_eq!(settings.ttls.live_trip, Duration::from_secs(10));
        assert_eq!(settings.ttls.entity, Duration::from_secs(30_000));
        assert_eq!(settings.origin_timeout, Duration::from_secs(8));
        assert!(settings.gtfs_path.is_none());
    }

    #[test]
    fn origin_base_url_is_required() {
        assert!(matches!(
            settings_from(&[]),
            Err(ConfigError::Missing("ORIGIN_BASE_URL"))
        ));
        assert!(matches!(
            settings_from(&[("ORIGIN_BASE_URL", "operator.example")]),
            Err(ConfigError::Invalid { name: "ORIGIN_BASE_URL", .. })
        ));
    }

    #[test]
    fn allow_list_is_split_and_normalized() {
        let settings = settings_from(&[
            ("ORIGIN_BASE_URL", "https://operator.example"),
            ("ALLOWED_ORIGINS", " https://buses.example/ , http://localhost:5173,, "),
        ])
        .unwrap();

        assert_eq!(
            settings.allowed_origins,
            vec!["https://buses.example", "http://localhost:5173"]
        );
    }

    #[test]
    fn numeric_overrides_are_parsed_and_validated() {
        let settings = settings_from(&[
            ("ORIGIN_BASE_URL", "https://operator.example"),
            ("LIVE_STOP_TTL_SECS", "45"),
            ("CACHE_MAX_ENTRIES", "500"),
            ("GTFS_PATH", "/srv/feeds/gtfs.zip"),
        ])
        .unwrap();
        assert_eq!(settings.ttls.live_stop, Duration::from_secs(45));
        assert_eq!(settings.cache_max_entries, 500);
        assert_eq!(settings.gtfs_path, Some(PathBuf::from("/srv/feeds/gtfs.zip")));

        let err = settings_from(&[
            ("ORIGIN_BASE_URL", "https://operator.example"),
            ("LIVE_TRIP_TTL_SECS", "ten"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "LIVE_TRIP_TTL_SECS", .. }));
    }

    #[test]
    fn zero_interval_timeout_and_limits_are_rejected() {
        for name in [
            "CACHE_SWEEP_SECS",
            "ORIGIN_TIMEOUT_SECS",
            "SEARCH_LIMIT",
            "CACHE_MAX_ENTRIES",
        ] {
            let err = settings_from(&[("ORIGIN_BASE_URL", "https://operator.example"), (name, "0")])
                .unwrap_err();
            match err {
                ConfigError::Invalid { name: rejected, .. } => assert_eq!(rejected, name),
                other => panic!("{} = 0 gave {:?}", name, other),
            }
        }
    }

    #[test]
    fn oversized_ttls_are_rejected() {
        let too_long = (MAX_TTL.as_secs() + 1).to_string();
        for name in [
            "LIVE_STOP_TTL_SECS",
            "LIVE_TRIP_TTL_SECS",
            "SEARCH_TTL_SECS",
            "ENTITY_TTL_SECS",
        ] {
            let err = settings_from(&[
                ("ORIGIN_BASE_URL", "https://operator.example"),
                (name, too_long.as_str()),
            ])
            .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { name: rejected, .. } if rejected == name));
        }

        let huge = settings_from(&[
            ("ORIGIN_BASE_URL", "https://operator.example"),
            ("ENTITY_TTL_SECS", "18446744073709551615"),
        ]);
        assert!(huge.is_err());

        let cap = MAX_TTL.as_secs().to_string();
        let at_cap = settings_from(&[
            ("ORIGIN_BASE_URL", "https://operator.example"),
            ("ENTITY_TTL_SECS", cap.as_str()),
        ])
        .unwrap();
        assert_eq!(at_cap.ttls.entity, MAX_TTL);
    }
}
