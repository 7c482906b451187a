use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read from `STAYRATE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    /// Login name that acts as the operator.
    pub admin_user: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction before the sweeper compacts.
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "stayrate".into(),
            admin_user: "admin".into(),
            max_connections: 256,
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(60),
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable numbers fall back to the default, with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("STAYRATE_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "STAYRATE_PORT").unwrap_or(defaults.port),
            data_dir: lookup("STAYRATE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("STAYRATE_PASSWORD").unwrap_or(defaults.password),
            admin_user: lookup("STAYRATE_ADMIN_USER").unwrap_or(defaults.admin_user),
            max_connections: parsed(&lookup, "STAYRATE_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "STAYRATE_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            sweep_interval: parsed(&lookup, "STAYRATE_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            tls_cert: lookup("STAYRATE_TLS_CERT"),
            tls_key: lookup("STAYRATE_TLS_KEY"),
            metrics_port: parsed(&lookup, "STAYRATE_METRICS_PORT"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("stayrate.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|raw| parse_or_warn(key, &raw))
}

fn parse_or_warn<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("{key}={raw:?} is not valid, using the default");
            None
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config, Config::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.wal_path(), PathBuf::from("./data/stayrate.wal"));
    }

    #[test]
    fn overrides_from_env() {
        let config = Config::from_lookup(lookup(&[
            ("STAYRATE_PORT", "6000"),
            ("STAYRATE_DATA_DIR", "/var/lib/stayrate"),
            ("STAYRATE_ADMIN_USER", "ops"),
            ("STAYRATE_SWEEP_INTERVAL_SECS", "5"),
            ("STAYRATE_METRICS_PORT", "9100"),
        ]));
        assert_eq!(config.port, 6000);
        assert_eq!(config.admin_user, "ops");
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/stayrate/stayrate.wal"));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("STAYRATE_PORT", "not-a-port"),
            ("STAYRATE_MAX_CONNECTIONS", "-3"),
        ]));
        assert_eq!(config.port, 5433);
        assert_eq!(config.max_connections, 256);
    }

    #[test]
    fn every_numeric_setting_parses_to_its_own_type() {
        let config = Config::from_lookup(lookup(&[
            ("STAYRATE_PORT", "7000"),
            ("STAYRATE_MAX_CONNECTIONS", "12"),
            ("STAYRATE_COMPACT_THRESHOLD", "50000000000"),
            ("STAYRATE_SWEEP_INTERVAL_SECS", "90"),
            ("STAYRATE_METRICS_PORT", "9200"),
        ]));
        assert_eq!(config.port, 7000u16);
        assert_eq!(config.max_connections, 12usize);
        assert_eq!(config.compact_threshold, 50_000_000_000u64);
        assert_eq!(config.sweep_interval, Duration::from_secs(90));
        assert_eq!(config.metrics_port, Some(9200u16));
    }
}
