use serde::{Deserialize, Serialize};

pub const DEFAULT_CONNECT_TIMEOUT: i64 = 30;
/// Largest login timeout forwarded to the driver; larger values fall back to
/// [`DEFAULT_CONNECT_TIMEOUT`].
pub const MAX_CONNECT_TIMEOUT: i64 = 32767;
/// `SQL_TXN_READ_COMMITTED`
pub const DEFAULT_ISOLATION_LEVEL: u32 = 2;
pub const MAX_WORKER_THREADS: usize = 64;

pub const CONNECT_TIMEOUT_ENV: &str = "ODBC_CONNECT_TIMEOUT";
pub const SYSTEM_NAMING_ENV: &str = "ODBC_SYSTEM_NAMING";
pub const ISOLATION_LEVEL_ENV: &str = "ODBC_ISOLATION_LEVEL";
pub const DRIVER_TAG_ENV: &str = "ODBC_DRIVER_TAG";
pub const WORKER_THREADS_ENV: &str = "ODBC_WORKER_THREADS";

/// Per-connection settings applied before connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Login timeout in seconds; 0 leaves the driver default.
    pub connect_timeout: i64,
    pub system_naming: bool,
    /// Isolation level used by `set_isolation_level` when none is given.
    pub isolation_level: u32,
    /// Prefix prepended to every connection string, e.g. `DRIVER={...}`.
    pub driver_tag: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            system_naming: false,
            isolation_level: DEFAULT_ISOLATION_LEVEL,
            driver_tag: None,
        }
    }
}

impl ConnectionConfig {
    /// Defaults overridden by `ODBC_*` environment variables. Unparseable
    /// values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(timeout) = read_env(CONNECT_TIMEOUT_ENV).and_then(|v| v.parse().ok()) {
            config.connect_timeout = timeout;
        }
        if let Some(naming) = read_env(SYSTEM_NAMING_ENV).and_then(|v| parse_bool_flag(&v)) {
            config.system_naming = naming;
        }
        if let Some(level) = read_env(ISOLATION_LEVEL_ENV).and_then(|v| v.parse().ok()) {
            config.isolation_level = level;
        }
        if let Some(tag) = read_env(DRIVER_TAG_ENV) {
            config.driver_tag = Some(tag);
        }
        config
    }

    /// Login timeout to forward to the driver, if any: `None` for 0,
    /// the default for negative or out-of-range values.
    pub fn effective_login_timeout(&self) -> Option<u32> {
        effective_login_timeout(self.connect_timeout)
    }
}

pub fn effective_login_timeout(configured: i64) -> Option<u32> {
    match configured {
        0 => None,
        t if t < 0 || t > MAX_CONNECT_TIMEOUT => Some(DEFAULT_CONNECT_TIMEOUT as u32),
        t => Some(t as u32),
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    worker_threads: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(threads)
    }
}

impl DispatcherConfig {
    /// `worker_threads` is bounded to `1..=64`.
    pub fn new(worker_threads: usize) -> Self {
        Self {
            worker_threads: worker_threads.clamp(1, MAX_WORKER_THREADS),
        }
    }

    pub fn from_env() -> Self {
        read_env(WORKER_THREADS_ENV)
            .and_then(|v| v.parse::<usize>().ok())
            .map(Self::new)
            .unwrap_or_default()
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            CONNECT_TIMEOUT_ENV,
            SYSTEM_NAMING_ENV,
            ISOLATION_LEVEL_ENV,
            DRIVER_TAG_ENV,
            WORKER_THREADS_ENV,
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout, 30);
        assert!(!config.system_naming);
        assert_eq!(config.isolation_level, 2);
        assert!(config.driver_tag.is_none());
    }

    #[test]
    fn test_effective_login_timeout_boundaries() {
        assert_eq!(effective_login_timeout(0), None);
        assert_eq!(effective_login_timeout(1), Some(1));
        assert_eq!(effective_login_timeout(30), Some(30));
        assert_eq!(effective_login_timeout(32767), Some(32767));
        assert_eq!(effective_login_timeout(32768), Some(30));
        assert_eq!(effective_login_timeout(i64::MAX), Some(30));
        assert_eq!(effective_login_timeout(-1), Some(30));
    }

    #[test]
    fn test_effective_login_timeout_forwards_valid_range() {
        for t in (1..=32767).step_by(97) {
            assert_eq!(effective_login_timeout(t), Some(t as u32));
        }
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"connect_timeout": 5}"#).unwrap();
        assert_eq!(config.connect_timeout, 5);
        assert_eq!(config.isolation_level, DEFAULT_ISOLATION_LEVEL);
        assert!(!config.system_naming);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var(CONNECT_TIMEOUT_ENV, "12");
        std::env::set_var(SYSTEM_NAMING_ENV, "yes");
        std::env::set_var(ISOLATION_LEVEL_ENV, "8");
        std::env::set_var(DRIVER_TAG_ENV, "DRIVER={X}");
        let config = ConnectionConfig::from_env();
        clear_env();

        assert_eq!(config.connect_timeout, 12);
        assert!(config.system_naming);
        assert_eq!(config.isolation_level, 8);
        assert_eq!(config.driver_tag.as_deref(), Some("DRIVER={X}"));
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_garbage() {
        clear_env();
        std::env::set_var(CONNECT_TIMEOUT_ENV, "soon");
        std::env::set_var(SYSTEM_NAMING_ENV, "maybe");
        let config = ConnectionConfig::from_env();
        clear_env();
        assert_eq!(config, ConnectionConfig::default());
    }

    #[test]
    #[serial]
    fn test_dispatcher_config_from_env() {
        clear_env();
        std::env::set_var(WORKER_THREADS_ENV, "1000");
        assert_eq!(DispatcherConfig::from_env().worker_threads(), MAX_WORKER_THREADS);
        std::env::set_var(WORKER_THREADS_ENV, "0");
        assert_eq!(DispatcherConfig::from_env().worker_threads(), 1);
        clear_env();
        assert!(DispatcherConfig::from_env().worker_threads() >= 1);
    }

    #[test]
    fn test_parse_bool_flag() {
        assert_eq!(parse_bool_flag(" TRUE "), Some(true));
        assert_eq!(parse_bool_flag("off"), Some(false));
        assert_eq!(parse_bool_flag("2"), None);
    }
}
