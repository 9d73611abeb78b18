//! Runtime configuration for the resilience layer.
//!
//! Values come from [`ResilienceConfig::default`], can be deserialized from
//! any serde source, or read from `BASTION_*` environment variables with
//! [`ResilienceConfig::from_env`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dual_write::ReadPrimary;
use crate::error::ConfigError;
use crate::gateway::GatewayOptions;
use crate::lock::LockOptions;
use crate::rate_limit::UnavailablePolicy;

/// Which storage backend callers get.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageSelector {
    #[default]
    Memory,
    /// BackendA
    Sqlite,
    /// BackendB
    File,
    /// Sqlite (A) and file (B) behind the dual-write composer
    Dual,
}

impl FromStr for StorageSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageSelector::Memory),
            "sqlite" | "a" | "backenda" => Ok(StorageSelector::Sqlite),
            "file" | "b" | "backendb" => Ok(StorageSelector::File),
            "dual" => Ok(StorageSelector::Dual),
            other => Err(ConfigError::Invalid {
                field: "storage_backend",
                reason: format!("unknown backend '{}', expected memory|sqlite|file|dual", other),
            }),
        }
    }
}

impl FromStr for ReadPrimary {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "sqlite" => Ok(ReadPrimary::A),
            "b" | "file" => Ok(ReadPrimary::B),
            other => Err(ConfigError::Invalid {
                field: "read_primary",
                reason: format!("unknown read primary '{}', expected a|b", other),
            }),
        }
    }
}

impl FromStr for UnavailablePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_open" | "open" => Ok(UnavailablePolicy::FailOpen),
            "fail_closed" | "closed" => Ok(UnavailablePolicy::FailClosed),
            other => Err(ConfigError::Invalid {
                field: "rate_limit_policy",
                reason: format!("unknown policy '{}', expected fail_open|fail_closed", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// e.g. `redis://127.0.0.1:6379`. No URL means no shared cache.
    pub cache_url: Option<String>,
    /// Hard switch for restricted environments
    pub cache_disabled: bool,
    pub cache_op_timeout_ms: u64,
    pub cache_reconnect_interval_ms: u64,

    pub lock_dir: PathBuf,
    pub lock_ttl_ms: u64,
    pub lock_acquire_timeout_ms: u64,
    pub lock_retry_delay_ms: u64,

    pub session_ttl_secs: u64,
    pub metadata_ttl_secs: u64,
    pub rate_limit_margin_secs: u64,
    pub rate_limit_policy: UnavailablePolicy,

    pub storage_backend: StorageSelector,
    pub read_primary: ReadPrimary,
    pub sqlite_path: PathBuf,
    pub file_store_dir: PathBuf,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        let lock = LockOptions::default();
        Self {
            cache_url: None,
            cache_disabled: false,
            cache_op_timeout_ms: 500,
            cache_reconnect_interval_ms: 30_000,
            lock_dir: lock.lock_dir,
            lock_ttl_ms: lock.ttl.as_millis() as u64,
            lock_acquire_timeout_ms: lock.acquire_timeout.as_millis() as u64,
            lock_retry_delay_ms: lock.retry_delay.as_millis() as u64,
            session_ttl_secs: 24 * 60 * 60,
            metadata_ttl_secs: 300,
            rate_limit_margin_secs: 60,
            rate_limit_policy: UnavailablePolicy::FailOpen,
            storage_backend: StorageSelector::Memory,
            read_primary: ReadPrimary::A,
            sqlite_path: PathBuf::from("bastion.db"),
            file_store_dir: PathBuf::from("bastion-data"),
        }
    }
}

impl ResilienceConfig {
    /// Defaults overridden by any `BASTION_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) but with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("BASTION_CACHE_URL").filter(|u| !u.is_empty()) {
            config.cache_url = Some(url);
        }
        if let Some(v) = lookup("BASTION_CACHE_DISABLED") {
            config.cache_disabled = parse_bool("cache_disabled", &v)?;
        }
        set_u64(
            &lookup,
            "BASTION_CACHE_OP_TIMEOUT_MS",
            "cache_op_timeout_ms",
            &mut config.cache_op_timeout_ms,
        )?;
        set_u64(
            &lookup,
            "BASTION_CACHE_RECONNECT_INTERVAL_MS",
            "cache_reconnect_interval_ms",
            &mut config.cache_reconnect_interval_ms,
        )?;
        if let Some(dir) = lookup("BASTION_LOCK_DIR") {
            config.lock_dir = PathBuf::from(dir);
        }
        set_u64(&lookup, "BASTION_LOCK_TTL_MS", "lock_ttl_ms", &mut config.lock_ttl_ms)?;
        set_u64(
            &lookup,
            "BASTION_LOCK_ACQUIRE_TIMEOUT_MS",
            "lock_acquire_timeout_ms",
            &mut config.lock_acquire_timeout_ms,
        )?;
        set_u64(
            &lookup,
            "BASTION_LOCK_RETRY_DELAY_MS",
            "lock_retry_delay_ms",
            &mut config.lock_retry_delay_ms,
        )?;
        set_u64(
            &lookup,
            "BASTION_SESSION_TTL_SECS",
            "session_ttl_secs",
            &mut config.session_ttl_secs,
        )?;
        set_u64(
            &lookup,
            "BASTION_METADATA_TTL_SECS",
            "metadata_ttl_secs",
            &mut config.metadata_ttl_secs,
        )?;
        set_u64(
            &lookup,
            "BASTION_RATE_LIMIT_MARGIN_SECS",
            "rate_limit_margin_secs",
            &mut config.rate_limit_margin_secs,
        )?;
        if let Some(v) = lookup("BASTION_RATE_LIMIT_POLICY") {
            config.rate_limit_policy = v.parse()?;
        }
        if let Some(v) = lookup("BASTION_STORAGE") {
            config.storage_backend = v.parse()?;
        }
        if let Some(v) = lookup("BASTION_READ_PRIMARY") {
            config.read_primary = v.parse()?;
        }
        if let Some(v) = lookup("BASTION_SQLITE_PATH") {
            config.sqlite_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("BASTION_FILE_STORE_DIR") {
            config.file_store_dir = PathBuf::from(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("cache_op_timeout_ms", self.cache_op_timeout_ms),
            ("lock_ttl_ms", self.lock_ttl_ms),
            ("lock_acquire_timeout_ms", self.lock_acquire_timeout_ms),
            ("lock_retry_delay_ms", self.lock_retry_delay_ms),
            ("session_ttl_secs", self.session_ttl_secs),
            ("metadata_ttl_secs", self.metadata_ttl_secs),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than 0".to_string(),
                });
            }
        }
        if self.lock_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "lock_dir",
                reason: "must not be empty".to_string(),
            });
        }
        if matches!(self.storage_backend, StorageSelector::Sqlite | StorageSelector::Dual)
            && self.sqlite_path.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid {
                field: "sqlite_path",
                reason: "required for the sqlite and dual backends".to_string(),
            });
        }
        if matches!(self.storage_backend, StorageSelector::File | StorageSelector::Dual)
            && self.file_store_dir.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid {
                field: "file_store_dir",
                reason: "required for the file and dual backends".to_string(),
            });
        }
        Ok(())
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            disabled: self.cache_disabled,
            op_timeout: Duration::from_millis(self.cache_op_timeout_ms),
            reconnect_interval: Duration::from_millis(self.cache_reconnect_interval_ms),
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            lock_dir: self.lock_dir.clone(),
            ttl: Duration::from_millis(self.lock_ttl_ms),
            acquire_timeout: Duration::from_millis(self.lock_acquire_timeout_ms),
            retry_delay: Duration::from_millis(self.lock_retry_delay_ms),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    pub fn rate_limit_margin(&self) -> Duration {
        Duration::from_secs(self.rate_limit_margin_secs)
    }
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::Invalid {
            field,
            reason: format!("expected a boolean, got '{}'", other),
        }),
    }
}

fn set_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    field: &'static str,
    target: &mut u64,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(var) {
        *target = raw.trim().parse().map_err(|_| ConfigError::Invalid {
            field,
            reason: format!("expected an integer, got '{}'", raw),
        })?;
    }
    Ok(())
}
