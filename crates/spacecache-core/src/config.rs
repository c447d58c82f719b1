//! Configuration management for the space-combat cache layer.
//!
//! Settings are read once from the process environment, using the project's
//! existing python-decouple-flavored parsing convention (`env_value`, typed
//! `parse`/default fallback).

use std::env;

/// World bounds and cache tuning knobs, read once at construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// World width in coordinate units. Source of truth for position
    /// normalization — never hardcode this bound in cache code.
    pub world_width: f64,
    /// World height in coordinate units.
    pub world_height: f64,

    /// Background flush period for dirty cache entries, in milliseconds.
    pub cache_persist_interval_ms: u64,
    /// Whether background persistence timers run at all. Forced `false` in
    /// test mode regardless of the environment value.
    pub cache_auto_persistence: bool,

    /// Inventory grid row count (see the `inventory` JSON column).
    pub cache_inventory_rows: usize,
    /// Inventory grid column count.
    pub cache_inventory_cols: usize,

    /// Store connection string.
    pub database_url: String,
    /// Pool size override; `None` lets the pool derive a size from CPU count.
    pub database_pool_size: Option<usize>,
    /// Max overflow connections beyond `database_pool_size`.
    pub database_max_overflow: Option<usize>,
    /// Pool acquire timeout, in milliseconds.
    pub database_pool_timeout_ms: u64,

    /// `tracing-subscriber` env-filter directive string (mirrors `RUST_LOG`).
    pub log_filter: String,
    /// `tracing-subscriber` output format selector (`"pretty"`, `"json"`, `"compact"`).
    pub log_format: String,

    /// Test mode: disables background timers and used by the test harness to
    /// select an in-memory store.
    pub test_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            world_width: 5000.0,
            world_height: 5000.0,
            cache_persist_interval_ms: 30_000,
            cache_auto_persistence: true,
            cache_inventory_rows: 10,
            cache_inventory_cols: 10,
            database_url: "sqlite::memory:".to_string(),
            database_pool_size: None,
            database_max_overflow: None,
            database_pool_timeout_ms: 30_000,
            log_filter: "info".to_string(),
            log_format: "pretty".to_string(),
            test_mode: false,
        }
    }
}

impl Config {
    /// Load configuration from the process environment, falling back to
    /// defaults for any unset variable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let test_mode = env_bool("CACHE_TEST_MODE", defaults.test_mode);
        Self {
            world_width: env_f64("WORLD_WIDTH", defaults.world_width),
            world_height: env_f64("WORLD_HEIGHT", defaults.world_height),
            cache_persist_interval_ms: env_u64(
                "CACHE_PERSIST_INTERVAL_MS",
                defaults.cache_persist_interval_ms,
            ),
            cache_auto_persistence: if test_mode {
                false
            } else {
                env_bool("CACHE_AUTO_PERSISTENCE", defaults.cache_auto_persistence)
            },
            cache_inventory_rows: env_usize("CACHE_INVENTORY_ROWS", defaults.cache_inventory_rows),
            cache_inventory_cols: env_usize("CACHE_INVENTORY_COLS", defaults.cache_inventory_cols),
            database_url: env_value("DATABASE_URL").unwrap_or(defaults.database_url),
            database_pool_size: env_usize_opt("DATABASE_POOL_SIZE"),
            database_max_overflow: env_usize_opt("DATABASE_MAX_OVERFLOW"),
            database_pool_timeout_ms: env_u64(
                "DATABASE_POOL_TIMEOUT_MS",
                defaults.database_pool_timeout_ms,
            ),
            log_filter: env_value("RUST_LOG").unwrap_or(defaults.log_filter),
            log_format: env_value("CACHE_LOG_FORMAT").unwrap_or(defaults.log_format),
            test_mode,
        }
    }

    /// Construct a `Config` suitable for the test harness: small world,
    /// fast-but-inert persistence interval, no background timers.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            test_mode: true,
            cache_auto_persistence: false,
            database_url: "sqlite::memory:".to_string(),
            ..Self::default()
        }
    }
}

/// Read a value from the real environment (no `.env` layering — this domain
/// has no working-directory dotenv convention).
#[must_use]
pub fn env_value(key: &str) -> Option<String> {
    #[cfg(test)]
    if let Some(v) = test_env_override_value(key) {
        return Some(v);
    }
    env::var(key).ok()
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => true,
        "0" | "false" | "f" | "no" | "n" => false,
        _ => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env_value(key).map_or(default, |v| parse_bool(&v, default))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_value(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_value(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize_opt(key: &str) -> Option<usize> {
    env_value(key).and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            trimmed.parse().ok()
        }
    })
}

fn env_f64(key: &str, default: f64) -> f64 {
    env_value(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
thread_local! {
    static TEST_ENV_OVERRIDES: std::cell::RefCell<std::collections::HashMap<String, String>> =
        std::cell::RefCell::new(std::collections::HashMap::new());
}

#[cfg(test)]
fn test_env_override_value(key: &str) -> Option<String> {
    TEST_ENV_OVERRIDES.with(|cell| cell.borrow().get(key).cloned())
}
