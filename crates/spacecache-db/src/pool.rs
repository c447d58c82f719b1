//! Synchronous `SQLite` connection pool.
//!
//! The store is reached only through a thin connection interface; this pool
//! owns acquisition, sizing, and corruption detection for it. Every method
//! blocks the calling OS thread rather than suspending a coroutine — the
//! cache layer above runs on native threads, not an async runtime.

use crate::DbConn;
use crate::error::{DbError, DbResult};
use crate::schema;
use spacecache_core::config::env_value;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_MAX_OVERFLOW: usize = 10;
pub const DEFAULT_POOL_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_POOL_RECYCLE_MS: u64 = 30 * 60 * 1000;

/// Auto-detect a reasonable pool size from available CPU parallelism.
///
/// Returns `(min_connections, max_connections)`.
#[must_use]
pub fn auto_pool_size() -> (usize, usize) {
    let cpus = std::thread::available_parallelism().map_or(4, std::num::NonZero::get);
    let min = (cpus * 2).clamp(4, 20);
    let max = (cpus * 6).clamp(10, 64);
    (min, max)
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct DbPoolConfig {
    /// `sqlite:///path/to/db.sqlite3`, or `sqlite://:memory:` for an in-memory db.
    pub database_url: String,
    /// Minimum connections kept open once warmed up.
    pub min_connections: usize,
    /// Hard cap on connections the pool will ever open.
    pub max_connections: usize,
    /// How long `acquire` blocks before giving up.
    pub acquire_timeout_ms: u64,
    /// Connections older than this are closed on release rather than reused.
    pub max_lifetime_ms: u64,
    /// Number of connections to eagerly open on `DbPool::new`. Capped at `min_connections`.
    pub warmup_connections: usize,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://:memory:".to_string(),
            min_connections: DEFAULT_POOL_SIZE,
            max_connections: DEFAULT_POOL_SIZE + DEFAULT_MAX_OVERFLOW,
            acquire_timeout_ms: DEFAULT_POOL_TIMEOUT_MS,
            max_lifetime_ms: DEFAULT_POOL_RECYCLE_MS,
            warmup_connections: 0,
        }
    }
}

impl DbPoolConfig {
    /// Build a config from environment variables, falling back to
    /// CPU-derived sizing when `SPACECACHE_DB_POOL_SIZE` is unset or `"auto"`.
    #[must_use]
    pub fn from_env() -> Self {
        let database_url =
            env_value("SPACECACHE_DATABASE_URL").unwrap_or_else(|| "sqlite://:memory:".to_string());

        let acquire_timeout_ms = env_value("SPACECACHE_DB_POOL_TIMEOUT_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_POOL_TIMEOUT_MS);

        let explicit_size = env_value("SPACECACHE_DB_POOL_SIZE").and_then(|s| s.parse::<usize>().ok());
        let explicit_overflow =
            env_value("SPACECACHE_DB_POOL_MAX_OVERFLOW").and_then(|s| s.parse::<usize>().ok());

        let (min_conn, max_conn) = match (explicit_size, explicit_overflow) {
            (Some(size), Some(overflow)) => (size, size + overflow),
            (Some(size), None) => (size, size + DEFAULT_MAX_OVERFLOW),
            (None, maybe_overflow) => {
                let (auto_min, auto_max) = auto_pool_size();
                maybe_overflow.map_or((auto_min, auto_max), |overflow| (auto_min, auto_min + overflow))
            }
        };

        let warmup = env_value("SPACECACHE_DB_POOL_WARMUP")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0)
            .min(min_conn);

        Self {
            database_url,
            min_connections: min_conn,
            max_connections: max_conn,
            acquire_timeout_ms,
            max_lifetime_ms: DEFAULT_POOL_RECYCLE_MS,
            warmup_connections: warmup,
        }
    }

    /// Resolve the underlying `SQLite` file path (or `:memory:`) from `database_url`.
    pub fn sqlite_path(&self) -> DbResult<String> {
        let url = self.database_url.trim();
        if url == ":memory:" || url == "sqlite://:memory:" || url.contains(":memory:") {
            return Ok(":memory:".to_string());
        }
        for prefix in ["sqlite:///", "sqlite://", "sqlite:"] {
            if let Some(rest) = url.strip_prefix(prefix) {
                return Ok(rest.to_string());
            }
        }
        Err(DbError::InvalidArgument {
            field: "database_url",
            message: format!(
                "invalid sqlite database URL: {url} (expected sqlite:///path/to/db.sqlite3)"
            ),
        })
    }
}

/// A connection plus the instant it was opened, for lifetime-based recycling.
struct PoolSlot {
    conn: DbConn,
    opened_at: Instant,
}

struct PoolInner {
    idle: VecDeque<PoolSlot>,
    /// Total connections currently open, whether idle or checked out.
    total_open: usize,
}

/// A blocking, size-bounded pool of `SQLite` connections.
pub struct DbPool {
    config: DbPoolConfig,
    inner: Mutex<PoolInner>,
    available: Condvar,
}

impl DbPool {
    /// Open a new pool, eagerly warming up `config.warmup_connections` connections.
    pub fn new(config: DbPoolConfig) -> DbResult<Arc<Self>> {
        let path = config.sqlite_path()?;
        ensure_sqlite_parent_dir_exists(&path)?;

        let pool = Arc::new(Self {
            inner: Mutex::new(PoolInner {
                idle: VecDeque::new(),
                total_open: 0,
            }),
            available: Condvar::new(),
            config,
        });

        let warmup = pool.config.warmup_connections.min(pool.config.min_connections);
        for _ in 0..warmup {
            let conn = open_sqlite_file_with_recovery(&path)?;
            apply_conn_pragmas(&conn, pool.config.max_connections)?;
            let mut guard = pool.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.idle.push_back(PoolSlot {
                conn,
                opened_at: Instant::now(),
            });
            guard.total_open += 1;
        }

        Ok(pool)
    }

    /// Acquire a connection, opening a fresh one if under `max_connections` and
    /// none are idle. Blocks up to `acquire_timeout_ms` before returning
    /// [`DbError::PoolExhausted`].
    pub fn acquire(self: &Arc<Self>) -> DbResult<PooledConnection> {
        let deadline = Instant::now() + Duration::from_millis(self.config.acquire_timeout_ms);
        let path = self.config.sqlite_path()?;

        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if let Some(slot) = guard.idle.pop_front() {
                if self.slot_expired(&slot) {
                    guard.total_open -= 1;
                    continue;
                }
                return Ok(PooledConnection {
                    pool: Arc::clone(self),
                    conn: Some(slot.conn),
                    opened_at: slot.opened_at,
                });
            }

            if guard.total_open < self.config.max_connections {
                guard.total_open += 1;
                drop(guard);
                return match open_sqlite_file_with_recovery(&path)
                    .and_then(|conn| apply_conn_pragmas(&conn, self.config.max_connections).map(|()| conn))
                {
                    Ok(conn) => Ok(PooledConnection {
                        pool: Arc::clone(self),
                        conn: Some(conn),
                        opened_at: Instant::now(),
                    }),
                    Err(e) => {
                        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                        guard.total_open -= 1;
                        Err(e)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DbError::PoolExhausted {
                    message: "timed out waiting for a pooled connection".to_string(),
                    pool_size: self.config.min_connections,
                    max_overflow: self.config.max_connections - self.config.min_connections,
                });
            }

            let (g, timeout_result) = self
                .available
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard = g;
            if timeout_result.timed_out() && guard.idle.is_empty() {
                return Err(DbError::PoolExhausted {
                    message: "timed out waiting for a pooled connection".to_string(),
                    pool_size: self.config.min_connections,
                    max_overflow: self.config.max_connections - self.config.min_connections,
                });
            }
        }
    }

    fn slot_expired(&self, slot: &PoolSlot) -> bool {
        slot.opened_at.elapsed() > Duration::from_millis(self.config.max_lifetime_ms)
    }

    fn release(&self, conn: DbConn, opened_at: Instant) {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let slot = PoolSlot { conn, opened_at };
        if self.slot_expired(&slot) {
            guard.total_open -= 1;
        } else {
            guard.idle.push_back(slot);
        }
        drop(guard);
        self.available.notify_one();
    }

    /// Number of connections currently open (idle plus checked out).
    pub fn total_open(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .total_open
    }

    /// Number of connections currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .idle
            .len()
    }
}

/// A checked-out connection. Returns to the pool automatically on drop.
pub struct PooledConnection {
    pool: Arc<DbPool>,
    conn: Option<DbConn>,
    opened_at: Instant,
}

impl std::ops::Deref for PooledConnection {
    type Target = DbConn;
    fn deref(&self) -> &DbConn {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.opened_at);
        }
    }
}

fn ensure_sqlite_parent_dir_exists(path: &str) -> DbResult<()> {
    if path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| DbError::Internal(format!("failed to create db dir {}: {e}", parent.display())))?;
    }
    Ok(())
}

/// Open a file-backed (or in-memory) `SQLite` connection, attempting a single
/// corruption-triggered recovery from a `.bak` sidecar if the primary open fails.
pub fn open_sqlite_file_with_recovery(sqlite_path: &str) -> DbResult<DbConn> {
    if sqlite_path == ":memory:" {
        return DbConn::open_memory().map_err(|e| DbError::Sqlite(e.to_string()));
    }

    match DbConn::open_file(sqlite_path) {
        Ok(conn) => Ok(conn),
        Err(primary_err) => {
            let msg = primary_err.to_string();
            if !is_corruption_error_message(&msg) {
                return Err(DbError::Sqlite(msg));
            }
            recover_sqlite_file_from_backup(Path::new(sqlite_path))?;
            DbConn::open_file(sqlite_path)
                .map_err(|reopen_err| DbError::Sqlite(format!("{msg}; reopen after recovery failed: {reopen_err}")))
        }
    }
}

/// Best-effort match against common `SQLite` corruption phrasing.
#[must_use]
pub fn is_corruption_error_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("malformed")
        || lower.contains("disk image is malformed")
        || lower.contains("not a database")
        || lower.contains("database disk image")
        || lower.contains("file is not a database")
}

/// Look for a `.bak` sidecar next to a corrupted `SQLite` file and restore it.
///
/// Returns an error if no usable backup exists; the caller's reopen attempt
/// then surfaces the original failure.
fn recover_sqlite_file_from_backup(path: &Path) -> DbResult<()> {
    let backup = path.with_extension(format!(
        "{}.bak",
        path.extension().and_then(|e| e.to_str()).unwrap_or("sqlite3")
    ));
    if !backup.exists() {
        return Err(DbError::Internal(format!(
            "sqlite file {} is corrupt and no backup sidecar exists at {}",
            path.display(),
            backup.display()
        )));
    }
    std::fs::copy(&backup, path)
        .map_err(|e| DbError::Internal(format!("failed to restore backup {}: {e}", backup.display())))?;
    Ok(())
}

/// Run `PRAGMA quick_check` and report whether the database reports healthy.
pub fn sqlite_quick_check_is_ok(conn: &DbConn) -> DbResult<bool> {
    let rows = conn
        .query_sync("PRAGMA quick_check;", &[])
        .map_err(|e| DbError::Sqlite(e.to_string()))?;
    Ok(rows
        .into_iter()
        .next()
        .and_then(|r| r.get_named::<String>("quick_check").ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("ok")))
}

fn apply_conn_pragmas(conn: &DbConn, max_connections: usize) -> DbResult<()> {
    let sql = schema::build_conn_pragmas(max_connections);
    conn.execute_sync(&sql, &[])
        .map_err(|e| DbError::Sqlite(e.to_string()))?;
    Ok(())
}
