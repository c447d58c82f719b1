//! Store-facing half of the hierarchical write-back cache layer.
//!
//! This crate provides:
//! - a synchronous `SQLite` connection pool (`pool`)
//! - the Store Gateway, the only code in this workspace allowed to touch SQL (`gateway`)
//! - the four cache managers — user, world, message, battle — and the lifecycle
//!   orchestrator that wires them together (`user_cache`, `world_cache`,
//!   `message_cache`, `battle_cache`, `lifecycle`)
//! - row-level (de)serialization between store rows and `spacecache_core` domain types (`models`)
//! - query instrumentation and clock-skew-aware timestamps (`tracking`, `timestamps`)
//!
//! # Timestamp convention
//!
//! All timestamps are stored as `i64` milliseconds since the Unix epoch,
//! matching the domain models' `*_ms` fields in `spacecache_core::models`.

#![forbid(unsafe_code)]

pub mod battle_cache;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod message_cache;
pub mod models;
pub mod pool;
pub mod schema;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod timestamps;
pub mod tracking;
pub mod user_cache;
pub mod world_cache;

pub use battle_cache::BattleCache;
pub use error::{DbError, DbResult, is_lock_error, is_pool_exhausted_error, is_unique_constraint_error};
pub use gateway::{ExecResult, StoreGateway};
pub use lifecycle::LifecycleOrchestrator;
pub use lifecycle::{global as global_orchestrator, install as install_orchestrator};
#[cfg(any(test, feature = "test-support"))]
pub use lifecycle::reset_for_test as reset_orchestrator_for_test;
pub use message_cache::MessageCache;
pub use pool::{DbPool, DbPoolConfig, PooledConnection, auto_pool_size};
pub use timestamps::{
    ClockSkewMetrics, clock_skew_metrics, clock_skew_reset, iso_to_millis, millis_to_iso,
    millis_to_naive, naive_to_millis, now_millis, now_millis_raw,
};
pub use tracking::{
    ActiveTrackerGuard, QueryTracker, QueryTrackerSnapshot, SlowQueryEntry, TableId,
    active_tracker, elapsed_us, query_timer, record_query, set_active_tracker,
};
pub use user_cache::UserCache;
pub use world_cache::WorldCache;

pub use sqlmodel_frankensqlite;
pub use sqlmodel_sqlite;

/// Global query tracker instance.
///
/// Disabled by default (zero overhead). Call `QUERY_TRACKER.enable(threshold_ms)`
/// at startup when instrumentation is wanted.
pub static QUERY_TRACKER: std::sync::LazyLock<QueryTracker> =
    std::sync::LazyLock::new(QueryTracker::new);

/// The connection type used by this crate's pool and gateway.
pub type DbConn = sqlmodel_sqlite::SqliteConnection;
