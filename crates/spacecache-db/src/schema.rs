//! Connection-level PRAGMA tuning shared by every pooled `SQLite` connection.
//!
//! Table DDL is explicitly out of scope for this crate's public surface —
//! the relational store and its migrations are an external collaborator.
//! The only `CREATE TABLE` statements this workspace knows about live in
//! the test-only fixture (see `test_support`), used exclusively to exercise
//! the gateway and cache managers against a real `SQLite` file in tests.

/// Database-wide initialization PRAGMAs, applied once per file during pool warmup.
pub const PRAGMA_DB_INIT_SQL: &str = r"
PRAGMA foreign_keys = OFF;
PRAGMA journal_mode = WAL;
";

/// Per-connection PRAGMAs, safe to run on every new pooled connection.
///
/// `foreign_keys = OFF` comes first to override the compile-time default
/// before any DML; `busy_timeout` comes next so lock waits apply to the
/// PRAGMAs that follow.
pub const PRAGMA_CONN_SETTINGS_SQL: &str = r"
PRAGMA foreign_keys = OFF;
PRAGMA busy_timeout = 60000;
PRAGMA synchronous = NORMAL;
PRAGMA wal_autocheckpoint = 2000;
PRAGMA cache_size = -8192;
PRAGMA mmap_size = 268435456;
PRAGMA temp_store = MEMORY;
PRAGMA threads = 4;
PRAGMA journal_size_limit = 67108864;
";

/// Total memory budget (in KB) for page caches across all pooled connections.
///
/// Default 256 MB. The per-connection share shrinks as the pool grows so
/// that raising `max_connections` can't blow up resident memory.
const TOTAL_CACHE_BUDGET_KB: usize = 256 * 1024;

/// Build per-connection PRAGMAs with a `cache_size` that respects the total
/// memory budget, clamped to `[2 MB, 64 MB]` per connection.
#[must_use]
pub fn build_conn_pragmas(max_connections: usize) -> String {
    let per_conn_kb = (TOTAL_CACHE_BUDGET_KB
        .checked_div(max_connections.max(1))
        .unwrap_or(8192))
    .clamp(2048, 65536);

    format!(
        "\
PRAGMA foreign_keys = OFF;
PRAGMA busy_timeout = 60000;
PRAGMA synchronous = NORMAL;
PRAGMA wal_autocheckpoint = 2000;
PRAGMA cache_size = -{per_conn_kb};
PRAGMA mmap_size = 268435456;
PRAGMA temp_store = MEMORY;
PRAGMA threads = 4;
PRAGMA journal_size_limit = 67108864;
"
    )
}
