//! Query tracking and instrumentation for the store gateway.
//!
//! Provides lightweight counters for total queries, per-table breakdowns,
//! and a capped slow-query log.
//!
//! ## Lock-Free Design
//!
//! The hot path (`record`) uses only atomic operations:
//! - `AtomicU64` for total query count and cumulative duration
//! - `[AtomicU64; TableId::COUNT]` array for per-table counters
//! - Fast keyword-based table extraction (no regex on hot path)
//!
//! A plain `Mutex` is only acquired for slow-query logging and unknown-table
//! counting (rare cold path) — this bookkeeping sits behind the store
//! gateway's `Database` lock, not inside the cache layer's hierarchy, so it
//! does not participate in `spacecache_core::lock_order`.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum number of slow queries retained in the log.
const SLOW_QUERY_LIMIT: usize = 50;

/// Compiled table extraction patterns (built once, reused).
/// Used only for slow-query logging and the legacy `extract_table()` API.
static TABLE_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r#"(?i)\binsert\s+(?:or\s+\w+\s+)?into\s+([\w.`"\[\]]+)"#).unwrap(),
        Regex::new(r#"(?i)\bupdate\s+([\w.`"\[\]]+)"#).unwrap(),
        Regex::new(r#"(?i)\bfrom\s+([\w.`"\[\]]+)"#).unwrap(),
    ]
});

// =============================================================================
// TableId — known table enumeration for lock-free counting
// =============================================================================

/// Known database tables for O(1) atomic counter indexing.
///
/// Each variant maps to a slot in the `per_table: [AtomicU64; COUNT]` array.
/// `Unknown` captures queries against unrecognized tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TableId {
    Users = 0,
    SpaceObjects = 1,
    Messages = 2,
    Battles = 3,
    Unknown = 4,
}

impl TableId {
    /// Total number of variants (for array sizing).
    pub const COUNT: usize = 5;

    /// Human-readable table name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::SpaceObjects => "space_objects",
            Self::Messages => "messages",
            Self::Battles => "battles",
            Self::Unknown => "unknown",
        }
    }

    /// Convert array index back to `TableId`.
    #[must_use]
    pub const fn from_index(i: usize) -> Self {
        match i {
            0 => Self::Users,
            1 => Self::SpaceObjects,
            2 => Self::Messages,
            3 => Self::Battles,
            _ => Self::Unknown,
        }
    }
}

/// Match a lowercase table name to a known `TableId`.
fn match_known_table_lower(name: &[u8]) -> TableId {
    match name {
        b"users" => TableId::Users,
        b"space_objects" => TableId::SpaceObjects,
        b"messages" => TableId::Messages,
        b"battles" => TableId::Battles,
        _ => TableId::Unknown,
    }
}

// =============================================================================
// Fast table extraction (no regex, no allocation)
// =============================================================================

/// Extract the `TableId` from a SQL statement using fast keyword scanning.
///
/// Scans for `INTO`, `UPDATE`, and `FROM` keywords (case-insensitive) in
/// priority order, then matches the extracted table name against known tables.
///
/// This is the hot-path replacement for `extract_table()` — no regex, no
/// heap allocation.
fn extract_table_id(sql: &str) -> TableId {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    if len < 6 {
        return TableId::Unknown;
    }

    let mut best_pos = usize::MAX;
    let mut best_name_start = 0usize;

    let mut i = 1; // INTO always preceded by whitespace
    while i + 5 <= len {
        if is_ws(bytes[i - 1]) && ci_eq4(bytes, i, *b"into") && i + 4 < len && is_ws(bytes[i + 4]) {
            let ns = skip_ws(bytes, i + 5);
            if ns < len && i < best_pos {
                best_pos = i;
                best_name_start = ns;
            }
            break;
        }
        i += 1;
    }

    i = 0;
    while i + 7 <= len {
        if (i == 0 || is_ws(bytes[i - 1])) && ci_eq_n(bytes, i, b"update") && is_ws(bytes[i + 6]) {
            let ns = skip_ws(bytes, i + 7);
            if ns < len && i < best_pos {
                best_pos = i;
                best_name_start = ns;
            }
            break;
        }
        i += 1;
    }

    i = 1;
    while i + 5 <= len {
        if is_ws(bytes[i - 1]) && ci_eq4(bytes, i, *b"from") && i + 4 < len && is_ws(bytes[i + 4]) {
            let ns = skip_ws(bytes, i + 5);
            if ns < len && i < best_pos {
                best_pos = i;
                best_name_start = ns;
            }
            break;
        }
        i += 1;
    }

    if best_pos == usize::MAX {
        return TableId::Unknown;
    }

    let start = skip_quotes_at(bytes, best_name_start);
    if start >= len {
        return TableId::Unknown;
    }

    let mut buf = [0u8; 64]; // known table names are all < 64 bytes
    let mut bi = 0;

    let qname_end = find_qname_end(bytes, start);
    let last_segment_start = find_last_segment(bytes, start, qname_end);
    let mut si = skip_quotes_at(bytes, last_segment_start);

    while si < qname_end && bi < buf.len() {
        let b = bytes[si];
        if is_ident_char(b) {
            buf[bi] = b.to_ascii_lowercase();
            bi += 1;
        } else if is_quote_char(b) {
            // skip quote chars
        } else {
            break;
        }
        si += 1;
    }

    match_known_table_lower(&buf[..bi])
}

#[inline]
const fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

#[inline]
const fn is_quote_char(b: u8) -> bool {
    matches!(b, b'`' | b'"' | b'[' | b']')
}

#[inline]
const fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Case-insensitive 4-byte match. `keyword` must be lowercase (e.g., `b"from"`).
#[inline]
fn ci_eq4(bytes: &[u8], pos: usize, keyword: [u8; 4]) -> bool {
    bytes[pos].to_ascii_lowercase() == keyword[0]
        && bytes[pos + 1].to_ascii_lowercase() == keyword[1]
        && bytes[pos + 2].to_ascii_lowercase() == keyword[2]
        && bytes[pos + 3].to_ascii_lowercase() == keyword[3]
}

/// Case-insensitive N-byte match. `keyword` must be lowercase.
#[inline]
fn ci_eq_n(bytes: &[u8], pos: usize, keyword: &[u8]) -> bool {
    for (i, &k) in keyword.iter().enumerate() {
        if bytes[pos + i].to_ascii_lowercase() != k {
            return false;
        }
    }
    true
}

#[inline]
fn skip_ws(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && is_ws(bytes[pos]) {
        pos += 1;
    }
    pos
}

#[inline]
fn skip_quotes_at(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && is_quote_char(bytes[pos]) {
        pos += 1;
    }
    pos
}

fn find_qname_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len()
        && (is_ident_char(bytes[i]) || bytes[i] == b'.' || is_quote_char(bytes[i]))
    {
        i += 1;
    }
    i
}

fn find_last_segment(bytes: &[u8], start: usize, end: usize) -> usize {
    let mut last_dot = None;
    let mut i = start;
    while i < end {
        if bytes[i] == b'.' {
            last_dot = Some(i);
        }
        i += 1;
    }
    last_dot.map_or(start, |pos| pos + 1)
}

// =============================================================================
// SlowQueryEntry
// =============================================================================

/// A slow-query entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowQueryEntry {
    pub table: Option<String>,
    pub duration_ms: f64,
}

// =============================================================================
// QueryTracker
// =============================================================================

/// Auxiliary state protected by mutex (cold path only).
#[derive(Debug, Default)]
struct TrackerAux {
    slow_queries: Vec<SlowQueryEntry>,
    unknown_tables: std::collections::HashMap<String, u64>,
}

/// Lightweight query tracker.
///
/// Thread-safe via atomics for counters. The mutex is only used for the
/// slow-query log and unknown-table counting (cold path).
#[derive(Debug)]
pub struct QueryTracker {
    enabled: AtomicBool,
    total: AtomicU64,
    total_time_us: AtomicU64,
    slow_enabled: AtomicBool,
    slow_threshold_us: AtomicU64,
    per_table: [AtomicU64; TableId::COUNT],
    aux: Mutex<TrackerAux>,
}

fn new_atomic_array<const N: usize>() -> [AtomicU64; N] {
    std::array::from_fn(|_| AtomicU64::new(0))
}

impl Default for QueryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryTracker {
    /// Create a disabled tracker (no overhead until `enable()` is called).
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            total: AtomicU64::new(0),
            total_time_us: AtomicU64::new(0),
            slow_enabled: AtomicBool::new(true),
            slow_threshold_us: AtomicU64::new(250_000), // 250ms default
            per_table: new_atomic_array(),
            aux: Mutex::new(TrackerAux::default()),
        }
    }

    /// Enable tracking with an optional slow-query threshold (in milliseconds).
    pub fn enable(&self, slow_threshold_ms: Option<u64>) {
        match slow_threshold_ms {
            Some(ms) => {
                self.slow_threshold_us
                    .store(ms.saturating_mul(1000), Ordering::Relaxed);
                self.slow_enabled.store(true, Ordering::Release);
            }
            None => {
                self.slow_enabled.store(false, Ordering::Release);
            }
        }
        self.enabled.store(true, Ordering::Release);
    }

    /// Disable tracking.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.slow_enabled.store(false, Ordering::Release);
    }

    /// Whether tracking is currently enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Record a completed query. Call this after each SQL execution.
    ///
    /// **Hot path** (known tables): uses only atomic operations — no locks,
    /// no regex, no allocation.
    ///
    /// **Cold path** (unknown tables or slow queries): falls back to regex
    /// extraction and mutex for the auxiliary state. This is rare in
    /// production since almost every query targets a known table.
    pub fn record(&self, sql: &str, duration_us: u64) {
        if !self.is_enabled() {
            return;
        }

        self.total.fetch_add(1, Ordering::Relaxed);
        self.total_time_us.fetch_add(duration_us, Ordering::Relaxed);

        let table_id = extract_table_id(sql);

        let is_slow = self.slow_enabled.load(Ordering::Acquire)
            && duration_us >= self.slow_threshold_us.load(Ordering::Relaxed);
        let needs_mutex = table_id == TableId::Unknown || is_slow;

        if !needs_mutex {
            self.per_table[table_id as usize].fetch_add(1, Ordering::Relaxed);
            return;
        }

        if table_id == TableId::Unknown {
            let name = extract_table(sql);
            let mut aux = self.aux.lock().expect("query tracker aux lock");
            if let Some(ref table_str) = name {
                *aux.unknown_tables.entry(table_str.clone()).or_insert(0) += 1;
            }
            if is_slow && aux.slow_queries.len() < SLOW_QUERY_LIMIT {
                aux.slow_queries.push(SlowQueryEntry {
                    table: name,
                    duration_ms: round_ms(duration_us),
                });
            }
        } else {
            self.per_table[table_id as usize].fetch_add(1, Ordering::Relaxed);
            if is_slow {
                let mut aux = self.aux.lock().expect("query tracker aux lock");
                if aux.slow_queries.len() < SLOW_QUERY_LIMIT {
                    aux.slow_queries.push(SlowQueryEntry {
                        table: Some(table_id.as_str().to_string()),
                        duration_ms: round_ms(duration_us),
                    });
                }
            }
        }
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> QueryTrackerSnapshot {
        let mut per_table = std::collections::HashMap::new();
        for i in 0..TableId::COUNT {
            let count = self.per_table[i].load(Ordering::Relaxed);
            if count > 0 {
                let id = TableId::from_index(i);
                if id != TableId::Unknown {
                    per_table.insert(id.as_str().to_string(), count);
                }
            }
        }

        let slow_query_ms = if self.slow_enabled.load(Ordering::Acquire) {
            Some(self.slow_threshold_us.load(Ordering::Relaxed) as f64 / 1000.0)
        } else {
            None
        };

        let aux = self.aux.lock().expect("query tracker aux lock");
        for (table, &count) in &aux.unknown_tables {
            *per_table.entry(table.clone()).or_insert(0) += count;
        }
        let slow_queries = aux.slow_queries.clone();
        drop(aux);

        QueryTrackerSnapshot {
            total: self.total.load(Ordering::Relaxed),
            total_time_ms: round_ms(self.total_time_us.load(Ordering::Relaxed)),
            per_table,
            slow_query_ms,
            slow_queries,
        }
    }

    /// Reset all counters and logs.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.total_time_us.store(0, Ordering::Relaxed);
        for counter in &self.per_table {
            counter.store(0, Ordering::Relaxed);
        }
        let mut aux = self.aux.lock().expect("query tracker aux lock");
        aux.slow_queries.clear();
        aux.unknown_tables.clear();
    }
}

/// Immutable snapshot of tracker state, suitable for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTrackerSnapshot {
    pub total: u64,
    pub total_time_ms: f64,
    pub per_table: std::collections::HashMap<String, u64>,
    pub slow_query_ms: Option<f64>,
    pub slow_queries: Vec<SlowQueryEntry>,
}

impl QueryTrackerSnapshot {
    /// Convert the snapshot into a JSON-friendly dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        let mut pairs: Vec<(&String, &u64)> = Vec::with_capacity(self.per_table.len());
        pairs.extend(self.per_table.iter());
        pairs.sort_by(|(a_name, a_count), (b_name, b_count)| {
            b_count.cmp(a_count).then_with(|| a_name.cmp(b_name))
        });

        let mut per_table = serde_json::Map::with_capacity(pairs.len());
        for (name, count) in pairs {
            per_table.insert(name.clone(), serde_json::Value::Number((*count).into()));
        }

        let slow_queries = self
            .slow_queries
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "table": entry.table,
                    "duration_ms": entry.duration_ms,
                })
            })
            .collect::<Vec<_>>();

        serde_json::json!({
            "total": self.total,
            "total_time_ms": self.total_time_ms,
            "per_table": per_table,
            "slow_query_ms": self.slow_query_ms,
            "slow_queries": slow_queries,
        })
    }
}

/// Start a timer for query instrumentation.
/// Returns an `Instant` that should be passed to [`elapsed_us`].
#[must_use]
pub fn query_timer() -> Instant {
    Instant::now()
}

/// Compute elapsed microseconds since the timer was started.
#[must_use]
pub fn elapsed_us(start: Instant) -> u64 {
    let micros = start.elapsed().as_micros().min(u128::from(u64::MAX));
    u64::try_from(micros).unwrap_or(u64::MAX)
}

thread_local! {
    static ACTIVE_TRACKER: RefCell<Option<Arc<QueryTracker>>> = const { RefCell::new(None) };
}

/// Guard that restores the previous active tracker on drop.
pub struct ActiveTrackerGuard {
    previous: Option<Arc<QueryTracker>>,
}

impl Drop for ActiveTrackerGuard {
    fn drop(&mut self) {
        ACTIVE_TRACKER.with(|slot| {
            *slot.borrow_mut() = self.previous.take();
        });
    }
}

/// Set the active query tracker for the current thread.
pub fn set_active_tracker(tracker: Arc<QueryTracker>) -> ActiveTrackerGuard {
    let previous = ACTIVE_TRACKER.with(|slot| slot.borrow_mut().replace(tracker));
    ActiveTrackerGuard { previous }
}

/// Return the active tracker for the current thread, if any.
#[must_use]
pub fn active_tracker() -> Option<Arc<QueryTracker>> {
    ACTIVE_TRACKER.with(|slot| slot.borrow().clone())
}

/// Access the global tracker for enabling/disabling and snapshots.
#[must_use]
pub fn global_tracker() -> &'static QueryTracker {
    &crate::QUERY_TRACKER
}

/// Record a query against the active tracker (or the global fallback).
///
/// Called by `TrackedConnection` / `TrackedTransaction` after each SQL
/// execution. No-op when tracking is disabled.
pub fn record_query(sql: &str, duration_us: u64) {
    if let Some(tracker) = active_tracker() {
        tracker.record(sql, duration_us);
    } else {
        crate::QUERY_TRACKER.record(sql, duration_us);
    }
}

// =============================================================================
// Legacy regex-based table extraction (used for slow-query log + fixtures)
// =============================================================================

/// Extract the primary table name from a SQL statement using regex.
///
/// Handles schema-qualified names (`main.users` -> `users`) and various
/// quoting styles (backticks, double-quotes, brackets). This is the **slow
/// path** — only called when the fast `extract_table_id()` returns `Unknown`.
fn extract_table(sql: &str) -> Option<String> {
    static SCHEMA_DOT: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"[`"\[\]]*\.[`"\[\]]*"#).unwrap());

    for pattern in TABLE_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(sql) {
            if let Some(m) = captures.get(1) {
                let raw = m.as_str();
                let last_segment = SCHEMA_DOT.split(raw).last().unwrap_or(raw);
                let table =
                    last_segment.trim_matches(|c| c == '`' || c == '"' || c == '[' || c == ']');
                if table.is_empty() {
                    return None;
                }
                return Some(table.to_string());
            }
        }
    }
    None
}

/// Round microseconds to milliseconds with 2 decimal places.
#[allow(clippy::cast_precision_loss)]
fn round_ms(us: u64) -> f64 {
    let ms = us as f64 / 1000.0;
    (ms * 100.0).round() / 100.0
}
