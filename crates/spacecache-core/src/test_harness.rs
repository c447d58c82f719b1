//! Deterministic test harness for reproducible property and scenario tests.
//!
//! Provides shared utilities for deterministic clocks, seeded randomness,
//! stable ID generation, reproducible environment capture, and a minimal
//! in-memory store fixture for the four domain tables. Test suites use these
//! primitives so that CI failures can be reproduced with a single seed value.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use spacecache_core::test_harness::{Harness, HarnessConfig};
//!
//! let h = Harness::new(HarnessConfig { seed: 42, ..Default::default() });
//! let ts = h.clock.now_micros();       // deterministic timestamp
//! let id = h.ids.next_id();            // stable sequential ID
//! let val = h.rng(|r| r.next_u64());   // seeded random
//! ```
//!
//! # Reproduction
//!
//! Every harness instance captures a [`ReproContext`] that can be serialized
//! to JSON. CI scripts embed this in test artifacts so failures can be
//! replayed:
//!
//! ```bash
//! HARNESS_SEED=42 cargo test --test my_suite
//! ```

#![allow(
    clippy::missing_const_for_fn,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::models::{Battle, Message, SpaceObject, User};

// ── Seeded PRNG (xorshift64) ────────────────────────────────────────────

/// Deterministic pseudo-random number generator (xorshift64).
///
/// Produces a reproducible sequence given the same seed. Thread-safe
/// when wrapped in a `Mutex` (see [`Harness::rng`]).
#[derive(Debug, Clone)]
pub struct Rng64 {
    state: u64,
}

impl Rng64 {
    /// Create a new PRNG with the given seed. Zero seeds are remapped to
    /// a fixed non-zero value to avoid the xorshift degenerate case.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 {
                0x517c_c1b7_2722_0a95
            } else {
                seed
            },
        }
    }

    /// Advance the state and return the next pseudo-random `u64`.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Return a value in `[0, bound)`. Returns 0 when `bound == 0`.
    pub fn next_bounded(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.next_u64() % bound
    }

    /// Return a value in `[lo, hi)`. Panics if `lo >= hi`.
    pub fn next_range(&mut self, lo: u64, hi: u64) -> u64 {
        assert!(lo < hi, "next_range requires lo < hi");
        lo + self.next_bounded(hi - lo)
    }

    /// Pick a random element from a slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        assert!(!items.is_empty(), "choose requires non-empty slice");
        let idx = self.next_bounded(items.len() as u64) as usize;
        &items[idx]
    }

    /// Derive a child RNG with a new seed based on current state + discriminator.
    #[must_use]
    pub fn fork(&mut self, discriminator: u64) -> Self {
        Self::new(self.next_u64().wrapping_add(discriminator))
    }
}

// ── Deterministic Clock ─────────────────────────────────────────────────

/// A deterministic clock that produces predictable, monotonically
/// increasing timestamps from a configurable base and step size.
///
/// Each call to [`now_micros`](DeterministicClock::now_micros) advances
/// the internal counter by `step_micros`, ensuring reproducible ordering
/// across test runs regardless of wall-clock timing.
#[derive(Debug)]
pub struct DeterministicClock {
    /// Current timestamp in microseconds since epoch.
    current: AtomicI64,
    /// How much to advance per `now_micros()` call.
    step_micros: i64,
}

impl DeterministicClock {
    /// Create a clock starting at `base_micros` with the given step size.
    ///
    /// A typical base is `1_704_067_200_000_000` (2024-01-01 00:00:00 UTC).
    #[must_use]
    pub const fn new(base_micros: i64, step_micros: i64) -> Self {
        Self {
            current: AtomicI64::new(base_micros),
            step_micros,
        }
    }

    /// Return the current timestamp and advance by `step_micros`.
    pub fn now_micros(&self) -> i64 {
        self.current.fetch_add(self.step_micros, Ordering::Relaxed)
    }

    /// Return the current timestamp in milliseconds and advance.
    pub fn now_millis(&self) -> i64 {
        self.now_micros() / 1_000
    }

    /// Peek at the current timestamp without advancing.
    pub fn peek_micros(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Manually set the current timestamp.
    pub fn set_micros(&self, micros: i64) {
        self.current.store(micros, Ordering::Relaxed);
    }

    /// Advance by a specific amount (not the default step).
    pub fn advance(&self, micros: i64) {
        self.current.fetch_add(micros, Ordering::Relaxed);
    }
}

/// Default: 2024-01-01 00:00:00 UTC, 1-second steps.
impl Default for DeterministicClock {
    fn default() -> Self {
        Self::new(1_704_067_200_000_000, 1_000_000)
    }
}

// ── Stable ID Generator ─────────────────────────────────────────────────

/// Deterministic, monotonically increasing ID generator for tests.
///
/// Unlike auto-increment database IDs, these are fully deterministic
/// and independent of insertion order or database state.
#[derive(Debug)]
pub struct StableIdGen {
    counter: AtomicI64,
}

impl StableIdGen {
    /// Create a generator starting at `base`.
    #[must_use]
    pub const fn new(base: i64) -> Self {
        Self {
            counter: AtomicI64::new(base),
        }
    }

    /// Return the next ID and advance the counter.
    pub fn next_id(&self) -> i64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Peek at the next ID without consuming it.
    pub fn peek(&self) -> i64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Reset the counter to a specific value.
    pub fn reset(&self, base: i64) {
        self.counter.store(base, Ordering::Relaxed);
    }
}

impl Default for StableIdGen {
    fn default() -> Self {
        Self::new(1)
    }
}

// ── Reproduction Context ────────────────────────────────────────────────

/// Captures all parameters needed to reproduce a test run.
///
/// Serialize this to JSON and embed in CI artifacts so failures can be
/// replayed by setting `HARNESS_SEED` and other env vars.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReproContext {
    /// The seed used for this test run.
    pub seed: u64,
    /// Clock base timestamp (microseconds since epoch).
    pub clock_base_micros: i64,
    /// Clock step size (microseconds per tick).
    pub clock_step_micros: i64,
    /// ID generator starting value.
    pub id_base: i64,
    /// Test name or suite identifier.
    pub test_name: String,
    /// ISO-8601 wall-clock time when the harness was created.
    pub created_at: String,
    /// Rust target triple.
    pub target: String,
    /// Extra key-value pairs for suite-specific parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<(String, String)>,
}

impl ReproContext {
    /// Format a single-line reproduction command.
    #[must_use]
    pub fn repro_command(&self) -> String {
        let mut parts = vec![format!("HARNESS_SEED={}", self.seed)];
        for (k, v) in &self.extra {
            parts.push(format!("{k}={v}"));
        }
        parts.push(format!("cargo test {}", self.test_name));
        parts.join(" ")
    }
}

// ── Harness Configuration ───────────────────────────────────────────────

/// Configuration for creating a [`Harness`].
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Seed for the PRNG. Default: read from `HARNESS_SEED` env var, or 0.
    pub seed: u64,
    /// Base timestamp for the deterministic clock (microseconds since epoch).
    /// Default: 2024-01-01 00:00:00 UTC.
    pub clock_base_micros: i64,
    /// Step size for the deterministic clock (microseconds per tick).
    /// Default: `1_000_000` (1 second).
    pub clock_step_micros: i64,
    /// Starting value for the stable ID generator. Default: 1.
    pub id_base: i64,
    /// Test name for reproduction context. Default: empty.
    pub test_name: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let seed = std::env::var("HARNESS_SEED")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Self {
            seed,
            clock_base_micros: 1_704_067_200_000_000, // 2024-01-01T00:00:00Z
            clock_step_micros: 1_000_000,              // 1 second
            id_base: 1,
            test_name: String::new(),
        }
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

/// Deterministic test harness bundling clock, IDs, RNG, and reproduction
/// context into a single reusable object.
///
/// Thread-safe: the RNG is wrapped in a `Mutex`, while clock and ID
/// generator use atomics.
pub struct Harness {
    /// Deterministic clock for timestamp generation.
    pub clock: DeterministicClock,
    /// Stable ID generator.
    pub ids: StableIdGen,
    /// Reproduction context for CI artifact embedding.
    pub repro: ReproContext,
    /// Operation counter for tracking how many actions were performed.
    pub ops: AtomicU64,
    rng: Mutex<Rng64>,
}

impl Harness {
    /// Create a new harness from the given configuration.
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        let repro = ReproContext {
            seed: config.seed,
            clock_base_micros: config.clock_base_micros,
            clock_step_micros: config.clock_step_micros,
            id_base: config.id_base,
            test_name: config.test_name.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            target: std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string()),
            extra: Vec::new(),
        };

        Self {
            clock: DeterministicClock::new(config.clock_base_micros, config.clock_step_micros),
            ids: StableIdGen::new(config.id_base),
            rng: Mutex::new(Rng64::new(config.seed)),
            repro,
            ops: AtomicU64::new(0),
        }
    }

    /// Create a harness with defaults, reading seed from `HARNESS_SEED`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(HarnessConfig::default())
    }

    /// Create a harness with a specific seed and test name.
    #[must_use]
    pub fn with_seed(seed: u64, test_name: &str) -> Self {
        Self::new(HarnessConfig {
            seed,
            test_name: test_name.to_string(),
            ..Default::default()
        })
    }

    /// Lock the RNG and call the provided closure with mutable access.
    ///
    /// ```rust,ignore
    /// let val = harness.rng(|rng| rng.next_bounded(100));
    /// ```
    pub fn rng<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Rng64) -> R,
    {
        let mut guard = self.rng.lock().expect("harness rng lock");
        f(&mut guard)
    }

    /// Derive a child RNG for a worker thread. The discriminator should
    /// be unique per worker (e.g., thread index).
    pub fn fork_rng(&self, discriminator: u64) -> Rng64 {
        self.rng(|rng| rng.fork(discriminator))
    }

    /// Record an operation (increment ops counter) and return the count.
    pub fn record_op(&self) -> u64 {
        self.ops.fetch_add(1, Ordering::Relaxed)
    }

    /// Add an extra key-value pair to the reproduction context.
    pub fn add_extra(&mut self, key: &str, value: &str) {
        self.repro.extra.push((key.to_owned(), value.to_owned()));
    }

    /// Serialize the reproduction context to pretty JSON.
    ///
    /// # Errors
    /// Returns `Err` if serialization fails (should not happen in practice).
    pub fn repro_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.repro)
    }

    /// Write the reproduction context to a file.
    ///
    /// # Errors
    /// Returns `Err` on I/O failure.
    pub fn write_repro(&self, path: &std::path::Path) -> std::io::Result<()> {
        let json = self.repro_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("seed", &self.repro.seed)
            .field("clock", &self.clock)
            .field("ids", &self.ids)
            .field("ops", &self.ops.load(Ordering::Relaxed))
            .field("rng", &"<mutex>")
            .finish()
    }
}

// ── Artifact Helpers ────────────────────────────────────────────────────

/// Standard artifact directory under the repo root.
///
/// Returns `{repo_root}/tests/artifacts/{subdir}/{timestamp}_{pid}/`.
/// Creates the directory if it doesn't exist.
///
/// # Errors
/// Returns `Err` if directory creation fails.
pub fn artifact_dir(subdir: &str) -> std::io::Result<std::path::PathBuf> {
    let ts = chrono::Utc::now().format("%Y%m%d_%H%M%S%.3fZ").to_string();
    let pid = std::process::id();
    // Navigate from any crate's `CARGO_MANIFEST_DIR` up to repo root.
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .find(|p| p.join("Cargo.toml").exists() && p.join("crates").exists())
        .unwrap_or_else(|| std::path::Path::new("."));
    let dir = root.join(format!("tests/artifacts/{subdir}/{ts}_{pid}"));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Write a JSON artifact file and print its path to stderr.
///
/// # Errors
/// Returns `Err` on serialization or I/O failure.
pub fn write_artifact(
    dir: &std::path::Path,
    filename: &str,
    value: &impl serde::Serialize,
) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    let path = dir.join(filename);
    std::fs::write(&path, json)?;
    eprintln!("artifact: {}", path.display());
    Ok(())
}

// ── In-memory store fixture ─────────────────────────────────────────────

/// A trivial in-process stand-in for the relational store, used to drive
/// property tests over the domain models without a real connection. The
/// store gateway itself (pooled connections, SQL dialect) lives in
/// `spacecache-db`; this fixture only needs to assign ids and hold rows.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: HashMap<i64, User>,
    space_objects: HashMap<i64, SpaceObject>,
    messages: HashMap<i64, Message>,
    battles: HashMap<i64, Battle>,
    next_user_id: i64,
    next_object_id: i64,
    next_message_id: i64,
    next_battle_id: i64,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_user_id: 1,
            next_object_id: 1,
            next_message_id: 1,
            next_battle_id: 1,
            ..Self::default()
        }
    }

    /// Inserts `user`, assigning a new positive id and returning it.
    pub fn insert_user(&mut self, mut user: User) -> i64 {
        let id = self.next_user_id;
        self.next_user_id += 1;
        user.id = Some(id);
        self.users.insert(id, user);
        id
    }

    #[must_use]
    pub fn get_user(&self, id: i64) -> Option<&User> {
        self.users.get(&id)
    }

    #[must_use]
    pub fn find_user_by_username(&self, username: &str) -> Option<&User> {
        self.users.values().find(|u| u.username == username)
    }

    pub fn update_user(&mut self, user: User) {
        if let Some(id) = user.id {
            self.users.insert(id, user);
        }
    }

    /// Inserts `obj`, assigning a new positive id and returning it.
    pub fn insert_space_object(&mut self, mut obj: SpaceObject) -> i64 {
        let id = self.next_object_id;
        self.next_object_id += 1;
        obj.id = Some(id);
        self.space_objects.insert(id, obj);
        id
    }

    #[must_use]
    pub fn all_space_objects(&self) -> Vec<SpaceObject> {
        self.space_objects.values().cloned().collect()
    }

    /// Inserts `message`, assigning a new positive store id regardless of
    /// whatever (possibly negative, pending) id it carried on entry, and
    /// returning the assigned id.
    pub fn insert_message(&mut self, mut message: Message) -> i64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        message.id = id;
        message.is_pending = false;
        self.messages.insert(id, message);
        id
    }

    #[must_use]
    pub fn messages_for_user(&self, recipient_id: i64) -> Vec<Message> {
        self.messages
            .values()
            .filter(|m| m.recipient_id == recipient_id)
            .cloned()
            .collect()
    }

    pub fn update_message_read_status(&mut self, id: i64, is_read: bool) {
        if let Some(m) = self.messages.get_mut(&id) {
            m.is_read = is_read;
        }
    }

    /// Inserts `battle`, assigning a new positive id and returning it.
    pub fn insert_battle(&mut self, mut battle: Battle) -> i64 {
        let id = self.next_battle_id;
        self.next_battle_id += 1;
        battle.id = Some(id);
        self.battles.insert(id, battle);
        id
    }

    #[must_use]
    pub fn get_battle(&self, id: i64) -> Option<&Battle> {
        self.battles.get(&id)
    }

    pub fn update_battle(&mut self, battle: Battle) {
        if let Some(id) = battle.id {
            self.battles.insert(id, battle);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
