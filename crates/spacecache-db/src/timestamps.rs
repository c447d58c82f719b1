//! Timestamp conversion utilities with clock skew detection.
//!
//! Every persisted timestamp in this layer is an `i64` count of milliseconds
//! since the Unix epoch, matching the domain models' `*_ms` fields. This
//! module converts to/from `chrono` types and guards `now_millis()` against
//! wall-clock jumps (NTP corrections, VM migration, suspend/resume).
//!
//! # Clock Skew Protection
//!
//! [`now_millis`] tracks the last observed wall-clock value. On a backward
//! jump (>1 s), it returns `max(current, last_seen)` so stored timestamps
//! never regress. Forward jumps (>5 min) are logged as warnings.

#![allow(clippy::missing_const_for_fn)]

use chrono::{NaiveDateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Milliseconds per second.
const MILLIS_PER_SECOND: i64 = 1_000;

/// Backward jump threshold: 1 second in milliseconds.
const BACKWARD_JUMP_THRESHOLD_MS: i64 = 1_000;

/// Forward jump threshold: 5 minutes in milliseconds.
const FORWARD_JUMP_THRESHOLD_MS: i64 = 300_000;

/// Last observed wall-clock value (milliseconds since epoch).
/// Initialized to 0; updated on every `now_millis()` call.
static LAST_SYSTEM_TIME_MS: AtomicI64 = AtomicI64::new(0);

/// Convert chrono `NaiveDateTime` to milliseconds since Unix epoch.
#[inline]
#[must_use]
pub fn naive_to_millis(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_millis()
}

/// Convert milliseconds since Unix epoch to chrono `NaiveDateTime`.
///
/// For extreme values outside chrono's representable range, saturates to
/// `NaiveDateTime::MIN`/`MAX` instead of panicking.
#[inline]
#[must_use]
pub fn millis_to_naive(millis: i64) -> NaiveDateTime {
    let secs = millis.div_euclid(MILLIS_PER_SECOND);
    let sub_millis = millis.rem_euclid(MILLIS_PER_SECOND);
    let nsecs = u32::try_from(sub_millis * 1_000_000).unwrap_or(0);
    Utc.timestamp_opt(secs, nsecs)
        .single()
        .unwrap_or(if millis < 0 {
            chrono::DateTime::<Utc>::MIN_UTC
        } else {
            chrono::DateTime::<Utc>::MAX_UTC
        })
        .naive_utc()
}

/// Get current time as milliseconds since Unix epoch, with clock skew protection.
///
/// If the wall clock jumped backward by more than 1 second, returns the
/// last observed value (monotonic guarantee for stored timestamps).
/// Forward jumps over 5 minutes are counted but otherwise ignored.
#[inline]
#[must_use]
pub fn now_millis() -> i64 {
    let current = Utc::now().timestamp_millis();
    let last = LAST_SYSTEM_TIME_MS.load(Ordering::Relaxed);

    if last != 0 {
        let delta = current - last;
        if delta < -BACKWARD_JUMP_THRESHOLD_MS {
            CLOCK_SKEW_BACKWARD_COUNT.fetch_add(1, Ordering::Relaxed);
            // Don't update LAST_SYSTEM_TIME_MS so we keep the high-water mark.
            return last;
        }
        if delta > FORWARD_JUMP_THRESHOLD_MS {
            CLOCK_SKEW_FORWARD_COUNT.fetch_add(1, Ordering::Relaxed);
        }
    }

    LAST_SYSTEM_TIME_MS.store(current, Ordering::Relaxed);
    current
}

/// Get the raw wall-clock time without skew protection.
///
/// Use this only when you need the actual system time (e.g., for display).
/// For stored timestamps, always use [`now_millis`].
#[inline]
#[must_use]
pub fn now_millis_raw() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Clock skew metrics
// ---------------------------------------------------------------------------

/// Number of detected backward clock jumps.
static CLOCK_SKEW_BACKWARD_COUNT: AtomicI64 = AtomicI64::new(0);

/// Number of detected forward clock jumps.
static CLOCK_SKEW_FORWARD_COUNT: AtomicI64 = AtomicI64::new(0);

/// Snapshot of clock skew detection metrics.
#[derive(Debug, Clone, Default)]
pub struct ClockSkewMetrics {
    /// Number of backward clock jumps detected (>1s regression).
    pub backward_jumps: i64,
    /// Number of forward clock jumps detected (>5min advance).
    pub forward_jumps: i64,
    /// Last observed wall-clock value (milliseconds since epoch).
    pub last_system_time_ms: i64,
}

/// Return a snapshot of clock skew metrics.
#[must_use]
pub fn clock_skew_metrics() -> ClockSkewMetrics {
    ClockSkewMetrics {
        backward_jumps: CLOCK_SKEW_BACKWARD_COUNT.load(Ordering::Relaxed),
        forward_jumps: CLOCK_SKEW_FORWARD_COUNT.load(Ordering::Relaxed),
        last_system_time_ms: LAST_SYSTEM_TIME_MS.load(Ordering::Relaxed),
    }
}

/// Reset clock skew counters (for testing).
pub fn clock_skew_reset() {
    CLOCK_SKEW_BACKWARD_COUNT.store(0, Ordering::Relaxed);
    CLOCK_SKEW_FORWARD_COUNT.store(0, Ordering::Relaxed);
    LAST_SYSTEM_TIME_MS.store(0, Ordering::Relaxed);
}

/// Convert milliseconds to an ISO-8601 string.
#[inline]
#[must_use]
pub fn millis_to_iso(millis: i64) -> String {
    millis_to_naive(millis)
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// Parse an ISO-8601 string to milliseconds.
///
/// Returns `None` if the string cannot be parsed in any supported form.
#[must_use]
pub fn iso_to_millis(s: &str) -> Option<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ") {
        return Some(naive_to_millis(dt));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive_to_millis(dt));
    }
    None
}
