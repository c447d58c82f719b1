//! Criterion benchmarks for the lock hierarchy's always-on instrumentation.
//!
//! Covers: uncontended `OrderedMutex`/`OrderedRwLock` acquire/release, the
//! debug-only ordering check, and contention snapshot/reset. Run with
//! `cargo bench -p spacecache-core`.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use spacecache_core::{
    LockLevel, OrderedMutex, OrderedRwLock, held_locks, lock_contention_reset,
    lock_contention_snapshot,
};

fn bench_mutex_uncontended(c: &mut Criterion) {
    let lock = OrderedMutex::new(LockLevel::User, 0_i64);

    c.bench_function("ordered_mutex_uncontended_lock_unlock", |b| {
        b.iter(|| {
            let mut guard = lock.lock();
            *guard += 1;
            black_box(*guard);
        });
    });
}

fn bench_rwlock_uncontended_read(c: &mut Criterion) {
    let lock = OrderedRwLock::new(LockLevel::World, vec![1_i64, 2, 3]);

    c.bench_function("ordered_rwlock_uncontended_read", |b| {
        b.iter(|| {
            let guard = lock.read();
            black_box(guard.len());
        });
    });
}

fn bench_rwlock_uncontended_write(c: &mut Criterion) {
    let lock = OrderedRwLock::new(LockLevel::World, 0_i64);

    c.bench_function("ordered_rwlock_uncontended_write", |b| {
        b.iter(|| {
            let mut guard = lock.write();
            *guard += 1;
            black_box(*guard);
        });
    });
}

fn bench_nested_acquire_in_order(c: &mut Criterion) {
    let world = OrderedRwLock::new(LockLevel::World, 0_i64);
    let user = OrderedMutex::new(LockLevel::User, 0_i64);

    c.bench_function("nested_acquire_world_then_user", |b| {
        b.iter(|| {
            let w = world.read();
            let mut u = user.lock();
            *u += 1;
            black_box((*w, *u));
        });
    });
}

fn bench_contended_mutex(c: &mut Criterion) {
    let lock = Arc::new(OrderedMutex::new(LockLevel::Message, 0_i64));

    c.bench_function("ordered_mutex_contended_two_threads", |b| {
        b.iter(|| {
            let lock2 = Arc::clone(&lock);
            let handle = std::thread::spawn(move || {
                for _ in 0..100 {
                    let mut g = lock2.lock();
                    *g += 1;
                }
            });
            for _ in 0..100 {
                let mut g = lock.lock();
                *g += 1;
            }
            handle.join().unwrap();
        });
    });
}

fn bench_contention_snapshot(c: &mut Criterion) {
    let lock = OrderedMutex::new(LockLevel::Battle, 0_i64);
    for _ in 0..1000 {
        let _ = lock.lock();
    }

    c.bench_function("lock_contention_snapshot", |b| {
        b.iter(|| black_box(lock_contention_snapshot()));
    });

    lock_contention_reset();
}

fn bench_held_locks_query(c: &mut Criterion) {
    c.bench_function("held_locks_empty_stack", |b| {
        b.iter(|| black_box(held_locks()));
    });
}

criterion_group!(
    benches,
    bench_mutex_uncontended,
    bench_rwlock_uncontended_read,
    bench_rwlock_uncontended_write,
    bench_nested_acquire_in_order,
    bench_contended_mutex,
    bench_contention_snapshot,
    bench_held_locks_query,
);
criterion_main!(benches);
