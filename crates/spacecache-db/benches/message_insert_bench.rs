//! Criterion benchmark for `MessageCache::create_message` throughput,
//! including the background store-insert resolution it waits on.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use spacecache_db::gateway::StoreGateway;
use spacecache_db::message_cache::MessageCache;
use spacecache_db::pool::{DbPool, DbPoolConfig};
use spacecache_db::test_support::CREATE_TABLES_SQL;

fn fresh_cache() -> Arc<MessageCache> {
    let pool = DbPool::new(DbPoolConfig {
        database_url: "sqlite://:memory:".to_string(),
        min_connections: 1,
        max_connections: 1,
        warmup_connections: 1,
        ..DbPoolConfig::default()
    })
    .expect("pool");
    let gateway = Arc::new(StoreGateway::with_pool(pool));
    gateway.exec(CREATE_TABLES_SQL, &[]).expect("schema");
    gateway
        .exec(
            "INSERT INTO users (username, password_hash, last_updated, defense_last_regen) \
             VALUES ('bench_user', 'pw', 0, 0)",
            &[],
        )
        .expect("seed user");
    Arc::new(MessageCache::new(gateway))
}

fn bench_create_100_messages(c: &mut Criterion) {
    c.bench_function("create_message_100_with_wait", |b| {
        b.iter(|| {
            let cache = fresh_cache();
            for i in 0..100 {
                black_box(cache.create_message(1, format!("message {i}")));
            }
            cache.wait_for_pending_writes();
        });
    });
}

criterion_group!(benches, bench_create_100_messages);
criterion_main!(benches);
