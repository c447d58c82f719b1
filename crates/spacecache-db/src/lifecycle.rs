//! Lifecycle Orchestrator — wires the four cache managers together in the
//! order their dependencies require and reverses it on shutdown.
//!
//! Startup: acquire the lock hierarchy from `CacheInit` down to `Database`
//! once up front (nothing else may run during bootstrap), open the store
//! gateway, load the world, then construct message/user/battle caches in
//! dependency order, releasing the bootstrap locks in reverse.

use std::sync::{Arc, Mutex, OnceLock};

use spacecache_core::config::Config;
use spacecache_core::{LockLevel, OrderedMutex};

use crate::battle_cache::BattleCache;
use crate::error::{DbError, DbResult};
use crate::gateway::StoreGateway;
use crate::message_cache::MessageCache;
use crate::pool::DbPoolConfig;
use crate::user_cache::UserCache;
use crate::world_cache::WorldCache;

/// Coarse lock taken for the duration of startup/shutdown bootstrapping,
/// guaranteeing nothing else observes a half-initialized cache stack.
struct CacheInitLock(OrderedMutex<()>);

impl CacheInitLock {
    fn new() -> Self {
        Self(OrderedMutex::new(LockLevel::CacheInit, ()))
    }
}

pub struct LifecycleOrchestrator {
    init_lock: CacheInitLock,
    gateway: Arc<StoreGateway>,
    world: Arc<WorldCache>,
    messages: Arc<MessageCache>,
    users: Arc<UserCache>,
    battles: Arc<BattleCache>,
    test_mode: bool,
}

impl LifecycleOrchestrator {
    /// Run the full 8-step startup sequence and return a ready-to-use orchestrator.
    pub fn start(pool_config: DbPoolConfig, world_width: f64, world_height: f64, test_mode: bool) -> DbResult<Self> {
        // Step 3: open the store gateway.
        let gateway = Arc::new(StoreGateway::new(pool_config)?);
        Self::start_with_gateway(gateway, world_width, world_height, test_mode)
    }

    /// Same as [`Self::start`], but takes world bounds and pool tuning from a
    /// single [`Config`] value rather than separate arguments — the
    /// production entry point, since bounds must never be a literal in cache
    /// code.
    pub fn start_from_config(config: &Config) -> DbResult<Self> {
        let (auto_min, auto_max) = crate::pool::auto_pool_size();
        let min_connections = config.database_pool_size.unwrap_or(auto_min);
        let max_connections = match (config.database_pool_size, config.database_max_overflow) {
            (Some(size), Some(overflow)) => size + overflow,
            (Some(size), None) => size,
            (None, _) => auto_max,
        };
        let pool_config = DbPoolConfig {
            database_url: config.database_url.clone(),
            min_connections,
            max_connections,
            acquire_timeout_ms: config.database_pool_timeout_ms,
            ..DbPoolConfig::default()
        };
        Self::start(
            pool_config,
            config.world_width,
            config.world_height,
            config.test_mode,
        )
    }

    /// Same as [`Self::start`], but reuses an already-open gateway (the
    /// store's schema is assumed to already exist). Used by tests that need
    /// to bootstrap the in-memory fixture schema on the same pool the
    /// orchestrator will run against.
    pub fn start_with_gateway(
        gateway: Arc<StoreGateway>,
        world_width: f64,
        world_height: f64,
        test_mode: bool,
    ) -> DbResult<Self> {
        let init_lock = CacheInitLock::new();

        // Step 1/2: acquire CacheInit then (implicitly, via the gateway's own
        // pooled connections) Database, in ascending order.
        let init_guard = init_lock.0.lock();

        // Step 4: load the world.
        let world = Arc::new(WorldCache::new(world_width, world_height));
        world.initialize(&gateway)?;

        // Step 5: message cache, no eager load.
        let messages = Arc::new(MessageCache::new(Arc::clone(&gateway)));

        // Step 6: user cache, wired to world + messages.
        let users = Arc::new(UserCache::new(
            Arc::clone(&gateway),
            Arc::clone(&world),
            Arc::clone(&messages),
        ));
        users.start_timer(test_mode);

        // Step 7: battle cache, wired back into user cache.
        let battles = Arc::new(BattleCache::new(Arc::clone(&gateway)));
        battles.start_timer(test_mode);
        users.set_battle_cache(Arc::clone(&battles));

        // Step 8: release the bootstrap lock (reverse of step 1/2).
        drop(init_guard);

        Ok(Self {
            init_lock,
            gateway,
            world,
            messages,
            users,
            battles,
            test_mode,
        })
    }

    #[must_use]
    pub fn gateway(&self) -> Arc<StoreGateway> {
        Arc::clone(&self.gateway)
    }

    #[must_use]
    pub fn world(&self) -> Arc<WorldCache> {
        Arc::clone(&self.world)
    }

    #[must_use]
    pub fn messages(&self) -> Arc<MessageCache> {
        Arc::clone(&self.messages)
    }

    #[must_use]
    pub fn users(&self) -> Arc<UserCache> {
        Arc::clone(&self.users)
    }

    #[must_use]
    pub fn battles(&self) -> Arc<BattleCache> {
        Arc::clone(&self.battles)
    }

    /// Shut every cache down in reverse dependency order (battles, users,
    /// messages, world), flushing each along the way.
    pub fn shutdown(&self) -> DbResult<()> {
        let _init_guard = self.init_lock.0.lock();
        self.battles.shutdown()?;
        self.users.shutdown()?;
        self.messages.shutdown()?;
        self.world.flush_to_database(&self.gateway)?;
        Ok(())
    }

    #[must_use]
    pub fn is_test_mode(&self) -> bool {
        self.test_mode
    }
}

/// Process-wide orchestrator handle, analogous to this workspace's
/// `read_cache()` global-instance pattern — except a plain `OnceLock<T>`
/// can't be rebuilt, and the test harness needs to stand up and tear down a
/// fresh cache stack per test. `install` therefore guards against clobbering
/// a still-running instance, and `reset_for_test` only clears the slot once
/// its occupant reports a successful shutdown.
static GLOBAL_ORCHESTRATOR: OnceLock<Mutex<Option<Arc<LifecycleOrchestrator>>>> = OnceLock::new();

fn global_slot() -> &'static Mutex<Option<Arc<LifecycleOrchestrator>>> {
    GLOBAL_ORCHESTRATOR.get_or_init(|| Mutex::new(None))
}

/// Install `orchestrator` as the process-wide instance. Returns an error if
/// one is already installed — callers that want to replace it must
/// `shutdown` and `reset_for_test` first.
pub fn install(orchestrator: Arc<LifecycleOrchestrator>) -> DbResult<()> {
    let mut slot = global_slot().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if slot.is_some() {
        return Err(DbError::Internal(
            "a LifecycleOrchestrator is already installed globally".into(),
        ));
    }
    *slot = Some(orchestrator);
    Ok(())
}

/// Fetch the process-wide orchestrator, if one has been installed.
#[must_use]
pub fn global() -> Option<Arc<LifecycleOrchestrator>> {
    global_slot()
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone()
}

/// Shut the installed instance down and clear the global slot, so the next
/// test can install a fresh one. A no-op if nothing is installed.
#[cfg(any(test, feature = "test-support"))]
pub fn reset_for_test() -> DbResult<()> {
    let mut slot = global_slot().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(orchestrator) = slot.take() {
        orchestrator.shutdown()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DbPoolConfig {
        DbPoolConfig {
            database_url: "sqlite://:memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            warmup_connections: 1,
            ..DbPoolConfig::default()
        }
    }

    #[test]
    fn start_bootstraps_all_caches_and_shuts_down_cleanly() {
        // Bootstrap the schema on the same pool the orchestrator will run
        // against, mirroring how the real deployment's external migration
        // step runs ahead of the orchestrator on a shared database.
        let pool = crate::pool::DbPool::new(config()).unwrap();
        let gateway = Arc::new(StoreGateway::with_pool(pool));
        gateway.exec(crate::test_support::CREATE_TABLES_SQL, &[]).unwrap();

        let orchestrator =
            LifecycleOrchestrator::start_with_gateway(gateway, 5000.0, 5000.0, true).unwrap();
        assert!(orchestrator.is_test_mode());
        assert!(orchestrator.world().get().is_empty());

        orchestrator.shutdown().unwrap();
    }

    #[test]
    fn global_install_rejects_second_instance_until_reset() {
        // Start from a clean slate in case another test in this process left
        // an instance installed.
        reset_for_test().unwrap();

        let pool = crate::pool::DbPool::new(config()).unwrap();
        let gateway = Arc::new(StoreGateway::with_pool(pool));
        gateway.exec(crate::test_support::CREATE_TABLES_SQL, &[]).unwrap();
        let orchestrator =
            Arc::new(LifecycleOrchestrator::start_with_gateway(gateway, 5000.0, 5000.0, true).unwrap());

        install(Arc::clone(&orchestrator)).unwrap();
        assert!(global().is_some());

        let second_pool = crate::pool::DbPool::new(config()).unwrap();
        let second_gateway = Arc::new(StoreGateway::with_pool(second_pool));
        second_gateway.exec(crate::test_support::CREATE_TABLES_SQL, &[]).unwrap();
        let second = Arc::new(
            LifecycleOrchestrator::start_with_gateway(second_gateway, 5000.0, 5000.0, true).unwrap(),
        );
        assert!(install(second).is_err());

        reset_for_test().unwrap();
        assert!(global().is_none());
    }
}
