//! BattleCache — battle records plus the active-battle-by-user index.
//!
//! A battle leaves `activeBattlesByUser` as soon as `updateBattle` observes a
//! non-null `battle_end_time`; `loadBattleIfNeeded` only retains a
//! store-loaded battle in cache when it is still active after the miss.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use sqlmodel_core::Value;
use spacecache_core::{Battle, LockLevel, OrderedMutex};

use crate::error::{DbError, DbResult};
use crate::gateway::StoreGateway;
use crate::models::{battle_from_row, battle_params};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

struct BattleCacheState {
    battles: HashMap<i64, Battle>,
    active_by_user: HashMap<i64, i64>,
    dirty: HashSet<i64>,
}

pub struct BattleCache {
    state: OrderedMutex<BattleCacheState>,
    gateway: Arc<StoreGateway>,
    shut_down: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    timer_stop: Arc<AtomicBool>,
}

impl BattleCache {
    #[must_use]
    pub fn new(gateway: Arc<StoreGateway>) -> Self {
        Self {
            state: OrderedMutex::new(
                LockLevel::Battle,
                BattleCacheState {
                    battles: HashMap::new(),
                    active_by_user: HashMap::new(),
                    dirty: HashSet::new(),
                },
            ),
            gateway,
            shut_down: AtomicBool::new(false),
            timer: Mutex::new(None),
            timer_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start_timer(self: &Arc<Self>, test_mode: bool) {
        if test_mode {
            return;
        }
        let this = Arc::clone(self);
        let stop = Arc::clone(&self.timer_stop);
        let handle = std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(DEFAULT_FLUSH_INTERVAL);
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let _ = this.flush_to_database();
            }
        });
        *self.timer.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    fn stop_timer(&self) {
        self.timer_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self
            .timer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            let _ = handle.join();
        }
    }

    /// Insert or overwrite a battle in cache and mark it dirty. Removes both
    /// participants from the active-battle index once `battle_end_time` is set.
    pub fn update_battle(&self, battle: Battle) {
        let mut state = self.state.lock();
        if let Some(id) = battle.id {
            if battle.battle_end_time.is_some() {
                state.active_by_user.remove(&battle.attacker_id);
                state.active_by_user.remove(&battle.attackee_id);
            } else {
                state.active_by_user.insert(battle.attacker_id, id);
                state.active_by_user.insert(battle.attackee_id, id);
            }
            state.dirty.insert(id);
            state.battles.insert(id, battle);
        }
    }

    #[must_use]
    pub fn get_battle(&self, battle_id: i64) -> Option<Battle> {
        self.state.lock().battles.get(&battle_id).cloned()
    }

    #[must_use]
    pub fn active_battle_for_user(&self, user_id: i64) -> Option<i64> {
        self.state.lock().active_by_user.get(&user_id).copied()
    }

    /// Store fallback for a battle not already cached. A completed battle
    /// found on the store is returned but not retained in cache.
    pub fn load_battle_if_needed(&self, battle_id: i64) -> DbResult<Option<Battle>> {
        {
            let state = self.state.lock();
            if let Some(battle) = state.battles.get(&battle_id) {
                return Ok(Some(battle.clone()));
            }
        }

        let rows = self.gateway.query(
            "SELECT id, attacker_id, attackee_id, battle_start_time, battle_end_time, winner_id, \
             loser_id, attacker_weapon_cooldowns, attackee_weapon_cooldowns, attacker_start_stats, \
             attackee_start_stats, attacker_end_stats, attackee_end_stats, battle_log, \
             attacker_total_damage, attackee_total_damage FROM battles WHERE id = ?1",
            &[Value::BigInt(battle_id)],
        )?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let battle = battle_from_row(row)?;

        if battle.is_active() {
            let mut state = self.state.lock();
            state.active_by_user.insert(battle.attacker_id, battle_id);
            state.active_by_user.insert(battle.attackee_id, battle_id);
            state.battles.insert(battle_id, battle.clone());
        }

        Ok(Some(battle))
    }

    pub fn flush_to_database(&self) -> DbResult<()> {
        let dirty: Vec<Battle> = {
            let mut state = self.state.lock();
            let ids: Vec<i64> = state.dirty.drain().collect();
            ids.into_iter().filter_map(|id| state.battles.get(&id).cloned()).collect()
        };

        for battle in &dirty {
            let mut params = battle_params(battle)?;
            params.push(Value::BigInt(battle.id.unwrap_or_default()));
            self.gateway.exec(
                "UPDATE battles SET attacker_id=?1, attackee_id=?2, battle_start_time=?3, \
                 battle_end_time=?4, winner_id=?5, loser_id=?6, attacker_weapon_cooldowns=?7, \
                 attackee_weapon_cooldowns=?8, attacker_start_stats=?9, attackee_start_stats=?10, \
                 attacker_end_stats=?11, attackee_end_stats=?12, battle_log=?13, \
                 attacker_total_damage=?14, attackee_total_damage=?15 WHERE id=?16",
                &params,
            )?;
        }
        Ok(())
    }

    pub fn shutdown(&self) -> DbResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Err(DbError::Internal("BattleCache already shut down".into()));
        }
        self.stop_timer();
        self.flush_to_database()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{DbPool, DbPoolConfig};
    use std::collections::HashMap as Map;

    fn setup() -> (Arc<StoreGateway>, BattleCache) {
        let pool = DbPool::new(DbPoolConfig {
            database_url: "sqlite://:memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            warmup_connections: 1,
            ..DbPoolConfig::default()
        })
        .unwrap();
        let gateway = Arc::new(StoreGateway::with_pool(pool));
        gateway.exec(crate::test_support::CREATE_TABLES_SQL, &[]).unwrap();
        let cache = BattleCache::new(Arc::clone(&gateway));
        (gateway, cache)
    }

    fn sample_battle(id: Option<i64>, end: Option<i64>) -> Battle {
        Battle {
            id,
            attacker_id: 1,
            attackee_id: 2,
            battle_start_time: 0,
            battle_end_time: end,
            winner_id: None,
            loser_id: None,
            attacker_weapon_cooldowns: Map::new(),
            attackee_weapon_cooldowns: Map::new(),
            attacker_start_stats: serde_json::json!({}),
            attackee_start_stats: serde_json::json!({}),
            attacker_end_stats: None,
            attackee_end_stats: None,
            battle_log: Vec::new(),
            attacker_total_damage: 0,
            attackee_total_damage: 0,
        }
    }

    #[test]
    fn update_battle_indexes_active_participants() {
        let (_gw, cache) = setup();
        cache.update_battle(sample_battle(Some(1), None));
        assert_eq!(cache.active_battle_for_user(1), Some(1));
        assert_eq!(cache.active_battle_for_user(2), Some(1));
    }

    #[test]
    fn update_battle_evicts_index_on_completion() {
        let (_gw, cache) = setup();
        cache.update_battle(sample_battle(Some(1), None));
        cache.update_battle(sample_battle(Some(1), Some(500)));
        assert_eq!(cache.active_battle_for_user(1), None);
        assert_eq!(cache.active_battle_for_user(2), None);
    }

    #[test]
    fn load_battle_if_needed_does_not_retain_completed_battle() {
        let (gateway, cache) = setup();
        gateway
            .exec(
                "INSERT INTO battles (attacker_id, attackee_id, battle_start_time, battle_end_time, \
                 attacker_weapon_cooldowns, attackee_weapon_cooldowns, attacker_start_stats, \
                 attackee_start_stats, battle_log) VALUES (1, 2, 0, 100, '{}', '{}', '{}', '{}', '[]')",
                &[],
            )
            .unwrap();

        let battle = cache.load_battle_if_needed(1).unwrap().unwrap();
        assert!(!battle.is_active());
        assert_eq!(cache.active_battle_for_user(1), None);
        assert!(cache.get_battle(1).is_none());
    }

    #[test]
    fn load_battle_if_needed_retains_active_battle() {
        let (gateway, cache) = setup();
        gateway
            .exec(
                "INSERT INTO battles (attacker_id, attackee_id, battle_start_time, \
                 attacker_weapon_cooldowns, attackee_weapon_cooldowns, attacker_start_stats, \
                 attackee_start_stats, battle_log) VALUES (1, 2, 0, '{}', '{}', '{}', '{}', '[]')",
                &[],
            )
            .unwrap();

        let battle = cache.load_battle_if_needed(1).unwrap().unwrap();
        assert!(battle.is_active());
        assert_eq!(cache.active_battle_for_user(1), Some(1));
        assert!(cache.get_battle(1).is_some());
    }
}
