//! UserCache — primary user index plus a background flush timer.
//!
//! A single `User` lock level guards both the id-keyed map and its
//! username secondary index; `flush_all_to_database` cascades into the
//! world, message, and battle caches after persisting its own dirty users.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use spacecache_core::{LockLevel, OrderedMutex, SpaceObject, SpaceObjectKind, User};

use crate::battle_cache::BattleCache;
use crate::error::{DbError, DbResult};
use crate::gateway::StoreGateway;
use crate::message_cache::MessageCache;
use crate::models::{user_from_row, user_insert_params, user_update_params};
use crate::world_cache::WorldCache;

/// How often the background flush timer runs when not in test mode.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

struct UserCacheState {
    by_id: HashMap<i64, User>,
    id_by_username: HashMap<String, i64>,
    dirty: HashSet<i64>,
}

impl UserCacheState {
    fn insert(&mut self, user: User) {
        if let Some(id) = user.id {
            self.id_by_username.insert(user.username.clone(), id);
            self.by_id.insert(id, user);
        }
    }
}

pub struct UserCache {
    state: OrderedMutex<UserCacheState>,
    gateway: Arc<StoreGateway>,
    world: Arc<WorldCache>,
    messages: Arc<MessageCache>,
    battles: Mutex<Option<Arc<BattleCache>>>,
    shut_down: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    timer_stop: Arc<AtomicBool>,
    /// Allocates decreasing negative placeholder ids for users cached via
    /// `update_user` before they have a store-assigned id, mirroring
    /// `MessageCache`'s pending-message id scheme.
    next_temp_id: AtomicI64,
}

impl UserCache {
    #[must_use]
    pub fn new(gateway: Arc<StoreGateway>, world: Arc<WorldCache>, messages: Arc<MessageCache>) -> Self {
        Self {
            state: OrderedMutex::new(
                LockLevel::User,
                UserCacheState {
                    by_id: HashMap::new(),
                    id_by_username: HashMap::new(),
                    dirty: HashSet::new(),
                },
            ),
            gateway,
            world,
            messages,
            battles: Mutex::new(None),
            shut_down: AtomicBool::new(false),
            timer: Mutex::new(None),
            timer_stop: Arc::new(AtomicBool::new(false)),
            next_temp_id: AtomicI64::new(-1),
        }
    }

    /// Wire in the battle cache once constructed (the lifecycle orchestrator
    /// builds `BattleCache` after `UserCache`, so this is set post-construction).
    pub fn set_battle_cache(&self, battles: Arc<BattleCache>) {
        *self.battles.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(battles);
    }

    /// Start the background flush timer. No-op in `test_mode`.
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
                let _ = this.flush_all_to_database();
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

    fn load_through(&self, state: &mut UserCacheState, sql_where: &str, param: &sqlmodel_core::Value) -> DbResult<Option<i64>> {
        let sql = format!(
            "SELECT id, username, password_hash, iron, xp, last_updated, tech_tree, ship_id, \
             pulse_laser, auto_turret, plasma_lance, gauss_rifle, photon_torpedo, rocket_launcher, \
             ship_hull, kinetic_armor, energy_shield, missile_jammer, hull_current, armor_current, \
             shield_current, defense_last_regen, in_battle, current_battle_id, build_queue, inventory \
             FROM users WHERE {sql_where}"
        );
        let rows = self.gateway.query(&sql, std::slice::from_ref(param))?;
        match rows.first() {
            Some(row) => {
                let user = user_from_row(row)?;
                let id = user.id;
                state.insert(user);
                Ok(id)
            }
            None => Ok(None),
        }
    }

    /// Load-through by id, updating the username index on hit.
    pub fn get_user_by_id(&self, user_id: i64) -> DbResult<Option<User>> {
        let mut state = self.state.lock();
        if let Some(user) = state.by_id.get(&user_id) {
            let mut user = user.clone();
            user.update_stats(crate::timestamps::now_millis());
            return Ok(Some(user));
        }
        self.load_through(&mut state, "id = ?1", &sqlmodel_core::Value::BigInt(user_id))?;
        Ok(state.by_id.get(&user_id).map(|u| {
            let mut u = u.clone();
            u.update_stats(crate::timestamps::now_millis());
            u
        }))
    }

    /// Index lookup by username, falling through to the store on miss.
    pub fn get_user_by_username(&self, username: &str) -> DbResult<Option<User>> {
        let mut state = self.state.lock();
        if let Some(&id) = state.id_by_username.get(username) {
            return Ok(state.by_id.get(&id).map(|u| {
                let mut u = u.clone();
                u.update_stats(crate::timestamps::now_millis());
                u
            }));
        }
        self.load_through(
            &mut state,
            "username = ?1",
            &sqlmodel_core::Value::Text(username.to_string()),
        )?;
        Ok(state.id_by_username.get(username).and_then(|id| state.by_id.get(id)).map(|u| {
            let mut u = u.clone();
            u.update_stats(crate::timestamps::now_millis());
            u
        }))
    }

    /// Create a brand-new account: a `users` row, a `player_ship` in the
    /// world, and a welcome message, all sharing the store-assigned user id.
    /// Unlike `update_user`, this writes the user row synchronously — the
    /// ship and message both need the real id immediately, and there is no
    /// pending-id mechanism for users the way there is for messages.
    pub fn create_user(
        self: &Arc<Self>,
        username: &str,
        password_hash: &str,
        now_ms: i64,
    ) -> DbResult<User> {
        let mut user = User {
            id: None,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            iron: 0,
            xp: 0,
            last_updated: now_ms,
            tech_tree: HashMap::new(),
            tech_counts: spacecache_core::TechCounts::default(),
            hull_current: 100,
            armor_current: 100,
            shield_current: 100,
            defense_last_regen: now_ms,
            in_battle: false,
            current_battle_id: None,
            build_queue: Vec::new(),
            ship_id: None,
            inventory: None,
        };

        let exec = self
            .gateway
            .exec(
                "INSERT INTO users (username, password_hash, iron, xp, last_updated, \
                 tech_tree, ship_id, pulse_laser, auto_turret, plasma_lance, gauss_rifle, \
                 photon_torpedo, rocket_launcher, ship_hull, kinetic_armor, energy_shield, \
                 missile_jammer, hull_current, armor_current, shield_current, \
                 defense_last_regen, in_battle, current_battle_id, build_queue, inventory) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,\
                 ?20,?21,?22,?23,?24,?25)",
                &user_insert_params(&user)?,
            )
            .map_err(|error| match &error {
                DbError::Sqlite(msg) if crate::error::is_unique_constraint_error(msg) => {
                    DbError::duplicate("user", username.to_string())
                }
                _ => error,
            })?;
        let user_id = exec
            .last_inserted_id
            .ok_or_else(|| DbError::Internal("user insert did not report a rowid".into()))?;
        user.id = Some(user_id);

        self.world.insert_object(SpaceObject {
            id: None,
            kind: SpaceObjectKind::PlayerShip,
            x: 0.0,
            y: 0.0,
            speed: 0.0,
            angle: 0.0,
            last_position_update_ms: now_ms,
        });
        self.world.flush_to_database(&self.gateway)?;

        self.messages
            .create_message(user_id, format!("Welcome to the frontier, {username}."));

        let mut state = self.state.lock();
        state.insert(user.clone());
        Ok(user)
    }

    /// Overwrite the cached user and mark it dirty; does not persist
    /// immediately. A user with no store-assigned id yet is given a
    /// negative placeholder id so it is never silently dropped from the
    /// cache or the dirty set — `flush_all_to_database` recognizes a
    /// negative id as pending insert and backfills the real one.
    pub fn update_user(&self, mut user: User) {
        user.update_stats(crate::timestamps::now_millis());
        let mut state = self.state.lock();
        let id = user
            .id
            .unwrap_or_else(|| self.next_temp_id.fetch_sub(1, Ordering::SeqCst));
        user.id = Some(id);
        state.dirty.insert(id);
        state.insert(user);
    }

    /// Persist every dirty user, then cascade to world/message/battle flushes.
    pub fn flush_all_to_database(&self) -> DbResult<()> {
        let dirty_users: Vec<User> = {
            let mut state = self.state.lock();
            let ids: Vec<i64> = state.dirty.drain().collect();
            ids.into_iter()
                .filter_map(|id| state.by_id.get(&id).cloned())
                .collect()
        };

        for user in &dirty_users {
            match user.id {
                Some(id) if id > 0 => {
                    self.gateway.exec(
                        "UPDATE users SET username=?1, password_hash=?2, iron=?3, xp=?4, \
                         last_updated=?5, tech_tree=?6, ship_id=?7, pulse_laser=?8, auto_turret=?9, \
                         plasma_lance=?10, gauss_rifle=?11, photon_torpedo=?12, rocket_launcher=?13, \
                         ship_hull=?14, kinetic_armor=?15, energy_shield=?16, missile_jammer=?17, \
                         hull_current=?18, armor_current=?19, shield_current=?20, defense_last_regen=?21, \
                         in_battle=?22, current_battle_id=?23, build_queue=?24, inventory=?25 WHERE id=?26",
                        &user_update_params(user)?,
                    )?;
                }
                pending_id => {
                    let exec = self.gateway.exec(
                        "INSERT INTO users (username, password_hash, iron, xp, last_updated, \
                         tech_tree, ship_id, pulse_laser, auto_turret, plasma_lance, gauss_rifle, \
                         photon_torpedo, rocket_launcher, ship_hull, kinetic_armor, energy_shield, \
                         missile_jammer, hull_current, armor_current, shield_current, \
                         defense_last_regen, in_battle, current_battle_id, build_queue, inventory) \
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,\
                         ?20,?21,?22,?23,?24,?25)",
                        &user_insert_params(user)?,
                    )?;
                    if let Some(new_id) = exec.last_inserted_id {
                        let mut resolved = user.clone();
                        resolved.id = Some(new_id);
                        let mut state = self.state.lock();
                        if let Some(old_id) = pending_id {
                            state.by_id.remove(&old_id);
                        }
                        state.insert(resolved);
                    }
                }
            }
        }

        self.world.flush_to_database(&self.gateway)?;
        self.messages.flush_to_database()?;
        if let Some(battles) = self
            .battles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
        {
            battles.flush_to_database()?;
        }
        Ok(())
    }

    /// Stop the timer and flush once more, in users → world → messages →
    /// battles order. Invocable exactly once.
    pub fn shutdown(&self) -> DbResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Err(DbError::Internal("UserCache already shut down".into()));
        }
        self.stop_timer();
        self.flush_all_to_database()
    }
}
