//! WorldCache — the single shared world snapshot.
//!
//! Holds one [`World`] value behind the `World` lock level. Loaded once at
//! startup (load-through), normalizing every position against the world's
//! bounds; every mutation sets a dirty flag consulted by `flush_to_database`.

use std::sync::atomic::{AtomicBool, Ordering};

use spacecache_core::config::Config;
use spacecache_core::{LockLevel, OrderedRwLock, SpaceObject, World};

use crate::error::DbResult;
use crate::gateway::StoreGateway;
use crate::models::{space_object_from_row, space_object_insert_params, space_object_update_params};

pub struct WorldCache {
    world: OrderedRwLock<World>,
    dirty: AtomicBool,
}

impl WorldCache {
    /// Build an empty cache with the given bounds; call [`Self::initialize`]
    /// with a loaded [`World`] before first use.
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            world: OrderedRwLock::new(LockLevel::World, World::new(width, height)),
            dirty: AtomicBool::new(false),
        }
    }

    /// Build an empty cache with bounds taken from `config.world_width` /
    /// `config.world_height` — the only place cache code should read world
    /// bounds from.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.world_width, config.world_height)
    }

    /// Load every space object from the store, normalizing positions against
    /// this cache's bounds, and install it as the current snapshot.
    pub fn initialize(&self, gateway: &StoreGateway) -> DbResult<()> {
        let rows = gateway.query(
            "SELECT id, type, x, y, speed, angle, last_position_update_ms FROM space_objects",
            &[],
        )?;
        let objects = rows
            .iter()
            .map(space_object_from_row)
            .collect::<DbResult<Vec<_>>>()?;

        let mut guard = self.world.write();
        guard.load(objects);
        drop(guard);
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// A defensive copy of every object currently in the world.
    #[must_use]
    pub fn get(&self) -> Vec<SpaceObject> {
        self.world.read().objects.clone()
    }

    #[must_use]
    pub fn find_object(&self, id: i64) -> Option<SpaceObject> {
        self.world.read().find_object(id).cloned()
    }

    /// Apply `mutate` under an exclusive hold and mark the world dirty.
    pub fn update(&self, mutate: impl FnOnce(&mut World)) {
        let mut guard = self.world.write();
        mutate(&mut guard);
        drop(guard);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn set_ship_speed(&self, ship_id: i64, speed: f64) -> bool {
        let mut found = false;
        self.update(|world| {
            if let Some(obj) = world.find_object_mut(ship_id) {
                obj.speed = speed;
                found = true;
            }
        });
        found
    }

    pub fn teleport_ship(&self, ship_id: i64, x: f64, y: f64) -> bool {
        let mut found = false;
        self.update(|world| {
            let (width, height) = (world.width, world.height);
            if let Some(obj) = world.find_object_mut(ship_id) {
                obj.x = x;
                obj.y = y;
                obj.normalize(width, height);
                found = true;
            }
        });
        found
    }

    pub fn insert_object(&self, mut object: SpaceObject) {
        self.update(|world| {
            object.normalize(world.width, world.height);
            world.objects.push(object);
        });
    }

    pub fn delete_object(&self, id: i64) -> bool {
        let mut removed = false;
        self.update(|world| {
            let before = world.objects.len();
            world.objects.retain(|o| o.id != Some(id));
            removed = world.objects.len() != before;
        });
        removed
    }

    /// Persist the full snapshot if dirty; writes new objects as inserts
    /// (assigning back the store-assigned id in place) and existing ones as
    /// updates. Holds the write lock for the whole flush so the
    /// store-assigned id lands on the exact object that was inserted,
    /// rather than a clone of it — and so a successful insert doesn't
    /// re-dirty the object it just persisted.
    pub fn flush_to_database(&self, gateway: &StoreGateway) -> DbResult<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let mut guard = self.world.write();
        for obj in guard.objects.iter_mut() {
            match obj.id {
                Some(_) => {
                    gateway.exec(
                        "UPDATE space_objects SET x = ?1, y = ?2, speed = ?3, angle = ?4, \
                         last_position_update_ms = ?5 WHERE id = ?6",
                        &space_object_update_params(obj),
                    )?;
                }
                None => {
                    let result = gateway.exec(
                        "INSERT INTO space_objects (type, x, y, speed, angle, last_position_update_ms) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        &space_object_insert_params(obj),
                    )?;
                    if let Some(new_id) = result.last_inserted_id {
                        obj.id = Some(new_id);
                    }
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{DbPool, DbPoolConfig};
    use spacecache_core::SpaceObjectKind;

    fn test_gateway() -> StoreGateway {
        let pool = DbPool::new(DbPoolConfig {
            database_url: "sqlite://:memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            warmup_connections: 1,
            ..DbPoolConfig::default()
        })
        .unwrap();
        let gw = StoreGateway::with_pool(pool);
        gw.exec(crate::test_support::CREATE_TABLES_SQL, &[]).unwrap();
        gw
    }

    #[test]
    fn initialize_normalizes_loaded_positions() {
        let gw = test_gateway();
        gw.exec(
            "INSERT INTO space_objects (type, x, y, speed, angle, last_position_update_ms) \
             VALUES ('asteroid', -100, 5000, 0, 0, 0)",
            &[],
        )
        .unwrap();

        let cache = WorldCache::new(5000.0, 5000.0);
        cache.initialize(&gw).unwrap();

        let obj = cache.find_object(1).unwrap();
        assert!((obj.x - 4900.0).abs() < f64::EPSILON);
        assert!((obj.y - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn teleport_ship_normalizes_and_marks_dirty() {
        let cache = WorldCache::new(5000.0, 5000.0);
        cache.insert_object(SpaceObject {
            id: Some(1),
            kind: SpaceObjectKind::PlayerShip,
            x: 0.0,
            y: 0.0,
            speed: 0.0,
            angle: 0.0,
            last_position_update_ms: 0,
        });
        assert!(cache.is_dirty());

        assert!(cache.teleport_ship(1, -10.0, 5000.0));
        let obj = cache.find_object(1).unwrap();
        assert!((obj.x - 4990.0).abs() < f64::EPSILON);
        assert!((obj.y - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn flush_to_database_persists_new_object_and_clears_dirty() {
        let gw = test_gateway();
        let cache = WorldCache::new(5000.0, 5000.0);
        cache.insert_object(SpaceObject {
            id: None,
            kind: SpaceObjectKind::Asteroid,
            x: 1.0,
            y: 2.0,
            speed: 0.0,
            angle: 0.0,
            last_position_update_ms: 0,
        });
        cache.flush_to_database(&gw).unwrap();
        assert!(!cache.is_dirty());

        let rows = gw.query("SELECT COUNT(*) AS n FROM space_objects", &[]).unwrap();
        assert_eq!(rows[0].get_i64("n").unwrap(), 1);
    }

    #[test]
    fn delete_object_removes_and_marks_dirty() {
        let cache = WorldCache::new(5000.0, 5000.0);
        cache.insert_object(SpaceObject {
            id: Some(7),
            kind: SpaceObjectKind::Shipwreck,
            x: 0.0,
            y: 0.0,
            speed: 0.0,
            angle: 0.0,
            last_position_update_ms: 0,
        });
        assert!(cache.delete_object(7));
        assert!(cache.find_object(7).is_none());
    }
}
