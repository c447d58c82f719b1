//! Domain models for the space-combat cache layer.
//!
//! These types are pure data plus the small set of derivations the spec
//! assigns to the model itself (tick-based stat updates, coordinate
//! normalization, inventory deserialization fallback). Everything else —
//! caching, dirty tracking, persistence — lives in the cache managers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// User
// =============================================================================

/// Per-item counts for the ten known weapons and defenses. Each count bounds
/// the corresponding max stat: `max_hull = 100 * ship_hull`, etc.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TechCounts {
    pub pulse_laser: i64,
    pub auto_turret: i64,
    pub plasma_lance: i64,
    pub gauss_rifle: i64,
    pub photon_torpedo: i64,
    pub rocket_launcher: i64,
    pub ship_hull: i64,
    pub kinetic_armor: i64,
    pub energy_shield: i64,
    pub missile_jammer: i64,
}

/// Which pool a build-queue entry completes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Weapon,
    Defense,
}

/// One entry in a user's build queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildQueueItem {
    pub item_key: String,
    pub item_type: ItemType,
    pub completion_time: i64,
}

/// A single cell of the inventory grid: either empty or a placed commander.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryCell {
    Commander { data: CommanderData },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommanderData {
    pub id: i64,
    pub name: String,
    pub stats: Vec<StatBonus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatBonus {
    pub stat_type: String,
    pub bonus_percent: f64,
}

/// Fixed-dimension grid of inventory cells, `rows x cols`, cells possibly
/// `None`. Deserializing malformed or wrong-shape JSON falls back to an
/// all-`None` grid of the correct dimensions rather than failing the load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryGrid {
    pub rows: usize,
    pub cols: usize,
    pub cells: Vec<Option<InventoryCell>>,
}

impl InventoryGrid {
    /// Builds an empty grid of the given dimensions.
    #[must_use]
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![None; rows * cols],
        }
    }

    /// Parses `raw` as an inventory grid; on any malformation (invalid JSON,
    /// wrong cell count, mismatched dimensions) returns an empty grid of
    /// `(rows, cols)` instead of propagating the error. This fallback is an
    /// invariant of the format, not a best-effort nicety.
    #[must_use]
    pub fn from_json_or_default(raw: &str, rows: usize, cols: usize) -> Self {
        match serde_json::from_str::<Self>(raw) {
            Ok(grid) if grid.rows == rows && grid.cols == cols && grid.cells.len() == rows * cols => {
                grid
            }
            _ => Self::empty(rows, cols),
        }
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<&InventoryCell> {
        self.cells.get(row * self.cols + col)?.as_ref()
    }
}

/// Milliseconds of elapsed time it takes to accrue one unit of iron.
const IRON_ACCRUAL_MS_PER_UNIT: i64 = 1_000;
/// Milliseconds between one unit of defense regeneration.
const DEFENSE_REGEN_MS_PER_UNIT: i64 = 1_000;

/// A player account: resources, tech tree, defense pools, build queue, and
/// an optional ship/inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Option<i64>,
    pub username: String,
    pub password_hash: String,
    pub iron: i64,
    pub xp: i64,
    pub last_updated: i64,
    pub tech_tree: HashMap<String, i64>,
    pub tech_counts: TechCounts,
    pub hull_current: i64,
    pub armor_current: i64,
    pub shield_current: i64,
    pub defense_last_regen: i64,
    pub in_battle: bool,
    pub current_battle_id: Option<i64>,
    pub build_queue: Vec<BuildQueueItem>,
    pub ship_id: Option<i64>,
    pub inventory: Option<InventoryGrid>,
}

impl User {
    /// `0 <= hullCurrent <= 100 * ship_hull_count`, and analogously for
    /// armor/shield.
    #[must_use]
    pub const fn max_hull(&self) -> i64 {
        100 * self.tech_counts.ship_hull
    }

    #[must_use]
    pub const fn max_armor(&self) -> i64 {
        100 * self.tech_counts.kinetic_armor
    }

    #[must_use]
    pub const fn max_shield(&self) -> i64 {
        100 * self.tech_counts.energy_shield
    }

    /// True when `hull_current`/`armor_current`/`shield_current` all satisfy
    /// their `[0, max]` bound.
    #[must_use]
    pub fn defense_pools_in_range(&self) -> bool {
        (0..=self.max_hull()).contains(&self.hull_current)
            && (0..=self.max_armor()).contains(&self.armor_current)
            && (0..=self.max_shield()).contains(&self.shield_current)
    }

    /// Applies tick-based derivations (iron accrual, defense regeneration)
    /// for the elapsed time since `last_updated`, then advances
    /// `last_updated` to `now_ms`. A no-op if `now_ms <= last_updated`.
    pub fn update_stats(&mut self, now_ms: i64) {
        if now_ms <= self.last_updated {
            return;
        }
        let elapsed = now_ms - self.last_updated;

        let iron_gain = elapsed / IRON_ACCRUAL_MS_PER_UNIT;
        self.iron = self.iron.saturating_add(iron_gain);

        let regen_elapsed = now_ms - self.defense_last_regen;
        if regen_elapsed >= DEFENSE_REGEN_MS_PER_UNIT {
            let regen_units = regen_elapsed / DEFENSE_REGEN_MS_PER_UNIT;
            self.hull_current = (self.hull_current + regen_units).min(self.max_hull());
            self.armor_current = (self.armor_current + regen_units).min(self.max_armor());
            self.shield_current = (self.shield_current + regen_units).min(self.max_shield());
            self.defense_last_regen += regen_units * DEFENSE_REGEN_MS_PER_UNIT;
        }

        self.last_updated = now_ms;
    }
}

// =============================================================================
// SpaceObject / World
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceObjectKind {
    PlayerShip,
    Asteroid,
    Shipwreck,
    EscapePod,
}

/// Any mobile entity in the world: player ship, asteroid, shipwreck, or
/// escape pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceObject {
    pub id: Option<i64>,
    pub kind: SpaceObjectKind,
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    pub angle: f64,
    pub last_position_update_ms: i64,
}

/// Wraps a coordinate into `[0, bound)` using floored modular reduction, so
/// that negative coordinates and exact boundary values both normalize
/// correctly (`-100` with bound `5000` yields `4900`; `5000` yields `0`).
#[must_use]
pub fn normalize_coordinate(value: f64, bound: f64) -> f64 {
    if bound <= 0.0 {
        return 0.0;
    }
    let r = value % bound;
    if r < 0.0 { r + bound } else { r }
}

impl SpaceObject {
    /// Normalizes `x`/`y` in place against `(width, height)`.
    pub fn normalize(&mut self, width: f64, height: f64) {
        self.x = normalize_coordinate(self.x, width);
        self.y = normalize_coordinate(self.y, height);
    }
}

/// Single shared world snapshot: an ordered set of space objects plus
/// implicit bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    pub objects: Vec<SpaceObject>,
    pub width: f64,
    pub height: f64,
}

impl World {
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            objects: Vec::new(),
            width,
            height,
        }
    }

    /// Loads `objects`, normalizing every position against this world's
    /// bounds (see `normalize_coordinate`).
    pub fn load(&mut self, mut objects: Vec<SpaceObject>) {
        for obj in &mut objects {
            obj.normalize(self.width, self.height);
        }
        self.objects = objects;
    }

    #[must_use]
    pub fn find_object(&self, id: i64) -> Option<&SpaceObject> {
        self.objects.iter().find(|o| o.id == Some(id))
    }

    pub fn find_object_mut(&mut self, id: i64) -> Option<&mut SpaceObject> {
        self.objects.iter_mut().find(|o| o.id == Some(id))
    }
}

// =============================================================================
// Message
// =============================================================================

/// A message in a user's inbox. `id < 0` while the asynchronous store insert
/// is in flight (`is_pending = true`); once the insert completes, `id`
/// becomes the store-assigned positive value and `is_pending` clears. No
/// external caller ever observes a negative id persisted to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub recipient_id: i64,
    pub created_at_ms: i64,
    pub is_read: bool,
    pub text: String,
    pub is_pending: bool,
}

impl Message {
    /// Builds a new pending message with a caller-supplied negative
    /// temporary id.
    #[must_use]
    pub fn pending(temp_id: i64, recipient_id: i64, created_at_ms: i64, text: String) -> Self {
        debug_assert!(temp_id < 0, "pending message ids must be negative");
        Self {
            id: temp_id,
            recipient_id,
            created_at_ms,
            is_read: false,
            text,
            is_pending: true,
        }
    }

    /// `m.isPending <=> m.id < 0` — the universal invariant.
    #[must_use]
    pub const fn invariant_holds(&self) -> bool {
        self.is_pending == (self.id < 0)
    }

    /// Rewrites this record as persisted with the store-assigned `real_id`,
    /// preserving whatever `is_read` value it already carries (a
    /// mark-as-read that arrived while the insert was in flight must
    /// survive the rewrite).
    pub fn resolve(&mut self, real_id: i64) {
        debug_assert!(real_id > 0, "resolved message ids must be positive");
        self.id = real_id;
        self.is_pending = false;
    }
}

// =============================================================================
// Battle
// =============================================================================

/// An in-progress or completed battle between two users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Battle {
    pub id: Option<i64>,
    pub attacker_id: i64,
    pub attackee_id: i64,
    pub battle_start_time: i64,
    pub battle_end_time: Option<i64>,
    pub winner_id: Option<i64>,
    pub loser_id: Option<i64>,
    pub attacker_weapon_cooldowns: HashMap<String, i64>,
    pub attackee_weapon_cooldowns: HashMap<String, i64>,
    pub attacker_start_stats: serde_json::Value,
    pub attackee_start_stats: serde_json::Value,
    pub attacker_end_stats: Option<serde_json::Value>,
    pub attackee_end_stats: Option<serde_json::Value>,
    pub battle_log: Vec<String>,
    pub attacker_total_damage: i64,
    pub attackee_total_damage: i64,
}

impl Battle {
    /// Membership in `activeBattlesByUser` is defined as
    /// `battle_end_time == None`.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.battle_end_time.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_coordinate_wraps_boundary_to_zero() {
        assert!((normalize_coordinate(5000.0, 5000.0) - 0.0).abs() < f64::EPSILON);
        assert!((normalize_coordinate(0.0, 5000.0) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn normalize_coordinate_wraps_negative() {
        assert!((normalize_coordinate(-100.0, 5000.0) - 4900.0).abs() < f64::EPSILON);
    }

    #[test]
    fn normalize_coordinate_idempotent() {
        for v in [-3010.0, -100.0, 0.0, 250.0, 4999.0, 5000.0, 7000.0] {
            let once = normalize_coordinate(v, 5000.0);
            let twice = normalize_coordinate(once, 5000.0);
            assert!((once - twice).abs() < f64::EPSILON, "v={v}");
        }
    }

    #[test]
    fn negative_compound_coordinate_matches_scenario() {
        // Scenario 3 in the test suite: (-3010, -2505) with W=H=5000 -> (1990, 2495).
        assert!((normalize_coordinate(-3010.0, 5000.0) - 1990.0).abs() < f64::EPSILON);
        assert!((normalize_coordinate(-2505.0, 5000.0) - 2495.0).abs() < f64::EPSILON);
    }

    #[test]
    fn world_load_normalizes_every_object() {
        let mut world = World::new(5000.0, 5000.0);
        world.load(vec![SpaceObject {
            id: Some(1),
            kind: SpaceObjectKind::Asteroid,
            x: -100.0,
            y: 5000.0,
            speed: 0.0,
            angle: 0.0,
            last_position_update_ms: 0,
        }]);
        let obj = world.find_object(1).expect("object present");
        assert!((obj.x - 4900.0).abs() < f64::EPSILON);
        assert!((obj.y - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn message_pending_invariant() {
        let msg = Message::pending(-1, 1, 0, "hi".to_string());
        assert!(msg.invariant_holds());
        assert!(msg.is_pending);
        assert!(msg.id < 0);
    }

    #[test]
    fn message_resolve_clears_pending_and_preserves_read() {
        let mut msg = Message::pending(-1, 1, 0, "hi".to_string());
        msg.is_read = true; // mark-as-read raced ahead of insert completion
        msg.resolve(42);
        assert!(msg.invariant_holds());
        assert!(!msg.is_pending);
        assert_eq!(msg.id, 42);
        assert!(msg.is_read, "read status must survive the id rewrite");
    }

    #[test]
    fn inventory_malformed_json_falls_back_to_empty_grid() {
        let grid = InventoryGrid::from_json_or_default("not json", 10, 10);
        assert_eq!(grid.rows, 10);
        assert_eq!(grid.cols, 10);
        assert!(grid.cells.iter().all(Option::is_none));
    }

    #[test]
    fn inventory_wrong_shape_falls_back_to_empty_grid() {
        let wrong_shape = serde_json::to_string(&InventoryGrid::empty(5, 5)).unwrap();
        let grid = InventoryGrid::from_json_or_default(&wrong_shape, 10, 10);
        assert_eq!(grid.rows, 10);
        assert_eq!(grid.cols, 10);
        assert_eq!(grid.cells.len(), 100);
    }

    #[test]
    fn inventory_well_formed_round_trips() {
        let mut grid = InventoryGrid::empty(2, 2);
        grid.cells[0] = Some(InventoryCell::Commander {
            data: CommanderData {
                id: 1,
                name: "Admiral".to_string(),
                stats: vec![StatBonus {
                    stat_type: "damage".to_string(),
                    bonus_percent: 10.0,
                }],
            },
        });
        let json = serde_json::to_string(&grid).unwrap();
        let round_tripped = InventoryGrid::from_json_or_default(&json, 2, 2);
        assert!(round_tripped.get(0, 0).is_some());
        assert!(round_tripped.get(0, 1).is_none());
    }

    #[test]
    fn user_defense_pools_bounded_by_tech_counts() {
        let user = User {
            id: Some(1),
            username: "alice".to_string(),
            password_hash: String::new(),
            iron: 0,
            xp: 0,
            last_updated: 0,
            tech_tree: HashMap::new(),
            tech_counts: TechCounts {
                ship_hull: 1,
                kinetic_armor: 1,
                energy_shield: 1,
                ..Default::default()
            },
            hull_current: 100,
            armor_current: 100,
            shield_current: 100,
            defense_last_regen: 0,
            in_battle: false,
            current_battle_id: None,
            build_queue: Vec::new(),
            ship_id: None,
            inventory: None,
        };
        assert!(user.defense_pools_in_range());
        assert_eq!(user.max_hull(), 100);
    }

    #[test]
    fn update_stats_accrues_iron_and_regen_then_advances_clock() {
        let mut user = User {
            id: Some(1),
            username: "alice".to_string(),
            password_hash: String::new(),
            iron: 0,
            xp: 0,
            last_updated: 0,
            tech_tree: HashMap::new(),
            tech_counts: TechCounts {
                ship_hull: 1,
                kinetic_armor: 1,
                energy_shield: 1,
                ..Default::default()
            },
            hull_current: 50,
            armor_current: 50,
            shield_current: 50,
            defense_last_regen: 0,
            in_battle: false,
            current_battle_id: None,
            build_queue: Vec::new(),
            ship_id: None,
            inventory: None,
        };
        user.update_stats(10_000);
        assert_eq!(user.iron, 10);
        assert_eq!(user.hull_current, 60);
        assert_eq!(user.last_updated, 10_000);
    }

    #[test]
    fn update_stats_caps_regen_at_max() {
        let mut user = User {
            id: Some(1),
            username: "alice".to_string(),
            password_hash: String::new(),
            iron: 0,
            xp: 0,
            last_updated: 0,
            tech_tree: HashMap::new(),
            tech_counts: TechCounts {
                ship_hull: 1,
                ..Default::default()
            },
            hull_current: 95,
            armor_current: 0,
            shield_current: 0,
            defense_last_regen: 0,
            in_battle: false,
            current_battle_id: None,
            build_queue: Vec::new(),
            ship_id: None,
            inventory: None,
        };
        user.update_stats(60_000);
        assert_eq!(user.hull_current, 100);
        assert!(user.defense_pools_in_range());
    }

    #[test]
    fn update_stats_no_op_when_clock_does_not_advance() {
        let mut user = User {
            id: Some(1),
            username: "alice".to_string(),
            password_hash: String::new(),
            iron: 5,
            xp: 0,
            last_updated: 1_000,
            tech_tree: HashMap::new(),
            tech_counts: TechCounts::default(),
            hull_current: 0,
            armor_current: 0,
            shield_current: 0,
            defense_last_regen: 1_000,
            in_battle: false,
            current_battle_id: None,
            build_queue: Vec::new(),
            ship_id: None,
            inventory: None,
        };
        user.update_stats(500);
        assert_eq!(user.iron, 5);
        assert_eq!(user.last_updated, 1_000);
    }

    #[test]
    fn battle_active_membership_matches_end_time() {
        let battle = Battle {
            id: Some(1),
            attacker_id: 1,
            attackee_id: 2,
            battle_start_time: 0,
            battle_end_time: None,
            winner_id: None,
            loser_id: None,
            attacker_weapon_cooldowns: HashMap::new(),
            attackee_weapon_cooldowns: HashMap::new(),
            attacker_start_stats: serde_json::Value::Null,
            attackee_start_stats: serde_json::Value::Null,
            attacker_end_stats: None,
            attackee_end_stats: None,
            battle_log: Vec::new(),
            attacker_total_damage: 0,
            attackee_total_damage: 0,
        };
        assert!(battle.is_active());
        let mut ended = battle;
        ended.battle_end_time = Some(1_000);
        assert!(!ended.is_active());
    }
}
