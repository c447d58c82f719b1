//! Test-only `SQLite` fixture schema.
//!
//! Minimal `CREATE TABLE` statements for the four tables the gateway and
//! cache managers exercise in integration tests. Production DDL and
//! migrations live outside this workspace; this module exists only so
//! tests have a real `SQLite` file to point the pool at.

#![cfg(any(test, feature = "test-support"))]

/// `CREATE TABLE IF NOT EXISTS` statements for `users`, `space_objects`,
/// `messages`, and `battles`.
pub const CREATE_TABLES_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    iron INTEGER NOT NULL DEFAULT 0,
    xp INTEGER NOT NULL DEFAULT 0,
    last_updated INTEGER NOT NULL,
    tech_tree TEXT NOT NULL DEFAULT '{}',
    ship_id INTEGER,
    pulse_laser INTEGER NOT NULL DEFAULT 0,
    auto_turret INTEGER NOT NULL DEFAULT 0,
    plasma_lance INTEGER NOT NULL DEFAULT 0,
    gauss_rifle INTEGER NOT NULL DEFAULT 0,
    photon_torpedo INTEGER NOT NULL DEFAULT 0,
    rocket_launcher INTEGER NOT NULL DEFAULT 0,
    ship_hull INTEGER NOT NULL DEFAULT 0,
    kinetic_armor INTEGER NOT NULL DEFAULT 0,
    energy_shield INTEGER NOT NULL DEFAULT 0,
    missile_jammer INTEGER NOT NULL DEFAULT 0,
    hull_current REAL NOT NULL DEFAULT 0,
    armor_current REAL NOT NULL DEFAULT 0,
    shield_current REAL NOT NULL DEFAULT 0,
    defense_last_regen INTEGER NOT NULL,
    in_battle INTEGER NOT NULL DEFAULT 0,
    current_battle_id INTEGER,
    build_queue TEXT NOT NULL DEFAULT '[]',
    build_start_sec INTEGER,
    inventory TEXT
);
CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);

CREATE TABLE IF NOT EXISTS space_objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    x REAL NOT NULL,
    y REAL NOT NULL,
    speed REAL NOT NULL DEFAULT 0,
    angle REAL NOT NULL DEFAULT 0,
    last_position_update_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    recipient_id INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    message TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_id);

CREATE TABLE IF NOT EXISTS battles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    attacker_id INTEGER NOT NULL,
    attackee_id INTEGER NOT NULL,
    battle_start_time INTEGER NOT NULL,
    battle_end_time INTEGER,
    winner_id INTEGER,
    loser_id INTEGER,
    attacker_weapon_cooldowns TEXT NOT NULL DEFAULT '{}',
    attackee_weapon_cooldowns TEXT NOT NULL DEFAULT '{}',
    attacker_start_stats TEXT NOT NULL DEFAULT '{}',
    attackee_start_stats TEXT NOT NULL DEFAULT '{}',
    attacker_end_stats TEXT,
    attackee_end_stats TEXT,
    battle_log TEXT NOT NULL DEFAULT '[]',
    attacker_total_damage REAL NOT NULL DEFAULT 0,
    attackee_total_damage REAL NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_battles_attacker ON battles(attacker_id);
CREATE INDEX IF NOT EXISTS idx_battles_attackee ON battles(attackee_id);
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_tables_sql_mentions_all_four_tables() {
        for table in ["users", "space_objects", "messages", "battles"] {
            assert!(
                CREATE_TABLES_SQL.contains(table),
                "missing table {table} in fixture schema"
            );
        }
    }
}
