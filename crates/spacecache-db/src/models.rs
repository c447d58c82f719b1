//! Row-level (de)serialization between store rows and `spacecache_core` domain types.
//!
//! Every `*_from_row` function reads the columns defined in
//! [`crate::test_support::CREATE_TABLES_SQL`]; every `*_params` function
//! builds the positional parameter list for the matching `INSERT`/`UPDATE`
//! statement in the cache managers.

use std::collections::HashMap;

use sqlmodel_core::Value;
use spacecache_core::{
    Battle, BuildQueueItem, InventoryGrid, Message, SpaceObject, SpaceObjectKind, TechCounts, User,
};

use crate::error::{DbError, DbResult};
use crate::gateway::Row;

const DEFAULT_INVENTORY_ROWS: usize = 10;
const DEFAULT_INVENTORY_COLS: usize = 10;

fn parse_space_object_kind(raw: &str) -> DbResult<SpaceObjectKind> {
    match raw {
        "player_ship" => Ok(SpaceObjectKind::PlayerShip),
        "asteroid" => Ok(SpaceObjectKind::Asteroid),
        "shipwreck" => Ok(SpaceObjectKind::Shipwreck),
        "escape_pod" => Ok(SpaceObjectKind::EscapePod),
        other => Err(DbError::Internal(format!("unknown space_object kind: {other}"))),
    }
}

#[must_use]
pub fn space_object_kind_str(kind: SpaceObjectKind) -> &'static str {
    match kind {
        SpaceObjectKind::PlayerShip => "player_ship",
        SpaceObjectKind::Asteroid => "asteroid",
        SpaceObjectKind::Shipwreck => "shipwreck",
        SpaceObjectKind::EscapePod => "escape_pod",
    }
}

/// Build a [`SpaceObject`] from a `space_objects` row.
pub fn space_object_from_row(row: &Row) -> DbResult<SpaceObject> {
    Ok(SpaceObject {
        id: Some(row.get_i64("id")?),
        kind: parse_space_object_kind(&row.get_string("type")?)?,
        x: row.get_f64("x")?,
        y: row.get_f64("y")?,
        speed: row.get_f64("speed")?,
        angle: row.get_f64("angle")?,
        last_position_update_ms: row.get_i64("last_position_update_ms")?,
    })
}

/// Positional params for `INSERT INTO space_objects (type, x, y, speed, angle, last_position_update_ms) VALUES (?,?,?,?,?,?)`.
#[must_use]
pub fn space_object_insert_params(obj: &SpaceObject) -> Vec<Value> {
    vec![
        Value::Text(space_object_kind_str(obj.kind).to_string()),
        Value::Double(obj.x),
        Value::Double(obj.y),
        Value::Double(obj.speed),
        Value::Double(obj.angle),
        Value::BigInt(obj.last_position_update_ms),
    ]
}

/// Positional params for `UPDATE space_objects SET x=?,y=?,speed=?,angle=?,last_position_update_ms=? WHERE id=?`.
#[must_use]
pub fn space_object_update_params(obj: &SpaceObject) -> Vec<Value> {
    vec![
        Value::Double(obj.x),
        Value::Double(obj.y),
        Value::Double(obj.speed),
        Value::Double(obj.angle),
        Value::BigInt(obj.last_position_update_ms),
        Value::BigInt(obj.id.unwrap_or_default()),
    ]
}

/// Build a [`Message`] from a `messages` row. Store-backed rows are never pending.
pub fn message_from_row(row: &Row) -> DbResult<Message> {
    Ok(Message {
        id: row.get_i64("id")?,
        recipient_id: row.get_i64("recipient_id")?,
        created_at_ms: row.get_i64("created_at")?,
        is_read: row.get_bool("is_read")?,
        text: row.get_string("message")?,
        is_pending: false,
    })
}

/// Positional params for `INSERT INTO messages (recipient_id, created_at, is_read, message) VALUES (?,?,?,?)`.
#[must_use]
pub fn message_insert_params(msg: &Message) -> Vec<Value> {
    vec![
        Value::BigInt(msg.recipient_id),
        Value::BigInt(msg.created_at_ms),
        Value::BigInt(i64::from(msg.is_read)),
        Value::Text(msg.text.clone()),
    ]
}

/// Build a [`Battle`] from a `battles` row.
pub fn battle_from_row(row: &Row) -> DbResult<Battle> {
    let parse_json = |s: String| -> DbResult<serde_json::Value> {
        serde_json::from_str(&s).map_err(|e| DbError::Serialization(e.to_string()))
    };
    let parse_opt_json = |s: Option<String>| -> DbResult<Option<serde_json::Value>> {
        s.map(parse_json).transpose()
    };
    let parse_cooldowns = |s: String| -> DbResult<HashMap<String, i64>> {
        serde_json::from_str(&s).map_err(|e| DbError::Serialization(e.to_string()))
    };
    let parse_log = |s: String| -> DbResult<Vec<String>> {
        serde_json::from_str(&s).map_err(|e| DbError::Serialization(e.to_string()))
    };

    Ok(Battle {
        id: Some(row.get_i64("id")?),
        attacker_id: row.get_i64("attacker_id")?,
        attackee_id: row.get_i64("attackee_id")?,
        battle_start_time: row.get_i64("battle_start_time")?,
        battle_end_time: row.get_opt_i64("battle_end_time")?,
        winner_id: row.get_opt_i64("winner_id")?,
        loser_id: row.get_opt_i64("loser_id")?,
        attacker_weapon_cooldowns: parse_cooldowns(row.get_string("attacker_weapon_cooldowns")?)?,
        attackee_weapon_cooldowns: parse_cooldowns(row.get_string("attackee_weapon_cooldowns")?)?,
        attacker_start_stats: parse_json(row.get_string("attacker_start_stats")?)?,
        attackee_start_stats: parse_json(row.get_string("attackee_start_stats")?)?,
        attacker_end_stats: parse_opt_json(row.get_opt_string("attacker_end_stats")?)?,
        attackee_end_stats: parse_opt_json(row.get_opt_string("attackee_end_stats")?)?,
        battle_log: parse_log(row.get_string("battle_log")?)?,
        attacker_total_damage: row.get_i64("attacker_total_damage")?,
        attackee_total_damage: row.get_i64("attackee_total_damage")?,
    })
}

/// Positional params for the full `battles` insert/update column list
/// (everything but `id`, in schema order).
pub fn battle_params(battle: &Battle) -> DbResult<Vec<Value>> {
    let to_json = |v: &serde_json::Value| -> DbResult<String> {
        serde_json::to_string(v).map_err(|e| DbError::Serialization(e.to_string()))
    };
    let opt_json = |v: &Option<serde_json::Value>| -> DbResult<Value> {
        Ok(match v {
            Some(v) => Value::Text(to_json(v)?),
            None => Value::Null,
        })
    };

    Ok(vec![
        Value::BigInt(battle.attacker_id),
        Value::BigInt(battle.attackee_id),
        Value::BigInt(battle.battle_start_time),
        battle.battle_end_time.map_or(Value::Null, Value::BigInt),
        battle.winner_id.map_or(Value::Null, Value::BigInt),
        battle.loser_id.map_or(Value::Null, Value::BigInt),
        Value::Text(
            serde_json::to_string(&battle.attacker_weapon_cooldowns)
                .map_err(|e| DbError::Serialization(e.to_string()))?,
        ),
        Value::Text(
            serde_json::to_string(&battle.attackee_weapon_cooldowns)
                .map_err(|e| DbError::Serialization(e.to_string()))?,
        ),
        Value::Text(to_json(&battle.attacker_start_stats)?),
        Value::Text(to_json(&battle.attackee_start_stats)?),
        opt_json(&battle.attacker_end_stats)?,
        opt_json(&battle.attackee_end_stats)?,
        Value::Text(
            serde_json::to_string(&battle.battle_log).map_err(|e| DbError::Serialization(e.to_string()))?,
        ),
        Value::BigInt(battle.attacker_total_damage),
        Value::BigInt(battle.attackee_total_damage),
    ])
}

/// Build a [`User`] from a `users` row, including the tech-tree JSON column
/// and the (possibly absent) inventory grid, applying the malformed/wrong-shape fallback.
pub fn user_from_row(row: &Row) -> DbResult<User> {
    let tech_tree: HashMap<String, i64> = serde_json::from_str(&row.get_string("tech_tree")?)
        .map_err(|e| DbError::Serialization(e.to_string()))?;
    let build_queue: Vec<BuildQueueItem> = serde_json::from_str(&row.get_string("build_queue")?)
        .map_err(|e| DbError::Serialization(e.to_string()))?;

    let tech_counts = TechCounts {
        pulse_laser: row.get_i64("pulse_laser")?,
        auto_turret: row.get_i64("auto_turret")?,
        plasma_lance: row.get_i64("plasma_lance")?,
        gauss_rifle: row.get_i64("gauss_rifle")?,
        photon_torpedo: row.get_i64("photon_torpedo")?,
        rocket_launcher: row.get_i64("rocket_launcher")?,
        ship_hull: row.get_i64("ship_hull")?,
        kinetic_armor: row.get_i64("kinetic_armor")?,
        energy_shield: row.get_i64("energy_shield")?,
        missile_jammer: row.get_i64("missile_jammer")?,
    };

    let inventory = row.get_opt_string("inventory")?.map(|raw| {
        InventoryGrid::from_json_or_default(&raw, DEFAULT_INVENTORY_ROWS, DEFAULT_INVENTORY_COLS)
    });

    Ok(User {
        id: Some(row.get_i64("id")?),
        username: row.get_string("username")?,
        password_hash: row.get_string("password_hash")?,
        iron: row.get_i64("iron")?,
        xp: row.get_i64("xp")?,
        last_updated: row.get_i64("last_updated")?,
        tech_tree,
        tech_counts,
        hull_current: row.get_f64("hull_current")? as i64,
        armor_current: row.get_f64("armor_current")? as i64,
        shield_current: row.get_f64("shield_current")? as i64,
        defense_last_regen: row.get_i64("defense_last_regen")?,
        in_battle: row.get_bool("in_battle")?,
        current_battle_id: row.get_opt_i64("current_battle_id")?,
        build_queue,
        ship_id: row.get_opt_i64("ship_id")?,
        inventory,
    })
}

/// Positional params for inserting a new `users` row (all columns but `id`).
pub fn user_insert_params(user: &User) -> DbResult<Vec<Value>> {
    user_params(user)
}

/// Positional params for `UPDATE users SET ... WHERE id=?` — the same column
/// list as insert, with the row id appended.
pub fn user_update_params(user: &User) -> DbResult<Vec<Value>> {
    let mut params = user_params(user)?;
    params.push(Value::BigInt(user.id.unwrap_or_default()));
    Ok(params)
}

fn user_params(user: &User) -> DbResult<Vec<Value>> {
    let tech_tree_json =
        serde_json::to_string(&user.tech_tree).map_err(|e| DbError::Serialization(e.to_string()))?;
    let build_queue_json =
        serde_json::to_string(&user.build_queue).map_err(|e| DbError::Serialization(e.to_string()))?;
    let inventory_json = user
        .inventory
        .as_ref()
        .map(|g| serde_json::to_string(g).map_err(|e| DbError::Serialization(e.to_string())))
        .transpose()?;

    Ok(vec![
        Value::Text(user.username.clone()),
        Value::Text(user.password_hash.clone()),
        Value::BigInt(user.iron),
        Value::BigInt(user.xp),
        Value::BigInt(user.last_updated),
        Value::Text(tech_tree_json),
        user.ship_id.map_or(Value::Null, Value::BigInt),
        Value::BigInt(user.tech_counts.pulse_laser),
        Value::BigInt(user.tech_counts.auto_turret),
        Value::BigInt(user.tech_counts.plasma_lance),
        Value::BigInt(user.tech_counts.gauss_rifle),
        Value::BigInt(user.tech_counts.photon_torpedo),
        Value::BigInt(user.tech_counts.rocket_launcher),
        Value::BigInt(user.tech_counts.ship_hull),
        Value::BigInt(user.tech_counts.kinetic_armor),
        Value::BigInt(user.tech_counts.energy_shield),
        Value::BigInt(user.tech_counts.missile_jammer),
        Value::Double(user.hull_current as f64),
        Value::Double(user.armor_current as f64),
        Value::Double(user.shield_current as f64),
        Value::BigInt(user.defense_last_regen),
        Value::BigInt(i64::from(user.in_battle)),
        user.current_battle_id.map_or(Value::Null, Value::BigInt),
        Value::Text(build_queue_json),
        inventory_json.map_or(Value::Null, Value::Text),
    ])
}
