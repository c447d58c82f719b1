//! MessageCache — per-user inboxes with asynchronous, write-behind creation.
//!
//! `create_message` hands back a negative temporary id immediately and
//! resolves it to the store-assigned positive id on a background thread.
//! Temp ids are strictly decreasing per user; resolution order across users
//! (or even within one, once multiple inserts are in flight) is not
//! guaranteed — callers that need a stable identity should use the temp id
//! itself until it resolves.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use sqlmodel_core::Value;
use spacecache_core::{LockLevel, Message, OrderedMutex};

use crate::error::{DbError, DbResult};
use crate::gateway::StoreGateway;
use crate::models::{message_from_row, message_insert_params};
use crate::timestamps::now_millis;

struct MessageCacheState {
    by_user: HashMap<i64, Vec<Message>>,
    dirty_users: HashSet<i64>,
}

pub struct MessageCache {
    state: OrderedMutex<MessageCacheState>,
    gateway: Arc<StoreGateway>,
    next_temp_id: AtomicI64,
    pending: Mutex<Vec<JoinHandle<()>>>,
    shut_down: std::sync::atomic::AtomicBool,
}

impl MessageCache {
    #[must_use]
    pub fn new(gateway: Arc<StoreGateway>) -> Self {
        Self {
            state: OrderedMutex::new(
                LockLevel::Message,
                MessageCacheState {
                    by_user: HashMap::new(),
                    dirty_users: HashSet::new(),
                },
            ),
            gateway,
            next_temp_id: AtomicI64::new(-1),
            pending: Mutex::new(Vec::new()),
            shut_down: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn load_for_user(&self, state: &mut MessageCacheState, user_id: i64) -> DbResult<()> {
        if state.by_user.contains_key(&user_id) {
            return Ok(());
        }
        let rows = self.gateway.query(
            "SELECT id, recipient_id, created_at, is_read, message FROM messages \
             WHERE recipient_id = ?1 ORDER BY created_at ASC",
            &[Value::BigInt(user_id)],
        )?;
        let messages = rows.iter().map(message_from_row).collect::<DbResult<Vec<_>>>()?;
        state.by_user.insert(user_id, messages);
        Ok(())
    }

    /// Insert a pending message and spawn the background store write.
    /// Returns the negative temp id immediately.
    pub fn create_message(self: &Arc<Self>, user_id: i64, text: String) -> i64 {
        let temp_id = self.next_temp_id.fetch_sub(1, Ordering::SeqCst);
        let record = Message::pending(temp_id, user_id, now_millis(), text);

        {
            let mut state = self.state.lock();
            let _ = self.load_for_user(&mut state, user_id);
            state.by_user.entry(user_id).or_default().push(record.clone());
        }

        let this = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            this.resolve_pending_insert(user_id, temp_id, record);
        });
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(handle);

        temp_id
    }

    fn resolve_pending_insert(&self, user_id: i64, temp_id: i64, record: Message) {
        let result = self.gateway.exec(
            "INSERT INTO messages (recipient_id, created_at, is_read, message) VALUES (?1,?2,?3,?4)",
            &message_insert_params(&record),
        );

        let mut state = self.state.lock();
        let Some(messages) = state.by_user.get_mut(&user_id) else {
            return;
        };
        let Some(pos) = messages.iter().position(|m| m.id == temp_id) else {
            return;
        };

        match result {
            Ok(exec) => {
                let new_id = exec.last_inserted_id.unwrap_or(temp_id);
                let was_read = messages[pos].is_read;
                messages[pos].resolve(new_id);
                if was_read {
                    state.dirty_users.insert(user_id);
                }
            }
            Err(error) => {
                tracing::warn!(
                    user_id,
                    temp_id,
                    %error,
                    "dropping pending message after store insert failure"
                );
                messages.remove(pos);
            }
        }
    }

    /// Block until every in-flight background insert spawned so far has
    /// finished.
    pub fn wait_for_pending_writes(&self) {
        let handles = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Defensive copy of a user's full message list, load-through on miss.
    pub fn get_messages_for_user(&self, user_id: i64) -> DbResult<Vec<Message>> {
        let mut state = self.state.lock();
        self.load_for_user(&mut state, user_id)?;
        Ok(state.by_user.get(&user_id).cloned().unwrap_or_default())
    }

    pub fn get_unread_messages(&self, user_id: i64) -> DbResult<Vec<Message>> {
        Ok(self
            .get_messages_for_user(user_id)?
            .into_iter()
            .filter(|m| !m.is_read)
            .collect())
    }

    pub fn get_unread_message_count(&self, user_id: i64) -> DbResult<usize> {
        Ok(self.get_unread_messages(user_id)?.len())
    }

    /// Mark every message for `user_id` read; returns the count actually flipped.
    pub fn mark_all_messages_as_read(&self, user_id: i64) -> DbResult<usize> {
        let mut state = self.state.lock();
        self.load_for_user(&mut state, user_id)?;
        let mut count = 0;
        if let Some(messages) = state.by_user.get_mut(&user_id) {
            for message in messages.iter_mut() {
                if !message.is_read {
                    message.is_read = true;
                    count += 1;
                }
            }
        }
        if count > 0 {
            state.dirty_users.insert(user_id);
        }
        Ok(count)
    }

    /// Persist read-status changes for every dirty user; skips pending
    /// (negative-id) messages, which resolve on their own.
    pub fn flush_to_database(&self) -> DbResult<()> {
        let dirty: Vec<i64> = {
            let mut state = self.state.lock();
            state.dirty_users.drain().collect()
        };

        for user_id in dirty {
            let rows: Vec<(i64, bool)> = {
                let state = self.state.lock();
                state
                    .by_user
                    .get(&user_id)
                    .map(|msgs| msgs.iter().filter(|m| m.id >= 0).map(|m| (m.id, m.is_read)).collect())
                    .unwrap_or_default()
            };
            for (id, is_read) in rows {
                self.gateway.exec(
                    "UPDATE messages SET is_read = ?1 WHERE id = ?2",
                    &[Value::BigInt(i64::from(is_read)), Value::BigInt(id)],
                )?;
            }
        }
        Ok(())
    }

    /// Classify unread messages into battle-damage/battle-outcome/collection
    /// categories, aggregate each into a single summary message, mark every
    /// processed message read, and re-emit unrecognized ones as still-unread.
    /// Idempotent: a second call with nothing new unread returns an empty
    /// summary — a digest message from a prior run is recognized by
    /// `SUMMARY_TAG` and skipped rather than reclassified as a fresh battle
    /// report, so it contributes nothing but still gets marked read.
    pub fn summarize_messages(self: &Arc<Self>, user_id: i64) -> DbResult<String> {
        let unread = self.get_unread_messages(user_id)?;
        if unread.is_empty() {
            return Ok(String::new());
        }

        let mut damage_total: i64 = 0;
        let mut damage_count = 0usize;
        let mut outcomes = Vec::new();
        let mut collected = 0usize;
        let mut unknown = Vec::new();

        for message in &unread {
            if message.text.starts_with(SUMMARY_TAG) {
                continue;
            }
            if let Some(amount) = parse_battle_damage(&message.text) {
                damage_total += amount;
                damage_count += 1;
            } else if let Some(outcome) = parse_battle_outcome(&message.text) {
                outcomes.push(outcome);
            } else if is_collection_event(&message.text) {
                collected += 1;
            } else {
                unknown.push(message.text.clone());
            }
        }

        let mut summary = String::new();
        if damage_count > 0 {
            summary.push_str(&format!(
                "{damage_count} battle report(s), {damage_total} total damage. "
            ));
        }
        if !outcomes.is_empty() {
            let wins = outcomes.iter().filter(|o| **o).count();
            let losses = outcomes.len() - wins;
            summary.push_str(&format!("{wins} win(s), {losses} loss(es). "));
        }
        if collected > 0 {
            summary.push_str(&format!("{collected} collection event(s). "));
        }

        self.mark_all_messages_as_read(user_id)?;

        for text in unknown {
            self.create_message(user_id, text);
        }

        let summary = summary.trim().to_string();
        if !summary.is_empty() {
            self.create_message(user_id, format!("{SUMMARY_TAG}{summary}"));
        }
        Ok(summary)
    }

    pub fn delete_old_read_messages(&self, user_id: i64, older_than_days: i64) -> DbResult<usize> {
        let cutoff = now_millis() - older_than_days * 86_400_000;
        let mut state = self.state.lock();
        self.load_for_user(&mut state, user_id)?;
        let mut removed_ids = Vec::new();
        if let Some(messages) = state.by_user.get_mut(&user_id) {
            messages.retain(|m| {
                let keep = !(m.is_read && m.created_at_ms < cutoff && m.id >= 0);
                if !keep {
                    removed_ids.push(m.id);
                }
                keep
            });
        }
        drop(state);

        for id in &removed_ids {
            self.gateway.exec("DELETE FROM messages WHERE id = ?1", &[Value::BigInt(*id)])?;
        }
        Ok(removed_ids.len())
    }

    pub fn shutdown(&self) -> DbResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Err(DbError::Internal("MessageCache already shut down".into()));
        }
        self.wait_for_pending_writes();
        self.flush_to_database()
    }
}

/// Marks a message as a digest produced by `summarize_messages` itself, so a
/// later pass recognizes and skips it instead of parsing its own wording
/// ("damage", "won", ...) back into a fresh battle report.
const SUMMARY_TAG: &str = "Summary: ";

fn parse_battle_damage(text: &str) -> Option<i64> {
    let lower = text.to_ascii_lowercase();
    if !lower.contains("damage") {
        return None;
    }
    text.split_whitespace()
        .find_map(|tok| tok.trim_matches(|c: char| !c.is_ascii_digit()).parse::<i64>().ok())
}

fn parse_battle_outcome(text: &str) -> Option<bool> {
    let lower = text.to_ascii_lowercase();
    if lower.contains("you won") || lower.contains("victory") {
        Some(true)
    } else if lower.contains("you lost") || lower.contains("defeat") {
        Some(false)
    } else {
        None
    }
}

fn is_collection_event(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("collected") || lower.contains("salvaged") || lower.contains("picked up")
}
