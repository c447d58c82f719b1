//! Core types for the space-combat hierarchical cache layer.
//!
//! This crate provides the pieces shared by every cache manager:
//! - the numbered lock hierarchy and its contention instrumentation (`lock_order`)
//! - domain models (`User`, `SpaceObject`, `World`, `Message`, `Battle`)
//! - environment-driven configuration (`config`)
//! - the typed error hierarchy (`error`)
//! - an in-memory store fixture for tests (`test_harness`)

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod lock_order;
pub mod models;
pub mod test_harness;

pub use config::Config;
pub use error::{Error, Result};
pub use lock_order::{
    LockContentionEntry, LockLevel, OrderedMutex, OrderedRwLock, held_locks, lock_contention_reset,
    lock_contention_snapshot,
};
pub use models::{
    Battle, BuildQueueItem, CommanderData, InventoryCell, InventoryGrid, ItemType, Message,
    SpaceObject, SpaceObjectKind, StatBonus, TechCounts, User, World, normalize_coordinate,
};
pub use test_harness::InMemoryStore;
