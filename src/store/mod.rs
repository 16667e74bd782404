//! Instance persistence
//!
//! The engine reads and writes quest instances through [`InstanceStore`].
//! Every save carries the version the caller loaded; a store rejects the
//! write with `PersistenceConflict` if the record moved on in between.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::quest::QuestInstance;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// The player's record of a quest, in any status
    async fn load(&self, player_id: &str, quest_id: &str) -> Result<Option<QuestInstance>>;

    /// Every record of a player, ordered by quest id
    async fn load_player(&self, player_id: &str) -> Result<Vec<QuestInstance>>;

    /// Write the instance if the stored version still equals
    /// `instance.version()` (0 = must not exist yet). Returns the new version.
    async fn save(&self, instance: &QuestInstance) -> Result<u64>;

    /// Remove a record; returns whether one existed
    async fn delete(&self, player_id: &str, quest_id: &str) -> Result<bool>;
}
