//! In-memory world
//!
//! Implements every collaborator over plain maps. Used by the replay binary
//! and by tests that want to observe what the engine asked for.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use super::{Dialogue, Inventory, Rewards, SnapshotProvider};
use crate::command::Command;
use crate::error::Result;
use crate::quest::PlayerSnapshot;

#[derive(Debug, Clone, Default)]
struct PlayerRecord {
    level: i32,
    items: HashMap<String, u32>,
    xp: i64,
    gold: i64,
}

pub struct InMemoryWorld {
    players: DashMap<String, PlayerRecord>,
    default_level: i32,
    applied: Mutex<Vec<Command>>,
}

impl InMemoryWorld {
    pub fn new(default_level: i32) -> Self {
        Self {
            players: DashMap::new(),
            default_level,
            applied: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, player_id: &str) -> dashmap::mapref::one::RefMut<'_, String, PlayerRecord> {
        self.players
            .entry(player_id.to_string())
            .or_insert_with(|| PlayerRecord {
                level: self.default_level,
                ..Default::default()
            })
    }

    fn log(&self, command: Command) {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command);
    }

    pub fn set_level(&self, player_id: &str, level: i32) {
        self.record(player_id).level = level;
    }

    /// Put items in a player's bags without going through the log
    pub fn stock(&self, player_id: &str, item_id: &str, count: u32) {
        *self.record(player_id).items.entry(item_id.to_string()).or_insert(0) += count;
    }

    pub fn item_count(&self, player_id: &str, item_id: &str) -> u32 {
        self.players
            .get(player_id)
            .and_then(|p| p.items.get(item_id).copied())
            .unwrap_or(0)
    }

    pub fn xp(&self, player_id: &str) -> i64 {
        self.players.get(player_id).map(|p| p.xp).unwrap_or(0)
    }

    pub fn gold(&self, player_id: &str) -> i64 {
        self.players.get(player_id).map(|p| p.gold).unwrap_or(0)
    }

    /// Every command applied so far, in order
    pub fn applied(&self) -> Vec<Command> {
        self.applied.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SnapshotProvider for InMemoryWorld {
    async fn player_snapshot(&self, player_id: &str) -> Result<PlayerSnapshot> {
        let record = self.record(player_id);
        Ok(PlayerSnapshot {
            player_id: player_id.to_string(),
            level: record.level,
            held_items: record.items.clone(),
            ..Default::default()
        })
    }
}

#[async_trait]
impl Inventory for InMemoryWorld {
    async fn grant_item(&self, player_id: &str, item_id: &str, count: u32) -> Result<()> {
        *self.record(player_id).items.entry(item_id.to_string()).or_insert(0) += count;
        self.log(Command::GrantItem {
            player_id: player_id.to_string(),
            item_id: item_id.to_string(),
            count,
        });
        Ok(())
    }

    async fn remove_item(&self, player_id: &str, item_id: &str, count: u32) -> Result<()> {
        {
            let mut record = self.record(player_id);
            if let Some(held) = record.items.get_mut(item_id) {
                *held = held.saturating_sub(count);
            }
            record.items.retain(|_, n| *n > 0);
        }
        self.log(Command::RemoveItem {
            player_id: player_id.to_string(),
            item_id: item_id.to_string(),
            count,
        });
        Ok(())
    }

    async fn replace_item(&self, player_id: &str, from_item: &str, to_item: &str) -> Result<()> {
        {
            let mut record = self.record(player_id);
            if let Some(held) = record.items.get_mut(from_item) {
                *held = held.saturating_sub(1);
            }
            record.items.retain(|_, n| *n > 0);
            *record.items.entry(to_item.to_string()).or_insert(0) += 1;
        }
        self.log(Command::ReplaceItem {
            player_id: player_id.to_string(),
            from_item: from_item.to_string(),
            to_item: to_item.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl Rewards for InMemoryWorld {
    async fn grant_xp(&self, player_id: &str, amount: i64) -> Result<()> {
        self.record(player_id).xp += amount;
        self.log(Command::GrantXp {
            player_id: player_id.to_string(),
            amount,
        });
        Ok(())
    }

    async fn grant_currency(&self, player_id: &str, amount: i64) -> Result<()> {
        self.record(player_id).gold += amount;
        self.log(Command::GrantCurrency {
            player_id: player_id.to_string(),
            amount,
        });
        Ok(())
    }
}

#[async_trait]
impl Dialogue for InMemoryWorld {
    async fn say(&self, player_id: &str, npc_id: Option<&str>, text: &str) -> Result<()> {
        info!("[{}] -> {}: {}", npc_id.unwrap_or("?"), player_id, text);
        self.log(Command::Say {
            player_id: player_id.to_string(),
            npc_id: npc_id.map(str::to_string),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn message(&self, player_id: &str, text: &str) -> Result<()> {
        info!("[system] -> {}: {}", player_id, text);
        self.log(Command::Message {
            player_id: player_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn offer_quest(
        &self,
        player_id: &str,
        quest_id: &str,
        offer_id: &str,
        text: Option<&str>,
    ) -> Result<()> {
        info!("[offer {}] -> {}: {}", offer_id, player_id, text.unwrap_or(quest_id));
        self.log(Command::OfferQuest {
            player_id: player_id.to_string(),
            quest_id: quest_id.to_string(),
            offer_id: offer_id.to_string(),
            text: text.map(str::to_string),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_reflects_inventory() {
        let world = InMemoryWorld::new(3);
        world.stock("p1", "letter", 1);
        world.replace_item("p1", "letter", "sealed_letter").await.unwrap();

        let snapshot = world.player_snapshot("p1").await.unwrap();
        assert_eq!(snapshot.level, 3);
        assert_eq!(snapshot.item_count("letter"), 0);
        assert_eq!(snapshot.item_count("sealed_letter"), 1);

        world.set_level("p1", 7);
        assert_eq!(world.player_snapshot("p1").await.unwrap().level, 7);
    }
}
