//! Player Snapshots
//!
//! Read-only view of a player that requirements are evaluated against.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::instance::{QuestInstance, QuestStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_id: String,
    pub level: i32,
    /// item id -> count
    #[serde(default)]
    pub held_items: HashMap<String, u32>,
    /// quest id -> times finished
    #[serde(default)]
    pub finished_quests: HashMap<String, u32>,
    /// quest id -> current step, Active quests only
    #[serde(default)]
    pub active_quests: HashMap<String, i32>,
}

impl PlayerSnapshot {
    pub fn new(player_id: &str, level: i32) -> Self {
        Self {
            player_id: player_id.to_string(),
            level,
            ..Default::default()
        }
    }

    pub fn with_item(mut self, item_id: &str, count: u32) -> Self {
        self.held_items.insert(item_id.to_string(), count);
        self
    }

    pub fn with_finished(mut self, quest_id: &str, times: u32) -> Self {
        self.finished_quests.insert(quest_id.to_string(), times);
        self
    }

    pub fn item_count(&self, item_id: &str) -> u32 {
        self.held_items.get(item_id).copied().unwrap_or(0)
    }

    pub fn finished_count(&self, quest_id: &str) -> u32 {
        self.finished_quests.get(quest_id).copied().unwrap_or(0)
    }

    pub fn active_step(&self, quest_id: &str) -> Option<i32> {
        self.active_quests.get(quest_id).copied()
    }

    pub fn is_doing(&self, quest_id: &str) -> bool {
        self.active_quests.contains_key(quest_id)
    }

    /// Overlay stored quest records. The store is authoritative for which
    /// quests are active; finished counts take the larger of both sources.
    pub fn apply_history(&mut self, records: &[QuestInstance]) {
        self.active_quests.clear();
        for record in records {
            if record.status() == QuestStatus::Active {
                self.active_quests
                    .insert(record.quest_id().to_string(), record.step());
            }
            if record.completions() > 0 {
                let count = self
                    .finished_quests
                    .entry(record.quest_id().to_string())
                    .or_insert(0);
                *count = (*count).max(record.completions());
            }
        }
    }

    /// Track an item handed out earlier in the same rule
    pub fn note_grant(&mut self, item_id: &str, count: u32) {
        *self.held_items.entry(item_id.to_string()).or_insert(0) += count;
    }

    /// Track an item taken earlier in the same rule
    pub fn note_take(&mut self, item_id: &str, count: u32) {
        if let Some(held) = self.held_items.get_mut(item_id) {
            *held = held.saturating_sub(count);
            if *held == 0 {
                self.held_items.remove(item_id);
            }
        }
    }

    pub(crate) fn note_instance(&mut self, instance: &QuestInstance) {
        let quest_id = instance.quest_id().to_string();
        if instance.is_active() {
            self.active_quests.insert(quest_id.clone(), instance.step());
        } else {
            self.active_quests.remove(&quest_id);
        }
        if instance.completions() > 0 {
            let count = self.finished_quests.entry(quest_id).or_insert(0);
            *count = (*count).max(instance.completions());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::definition::QuestDefinition;
    use chrono::Utc;

    #[test]
    fn test_apply_history_overrides_quest_fields() {
        let def = QuestDefinition::from_toml("[quest]\nid = \"q\"\nname = \"Q\"").unwrap();
        let mut done = QuestInstance::start(&def, "p1", None, Utc::now());
        done.finish(&def.rewards, &[], Utc::now()).unwrap();

        let mut snapshot = PlayerSnapshot::new("p1", 3).with_finished("q", 0);
        snapshot.active_quests.insert("stale".to_string(), 2);
        snapshot.apply_history(&[done]);

        assert_eq!(snapshot.finished_count("q"), 1);
        assert!(!snapshot.is_doing("stale"));
        assert!(!snapshot.is_doing("q"));
    }

    #[test]
    fn test_item_notes() {
        let mut snapshot = PlayerSnapshot::new("p1", 1).with_item("carcass", 1);
        snapshot.note_grant("carcass", 2);
        assert_eq!(snapshot.item_count("carcass"), 3);
        snapshot.note_take("carcass", 5);
        assert_eq!(snapshot.item_count("carcass"), 0);
        assert!(!snapshot.held_items.contains_key("carcass"));
    }
}
