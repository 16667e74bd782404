//! In-memory instance store

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::InstanceStore;
use crate::error::{QuestError, Result};
use crate::quest::{InstanceKey, QuestInstance};

/// Process-local store, used by tests and the replay binary's dry runs
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<InstanceKey, QuestInstance>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn conflict(instance: &QuestInstance) -> QuestError {
    QuestError::PersistenceConflict {
        player_id: instance.owner_id().to_string(),
        quest_id: instance.quest_id().to_string(),
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn load(&self, player_id: &str, quest_id: &str) -> Result<Option<QuestInstance>> {
        let key = InstanceKey::new(player_id, quest_id);
        Ok(self.records.get(&key).map(|r| r.value().clone()))
    }

    async fn load_player(&self, player_id: &str) -> Result<Vec<QuestInstance>> {
        let mut records: Vec<QuestInstance> = self
            .records
            .iter()
            .filter(|r| r.key().player_id == player_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.quest_id().cmp(b.quest_id()));
        Ok(records)
    }

    async fn save(&self, instance: &QuestInstance) -> Result<u64> {
        let expected = instance.version();
        match self.records.entry(instance.key()) {
            Entry::Vacant(slot) => {
                if expected != 0 {
                    return Err(conflict(instance));
                }
                let mut stored = instance.clone();
                stored.set_version(1);
                slot.insert(stored);
                Ok(1)
            }
            Entry::Occupied(mut slot) => {
                if slot.get().version() != expected {
                    return Err(conflict(instance));
                }
                let mut stored = instance.clone();
                stored.set_version(expected + 1);
                slot.insert(stored);
                Ok(expected + 1)
            }
        }
    }

    async fn delete(&self, player_id: &str, quest_id: &str) -> Result<bool> {
        let key = InstanceKey::new(player_id, quest_id);
        Ok(self.records.remove(&key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::QuestDefinition;
    use chrono::Utc;

    #[tokio::test]
    async fn test_versioned_save() {
        let store = MemoryStore::new();
        let def = QuestDefinition::from_toml("[quest]\nid = \"q\"\nname = \"Q\"").unwrap();
        let mut instance = QuestInstance::start(&def, "p1", None, Utc::now());

        let version = store.save(&instance).await.unwrap();
        assert_eq!(version, 1);

        // stale writer still holds version 0
        assert!(matches!(
            store.save(&instance).await,
            Err(QuestError::PersistenceConflict { .. })
        ));

        instance.set_version(version);
        assert_eq!(store.save(&instance).await.unwrap(), 2);

        let loaded = store.load("p1", "q").await.unwrap().unwrap();
        assert_eq!(loaded.version(), 2);
        assert_eq!(store.load_player("p1").await.unwrap().len(), 1);

        assert!(store.delete("p1", "q").await.unwrap());
        assert!(store.load("p1", "q").await.unwrap().is_none());
    }
}
