//! External collaborators
//!
//! The engine never touches inventory, rewards or dialogue itself. It reads
//! players through [`SnapshotProvider`] and hands out [`Command`]s, which a
//! [`CommandRouter`] forwards to the collaborators that own them.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::Result;
use crate::quest::PlayerSnapshot;

pub use memory::InMemoryWorld;

/// Read access to the player state requirements look at
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn player_snapshot(&self, player_id: &str) -> Result<PlayerSnapshot>;
}

#[async_trait]
pub trait Inventory: Send + Sync {
    async fn grant_item(&self, player_id: &str, item_id: &str, count: u32) -> Result<()>;
    async fn remove_item(&self, player_id: &str, item_id: &str, count: u32) -> Result<()>;
    async fn replace_item(&self, player_id: &str, from_item: &str, to_item: &str) -> Result<()>;
}

#[async_trait]
pub trait Rewards: Send + Sync {
    async fn grant_xp(&self, player_id: &str, amount: i64) -> Result<()>;
    async fn grant_currency(&self, player_id: &str, amount: i64) -> Result<()>;
}

#[async_trait]
pub trait Dialogue: Send + Sync {
    async fn say(&self, player_id: &str, npc_id: Option<&str>, text: &str) -> Result<()>;
    async fn message(&self, player_id: &str, text: &str) -> Result<()>;
    async fn offer_quest(
        &self,
        player_id: &str,
        quest_id: &str,
        offer_id: &str,
        text: Option<&str>,
    ) -> Result<()>;
}

/// Delivers engine commands to the collaborator owning each one
#[derive(Clone)]
pub struct CommandRouter {
    inventory: Arc<dyn Inventory>,
    rewards: Arc<dyn Rewards>,
    dialogue: Arc<dyn Dialogue>,
}

impl CommandRouter {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        rewards: Arc<dyn Rewards>,
        dialogue: Arc<dyn Dialogue>,
    ) -> Self {
        Self {
            inventory,
            rewards,
            dialogue,
        }
    }

    pub async fn route(&self, command: &Command) -> Result<()> {
        match command {
            Command::Say {
                player_id,
                npc_id,
                text,
            } => self.dialogue.say(player_id, npc_id.as_deref(), text).await,
            Command::Message { player_id, text } => self.dialogue.message(player_id, text).await,
            Command::OfferQuest {
                player_id,
                quest_id,
                offer_id,
                text,
            } => {
                self.dialogue
                    .offer_quest(player_id, quest_id, offer_id, text.as_deref())
                    .await
            }
            Command::GrantItem {
                player_id,
                item_id,
                count,
            } => self.inventory.grant_item(player_id, item_id, *count).await,
            Command::RemoveItem {
                player_id,
                item_id,
                count,
            } => self.inventory.remove_item(player_id, item_id, *count).await,
            Command::ReplaceItem {
                player_id,
                from_item,
                to_item,
            } => {
                self.inventory
                    .replace_item(player_id, from_item, to_item)
                    .await
            }
            Command::GrantXp { player_id, amount } => self.rewards.grant_xp(player_id, *amount).await,
            Command::GrantCurrency { player_id, amount } => {
                self.rewards.grant_currency(player_id, *amount).await
            }
        }
    }

    /// Drain the engine's command outbox until every sender is gone.
    /// A failing command is logged and the next one still runs.
    pub fn spawn(self, mut rx: mpsc::UnboundedReceiver<Command>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                debug!("Routing {:?}", command);
                if let Err(e) = self.route(&command).await {
                    warn!("Command for player {} failed: {}", command.player_id(), e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_router_drains_outbox() {
        let world = Arc::new(InMemoryWorld::new(1));
        let router = CommandRouter::new(world.clone(), world.clone(), world.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = router.spawn(rx);
        tx.send(Command::GrantItem {
            player_id: "p1".to_string(),
            item_id: "carcass".to_string(),
            count: 2,
        })
        .unwrap();
        tx.send(Command::RemoveItem {
            player_id: "p1".to_string(),
            item_id: "carcass".to_string(),
            count: 1,
        })
        .unwrap();
        tx.send(Command::GrantXp { player_id: "p1".to_string(), amount: 40 }).unwrap();
        drop(tx);
        handle.await.unwrap();

        let snapshot = world.player_snapshot("p1").await.unwrap();
        assert_eq!(snapshot.item_count("carcass"), 1);
        assert_eq!(world.xp("p1"), 40);
        assert_eq!(world.applied().len(), 3);
    }
}
