//! Commands the engine hands to external collaborators.
//!
//! The rule engine never talks to inventory, rewards or dialogue directly;
//! it produces these values and the driver routes them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// NPC speech addressed to the player
    Say {
        player_id: String,
        npc_id: Option<String>,
        text: String,
    },
    /// System message to the player
    Message { player_id: String, text: String },
    /// Show the accept/decline window for a pending offer
    OfferQuest {
        player_id: String,
        quest_id: String,
        offer_id: String,
        text: Option<String>,
    },
    GrantItem {
        player_id: String,
        item_id: String,
        count: u32,
    },
    RemoveItem {
        player_id: String,
        item_id: String,
        count: u32,
    },
    ReplaceItem {
        player_id: String,
        from_item: String,
        to_item: String,
    },
    GrantXp { player_id: String, amount: i64 },
    GrantCurrency { player_id: String, amount: i64 },
}

impl Command {
    pub fn player_id(&self) -> &str {
        match self {
            Command::Say { player_id, .. } => player_id,
            Command::Message { player_id, .. } => player_id,
            Command::OfferQuest { player_id, .. } => player_id,
            Command::GrantItem { player_id, .. } => player_id,
            Command::RemoveItem { player_id, .. } => player_id,
            Command::ReplaceItem { player_id, .. } => player_id,
            Command::GrantXp { player_id, .. } => player_id,
            Command::GrantCurrency { player_id, .. } => player_id,
        }
    }
}
