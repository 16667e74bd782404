//! Quest Event Types
//!
//! World events flow into the engine and drive rule dispatch; quest events
//! flow out of it once a lifecycle change has been persisted.

use serde::{Deserialize, Serialize};

/// Kinds of world events a behavior rule can be triggered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Player right-clicks an NPC
    Interact,
    /// Player whispers a keyword to an NPC
    Whisper,
    /// Player kills an enemy
    EnemyKilled,
    /// An enemy died, no matter who killed it
    EnemyDying,
    /// Something killed the player
    PlayerKilled,
    /// Player hands an item to an NPC
    GiveItem,
    /// Player uses an item
    ItemUsed,
    EnterArea,
    LeaveArea,
    /// Player answered an offer with yes
    AcceptQuest,
    /// Player answered an offer with no
    DeclineQuest,
    /// Player confirmed abandoning a quest
    AbortQuest,
    /// Player backed out of abandoning a quest
    ContinueQuest,
    /// A quest timer ran out
    Timer,
    /// Player entered the world
    PlayerEnter,
    /// Player left the world
    PlayerLeave,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Interact => "interact",
            EventKind::Whisper => "whisper",
            EventKind::EnemyKilled => "enemy_killed",
            EventKind::EnemyDying => "enemy_dying",
            EventKind::PlayerKilled => "player_killed",
            EventKind::GiveItem => "give_item",
            EventKind::ItemUsed => "item_used",
            EventKind::EnterArea => "enter_area",
            EventKind::LeaveArea => "leave_area",
            EventKind::AcceptQuest => "accept_quest",
            EventKind::DeclineQuest => "decline_quest",
            EventKind::AbortQuest => "abort_quest",
            EventKind::ContinueQuest => "continue_quest",
            EventKind::Timer => "timer",
            EventKind::PlayerEnter => "player_enter",
            EventKind::PlayerLeave => "player_leave",
        }
    }
}

/// Something that happened in the world, addressed to one player.
///
/// `target_id` names the object the player acted on (NPC, enemy, area),
/// `payload` carries the free-form part (keyword, item id, quest id, timer
/// id) and `source_id` the initiator when it is not the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldEvent {
    pub kind: EventKind,
    pub player_id: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
}

impl WorldEvent {
    pub fn new(kind: EventKind, player_id: &str) -> Self {
        Self {
            kind,
            player_id: player_id.to_string(),
            source_id: None,
            target_id: None,
            payload: None,
        }
    }

    pub fn with_source(mut self, source_id: &str) -> Self {
        self.source_id = Some(source_id.to_string());
        self
    }

    pub fn with_target(mut self, target_id: &str) -> Self {
        self.target_id = Some(target_id.to_string());
        self
    }

    pub fn with_payload(mut self, payload: &str) -> Self {
        self.payload = Some(payload.to_string());
        self
    }

    pub fn interact(player_id: &str, npc_id: &str) -> Self {
        Self::new(EventKind::Interact, player_id).with_target(npc_id)
    }

    pub fn whisper(player_id: &str, npc_id: &str, keyword: &str) -> Self {
        Self::new(EventKind::Whisper, player_id)
            .with_target(npc_id)
            .with_payload(keyword)
    }

    pub fn enemy_killed(player_id: &str, enemy: &str) -> Self {
        Self::new(EventKind::EnemyKilled, player_id).with_target(enemy)
    }

    pub fn give_item(player_id: &str, npc_id: &str, item_id: &str) -> Self {
        Self::new(EventKind::GiveItem, player_id)
            .with_target(npc_id)
            .with_payload(item_id)
    }

    pub fn item_used(player_id: &str, item_id: &str) -> Self {
        Self::new(EventKind::ItemUsed, player_id).with_payload(item_id)
    }

    pub fn enter_area(player_id: &str, area_id: &str) -> Self {
        Self::new(EventKind::EnterArea, player_id).with_target(area_id)
    }

    pub fn accept_quest(player_id: &str, quest_id: &str) -> Self {
        Self::new(EventKind::AcceptQuest, player_id).with_payload(quest_id)
    }

    pub fn decline_quest(player_id: &str, quest_id: &str) -> Self {
        Self::new(EventKind::DeclineQuest, player_id).with_payload(quest_id)
    }

    pub fn timer(player_id: &str, timer_id: &str) -> Self {
        Self::new(EventKind::Timer, player_id).with_payload(timer_id)
    }
}

/// Lifecycle notifications published after a change is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestEvent {
    Offered {
        player_id: String,
        quest_id: String,
        offer_id: String,
    },
    Declined {
        player_id: String,
        quest_id: String,
    },
    OfferExpired {
        player_id: String,
        quest_id: String,
        offer_id: String,
    },
    Given {
        player_id: String,
        quest_id: String,
    },
    StepChanged {
        player_id: String,
        quest_id: String,
        from: i32,
        to: i32,
    },
    GoalAdvanced {
        player_id: String,
        quest_id: String,
        goal_id: String,
        current: u32,
        target: u32,
        achieved: bool,
    },
    Finished {
        player_id: String,
        quest_id: String,
    },
    Aborted {
        player_id: String,
        quest_id: String,
    },
}

impl QuestEvent {
    /// Get the player ID associated with this event
    pub fn player_id(&self) -> &str {
        match self {
            QuestEvent::Offered { player_id, .. } => player_id,
            QuestEvent::Declined { player_id, .. } => player_id,
            QuestEvent::OfferExpired { player_id, .. } => player_id,
            QuestEvent::Given { player_id, .. } => player_id,
            QuestEvent::StepChanged { player_id, .. } => player_id,
            QuestEvent::GoalAdvanced { player_id, .. } => player_id,
            QuestEvent::Finished { player_id, .. } => player_id,
            QuestEvent::Aborted { player_id, .. } => player_id,
        }
    }

    pub fn quest_id(&self) -> &str {
        match self {
            QuestEvent::Offered { quest_id, .. } => quest_id,
            QuestEvent::Declined { quest_id, .. } => quest_id,
            QuestEvent::OfferExpired { quest_id, .. } => quest_id,
            QuestEvent::Given { quest_id, .. } => quest_id,
            QuestEvent::StepChanged { quest_id, .. } => quest_id,
            QuestEvent::GoalAdvanced { quest_id, .. } => quest_id,
            QuestEvent::Finished { quest_id, .. } => quest_id,
            QuestEvent::Aborted { quest_id, .. } => quest_id,
        }
    }

    /// Get event type as string (for logging/debugging)
    pub fn event_type(&self) -> &'static str {
        match self {
            QuestEvent::Offered { .. } => "quest_offered",
            QuestEvent::Declined { .. } => "quest_declined",
            QuestEvent::OfferExpired { .. } => "offer_expired",
            QuestEvent::Given { .. } => "quest_given",
            QuestEvent::StepChanged { .. } => "quest_step_changed",
            QuestEvent::GoalAdvanced { .. } => "goal_advanced",
            QuestEvent::Finished { .. } => "quest_finished",
            QuestEvent::Aborted { .. } => "quest_aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_event_from_json() {
        let event: WorldEvent = serde_json::from_str(
            r#"{"kind":"whisper","player_id":"p1","target_id":"gerol","payload":"boar"}"#,
        )
        .unwrap();
        assert_eq!(event, WorldEvent::whisper("p1", "gerol", "boar"));
    }

    #[test]
    fn test_quest_event_accessors() {
        let event = QuestEvent::StepChanged {
            player_id: "p1".to_string(),
            quest_id: "boar_stew".to_string(),
            from: 1,
            to: 2,
        };
        assert_eq!(event.player_id(), "p1");
        assert_eq!(event.quest_id(), "boar_stew");
        assert_eq!(event.event_type(), "quest_step_changed");
    }
}
