//! Error types for the quest engine.

use thiserror::Error;

/// Every failure a quest engine operation can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuestError {
    /// Level range, prerequisite or repeat-count gate failed.
    #[error("player does not qualify for quest '{quest_id}': {reason}")]
    NotQualified { quest_id: String, reason: String },

    /// The player already has an active instance of this quest.
    #[error("quest '{quest_id}' is already active for player '{player_id}'")]
    AlreadyActive { player_id: String, quest_id: String },

    /// Mutation attempted on a finished or aborted instance.
    #[error("quest '{quest_id}' is no longer in progress for player '{player_id}'")]
    InstanceTerminal { player_id: String, quest_id: String },

    /// The offer was never made, was already answered, or timed out.
    #[error("offer {0} has expired")]
    OfferExpired(String),

    #[error("unknown quest type '{0}'")]
    UnknownQuestType(String),

    /// Optimistic concurrency check failed while saving an instance.
    #[error("concurrent update of quest '{quest_id}' for player '{player_id}'")]
    PersistenceConflict { player_id: String, quest_id: String },

    /// The player has no instance of this quest.
    #[error("player '{player_id}' has no instance of quest '{quest_id}'")]
    NoInstance { player_id: String, quest_id: String },

    /// Rewards requested before every goal was achieved.
    #[error("quest '{quest_id}' still has unfinished goals")]
    GoalsIncomplete { quest_id: String },

    #[error("invalid reward choice: {0}")]
    InvalidRewardChoice(String),

    /// A step change that would move the quest backwards.
    #[error("quest '{quest_id}' cannot move from step {from} to step {to}")]
    InvalidStep { quest_id: String, from: i32, to: i32 },

    /// Malformed quest content, rejected at load time.
    #[error("content error: {0}")]
    Content(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl QuestError {
    /// Errors the caller can recover from by showing the player a message.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            QuestError::NotQualified { .. }
                | QuestError::AlreadyActive { .. }
                | QuestError::OfferExpired(_)
                | QuestError::GoalsIncomplete { .. }
                | QuestError::InvalidRewardChoice(_)
        )
    }
}

impl From<std::io::Error> for QuestError {
    fn from(e: std::io::Error) -> Self {
        QuestError::Io(e.to_string())
    }
}

impl From<sqlx::Error> for QuestError {
    fn from(e: sqlx::Error) -> Self {
        QuestError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for QuestError {
    fn from(e: serde_json::Error) -> Self {
        QuestError::Storage(format!("record serialization failed: {}", e))
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, QuestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_facing_errors_are_recoverable() {
        let not_qualified = QuestError::NotQualified {
            quest_id: "q".to_string(),
            reason: "level too low".to_string(),
        };
        assert!(not_qualified.is_recoverable());
        assert!(QuestError::OfferExpired("o".to_string()).is_recoverable());
        assert!(QuestError::GoalsIncomplete { quest_id: "q".to_string() }.is_recoverable());

        let conflict = QuestError::PersistenceConflict {
            player_id: "p1".to_string(),
            quest_id: "q".to_string(),
        };
        assert!(!conflict.is_recoverable());
        assert!(!QuestError::Storage("disk full".to_string()).is_recoverable());
        assert!(!QuestError::Content("bad rule".to_string()).is_recoverable());
    }
}
