//! Quest Qualification
//!
//! The single check deciding whether a quest may be given to a player.
//! Offers, accepts, `give_quest` actions and `quest_givable` requirements
//! all go through [`qualify`].

use super::definition::QuestDefinition;
use super::snapshot::PlayerSnapshot;
use crate::error::{QuestError, Result};

/// Returns how many more times the player could finish the quest after
/// this one, or why they cannot take it.
pub fn qualify(definition: &QuestDefinition, player: &PlayerSnapshot) -> Result<u32> {
    let not_qualified = |reason: String| QuestError::NotQualified {
        quest_id: definition.id.clone(),
        reason,
    };

    if player.is_doing(&definition.id) {
        return Err(QuestError::AlreadyActive {
            player_id: player.player_id.clone(),
            quest_id: definition.id.clone(),
        });
    }

    if player.level < definition.min_level {
        return Err(not_qualified(format!(
            "level {} below minimum {}",
            player.level, definition.min_level
        )));
    }
    if player.level > definition.max_level {
        return Err(not_qualified(format!(
            "level {} above maximum {}",
            player.level, definition.max_level
        )));
    }

    if let Some(missing) = definition
        .prerequisites
        .iter()
        .find(|q| player.finished_count(q) == 0)
    {
        return Err(not_qualified(format!("quest '{}' not finished", missing)));
    }

    let finished = player.finished_count(&definition.id);
    if finished >= definition.max_count {
        return Err(not_qualified(format!(
            "already finished {} of {} time(s)",
            finished, definition.max_count
        )));
    }

    Ok(definition.max_count - finished - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(extra: &str) -> QuestDefinition {
        QuestDefinition::from_toml(&format!(
            "[quest]\nid = \"q\"\nname = \"Q\"\nmin_level = 3\nmax_level = 10\n{}",
            extra
        ))
        .unwrap()
    }

    #[test]
    fn test_level_range() {
        let def = definition("");
        let err = qualify(&def, &PlayerSnapshot::new("p1", 2)).unwrap_err();
        assert!(matches!(err, QuestError::NotQualified { .. }));
        assert!(qualify(&def, &PlayerSnapshot::new("p1", 3)).is_ok());
        assert!(qualify(&def, &PlayerSnapshot::new("p1", 11)).is_err());
    }

    #[test]
    fn test_prerequisites_and_repeat_count() {
        let def = definition("max_count = 2\nprerequisites = [\"intro\"]");
        let player = PlayerSnapshot::new("p1", 5);
        assert!(qualify(&def, &player).is_err());

        let player = player.with_finished("intro", 1);
        assert_eq!(qualify(&def, &player).unwrap(), 1);

        let player = player.with_finished("q", 1);
        assert_eq!(qualify(&def, &player).unwrap(), 0);

        let player = player.with_finished("q", 2);
        assert!(qualify(&def, &player).is_err());
    }

    #[test]
    fn test_active_quest_is_not_givable() {
        let def = definition("");
        let mut player = PlayerSnapshot::new("p1", 5);
        player.active_quests.insert("q".to_string(), 1);
        assert!(matches!(
            qualify(&def, &player),
            Err(QuestError::AlreadyActive { .. })
        ));
    }
}
