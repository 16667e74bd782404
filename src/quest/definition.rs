//! Quest Definition Structures
//!
//! Raw structures are deserialized from TOML quest files, then resolved into
//! an immutable [`QuestDefinition`] shared by every instance of the quest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::goal::GoalTemplate;
use super::rule::{BehaviorRule, RuleTable};
use crate::error::{QuestError, Result};

/// Most optional reward items a quest may list
pub const MAX_OPTIONAL_REWARDS: usize = 8;

/// A quest definition loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuestFile {
    pub quest: RawQuest,
}

/// Raw quest data as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// NPC that gives this quest
    #[serde(default)]
    pub giver: Option<String>,
    #[serde(default = "default_min_level")]
    pub min_level: i32,
    #[serde(default)]
    pub max_level: Option<i32>,
    /// How often a player may finish the quest
    #[serde(default = "default_max_count")]
    pub max_count: u32,
    /// Quests that must be finished first
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub steps: Vec<RawStep>,
    #[serde(default)]
    pub goals: Vec<GoalTemplate>,
    #[serde(default)]
    pub rewards: Option<RawRewards>,
    #[serde(default)]
    pub rules: Vec<BehaviorRule>,
}

fn default_min_level() -> i32 {
    1
}

fn default_max_count() -> u32 {
    1
}

/// Journal text for one step
#[derive(Debug, Clone, Deserialize)]
pub struct RawStep {
    pub step: i32,
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRewards {
    #[serde(default)]
    pub xp: i64,
    #[serde(default)]
    pub gold: i64,
    #[serde(default)]
    pub items: Vec<ItemReward>,
    #[serde(default)]
    pub optional_items: Vec<ItemReward>,
    #[serde(default)]
    pub choice_of: Option<usize>,
}

// ============================================================================
// Resolved Quest Structures (after parsing)
// ============================================================================

/// Item reward entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReward {
    #[serde(alias = "id")]
    pub item_id: String,
    #[serde(default = "default_item_count")]
    pub count: u32,
}

fn default_item_count() -> u32 {
    1
}

/// What finishing the quest pays out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewardTable {
    pub xp: i64,
    pub gold: i64,
    /// Always granted
    pub items: Vec<ItemReward>,
    /// The player picks `choice_of` of these
    pub optional_items: Vec<ItemReward>,
    pub choice_of: usize,
}

impl RewardTable {
    pub fn from_raw(quest_id: &str, raw: &RawRewards) -> Self {
        let mut optional_items = raw.optional_items.clone();
        if optional_items.len() > MAX_OPTIONAL_REWARDS {
            warn!(
                "Quest '{}' lists {} optional rewards, keeping the first {}",
                quest_id,
                optional_items.len(),
                MAX_OPTIONAL_REWARDS
            );
            optional_items.truncate(MAX_OPTIONAL_REWARDS);
        }

        let choice_of = if optional_items.is_empty() {
            0
        } else {
            raw.choice_of.unwrap_or(1).clamp(1, optional_items.len())
        };

        Self {
            xp: raw.xp,
            gold: raw.gold,
            items: raw.items.clone(),
            optional_items,
            choice_of,
        }
    }

    pub fn has_choice(&self) -> bool {
        self.choice_of > 0
    }

    /// Validate a player's pick of optional items (indices into `optional_items`)
    pub fn validate_choice(&self, choices: &[usize]) -> Result<()> {
        if choices.len() != self.choice_of {
            return Err(QuestError::InvalidRewardChoice(format!(
                "expected {} choice(s), got {}",
                self.choice_of,
                choices.len()
            )));
        }
        for (i, choice) in choices.iter().enumerate() {
            if *choice >= self.optional_items.len() {
                return Err(QuestError::InvalidRewardChoice(format!(
                    "no optional reward at index {}",
                    choice
                )));
            }
            if choices[..i].contains(choice) {
                return Err(QuestError::InvalidRewardChoice(format!(
                    "optional reward {} chosen twice",
                    choice
                )));
            }
        }
        Ok(())
    }
}

/// A fully resolved quest definition
#[derive(Debug, Clone)]
pub struct QuestDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub giver: Option<String>,
    pub min_level: i32,
    pub max_level: i32,
    pub max_count: u32,
    pub prerequisites: Vec<String>,
    /// Step number to journal text
    pub steps: BTreeMap<i32, String>,
    pub goals: Vec<GoalTemplate>,
    pub rewards: RewardTable,
    pub rules: RuleTable,
}

impl QuestDefinition {
    /// Create a definition from raw TOML data.
    ///
    /// Checks that only need this quest; references to other quests are
    /// checked when the whole catalog is built.
    pub fn from_raw(raw: RawQuest) -> Result<Self> {
        let content_err = |msg: String| QuestError::Content(format!("quest '{}': {}", raw.id, msg));

        if raw.id.trim().is_empty() {
            return Err(QuestError::Content("quest with empty id".to_string()));
        }
        let max_level = raw.max_level.unwrap_or(i32::MAX);
        if raw.min_level > max_level {
            return Err(content_err(format!(
                "min_level {} above max_level {}",
                raw.min_level, max_level
            )));
        }
        if raw.max_count == 0 {
            return Err(content_err("max_count must be at least 1".to_string()));
        }

        let mut steps = BTreeMap::new();
        for step in &raw.steps {
            if step.step < 1 {
                return Err(content_err(format!("step number {} below 1", step.step)));
            }
            if steps.insert(step.step, step.description.clone()).is_some() {
                return Err(content_err(format!("step {} declared twice", step.step)));
            }
        }

        for (i, goal) in raw.goals.iter().enumerate() {
            if raw.goals[..i].iter().any(|g| g.id == goal.id) {
                return Err(content_err(format!("goal '{}' declared twice", goal.id)));
            }
        }
        let goal_ids: Vec<&str> = raw.goals.iter().map(|g| g.id.as_str()).collect();

        let mut rules = RuleTable::new(raw.rules.clone());
        for rule in rules.iter_mut() {
            rule.normalize(&raw.id, &goal_ids)?;
        }

        let rewards = raw
            .rewards
            .as_ref()
            .map(|r| RewardTable::from_raw(&raw.id, r))
            .unwrap_or_default();

        Ok(Self {
            id: raw.id,
            name: raw.name,
            description: raw.description,
            giver: raw.giver,
            min_level: raw.min_level,
            max_level,
            max_count: raw.max_count,
            prerequisites: raw.prerequisites,
            steps,
            goals: raw.goals,
            rewards,
            rules,
        })
    }

    /// Parse a single quest file
    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: RawQuestFile =
            toml::from_str(content).map_err(|e| QuestError::Content(e.to_string()))?;
        Self::from_raw(raw.quest)
    }

    /// Journal text for a step, if the content provides one
    pub fn step_description(&self, step: i32) -> Option<&str> {
        self.steps.get(&step).map(String::as_str)
    }

    pub fn goal(&self, id: &str) -> Option<&GoalTemplate> {
        self.goals.iter().find(|g| g.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::goal::GoalKind;

    const BOAR_STEW: &str = r#"
[quest]
id = "boar_stew"
name = "Boar Stew"
giver = "gerol"
min_level = 2
max_level = 10

[[quest.steps]]
step = 1
description = "Kill a huge boar."

[[quest.steps]]
step = 2
description = "Bring the carcass to Gerol."

[[quest.goals]]
id = "boars"
kind = "kill_task"
target = 2

[quest.rewards]
xp = 120
gold = 15
items = [{ item_id = "stew" }]
optional_items = [{ item_id = "axe" }, { item_id = "bow" }, { item_id = "staff" }]
choice_of = 5

[[quest.rules]]
name = "offer"
trigger = { kind = "interact", target = "gerol" }
requirements = [{ kind = "quest_givable" }]
actions = [{ kind = "offer_quest" }]
"#;

    #[test]
    fn test_parse_full_quest() {
        let quest = QuestDefinition::from_toml(BOAR_STEW).unwrap();
        assert_eq!(quest.id, "boar_stew");
        assert_eq!(quest.giver.as_deref(), Some("gerol"));
        assert_eq!(quest.min_level, 2);
        assert_eq!(quest.max_level, 10);
        assert_eq!(quest.max_count, 1);
        assert_eq!(quest.step_description(2), Some("Bring the carcass to Gerol."));
        assert_eq!(quest.step_description(3), None);
        assert_eq!(quest.goal("boars").map(|g| g.kind), Some(GoalKind::KillTask));
        assert_eq!(quest.rules.len(), 1);
        // clamped to the number of optional items
        assert_eq!(quest.rewards.choice_of, 3);
    }

    #[test]
    fn test_defaults() {
        let quest = QuestDefinition::from_toml(
            r#"
[quest]
id = "plain"
name = "Plain"
"#,
        )
        .unwrap();
        assert_eq!(quest.min_level, 1);
        assert_eq!(quest.max_level, i32::MAX);
        assert!(!quest.rewards.has_choice());
        assert!(quest.rules.is_empty());
    }

    #[test]
    fn test_rejects_bad_content() {
        let bad_levels = r#"
[quest]
id = "q"
name = "Q"
min_level = 5
max_level = 3
"#;
        assert!(matches!(QuestDefinition::from_toml(bad_levels), Err(QuestError::Content(_))));

        let unknown_goal = r#"
[quest]
id = "q"
name = "Q"

[[quest.rules]]
trigger = { kind = "enemy_killed" }
actions = [{ kind = "advance_goal", goal = "nope" }]
"#;
        assert!(QuestDefinition::from_toml(unknown_goal).is_err());

        let unknown_trigger = r#"
[quest]
id = "q"
name = "Q"

[[quest.rules]]
trigger = { kind = "sneeze" }
actions = [{ kind = "message", text = "bless you" }]
"#;
        assert!(QuestDefinition::from_toml(unknown_trigger).is_err());
    }

    #[test]
    fn test_optional_rewards_truncated() {
        let raw = RawRewards {
            optional_items: (0..10)
                .map(|i| ItemReward { item_id: format!("item{}", i), count: 1 })
                .collect(),
            choice_of: Some(2),
            ..Default::default()
        };
        let table = RewardTable::from_raw("q", &raw);
        assert_eq!(table.optional_items.len(), MAX_OPTIONAL_REWARDS);
        assert_eq!(table.choice_of, 2);

        assert!(table.validate_choice(&[0, 7]).is_ok());
        assert!(table.validate_choice(&[0]).is_err());
        assert!(table.validate_choice(&[0, 8]).is_err());
        assert!(table.validate_choice(&[3, 3]).is_err());
    }
}
