//! Behavior Rules
//!
//! A rule is a trigger pattern, a list of requirements and a list of actions.
//! Quest content declares rules in TOML; they are validated once at load
//! time so dispatch never has to second-guess them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::events::{EventKind, WorldEvent};
use crate::error::{QuestError, Result};

// ============================================================================
// Triggers
// ============================================================================

/// Which events a rule watches for.
///
/// Unset fields match anything; set fields compare ASCII case-insensitively
/// against the event's `target_id`, `source_id` and `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: EventKind,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
}

impl Trigger {
    pub fn matches(&self, event: &WorldEvent) -> bool {
        self.kind == event.kind
            && field_matches(&self.target, &event.target_id)
            && field_matches(&self.source, &event.source_id)
            && field_matches(&self.payload, &event.payload)
    }
}

fn field_matches(pattern: &Option<String>, value: &Option<String>) -> bool {
    match (pattern, value) {
        (None, _) => true,
        (Some(pattern), Some(value)) => pattern.eq_ignore_ascii_case(value),
        (Some(_), None) => false,
    }
}

// ============================================================================
// Requirements
// ============================================================================

/// Integer comparison used by step, level and count requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    #[default]
    #[serde(alias = "eq")]
    Equal,
    #[serde(alias = "ne")]
    NotEqual,
    #[serde(alias = "lt")]
    Less,
    #[serde(alias = "le")]
    LessOrEqual,
    #[serde(alias = "gt")]
    Greater,
    #[serde(alias = "ge")]
    GreaterOrEqual,
}

impl Comparator {
    /// `lhs <op> rhs`
    pub fn compare(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Comparator::Equal => lhs == rhs,
            Comparator::NotEqual => lhs != rhs,
            Comparator::Less => lhs < rhs,
            Comparator::LessOrEqual => lhs <= rhs,
            Comparator::Greater => lhs > rhs,
            Comparator::GreaterOrEqual => lhs >= rhs,
        }
    }
}

/// A precondition gating a rule. `quest: None` means the rule's own quest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Requirement {
    /// The quest could be given to the player right now
    QuestGivable {
        #[serde(default)]
        quest: Option<String>,
        #[serde(default)]
        negate: bool,
    },
    /// The player is currently doing the quest
    QuestPending {
        #[serde(default)]
        quest: Option<String>,
        #[serde(default)]
        negate: bool,
    },
    /// The quest is active and its step compares true against `step`
    QuestStep {
        #[serde(default)]
        quest: Option<String>,
        #[serde(default)]
        comparator: Comparator,
        step: i32,
    },
    /// How often the player has finished the quest
    FinishedCount {
        #[serde(default)]
        quest: Option<String>,
        #[serde(default)]
        comparator: Comparator,
        count: u32,
    },
    /// The player carries at least `count` of the item
    HoldsItem {
        item: String,
        #[serde(default = "default_count")]
        count: u32,
    },
    Level {
        #[serde(default)]
        comparator: Comparator,
        level: i32,
    },
    GoalAchieved { goal: String },
    AllGoalsAchieved,
}

fn default_count() -> u32 {
    1
}

// ============================================================================
// Actions
// ============================================================================

/// A side effect executed when a rule fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// The rule's NPC says something to the player
    Talk { text: String },
    /// System message
    Message { text: String },
    GiveItem {
        item: String,
        #[serde(default = "default_count")]
        count: u32,
    },
    TakeItem {
        item: String,
        #[serde(default = "default_count")]
        count: u32,
    },
    ReplaceItem { from: String, to: String },
    GiveXp { amount: i64 },
    GiveGold { amount: i64 },
    IncQuestStep {
        #[serde(default)]
        quest: Option<String>,
    },
    SetQuestStep {
        #[serde(default)]
        quest: Option<String>,
        step: i32,
    },
    /// One unit of progress on a goal of the rule's own quest
    AdvanceGoal { goal: String },
    OfferQuest {
        #[serde(default)]
        quest: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
    GiveQuest {
        #[serde(default)]
        quest: Option<String>,
    },
    FinishQuest {
        #[serde(default)]
        quest: Option<String>,
    },
    AbortQuest {
        #[serde(default)]
        quest: Option<String>,
    },
    /// Fires a `timer` trigger with this id after the delay
    StartTimer { timer: String, delay_ms: u64 },
}

// ============================================================================
// Rules
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorRule {
    /// Label used in logs
    #[serde(default)]
    pub name: Option<String>,
    /// NPC speaking `talk` actions; defaults to the event target
    #[serde(default)]
    pub npc: Option<String>,
    pub trigger: Trigger,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl BehaviorRule {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    /// Every quest id this rule refers to, own quest excluded
    pub fn referenced_quests(&self) -> BTreeSet<&str> {
        let mut quests = BTreeSet::new();
        for requirement in &self.requirements {
            match requirement {
                Requirement::QuestGivable { quest: Some(q), .. }
                | Requirement::QuestPending { quest: Some(q), .. }
                | Requirement::QuestStep { quest: Some(q), .. }
                | Requirement::FinishedCount { quest: Some(q), .. } => {
                    quests.insert(q.as_str());
                }
                _ => {}
            }
        }
        for action in &self.actions {
            match action {
                Action::IncQuestStep { quest: Some(q) }
                | Action::SetQuestStep { quest: Some(q), .. }
                | Action::OfferQuest { quest: Some(q), .. }
                | Action::GiveQuest { quest: Some(q) }
                | Action::FinishQuest { quest: Some(q) }
                | Action::AbortQuest { quest: Some(q) } => {
                    quests.insert(q.as_str());
                }
                _ => {}
            }
        }
        quests
    }

    /// Checks that only depend on the owning quest.
    ///
    /// Quest-typed triggers without a payload are bound to the owning quest.
    pub fn normalize(&mut self, own_quest: &str, goal_ids: &[&str]) -> Result<()> {
        let label = self.label().to_string();
        let fail = |msg: String| {
            Err(QuestError::Content(format!(
                "quest '{}', rule '{}': {}",
                own_quest, label, msg
            )))
        };

        match self.trigger.kind {
            EventKind::Whisper | EventKind::GiveItem | EventKind::ItemUsed | EventKind::Timer => {
                if self.trigger.payload.is_none() {
                    return fail(format!(
                        "'{}' trigger needs a payload",
                        self.trigger.kind.as_str()
                    ));
                }
            }
            EventKind::EnterArea | EventKind::LeaveArea => {
                if self.trigger.target.is_none() {
                    return fail(format!(
                        "'{}' trigger needs a target area",
                        self.trigger.kind.as_str()
                    ));
                }
            }
            EventKind::AcceptQuest
            | EventKind::DeclineQuest
            | EventKind::AbortQuest
            | EventKind::ContinueQuest => {
                if self.trigger.payload.is_none() {
                    self.trigger.payload = Some(own_quest.to_string());
                }
            }
            _ => {}
        }

        if self.actions.is_empty() {
            return fail("rule has no actions".to_string());
        }

        let goal_known = |goal: &str| goal_ids.contains(&goal);
        for requirement in &self.requirements {
            if let Requirement::GoalAchieved { goal } = requirement {
                if !goal_known(goal) {
                    return fail(format!("unknown goal '{}'", goal));
                }
            }
            if let Requirement::HoldsItem { count: 0, item } = requirement {
                return fail(format!("holds_item '{}' with count 0", item));
            }
        }
        for action in &self.actions {
            match action {
                Action::AdvanceGoal { goal } if !goal_known(goal) => {
                    return fail(format!("unknown goal '{}'", goal));
                }
                Action::SetQuestStep { step, .. } if *step < 1 => {
                    return fail(format!("set_quest_step to {}", step));
                }
                Action::GiveItem { count: 0, item } | Action::TakeItem { count: 0, item } => {
                    return fail(format!("item action on '{}' with count 0", item));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Ordered rules of one quest. Declaration order breaks ties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleTable {
    rules: Vec<BehaviorRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<BehaviorRule>) -> Self {
        Self { rules }
    }

    /// The first rule whose trigger matches `event` and for which `passes`
    /// returns true. `passes` is only called for trigger matches, in order.
    pub fn select<'a>(
        &'a self,
        event: &WorldEvent,
        mut passes: impl FnMut(&BehaviorRule) -> bool,
    ) -> Option<(usize, &'a BehaviorRule)> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.trigger.matches(event))
            .find(|(_, rule)| passes(rule))
    }

    /// Trigger kinds any rule listens for
    pub fn trigger_kinds(&self) -> BTreeSet<EventKind> {
        self.rules.iter().map(|r| r.trigger.kind).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BehaviorRule> {
        self.rules.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut BehaviorRule> {
        self.rules.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
