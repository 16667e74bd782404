//! Quest Instance State
//!
//! One player's progress through one quest: step, status, goals, the ledger
//! of items the quest handed out, and the bookkeeping persistence needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::definition::{QuestDefinition, RewardTable};
use super::goal::GoalProgress;
use crate::command::Command;
use crate::error::{QuestError, Result};

/// Status of a quest for a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    /// Offered, waiting for an answer
    Offered,
    /// In progress
    Active,
    Finished,
    /// Abandoned by the player or aborted by content
    Aborted,
}

impl QuestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestStatus::Offered => "offered",
            QuestStatus::Active => "active",
            QuestStatus::Finished => "finished",
            QuestStatus::Aborted => "aborted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "offered" => Some(QuestStatus::Offered),
            "active" => Some(QuestStatus::Active),
            "finished" => Some(QuestStatus::Finished),
            "aborted" => Some(QuestStatus::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QuestStatus::Finished | QuestStatus::Aborted)
    }
}

/// Identifies an instance: one per (player, quest)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub player_id: String,
    pub quest_id: String,
}

impl InstanceKey {
    pub fn new(player_id: &str, quest_id: &str) -> Self {
        Self {
            player_id: player_id.to_string(),
            quest_id: quest_id.to_string(),
        }
    }
}

/// An item a quest's actions handed to the player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantedItem {
    pub item_id: String,
    pub count: u32,
}

/// How a step should move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepChange {
    Increment,
    To(i32),
}

/// One player's live progress through a quest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestInstance {
    pub(crate) quest_id: String,
    pub(crate) owner_id: String,
    pub(crate) step: i32,
    pub(crate) status: QuestStatus,
    pub(crate) goals: Vec<GoalProgress>,
    pub(crate) granted_items: Vec<GrantedItem>,
    /// Times the owner finished this quest, carried across re-accepts
    pub(crate) completions: u32,
    /// Version the record had when it was loaded; 0 = never stored
    pub(crate) version: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl QuestInstance {
    /// A fresh Active instance at step 1.
    ///
    /// `previous` is the owner's terminal record of the same quest, if any;
    /// its completion count and version carry over so the save replaces it.
    pub fn start(
        definition: &QuestDefinition,
        owner_id: &str,
        previous: Option<&QuestInstance>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            quest_id: definition.id.clone(),
            owner_id: owner_id.to_string(),
            step: 1,
            status: QuestStatus::Active,
            goals: definition.goals.iter().map(|g| g.start()).collect(),
            granted_items: Vec::new(),
            completions: previous.map(|p| p.completions).unwrap_or(0),
            version: previous.map(|p| p.version).unwrap_or(0),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Rebuild an instance from stored columns
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        quest_id: String,
        owner_id: String,
        step: i32,
        status: QuestStatus,
        goals: Vec<GoalProgress>,
        granted_items: Vec<GrantedItem>,
        completions: u32,
        version: u64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            quest_id,
            owner_id,
            step,
            status,
            goals,
            granted_items,
            completions,
            version,
            created_at,
            updated_at,
            finished_at,
        }
    }

    pub fn quest_id(&self) -> &str {
        &self.quest_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(&self.owner_id, &self.quest_id)
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub fn status(&self) -> QuestStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == QuestStatus::Active
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn goals(&self) -> &[GoalProgress] {
        &self.goals
    }

    pub fn goal(&self, id: &str) -> Option<&GoalProgress> {
        self.goals.iter().find(|g| g.id == id)
    }

    pub fn all_goals_achieved(&self) -> bool {
        self.goals.iter().all(|g| g.is_achieved())
    }

    pub fn granted_items(&self) -> &[GrantedItem] {
        &self.granted_items
    }

    pub fn completions(&self) -> u32 {
        self.completions
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn terminal_error(&self) -> QuestError {
        QuestError::InstanceTerminal {
            player_id: self.owner_id.clone(),
            quest_id: self.quest_id.clone(),
        }
    }

    fn require_active(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(self.terminal_error());
        }
        if self.status != QuestStatus::Active {
            return Err(QuestError::NoInstance {
                player_id: self.owner_id.clone(),
                quest_id: self.quest_id.clone(),
            });
        }
        Ok(())
    }

    /// Move the step forward. Returns `(from, to)`; `to == from` changes nothing.
    pub fn advance_step(&mut self, change: StepChange) -> Result<(i32, i32)> {
        self.require_active()?;
        let from = self.step;
        let to = match change {
            StepChange::Increment => from.checked_add(1).ok_or_else(|| QuestError::InvalidStep {
                quest_id: self.quest_id.clone(),
                from,
                to: from,
            })?,
            StepChange::To(to) => to,
        };
        if to < from {
            return Err(QuestError::InvalidStep {
                quest_id: self.quest_id.clone(),
                from,
                to,
            });
        }
        self.step = to;
        Ok((from, to))
    }

    /// One unit of progress on a goal.
    ///
    /// Returns `(current, target, achieved)` when the goal moved, `None` when
    /// it was already achieved.
    pub fn advance_goal(&mut self, goal_id: &str) -> Result<Option<(u32, u32, bool)>> {
        self.require_active()?;
        let goal = self
            .goals
            .iter_mut()
            .find(|g| g.id == goal_id)
            .ok_or_else(|| {
                QuestError::Content(format!(
                    "quest '{}' has no goal '{}'",
                    self.quest_id, goal_id
                ))
            })?;
        if goal.is_achieved() {
            return Ok(None);
        }
        let achieved = goal.advance();
        let (current, target) = goal.progress();
        Ok(Some((current, target, achieved)))
    }

    pub fn record_grant(&mut self, item_id: &str, count: u32) {
        match self.granted_items.iter_mut().find(|g| g.item_id == item_id) {
            Some(entry) => entry.count += count,
            None => self.granted_items.push(GrantedItem {
                item_id: item_id.to_string(),
                count,
            }),
        }
    }

    /// Items taken back by content no longer need removing on abort
    pub fn record_take(&mut self, item_id: &str, count: u32) {
        if let Some(entry) = self.granted_items.iter_mut().find(|g| g.item_id == item_id) {
            entry.count = entry.count.saturating_sub(count);
        }
        self.granted_items.retain(|g| g.count > 0);
    }

    /// Finish the quest and pay out its rewards.
    ///
    /// `chosen` are indices into the optional rewards, already validated.
    /// Returns `None` if the quest was already finished.
    pub fn finish(
        &mut self,
        rewards: &RewardTable,
        chosen: &[usize],
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<Command>>> {
        match self.status {
            QuestStatus::Finished => return Ok(None),
            QuestStatus::Aborted => return Err(self.terminal_error()),
            _ => self.require_active()?,
        }

        let player_id = &self.owner_id;
        let mut commands = Vec::new();
        if rewards.xp != 0 {
            commands.push(Command::GrantXp {
                player_id: player_id.clone(),
                amount: rewards.xp,
            });
        }
        if rewards.gold != 0 {
            commands.push(Command::GrantCurrency {
                player_id: player_id.clone(),
                amount: rewards.gold,
            });
        }
        let optional = chosen.iter().filter_map(|i| rewards.optional_items.get(*i));
        for item in rewards.items.iter().chain(optional) {
            commands.push(Command::GrantItem {
                player_id: player_id.clone(),
                item_id: item.item_id.clone(),
                count: item.count,
            });
        }

        self.status = QuestStatus::Finished;
        self.completions += 1;
        self.granted_items.clear();
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(Some(commands))
    }

    /// Abort the quest, returning removals for every item it handed out
    pub fn abort(&mut self, now: DateTime<Utc>) -> Result<Vec<Command>> {
        if self.status.is_terminal() {
            return Err(self.terminal_error());
        }
        let owner = self.owner_id.clone();
        let commands = self
            .granted_items
            .drain(..)
            .map(|g| Command::RemoveItem {
                player_id: owner.clone(),
                item_id: g.item_id,
                count: g.count,
            })
            .collect();
        self.status = QuestStatus::Aborted;
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(commands)
    }
}
