//! Quest Goals
//!
//! Quantified sub-objectives (kill counts, scouting, deliveries) tracked
//! alongside a quest's step.

use serde::{Deserialize, Serialize};

/// Kinds of goals a quest can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalKind {
    /// Kill X of something
    KillTask,
    /// Visit a place
    ScoutMission,
    /// Bring an item somewhere
    ItemDelivery,
}

/// A goal as declared in quest content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalTemplate {
    pub id: String,
    pub kind: GoalKind,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_target")]
    pub target: u32,
}

fn default_target() -> u32 {
    1
}

impl GoalTemplate {
    /// Fresh progress for a new instance
    pub fn start(&self) -> GoalProgress {
        GoalProgress::new(&self.id, self.kind, self.target)
    }
}

/// Progress on a single goal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalProgress {
    pub id: String,
    pub kind: GoalKind,
    pub target: u32,
    pub current: u32,
    pub achieved: bool,
}

impl GoalProgress {
    pub fn new(id: &str, kind: GoalKind, target: u32) -> Self {
        Self {
            id: id.to_string(),
            kind,
            target,
            current: 0,
            achieved: target == 0,
        }
    }

    /// Add one unit of progress and return true if this call achieved the goal.
    /// Once achieved, further calls change nothing.
    pub fn advance(&mut self) -> bool {
        if self.achieved {
            return false;
        }
        self.current = (self.current + 1).min(self.target);
        if self.current == self.target {
            self.achieved = true;
            true
        } else {
            false
        }
    }

    pub fn is_achieved(&self) -> bool {
        self.achieved
    }

    /// (current, target)
    pub fn progress(&self) -> (u32, u32) {
        (self.current, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_advance() {
        let mut goal = GoalProgress::new("boars", GoalKind::KillTask, 3);
        assert!(!goal.is_achieved());

        assert!(!goal.advance());
        assert!(!goal.advance());
        assert_eq!(goal.progress(), (2, 3));

        let achieved = goal.advance();
        assert!(achieved);
        assert!(goal.is_achieved());

        // No-op after achievement
        assert!(!goal.advance());
        assert_eq!(goal.progress(), (3, 3));
    }

    #[test]
    fn test_goal_kind_parsing() {
        let template: GoalTemplate = toml::from_str(
            r#"
id = "scout_camp"
kind = "scout_mission"
description = "Scout the bandit camp"
"#,
        )
        .unwrap();
        assert_eq!(template.kind, GoalKind::ScoutMission);
        assert_eq!(template.target, 1);
        assert_eq!(template.start().progress(), (0, 1));
    }
}
