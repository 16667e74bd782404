//! Action Executor
//!
//! Runs a fired rule's actions in order. Actions never call collaborators;
//! they produce [`Command`]s, mutate the addressed instance in place and
//! queue anything touching other quests as [`LifecycleRequest`]s.
//!
//! There is no rollback: an action that cannot run is skipped with a
//! warning and the remaining actions still execute.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::definition::QuestDefinition;
use super::events::{QuestEvent, WorldEvent};
use super::instance::{QuestInstance, StepChange};
use super::qualify::qualify;
use super::rule::{Action, BehaviorRule};
use super::snapshot::PlayerSnapshot;
use crate::command::Command;

/// Lifecycle work the engine applies after the rule's own instance is saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleRequest {
    Offer { quest_id: String, text: Option<String> },
    Give { quest_id: String },
    Finish { quest_id: String },
    Abort { quest_id: String },
    Step { quest_id: String, change: StepChange },
}

/// A timer to start for the addressed instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerRequest {
    pub timer_id: String,
    pub delay: Duration,
}

/// Output of one rule execution
#[derive(Debug, Default)]
pub struct Execution {
    pub commands: Vec<Command>,
    pub events: Vec<QuestEvent>,
    pub requests: Vec<LifecycleRequest>,
    pub timers: Vec<TimerRequest>,
}

pub struct ExecContext<'a> {
    pub definition: &'a QuestDefinition,
    pub rule: &'a BehaviorRule,
    pub event: &'a WorldEvent,
    /// Kept in step with the actions so later ones see earlier effects
    pub player: &'a mut PlayerSnapshot,
    /// The stored record of the rule's quest, in any status
    pub instance: &'a mut Option<QuestInstance>,
    pub now: DateTime<Utc>,
}

impl ExecContext<'_> {
    fn player_id(&self) -> String {
        self.event.player_id.clone()
    }

    fn is_own(&self, quest: &Option<String>) -> bool {
        quest.as_deref().is_none_or(|q| q == self.definition.id)
    }

    fn target(&self, quest: &Option<String>) -> String {
        quest.clone().unwrap_or_else(|| self.definition.id.clone())
    }

    fn active_instance(&mut self) -> Option<&mut QuestInstance> {
        self.instance.as_mut().filter(|i| i.is_active())
    }

    fn skip(&self, action: &Action, reason: &str) {
        warn!(
            "Skipping {:?} in rule '{}' of quest '{}' for player {}: {}",
            action,
            self.rule.label(),
            self.definition.id,
            self.event.player_id,
            reason
        );
    }
}

pub fn execute(actions: &[Action], ctx: &mut ExecContext<'_>) -> Execution {
    let mut out = Execution::default();
    for action in actions {
        execute_one(action, ctx, &mut out);
    }
    out
}

fn execute_one(action: &Action, ctx: &mut ExecContext<'_>, out: &mut Execution) {
    let player_id = ctx.player_id();
    let quest_id = ctx.definition.id.clone();

    match action {
        Action::Talk { text } => {
            let npc_id = ctx.rule.npc.clone().or_else(|| ctx.event.target_id.clone());
            out.commands.push(Command::Say {
                player_id,
                npc_id,
                text: text.clone(),
            });
        }
        Action::Message { text } => {
            out.commands.push(Command::Message {
                player_id,
                text: text.clone(),
            });
        }
        Action::GiveItem { item, count } => {
            out.commands.push(Command::GrantItem {
                player_id,
                item_id: item.clone(),
                count: *count,
            });
            if let Some(instance) = ctx.active_instance() {
                instance.record_grant(item, *count);
            }
            ctx.player.note_grant(item, *count);
        }
        Action::TakeItem { item, count } => {
            if ctx.player.item_count(item) < *count {
                ctx.skip(action, "player does not hold the item");
                return;
            }
            out.commands.push(Command::RemoveItem {
                player_id,
                item_id: item.clone(),
                count: *count,
            });
            if let Some(instance) = ctx.active_instance() {
                instance.record_take(item, *count);
            }
            ctx.player.note_take(item, *count);
        }
        Action::ReplaceItem { from, to } => {
            if ctx.player.item_count(from) == 0 {
                ctx.skip(action, "player does not hold the item");
                return;
            }
            out.commands.push(Command::ReplaceItem {
                player_id,
                from_item: from.clone(),
                to_item: to.clone(),
            });
            if let Some(instance) = ctx.active_instance() {
                instance.record_take(from, 1);
                instance.record_grant(to, 1);
            }
            ctx.player.note_take(from, 1);
            ctx.player.note_grant(to, 1);
        }
        Action::GiveXp { amount } => {
            out.commands.push(Command::GrantXp {
                player_id,
                amount: *amount,
            });
        }
        Action::GiveGold { amount } => {
            out.commands.push(Command::GrantCurrency {
                player_id,
                amount: *amount,
            });
        }
        Action::IncQuestStep { quest } => {
            step_action(action, quest, StepChange::Increment, ctx, out);
        }
        Action::SetQuestStep { quest, step } => {
            step_action(action, quest, StepChange::To(*step), ctx, out);
        }
        Action::AdvanceGoal { goal } => {
            let Some(instance) = ctx.active_instance() else {
                ctx.skip(action, "quest is not active");
                return;
            };
            match instance.advance_goal(goal) {
                Ok(Some((current, target, achieved))) => {
                    out.events.push(QuestEvent::GoalAdvanced {
                        player_id,
                        quest_id,
                        goal_id: goal.clone(),
                        current,
                        target,
                        achieved,
                    });
                }
                Ok(None) => {}
                Err(e) => ctx.skip(action, &e.to_string()),
            }
        }
        Action::OfferQuest { quest, text } => {
            out.requests.push(LifecycleRequest::Offer {
                quest_id: ctx.target(quest),
                text: text.clone(),
            });
        }
        Action::GiveQuest { quest } => {
            if !ctx.is_own(quest) {
                out.requests.push(LifecycleRequest::Give {
                    quest_id: ctx.target(quest),
                });
                return;
            }
            if let Err(e) = qualify(ctx.definition, ctx.player) {
                ctx.skip(action, &e.to_string());
                return;
            }
            let started =
                QuestInstance::start(ctx.definition, &player_id, ctx.instance.as_ref(), ctx.now);
            ctx.player.note_instance(&started);
            *ctx.instance = Some(started);
            out.events.push(QuestEvent::Given {
                player_id,
                quest_id,
            });
        }
        Action::FinishQuest { quest } => {
            if !ctx.is_own(quest) {
                out.requests.push(LifecycleRequest::Finish {
                    quest_id: ctx.target(quest),
                });
                return;
            }
            let now = ctx.now;
            let definition = ctx.definition;
            let Some(instance) = ctx.instance.as_mut() else {
                ctx.skip(action, "no instance");
                return;
            };
            match instance.finish(&definition.rewards, &[], now) {
                Ok(Some(commands)) => {
                    let finished = instance.clone();
                    ctx.player.note_instance(&finished);
                    out.commands.extend(commands);
                    out.events.push(QuestEvent::Finished {
                        player_id,
                        quest_id,
                    });
                }
                Ok(None) => {}
                Err(e) => ctx.skip(action, &e.to_string()),
            }
        }
        Action::AbortQuest { quest } => {
            if !ctx.is_own(quest) {
                out.requests.push(LifecycleRequest::Abort {
                    quest_id: ctx.target(quest),
                });
                return;
            }
            let now = ctx.now;
            let Some(instance) = ctx.instance.as_mut() else {
                ctx.skip(action, "no instance");
                return;
            };
            match instance.abort(now) {
                Ok(commands) => {
                    let aborted = instance.clone();
                    for command in &commands {
                        if let Command::RemoveItem { item_id, count, .. } = command {
                            ctx.player.note_take(item_id, *count);
                        }
                    }
                    ctx.player.note_instance(&aborted);
                    out.commands.extend(commands);
                    out.events.push(QuestEvent::Aborted {
                        player_id,
                        quest_id,
                    });
                }
                Err(e) => ctx.skip(action, &e.to_string()),
            }
        }
        Action::StartTimer { timer, delay_ms } => {
            out.timers.push(TimerRequest {
                timer_id: timer.clone(),
                delay: Duration::from_millis(*delay_ms),
            });
        }
    }
}

fn step_action(
    action: &Action,
    quest: &Option<String>,
    change: StepChange,
    ctx: &mut ExecContext<'_>,
    out: &mut Execution,
) {
    if !ctx.is_own(quest) {
        out.requests.push(LifecycleRequest::Step {
            quest_id: ctx.target(quest),
            change,
        });
        return;
    }
    let player_id = ctx.player_id();
    let Some(instance) = ctx.active_instance() else {
        ctx.skip(action, "quest is not active");
        return;
    };
    match instance.advance_step(change) {
        Ok((from, to)) if from != to => {
            let quest_id = instance.quest_id().to_string();
            ctx.player.active_quests.insert(quest_id.clone(), to);
            out.events.push(QuestEvent::StepChanged {
                player_id,
                quest_id,
                from,
                to,
            });
        }
        Ok(_) => {}
        Err(e) => ctx.skip(action, &e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::instance::QuestStatus;

    fn definition() -> QuestDefinition {
        QuestDefinition::from_toml(
            r#"
[quest]
id = "boar_stew"
name = "Boar Stew"

[[quest.goals]]
id = "boars"
kind = "kill_task"
target = 2

[quest.rewards]
xp = 50

[[quest.rules]]
npc = "gerol"
trigger = { kind = "enemy_killed", target = "huge boar" }
actions = [{ kind = "message", text = "x" }]
"#,
        )
        .unwrap()
    }

    fn run(
        def: &QuestDefinition,
        actions: &[Action],
        player: &mut PlayerSnapshot,
        instance: &mut Option<QuestInstance>,
    ) -> Execution {
        let rule = def.rules.iter().next().unwrap().clone();
        let event = WorldEvent::enemy_killed("p1", "huge boar");
        let mut ctx = ExecContext {
            definition: def,
            rule: &rule,
            event: &event,
            player,
            instance,
            now: Utc::now(),
        };
        execute(actions, &mut ctx)
    }

    #[test]
    fn test_step_and_item_ledger() {
        let def = definition();
        let mut player = PlayerSnapshot::new("p1", 1);
        let mut instance = Some(QuestInstance::start(&def, "p1", None, Utc::now()));

        let out = run(
            &def,
            &[
                Action::IncQuestStep { quest: None },
                Action::GiveItem { item: "carcass".to_string(), count: 1 },
                Action::Talk { text: "Well done".to_string() },
            ],
            &mut player,
            &mut instance,
        );

        let instance = instance.unwrap();
        assert_eq!(instance.step(), 2);
        assert_eq!(instance.granted_items().len(), 1);
        assert_eq!(player.item_count("carcass"), 1);
        assert_eq!(
            out.events,
            vec![QuestEvent::StepChanged {
                player_id: "p1".to_string(),
                quest_id: "boar_stew".to_string(),
                from: 1,
                to: 2,
            }]
        );
        assert_eq!(
            out.commands[1],
            Command::Say {
                player_id: "p1".to_string(),
                npc_id: Some("gerol".to_string()),
                text: "Well done".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_item_is_skipped_without_rollback() {
        let def = definition();
        let mut player = PlayerSnapshot::new("p1", 1);
        let mut instance = Some(QuestInstance::start(&def, "p1", None, Utc::now()));

        let out = run(
            &def,
            &[
                Action::GiveXp { amount: 10 },
                Action::TakeItem { item: "letter".to_string(), count: 1 },
                Action::GiveGold { amount: 5 },
            ],
            &mut player,
            &mut instance,
        );
        assert_eq!(out.commands.len(), 2);
        assert!(matches!(out.commands[0], Command::GrantXp { amount: 10, .. }));
        assert!(matches!(out.commands[1], Command::GrantCurrency { amount: 5, .. }));
    }

    #[test]
    fn test_give_and_finish_own_quest() {
        let def = definition();
        let mut player = PlayerSnapshot::new("p1", 1);
        let mut instance = None;

        let out = run(
            &def,
            &[
                Action::GiveQuest { quest: None },
                Action::AdvanceGoal { goal: "boars".to_string() },
                Action::FinishQuest { quest: None },
            ],
            &mut player,
            &mut instance,
        );

        let instance = instance.unwrap();
        assert_eq!(instance.status(), QuestStatus::Finished);
        assert_eq!(player.finished_count("boar_stew"), 1);
        assert!(!player.is_doing("boar_stew"));
        assert_eq!(out.events.len(), 3);
        assert!(matches!(out.commands[0], Command::GrantXp { amount: 50, .. }));
    }

    #[test]
    fn test_other_quests_become_requests() {
        let def = definition();
        let mut player = PlayerSnapshot::new("p1", 1);
        let mut instance = None;

        let out = run(
            &def,
            &[
                Action::OfferQuest { quest: None, text: None },
                Action::GiveQuest { quest: Some("sequel".to_string()) },
                Action::SetQuestStep { quest: Some("sequel".to_string()), step: 3 },
                Action::StartTimer { timer: "ambush".to_string(), delay_ms: 500 },
            ],
            &mut player,
            &mut instance,
        );
        assert!(instance.is_none());
        assert_eq!(
            out.requests,
            vec![
                LifecycleRequest::Offer { quest_id: "boar_stew".to_string(), text: None },
                LifecycleRequest::Give { quest_id: "sequel".to_string() },
                LifecycleRequest::Step {
                    quest_id: "sequel".to_string(),
                    change: StepChange::To(3),
                },
            ]
        );
        assert_eq!(out.timers[0].delay, Duration::from_millis(500));
    }
}
