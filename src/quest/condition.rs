//! Condition Evaluator
//!
//! Pure evaluation of rule requirements against a player snapshot, the
//! addressed quest instance and the triggering event.

use tracing::debug;

use super::events::WorldEvent;
use super::instance::QuestInstance;
use super::qualify::qualify;
use super::registry::QuestCatalog;
use super::rule::Requirement;
use super::snapshot::PlayerSnapshot;

/// Everything a requirement may look at
pub struct EvalContext<'a> {
    /// The quest owning the rule
    pub quest_id: &'a str,
    pub player: &'a PlayerSnapshot,
    /// The player's Active instance of `quest_id`, if any
    pub instance: Option<&'a QuestInstance>,
    pub event: &'a WorldEvent,
    pub catalog: &'a QuestCatalog,
}

impl<'a> EvalContext<'a> {
    fn quest<'b>(&'b self, quest: &'b Option<String>) -> &'b str {
        quest.as_deref().unwrap_or(self.quest_id)
    }

    /// Step of the player's Active instance of `quest_id`
    fn active_step(&self, quest_id: &str) -> Option<i32> {
        if quest_id == self.quest_id {
            return self.instance.filter(|i| i.is_active()).map(|i| i.step());
        }
        self.player.active_step(quest_id)
    }

    fn finished_count(&self, quest_id: &str) -> u32 {
        match self.instance {
            Some(instance) if quest_id == self.quest_id => self
                .player
                .finished_count(quest_id)
                .max(instance.completions()),
            _ => self.player.finished_count(quest_id),
        }
    }
}

pub fn evaluate(requirement: &Requirement, ctx: &EvalContext<'_>) -> bool {
    match requirement {
        Requirement::QuestGivable { quest, negate } => {
            let quest_id = ctx.quest(quest);
            let givable = match ctx.catalog.get(quest_id) {
                Some(definition) => {
                    let mut player = ctx.player.clone();
                    if quest_id == ctx.quest_id {
                        match ctx.active_step(quest_id) {
                            Some(step) => {
                                player.active_quests.insert(quest_id.to_string(), step);
                            }
                            None => {
                                player.active_quests.remove(quest_id);
                            }
                        }
                        let finished = ctx.finished_count(quest_id);
                        player.finished_quests.insert(quest_id.to_string(), finished);
                    }
                    qualify(&definition, &player).is_ok()
                }
                None => false,
            };
            givable != *negate
        }
        Requirement::QuestPending { quest, negate } => {
            let pending = ctx.active_step(ctx.quest(quest)).is_some();
            pending != *negate
        }
        Requirement::QuestStep {
            quest,
            comparator,
            step,
        } => match ctx.active_step(ctx.quest(quest)) {
            Some(current) => comparator.compare(current as i64, *step as i64),
            None => false,
        },
        Requirement::FinishedCount {
            quest,
            comparator,
            count,
        } => {
            let finished = ctx.finished_count(ctx.quest(quest));
            comparator.compare(finished as i64, *count as i64)
        }
        Requirement::HoldsItem { item, count } => ctx.player.item_count(item) >= *count,
        Requirement::Level { comparator, level } => {
            comparator.compare(ctx.player.level as i64, *level as i64)
        }
        Requirement::GoalAchieved { goal } => ctx
            .instance
            .filter(|i| i.is_active())
            .and_then(|i| i.goal(goal))
            .is_some_and(|g| g.is_achieved()),
        Requirement::AllGoalsAchieved => ctx
            .instance
            .filter(|i| i.is_active())
            .is_some_and(|i| i.all_goals_achieved()),
    }
}

/// True when every requirement passes. Stops at the first failure.
pub fn all_pass(requirements: &[Requirement], ctx: &EvalContext<'_>) -> bool {
    requirements.iter().all(|requirement| {
        let pass = evaluate(requirement, ctx);
        if !pass {
            debug!(
                "Requirement {:?} failed for player {} on quest {} ({})",
                requirement,
                ctx.player.player_id,
                ctx.quest_id,
                ctx.event.kind.as_str()
            );
        }
        pass
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::definition::QuestDefinition;
    use crate::quest::instance::StepChange;
    use crate::quest::rule::Comparator;
    use chrono::Utc;

    fn catalog() -> QuestCatalog {
        let defs = [
            "[quest]\nid = \"intro\"\nname = \"Intro\"",
            r#"
[quest]
id = "boar_stew"
name = "Boar Stew"
min_level = 2
prerequisites = ["intro"]

[[quest.goals]]
id = "boars"
kind = "kill_task"
target = 1
"#,
        ]
        .iter()
        .map(|src| QuestDefinition::from_toml(src).unwrap())
        .collect();
        QuestCatalog::build(defs).unwrap()
    }

    fn ctx<'a>(
        catalog: &'a QuestCatalog,
        player: &'a PlayerSnapshot,
        instance: Option<&'a QuestInstance>,
        event: &'a WorldEvent,
    ) -> EvalContext<'a> {
        EvalContext {
            quest_id: "boar_stew",
            player,
            instance,
            event,
            catalog,
        }
    }

    #[test]
    fn test_givable_and_negation() {
        let catalog = catalog();
        let event = WorldEvent::interact("p1", "gerol");
        let fresh = PlayerSnapshot::new("p1", 2);
        let ready = PlayerSnapshot::new("p1", 2).with_finished("intro", 1);

        let givable = Requirement::QuestGivable { quest: None, negate: false };
        let not_givable = Requirement::QuestGivable { quest: None, negate: true };

        assert!(!evaluate(&givable, &ctx(&catalog, &fresh, None, &event)));
        assert!(evaluate(&not_givable, &ctx(&catalog, &fresh, None, &event)));
        assert!(evaluate(&givable, &ctx(&catalog, &ready, None, &event)));
    }

    #[test]
    fn test_step_and_goals_need_active_instance() {
        let catalog = catalog();
        let def = catalog.get("boar_stew").unwrap();
        let event = WorldEvent::enemy_killed("p1", "boar");
        let player = PlayerSnapshot::new("p1", 2);
        let mut instance = QuestInstance::start(&def, "p1", None, Utc::now());
        instance.advance_step(StepChange::To(2)).unwrap();

        let step_two = Requirement::QuestStep {
            quest: None,
            comparator: Comparator::Equal,
            step: 2,
        };
        let pending = Requirement::QuestPending { quest: None, negate: false };
        assert!(evaluate(&step_two, &ctx(&catalog, &player, Some(&instance), &event)));
        assert!(evaluate(&pending, &ctx(&catalog, &player, Some(&instance), &event)));
        assert!(!evaluate(&step_two, &ctx(&catalog, &player, None, &event)));

        let goals = Requirement::AllGoalsAchieved;
        assert!(!evaluate(&goals, &ctx(&catalog, &player, Some(&instance), &event)));
        instance.advance_goal("boars").unwrap();
        assert!(evaluate(&goals, &ctx(&catalog, &player, Some(&instance), &event)));

        instance.abort(Utc::now()).unwrap();
        assert!(!evaluate(&goals, &ctx(&catalog, &player, Some(&instance), &event)));
        assert!(!evaluate(&pending, &ctx(&catalog, &player, Some(&instance), &event)));
    }

    #[test]
    fn test_all_pass_short_circuits_in_order() {
        let catalog = catalog();
        let event = WorldEvent::interact("p1", "gerol");
        let player = PlayerSnapshot::new("p1", 4).with_item("carcass", 1);
        let requirements = vec![
            Requirement::Level { comparator: Comparator::GreaterOrEqual, level: 3 },
            Requirement::HoldsItem { item: "carcass".to_string(), count: 1 },
        ];
        assert!(all_pass(&requirements, &ctx(&catalog, &player, None, &event)));

        let requirements = vec![
            Requirement::HoldsItem { item: "carcass".to_string(), count: 2 },
            Requirement::Level { comparator: Comparator::Less, level: 3 },
        ];
        assert!(!all_pass(&requirements, &ctx(&catalog, &player, None, &event)));
    }
}
