//! Quest System Module
//!
//! Data-driven quests: TOML definitions carrying behavior rules
//! (trigger, requirements, actions), per-player instances with steps and
//! goals, and the pure evaluation/execution pieces the engine drives.

pub mod action;
pub mod condition;
pub mod definition;
pub mod events;
pub mod goal;
pub mod instance;
pub mod offer;
pub mod qualify;
pub mod registry;
pub mod rule;
pub mod snapshot;
pub mod timer;

pub use action::{ExecContext, Execution, LifecycleRequest, TimerRequest};
pub use condition::EvalContext;
pub use definition::{ItemReward, QuestDefinition, RewardTable};
pub use events::{EventKind, QuestEvent, WorldEvent};
pub use goal::{GoalKind, GoalProgress, GoalTemplate};
pub use instance::{GrantedItem, InstanceKey, QuestInstance, QuestStatus, StepChange};
pub use offer::{OfferBook, PendingOffer};
pub use qualify::qualify;
pub use registry::{HotReloadEvent, QuestCatalog, QuestRegistry};
pub use rule::{Action, BehaviorRule, Comparator, Requirement, RuleTable, Trigger};
pub use snapshot::PlayerSnapshot;
pub use timer::{DueTimer, TimerArena};
