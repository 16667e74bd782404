//! Quest behavior engine
//!
//! Data-driven quests for game servers: TOML quest content declares behavior
//! rules (trigger, requirements, actions), goals and rewards; the engine
//! dispatches world events through those rules, runs the quest lifecycle and
//! persists per-player instances.

pub mod bus;
pub mod collab;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod quest;
pub mod store;

pub use bus::{BusEvent, EventBus};
pub use command::Command;
pub use config::EngineConfig;
pub use engine::{FiredRule, QuestEngine};
pub use error::{QuestError, Result};
