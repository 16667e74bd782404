use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use quest_engine::collab::{CommandRouter, InMemoryWorld};
use quest_engine::quest::{HotReloadEvent, QuestRegistry, WorldEvent};
use quest_engine::store::SqliteStore;
use quest_engine::{Command, EngineConfig, EventBus, FiredRule, QuestEngine, QuestError, Result};

// ============================================================================
// Replay input
// ============================================================================

/// One line of replay input
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ReplayOp {
    /// A world event for dispatch
    Event(WorldEvent),
    Offer { player_id: String, quest_id: String },
    /// Accept the player's oldest pending offer of the quest
    Accept { player_id: String, quest_id: String },
    Decline { player_id: String, quest_id: String },
    Finish { player_id: String, quest_id: String },
    Abort { player_id: String, quest_id: String },
    ChooseRewards {
        player_id: String,
        quest_id: String,
        choices: Vec<usize>,
    },
    SetLevel { player_id: String, level: i32 },
    Stock {
        player_id: String,
        item_id: String,
        #[serde(default = "default_count")]
        count: u32,
    },
    /// Let time pass, then fire due timers
    Wait { ms: u64 },
}

fn default_count() -> u32 {
    1
}

struct Replay {
    engine: Arc<QuestEngine>,
    bus: EventBus,
    /// Rules fired per world event, reported by the bus ingress
    fired: mpsc::UnboundedReceiver<Vec<FiredRule>>,
    world: Arc<InMemoryWorld>,
    router: CommandRouter,
    outbox: mpsc::UnboundedReceiver<Command>,
}

impl Replay {
    fn pending_offer(&self, player_id: &str, quest_id: &str) -> Result<uuid::Uuid> {
        self.engine
            .pending_offers(player_id)
            .into_iter()
            .find(|o| o.quest_id == quest_id)
            .map(|o| o.id)
            .ok_or_else(|| QuestError::OfferExpired(format!("{}/{}", player_id, quest_id)))
    }

    async fn run(&mut self, op: ReplayOp) -> Result<()> {
        match op {
            ReplayOp::Event(event) => {
                let kind = event.kind;
                self.bus.publish_world(event);
                let fired = self.fired.recv().await.unwrap_or_default();
                info!("{} -> {} rule(s) fired", kind.as_str(), fired.len());
            }
            ReplayOp::Offer { player_id, quest_id } => {
                self.engine.offer(&player_id, &quest_id).await?;
            }
            ReplayOp::Accept { player_id, quest_id } => {
                let offer = self.pending_offer(&player_id, &quest_id)?;
                self.engine.accept(offer).await?;
            }
            ReplayOp::Decline { player_id, quest_id } => {
                let offer = self.pending_offer(&player_id, &quest_id)?;
                self.engine.decline(offer).await?;
            }
            ReplayOp::Finish { player_id, quest_id } => {
                self.engine.finish(&player_id, &quest_id).await?;
            }
            ReplayOp::Abort { player_id, quest_id } => {
                self.engine.abort(&player_id, &quest_id).await?;
            }
            ReplayOp::ChooseRewards {
                player_id,
                quest_id,
                choices,
            } => {
                self.engine
                    .choose_rewards(&player_id, &quest_id, &choices)
                    .await?;
            }
            ReplayOp::SetLevel { player_id, level } => self.world.set_level(&player_id, level),
            ReplayOp::Stock {
                player_id,
                item_id,
                count,
            } => self.world.stock(&player_id, &item_id, count),
            ReplayOp::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                self.engine.run_due_timers(Utc::now()).await;
            }
        }
        Ok(())
    }

    /// Apply queued commands before the next line so snapshots see them
    async fn drain(&mut self) {
        while let Ok(command) = self.outbox.try_recv() {
            info!("command: {}", serde_json::to_string(&command).unwrap_or_default());
            if let Err(e) = self.router.route(&command).await {
                warn!("Command for player {} failed: {}", command.player_id(), e);
            }
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(&PathBuf::from(path))?,
        None => EngineConfig::default(),
    };

    // Initialize logging
    let directive: tracing_subscriber::filter::Directive = config
        .log_filter
        .parse()
        .map_err(|e| QuestError::Config(format!("bad log_filter '{}': {}", config.log_filter, e)))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .init();

    // Content errors are fatal at startup
    let registry = Arc::new(QuestRegistry::new(config.data_dir.as_path()));
    registry.load_all().await?;
    info!("Quests: {}", registry.catalog().await.ids().join(", "));

    if config.hot_reload {
        match registry.start_file_watcher() {
            Ok(mut rx) => {
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        match event {
                            HotReloadEvent::Reloaded(path) => info!("Quest hot-reload: {}", path),
                            HotReloadEvent::Error(e) => error!("Quest hot-reload error: {}", e),
                        }
                    }
                });
                info!("Quest hot-reload enabled");
            }
            Err(e) => warn!("Failed to start quest hot-reload: {}", e),
        }
    }

    let store = Arc::new(SqliteStore::new(&config.database_url).await?);
    let world = Arc::new(InMemoryWorld::new(config.default_player_level));
    let router = CommandRouter::new(world.clone(), world.clone(), world.clone());
    let bus = EventBus::default();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

    let engine = Arc::new(QuestEngine::new(
        registry,
        store,
        world.clone(),
        bus.clone(),
        outbox_tx,
        config.offer_ttl(),
    ));
    engine.spawn_maintenance(config.maintenance_interval());

    let (fired_tx, fired_rx) = mpsc::unbounded_channel();
    let _ingress = bus.spawn_ingress_reporting(Arc::clone(&engine), fired_tx);

    let _quest_log = bus.subscribe_quest(|event| async move {
        info!("event: {}", serde_json::to_string(&event).unwrap_or_default());
    });

    let mut replay = Replay {
        engine,
        bus,
        fired: fired_rx,
        world,
        router,
        outbox: outbox_rx,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<ReplayOp>(line) {
            Ok(op) => {
                match replay.run(op).await {
                    Err(e) if e.is_recoverable() => warn!("line {}: {}", line_no, e),
                    Err(e) => error!("line {}: {}", line_no, e),
                    Ok(()) => {}
                }
            }
            Err(e) => error!("line {}: invalid input: {}", line_no, e),
        }
        replay.drain().await;
    }

    info!("Replay finished after {} line(s)", line_no);
    Ok(())
}
