//! Quest Engine
//!
//! Drives quests for every player: dispatches world events through the rule
//! tables, runs the lifecycle operations, persists instances and hands the
//! resulting commands and quest events to the outside world.
//!
//! Each (player, quest) pair has a single writer at a time. Operations take
//! the pair's lock, read the stored record, apply their change and save it
//! with a version check before anything is emitted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::collab::SnapshotProvider;
use crate::command::Command;
use crate::error::{QuestError, Result};
use crate::quest::action::{self, ExecContext, LifecycleRequest, TimerRequest};
use crate::quest::condition::{self, EvalContext};
use crate::quest::{
    qualify, EventKind, InstanceKey, OfferBook, PendingOffer, PlayerSnapshot, QuestCatalog,
    QuestDefinition, QuestEvent, QuestInstance, QuestRegistry, QuestStatus, StepChange, TimerArena,
    WorldEvent,
};
use crate::store::InstanceStore;

/// A rule that fired during dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredRule {
    pub quest_id: String,
    /// Position in the quest's rule table
    pub rule_index: usize,
    pub rule_name: Option<String>,
}

/// Keyed async mutexes, one per (player, quest)
#[derive(Default)]
struct KeyLocks {
    locks: DashMap<InstanceKey, Arc<Mutex<()>>>,
}

impl KeyLocks {
    async fn lock(&self, key: &InstanceKey) -> OwnedMutexGuard<()> {
        let mutex = Arc::clone(self.locks.entry(key.clone()).or_default().value());
        mutex.lock_owned().await
    }

    /// Forget locks nobody holds or waits for
    fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Result of firing a rule, before its lifecycle requests run
struct RuleOutcome {
    fired: FiredRule,
    requests: Vec<LifecycleRequest>,
}

pub struct QuestEngine {
    registry: Arc<QuestRegistry>,
    store: Arc<dyn InstanceStore>,
    snapshots: Arc<dyn SnapshotProvider>,
    bus: EventBus,
    outbox: mpsc::UnboundedSender<Command>,
    offers: OfferBook,
    timers: TimerArena,
    locks: KeyLocks,
}

impl QuestEngine {
    pub fn new(
        registry: Arc<QuestRegistry>,
        store: Arc<dyn InstanceStore>,
        snapshots: Arc<dyn SnapshotProvider>,
        bus: EventBus,
        outbox: mpsc::UnboundedSender<Command>,
        offer_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            snapshots,
            bus,
            outbox,
            offers: OfferBook::new(offer_ttl),
            timers: TimerArena::new(),
            locks: KeyLocks::default(),
        }
    }

    pub fn registry(&self) -> &Arc<QuestRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    async fn definition(&self, quest_id: &str) -> Result<Arc<QuestDefinition>> {
        self.registry
            .get(quest_id)
            .await
            .ok_or_else(|| QuestError::UnknownQuestType(quest_id.to_string()))
    }

    /// The collaborator's view of the player with quest history from the store
    pub async fn player_snapshot(&self, player_id: &str) -> Result<PlayerSnapshot> {
        let mut snapshot = self.snapshots.player_snapshot(player_id).await?;
        snapshot.player_id = player_id.to_string();
        let history = self.store.load_player(player_id).await?;
        snapshot.apply_history(&history);
        Ok(snapshot)
    }

    fn emit(&self, commands: Vec<Command>, events: Vec<QuestEvent>) {
        for command in commands {
            if self.outbox.send(command).is_err() {
                warn!("Command outbox closed, dropping command");
            }
        }
        for event in events {
            self.bus.publish_quest(event);
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Run a world event through every quest listening for its kind.
    ///
    /// Quests are visited in id order; in each, the first rule whose trigger
    /// matches and whose requirements pass fires. A failure in one quest is
    /// logged and does not stop the others.
    pub async fn dispatch(&self, event: &WorldEvent) -> Vec<FiredRule> {
        let catalog = self.registry.catalog().await;
        let mut fired = Vec::new();
        for quest_id in catalog.quests_for(event.kind) {
            let Some(definition) = catalog.get(quest_id) else {
                continue;
            };
            match self.dispatch_quest(&catalog, definition, event).await {
                Ok(Some(rule)) => fired.push(rule),
                Ok(None) => {}
                Err(e) => warn!(
                    "Dispatch of {} for player {} failed in quest '{}': {}",
                    event.kind.as_str(),
                    event.player_id,
                    quest_id,
                    e
                ),
            }
        }
        if fired.is_empty() {
            debug!("No rule matched {} for player {}", event.kind.as_str(), event.player_id);
        }
        fired
    }

    /// Dispatch an event to a single quest
    pub async fn dispatch_for(&self, quest_id: &str, event: &WorldEvent) -> Result<Option<FiredRule>> {
        let catalog = self.registry.catalog().await;
        let definition = catalog
            .get(quest_id)
            .ok_or_else(|| QuestError::UnknownQuestType(quest_id.to_string()))?;
        self.dispatch_quest(&catalog, definition, event).await
    }

    async fn dispatch_quest(
        &self,
        catalog: &QuestCatalog,
        definition: &Arc<QuestDefinition>,
        event: &WorldEvent,
    ) -> Result<Option<FiredRule>> {
        if !definition.rules.iter().any(|r| r.trigger.matches(event)) {
            return Ok(None);
        }

        let key = InstanceKey::new(&event.player_id, &definition.id);
        let outcome = {
            let _guard = self.locks.lock(&key).await;
            match self.fire_rule(catalog, definition, event).await {
                Err(QuestError::PersistenceConflict { .. }) => {
                    debug!("Conflict on {:?}, retrying with a fresh read", key);
                    self.fire_rule(catalog, definition, event).await?
                }
                other => other?,
            }
        };

        let Some(outcome) = outcome else {
            return Ok(None);
        };
        for request in outcome.requests {
            if let Err(e) = self.apply_request(&event.player_id, request).await {
                warn!(
                    "Rule '{}' of quest '{}' could not complete for player {}: {}",
                    outcome.fired.rule_name.as_deref().unwrap_or("<unnamed>"),
                    outcome.fired.quest_id,
                    event.player_id,
                    e
                );
            }
        }
        Ok(Some(outcome.fired))
    }

    /// Select and execute a rule. Caller holds the key's lock.
    async fn fire_rule(
        &self,
        catalog: &QuestCatalog,
        definition: &QuestDefinition,
        event: &WorldEvent,
    ) -> Result<Option<RuleOutcome>> {
        let mut player = self.player_snapshot(&event.player_id).await?;
        let mut record = self.store.load(&event.player_id, &definition.id).await?;

        let selected = {
            let ctx = EvalContext {
                quest_id: &definition.id,
                player: &player,
                instance: record.as_ref().filter(|i| i.is_active()),
                event,
                catalog,
            };
            definition
                .rules
                .select(event, |rule| condition::all_pass(&rule.requirements, &ctx))
        };
        let Some((rule_index, rule)) = selected else {
            return Ok(None);
        };
        debug!(
            "Rule '{}' of quest '{}' fired for player {} on {}",
            rule.label(),
            definition.id,
            event.player_id,
            event.kind.as_str()
        );

        let before = record.clone();
        let now = Utc::now();
        let execution = action::execute(
            &rule.actions,
            &mut ExecContext {
                definition,
                rule,
                event,
                player: &mut player,
                instance: &mut record,
                now,
            },
        );

        if record != before {
            if let Some(instance) = record.as_mut() {
                instance.touch(now);
                let version = self.store.save(instance).await?;
                instance.set_version(version);
            }
        }

        let key = InstanceKey::new(&event.player_id, &definition.id);
        self.schedule_timers(&key, &execution.timers, now);
        if record.as_ref().is_some_and(|i| i.is_terminal()) {
            self.timers.cancel(&key);
        }
        self.emit(execution.commands, execution.events);

        Ok(Some(RuleOutcome {
            fired: FiredRule {
                quest_id: definition.id.clone(),
                rule_index,
                rule_name: rule.name.clone(),
            },
            requests: execution.requests,
        }))
    }

    fn schedule_timers(&self, key: &InstanceKey, timers: &[TimerRequest], now: DateTime<Utc>) {
        for timer in timers {
            debug!("Starting timer '{}' for {:?} ({:?})", timer.timer_id, key, timer.delay);
            self.timers.schedule(key.clone(), &timer.timer_id, timer.delay, now);
        }
    }

    async fn apply_request(&self, player_id: &str, request: LifecycleRequest) -> Result<()> {
        match request {
            LifecycleRequest::Offer { quest_id, text } => {
                self.create_offer(player_id, &quest_id, text).await?;
            }
            LifecycleRequest::Give { quest_id } => {
                self.give(player_id, &quest_id).await?;
            }
            LifecycleRequest::Finish { quest_id } => {
                self.finish_with(player_id, &quest_id, None).await?;
            }
            LifecycleRequest::Abort { quest_id } => {
                self.abort_quiet(player_id, &quest_id).await?;
            }
            LifecycleRequest::Step { quest_id, change } => {
                self.change_step(player_id, &quest_id, change).await?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Offer a quest to a player. Nothing is persisted until the offer is accepted.
    pub async fn offer(&self, player_id: &str, quest_id: &str) -> Result<Uuid> {
        self.create_offer(player_id, quest_id, None)
            .await
            .inspect_err(|e| warn!("Offer of '{}' to {} rejected: {}", quest_id, player_id, e))
    }

    async fn create_offer(&self, player_id: &str, quest_id: &str, text: Option<String>) -> Result<Uuid> {
        let definition = self.definition(quest_id).await?;
        let player = self.player_snapshot(player_id).await?;
        qualify(&definition, &player)?;

        let offer = self.offers.create(player_id, quest_id, text, Utc::now());
        let offer_id = offer.id.to_string();
        self.emit(
            vec![Command::OfferQuest {
                player_id: player_id.to_string(),
                quest_id: quest_id.to_string(),
                offer_id: offer_id.clone(),
                text: offer.text,
            }],
            vec![QuestEvent::Offered {
                player_id: player_id.to_string(),
                quest_id: quest_id.to_string(),
                offer_id,
            }],
        );
        Ok(offer.id)
    }

    /// Accept a pending offer: the quest starts at step 1.
    ///
    /// Qualification is checked again; content then sees an `accept_quest`
    /// event for the quest.
    pub async fn accept(&self, offer_id: Uuid) -> Result<QuestInstance> {
        let offer = self
            .offers
            .take(offer_id, Utc::now())
            .ok_or_else(|| QuestError::OfferExpired(offer_id.to_string()))?;

        let instance = self
            .give(&offer.player_id, &offer.quest_id)
            .await
            .inspect_err(|e| {
                warn!(
                    "Accept of '{}' by {} rejected: {}",
                    offer.quest_id, offer.player_id, e
                )
            })?;

        let event = self
            .quest_event(EventKind::AcceptQuest, &offer.player_id, &offer.quest_id)
            .await;
        self.dispatch(&event).await;
        Ok(instance)
    }

    /// Turn down a pending offer
    pub async fn decline(&self, offer_id: Uuid) -> Result<()> {
        let offer = self
            .offers
            .take(offer_id, Utc::now())
            .ok_or_else(|| QuestError::OfferExpired(offer_id.to_string()))?;

        info!("Player {} declined quest '{}'", offer.player_id, offer.quest_id);
        self.bus.publish_quest(QuestEvent::Declined {
            player_id: offer.player_id.clone(),
            quest_id: offer.quest_id.clone(),
        });

        let event = self
            .quest_event(EventKind::DeclineQuest, &offer.player_id, &offer.quest_id)
            .await;
        self.dispatch(&event).await;
        Ok(())
    }

    async fn quest_event(&self, kind: EventKind, player_id: &str, quest_id: &str) -> WorldEvent {
        let event = WorldEvent::new(kind, player_id).with_payload(quest_id);
        match self.registry.get(quest_id).await.and_then(|d| d.giver.clone()) {
            Some(giver) => event.with_target(&giver),
            None => event,
        }
    }

    /// Start a quest directly, bypassing the offer
    pub(crate) async fn give(&self, player_id: &str, quest_id: &str) -> Result<QuestInstance> {
        let definition = self.definition(quest_id).await?;
        let key = InstanceKey::new(player_id, quest_id);
        let _guard = self.locks.lock(&key).await;

        let mut attempt = 0;
        let instance = loop {
            let player = self.player_snapshot(player_id).await?;
            qualify(&definition, &player)?;

            let previous = self.store.load(player_id, quest_id).await?;
            let mut instance =
                QuestInstance::start(&definition, player_id, previous.as_ref(), Utc::now());
            match self.store.save(&instance).await {
                Ok(version) => {
                    instance.set_version(version);
                    break instance;
                }
                Err(QuestError::PersistenceConflict { .. }) if attempt == 0 => attempt += 1,
                Err(e) => return Err(e),
            }
        };

        info!("Player {} started quest '{}'", player_id, quest_id);
        self.bus.publish_quest(QuestEvent::Given {
            player_id: player_id.to_string(),
            quest_id: quest_id.to_string(),
        });
        Ok(instance)
    }

    /// Load, change and save an instance under its lock, retrying once on a
    /// version conflict. `apply` returns its output and whether it changed
    /// anything; unchanged instances are not written.
    async fn update_instance<T, F>(
        &self,
        player_id: &str,
        quest_id: &str,
        mut apply: F,
    ) -> Result<(QuestInstance, T)>
    where
        F: FnMut(&mut QuestInstance) -> Result<(T, bool)> + Send,
        T: Send,
    {
        let key = InstanceKey::new(player_id, quest_id);
        let _guard = self.locks.lock(&key).await;

        let mut attempt = 0;
        loop {
            let mut instance = self.store.load(player_id, quest_id).await?.ok_or_else(|| {
                QuestError::NoInstance {
                    player_id: player_id.to_string(),
                    quest_id: quest_id.to_string(),
                }
            })?;
            let (output, changed) = apply(&mut instance)?;
            if !changed {
                return Ok((instance, output));
            }
            instance.touch(Utc::now());
            match self.store.save(&instance).await {
                Ok(version) => {
                    instance.set_version(version);
                    return Ok((instance, output));
                }
                Err(QuestError::PersistenceConflict { .. }) if attempt == 0 => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    pub(crate) async fn change_step(
        &self,
        player_id: &str,
        quest_id: &str,
        change: StepChange,
    ) -> Result<QuestInstance> {
        let (instance, (from, to)) = self
            .update_instance(player_id, quest_id, |instance| {
                let (from, to) = instance.advance_step(change)?;
                Ok(((from, to), from != to))
            })
            .await?;
        if from != to {
            self.bus.publish_quest(QuestEvent::StepChanged {
                player_id: player_id.to_string(),
                quest_id: quest_id.to_string(),
                from,
                to,
            });
        }
        Ok(instance)
    }

    /// Finish a quest and grant its fixed rewards. Finishing twice is a no-op.
    pub async fn finish(&self, player_id: &str, quest_id: &str) -> Result<QuestInstance> {
        self.finish_with(player_id, quest_id, None).await
    }

    /// Finish with a choice of optional rewards. Every goal must be achieved.
    pub async fn choose_rewards(
        &self,
        player_id: &str,
        quest_id: &str,
        choices: &[usize],
    ) -> Result<QuestInstance> {
        self.finish_with(player_id, quest_id, Some(choices))
            .await
            .inspect_err(|e| {
                warn!("Reward choice on '{}' by {} rejected: {}", quest_id, player_id, e)
            })
    }

    async fn finish_with(
        &self,
        player_id: &str,
        quest_id: &str,
        choices: Option<&[usize]>,
    ) -> Result<QuestInstance> {
        let definition = self.definition(quest_id).await?;
        let (instance, commands) = self
            .update_instance(player_id, quest_id, |instance| {
                let chosen: &[usize] = match choices {
                    None => &[],
                    Some(choices) => {
                        if instance.is_terminal() {
                            return Err(QuestError::InstanceTerminal {
                                player_id: player_id.to_string(),
                                quest_id: quest_id.to_string(),
                            });
                        }
                        if !instance.all_goals_achieved() {
                            return Err(QuestError::GoalsIncomplete {
                                quest_id: quest_id.to_string(),
                            });
                        }
                        definition.rewards.validate_choice(choices)?;
                        choices
                    }
                };
                let commands = instance.finish(&definition.rewards, chosen, Utc::now())?;
                let changed = commands.is_some();
                Ok((commands, changed))
            })
            .await?;

        if let Some(commands) = commands {
            info!("Player {} finished quest '{}'", player_id, quest_id);
            self.timers.cancel(&instance.key());
            self.emit(
                commands,
                vec![QuestEvent::Finished {
                    player_id: player_id.to_string(),
                    quest_id: quest_id.to_string(),
                }],
            );
        }
        Ok(instance)
    }

    /// Abort a quest: items it handed out are taken back and its timers stop.
    ///
    /// Content sees an `abort_quest` event first, while the quest is still in
    /// progress. If a rule aborts the quest itself, that result is returned.
    pub async fn abort(&self, player_id: &str, quest_id: &str) -> Result<QuestInstance> {
        let current = self.store.load(player_id, quest_id).await?.ok_or_else(|| {
            QuestError::NoInstance {
                player_id: player_id.to_string(),
                quest_id: quest_id.to_string(),
            }
        })?;
        if current.is_terminal() {
            return Err(QuestError::InstanceTerminal {
                player_id: player_id.to_string(),
                quest_id: quest_id.to_string(),
            });
        }

        let event = self.quest_event(EventKind::AbortQuest, player_id, quest_id).await;
        self.dispatch(&event).await;

        match self.store.load(player_id, quest_id).await? {
            Some(instance) if instance.status() == QuestStatus::Aborted => Ok(instance),
            _ => self.abort_quiet(player_id, quest_id).await,
        }
    }

    async fn abort_quiet(&self, player_id: &str, quest_id: &str) -> Result<QuestInstance> {
        let (instance, commands) = self
            .update_instance(player_id, quest_id, |instance| {
                let commands = instance.abort(Utc::now())?;
                Ok((commands, true))
            })
            .await?;

        info!("Player {} aborted quest '{}'", player_id, quest_id);
        self.timers.cancel(&instance.key());
        self.emit(
            commands,
            vec![QuestEvent::Aborted {
                player_id: player_id.to_string(),
                quest_id: quest_id.to_string(),
            }],
        );
        Ok(instance)
    }

    /// Delete a finished or aborted record. Returns whether one existed.
    pub async fn purge(&self, player_id: &str, quest_id: &str) -> Result<bool> {
        let key = InstanceKey::new(player_id, quest_id);
        let _guard = self.locks.lock(&key).await;

        match self.store.load(player_id, quest_id).await? {
            None => Ok(false),
            Some(instance) if !instance.is_terminal() => Err(QuestError::AlreadyActive {
                player_id: player_id.to_string(),
                quest_id: quest_id.to_string(),
            }),
            Some(_) => {
                self.timers.cancel(&key);
                self.store.delete(player_id, quest_id).await
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn query_instance(&self, player_id: &str, quest_id: &str) -> Result<Option<QuestInstance>> {
        self.store.load(player_id, quest_id).await
    }

    /// Journal text for the player's current step of an active quest
    pub async fn query_step_description(&self, player_id: &str, quest_id: &str) -> Result<Option<String>> {
        let definition = self.definition(quest_id).await?;
        let instance = self.store.load(player_id, quest_id).await?;
        Ok(instance
            .filter(|i| i.is_active())
            .and_then(|i| definition.step_description(i.step()).map(str::to_string)))
    }

    pub fn pending_offers(&self, player_id: &str) -> Vec<PendingOffer> {
        self.offers.pending_for(player_id)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop expired offers, publishing `OfferExpired` for each
    pub fn sweep_offers(&self, now: DateTime<Utc>) -> Vec<PendingOffer> {
        let expired = self.offers.sweep(now);
        for offer in &expired {
            debug!("Offer {} of '{}' to {} expired", offer.id, offer.quest_id, offer.player_id);
            self.bus.publish_quest(QuestEvent::OfferExpired {
                player_id: offer.player_id.clone(),
                quest_id: offer.quest_id.clone(),
                offer_id: offer.id.to_string(),
            });
        }
        expired
    }

    /// Fire every timer due at `now` into its quest
    pub async fn run_due_timers(&self, now: DateTime<Utc>) -> Vec<FiredRule> {
        let mut fired = Vec::new();
        for due in self.timers.take_due(now) {
            let event = WorldEvent::timer(&due.key.player_id, &due.timer_id);
            match self.dispatch_for(&due.key.quest_id, &event).await {
                Ok(Some(rule)) => fired.push(rule),
                Ok(None) => debug!("Timer '{}' for {:?} matched no rule", due.timer_id, due.key),
                Err(e) => warn!("Timer '{}' for {:?} failed: {}", due.timer_id, due.key, e),
            }
        }
        fired
    }

    /// Periodically sweep offers, fire due timers and prune idle locks
    pub fn spawn_maintenance(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let now = Utc::now();
                engine.sweep_offers(now);
                engine.run_due_timers(now).await;
                engine.locks.prune();
            }
        })
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
