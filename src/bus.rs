//! Event Bus
//!
//! Broadcast channel carrying world events into the engine and quest events
//! out of it. Subscribers that fall behind lose the oldest events and get a
//! warning in the log.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::{FiredRule, QuestEngine};
use crate::quest::{EventKind, QuestEvent, WorldEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "event", rename_all = "snake_case")]
pub enum BusEvent {
    World(WorldEvent),
    Quest(QuestEvent),
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers saw the event
    pub fn publish(&self, event: BusEvent) -> usize {
        // No subscribers is fine
        self.tx.send(event).unwrap_or(0)
    }

    pub fn publish_world(&self, event: WorldEvent) -> usize {
        self.publish(BusEvent::World(event))
    }

    pub fn publish_quest(&self, event: QuestEvent) -> usize {
        debug!("{} for player {} on {}", event.event_type(), event.player_id(), event.quest_id());
        self.publish(BusEvent::Quest(event))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Run `handler` for every world event of `kind`
    pub fn subscribe_kind<F, Fut>(&self, kind: EventKind, handler: F) -> JoinHandle<()>
    where
        F: Fn(WorldEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_listener(move |event| match event {
            BusEvent::World(event) if event.kind == kind => Some(event),
            _ => None,
        }, handler)
    }

    /// Run `handler` for every world event
    pub fn subscribe_world<F, Fut>(&self, handler: F) -> JoinHandle<()>
    where
        F: Fn(WorldEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_listener(
            |event| match event {
                BusEvent::World(event) => Some(event),
                _ => None,
            },
            handler,
        )
    }

    /// Run `handler` for every quest event
    pub fn subscribe_quest<F, Fut>(&self, handler: F) -> JoinHandle<()>
    where
        F: Fn(QuestEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_listener(
            |event| match event {
                BusEvent::Quest(event) => Some(event),
                _ => None,
            },
            handler,
        )
    }

    fn spawn_listener<T, S, F, Fut>(&self, select: S, handler: F) -> JoinHandle<()>
    where
        T: Send + 'static,
        S: Fn(BusEvent) -> Option<T> + Send + 'static,
        F: Fn(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(event) = select(event) {
                            handler(event).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event bus subscriber lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Feed every world event on the bus into the engine's dispatch
    pub fn spawn_ingress(&self, engine: Arc<QuestEngine>) -> JoinHandle<()> {
        self.ingress(engine, None)
    }

    /// Like [`spawn_ingress`](Self::spawn_ingress), sending the rules each
    /// event fired to `report` once its dispatch is done
    pub fn spawn_ingress_reporting(
        &self,
        engine: Arc<QuestEngine>,
        report: mpsc::UnboundedSender<Vec<FiredRule>>,
    ) -> JoinHandle<()> {
        self.ingress(engine, Some(report))
    }

    fn ingress(
        &self,
        engine: Arc<QuestEngine>,
        report: Option<mpsc::UnboundedSender<Vec<FiredRule>>>,
    ) -> JoinHandle<()> {
        self.subscribe_world(move |event| {
            let engine = Arc::clone(&engine);
            let report = report.clone();
            async move {
                let fired = engine.dispatch(&event).await;
                if let Some(report) = report {
                    let _ = report.send(fired);
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::collab::InMemoryWorld;
    use crate::quest::{QuestCatalog, QuestDefinition, QuestRegistry};
    use crate::store::MemoryStore;

    fn engine(bus: &EventBus) -> Arc<QuestEngine> {
        let definition = QuestDefinition::from_toml(
            r#"
[quest]
id = "wolf_cull"
name = "Wolf Cull"

[[quest.rules]]
trigger = { kind = "enemy_killed", target = "wolf" }
requirements = [{ kind = "quest_step", step = 1 }]
actions = [{ kind = "inc_quest_step" }]
"#,
        )
        .unwrap();
        let catalog = QuestCatalog::build(vec![definition]).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(QuestEngine::new(
            Arc::new(QuestRegistry::from_catalog(catalog)),
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryWorld::new(1)),
            bus.clone(),
            tx,
            Duration::from_secs(60),
        ))
    }

    #[tokio::test]
    async fn test_subscribe_kind_filters() {
        let bus = EventBus::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _listener = bus.subscribe_kind(EventKind::EnemyKilled, move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
            }
        });

        bus.publish_world(WorldEvent::interact("p1", "gerol"));
        bus.publish_world(WorldEvent::enemy_killed("p1", "wolf"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received, WorldEvent::enemy_killed("p1", "wolf"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.publish_world(WorldEvent::interact("p1", "gerol")), 0);

        let mut rx = bus.subscribe();
        let quest_event = QuestEvent::Given {
            player_id: "p1".to_string(),
            quest_id: "q".to_string(),
        };
        assert_eq!(bus.publish_quest(quest_event.clone()), 1);
        assert_eq!(rx.recv().await.unwrap(), BusEvent::Quest(quest_event));
    }

    #[tokio::test]
    async fn test_ingress_dispatches_world_events() {
        let bus = EventBus::default();
        let engine = engine(&bus);
        engine.give("p1", "wolf_cull").await.unwrap();
        let _ingress = bus.spawn_ingress(Arc::clone(&engine));

        bus.publish_world(WorldEvent::enemy_killed("p1", "wolf"));

        let mut step = 1;
        for _ in 0..100 {
            step = engine
                .query_instance("p1", "wolf_cull")
                .await
                .unwrap()
                .map(|i| i.step())
                .unwrap_or(0);
            if step == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(step, 2);
    }

    #[tokio::test]
    async fn test_ingress_reports_fired_rules() {
        let bus = EventBus::default();
        let engine = engine(&bus);
        engine.give("p1", "wolf_cull").await.unwrap();
        let (report_tx, mut report_rx) = mpsc::unbounded_channel();
        let _ingress = bus.spawn_ingress_reporting(Arc::clone(&engine), report_tx);

        bus.publish_world(WorldEvent::interact("p1", "gerol"));
        assert!(report_rx.recv().await.unwrap().is_empty());

        bus.publish_world(WorldEvent::enemy_killed("p1", "wolf"));
        let fired = report_rx.recv().await.unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].quest_id, "wolf_cull");
    }
}
