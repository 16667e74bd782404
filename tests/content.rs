//! The shipped quest content, played through with the commands routed back
//! into the in-memory world

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use quest_engine::collab::{CommandRouter, InMemoryWorld};
use quest_engine::quest::{QuestRegistry, QuestStatus, WorldEvent};
use quest_engine::store::MemoryStore;
use quest_engine::{Command, EventBus, QuestEngine};

async fn route_all(router: &CommandRouter, rx: &mut mpsc::UnboundedReceiver<Command>) {
    while let Ok(command) = rx.try_recv() {
        router.route(&command).await.unwrap();
    }
}

#[tokio::test]
async fn test_shipped_quests_play_through() {
    let registry = Arc::new(QuestRegistry::new(
        &Path::new(env!("CARGO_MANIFEST_DIR")).join("data"),
    ));
    assert_eq!(registry.load_all().await.unwrap(), 2);

    let world = Arc::new(InMemoryWorld::new(1));
    let router = CommandRouter::new(world.clone(), world.clone(), world.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = QuestEngine::new(
        registry,
        Arc::new(MemoryStore::new()),
        world.clone(),
        EventBus::default(),
        tx,
        Duration::from_secs(60),
    );

    // Gerol offers the stew quest
    let fired = engine.dispatch(&WorldEvent::interact("p1", "gerol")).await;
    assert_eq!(fired.len(), 1);
    let offers = engine.pending_offers("p1");
    assert_eq!(offers.len(), 1);
    engine.accept(offers[0].id).await.unwrap();
    route_all(&router, &mut rx).await;

    engine.dispatch(&WorldEvent::enemy_killed("p1", "Huge Boar")).await;
    route_all(&router, &mut rx).await;
    assert_eq!(world.item_count("p1", "boar_carcass"), 1);

    let fired = engine
        .dispatch(&WorldEvent::give_item("p1", "gerol", "boar_carcass"))
        .await;
    assert_eq!(fired[0].rule_name.as_deref(), Some("deliver"));
    route_all(&router, &mut rx).await;
    assert_eq!(world.item_count("p1", "boar_carcass"), 0);

    let stew = engine.choose_rewards("p1", "boar_stew", &[1]).await.unwrap();
    assert_eq!(stew.status(), QuestStatus::Finished);
    route_all(&router, &mut rx).await;
    assert_eq!(world.xp("p1"), 120);
    assert_eq!(world.gold("p1"), 15);
    assert_eq!(world.item_count("p1", "hunting_knife"), 1);

    // The letter needs level 2 and the finished stew
    assert!(engine.offer("p1", "sealed_letter").await.is_err());
    world.set_level("p1", 2);
    world.stock("p1", "letter", 1);
    let offer = engine.offer("p1", "sealed_letter").await.unwrap();
    engine.accept(offer).await.unwrap();
    route_all(&router, &mut rx).await;

    engine.dispatch(&WorldEvent::whisper("p1", "mara", "SEAL")).await;
    route_all(&router, &mut rx).await;
    assert_eq!(world.item_count("p1", "sealed_letter"), 1);

    engine
        .dispatch(&WorldEvent::give_item("p1", "captain", "sealed_letter"))
        .await;
    route_all(&router, &mut rx).await;

    let letter = engine.query_instance("p1", "sealed_letter").await.unwrap().unwrap();
    assert_eq!(letter.status(), QuestStatus::Finished);
    assert_eq!(world.item_count("p1", "sealed_letter"), 0);
    assert_eq!(world.xp("p1"), 200);
}
