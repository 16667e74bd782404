//! Quest Registry
//!
//! Loads quest definitions from TOML files into an immutable catalog.
//! A reload builds a whole new catalog and swaps it in; readers holding the
//! old one keep a consistent view. Supports hot-reloading during development.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::definition::{QuestDefinition, RawQuestFile};
use super::events::EventKind;
use crate::error::{QuestError, Result};

/// Immutable set of quest definitions indexed for dispatch
#[derive(Debug, Default)]
pub struct QuestCatalog {
    quests: HashMap<String, Arc<QuestDefinition>>,
    /// Trigger kind -> quests with a rule for it, sorted by id
    by_trigger: HashMap<EventKind, Vec<String>>,
}

impl QuestCatalog {
    /// Build a catalog, checking references between quests
    pub fn build(definitions: Vec<QuestDefinition>) -> Result<Self> {
        let mut quests = HashMap::new();
        for definition in definitions {
            if quests.contains_key(&definition.id) {
                return Err(QuestError::Content(format!(
                    "quest '{}' defined twice",
                    definition.id
                )));
            }
            quests.insert(definition.id.clone(), Arc::new(definition));
        }

        for quest in quests.values() {
            for prerequisite in &quest.prerequisites {
                if !quests.contains_key(prerequisite) {
                    return Err(QuestError::Content(format!(
                        "quest '{}' requires unknown quest '{}'",
                        quest.id, prerequisite
                    )));
                }
            }
            for rule in quest.rules.iter() {
                if let Some(unknown) = rule
                    .referenced_quests()
                    .into_iter()
                    .find(|q| !quests.contains_key(*q))
                {
                    return Err(QuestError::Content(format!(
                        "quest '{}', rule '{}': unknown quest '{}'",
                        quest.id,
                        rule.label(),
                        unknown
                    )));
                }
            }
        }

        let mut index: BTreeMap<EventKind, Vec<String>> = BTreeMap::new();
        for quest in quests.values() {
            for kind in quest.rules.trigger_kinds() {
                index.entry(kind).or_default().push(quest.id.clone());
            }
        }
        let by_trigger = index
            .into_iter()
            .map(|(kind, mut ids)| {
                ids.sort();
                (kind, ids)
            })
            .collect();

        Ok(Self { quests, by_trigger })
    }

    pub fn get(&self, quest_id: &str) -> Option<&Arc<QuestDefinition>> {
        self.quests.get(quest_id)
    }

    pub fn contains(&self, quest_id: &str) -> bool {
        self.quests.contains_key(quest_id)
    }

    /// Quests with at least one rule triggered by `kind`, in id order
    pub fn quests_for(&self, kind: EventKind) -> &[String] {
        self.by_trigger.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Quests given by an NPC, in id order
    pub fn given_by(&self, npc_id: &str) -> Vec<Arc<QuestDefinition>> {
        let mut quests: Vec<_> = self
            .quests
            .values()
            .filter(|q| q.giver.as_deref().is_some_and(|g| g.eq_ignore_ascii_case(npc_id)))
            .cloned()
            .collect();
        quests.sort_by(|a, b| a.id.cmp(&b.id));
        quests
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.quests.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.quests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quests.is_empty()
    }
}

/// Registry for all quest definitions
pub struct QuestRegistry {
    catalog: RwLock<Arc<QuestCatalog>>,
    /// Base directory for quest data
    data_dir: PathBuf,
}

impl QuestRegistry {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(QuestCatalog::default())),
            data_dir: data_dir.join("quests"),
        }
    }

    /// A registry serving a prebuilt catalog, with no backing directory
    pub fn from_catalog(catalog: QuestCatalog) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(catalog)),
            data_dir: PathBuf::new(),
        }
    }

    /// Load all quest definitions from the data directory.
    ///
    /// Any malformed file fails the whole load and the previous catalog
    /// stays in place.
    pub async fn load_all(&self) -> Result<usize> {
        info!("Loading quests from {:?}", self.data_dir);

        if !self.data_dir.exists() {
            warn!("Quest directory does not exist: {:?}", self.data_dir);
            return Ok(0);
        }

        let mut paths = Vec::new();
        collect_toml_files(&self.data_dir, &mut paths)?;
        paths.sort();

        let mut definitions = Vec::with_capacity(paths.len());
        for path in &paths {
            let definition = load_quest_file(path)?;
            info!("Loaded quest: {} ({})", definition.name, definition.id);
            definitions.push(definition);
        }

        let catalog = QuestCatalog::build(definitions)?;
        let count = catalog.len();
        self.install(catalog).await;
        info!("Loaded {} quest definitions", count);
        Ok(count)
    }

    /// Swap in a new catalog
    pub async fn install(&self, catalog: QuestCatalog) {
        *self.catalog.write().await = Arc::new(catalog);
    }

    /// The current catalog
    pub async fn catalog(&self) -> Arc<QuestCatalog> {
        Arc::clone(&*self.catalog.read().await)
    }

    /// Get a quest by ID
    pub async fn get(&self, quest_id: &str) -> Option<Arc<QuestDefinition>> {
        self.catalog.read().await.get(quest_id).cloned()
    }

    /// Get count of loaded quests
    pub async fn count(&self) -> usize {
        self.catalog.read().await.len()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Start file watcher for hot-reload
    /// Returns a channel receiver that signals when reloads occur
    pub fn start_file_watcher(self: &Arc<Self>) -> Result<tokio::sync::mpsc::Receiver<HotReloadEvent>> {
        use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
        use std::time::Duration;

        if !self.data_dir.exists() {
            return Err(QuestError::Config(format!(
                "cannot watch missing quest directory {:?}",
                self.data_dir
            )));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let registry = Arc::clone(self);
        let data_dir = self.data_dir.clone();
        let rt = tokio::runtime::Handle::current();

        std::thread::spawn(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = match RecommendedWatcher::new(
                move |res: std::result::Result<notify::Event, notify::Error>| {
                    if let Ok(event) = res {
                        let _ = notify_tx.send(event);
                    }
                },
                Config::default().with_poll_interval(Duration::from_secs(1)),
            ) {
                Ok(w) => w,
                Err(e) => {
                    error!("Failed to create file watcher: {}", e);
                    return;
                }
            };

            if let Err(e) = watcher.watch(&data_dir, RecursiveMode::Recursive) {
                error!("Failed to watch quest directory: {}", e);
                return;
            }

            info!("Quest hot-reload watcher started for {:?}", data_dir);

            while let Ok(event) = notify_rx.recv() {
                use notify::EventKind as FsEventKind;
                if !matches!(
                    event.kind,
                    FsEventKind::Modify(_) | FsEventKind::Create(_) | FsEventKind::Remove(_)
                ) {
                    continue;
                }
                let Some(path) = event
                    .paths
                    .iter()
                    .find(|p| p.extension().is_some_and(|ext| ext == "toml"))
                    .cloned()
                else {
                    continue;
                };

                info!("Detected change in {:?}, triggering reload", path);
                let registry = Arc::clone(&registry);
                let tx = tx.clone();
                rt.spawn(async move {
                    match registry.load_all().await {
                        Ok(_) => {
                            info!("Hot-reload completed successfully");
                            let _ = tx
                                .send(HotReloadEvent::Reloaded(path.to_string_lossy().to_string()))
                                .await;
                        }
                        Err(e) => {
                            error!("Hot-reload failed, keeping previous quests: {}", e);
                            let _ = tx.send(HotReloadEvent::Error(e.to_string())).await;
                        }
                    }
                });
            }
        });

        Ok(rx)
    }
}

/// Recursively collect quest files
fn collect_toml_files(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| QuestError::Io(format!("Failed to read directory {:?}: {}", dir, e)))?;

    for entry in entries {
        let path = entry
            .map_err(|e| QuestError::Io(format!("Failed to read entry: {}", e)))?
            .path();

        if path.is_dir() {
            collect_toml_files(&path, paths)?;
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }

    Ok(())
}

fn load_quest_file(path: &Path) -> Result<QuestDefinition> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| QuestError::Io(format!("Failed to read {:?}: {}", path, e)))?;

    let raw: RawQuestFile = toml::from_str(&content)
        .map_err(|e| QuestError::Content(format!("Failed to parse {:?}: {}", path, e)))?;

    QuestDefinition::from_raw(raw.quest)
        .map_err(|e| QuestError::Content(format!("{:?}: {}", path, e)))
}

/// Events from the hot-reload watcher
#[derive(Debug, Clone)]
pub enum HotReloadEvent {
    /// A file change was picked up
    Reloaded(String),
    /// The reload was rejected
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const INTRO: &str = r#"
[quest]
id = "intro"
name = "Intro"
giver = "Gerol"

[[quest.rules]]
trigger = { kind = "interact", target = "gerol" }
requirements = [{ kind = "quest_givable" }]
actions = [{ kind = "offer_quest" }]
"#;

    const SEQUEL: &str = r#"
[quest]
id = "sequel"
name = "Sequel"
prerequisites = ["intro"]

[[quest.rules]]
trigger = { kind = "interact", target = "gerol" }
requirements = [{ kind = "finished_count", quest = "intro", comparator = "ge", count = 1 }]
actions = [{ kind = "offer_quest" }]

[[quest.rules]]
trigger = { kind = "enemy_killed", target = "wolf" }
actions = [{ kind = "inc_quest_step" }]
"#;

    fn write_quests(files: &[(&str, &str)]) -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let quest_dir = temp_dir.path().join("quests").join("chapter1");
        std::fs::create_dir_all(&quest_dir).unwrap();
        for (name, content) in files {
            std::fs::write(quest_dir.join(name), content).unwrap();
        }
        temp_dir
    }

    #[tokio::test]
    async fn test_load_quests_and_index() {
        let temp_dir = write_quests(&[("intro.toml", INTRO), ("sequel.toml", SEQUEL)]);

        let registry = QuestRegistry::new(temp_dir.path());
        assert_eq!(registry.load_all().await.unwrap(), 2);

        let catalog = registry.catalog().await;
        assert_eq!(catalog.quests_for(EventKind::Interact), ["intro", "sequel"]);
        assert_eq!(catalog.quests_for(EventKind::EnemyKilled), ["sequel"]);
        assert!(catalog.quests_for(EventKind::Whisper).is_empty());
        assert_eq!(catalog.given_by("gerol").len(), 1);
        assert_eq!(registry.get("sequel").await.unwrap().prerequisites, ["intro"]);
    }

    #[tokio::test]
    async fn test_bad_reload_keeps_previous_catalog() {
        let temp_dir = write_quests(&[("intro.toml", INTRO)]);
        let registry = QuestRegistry::new(temp_dir.path());
        registry.load_all().await.unwrap();

        // sequel without intro -> unknown reference
        let quest_dir = temp_dir.path().join("quests").join("chapter1");
        std::fs::remove_file(quest_dir.join("intro.toml")).unwrap();
        std::fs::write(quest_dir.join("sequel.toml"), SEQUEL).unwrap();

        let err = registry.load_all().await.unwrap_err();
        assert!(matches!(err, QuestError::Content(_)));
        assert_eq!(registry.count().await, 1);
        assert!(registry.get("intro").await.is_some());
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let registry = QuestRegistry::new(temp_dir.path());
        assert_eq!(registry.load_all().await.unwrap(), 0);
        assert_eq!(registry.count().await, 0);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let a = QuestDefinition::from_toml(INTRO).unwrap();
        let b = QuestDefinition::from_toml(INTRO).unwrap();
        assert!(QuestCatalog::build(vec![a, b]).is_err());
    }
}
