//! SQLite instance store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::InstanceStore;
use crate::error::{QuestError, Result};
use crate::quest::{QuestInstance, QuestStatus};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quest_instances (
                player_id TEXT NOT NULL,
                quest_id TEXT NOT NULL,
                step INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                goals_json TEXT NOT NULL DEFAULT '[]',
                granted_json TEXT NOT NULL DEFAULT '[]',
                completions INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                finished_at TEXT,
                PRIMARY KEY(player_id, quest_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        tracing::info!("Database migrations complete");
        Ok(())
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| QuestError::Storage(format!("bad timestamp '{}': {}", value, e)))
}

fn row_to_instance(r: &SqliteRow) -> Result<QuestInstance> {
    let status: String = r.try_get("status")?;
    let status = QuestStatus::from_str(&status)
        .ok_or_else(|| QuestError::Storage(format!("unknown status '{}'", status)))?;
    let goals_json: String = r.try_get("goals_json")?;
    let granted_json: String = r.try_get("granted_json")?;
    let completions: i64 = r.try_get("completions")?;
    let version: i64 = r.try_get("version")?;
    let created_at: String = r.try_get("created_at")?;
    let updated_at: String = r.try_get("updated_at")?;
    let finished_at: Option<String> = r.try_get("finished_at")?;

    Ok(QuestInstance::restore(
        r.try_get("quest_id")?,
        r.try_get("player_id")?,
        r.try_get("step")?,
        status,
        serde_json::from_str(&goals_json)?,
        serde_json::from_str(&granted_json)?,
        completions.max(0) as u32,
        version.max(0) as u64,
        parse_time(&created_at)?,
        parse_time(&updated_at)?,
        finished_at.as_deref().map(parse_time).transpose()?,
    ))
}

const COLUMNS: &str = "player_id, quest_id, step, status, goals_json, granted_json, \
                       completions, version, created_at, updated_at, finished_at";

#[async_trait]
impl InstanceStore for SqliteStore {
    async fn load(&self, player_id: &str, quest_id: &str) -> Result<Option<QuestInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM quest_instances WHERE player_id = ? AND quest_id = ?",
            COLUMNS
        ))
        .bind(player_id)
        .bind(quest_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_instance).transpose()
    }

    async fn load_player(&self, player_id: &str) -> Result<Vec<QuestInstance>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM quest_instances WHERE player_id = ? ORDER BY quest_id",
            COLUMNS
        ))
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_instance).collect()
    }

    async fn save(&self, instance: &QuestInstance) -> Result<u64> {
        let expected = instance.version();
        let next = expected + 1;
        let goals_json = serde_json::to_string(instance.goals())?;
        let granted_json = serde_json::to_string(instance.granted_items())?;
        let finished_at = instance.finished_at().map(|t| t.to_rfc3339());

        let result = if expected == 0 {
            sqlx::query(&format!(
                "INSERT INTO quest_instances ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(player_id, quest_id) DO NOTHING",
                COLUMNS
            ))
            .bind(instance.owner_id())
            .bind(instance.quest_id())
            .bind(instance.step())
            .bind(instance.status().as_str())
            .bind(&goals_json)
            .bind(&granted_json)
            .bind(instance.completions() as i64)
            .bind(next as i64)
            .bind(instance.created_at().to_rfc3339())
            .bind(instance.updated_at().to_rfc3339())
            .bind(&finished_at)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"UPDATE quest_instances SET
                    step = ?, status = ?, goals_json = ?, granted_json = ?,
                    completions = ?, version = ?, created_at = ?, updated_at = ?,
                    finished_at = ?
                WHERE player_id = ? AND quest_id = ? AND version = ?"#,
            )
            .bind(instance.step())
            .bind(instance.status().as_str())
            .bind(&goals_json)
            .bind(&granted_json)
            .bind(instance.completions() as i64)
            .bind(next as i64)
            .bind(instance.created_at().to_rfc3339())
            .bind(instance.updated_at().to_rfc3339())
            .bind(&finished_at)
            .bind(instance.owner_id())
            .bind(instance.quest_id())
            .bind(expected as i64)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            return Err(QuestError::PersistenceConflict {
                player_id: instance.owner_id().to_string(),
                quest_id: instance.quest_id().to_string(),
            });
        }
        Ok(next)
    }

    async fn delete(&self, player_id: &str, quest_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM quest_instances WHERE player_id = ? AND quest_id = ?")
            .bind(player_id)
            .bind(quest_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::{QuestDefinition, StepChange};
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> SqliteStore {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("quests.db").display());
        SqliteStore::new(&url).await.unwrap()
    }

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
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_and_conflict() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let def = definition();

        let mut instance = QuestInstance::start(&def, "p1", None, Utc::now());
        instance.advance_step(StepChange::Increment).unwrap();
        instance.advance_goal("boars").unwrap();
        instance.record_grant("carcass", 1);

        let version = store.save(&instance).await.unwrap();
        assert_eq!(version, 1);
        assert!(matches!(
            store.save(&instance).await,
            Err(QuestError::PersistenceConflict { .. })
        ));

        let mut loaded = store.load("p1", "boar_stew").await.unwrap().unwrap();
        assert_eq!(loaded.step(), 2);
        assert_eq!(loaded.status(), QuestStatus::Active);
        assert_eq!(loaded.goal("boars").map(|g| g.current), Some(1));
        assert_eq!(loaded.granted_items().len(), 1);
        assert_eq!(loaded.version(), 1);

        loaded.abort(Utc::now()).unwrap();
        assert_eq!(store.save(&loaded).await.unwrap(), 2);

        let records = store.load_player("p1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status(), QuestStatus::Aborted);
        assert!(records[0].finished_at().is_some());

        assert!(store.delete("p1", "boar_stew").await.unwrap());
        assert!(!store.delete("p1", "boar_stew").await.unwrap());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let def = definition();
        {
            let store = open_store(&dir).await;
            let instance = QuestInstance::start(&def, "p1", None, Utc::now());
            store.save(&instance).await.unwrap();
        }
        let store = open_store(&dir).await;
        assert!(store.load("p1", "boar_stew").await.unwrap().is_some());
        assert!(store.load("p2", "boar_stew").await.unwrap().is_none());
    }
}
