//! Model registry persistence.
//!
//! Rows are only mutated by the lifecycle manager and the training
//! consumer; everything else reads. The active-swap status writes happen
//! inside one transaction so readers never observe two Active rows for a
//! family.

use crate::models::{MlModel, ModelFamily, ModelStatus, ModelVersion};
use crate::store::db::Db;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Row};
use std::collections::HashMap;

#[derive(Clone)]
pub struct ModelRegistry {
    db: Db,
}

impl ModelRegistry {
    pub async fn new(db: Db) -> Result<Self> {
        {
            let conn = db.lock().await;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS ml_models (
                    id TEXT PRIMARY KEY,
                    family TEXT NOT NULL,
                    version_major INTEGER NOT NULL,
                    version_minor INTEGER NOT NULL,
                    version_patch INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    algorithm TEXT NOT NULL,
                    metrics TEXT NOT NULL,
                    trained_at INTEGER NOT NULL,
                    deployed_at INTEGER,
                    artifact_path TEXT NOT NULL,
                    training_job_id TEXT,
                    metadata TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_ml_models_family_status
                 ON ml_models(family, status)",
                [],
            )?;
        }
        Ok(Self { db })
    }

    pub async fn insert(&self, model: &MlModel) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO ml_models (
                id, family, version_major, version_minor, version_patch,
                status, algorithm, metrics, trained_at, deployed_at,
                artifact_path, training_job_id, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                model.id,
                model.family.as_str(),
                model.version.major,
                model.version.minor,
                model.version.patch,
                model.status.as_str(),
                model.algorithm,
                serde_json::to_string(&model.metrics)?,
                model.trained_at.timestamp(),
                model.deployed_at.map(|t| t.timestamp()),
                model.artifact_path,
                model.training_job_id,
                serde_json::to_string(&model.metadata)?,
            ],
        )
        .context("insert ml model")?;
        Ok(())
    }

    /// Full-row update, used by the training consumer after a retrain.
    pub async fn update(&self, model: &MlModel) -> Result<()> {
        let conn = self.db.lock().await;
        let changed = conn.execute(
            "UPDATE ml_models SET
                family = ?2, version_major = ?3, version_minor = ?4,
                version_patch = ?5, status = ?6, algorithm = ?7, metrics = ?8,
                trained_at = ?9, deployed_at = ?10, artifact_path = ?11,
                training_job_id = ?12, metadata = ?13
             WHERE id = ?1",
            params![
                model.id,
                model.family.as_str(),
                model.version.major,
                model.version.minor,
                model.version.patch,
                model.status.as_str(),
                model.algorithm,
                serde_json::to_string(&model.metrics)?,
                model.trained_at.timestamp(),
                model.deployed_at.map(|t| t.timestamp()),
                model.artifact_path,
                model.training_job_id,
                serde_json::to_string(&model.metadata)?,
            ],
        )?;
        anyhow::ensure!(changed == 1, "model {} not found", model.id);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<MlModel>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached("SELECT * FROM ml_models WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_model(row)?)),
            None => Ok(None),
        }
    }

    /// The currently serving model for a family, if any.
    pub async fn active_for(&self, family: ModelFamily) -> Result<Option<MlModel>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM ml_models WHERE family = ?1 AND status = 'active'
             ORDER BY deployed_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![family.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_model(row)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self, family: Option<ModelFamily>) -> Result<Vec<MlModel>> {
        let conn = self.db.lock().await;
        let mut out = Vec::new();
        match family {
            Some(f) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT * FROM ml_models WHERE family = ?1 ORDER BY trained_at DESC",
                )?;
                let mut rows = stmt.query(params![f.as_str()])?;
                while let Some(row) = rows.next()? {
                    out.push(row_to_model(row)?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare_cached("SELECT * FROM ml_models ORDER BY trained_at DESC")?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    out.push(row_to_model(row)?);
                }
            }
        }
        Ok(out)
    }

    /// Active models whose training date is older than the cutoff. Feeds
    /// the staleness sweep.
    pub async fn active_trained_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<MlModel>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM ml_models WHERE status = 'active' AND trained_at < ?1",
        )?;
        let mut rows = stmt.query(params![cutoff.timestamp()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_model(row)?);
        }
        Ok(out)
    }

    pub async fn set_status(&self, id: &str, status: ModelStatus) -> Result<()> {
        let conn = self.db.lock().await;
        let changed = conn.execute(
            "UPDATE ml_models SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        anyhow::ensure!(changed == 1, "model {} not found", id);
        Ok(())
    }

    /// Atomically demote the family's current Active rows and promote
    /// `new_id`. Returns the ids that were demoted. The new model's
    /// `deployed_at` is set only if not already set.
    pub async fn promote_active(&self, new_id: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;

        let family: String = tx
            .query_row(
                "SELECT family FROM ml_models WHERE id = ?1",
                params![new_id],
                |row| row.get(0),
            )
            .context("promoted model not found")?;

        let mut demoted = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id FROM ml_models
                 WHERE family = ?1 AND status = 'active' AND id != ?2",
            )?;
            let mut rows = stmt.query(params![family, new_id])?;
            while let Some(row) = rows.next()? {
                demoted.push(row.get::<_, String>(0)?);
            }
        }

        tx.execute(
            "UPDATE ml_models SET status = 'deprecated'
             WHERE family = ?1 AND status = 'active' AND id != ?2",
            params![family, new_id],
        )?;
        tx.execute(
            "UPDATE ml_models SET status = 'active',
                 deployed_at = COALESCE(deployed_at, ?2)
             WHERE id = ?1",
            params![new_id, now.timestamp()],
        )?;

        tx.commit()?;
        Ok(demoted)
    }

    /// Highest version recorded for a family, for minor bumps on retrain.
    pub async fn max_version(&self, family: ModelFamily) -> Result<Option<ModelVersion>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT version_major, version_minor, version_patch FROM ml_models
             WHERE family = ?1
             ORDER BY version_major DESC, version_minor DESC, version_patch DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query(params![family.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(ModelVersion::new(row.get(0)?, row.get(1)?, row.get(2)?))),
            None => Ok(None),
        }
    }
}

fn row_to_model(row: &Row<'_>) -> Result<MlModel> {
    let family_raw: String = row.get("family")?;
    let status_raw: String = row.get("status")?;
    let metrics_raw: String = row.get("metrics")?;
    let metadata_raw: String = row.get("metadata")?;
    let trained_at: i64 = row.get("trained_at")?;
    let deployed_at: Option<i64> = row.get("deployed_at")?;

    Ok(MlModel {
        id: row.get("id")?,
        family: ModelFamily::parse(&family_raw)
            .with_context(|| format!("unknown model family {family_raw}"))?,
        version: ModelVersion::new(
            row.get("version_major")?,
            row.get("version_minor")?,
            row.get("version_patch")?,
        ),
        status: ModelStatus::parse(&status_raw)
            .with_context(|| format!("unknown model status {status_raw}"))?,
        algorithm: row.get("algorithm")?,
        metrics: serde_json::from_str::<HashMap<String, f64>>(&metrics_raw)?,
        trained_at: Utc
            .timestamp_opt(trained_at, 0)
            .single()
            .context("bad trained_at timestamp")?,
        deployed_at: deployed_at
            .map(|t| Utc.timestamp_opt(t, 0).single().context("bad deployed_at"))
            .transpose()?,
        artifact_path: row.get("artifact_path")?,
        training_job_id: row.get("training_job_id")?,
        metadata: serde_json::from_str::<HashMap<String, String>>(&metadata_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelStatus;

    fn sample(family: ModelFamily, version: ModelVersion, status: ModelStatus) -> MlModel {
        MlModel {
            id: uuid::Uuid::new_v4().to_string(),
            family,
            version,
            status,
            algorithm: "ridge_regression".into(),
            metrics: HashMap::from([("r2".to_string(), 0.91)]),
            trained_at: Utc::now(),
            deployed_at: None,
            artifact_path: "artifacts/test.json".into(),
            training_job_id: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_get_roundtrip() {
        let registry = ModelRegistry::new(Db::open_in_memory().unwrap()).await.unwrap();
        let model = sample(
            ModelFamily::PrintTime,
            ModelVersion::new(1, 0, 0),
            ModelStatus::Draft,
        );
        registry.insert(&model).await.unwrap();

        let got = registry.get(&model.id).await.unwrap().unwrap();
        assert_eq!(got.family, ModelFamily::PrintTime);
        assert_eq!(got.status, ModelStatus::Draft);
        assert_eq!(got.metrics["r2"], 0.91);
    }

    #[tokio::test]
    async fn test_promote_demotes_previous_active() {
        let registry = ModelRegistry::new(Db::open_in_memory().unwrap()).await.unwrap();
        let old = sample(
            ModelFamily::PrintTime,
            ModelVersion::new(1, 0, 0),
            ModelStatus::Active,
        );
        let new = sample(
            ModelFamily::PrintTime,
            ModelVersion::new(1, 1, 0),
            ModelStatus::Testing,
        );
        registry.insert(&old).await.unwrap();
        registry.insert(&new).await.unwrap();

        let demoted = registry.promote_active(&new.id, Utc::now()).await.unwrap();
        assert_eq!(demoted, vec![old.id.clone()]);

        let active = registry
            .active_for(ModelFamily::PrintTime)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, new.id);
        assert!(active.deployed_at.is_some());

        let old_row = registry.get(&old.id).await.unwrap().unwrap();
        assert_eq!(old_row.status, ModelStatus::Deprecated);
    }

    #[tokio::test]
    async fn test_stale_query_filters_on_training_date() {
        let registry = ModelRegistry::new(Db::open_in_memory().unwrap()).await.unwrap();
        let mut stale = sample(
            ModelFamily::DemandForecast,
            ModelVersion::new(1, 0, 0),
            ModelStatus::Active,
        );
        stale.trained_at = Utc::now() - chrono::Duration::days(45);
        let fresh = sample(
            ModelFamily::PrintTime,
            ModelVersion::new(1, 0, 0),
            ModelStatus::Active,
        );
        registry.insert(&stale).await.unwrap();
        registry.insert(&fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(30);
        let found = registry.active_trained_before(cutoff).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale.id);
    }
}
