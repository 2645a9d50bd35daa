//! Training bookkeeping: job rows, the per-family accumulating dataset and
//! its ingested records.
//!
//! Datasets accumulate monotonically; the core never deletes a record.
//! The dataset hash is chained per append (sha256 over previous hash plus
//! the record identity), which keeps deduplication cheap without rereading
//! the whole table.

use crate::models::{
    DatasetRecord, ModelFamily, TrainingDataset, TrainingJob, TrainingJobStatus, TriggerSource,
};
use crate::store::db::Db;
use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

#[derive(Clone)]
pub struct TrainingStore {
    db: Db,
}

impl TrainingStore {
    pub async fn new(db: Db) -> Result<Self> {
        {
            let conn = db.lock().await;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS training_jobs (
                    id TEXT PRIMARY KEY,
                    family TEXT NOT NULL,
                    status TEXT NOT NULL,
                    started_at INTEGER,
                    finished_at INTEGER,
                    dataset_id TEXT,
                    result_model_id TEXT,
                    error_message TEXT,
                    trigger_source TEXT NOT NULL,
                    hyperparameters TEXT NOT NULL,
                    validation TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_training_jobs_family
                 ON training_jobs(family, status)",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS training_datasets (
                    id TEXT PRIMARY KEY,
                    family TEXT NOT NULL UNIQUE,
                    record_count INTEGER NOT NULL DEFAULT 0,
                    date_from TEXT,
                    date_to TEXT,
                    feature_columns TEXT NOT NULL,
                    target_column TEXT NOT NULL,
                    dataset_hash TEXT,
                    quality_metrics TEXT NOT NULL,
                    artifact_path TEXT
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_training_datasets_hash
                 ON training_datasets(dataset_hash)",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS dataset_records (
                    id TEXT PRIMARY KEY,
                    dataset_id TEXT NOT NULL REFERENCES training_datasets(id),
                    product_id TEXT NOT NULL,
                    quantity REAL NOT NULL,
                    unit_price REAL NOT NULL,
                    order_date TEXT NOT NULL,
                    is_holiday INTEGER NOT NULL,
                    raw TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_dataset_records_dataset
                 ON dataset_records(dataset_id, order_date)",
                [],
            )?;
        }
        Ok(Self { db })
    }

    // ----- jobs -----

    pub async fn insert_job(&self, job: &TrainingJob) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO training_jobs (
                id, family, status, started_at, finished_at, dataset_id,
                result_model_id, error_message, trigger_source,
                hyperparameters, validation
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                job.id,
                job.family.as_str(),
                job.status.as_str(),
                job.started_at.map(|t| t.timestamp()),
                job.finished_at.map(|t| t.timestamp()),
                job.dataset_id,
                job.result_model_id,
                job.error_message,
                job.trigger.as_str(),
                serde_json::to_string(&job.hyperparameters)?,
                serde_json::to_string(&job.validation)?,
            ],
        )
        .context("insert training job")?;
        Ok(())
    }

    pub async fn mark_running(&self, id: &str) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "UPDATE training_jobs SET status = 'running', started_at = ?2 WHERE id = ?1",
            params![id, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub async fn mark_completed(
        &self,
        id: &str,
        result_model_id: &str,
        dataset_id: &str,
        validation: &HashMap<String, f64>,
        hyperparameters: &HashMap<String, f64>,
    ) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "UPDATE training_jobs SET status = 'completed', finished_at = ?2,
                 result_model_id = ?3, dataset_id = ?4, validation = ?5,
                 hyperparameters = ?6
             WHERE id = ?1",
            params![
                id,
                Utc::now().timestamp(),
                result_model_id,
                dataset_id,
                serde_json::to_string(validation)?,
                serde_json::to_string(hyperparameters)?,
            ],
        )?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "UPDATE training_jobs SET status = 'failed', finished_at = ?2,
                 error_message = ?3
             WHERE id = ?1",
            params![id, Utc::now().timestamp(), error],
        )?;
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<TrainingJob>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached("SELECT * FROM training_jobs WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_job(row)?)),
            None => Ok(None),
        }
    }

    pub async fn jobs_for_family(&self, family: ModelFamily) -> Result<Vec<TrainingJob>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM training_jobs WHERE family = ?1 ORDER BY rowid DESC",
        )?;
        let mut rows = stmt.query(params![family.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_job(row)?);
        }
        Ok(out)
    }

    // ----- datasets -----

    /// The accumulating dataset for a family, created on first use.
    pub async fn ensure_dataset(&self, family: ModelFamily) -> Result<TrainingDataset> {
        let conn = self.db.lock().await;
        if let Some(ds) = query_dataset(&conn, family)? {
            return Ok(ds);
        }

        let ds = TrainingDataset {
            id: uuid::Uuid::new_v4().to_string(),
            family,
            record_count: 0,
            date_from: None,
            date_to: None,
            feature_columns: vec![
                "quantity".into(),
                "unit_price".into(),
                "day_of_week".into(),
                "month".into(),
                "is_holiday".into(),
            ],
            target_column: "demand".into(),
            dataset_hash: None,
            quality_metrics: HashMap::new(),
            artifact_path: None,
        };
        conn.execute(
            "INSERT INTO training_datasets (
                id, family, record_count, date_from, date_to,
                feature_columns, target_column, dataset_hash,
                quality_metrics, artifact_path
            ) VALUES (?1, ?2, 0, NULL, NULL, ?3, ?4, NULL, ?5, NULL)",
            params![
                ds.id,
                family.as_str(),
                serde_json::to_string(&ds.feature_columns)?,
                ds.target_column,
                serde_json::to_string(&ds.quality_metrics)?,
            ],
        )?;
        Ok(ds)
    }

    pub async fn latest_dataset(&self, family: ModelFamily) -> Result<Option<TrainingDataset>> {
        let conn = self.db.lock().await;
        query_dataset(&conn, family)
    }

    /// Append one record and fold it into the dataset row (count, date
    /// range, chained hash). Returns the new record count.
    pub async fn append_record(&self, record: &DatasetRecord) -> Result<u64> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO dataset_records (
                id, dataset_id, product_id, quantity, unit_price,
                order_date, is_holiday, raw
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.dataset_id,
                record.product_id,
                record.quantity,
                record.unit_price,
                record.order_date.to_string(),
                record.is_holiday as i64,
                record.raw.to_string(),
            ],
        )?;

        let prev_hash: Option<String> = tx.query_row(
            "SELECT dataset_hash FROM training_datasets WHERE id = ?1",
            params![record.dataset_id],
            |row| row.get(0),
        )?;
        let mut hasher = Sha256::new();
        hasher.update(prev_hash.unwrap_or_default().as_bytes());
        hasher.update(record.id.as_bytes());
        hasher.update(record.product_id.as_bytes());
        hasher.update(record.order_date.to_string().as_bytes());
        let chained = hex::encode(hasher.finalize());

        tx.execute(
            "UPDATE training_datasets SET
                record_count = record_count + 1,
                date_from = CASE
                    WHEN date_from IS NULL OR date_from > ?2 THEN ?2 ELSE date_from END,
                date_to = CASE
                    WHEN date_to IS NULL OR date_to < ?2 THEN ?2 ELSE date_to END,
                dataset_hash = ?3
             WHERE id = ?1",
            params![record.dataset_id, record.order_date.to_string(), chained],
        )?;

        let count: i64 = tx.query_row(
            "SELECT record_count FROM training_datasets WHERE id = ?1",
            params![record.dataset_id],
            |row| row.get(0),
        )?;

        tx.commit()?;
        Ok(count as u64)
    }

    pub async fn records_for_family(
        &self,
        family: ModelFamily,
        limit: usize,
    ) -> Result<Vec<DatasetRecord>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT r.* FROM dataset_records r
             JOIN training_datasets d ON d.id = r.dataset_id
             WHERE d.family = ?1
             ORDER BY r.order_date DESC
             LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![family.as_str(), limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_record(row)?);
        }
        Ok(out)
    }

    pub async fn update_quality_metrics(
        &self,
        dataset_id: &str,
        metrics: &HashMap<String, f64>,
    ) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "UPDATE training_datasets SET quality_metrics = ?2 WHERE id = ?1",
            params![dataset_id, serde_json::to_string(metrics)?],
        )?;
        Ok(())
    }
}

fn query_dataset(conn: &Connection, family: ModelFamily) -> Result<Option<TrainingDataset>> {
    let mut stmt = conn.prepare_cached(
        "SELECT * FROM training_datasets WHERE family = ?1 LIMIT 1",
    )?;
    let ds = stmt
        .query_row(params![family.as_str()], |row| {
            let feature_raw: String = row.get("feature_columns")?;
            let quality_raw: String = row.get("quality_metrics")?;
            let date_from: Option<String> = row.get("date_from")?;
            let date_to: Option<String> = row.get("date_to")?;
            let count: i64 = row.get("record_count")?;
            Ok((
                row.get::<_, String>("id")?,
                count,
                date_from,
                date_to,
                feature_raw,
                row.get::<_, String>("target_column")?,
                row.get::<_, Option<String>>("dataset_hash")?,
                quality_raw,
                row.get::<_, Option<String>>("artifact_path")?,
            ))
        })
        .optional()?;

    let Some((id, count, date_from, date_to, feature_raw, target, hash, quality_raw, artifact)) = ds
    else {
        return Ok(None);
    };

    Ok(Some(TrainingDataset {
        id,
        family,
        record_count: count as u64,
        date_from: date_from.and_then(|s| s.parse::<NaiveDate>().ok()),
        date_to: date_to.and_then(|s| s.parse::<NaiveDate>().ok()),
        feature_columns: serde_json::from_str(&feature_raw)?,
        target_column: target,
        dataset_hash: hash,
        quality_metrics: serde_json::from_str(&quality_raw)?,
        artifact_path: artifact,
    }))
}

fn row_to_job(row: &Row<'_>) -> Result<TrainingJob> {
    let family_raw: String = row.get("family")?;
    let status_raw: String = row.get("status")?;
    let trigger_raw: String = row.get("trigger_source")?;
    let hyper_raw: String = row.get("hyperparameters")?;
    let validation_raw: String = row.get("validation")?;
    let started: Option<i64> = row.get("started_at")?;
    let finished: Option<i64> = row.get("finished_at")?;

    Ok(TrainingJob {
        id: row.get("id")?,
        family: ModelFamily::parse(&family_raw)
            .with_context(|| format!("unknown family {family_raw}"))?,
        status: TrainingJobStatus::parse(&status_raw)
            .with_context(|| format!("unknown job status {status_raw}"))?,
        started_at: started.and_then(|t| Utc.timestamp_opt(t, 0).single()),
        finished_at: finished.and_then(|t| Utc.timestamp_opt(t, 0).single()),
        dataset_id: row.get("dataset_id")?,
        result_model_id: row.get("result_model_id")?,
        error_message: row.get("error_message")?,
        trigger: TriggerSource::parse(&trigger_raw)
            .with_context(|| format!("unknown trigger {trigger_raw}"))?,
        hyperparameters: serde_json::from_str(&hyper_raw)?,
        validation: serde_json::from_str(&validation_raw)?,
    })
}

fn row_to_record(row: &Row<'_>) -> Result<DatasetRecord> {
    let date_raw: String = row.get("order_date")?;
    let raw_json: String = row.get("raw")?;
    let holiday: i64 = row.get("is_holiday")?;

    Ok(DatasetRecord {
        id: row.get("id")?,
        dataset_id: row.get("dataset_id")?,
        product_id: row.get("product_id")?,
        quantity: row.get("quantity")?,
        unit_price: row.get("unit_price")?,
        order_date: date_raw
            .parse::<NaiveDate>()
            .with_context(|| format!("bad order_date {date_raw}"))?,
        is_holiday: holiday != 0,
        raw: serde_json::from_str(&raw_json)?,
    })
}
