//! Append-only prediction audit log.
//!
//! Rows are never updated after insert, with one exception: the late
//! actual-outcome amendment, which is a conditional single write keyed on
//! the outcome still being NULL.

use crate::models::{AuditStatus, ModelFamily, PredictionRecord};
use crate::store::db::Db;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Row};

#[derive(Clone)]
pub struct AuditLog {
    db: Db,
}

impl AuditLog {
    pub async fn new(db: Db) -> Result<Self> {
        {
            let conn = db.lock().await;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS prediction_audit (
                    id TEXT PRIMARY KEY,
                    correlation_id TEXT NOT NULL,
                    family TEXT NOT NULL,
                    model_version TEXT NOT NULL,
                    input_features TEXT NOT NULL,
                    output TEXT NOT NULL,
                    status TEXT NOT NULL,
                    response_ms INTEGER NOT NULL,
                    user_id TEXT,
                    tenant_id TEXT,
                    timestamp INTEGER NOT NULL,
                    actual_outcome TEXT,
                    error_message TEXT
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_audit_correlation
                 ON prediction_audit(correlation_id)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_audit_family_ts
                 ON prediction_audit(family, timestamp)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_audit_with_outcome
                 ON prediction_audit(family, timestamp)
                 WHERE actual_outcome IS NOT NULL",
                [],
            )?;
        }
        Ok(Self { db })
    }

    pub async fn append(&self, rec: &PredictionRecord) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO prediction_audit (
                id, correlation_id, family, model_version, input_features,
                output, status, response_ms, user_id, tenant_id, timestamp,
                actual_outcome, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                rec.id,
                rec.correlation_id,
                rec.family.as_str(),
                rec.model_version,
                rec.input_features.to_string(),
                rec.output.to_string(),
                rec.status.as_str(),
                rec.response_ms,
                rec.user_id,
                rec.tenant_id,
                rec.timestamp.timestamp(),
                rec.actual_outcome.as_ref().map(|v| v.to_string()),
                rec.error_message,
            ],
        )
        .context("append audit record")?;
        Ok(())
    }

    pub async fn find_by_correlation(&self, correlation_id: &str) -> Result<Vec<PredictionRecord>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM prediction_audit WHERE correlation_id = ?1 ORDER BY timestamp ASC",
        )?;
        let mut rows = stmt.query(params![correlation_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_record(row)?);
        }
        Ok(out)
    }

    pub async fn range(
        &self,
        family: ModelFamily,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PredictionRecord>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM prediction_audit
             WHERE family = ?1 AND timestamp >= ?2 AND timestamp < ?3
             ORDER BY timestamp ASC",
        )?;
        let mut rows = stmt.query(params![
            family.as_str(),
            from.timestamp(),
            to.timestamp()
        ])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_record(row)?);
        }
        Ok(out)
    }

    /// Record the observed outcome for a prediction. Succeeds at most once
    /// per row; returns false if the row is missing or already amended.
    pub async fn amend_outcome(&self, id: &str, outcome: &serde_json::Value) -> Result<bool> {
        let conn = self.db.lock().await;
        let changed = conn.execute(
            "UPDATE prediction_audit SET actual_outcome = ?2
             WHERE id = ?1 AND actual_outcome IS NULL",
            params![id, outcome.to_string()],
        )?;
        Ok(changed == 1)
    }

    pub async fn count_for_family(&self, family: ModelFamily) -> Result<u64> {
        let conn = self.db.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM prediction_audit WHERE family = ?1",
            params![family.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn row_to_record(row: &Row<'_>) -> Result<PredictionRecord> {
    let family_raw: String = row.get("family")?;
    let status_raw: String = row.get("status")?;
    let inputs_raw: String = row.get("input_features")?;
    let output_raw: String = row.get("output")?;
    let outcome_raw: Option<String> = row.get("actual_outcome")?;
    let ts: i64 = row.get("timestamp")?;

    Ok(PredictionRecord {
        id: row.get("id")?,
        correlation_id: row.get("correlation_id")?,
        family: ModelFamily::parse(&family_raw)
            .with_context(|| format!("unknown family {family_raw}"))?,
        model_version: row.get("model_version")?,
        input_features: serde_json::from_str(&inputs_raw)?,
        output: serde_json::from_str(&output_raw)?,
        status: AuditStatus::parse(&status_raw)
            .with_context(|| format!("unknown audit status {status_raw}"))?,
        response_ms: row.get("response_ms")?,
        user_id: row.get("user_id")?,
        tenant_id: row.get("tenant_id")?,
        timestamp: Utc
            .timestamp_opt(ts, 0)
            .single()
            .context("bad audit timestamp")?,
        actual_outcome: outcome_raw.map(|s| serde_json::from_str(&s)).transpose()?,
        error_message: row.get("error_message")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(correlation_id: &str) -> PredictionRecord {
        PredictionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            correlation_id: correlation_id.to_string(),
            family: ModelFamily::PrintTime,
            model_version: "1.0.0".into(),
            input_features: json!({"infill": 20}),
            output: json!({"predicted": 95.5}),
            status: AuditStatus::Success,
            response_ms: 42,
            user_id: Some("user-1".into()),
            tenant_id: None,
            timestamp: Utc::now(),
            actual_outcome: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_append_and_lookup() {
        let audit = AuditLog::new(Db::open_in_memory().unwrap()).await.unwrap();
        let rec = sample("corr-1");
        audit.append(&rec).await.unwrap();

        let found = audit.find_by_correlation("corr-1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].output["predicted"], json!(95.5));
        assert_eq!(found[0].status, AuditStatus::Success);
    }

    #[tokio::test]
    async fn test_outcome_amendment_is_monotonic() {
        let audit = AuditLog::new(Db::open_in_memory().unwrap()).await.unwrap();
        let rec = sample("corr-2");
        audit.append(&rec).await.unwrap();

        assert!(audit.amend_outcome(&rec.id, &json!({"actual": 101.0})).await.unwrap());
        // Second amendment must be rejected.
        assert!(!audit.amend_outcome(&rec.id, &json!({"actual": 55.0})).await.unwrap());

        let found = audit.find_by_correlation("corr-2").await.unwrap();
        assert_eq!(found[0].actual_outcome, Some(json!({"actual": 101.0})));
    }

    #[tokio::test]
    async fn test_range_query_bounds() {
        let audit = AuditLog::new(Db::open_in_memory().unwrap()).await.unwrap();
        let mut early = sample("corr-3");
        early.timestamp = Utc::now() - chrono::Duration::hours(3);
        let recent = sample("corr-4");
        audit.append(&early).await.unwrap();
        audit.append(&recent).await.unwrap();

        let found = audit
            .range(
                ModelFamily::PrintTime,
                Utc::now() - chrono::Duration::hours(1),
                Utc::now() + chrono::Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].correlation_id, "corr-4");
    }
}
