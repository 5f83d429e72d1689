use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use leadquote_core::domain::dispatch::{DispatchId, DispatchStep, DispatchStepRecord};
use leadquote_core::domain::quote::QuoteId;
use leadquote_core::ports::{CollaboratorResult, DispatchLedger};

use super::RepositoryError;
use crate::DbPool;

pub struct SqlDispatchLedger {
    pool: DbPool,
}

impl SqlDispatchLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_for_dispatch(
        &self,
        dispatch_id: &DispatchId,
    ) -> Result<Vec<DispatchStepRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT dispatch_id, quote_id, step, payload_hash, completed_at
             FROM dispatch_step_record
             WHERE dispatch_id = ?
             ORDER BY completed_at ASC",
        )
        .bind(&dispatch_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    pub async fn list_for_quote(
        &self,
        quote_id: QuoteId,
    ) -> Result<Vec<DispatchStepRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT dispatch_id, quote_id, step, payload_hash, completed_at
             FROM dispatch_step_record
             WHERE quote_id = ?
             ORDER BY completed_at ASC",
        )
        .bind(quote_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    /// Re-sending an edited payload under the same dispatch replaces the
    /// earlier record for that step.
    pub async fn save(&self, record: DispatchStepRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO dispatch_step_record (
                dispatch_id,
                quote_id,
                step,
                payload_hash,
                completed_at
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(dispatch_id, step) DO UPDATE SET
                quote_id = excluded.quote_id,
                payload_hash = excluded.payload_hash,
                completed_at = excluded.completed_at",
        )
        .bind(&record.dispatch_id.0)
        .bind(record.quote_id.0)
        .bind(record.step.as_str())
        .bind(&record.payload_hash)
        .bind(record.completed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DispatchLedger for SqlDispatchLedger {
    async fn completed_steps(
        &self,
        dispatch_id: &DispatchId,
    ) -> CollaboratorResult<Vec<DispatchStepRecord>> {
        Ok(self.find_for_dispatch(dispatch_id).await?)
    }

    async fn record(&self, record: DispatchStepRecord) -> CollaboratorResult<()> {
        Ok(self.save(record).await?)
    }
}

fn record_from_row(row: SqliteRow) -> Result<DispatchStepRecord, RepositoryError> {
    let step_raw = row.try_get::<String, _>("step")?;
    let step = DispatchStep::parse(&step_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown dispatch step `{step_raw}`")))?;

    Ok(DispatchStepRecord {
        dispatch_id: DispatchId(row.try_get("dispatch_id")?),
        quote_id: QuoteId(row.try_get("quote_id")?),
        step,
        payload_hash: row.try_get("payload_hash")?,
        completed_at: parse_timestamp("completed_at", row.try_get("completed_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use leadquote_core::domain::dispatch::{DispatchId, DispatchStep, DispatchStepRecord};
    use leadquote_core::domain::quote::QuoteId;
    use leadquote_core::ports::DispatchLedger;

    use super::SqlDispatchLedger;
    use crate::migrations;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn sql_ledger_round_trips_records_for_a_dispatch() {
        let pool = setup_pool().await;
        let ledger = SqlDispatchLedger::new(pool.clone());
        let dispatch_id = DispatchId("dsp-001".to_string());

        let status = record(&dispatch_id, DispatchStep::StatusUpdate, "hash-status", "12:00:00");
        let sms = record(&dispatch_id, DispatchStep::Sms, "hash-sms", "12:00:05");
        ledger.record(status.clone()).await.expect("record status step");
        ledger.record(sms.clone()).await.expect("record sms step");
        ledger
            .record(record(&DispatchId("dsp-002".to_string()), DispatchStep::Sms, "x", "12:01:00"))
            .await
            .expect("record other dispatch");

        let found = ledger.completed_steps(&dispatch_id).await.expect("load steps");
        assert_eq!(found, vec![status, sms]);

        let for_quote = ledger.list_for_quote(QuoteId(42)).await.expect("list for quote");
        assert_eq!(for_quote.len(), 3);

        pool.close().await;
    }

    #[tokio::test]
    async fn re_recording_a_step_replaces_its_hash() {
        let pool = setup_pool().await;
        let ledger = SqlDispatchLedger::new(pool.clone());
        let dispatch_id = DispatchId("dsp-010".to_string());

        ledger
            .record(record(&dispatch_id, DispatchStep::Email, "hash-v1", "12:00:00"))
            .await
            .expect("record first email");
        let edited = record(&dispatch_id, DispatchStep::Email, "hash-v2", "12:03:00");
        ledger.record(edited.clone()).await.expect("record edited email");

        let found = ledger.completed_steps(&dispatch_id).await.expect("load steps");
        assert_eq!(found, vec![edited]);

        pool.close().await;
    }

    fn record(
        dispatch_id: &DispatchId,
        step: DispatchStep,
        payload_hash: &str,
        time: &str,
    ) -> DispatchStepRecord {
        DispatchStepRecord {
            dispatch_id: dispatch_id.clone(),
            quote_id: QuoteId(42),
            step,
            payload_hash: payload_hash.to_string(),
            completed_at: parse_ts(&format!("2026-02-23T{time}Z")),
        }
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid timestamp").with_timezone(&Utc)
    }
}
