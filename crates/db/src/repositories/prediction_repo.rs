//! Repository for the `predictions` table.

use busline_core::prediction::{LedgerFilter, NewPrediction};
use busline_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::prediction::PredictionRow;

/// Column list for `predictions` SELECT queries.
const COLUMNS: &str = "\
    id, bus_id, line_id, stop_id, algorithm, prediction_type, \
    predicted_value, confidence, horizon, generated_at, target_time, resolved";

/// Column list for `predictions` INSERT statements (excludes `id` and `resolved`).
const INSERT_COLUMNS: &str = "\
    bus_id, line_id, stop_id, algorithm, prediction_type, \
    predicted_value, confidence, horizon, generated_at, target_time";

const INSERT_ARITY: usize = 10;

/// Rows per INSERT; keeps the bind count well under the protocol limit.
const INSERT_CHUNK: usize = 1000;

/// Provides query operations for emitted predictions.
pub struct PredictionRepo;

impl PredictionRepo {
    /// Insert predictions using multi-row INSERTs inside one transaction.
    pub async fn insert_batch(
        pool: &PgPool,
        predictions: &[NewPrediction],
    ) -> Result<Vec<PredictionRow>, sqlx::Error> {
        if predictions.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = pool.begin().await?;
        let mut inserted = Vec::with_capacity(predictions.len());

        for chunk in predictions.chunks(INSERT_CHUNK) {
            let mut query = format!("INSERT INTO predictions ({INSERT_COLUMNS}) VALUES ");
            let mut param_idx = 1usize;
            for i in 0..chunk.len() {
                if i > 0 {
                    query.push_str(", ");
                }
                query.push('(');
                for j in 0..INSERT_ARITY {
                    if j > 0 {
                        query.push_str(", ");
                    }
                    query.push('$');
                    query.push_str(&param_idx.to_string());
                    param_idx += 1;
                }
                query.push(')');
            }
            query.push_str(&format!(" RETURNING {COLUMNS}"));

            let mut q = sqlx::query_as::<_, PredictionRow>(&query);
            for p in chunk {
                q = q
                    .bind(&p.bus_id)
                    .bind(&p.line_id)
                    .bind(&p.stop_id)
                    .bind(&p.algorithm)
                    .bind(p.prediction_type.as_str())
                    .bind(p.predicted_value)
                    .bind(p.confidence)
                    .bind(i32::try_from(p.horizon).unwrap_or(i32::MAX))
                    .bind(p.generated_at)
                    .bind(p.target_time);
            }
            inserted.extend(q.fetch_all(&mut *tx).await?);
        }

        tx.commit().await?;
        inserted.sort_by_key(|row| row.id);
        Ok(inserted)
    }

    /// Unresolved predictions for one series whose target time falls in
    /// `[window_start, window_end]` and which were generated by `generated_before`.
    /// Rows saved without a line match any line for the same bus and stop.
    pub async fn find_unresolved_in_window(
        pool: &PgPool,
        bus_id: &str,
        line_id: &str,
        stop_id: &str,
        window_start: Timestamp,
        window_end: Timestamp,
        generated_before: Timestamp,
    ) -> Result<Vec<PredictionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM predictions \
             WHERE NOT resolved \
               AND bus_id = $1 AND (line_id = $2 OR line_id = '') AND stop_id = $3 \
               AND target_time BETWEEN $4 AND $5 \
               AND generated_at <= $6 \
             ORDER BY id"
        );
        sqlx::query_as::<_, PredictionRow>(&query)
            .bind(bus_id)
            .bind(line_id)
            .bind(stop_id)
            .bind(window_start)
            .bind(window_end)
            .bind(generated_before)
            .fetch_all(pool)
            .await
    }

    /// Flip `resolved`; returns `true` only if this call changed the row.
    pub async fn mark_resolved(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE predictions SET resolved = true WHERE id = $1 AND NOT resolved")
                .bind(id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Latest row per (series, algorithm, type, horizon), newest first.
    ///
    /// Uses `DISTINCT ON` to pick the most recent row per group.
    pub async fn list_latest(
        pool: &PgPool,
        filter: &LedgerFilter,
    ) -> Result<Vec<PredictionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM ( \
                SELECT DISTINCT ON (line_id, bus_id, stop_id, algorithm, prediction_type, horizon) \
                    {COLUMNS} \
                FROM predictions \
                WHERE ($1::text IS NULL OR bus_id = $1) \
                  AND ($2::text IS NULL OR line_id = $2) \
                  AND ($3::text IS NULL OR algorithm = $3) \
                  AND ($4::text IS NULL OR prediction_type = $4) \
                  AND ($5::integer IS NULL OR horizon = $5) \
                ORDER BY line_id, bus_id, stop_id, algorithm, prediction_type, horizon, \
                         generated_at DESC, id DESC \
             ) latest \
             ORDER BY generated_at DESC, id DESC \
             LIMIT $6"
        );
        sqlx::query_as::<_, PredictionRow>(&query)
            .bind(filter.bus_id.as_deref())
            .bind(filter.line_id.as_deref())
            .bind(filter.algorithm.as_deref())
            .bind(filter.prediction_type.map(|t| t.as_str()))
            .bind(filter.horizon.map(|h| i32::try_from(h).unwrap_or(i32::MAX)))
            .bind(i64::try_from(filter.limit).unwrap_or(i64::MAX))
            .fetch_all(pool)
            .await
    }

    /// Delete unresolved predictions whose target time is before `cutoff`.
    ///
    /// Returns the number of rows deleted.
    pub async fn delete_unresolved_before(
        pool: &PgPool,
        cutoff: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM predictions WHERE NOT resolved AND target_time < $1")
                .bind(cutoff)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }
}
