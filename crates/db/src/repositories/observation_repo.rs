//! Repository for the `observations` table (append-only time-series).

use busline_core::observation::{NewObservation, ObservationCursor, ObservationFilter};
use busline_core::target::TargetKey;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::{PgPool, Postgres};

use crate::models::observation::ObservationRow;

/// Column list for `observations` SELECT queries.
const COLUMNS: &str = "\
    id, bus_id, line_id, stop_id, \
    scheduled_time, actual_arrival_time, delay_minutes, occupancy, recorded_at";

/// Column list for `observations` INSERT statements (excludes `id` and `recorded_at`).
const INSERT_COLUMNS: &str = "\
    bus_id, line_id, stop_id, \
    scheduled_time, actual_arrival_time, delay_minutes, occupancy";

/// Shared WHERE clause; binds `$1..$5` from an [`ObservationFilter`].
const FILTER_CLAUSE: &str = "\
    ($1::text IS NULL OR bus_id = $1) \
    AND ($2::text IS NULL OR line_id = $2) \
    AND ($3::text IS NULL OR stop_id = $3) \
    AND ($4::timestamptz IS NULL OR actual_arrival_time >= $4) \
    AND ($5::timestamptz IS NULL OR actual_arrival_time < $5)";

/// Provides query operations for arrival observations.
pub struct ObservationRepo;

impl ObservationRepo {
    /// Insert an observation while holding a transaction-scoped advisory lock
    /// on its series, so appends to one (line, bus, stop) are serialized.
    pub async fn insert_serialized(
        pool: &PgPool,
        observation: &NewObservation,
    ) -> Result<ObservationRow, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(observation.key().to_string())
            .execute(&mut *tx)
            .await?;

        let query = format!(
            "INSERT INTO observations ({INSERT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, ObservationRow>(&query)
            .bind(&observation.bus_id)
            .bind(&observation.line_id)
            .bind(&observation.stop_id)
            .bind(observation.scheduled_time)
            .bind(observation.actual_arrival_time)
            .bind(observation.delay_minutes)
            .bind(observation.occupancy)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row)
    }

    /// One page in `(actual_arrival_time, id)` order, strictly after `cursor`.
    pub async fn list_page(
        pool: &PgPool,
        filter: &ObservationFilter,
        cursor: Option<ObservationCursor>,
        limit: usize,
    ) -> Result<Vec<ObservationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM observations \
             WHERE {FILTER_CLAUSE} \
               AND ($6::timestamptz IS NULL OR (actual_arrival_time, id) > ($6, $7::bigint)) \
             ORDER BY actual_arrival_time, id \
             LIMIT $8"
        );
        bind_filter(sqlx::query_as::<_, ObservationRow>(&query), filter)
            .bind(cursor.map(|c| c.after_time))
            .bind(cursor.map(|c| c.after_id))
            .bind(to_limit(limit))
            .fetch_all(pool)
            .await
    }

    /// The newest `limit` matching rows, returned oldest first.
    pub async fn list_recent(
        pool: &PgPool,
        filter: &ObservationFilter,
        limit: usize,
    ) -> Result<Vec<ObservationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM observations \
             WHERE {FILTER_CLAUSE} \
             ORDER BY actual_arrival_time DESC, id DESC \
             LIMIT $6"
        );
        let mut rows = bind_filter(sqlx::query_as::<_, ObservationRow>(&query), filter)
            .bind(to_limit(limit))
            .fetch_all(pool)
            .await?;
        rows.reverse();
        Ok(rows)
    }

    /// Distinct (line, bus, stop) series with at least one matching row.
    pub async fn list_series(
        pool: &PgPool,
        filter: &ObservationFilter,
    ) -> Result<Vec<TargetKey>, sqlx::Error> {
        let query = format!(
            "SELECT DISTINCT line_id, bus_id, stop_id FROM observations \
             WHERE {FILTER_CLAUSE} \
             ORDER BY line_id, bus_id, stop_id"
        );
        let rows = bind_filter(sqlx::query_as::<_, (String, String, String)>(&query), filter)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(line_id, bus_id, stop_id)| TargetKey {
                line_id,
                bus_id,
                stop_id,
            })
            .collect())
    }
}

fn bind_filter<'q, O>(
    query: QueryAs<'q, Postgres, O, PgArguments>,
    filter: &'q ObservationFilter,
) -> QueryAs<'q, Postgres, O, PgArguments> {
    query
        .bind(filter.bus_id.as_deref())
        .bind(filter.line_id.as_deref())
        .bind(filter.stop_id.as_deref())
        .bind(filter.since)
        .bind(filter.until)
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
