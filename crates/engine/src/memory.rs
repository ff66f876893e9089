//! In-memory storage backends.
//!
//! Used when no database is configured and throughout the test suites.
//! Each (line, bus, stop) series has its own mutex, so appends to different
//! series never contend; the outer map lock is only held long enough to find
//! or create a series.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use busline_core::error::CoreError;
use busline_core::observation::{
    NewObservation, Observation, ObservationCursor, ObservationFilter, ObservationPage,
};
use busline_core::prediction::{LedgerFilter, NewPrediction, Prediction};
use busline_core::store::{ObservationStore, PredictionLedger};
use busline_core::target::TargetKey;
use busline_core::types::{DbId, Timestamp};
use chrono::{Duration, Utc};
use parking_lot::{Mutex, RwLock};

type Series = Arc<Mutex<Vec<Observation>>>;

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryObservationStore {
    series: RwLock<HashMap<TargetKey, Series>>,
    next_id: AtomicI64,
}

impl MemoryObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn series_for(&self, key: &TargetKey) -> Series {
        if let Some(series) = self.series.read().get(key) {
            return Arc::clone(series);
        }
        Arc::clone(self.series.write().entry(key.clone()).or_default())
    }

    fn matching_series(&self, filter: &ObservationFilter) -> Vec<Series> {
        self.series
            .read()
            .iter()
            .filter(|(key, _)| filter.matches_key(key))
            .map(|(_, series)| Arc::clone(series))
            .collect()
    }

    /// Up to `limit` matching observations strictly after `cursor`, in
    /// `(actual_arrival_time, id)` order.
    ///
    /// Each series is already sorted, so every series contributes at most
    /// `limit` rows starting at the cursor position.
    fn page_after(
        &self,
        filter: &ObservationFilter,
        cursor: Option<ObservationCursor>,
        limit: usize,
    ) -> Vec<Observation> {
        let mut out: Vec<Observation> = Vec::new();
        for series in self.matching_series(filter) {
            let guard = series.lock();
            let start = cursor.map_or(0, |c| guard.partition_point(|o| !c.precedes(o)));
            out.extend(
                guard[start..]
                    .iter()
                    .filter(|o| filter.matches(o))
                    .take(limit)
                    .cloned(),
            );
        }
        out.sort_by_key(|o| (o.actual_arrival_time, o.id));
        out.truncate(limit);
        out
    }

    /// The newest `limit` matching observations, oldest first.
    fn newest(&self, filter: &ObservationFilter, limit: usize) -> Vec<Observation> {
        let mut out: Vec<Observation> = Vec::new();
        for series in self.matching_series(filter) {
            let guard = series.lock();
            out.extend(
                guard
                    .iter()
                    .rev()
                    .filter(|o| filter.matches(o))
                    .take(limit)
                    .cloned(),
            );
        }
        out.sort_by_key(|o| (o.actual_arrival_time, o.id));
        let skip = out.len().saturating_sub(limit);
        out.split_off(skip)
    }
}

#[async_trait]
impl ObservationStore for MemoryObservationStore {
    async fn append(&self, observation: NewObservation) -> Result<Observation, CoreError> {
        let series = self.series_for(&observation.key());
        let mut guard = series.lock();

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = observation.into_observation(id, Utc::now());
        let sort_key = (stored.actual_arrival_time, stored.id);
        let pos = guard.partition_point(|o| (o.actual_arrival_time, o.id) <= sort_key);
        guard.insert(pos, stored.clone());
        Ok(stored)
    }

    async fn query_page(
        &self,
        filter: &ObservationFilter,
        cursor: Option<ObservationCursor>,
        limit: usize,
    ) -> Result<ObservationPage, CoreError> {
        let rows = self.page_after(filter, cursor, limit);
        Ok(ObservationPage::from_rows(rows, limit))
    }

    async fn recent(
        &self,
        filter: &ObservationFilter,
        limit: usize,
    ) -> Result<Vec<Observation>, CoreError> {
        Ok(self.newest(filter, limit))
    }

    async fn distinct_targets(
        &self,
        filter: &ObservationFilter,
    ) -> Result<Vec<TargetKey>, CoreError> {
        let map = self.series.read();
        let mut keys: Vec<TargetKey> = map
            .iter()
            .filter(|(key, _)| filter.matches_key(key))
            .filter(|(_, series)| series.lock().iter().any(|o| filter.matches(o)))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryPredictionLedger {
    predictions: RwLock<BTreeMap<DbId, Prediction>>,
    next_id: AtomicI64,
}

impl MemoryPredictionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.predictions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.read().is_empty()
    }
}

#[async_trait]
impl PredictionLedger for MemoryPredictionLedger {
    async fn insert(&self, predictions: Vec<NewPrediction>) -> Result<Vec<Prediction>, CoreError> {
        let mut map = self.predictions.write();
        Ok(predictions
            .into_iter()
            .map(|p| {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                let stored = p.into_prediction(id);
                map.insert(id, stored.clone());
                stored
            })
            .collect())
    }

    async fn find_resolvable(
        &self,
        observation: &Observation,
        tolerance: Duration,
    ) -> Result<Vec<Prediction>, CoreError> {
        let arrival = observation.actual_arrival_time;
        Ok(self
            .predictions
            .read()
            .values()
            .filter(|p| {
                !p.resolved
                    && p.bus_id == observation.bus_id
                    && (p.line_id.is_empty() || p.line_id == observation.line_id)
                    && p.stop_id == observation.stop_id
                    && (p.target_time - arrival).abs() <= tolerance
                    && p.generated_at <= arrival
            })
            .cloned()
            .collect())
    }

    async fn mark_resolved(&self, id: DbId) -> Result<bool, CoreError> {
        let mut map = self.predictions.write();
        match map.get_mut(&id) {
            Some(p) if !p.resolved => {
                p.resolved = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn latest(&self, filter: &LedgerFilter) -> Result<Vec<Prediction>, CoreError> {
        let map = self.predictions.read();
        let mut newest: HashMap<(TargetKey, &str, _, u32), &Prediction> = HashMap::new();
        for p in map.values().filter(|p| filter.matches(p)) {
            let group = (p.key(), p.algorithm.as_str(), p.prediction_type, p.horizon);
            let entry = newest.entry(group).or_insert(p);
            if (p.generated_at, p.id) > (entry.generated_at, entry.id) {
                *entry = p;
            }
        }

        let mut out: Vec<Prediction> = newest.into_values().cloned().collect();
        out.sort_by(|a, b| (b.generated_at, b.id).cmp(&(a.generated_at, a.id)));
        out.truncate(filter.limit);
        Ok(out)
    }

    async fn purge_unresolved_before(&self, cutoff: Timestamp) -> Result<u64, CoreError> {
        let mut map = self.predictions.write();
        let before = map.len();
        map.retain(|_, p| p.resolved || p.target_time >= cutoff);
        Ok((before - map.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busline_core::prediction::PredictionType;
    use chrono::{TimeZone, Timelike};

    fn at(hour: u32, minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
    }

    fn new_obs(key: &TargetKey, arrival: Timestamp, delay: i64) -> NewObservation {
        NewObservation::new(key, arrival - Duration::minutes(delay), arrival, None)
    }

    #[tokio::test]
    async fn append_keeps_series_sorted_and_ids_unique() {
        let store = MemoryObservationStore::new();
        let key = TargetKey::new("L1", "B1", "S1");
        let late = store.append(new_obs(&key, at(9, 0), 1)).await.unwrap();
        let early = store.append(new_obs(&key, at(8, 0), 2)).await.unwrap();
        assert_ne!(late.id, early.id);

        let all = store
            .recent(&ObservationFilter::for_key(&key), 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].actual_arrival_time, at(8, 0));
        assert_eq!(all[1].actual_arrival_time, at(9, 0));
    }

    #[tokio::test]
    async fn pages_follow_cursor_without_gaps() {
        let store = MemoryObservationStore::new();
        let key = TargetKey::new("L1", "B1", "S1");
        for minute in 0..5 {
            store.append(new_obs(&key, at(8, minute), 0)).await.unwrap();
        }

        let filter = ObservationFilter::default();
        let first = store.query_page(&filter, None, 2).await.unwrap();
        assert_eq!(first.observations.len(), 2);
        let cursor = first.next_cursor.expect("full page has a cursor");

        let second = store.query_page(&filter, Some(cursor), 2).await.unwrap();
        assert_eq!(second.observations[0].actual_arrival_time, at(8, 2));

        let third = store
            .query_page(&filter, second.next_cursor, 2)
            .await
            .unwrap();
        assert_eq!(third.observations.len(), 1);
        assert!(third.next_cursor.is_none());
    }

    #[tokio::test]
    async fn pages_interleave_series_in_arrival_order() {
        let store = MemoryObservationStore::new();
        let a = TargetKey::new("L1", "B1", "S1");
        let b = TargetKey::new("L1", "B2", "S2");
        for minute in [0, 2, 4, 6] {
            store.append(new_obs(&a, at(8, minute), 0)).await.unwrap();
            store.append(new_obs(&b, at(8, minute + 1), 0)).await.unwrap();
        }

        let filter = ObservationFilter::default();
        let mut minutes = Vec::new();
        let mut cursor = None;
        loop {
            let page = store.query_page(&filter, cursor, 3).await.unwrap();
            minutes.extend(page.observations.iter().map(|o| o.actual_arrival_time.minute()));
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        assert_eq!(minutes, (0..8).collect::<Vec<u32>>());

        let recent = store.recent(&filter, 3).await.unwrap();
        let tail: Vec<u32> = recent.iter().map(|o| o.actual_arrival_time.minute()).collect();
        assert_eq!(tail, vec![5, 6, 7]);
    }

    #[tokio::test]
    async fn recent_returns_newest_in_ascending_order() {
        let store = MemoryObservationStore::new();
        let key = TargetKey::new("L1", "B1", "S1");
        for minute in 0..5 {
            store.append(new_obs(&key, at(8, minute), 0)).await.unwrap();
        }
        let recent = store.recent(&ObservationFilter::default(), 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].actual_arrival_time, at(8, 3));
        assert_eq!(recent[1].actual_arrival_time, at(8, 4));
    }

    #[tokio::test]
    async fn distinct_targets_respects_scope() {
        let store = MemoryObservationStore::new();
        for (line, bus, stop) in [("L1", "B1", "S1"), ("L1", "B2", "S1"), ("L2", "B3", "S4")] {
            let key = TargetKey::new(line, bus, stop);
            store.append(new_obs(&key, at(8, 0), 0)).await.unwrap();
        }
        let filter = ObservationFilter {
            line_id: Some("L1".into()),
            ..Default::default()
        };
        let keys = store.distinct_targets(&filter).await.unwrap();
        assert_eq!(
            keys,
            vec![TargetKey::new("L1", "B1", "S1"), TargetKey::new("L1", "B2", "S1")]
        );
    }

    #[tokio::test]
    async fn concurrent_appends_to_one_series_are_all_kept() {
        let store = Arc::new(MemoryObservationStore::new());
        let key = TargetKey::new("L1", "B1", "S1");
        let mut handles = Vec::new();
        for minute in 0..20 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store.append(new_obs(&key, at(8, minute), 0)).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let all = store
            .recent(&ObservationFilter::for_key(&key), 100)
            .await
            .unwrap();
        assert_eq!(all.len(), 20);
        assert!(all
            .windows(2)
            .all(|w| w[0].actual_arrival_time <= w[1].actual_arrival_time));
    }

    fn prediction(key: &TargetKey, generated_at: Timestamp, horizon: u32) -> NewPrediction {
        NewPrediction::new(key, "ensemble", PredictionType::Delay, 4.0, 60.0, horizon, generated_at)
    }

    #[tokio::test]
    async fn resolvable_requires_window_and_generation_order() {
        let ledger = MemoryPredictionLedger::new();
        let key = TargetKey::new("L1", "B1", "S1");
        ledger
            .insert(vec![
                prediction(&key, at(8, 0), 60),  // target 09:00
                prediction(&key, at(8, 0), 70),  // target 09:10, outside tolerance
                prediction(&key, at(9, 3), 1),   // generated after the arrival
            ])
            .await
            .unwrap();

        let store = MemoryObservationStore::new();
        let observation = store.append(new_obs(&key, at(9, 2), 3)).await.unwrap();
        let found = ledger
            .find_resolvable(&observation, Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].horizon, 60);
    }

    #[tokio::test]
    async fn mark_resolved_flips_once() {
        let ledger = MemoryPredictionLedger::new();
        let key = TargetKey::new("L1", "B1", "S1");
        let stored = ledger
            .insert(vec![prediction(&key, at(8, 0), 60)])
            .await
            .unwrap();
        let id = stored[0].id;
        assert!(ledger.mark_resolved(id).await.unwrap());
        assert!(!ledger.mark_resolved(id).await.unwrap());
        assert!(!ledger.mark_resolved(9999).await.unwrap());
    }

    #[tokio::test]
    async fn latest_keeps_newest_per_group() {
        let ledger = MemoryPredictionLedger::new();
        let key = TargetKey::new("L1", "B1", "S1");
        ledger
            .insert(vec![
                prediction(&key, at(8, 0), 60),
                prediction(&key, at(8, 30), 60),
                prediction(&key, at(8, 10), 30),
            ])
            .await
            .unwrap();
        let filter = LedgerFilter {
            limit: 10,
            ..Default::default()
        };
        let latest = ledger.latest(&filter).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].generated_at, at(8, 30));
        assert_eq!(latest[1].horizon, 30);
    }

    #[tokio::test]
    async fn purge_only_drops_stale_unresolved() {
        let ledger = MemoryPredictionLedger::new();
        let key = TargetKey::new("L1", "B1", "S1");
        let stored = ledger
            .insert(vec![
                prediction(&key, at(1, 0), 60),
                prediction(&key, at(2, 0), 60),
                prediction(&key, at(9, 0), 60),
            ])
            .await
            .unwrap();
        ledger.mark_resolved(stored[0].id).await.unwrap();

        let purged = ledger.purge_unresolved_before(at(8, 0)).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(ledger.len(), 2);
    }
}
