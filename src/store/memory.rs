use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use super::TimeSeriesStore;
use crate::model::RouteDelaySample;

/// In-process store, mainly for tests and one-shot CLI runs.
#[derive(Default)]
pub struct MemoryStore {
    routes: RwLock<HashMap<String, BTreeMap<i64, RouteDelaySample>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    async fn append(&self, samples: &[RouteDelaySample]) -> Result<usize> {
        let mut routes = self.routes.write().await;
        let mut accepted = 0;

        for sample in samples {
            let series = routes.entry(sample.route.clone()).or_default();
            if series.contains_key(&sample.timestamp) {
                debug!(route = %sample.route, timestamp = sample.timestamp, "Duplicate sample ignored");
                continue;
            }
            series.insert(sample.timestamp, sample.clone());
            accepted += 1;
        }

        Ok(accepted)
    }

    async fn range_query(
        &self,
        route: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<RouteDelaySample>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let routes = self.routes.read().await;
        Ok(routes
            .get(route)
            .map(|series| series.range(start..end).map(|(_, s)| s.clone()).collect())
            .unwrap_or_default())
    }

    async fn routes(&self) -> Result<Vec<String>> {
        let routes = self.routes.read().await;
        let mut names: Vec<String> = routes.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::is_sorted_by_timestamp;

    fn sample(route: &str, timestamp: i64, avg: f64) -> RouteDelaySample {
        RouteDelaySample {
            route: route.to_string(),
            timestamp,
            average_delay_seconds: Some(avg),
            bus_states: vec![],
        }
    }

    #[tokio::test]
    async fn test_range_query_is_half_open_and_sorted() {
        let store = MemoryStore::new();
        store
            .append(&[
                sample("r", 30, 3.0),
                sample("r", 10, 1.0),
                sample("r", 20, 2.0),
                sample("other", 15, 9.0),
            ])
            .await
            .unwrap();

        let got = store.range_query("r", 10, 30).await.unwrap();

        assert!(is_sorted_by_timestamp(&got));
        let ts: Vec<i64> = got.iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_duplicate_route_timestamp_ignored() {
        let store = MemoryStore::new();
        assert_eq!(store.append(&[sample("r", 10, 1.0)]).await.unwrap(), 1);
        assert_eq!(store.append(&[sample("r", 10, 99.0)]).await.unwrap(), 0);

        let got = store.range_query("r", 0, 100).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].average_delay_seconds, Some(1.0));
    }

    #[tokio::test]
    async fn test_routes_and_empty_ranges() {
        let store = MemoryStore::new();
        store
            .append(&[sample("b", 1, 0.0), sample("a", 1, 0.0)])
            .await
            .unwrap();

        assert_eq!(store.routes().await.unwrap(), vec!["a", "b"]);
        assert!(store.range_query("a", 5, 5).await.unwrap().is_empty());
        assert!(store.range_query("missing", 0, 10).await.unwrap().is_empty());
    }
}
