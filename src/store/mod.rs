//! Append-only persistence of [`RouteDelaySample`]s keyed by (route, timestamp).

mod csv_store;
mod memory;

pub use csv_store::CsvStore;
pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::RouteDelaySample;

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Appends samples. A sample whose (route, timestamp) already exists is
    /// ignored. Returns the number of samples accepted.
    async fn append(&self, samples: &[RouteDelaySample]) -> Result<usize>;

    /// Samples for `route` with `start <= timestamp < end`, ascending by timestamp.
    async fn range_query(&self, route: &str, start: i64, end: i64)
    -> Result<Vec<RouteDelaySample>>;

    /// Every route with at least one stored sample.
    async fn routes(&self) -> Result<Vec<String>>;
}

/// Returns `true` when samples are in non-decreasing timestamp order.
pub fn is_sorted_by_timestamp(samples: &[RouteDelaySample]) -> bool {
    samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
}
