//! Data types produced by the chart query pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unit for delay-valued reducers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    /// Raw seconds.
    #[default]
    Seconds,
    /// Whole minutes, floored.
    Minutes,
}

impl DelayUnit {
    pub fn convert(self, seconds: f64) -> f64 {
        match self {
            DelayUnit::Seconds => seconds,
            DelayUnit::Minutes => (seconds / 60.0).floor(),
        }
    }
}

/// How the samples of one bucket are folded into a single value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reducer {
    /// Mean delay magnitude.
    Average { unit: DelayUnit },
    /// Largest delay magnitude.
    Max { unit: DelayUnit },
    /// Percentage of samples whose signed delay lies in `[lower, upper]` seconds.
    PercentWithin { lower: f64, upper: f64 },
}

impl Reducer {
    pub fn name(&self) -> &'static str {
        match self {
            Reducer::Average { .. } => "average",
            Reducer::Max { .. } => "max",
            Reducer::PercentWithin { .. } => "on_time",
        }
    }
}

/// Which routes a query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteSelection {
    One(String),
    All,
}

/// A bucketed chart request over `[start, end)`, epoch seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketQuery {
    pub start: i64,
    pub end: i64,
    pub unit_count: usize,
    pub routes: RouteSelection,
    pub reducer: Reducer,
}

/// Values for one route, one per bucket; `None` where a bucket had no samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSeries {
    pub route: String,
    pub values: Vec<Option<f64>>,
}

/// Chart-ready result of a [`BucketQuery`].
#[derive(Debug, Clone, Serialize)]
pub struct ChartSeries {
    pub generated_at: DateTime<Utc>,
    pub start: i64,
    pub end: i64,
    pub bucket_seconds: f64,
    pub reducer: Reducer,
    pub labels: Vec<String>,
    pub series: Vec<RouteSeries>,
}
