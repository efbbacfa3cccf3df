//! Time-bucketed aggregation of stored route samples.

use chrono::DateTime;
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::analyzers::types::{BucketQuery, ChartSeries, Reducer, RouteSelection, RouteSeries};
use crate::analyzers::utility::{max, mean, percent_within};
use crate::model::{RouteDelaySample, UNKNOWN_ROUTE};
use crate::routes::{RouteOrdering, sort_routes};
use crate::store::{TimeSeriesStore, is_sorted_by_timestamp};

pub const DEFAULT_UNIT_COUNT: usize = 7;

const DAY_SECS: f64 = 86_400.0;

#[derive(Debug, thiserror::Error)]
pub enum BucketError {
    #[error("start time {start} must be before end time {end}")]
    InvalidRange { start: i64, end: i64 },
    #[error("bucket count must be at least 1")]
    InvalidUnitCount,
    #[error("sample store query failed: {0}")]
    Store(#[from] anyhow::Error),
}

/// Validates a range and returns the (fractional) bucket width in seconds.
pub fn bucket_width(start: i64, end: i64, unit_count: usize) -> Result<f64, BucketError> {
    if start >= end {
        return Err(BucketError::InvalidRange { start, end });
    }
    if unit_count == 0 {
        return Err(BucketError::InvalidUnitCount);
    }
    // in f64: `end - start` overflows i64 for wide ranges
    Ok((end as f64 - start as f64) / unit_count as f64)
}

fn reduce(samples: &[RouteDelaySample], reducer: Reducer) -> Option<f64> {
    match reducer {
        Reducer::Average { unit } => {
            let values: Vec<f64> = samples
                .iter()
                .filter_map(RouteDelaySample::magnitude_delay_seconds)
                .collect();
            mean(&values).map(|v| unit.convert(v))
        }
        Reducer::Max { unit } => {
            let values: Vec<f64> = samples
                .iter()
                .filter_map(RouteDelaySample::magnitude_delay_seconds)
                .collect();
            max(&values).map(|v| unit.convert(v))
        }
        Reducer::PercentWithin { lower, upper } => {
            let values: Vec<f64> = samples
                .iter()
                .filter_map(|s| s.average_delay_seconds)
                .collect();
            percent_within(&values, lower, upper)
        }
    }
}

/// Folds timestamp-sorted `samples` into `unit_count` buckets over `[start, end)`.
///
/// One forward pass: the cursor only ever moves forward, so the cost is
/// O(samples + buckets). Unsorted input is not detected here and yields wrong
/// buckets; callers sort first.
pub fn bucket_samples(
    samples: &[RouteDelaySample],
    start: i64,
    end: i64,
    unit_count: usize,
    reducer: Reducer,
) -> Result<Vec<Option<f64>>, BucketError> {
    let width = bucket_width(start, end, unit_count)?;

    let mut cursor = 0;
    while cursor < samples.len() && samples[cursor].timestamp < start {
        cursor += 1;
    }

    let mut values = Vec::with_capacity(unit_count);
    for bucket in 0..unit_count {
        // The last edge is pinned to `end` so float error cannot drop samples.
        let bucket_end = if bucket + 1 == unit_count {
            end as f64
        } else {
            start as f64 + width * (bucket + 1) as f64
        };

        let slice_start = cursor;
        while cursor < samples.len() && (samples[cursor].timestamp as f64) < bucket_end {
            cursor += 1;
        }
        values.push(reduce(&samples[slice_start..cursor], reducer));
    }

    Ok(values)
}

/// One label per bucket, at the bucket's start, rendered in `tz`.
///
/// Day-or-wider buckets get a date, narrower ones a date and time.
pub fn bucket_labels(
    start: i64,
    end: i64,
    unit_count: usize,
    tz: Tz,
) -> Result<Vec<String>, BucketError> {
    let width = bucket_width(start, end, unit_count)?;
    let format = if width >= DAY_SECS {
        "%Y-%m-%d"
    } else {
        "%Y-%m-%d %H:%M"
    };

    Ok((0..unit_count)
        .map(|bucket| {
            let at = start.saturating_add((width * bucket as f64).floor() as i64);
            DateTime::from_timestamp(at, 0)
                .map(|utc| utc.with_timezone(&tz).format(format).to_string())
                .unwrap_or_default()
        })
        .collect())
}

/// Runs a bucketed chart query against `store`.
///
/// A range without samples gives `None`-filled series, not an error.
#[tracing::instrument(skip(store, ordering), fields(reducer = query.reducer.name()))]
pub async fn run_query(
    store: &dyn TimeSeriesStore,
    ordering: &dyn RouteOrdering,
    query: &BucketQuery,
    tz: Tz,
) -> Result<ChartSeries, BucketError> {
    let bucket_seconds = bucket_width(query.start, query.end, query.unit_count)?;
    let labels = bucket_labels(query.start, query.end, query.unit_count, tz)?;

    let mut routes = match &query.routes {
        RouteSelection::One(route) => vec![route.clone()],
        RouteSelection::All => store
            .routes()
            .await?
            .into_iter()
            .filter(|r| r != UNKNOWN_ROUTE)
            .collect(),
    };
    sort_routes(&mut routes, ordering);

    let mut series = Vec::with_capacity(routes.len());
    for route in routes {
        let mut samples = store.range_query(&route, query.start, query.end).await?;
        if !is_sorted_by_timestamp(&samples) {
            warn!(route = %route, "Store returned unsorted samples, sorting");
            samples.sort_by_key(|s| s.timestamp);
        }

        let values = bucket_samples(
            &samples,
            query.start,
            query.end,
            query.unit_count,
            query.reducer,
        )?;
        debug!(route = %route, samples = samples.len(), "Route bucketed");
        series.push(RouteSeries { route, values });
    }

    Ok(ChartSeries {
        generated_at: chrono::Utc::now(),
        start: query.start,
        end: query.end,
        bucket_seconds,
        reducer: query.reducer,
        labels,
        series,
    })
}
