//! Records shared across the ingest and query paths.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Group name used for reports whose route could not be resolved.
pub const UNKNOWN_ROUTE: &str = "UNKNOWN_ROUTE";

const FIELD_SEPARATOR: char = '#';

/// One trip's observed deviation within a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripDelayReport {
    pub trip_id: String,
    pub route_id: Option<String>,
    /// `None` when the vendor omitted every delay field for this trip.
    pub delay_seconds: Option<i32>,
    pub closest_stop_id: Option<String>,
    pub stop_sequence: Option<u32>,
    /// Predicted arrival (or departure) at the closest stop, epoch seconds.
    pub predicted_time: Option<i64>,
    /// GTFS service day (`YYYYMMDD`) from the trip descriptor.
    pub start_date: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BusStateError {
    #[error("field contains the '#' separator: {0}")]
    SeparatorInField(String),
    #[error("expected 3 fields, found {0}")]
    FieldCount(usize),
    #[error("invalid delay value: {0}")]
    InvalidDelay(String),
}

/// Per-bus drill-down entry, stored as `delay#stopId#tripId`.
///
/// A missing delay is encoded as an empty first field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactBusState {
    delay_seconds: Option<i32>,
    closest_stop_id: String,
    trip_id: String,
}

impl CompactBusState {
    pub fn new(
        delay_seconds: Option<i32>,
        closest_stop_id: impl Into<String>,
        trip_id: impl Into<String>,
    ) -> Result<Self, BusStateError> {
        let closest_stop_id = closest_stop_id.into();
        let trip_id = trip_id.into();

        for field in [&closest_stop_id, &trip_id] {
            if field.contains(FIELD_SEPARATOR) {
                return Err(BusStateError::SeparatorInField(field.clone()));
            }
        }

        Ok(Self {
            delay_seconds,
            closest_stop_id,
            trip_id,
        })
    }

    pub fn delay_seconds(&self) -> Option<i32> {
        self.delay_seconds
    }

    pub fn closest_stop_id(&self) -> &str {
        &self.closest_stop_id
    }

    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }
}

impl fmt::Display for CompactBusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(delay) = self.delay_seconds {
            write!(f, "{delay}")?;
        }
        write!(
            f,
            "{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}",
            self.closest_stop_id, self.trip_id
        )
    }
}

impl FromStr for CompactBusState {
    type Err = BusStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(FIELD_SEPARATOR).collect();
        let [delay, stop_id, trip_id] = fields.as_slice() else {
            return Err(BusStateError::FieldCount(fields.len()));
        };

        let delay_seconds = if delay.is_empty() {
            None
        } else {
            Some(
                delay
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| BusStateError::InvalidDelay(delay.to_string()))?,
            )
        };

        Ok(Self {
            delay_seconds,
            closest_stop_id: stop_id.to_string(),
            trip_id: trip_id.to_string(),
        })
    }
}

impl Serialize for CompactBusState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CompactBusState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parses stored bus-state strings, dropping (and logging) malformed entries.
pub fn parse_bus_states<I, S>(raw: I) -> Vec<CompactBusState>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|s| match s.as_ref().parse::<CompactBusState>() {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(raw = s.as_ref(), error = %e, "Skipping malformed bus state");
                None
            }
        })
        .collect()
}

/// Persisted per-route, per-snapshot delay record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDelaySample {
    pub route: String,
    /// Vendor-reported snapshot time, epoch seconds.
    pub timestamp: i64,
    /// Signed mean over bus states that carry a delay.
    pub average_delay_seconds: Option<f64>,
    pub bus_states: Vec<CompactBusState>,
}

impl RouteDelaySample {
    /// Severity of the sample: mean absolute bus delay, or the absolute stored
    /// average when no bus state carries a delay.
    pub fn magnitude_delay_seconds(&self) -> Option<f64> {
        let bus_delays = self.bus_states.iter().map(CompactBusState::delay_seconds);
        crate::analyzers::aggregate::magnitude_average(bus_delays)
            .or_else(|| self.average_delay_seconds.map(f64::abs))
    }
}

/// Health of one agency feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedHealth {
    Active,
    Unauthorized,
    Unavailable,
    Outdated,
    Timeout,
    Deleted,
}

impl FeedHealth {
    /// Terminal until the feed is re-registered.
    pub fn is_terminal(self) -> bool {
        matches!(self, FeedHealth::Unauthorized | FeedHealth::Deleted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeedHealth::Active => "ACTIVE",
            FeedHealth::Unauthorized => "UNAUTHORIZED",
            FeedHealth::Unavailable => "UNAVAILABLE",
            FeedHealth::Outdated => "OUTDATED",
            FeedHealth::Timeout => "TIMEOUT",
            FeedHealth::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for FeedHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
