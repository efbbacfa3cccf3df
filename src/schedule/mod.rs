//! Static GTFS schedule: route names, trip-to-route mapping and per-trip stop
//! times, read from a GTFS zip.
//!
//! Only `routes.txt`, `trips.txt` and `stop_times.txt` are read, and only the
//! columns needed for route resolution and delay attribution.

pub mod attribution;
pub mod interpolate;

use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::{debug, info};

use crate::routes::RouteTable;
use interpolate::{StopTimeAnchor, interpolate_stop_times};

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("GTFS archive error in {file}: {source}")]
    Zip {
        file: &'static str,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("GTFS CSV error in {file}: {source}")]
    Csv {
        file: &'static str,
        #[source]
        source: csv::Error,
    },
}

/// In-memory static schedule for one agency.
#[derive(Debug, Default)]
pub struct StaticSchedule {
    /// Shared with the route directory once installed.
    pub routes: Arc<RouteTable>,
    /// trip_id -> anchors ordered by stop sequence, gaps already interpolated
    pub stop_times: HashMap<String, Vec<StopTimeAnchor>>,
}

#[derive(Debug, Deserialize)]
struct RouteRow {
    route_id: String,
    #[serde(default)]
    route_short_name: Option<String>,
    #[serde(default)]
    route_long_name: Option<String>,
    #[serde(default)]
    route_sort_order: Option<u32>,
}

impl RouteRow {
    fn friendly_name(&self) -> &str {
        [&self.route_short_name, &self.route_long_name]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or(&self.route_id)
    }
}

#[derive(Debug, Deserialize)]
struct TripRow {
    route_id: String,
    trip_id: String,
}

#[derive(Debug, Deserialize)]
struct StopTimeRow {
    trip_id: String,
    #[serde(default)]
    arrival_time: Option<String>,
    #[serde(default)]
    departure_time: Option<String>,
    stop_sequence: u32,
}

/// Parses a GTFS `HH:MM:SS` time into seconds past midnight.
///
/// Hours above 23 are accepted (`25:10:00` is 90600).
pub fn parse_gtfs_time(value: &str) -> Option<i64> {
    let mut parts = value.trim().split(':');
    let h: i64 = parts.next()?.parse().ok()?;
    let m: i64 = parts.next()?.parse().ok()?;
    let s: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(0..60).contains(&m) || !(0..60).contains(&s) || h < 0 {
        return None;
    }
    h.checked_mul(3600)?.checked_add(m * 60 + s)
}

impl StaticSchedule {
    /// Loads a schedule from the bytes of a GTFS zip.
    pub fn from_zip_bytes(bytes: &[u8]) -> Result<Self, ScheduleError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|source| {
            ScheduleError::Zip {
                file: "archive",
                source,
            }
        })?;

        let routes_file = open_entry(&mut archive, "routes.txt")?;
        let route_rows: Vec<RouteRow> = read_rows(routes_file, "routes.txt")?;

        let trips_file = open_entry(&mut archive, "trips.txt")?;
        let trip_rows: Vec<TripRow> = read_rows(trips_file, "trips.txt")?;

        let stop_times_file = open_entry(&mut archive, "stop_times.txt")?;
        let stop_time_rows: Vec<StopTimeRow> = read_rows(stop_times_file, "stop_times.txt")?;

        Ok(Self::from_rows(route_rows, trip_rows, stop_time_rows))
    }

    fn from_rows(
        route_rows: Vec<RouteRow>,
        trip_rows: Vec<TripRow>,
        stop_time_rows: Vec<StopTimeRow>,
    ) -> Self {
        let mut routes = RouteTable::default();
        for row in &route_rows {
            routes.insert_route(&row.route_id, row.friendly_name(), row.route_sort_order);
        }
        for row in &trip_rows {
            routes.insert_trip(&row.trip_id, &row.route_id);
        }

        let mut stop_times: HashMap<String, Vec<StopTimeAnchor>> = HashMap::new();
        for row in stop_time_rows {
            let arrival = row.arrival_time.as_deref().and_then(parse_gtfs_time);
            let departure = row.departure_time.as_deref().and_then(parse_gtfs_time);
            stop_times
                .entry(row.trip_id)
                .or_default()
                .push(StopTimeAnchor::new(row.stop_sequence, arrival, departure));
        }

        let mut filled = 0;
        for anchors in stop_times.values_mut() {
            anchors.sort_by_key(|a| a.sequence);
            anchors.dedup_by_key(|a| a.sequence);
            filled += interpolate_stop_times(anchors);
        }

        info!(
            routes = routes.route_count(),
            trips = routes.trip_count(),
            trips_with_stop_times = stop_times.len(),
            interpolated = filled,
            "Static schedule loaded"
        );

        Self {
            routes: Arc::new(routes),
            stop_times,
        }
    }

    pub fn anchors(&self, trip_id: &str) -> Option<&[StopTimeAnchor]> {
        self.stop_times.get(trip_id).map(Vec::as_slice)
    }
}

fn open_entry<'a>(
    archive: &'a mut zip::ZipArchive<Cursor<&[u8]>>,
    file: &'static str,
) -> Result<impl Read + 'a, ScheduleError> {
    debug!(file, "Reading GTFS table");
    archive
        .by_name(file)
        .map_err(|source| ScheduleError::Zip { file, source })
}

fn read_rows<T, R>(reader: R, file: &'static str) -> Result<Vec<T>, ScheduleError>
where
    T: for<'de> Deserialize<'de>,
    R: Read,
{
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    rdr.deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| ScheduleError::Csv { file, source })
}
