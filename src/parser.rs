//! Protobuf decoder for GTFS Realtime trip-update snapshots.

use prost::Message;
use std::collections::HashMap;

use crate::gtfs_rt::{FeedMessage, TripUpdate, VehiclePosition, trip_descriptor};
use crate::model::TripDelayReport;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid GTFS-RT protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),
    #[error("feed header carries no timestamp")]
    MissingTimestamp,
    #[error("feed header timestamp {0} is out of range")]
    TimestampOutOfRange(u64),
}

/// One decoded poll of an agency feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Vendor-reported header timestamp, epoch seconds.
    pub timestamp: i64,
    pub reports: Vec<TripDelayReport>,
}

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, DecodeError> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Decodes raw feed bytes into the snapshot timestamp and its trip reports.
///
/// Reports without a route identity (route id or trip id) or without a stop
/// reference are dropped. Reports without any delay field are kept with
/// `delay_seconds = None`.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, DecodeError> {
    let feed = parse_feed(bytes)?;
    let raw = feed.header.timestamp.ok_or(DecodeError::MissingTimestamp)?;
    let timestamp = i64::try_from(raw).map_err(|_| DecodeError::TimestampOutOfRange(raw))?;

    Ok(Snapshot {
        timestamp,
        reports: trip_reports(&feed),
    })
}

/// Extracts [`TripDelayReport`]s from every live trip update in the feed.
pub fn trip_reports(feed: &FeedMessage) -> Vec<TripDelayReport> {
    let vehicles_by_trip: HashMap<&str, &VehiclePosition> = feed
        .entity
        .iter()
        .filter(|e| !e.is_deleted())
        .filter_map(|e| e.vehicle.as_ref())
        .filter_map(|v| Some((v.trip.as_ref()?.trip_id.as_deref()?, v)))
        .collect();

    let mut reports = Vec::new();
    let mut skipped = 0usize;

    for entity in &feed.entity {
        if entity.is_deleted() {
            continue;
        }
        let Some(update) = &entity.trip_update else {
            continue;
        };
        if update.trip.schedule_relationship() == trip_descriptor::ScheduleRelationship::Canceled {
            continue;
        }

        match report_from_update(&entity.id, update, &vehicles_by_trip) {
            Some(report) => reports.push(report),
            None => skipped += 1,
        }
    }

    tracing::debug!(reports = reports.len(), skipped, "Trip updates decoded");
    reports
}

fn report_from_update(
    entity_id: &str,
    update: &TripUpdate,
    vehicles_by_trip: &HashMap<&str, &VehiclePosition>,
) -> Option<TripDelayReport> {
    let trip = &update.trip;
    if trip.route_id.is_none() && trip.trip_id.is_none() {
        return None;
    }
    let trip_id = trip.trip_id.clone().unwrap_or_else(|| entity_id.to_string());

    let first_stop = update.stop_time_update.first();
    let vehicle = vehicles_by_trip.get(trip_id.as_str());

    let closest_stop_id = first_stop
        .and_then(|s| s.stop_id.clone())
        .or_else(|| vehicle.and_then(|v| v.stop_id.clone()));
    let stop_sequence = first_stop
        .and_then(|s| s.stop_sequence)
        .or_else(|| vehicle.and_then(|v| v.current_stop_sequence));

    if closest_stop_id.is_none() && stop_sequence.is_none() {
        return None;
    }

    let delay_seconds = update.delay.or_else(|| {
        first_stop.and_then(|s| {
            s.arrival
                .as_ref()
                .and_then(|e| e.delay)
                .or_else(|| s.departure.as_ref().and_then(|e| e.delay))
        })
    });

    let predicted_time = first_stop.and_then(|s| {
        s.arrival
            .as_ref()
            .and_then(|e| e.time)
            .or_else(|| s.departure.as_ref().and_then(|e| e.time))
    });

    Some(TripDelayReport {
        trip_id,
        route_id: trip.route_id.clone(),
        delay_seconds,
        closest_stop_id,
        stop_sequence,
        predicted_time,
        start_date: trip.start_date.clone(),
    })
}
