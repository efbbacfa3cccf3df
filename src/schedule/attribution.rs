//! Delay attribution for trip reports that carry a predicted time but no delay.

use chrono::{DateTime, Days, NaiveDate, TimeZone};
use chrono_tz::Tz;

use super::StaticSchedule;
use crate::model::TripDelayReport;

const NOON_SECS: i64 = 12 * 3600;

/// Epoch seconds of "noon minus 12h" on `date` in `tz`, the origin GTFS stop
/// times are measured from. Differs from midnight on DST change days.
pub fn service_day_origin(date: NaiveDate, tz: Tz) -> Option<i64> {
    let noon = date.and_hms_opt(12, 0, 0)?;
    let local = tz.from_local_datetime(&noon).earliest()?;
    Some(local.timestamp() - NOON_SECS)
}

fn parse_service_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d").ok()
}

/// Fills `delay_seconds` for reports that lack it, using the scheduled time of
/// the report's stop. Returns how many reports were attributed.
///
/// Reports need a predicted time, a stop sequence and a trip present in the
/// schedule. Without a service date on the trip, both the snapshot's local
/// date and the day before are tried and the smaller deviation is kept, so
/// trips that started before midnight still match.
pub fn attribute_delays(
    reports: &mut [TripDelayReport],
    schedule: &StaticSchedule,
    snapshot_timestamp: i64,
    tz: Tz,
) -> usize {
    let snapshot_date = DateTime::from_timestamp(snapshot_timestamp, 0)
        .map(|utc| utc.with_timezone(&tz).date_naive());

    let mut attributed = 0;
    for report in reports.iter_mut().filter(|r| r.delay_seconds.is_none()) {
        let (Some(predicted), Some(sequence)) = (report.predicted_time, report.stop_sequence)
        else {
            continue;
        };
        let Some(scheduled) = schedule
            .anchors(&report.trip_id)
            .and_then(|anchors| anchors.iter().find(|a| a.sequence == sequence))
            .and_then(|a| a.arrival_time_secs.or(a.departure_time_secs))
        else {
            continue;
        };

        let candidates: Vec<NaiveDate> = match report.start_date.as_deref().and_then(parse_service_date) {
            Some(date) => vec![date],
            None => snapshot_date
                .into_iter()
                .flat_map(|d| [Some(d), d.checked_sub_days(Days::new(1))])
                .flatten()
                .collect(),
        };

        let delay = candidates
            .into_iter()
            .filter_map(|date| service_day_origin(date, tz))
            .map(|origin| predicted - (origin + scheduled))
            .min_by_key(|delay| delay.abs());

        if let Some(delay) = delay.and_then(|d| i32::try_from(d).ok()) {
            report.delay_seconds = Some(delay);
            attributed += 1;
        }
    }

    if attributed > 0 {
        tracing::debug!(attributed, "Delays attributed from static schedule");
    }
    attributed
}
