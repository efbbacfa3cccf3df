use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::analyzers::utility::mean;
use crate::model::{CompactBusState, RouteDelaySample, TripDelayReport, UNKNOWN_ROUTE};
use crate::routes::RouteResolver;

/// Result of reducing one snapshot's reports to per-route samples.
#[derive(Debug, Default)]
pub struct Aggregation {
    /// One sample per resolved route, ordered by route name.
    pub samples: Vec<RouteDelaySample>,
    /// Reports that fell into the [`UNKNOWN_ROUTE`] group.
    pub unresolved: usize,
}

/// Direction-aware mean: early (negative) and late (positive) delays cancel.
///
/// Stored as the sample average and used for on-time percentages.
pub fn signed_average<I>(delays: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<i32>>,
{
    let values: Vec<f64> = delays.into_iter().flatten().map(f64::from).collect();
    mean(&values)
}

/// Severity mean over absolute delays.
///
/// Used by the average and max chart reducers.
pub fn magnitude_average<I>(delays: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<i32>>,
{
    let values: Vec<f64> = delays
        .into_iter()
        .flatten()
        .map(|d| f64::from(d).abs())
        .collect();
    mean(&values)
}

struct MemoResolver<'a> {
    resolver: &'a dyn RouteResolver,
    agency_id: &'a str,
    cache: HashMap<&'a str, Option<String>>,
}

impl<'a> MemoResolver<'a> {
    fn resolve(&mut self, vendor_id: &'a str) -> Option<String> {
        let (resolver, agency_id) = (self.resolver, self.agency_id);
        self.cache
            .entry(vendor_id)
            .or_insert_with(|| resolver.resolve(agency_id, vendor_id))
            .clone()
    }
}

#[derive(Default)]
struct RouteGroup {
    delays: Vec<Option<i32>>,
    bus_states: Vec<CompactBusState>,
}

/// Groups `reports` by friendly route name and reduces each group to a
/// [`RouteDelaySample`] stamped with the snapshot `timestamp`.
///
/// Each distinct vendor id is resolved at most once per call. Reports with no
/// delay are left out of the average but keep their bus state.
pub fn aggregate_routes<'a>(
    agency_id: &'a str,
    timestamp: i64,
    reports: &'a [TripDelayReport],
    resolver: &'a dyn RouteResolver,
) -> Aggregation {
    let mut memo = MemoResolver {
        resolver,
        agency_id,
        cache: HashMap::new(),
    };

    let mut groups: BTreeMap<String, RouteGroup> = BTreeMap::new();
    let mut unresolved = 0;

    for report in reports {
        let route = report
            .route_id
            .as_deref()
            .and_then(|id| memo.resolve(id))
            .or_else(|| memo.resolve(&report.trip_id));

        let route = route.unwrap_or_else(|| {
            unresolved += 1;
            UNKNOWN_ROUTE.to_string()
        });

        let group = groups.entry(route).or_default();
        group.delays.push(report.delay_seconds);

        let stop_id = report.closest_stop_id.as_deref().unwrap_or_default();
        match CompactBusState::new(report.delay_seconds, stop_id, report.trip_id.as_str()) {
            Ok(state) => group.bus_states.push(state),
            Err(e) => warn!(trip_id = %report.trip_id, error = %e, "Dropping unencodable bus state"),
        }
    }

    if unresolved > 0 {
        debug!(agency_id, unresolved, "Reports with unknown route or trip ids");
    }

    let samples = groups
        .into_iter()
        .map(|(route, group)| RouteDelaySample {
            route,
            timestamp,
            average_delay_seconds: signed_average(group.delays),
            bus_states: group.bus_states,
        })
        .collect();

    Aggregation {
        samples,
        unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CountingResolver {
        calls: Mutex<Vec<String>>,
    }

    impl CountingResolver {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RouteResolver for CountingResolver {
        fn resolve(&self, _agency_id: &str, vendor_id: &str) -> Option<String> {
            self.calls.lock().unwrap().push(vendor_id.to_string());
            match vendor_id {
                "R1" | "trip-a" => Some("Route 1".to_string()),
                "R2" => Some("Route 2".to_string()),
                _ => None,
            }
        }
    }

    fn report(trip: &str, route: Option<&str>, delay: Option<i32>) -> TripDelayReport {
        TripDelayReport {
            trip_id: trip.to_string(),
            route_id: route.map(str::to_string),
            delay_seconds: delay,
            closest_stop_id: Some(format!("stop-{trip}")),
            stop_sequence: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_averages() {
        let delays = [Some(-60), Some(120), None];
        assert_eq!(signed_average(delays), Some(30.0));
        assert_eq!(magnitude_average(delays), Some(90.0));
        assert_eq!(signed_average([None, None]), None);
    }

    #[test]
    fn test_one_sample_per_route() {
        let resolver = CountingResolver::new();
        let reports = vec![
            report("t1", Some("R1"), Some(60)),
            report("t2", Some("R2"), Some(-30)),
            report("t3", Some("R1"), Some(0)),
        ];

        let agg = aggregate_routes("a", 1_000, &reports, &resolver);

        assert_eq!(agg.unresolved, 0);
        assert_eq!(agg.samples.len(), 2);
        let route1 = &agg.samples[0];
        assert_eq!(route1.route, "Route 1");
        assert_eq!(route1.timestamp, 1_000);
        assert_eq!(route1.average_delay_seconds, Some(30.0));
        assert_eq!(route1.bus_states.len(), 2);
        assert_eq!(agg.samples[1].average_delay_seconds, Some(-30.0));
    }

    #[test]
    fn test_null_delay_excluded_from_average_but_kept_as_bus_state() {
        let resolver = CountingResolver::new();
        let reports = vec![
            report("t1", Some("R1"), Some(100)),
            report("t2", Some("R1"), None),
        ];

        let agg = aggregate_routes("a", 5, &reports, &resolver);
        let sample = &agg.samples[0];

        assert_eq!(sample.average_delay_seconds, Some(100.0));
        let encoded: Vec<String> = sample.bus_states.iter().map(|s| s.to_string()).collect();
        assert_eq!(encoded, vec!["100#stop-t1#t1", "#stop-t2#t2"]);
    }

    #[test]
    fn test_group_with_only_null_delays_still_emitted() {
        let resolver = CountingResolver::new();
        let agg = aggregate_routes("a", 5, &[report("t1", Some("R2"), None)], &resolver);

        assert_eq!(agg.samples.len(), 1);
        assert_eq!(agg.samples[0].average_delay_seconds, None);
        assert_eq!(agg.samples[0].bus_states.len(), 1);
    }

    #[test]
    fn test_unresolved_reports_go_to_unknown_route() {
        let resolver = CountingResolver::new();
        let reports = vec![
            report("t-x", Some("R404"), Some(10)),
            report("t1", Some("R1"), Some(20)),
        ];

        let agg = aggregate_routes("a", 5, &reports, &resolver);

        assert_eq!(agg.unresolved, 1);
        let unknown = agg.samples.iter().find(|s| s.route == UNKNOWN_ROUTE).unwrap();
        assert_eq!(unknown.average_delay_seconds, Some(10.0));
    }

    #[test]
    fn test_trip_id_used_when_route_id_unknown() {
        let resolver = CountingResolver::new();
        let agg = aggregate_routes("a", 5, &[report("trip-a", None, Some(1))], &resolver);
        assert_eq!(agg.samples[0].route, "Route 1");
    }

    #[test]
    fn test_resolver_memoised_per_run() {
        let resolver = CountingResolver::new();
        let reports: Vec<_> = (0..5)
            .map(|i| report(&format!("t{i}"), Some("R1"), Some(i)))
            .collect();

        aggregate_routes("a", 5, &reports, &resolver);

        assert_eq!(resolver.calls(), vec!["R1"]);
    }

    #[test]
    fn test_unencodable_ids_keep_delay_in_average() {
        let resolver = CountingResolver::new();
        let agg = aggregate_routes("a", 5, &[report("bad#trip", Some("R1"), Some(40))], &resolver);

        assert_eq!(agg.samples[0].average_delay_seconds, Some(40.0));
        assert!(agg.samples[0].bus_states.is_empty());
    }
}
