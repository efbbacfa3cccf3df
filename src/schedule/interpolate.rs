//! Linear interpolation of missing stop-time anchors within one trip.

use serde::{Deserialize, Serialize};

/// Scheduled times at one stop of a trip, seconds past service-day midnight.
///
/// Values may exceed 86400 for trips running past midnight (`25:10:00`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopTimeAnchor {
    pub sequence: u32,
    pub arrival_time_secs: Option<i64>,
    pub departure_time_secs: Option<i64>,
}

impl StopTimeAnchor {
    pub fn new(sequence: u32, arrival: Option<i64>, departure: Option<i64>) -> Self {
        Self {
            sequence,
            arrival_time_secs: arrival,
            departure_time_secs: departure,
        }
    }
}

/// Returns `true` when sequences strictly increase.
pub fn is_ordered_by_sequence(anchors: &[StopTimeAnchor]) -> bool {
    anchors.windows(2).all(|w| w[0].sequence < w[1].sequence)
}

/// Fills null arrival and departure times in place, each channel on its own.
///
/// Interior gaps are interpolated linearly between the nearest known values and
/// rounded to the nearest second; leading and trailing gaps copy their single
/// known neighbour. A channel with no known value is left untouched. Input that
/// is not ordered by sequence is left untouched as well.
///
/// Returns the number of values filled.
pub fn interpolate_stop_times(anchors: &mut [StopTimeAnchor]) -> usize {
    if anchors.is_empty() {
        return 0;
    }
    if !is_ordered_by_sequence(anchors) {
        tracing::warn!(
            len = anchors.len(),
            "Stop times not ordered by sequence, skipping interpolation"
        );
        return 0;
    }

    fill_channel(anchors, |a| &mut a.arrival_time_secs)
        + fill_channel(anchors, |a| &mut a.departure_time_secs)
}

fn fill_channel<F>(anchors: &mut [StopTimeAnchor], mut slot: F) -> usize
where
    F: FnMut(&mut StopTimeAnchor) -> &mut Option<i64>,
{
    let known: Vec<(usize, i64)> = anchors
        .iter_mut()
        .enumerate()
        .filter_map(|(idx, a)| (*slot(a)).map(|v| (idx, v)))
        .collect();

    let (Some(&(first_idx, first_val)), Some(&(last_idx, last_val))) =
        (known.first(), known.last())
    else {
        return 0;
    };

    let mut filled = 0;
    let mut set = |a: &mut StopTimeAnchor, v: i64| {
        *slot(a) = Some(v);
        filled += 1;
    };

    for a in &mut anchors[..first_idx] {
        set(a, first_val);
    }
    for a in &mut anchors[last_idx + 1..] {
        set(a, last_val);
    }

    for pair in known.windows(2) {
        let (i, v0) = pair[0];
        let (j, v1) = pair[1];
        let span = (j - i) as f64;
        for k in i + 1..j {
            let step = (v1 - v0) as f64 * (k - i) as f64 / span;
            set(&mut anchors[k], v0 + step.round() as i64);
        }
    }

    filled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hms(h: i64, m: i64, s: i64) -> i64 {
        h * 3600 + m * 60 + s
    }

    fn arrivals(anchors: &[StopTimeAnchor]) -> Vec<Option<i64>> {
        anchors.iter().map(|a| a.arrival_time_secs).collect()
    }

    fn arrival_only(values: &[Option<i64>]) -> Vec<StopTimeAnchor> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| StopTimeAnchor::new(i as u32 + 1, *v, None))
            .collect()
    }

    #[test]
    fn test_interior_gap_is_linear() {
        let mut anchors = arrival_only(&[Some(100), None, None, Some(400)]);
        interpolate_stop_times(&mut anchors);
        assert_eq!(
            arrivals(&anchors),
            vec![Some(100), Some(200), Some(300), Some(400)]
        );
    }

    #[test]
    fn test_rounds_to_nearest_second() {
        let mut anchors = arrival_only(&[Some(0), None, None, Some(10)]);
        interpolate_stop_times(&mut anchors);
        // 10/3 = 3.33 and 20/3 = 6.67
        assert_eq!(arrivals(&anchors), vec![Some(0), Some(3), Some(7), Some(10)]);
    }

    #[test]
    fn test_midnight_rollover_does_not_wrap() {
        let mut anchors = arrival_only(&[Some(hms(25, 0, 0)), None, Some(hms(26, 0, 0))]);
        interpolate_stop_times(&mut anchors);
        assert_eq!(anchors[1].arrival_time_secs, Some(hms(25, 30, 0)));

        let mut crossing = arrival_only(&[Some(hms(23, 50, 0)), None, Some(hms(24, 10, 0))]);
        interpolate_stop_times(&mut crossing);
        assert_eq!(crossing[1].arrival_time_secs, Some(hms(24, 0, 0)));
    }

    #[test]
    fn test_single_known_value_fills_everything() {
        let mut anchors = arrival_only(&[None, None, Some(500), None]);
        interpolate_stop_times(&mut anchors);
        assert_eq!(arrivals(&anchors), vec![Some(500); 4]);
    }

    #[test]
    fn test_edges_copy_nearest_known_value() {
        let mut anchors = arrival_only(&[None, Some(10), None, Some(30), None, None]);
        interpolate_stop_times(&mut anchors);
        assert_eq!(
            arrivals(&anchors),
            vec![Some(10), Some(10), Some(20), Some(30), Some(30), Some(30)]
        );
    }

    #[test]
    fn test_channel_without_values_stays_null() {
        let mut anchors = arrival_only(&[None, None, None]);
        assert_eq!(interpolate_stop_times(&mut anchors), 0);
        assert_eq!(arrivals(&anchors), vec![None, None, None]);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut anchors = vec![
            StopTimeAnchor::new(1, Some(100), None),
            StopTimeAnchor::new(2, None, Some(260)),
            StopTimeAnchor::new(3, Some(300), Some(360)),
        ];
        let filled = interpolate_stop_times(&mut anchors);

        assert_eq!(filled, 3);
        assert_eq!(anchors[1].arrival_time_secs, Some(200));
        assert_eq!(anchors[0].departure_time_secs, Some(260));
        assert_eq!(anchors[1].departure_time_secs, Some(260));
    }

    #[test]
    fn test_empty_and_unsorted_inputs_are_noops() {
        let mut empty: Vec<StopTimeAnchor> = vec![];
        assert_eq!(interpolate_stop_times(&mut empty), 0);

        let mut unsorted = vec![
            StopTimeAnchor::new(3, Some(300), None),
            StopTimeAnchor::new(1, None, None),
            StopTimeAnchor::new(2, Some(100), None),
        ];
        let before = unsorted.clone();
        assert!(!is_ordered_by_sequence(&unsorted));
        assert_eq!(interpolate_stop_times(&mut unsorted), 0);
        assert_eq!(unsorted, before);
    }

    #[test]
    fn test_interpolated_values_stay_between_neighbours() {
        // Deterministic pseudo-random lists; known values are never changed and
        // every filled value lies between its nearest known neighbours.
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..200 {
            let len = (next() % 12 + 2) as usize;
            let mut values: Vec<Option<i64>> = (0..len)
                .map(|_| (next() % 3 == 0).then(|| (next() % 100_000) as i64))
                .collect();
            values[0] = Some((next() % 100_000) as i64);
            values[len - 1] = Some((next() % 100_000) as i64);

            let mut anchors = arrival_only(&values);
            interpolate_stop_times(&mut anchors);

            let mut last_known = 0;
            for (k, original) in values.iter().enumerate() {
                let value = anchors[k].arrival_time_secs.unwrap();
                match original {
                    Some(v) => {
                        assert_eq!(value, *v);
                        last_known = k;
                    }
                    None => {
                        let lo = values[last_known].unwrap();
                        let next_known = (k..len).find(|&n| values[n].is_some()).unwrap();
                        let hi = values[next_known].unwrap();
                        assert!(value >= lo.min(hi) && value <= lo.max(hi));
                    }
                }
            }
        }
    }
}
