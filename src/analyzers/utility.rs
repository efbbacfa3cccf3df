/// Computes the arithmetic mean of a slice of values. Returns `None` for empty input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Largest value, or `None` for empty input.
pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Share of values inside `[lower, upper]`, in percent. Returns `None` for empty input.
pub fn percent_within(values: &[f64], lower: f64, upper: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let inside = values.iter().filter(|v| (lower..=upper).contains(*v)).count();
    Some(inside as f64 / values.len() as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_inputs() {
        assert_eq!(mean(&[]), None);
        assert_eq!(max(&[]), None);
        assert_eq!(percent_within(&[], -1.0, 1.0), None);
    }

    #[test]
    fn test_mean_and_max() {
        assert_eq!(mean(&[5.0, 10.0]), Some(7.5));
        assert_eq!(max(&[-3.0, 12.0, 4.0]), Some(12.0));
    }

    #[test]
    fn test_percent_within_is_inclusive() {
        assert_eq!(percent_within(&[-5.0, 5.0, 6.0, 0.0], -5.0, 5.0), Some(75.0));
    }
}
