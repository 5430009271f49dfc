/// Order statistics helpers.

/// Median by selection (in-place, reorders the slice).
///
/// Upper median for even lengths. NaN sorts last under `total_cmp`, so callers
/// should filter non-finite values first.
pub(crate) fn find_median(data: &mut [f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let k = data.len() / 2;
    let (_, median, _) = data.select_nth_unstable_by(k, |a, b| a.total_cmp(b));
    *median
}

/// Median absolute deviation about the median. Reorders `data`.
pub(crate) fn median_abs_dev(data: &mut [f32]) -> (f32, f32) {
    let median = find_median(data);
    let mut devs: Vec<f32> = data.iter().map(|&v| (v - median).abs()).collect();
    (median, find_median(&mut devs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_and_even() {
        let mut odd = vec![5.0_f32, 1.0, 3.0];
        assert_eq!(find_median(&mut odd), 3.0);

        let mut even = vec![4.0_f32, 1.0, 3.0, 2.0];
        assert_eq!(find_median(&mut even), 3.0);

        let mut empty: Vec<f32> = Vec::new();
        assert_eq!(find_median(&mut empty), 0.0);
    }

    #[test]
    fn test_mad_ignores_single_outlier() {
        let mut data = vec![1.0_f32, 2.0, 3.0, 4.0, 1000.0];
        let (median, mad) = median_abs_dev(&mut data);
        assert_eq!(median, 3.0);
        assert_eq!(mad, 1.0);
    }
}
