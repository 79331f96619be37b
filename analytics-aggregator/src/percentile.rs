//! Per-batch percentile approximation, nearest-rank method. This is an
//! explicitly-documented approximation: each upsert overwrites the prior
//! percentile with the new batch's local value rather than tracking a
//! reservoir or t-digest across batches (see DESIGN.md's known-gaps
//! section).

/// `sorted_data` must already be sorted ascending. `p` is a percentage in
/// `1..=100`. Returns 0 for an empty slice.
pub fn percentile(sorted_data: &[i64], p: u8) -> i64 {
    if sorted_data.is_empty() {
        return 0;
    }
    let index = (p as f64 / 100.0 * sorted_data.len() as f64).ceil() as usize;
    let index = index.saturating_sub(1).min(sorted_data.len() - 1);
    sorted_data[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slice_is_zero() {
        assert_eq!(percentile(&[], 50), 0);
    }

    #[test]
    fn single_value_is_itself_for_any_percentile() {
        assert_eq!(percentile(&[42], 50), 42);
        assert_eq!(percentile(&[42], 99), 42);
    }

    #[test]
    fn p50_of_ten_ascending_values() {
        let data: Vec<i64> = (1..=10).collect();
        assert_eq!(percentile(&data, 50), 5);
        assert_eq!(percentile(&data, 95), 10);
        assert_eq!(percentile(&data, 99), 10);
    }
}
