use chrono::{DateTime, Timelike, Utc};

/// True if `dt` is already hour-aligned (minute/second/millisecond all zero).
pub fn is_hour_aligned(dt: DateTime<Utc>) -> bool {
    dt.minute() == 0 && dt.second() == 0 && dt.nanosecond() == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn detects_hour_alignment() {
        let aligned = Utc.with_ymd_and_hms(2025, 11, 12, 20, 0, 0).unwrap();
        let unaligned = Utc.with_ymd_and_hms(2025, 11, 12, 20, 0, 1).unwrap();
        assert!(is_hour_aligned(aligned));
        assert!(!is_hour_aligned(unaligned));
    }
}
