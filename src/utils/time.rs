use chrono::{DateTime, Utc};

/// Whole seconds from `from` to `to`, rounded toward negative infinity.
pub fn floor_seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_milliseconds().div_euclid(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn floor_rounds_down_for_negative_spans() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(floor_seconds_between(t, t + Duration::milliseconds(1500)), 1);
        assert_eq!(floor_seconds_between(t, t - Duration::milliseconds(1500)), -2);
        assert_eq!(floor_seconds_between(t, t), 0);
    }
}
