use chrono::{Duration, NaiveDateTime};

use crate::utils::whole_seconds;

/// Decides how much silence (or overlap) goes between two waveform blocks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GapPolicy {
    pub ignore_gap: bool,
    pub ignore_gap_between_segs: bool,
}

impl GapPolicy {
    pub fn new(ignore_gap: bool, ignore_gap_between_segs: bool) -> Self {
        GapPolicy {
            ignore_gap,
            ignore_gap_between_segs,
        }
    }

    /// Gap to apply given the measured one
    ///
    /// `first_measurement` is true for the first block written during a
    /// conversion call, i.e. the seam between two XML inputs.
    pub fn effective_gap(&self, actual_gap: i64, first_measurement: bool) -> i64 {
        if first_measurement && !self.ignore_gap_between_segs {
            actual_gap
        } else if !self.ignore_gap {
            actual_gap
        } else {
            0
        }
    }
}

/// End of the data already in a file: `start + floor(samples / rate)` seconds
pub fn expected_continuation(file_start: &NaiveDateTime, samples: usize, sample_rate: f64) -> NaiveDateTime {
    let secs = (samples as f64 / sample_rate).floor() as i64;
    *file_start + Duration::seconds(secs)
}

/// Whole seconds between the expected continuation and the observed block time
///
/// Negative values denote overlap.
pub fn measured_gap(expected: &NaiveDateTime, observed: &NaiveDateTime) -> i64 {
    whole_seconds(*observed - *expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 4, 1).unwrap().and_hms_opt(10, 0, s).unwrap()
    }

    #[test]
    fn test_effective_gap_table() {
        let cases = [
            // ignore_gap, ignore_between, first, expected
            (false, false, true, 5),
            (false, false, false, 5),
            (false, true, true, 5),
            (false, true, false, 5),
            (true, false, true, 5),
            (true, false, false, 0),
            (true, true, true, 0),
            (true, true, false, 0),
        ];
        for (ignore_gap, ignore_between, first, expected) in cases {
            let policy = GapPolicy::new(ignore_gap, ignore_between);
            assert_eq!(
                policy.effective_gap(5, first),
                expected,
                "ignore_gap={} ignore_between={} first={}",
                ignore_gap,
                ignore_between,
                first
            );
        }
    }

    #[test]
    fn test_overlap_passes_through() {
        assert_eq!(GapPolicy::default().effective_gap(-3, false), -3);
    }

    #[test]
    fn test_expected_continuation_floors() {
        assert_eq!(expected_continuation(&t(0), 480, 240.0), t(2));
        assert_eq!(expected_continuation(&t(0), 719, 240.0), t(2));
    }

    #[test]
    fn test_measured_gap() {
        assert_eq!(measured_gap(&t(2), &t(7)), 5);
        assert_eq!(measured_gap(&t(7), &t(2)), -5);
        let almost = t(3) + Duration::milliseconds(900);
        assert_eq!(measured_gap(&t(2), &almost), 1);
    }
}
