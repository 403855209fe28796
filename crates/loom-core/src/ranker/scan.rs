//! Scan-task ranker: time-decay priority since the last run.

use chrono::{DateTime, Duration, Utc};

use super::{NEVER_RUN_PRIORITY, NOT_ELIGIBLE};

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRanker {
    /// Minimum dwell time after a run before the target is eligible again.
    pub grace_period: Duration,
    /// Priority right after the grace period ends (least urgent).
    pub max_priority: i64,
    /// Priority the decay approaches (most urgent, apart from never-run targets).
    pub floor: i64,
    /// Decay horizon.
    pub max_days: i64,
}

impl Default for ScanRanker {
    fn default() -> Self {
        Self {
            grace_period: Duration::days(1),
            max_priority: 1000,
            floor: 3,
            max_days: 7,
        }
    }
}

impl ScanRanker {
    /// `priority = floor + (max − floor) · e^(−k·t)`, `k = ln(max − floor) / max_days_secs`,
    /// with `t` the seconds elapsed since the grace period ended.
    pub fn rank(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
        let Some(last_run) = last_run else {
            return NEVER_RUN_PRIORITY;
        };

        let eligible_at = last_run + self.grace_period;
        if now < eligible_at {
            return NOT_ELIGIBLE;
        }

        let span = (self.max_priority - self.floor).max(1) as f64;
        let horizon = Duration::days(self.max_days.max(1)).num_seconds() as f64;
        let k = span.ln() / horizon;
        let t = (now - eligible_at).num_seconds() as f64;

        let priority = self.floor as f64 + span * (-k * t).exp();
        (priority.floor() as i64).max(self.floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn never_run_targets_are_urgent() {
        assert_eq!(ScanRanker::default().rank(None, now()), 2);
    }

    #[test]
    fn targets_inside_grace_period_are_not_eligible() {
        let ranker = ScanRanker::default();
        let last_run = now() - Duration::hours(23);
        assert_eq!(ranker.rank(Some(last_run), now()), -1);
    }

    #[test]
    fn priority_starts_at_max_when_grace_period_ends() {
        let ranker = ScanRanker::default();
        let last_run = now() - ranker.grace_period;
        assert_eq!(ranker.rank(Some(last_run), now()), 1000);
    }

    #[test]
    fn priority_decreases_strictly_with_elapsed_time() {
        let ranker = ScanRanker::default();
        let ranks: Vec<i64> = (0..=7)
            .map(|day| {
                let last_run = now() - ranker.grace_period - Duration::days(day);
                ranker.rank(Some(last_run), now())
            })
            .collect();

        for pair in ranks.windows(2) {
            assert!(pair[1] < pair[0], "expected strict decrease: {ranks:?}");
        }
    }

    #[test]
    fn priority_approaches_floor_at_max_days() {
        let ranker = ScanRanker::default();
        let at_horizon = now() - ranker.grace_period - Duration::days(7);
        let rank = ranker.rank(Some(at_horizon), now());
        assert!((3..=4).contains(&rank), "rank at max_days was {rank}");

        let long_ago = now() - Duration::days(365);
        assert_eq!(ranker.rank(Some(long_ago), now()), 3);
    }
}
