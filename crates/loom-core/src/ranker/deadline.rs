//! Deadline ranker for recurring work (schedules, report tasks).

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct DeadlineRanker {
    pub grace_period: Duration,
    /// Bound of the random jitter added when there is no cron expression.
    pub max_jitter: Duration,
}

impl Default for DeadlineRanker {
    fn default() -> Self {
        Self {
            grace_period: Duration::days(1),
            max_jitter: Duration::hours(5),
        }
    }
}

impl DeadlineRanker {
    /// Next deadline, sampling jitter from the thread RNG.
    pub fn next_deadline(
        &self,
        cron: Option<&cron::Schedule>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let bound = self.max_jitter.num_seconds().max(0);
        let jitter = rand::thread_rng().gen_range(-bound..=bound);
        self.next_deadline_with_jitter(cron, now, Duration::seconds(jitter))
    }

    /// Cron next-fire time when present; otherwise `now + grace + jitter`,
    /// never earlier than `now + grace`.
    pub fn next_deadline_with_jitter(
        &self,
        cron: Option<&cron::Schedule>,
        now: DateTime<Utc>,
        jitter: Duration,
    ) -> DateTime<Utc> {
        if let Some(next) = cron.and_then(|c| c.after(&now).next()) {
            return next;
        }
        let earliest = now + self.grace_period;
        (earliest + jitter).max(earliest)
    }

    /// Priority is the deadline in epoch seconds, so earlier deadlines sort first.
    pub fn rank(&self, cron: Option<&cron::Schedule>, now: DateTime<Utc>) -> i64 {
        self.next_deadline(cron, now).timestamp()
    }
}
