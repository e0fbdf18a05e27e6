//! Backoff policies and the expiry arithmetic behind them.

use std::time::Duration;

pub const HOUR_2: Duration = Duration::from_secs(2 * 60 * 60);
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);
pub const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const MONTH: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const MONTHS_4: Duration = Duration::from_secs(120 * 24 * 60 * 60);

/// How long an `(ident, task)` pair stays suppressed after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Never retried until cleared by hand.
    Forever,
    /// Suppressed until the given unix time in milliseconds.
    Exactly(i64),
    /// First suppression lasts `base`; each further one doubles the previous interval.
    Exponential { base: Duration },
}

impl BackoffPolicy {
    /// Exponential backoff anchored at one day, the common case for fetch failures.
    pub fn exponential() -> Self {
        BackoffPolicy::Exponential { base: DAY }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackoffPolicy::Forever => "forever",
            BackoffPolicy::Exactly(_) => "exactly",
            BackoffPolicy::Exponential { .. } => "exponential",
        }
    }

    /// Computes the row to write given the previous `(issued, expire)` pair.
    ///
    /// Returns `None` when the existing record must be left untouched, which only
    /// happens when an exponential backoff meets a forever record.
    pub fn next_record(&self, previous: Option<(i64, Option<i64>)>, now: i64) -> Option<BackoffRow> {
        match self {
            BackoffPolicy::Forever => Some(BackoffRow {
                issued: now,
                expire: None,
            }),
            BackoffPolicy::Exactly(at) => Some(BackoffRow {
                issued: now,
                expire: Some(*at),
            }),
            BackoffPolicy::Exponential { base } => {
                let base_ms = base.as_millis() as i64;
                let interval = match previous {
                    Some((_, None)) => return None,
                    Some((issued, Some(expire))) if expire > issued => {
                        (expire - issued).saturating_mul(2)
                    }
                    _ => base_ms,
                };
                Some(BackoffRow {
                    issued: now,
                    expire: Some(now.saturating_add(interval)),
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffRow {
    pub issued: i64,
    pub expire: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn forever_and_exactly_overwrite() {
        assert_eq!(
            BackoffPolicy::Forever.next_record(Some((1, Some(2))), NOW),
            Some(BackoffRow {
                issued: NOW,
                expire: None
            })
        );
        assert_eq!(
            BackoffPolicy::Exactly(NOW + 5).next_record(None, NOW),
            Some(BackoffRow {
                issued: NOW,
                expire: Some(NOW + 5)
            })
        );
    }

    #[test]
    fn exponential_starts_at_base_then_doubles() {
        let policy = BackoffPolicy::Exponential { base: HOUR_2 };
        let base_ms = HOUR_2.as_millis() as i64;

        let first = policy.next_record(None, NOW).unwrap();
        assert_eq!(first.expire, Some(NOW + base_ms));

        let later = NOW + base_ms + 10;
        let second = policy
            .next_record(Some((first.issued, first.expire)), later)
            .unwrap();
        assert_eq!(second.issued, later);
        assert_eq!(second.expire, Some(later + 2 * base_ms));

        let third = policy
            .next_record(Some((second.issued, second.expire)), later)
            .unwrap();
        assert_eq!(third.expire, Some(later + 4 * base_ms));
    }

    #[test]
    fn exponential_never_downgrades_forever() {
        let policy = BackoffPolicy::exponential();
        assert_eq!(policy.next_record(Some((NOW, None)), NOW + 1), None);
    }

    #[test]
    fn exponential_after_degenerate_record_uses_base() {
        // an Exactly record already in the past relative to its issue time
        let policy = BackoffPolicy::Exponential { base: WEEK };
        let row = policy.next_record(Some((NOW, Some(NOW - 1))), NOW).unwrap();
        assert_eq!(row.expire, Some(NOW + WEEK.as_millis() as i64));
    }
}
