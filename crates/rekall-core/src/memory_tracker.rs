//! Memory Tracker (C5): consolidation scoring and SM-2 review scheduling.
//! See `spec.md` §4.5.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::entry::Entry;

#[derive(Debug, Error)]
pub enum RatingError {
    #[error("invalid rating {0}, must be 0..=5")]
    InvalidRating(i64),
}

/// Review rating, `r ∈ {0,1,2,3,4,5}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rating(i64);

impl Rating {
    pub fn new(r: i64) -> Result<Self, RatingError> {
        if !(0..=5).contains(&r) {
            return Err(RatingError::InvalidRating(r));
        }
        Ok(Self(r))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

/// Record an access: increments `access_count` and sets `accessed_at`.
/// Writes do not count as accesses, per `spec.md` §4.5 — callers must only
/// invoke this from a read path that materializes the entry.
pub fn record_access(entry: &mut Entry, now: DateTime<Utc>) {
    entry.access_count += 1;
    entry.accessed_at = now;
}

/// Consolidation score: a pure function of the entry at query time, never
/// persisted. `frequency_factor` and `freshness_factor` combine 0.6/0.4.
pub fn consolidation(entry: &Entry, now: DateTime<Utc>) -> f64 {
    let frequency_factor = frequency_factor(entry.access_count);
    let freshness_factor = freshness_factor(entry.accessed_at, now);
    0.6 * frequency_factor + 0.4 * freshness_factor
}

fn frequency_factor(access_count: i64) -> f64 {
    let access_count = access_count.max(0) as f64;
    ((1.0 + access_count).ln() / (1.0 + 20.0f64).ln()).min(1.0)
}

fn freshness_factor(accessed_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let delta_days = (now - accessed_at).num_milliseconds() as f64 / 86_400_000.0;
    (-delta_days.max(0.0) / 30.0).exp()
}

/// Apply an SM-2 review grade to `entry` in place, per `spec.md` §4.5.
pub fn grade(entry: &mut Entry, rating: Rating, now: DateTime<Utc>) {
    let r = rating.value();
    let first_review = entry.last_reviewed_at.is_none();

    if first_review || r < 3 {
        entry.interval_days = 1;
    } else if r == 3 {
        entry.interval_days = ((entry.interval_days.max(1) as f64) * entry.ease_factor * 0.8)
            .round()
            .max(1.0) as i64;
    } else if r == 4 {
        entry.interval_days = ((entry.interval_days.max(1) as f64) * entry.ease_factor)
            .round()
            .max(1.0) as i64;
    } else {
        entry.interval_days = ((entry.interval_days.max(1) as f64) * entry.ease_factor * 1.3)
            .round()
            .max(1.0) as i64;
    }

    if r < 3 {
        entry.ease_factor = (entry.ease_factor - 0.2).max(1.3);
    } else if r == 5 {
        entry.ease_factor += 0.1;
    }

    entry.due_at = Some(now + chrono::Duration::days(entry.interval_days));
    entry.last_reviewed_at = Some(now);
}

/// True if `entry` is currently due: `due_at <= now` and not deprecated.
pub fn is_due(entry: &Entry, now: DateTime<Utc>) -> bool {
    !entry.deprecated && entry.due_at.is_some_and(|d| d <= now)
}

/// True if `entry` has not been accessed within `threshold_days`.
pub fn is_stale(entry: &Entry, threshold_days: i64, now: DateTime<Utc>) -> bool {
    entry.accessed_at < now - chrono::Duration::days(threshold_days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;

    fn entry() -> Entry {
        Entry::new("id".into(), EntryKind::Bug, "t".into(), "b".into(), Utc::now())
    }

    #[test]
    fn consolidation_is_bounded() {
        let now = Utc::now();
        let mut e = entry();
        e.access_count = 1000;
        e.accessed_at = now;
        assert!(consolidation(&e, now) <= 1.0 && consolidation(&e, now) >= 0.0);

        e.access_count = 0;
        e.accessed_at = now - chrono::Duration::days(3650);
        assert!(consolidation(&e, now) >= 0.0);
    }

    #[test]
    fn freshness_is_monotonically_non_increasing_in_elapsed_time() {
        let now = Utc::now();
        let close = freshness_factor(now - chrono::Duration::days(1), now);
        let far = freshness_factor(now - chrono::Duration::days(30), now);
        assert!(close >= far);
    }

    #[test]
    fn scenario_3_sm2_schedule() {
        let now = Utc::now();
        let mut e = entry();
        assert_eq!(e.ease_factor, 2.5);

        grade(&mut e, Rating::new(4).unwrap(), now);
        assert_eq!(e.interval_days, 1);
        assert_eq!(e.ease_factor, 2.5);

        let t1 = e.due_at.unwrap();
        grade(&mut e, Rating::new(4).unwrap(), t1);
        assert_eq!(e.interval_days, 3);
        assert_eq!(e.ease_factor, 2.5);

        grade(&mut e, Rating::new(2).unwrap(), t1);
        assert_eq!(e.interval_days, 1);
        assert!((e.ease_factor - 2.3).abs() < 1e-9);

        let t2 = e.due_at.unwrap();
        grade(&mut e, Rating::new(5).unwrap(), t2);
        assert_eq!(e.interval_days, 3);
        assert!((e.ease_factor - 2.4).abs() < 1e-9);
    }

    #[test]
    fn rating_ge_3_never_shrinks_interval() {
        let now = Utc::now();
        let mut e = entry();
        e.interval_days = 10;
        e.last_reviewed_at = Some(now);
        grade(&mut e, Rating::new(3).unwrap(), now);
        assert!(e.interval_days >= 10);
    }

    #[test]
    fn rating_lt_3_resets_interval_to_one() {
        let now = Utc::now();
        let mut e = entry();
        e.interval_days = 30;
        e.last_reviewed_at = Some(now);
        grade(&mut e, Rating::new(1).unwrap(), now);
        assert_eq!(e.interval_days, 1);
    }

    #[test]
    fn invalid_rating_rejected() {
        assert!(Rating::new(6).is_err());
        assert!(Rating::new(-1).is_err());
    }

    #[test]
    fn due_excludes_deprecated() {
        let now = Utc::now();
        let mut e = entry();
        e.due_at = Some(now - chrono::Duration::days(1));
        assert!(is_due(&e, now));
        e.deprecated = true;
        assert!(!is_due(&e, now));
    }
}
