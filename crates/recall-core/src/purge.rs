//! Time-boxed purge of the active set.
//!
//! The active set only exists so a later retraction has something to
//! promote. Messages that were never retracted are dropped once they are
//! old enough, at most once per interval:
//!
//! - purge clock unset (cold start): set it to `now`, drop nothing
//! - `now > last + interval`: drop every active entry with
//!   `now > entry.timestamp + min_age`, then set the clock to `now`
//! - otherwise: nothing, whatever the entry ages
//!
//! Retained records are never touched here.

use serde::Serialize;
use tracing::{debug, info};

use crate::store::ShadowStore;

pub const DEFAULT_INTERVAL_MS: i64 = 24 * 60 * 60 * 1000;
pub const DEFAULT_MIN_AGE_MS: i64 = 10 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgePolicy {
    /// Minimum time between sweeps.
    pub interval_ms: i64,
    /// Active entries younger than this survive a sweep.
    pub min_age_ms: i64,
}

impl Default for PurgePolicy {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            min_age_ms: DEFAULT_MIN_AGE_MS,
        }
    }
}

impl PurgePolicy {
    /// Whether a sweep is due given the last purge time.
    #[must_use]
    pub const fn is_due(&self, last_purge: i64, now: i64) -> bool {
        now > last_purge.saturating_add(self.interval_ms)
    }

    /// Whether an active entry stamped `timestamp` is old enough to drop.
    #[must_use]
    pub const fn is_expired(&self, timestamp: i64, now: i64) -> bool {
        now > timestamp.saturating_add(self.min_age_ms)
    }
}

/// Result of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Ids dropped from the active set, in id order.
    pub evicted: Vec<String>,
    /// Active entries left after the sweep.
    pub remaining: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PurgeOutcome {
    /// Cold start: the clock was set, nothing was evaluated.
    Initialized { now: i64 },
    /// The interval has not elapsed yet.
    NotDue { next_due: i64 },
    Swept(PurgeReport),
}

impl PurgeOutcome {
    /// Number of active entries dropped.
    #[must_use]
    pub fn evicted_count(&self) -> usize {
        match self {
            Self::Swept(report) => report.evicted.len(),
            Self::Initialized { .. } | Self::NotDue { .. } => 0,
        }
    }
}

/// Evaluate the purge policy against `store` at time `now`.
///
/// Mutations mark the store dirty; the caller is responsible for flushing
/// them to persistence.
pub fn evaluate(store: &mut ShadowStore, policy: &PurgePolicy, now: i64) -> PurgeOutcome {
    let Some(last) = store.last_purge_time() else {
        store.set_last_purge_time(now);
        info!(now, "purge clock initialized");
        return PurgeOutcome::Initialized { now };
    };

    if !policy.is_due(last, now) {
        let next_due = last.saturating_add(policy.interval_ms);
        debug!(last, next_due, "purge not due");
        return PurgeOutcome::NotDue { next_due };
    }

    let expired: Vec<String> = store
        .active_iter()
        .filter(|record| policy.is_expired(record.timestamp, now))
        .map(|record| record.message_id.clone())
        .collect();

    for id in &expired {
        store.evict_from_active(id);
    }
    // A sweep always rewrites the active set, evictions or not.
    store.touch_active();
    store.set_last_purge_time(now);

    let report = PurgeReport {
        evicted: expired,
        remaining: store.active_len(),
    };
    info!(
        evicted = report.evicted.len(),
        remaining = report.remaining,
        "purged stale active messages"
    );
    PurgeOutcome::Swept(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HostMessage, MessageRecord};

    const T: i64 = 1_700_000_000_000;
    const MINUTE: i64 = 60 * 1000;
    const HOUR: i64 = 60 * MINUTE;

    fn store_with(entries: &[(&str, i64)], last_purge: Option<i64>) -> ShadowStore {
        let mut store = ShadowStore::new();
        for (id, ts) in entries {
            store.insert(MessageRecord::reduce(&HostMessage::text(
                *id, "t1", "fbid:1", "hi", *ts,
            )));
        }
        if let Some(last) = last_purge {
            store.set_last_purge_time(last);
        }
        store.take_dirty();
        store
    }

    #[test]
    fn cold_start_only_sets_clock() {
        let mut store = store_with(&[("old", 0)], None);
        let outcome = evaluate(&mut store, &PurgePolicy::default(), T);

        assert_eq!(outcome, PurgeOutcome::Initialized { now: T });
        assert_eq!(store.last_purge_time(), Some(T));
        assert_eq!(store.active_len(), 1);
        let dirty = store.take_dirty();
        assert!(dirty.purge_clock);
        assert!(!dirty.active);
    }

    #[test]
    fn sweep_respects_min_age_boundary() {
        let now = T + 24 * HOUR + 1;
        let mut store = store_with(
            &[("stale", now - 10 * MINUTE - 1), ("fresh", now - 9 * MINUTE)],
            Some(T),
        );

        let outcome = evaluate(&mut store, &PurgePolicy::default(), now);
        let PurgeOutcome::Swept(report) = outcome else {
            panic!("expected sweep, got {outcome:?}");
        };
        assert_eq!(report.evicted, vec!["stale".to_string()]);
        assert_eq!(report.remaining, 1);
        assert!(store.contains_active("fresh"));
        assert_eq!(store.last_purge_time(), Some(now));
    }

    #[test]
    fn exactly_min_age_is_kept() {
        let now = T + 24 * HOUR + 1;
        let mut store = store_with(&[("edge", now - 10 * MINUTE)], Some(T));
        assert_eq!(
            evaluate(&mut store, &PurgePolicy::default(), now).evicted_count(),
            0
        );
        assert!(store.contains_active("edge"));
    }

    #[test]
    fn empty_sweep_still_rewrites_active_set() {
        let now = T + 25 * HOUR;
        let mut store = store_with(&[("fresh", now)], Some(T));

        let outcome = evaluate(&mut store, &PurgePolicy::default(), now);
        assert_eq!(outcome.evicted_count(), 0);
        let dirty = store.take_dirty();
        assert!(dirty.active);
        assert!(dirty.purge_clock);
        assert!(!dirty.retained);
    }

    #[test]
    fn not_due_within_interval() {
        let mut store = store_with(&[("ancient", 0)], Some(T));
        let outcome = evaluate(&mut store, &PurgePolicy::default(), T + 23 * HOUR);

        assert_eq!(
            outcome,
            PurgeOutcome::NotDue {
                next_due: T + 24 * HOUR
            }
        );
        assert_eq!(store.active_len(), 1);
        assert_eq!(store.last_purge_time(), Some(T));
        assert!(store.take_dirty().is_clean());
    }

    #[test]
    fn exactly_one_interval_is_not_due() {
        let mut store = store_with(&[("ancient", 0)], Some(T));
        let outcome = evaluate(&mut store, &PurgePolicy::default(), T + 24 * HOUR);
        assert!(matches!(outcome, PurgeOutcome::NotDue { .. }));
    }

    #[test]
    fn sweep_never_touches_retained() {
        let now = T + 25 * HOUR;
        let mut store = store_with(&[("kept", 0)], Some(T));
        store.promote("kept");

        evaluate(&mut store, &PurgePolicy::default(), now);
        assert!(store.lookup_retained("kept").is_some());
    }

    #[test]
    fn custom_policy_shortens_interval() {
        let policy = PurgePolicy {
            interval_ms: HOUR,
            min_age_ms: MINUTE,
        };
        let mut store = store_with(&[("a", T)], Some(T));
        let outcome = evaluate(&mut store, &policy, T + HOUR + 1);
        assert_eq!(outcome.evicted_count(), 1);
    }
}
