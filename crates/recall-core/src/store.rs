//! The shadow store: active and retained message sets plus the purge clock.
//!
//! # Invariants
//!
//! - A message id lives in at most one of the two sets.
//! - The only transition is active → retained ([`ShadowStore::promote`]).
//! - Retained records are never modified. They are only ever dropped when a
//!   retained cap is configured, oldest first.
//! - Every mutation marks the touched part of the store dirty; the
//!   persistence synchronizer drains the marks with
//!   [`ShadowStore::take_dirty`] and writes full snapshots of what changed.
//!
//! The store is owned by a single engine and never shared, so it has no
//! internal locking.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::gateway::StoreKey;
use crate::model::MessageRecord;

/// Map of message id to shadow record, as stored in a persisted blob.
pub type MessageMap = BTreeMap<String, MessageRecord>;

/// Which parts of the store changed since the last drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirtySet {
    pub active: bool,
    pub retained: bool,
    pub purge_clock: bool,
}

impl DirtySet {
    /// Nothing changed.
    #[must_use]
    pub const fn is_clean(self) -> bool {
        !self.active && !self.retained && !self.purge_clock
    }
}

/// Serialized views of the store, ready to hand to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub active: String,
    pub retained: String,
    pub last_purge_time: Option<i64>,
}

/// Counts for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub active: usize,
    pub retained: usize,
    pub last_purge_time: Option<i64>,
}

/// What hydration found in the persisted blobs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HydrationReport {
    pub active_entries: usize,
    pub retained_entries: usize,
    /// Blobs that failed to parse and were replaced by an empty set.
    pub malformed: Vec<StoreKey>,
    /// Ids found in both blobs; the retained copy was kept.
    pub overlapping: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ShadowStore {
    active: MessageMap,
    retained: MessageMap,
    last_purge_time: Option<i64>,
    max_retained: Option<usize>,
    dirty: DirtySet,
}

impl ShadowStore {
    /// Empty store with no retained cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the retained set at `max` records (oldest dropped first).
    /// `None` keeps retained records forever.
    ///
    /// A store already over the cap is trimmed right away.
    #[must_use]
    pub fn with_retained_cap(mut self, max: Option<usize>) -> Self {
        self.max_retained = max.map(|m| m.max(1));
        self.enforce_retained_cap(None);
        self
    }

    /// Rebuild a store from persisted blobs.
    ///
    /// A blob that fails to parse is treated as an empty set; the other
    /// blob is still loaded. The returned store starts clean.
    #[must_use]
    pub fn hydrate(
        active_blob: Option<&str>,
        retained_blob: Option<&str>,
        last_purge_time: Option<i64>,
    ) -> (Self, HydrationReport) {
        let mut report = HydrationReport::default();

        let mut active = decode_blob(StoreKey::Active, active_blob, &mut report);
        let retained = decode_blob(StoreKey::Retained, retained_blob, &mut report);

        let before = active.len();
        active.retain(|id, _| !retained.contains_key(id));
        report.overlapping = before - active.len();
        if report.overlapping > 0 {
            warn!(
                overlapping = report.overlapping,
                "ids present in both persisted sets; keeping retained copies"
            );
        }

        report.active_entries = active.len();
        report.retained_entries = retained.len();

        let store = Self {
            active,
            retained,
            last_purge_time,
            max_retained: None,
            dirty: DirtySet::default(),
        };
        (store, report)
    }

    /// Add or overwrite a record in the active set.
    ///
    /// Returns `false` (and changes nothing) when the id is already
    /// retained, since retained records are immutable.
    pub fn insert(&mut self, record: MessageRecord) -> bool {
        if self.retained.contains_key(&record.message_id) {
            debug!(message_id = %record.message_id, "ignoring insert for retained message");
            return false;
        }
        self.active.insert(record.message_id.clone(), record);
        self.dirty.active = true;
        true
    }

    /// Move a record from active to retained.
    ///
    /// A no-op returning `false` when the id is not in the active set,
    /// including when it was already promoted.
    pub fn promote(&mut self, message_id: &str) -> bool {
        let Some(record) = self.active.remove(message_id) else {
            return false;
        };
        self.retained.insert(message_id.to_string(), record);
        self.dirty.active = true;
        self.dirty.retained = true;
        self.enforce_retained_cap(Some(message_id));
        true
    }

    /// Drop a record from the active set without retaining it.
    pub fn evict_from_active(&mut self, message_id: &str) -> Option<MessageRecord> {
        let removed = self.active.remove(message_id);
        if removed.is_some() {
            self.dirty.active = true;
        }
        removed
    }

    /// Mark the active set for rewrite even though nothing in it changed.
    pub fn touch_active(&mut self) {
        self.dirty.active = true;
    }

    #[must_use]
    pub fn lookup_retained(&self, message_id: &str) -> Option<&MessageRecord> {
        self.retained.get(message_id)
    }

    #[must_use]
    pub fn lookup_active(&self, message_id: &str) -> Option<&MessageRecord> {
        self.active.get(message_id)
    }

    #[must_use]
    pub fn contains_active(&self, message_id: &str) -> bool {
        self.active.contains_key(message_id)
    }

    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }

    /// Active records in id order.
    pub fn active_iter(&self) -> impl Iterator<Item = &MessageRecord> {
        self.active.values()
    }

    /// Retained records in id order.
    pub fn retained_iter(&self) -> impl Iterator<Item = &MessageRecord> {
        self.retained.values()
    }

    #[must_use]
    pub const fn last_purge_time(&self) -> Option<i64> {
        self.last_purge_time
    }

    pub fn set_last_purge_time(&mut self, timestamp: i64) {
        self.last_purge_time = Some(timestamp);
        self.dirty.purge_clock = true;
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            active: self.active.len(),
            retained: self.retained.len(),
            last_purge_time: self.last_purge_time,
        }
    }

    /// Return and clear the dirty marks.
    pub fn take_dirty(&mut self) -> DirtySet {
        std::mem::take(&mut self.dirty)
    }

    /// Peek at the dirty marks without clearing them.
    #[must_use]
    pub const fn dirty(&self) -> DirtySet {
        self.dirty
    }

    /// Serialized active set.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON encoding fails.
    pub fn encode_active(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.active)
    }

    /// Serialized retained set.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON encoding fails.
    pub fn encode_retained(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.retained)
    }

    /// Serialized views of both sets and the purge clock.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON encoding fails.
    pub fn snapshot(&self) -> serde_json::Result<StoreSnapshot> {
        Ok(StoreSnapshot {
            active: self.encode_active()?,
            retained: self.encode_retained()?,
            last_purge_time: self.last_purge_time,
        })
    }

    fn enforce_retained_cap(&mut self, keep: Option<&str>) {
        let Some(max) = self.max_retained else {
            return;
        };
        while self.retained.len() > max {
            let oldest = self
                .retained
                .values()
                .filter(|r| keep != Some(r.message_id.as_str()))
                .min_by(|a, b| {
                    a.timestamp
                        .cmp(&b.timestamp)
                        .then_with(|| a.message_id.cmp(&b.message_id))
                })
                .map(|r| r.message_id.clone());
            let Some(oldest) = oldest else {
                break;
            };
            self.retained.remove(&oldest);
            self.dirty.retained = true;
            debug!(message_id = %oldest, max, "dropped oldest retained message over cap");
        }
    }
}

fn decode_blob(key: StoreKey, blob: Option<&str>, report: &mut HydrationReport) -> MessageMap {
    let Some(raw) = blob else {
        return MessageMap::new();
    };
    match serde_json::from_str::<MessageMap>(raw) {
        Ok(map) => map,
        Err(err) => {
            warn!(
                code = %ErrorCode::MalformedBlob,
                blob = %key,
                error = %err,
                "malformed persisted blob; treating set as empty"
            );
            report.malformed.push(key);
            MessageMap::new()
        }
    }
}
