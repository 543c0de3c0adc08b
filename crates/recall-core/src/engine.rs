//! The reconciliation engine.
//!
//! [`RecallEngine`] owns the shadow store and ties the other pieces
//! together. Host lifecycle events come in through
//! [`RecallEngine::on_new_message`] / [`RecallEngine::on_updated_message`]
//! (or [`RecallEngine::dispatch`]); every mutation is pushed to the storage
//! worker before the call returns, without waiting for it to land.
//!
//! Startup order:
//! 1. check the host is usable (fatal if not)
//! 2. hydrate from the gateway, treating any failure as an empty store
//! 3. evaluate the purge policy once

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::RecallConfig;
use crate::error::ErrorCode;
use crate::event::LifecycleEvent;
use crate::host::{HostError, HostPort};
use crate::model::{HostMessage, MessageRecord};
use crate::purge::{self, PurgeOutcome, PurgePolicy};
use crate::resolver::{self, MessageRef};
use crate::store::{HydrationReport, ShadowStore, StoreStats};
use crate::sync::{StorageHandle, SyncStats};

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("cannot start without the host event source: {0}")]
    HostUnavailable(#[from] HostError),
}

impl StartError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::HostUnavailable(err) => err.code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineOptions {
    pub purge: PurgePolicy,
    pub max_retained: Option<usize>,
}

impl From<&RecallConfig> for EngineOptions {
    fn from(config: &RecallConfig) -> Self {
        Self {
            purge: config.purge.policy(),
            max_retained: config.retention.max_retained,
        }
    }
}

/// What happened during [`RecallEngine::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    /// Whether the gateway answered the hydration read.
    pub loaded: bool,
    pub hydration: HydrationReport,
    pub purge: PurgeOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EngineCounters {
    pub ingested: u64,
    /// New messages dropped because the id was already retained.
    pub ignored: u64,
    pub promoted_on_update: u64,
    pub promoted_on_lookup: u64,
    pub purged: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub counters: EngineCounters,
}

pub struct RecallEngine<H, C> {
    host: H,
    clock: C,
    store: ShadowStore,
    storage: StorageHandle,
    policy: PurgePolicy,
    counters: EngineCounters,
    startup: StartupReport,
}

impl<H: HostPort, C: Clock> RecallEngine<H, C> {
    /// Bring the engine up against `host`, hydrating from `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::HostUnavailable`] if the host integration point
    /// is missing. Nothing is loaded or written in that case.
    pub fn start(
        host: H,
        clock: C,
        storage: StorageHandle,
        options: EngineOptions,
    ) -> Result<Self, StartError> {
        if let Err(err) = host.ensure_available() {
            error!(code = %err.code(), error = %err, "host unavailable; recall not started");
            return Err(err.into());
        }

        let (persisted, loaded) = match storage.load() {
            Ok(state) => (state, true),
            Err(err) => {
                warn!(error = %err, "hydration read failed; starting empty");
                (Default::default(), false)
            }
        };
        let (store, hydration) = ShadowStore::hydrate(
            persisted.active.as_deref(),
            persisted.retained.as_deref(),
            persisted.last_purge_time,
        );
        let mut store = store.with_retained_cap(options.max_retained);

        let outcome = purge::evaluate(&mut store, &options.purge, clock.now_millis());
        storage.flush_dirty(&mut store);

        info!(
            active = store.active_len(),
            retained = store.retained_len(),
            loaded,
            "recall engine started"
        );

        let counters = EngineCounters {
            purged: count(outcome.evicted_count()),
            ..EngineCounters::default()
        };

        Ok(Self {
            host,
            clock,
            store,
            storage,
            policy: options.purge,
            counters,
            startup: StartupReport {
                loaded,
                hydration,
                purge: outcome,
            },
        })
    }

    /// Shadow a newly arrived message. Returns `false` when the id is
    /// already retained and the message was ignored.
    pub fn on_new_message(&mut self, thread_id: &str, message: &HostMessage) -> bool {
        let record = MessageRecord::reduce(message);
        debug!(message_id = %record.message_id, thread_id, "shadowing new message");
        let inserted = self.store.insert(record);
        if inserted {
            self.counters.ingested += 1;
        } else {
            self.counters.ignored += 1;
        }
        self.storage.flush_dirty(&mut self.store);
        inserted
    }

    /// Re-check a changed message with the host and retain it if it has
    /// been retracted. Returns whether a promotion happened.
    pub fn on_updated_message(
        &mut self,
        thread_id: &str,
        message_id: &str,
        source: Option<&str>,
    ) -> bool {
        let viewer = self.host.current_user_id();
        let current = self.host.messages_by_ids(&viewer, &[message_id]);
        let Some(latest) = current.first() else {
            debug!(message_id, thread_id, ?source, "host has no record for updated message");
            return false;
        };
        if !latest.is_tombstoned() {
            debug!(message_id, thread_id, ?source, "message updated but not retracted");
            return false;
        }

        let promoted = self.store.promote(message_id);
        if promoted {
            self.counters.promoted_on_update += 1;
            info!(message_id, thread_id, "retained retracted message");
            self.storage.flush_dirty(&mut self.store);
        }
        promoted
    }

    /// Route a lifecycle event to its handler.
    pub fn dispatch(&mut self, event: &LifecycleEvent) -> bool {
        match event {
            LifecycleEvent::NewMessage { thread_id, message } => {
                self.on_new_message(thread_id, message)
            }
            LifecycleEvent::UpdatedMessage {
                thread_id,
                message_id,
                source,
            } => self.on_updated_message(thread_id, message_id, source.as_deref()),
        }
    }

    /// Retraction notice for `message`, as seen by the current user.
    ///
    /// Asking about a message that is still active retains it.
    pub fn removed_content(&mut self, message: &MessageRef) -> Option<String> {
        let viewer = self.host.current_user_id();
        let was_active = self.store.contains_active(&message.message_id);
        let notice = resolver::resolve(&mut self.store, &self.host, &viewer, message);
        if was_active {
            self.counters.promoted_on_lookup += 1;
            self.storage.flush_dirty(&mut self.store);
        }
        notice
    }

    /// Evaluate the purge policy now.
    pub fn run_purge(&mut self) -> PurgeOutcome {
        let outcome = purge::evaluate(&mut self.store, &self.policy, self.clock.now_millis());
        self.counters.purged += count(outcome.evicted_count());
        self.storage.flush_dirty(&mut self.store);
        outcome
    }

    #[must_use]
    pub const fn store(&self) -> &ShadowStore {
        &self.store
    }

    #[must_use]
    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Mutable host access, for adapters that feed the host alongside the
    /// engine.
    pub const fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    #[must_use]
    pub const fn startup(&self) -> &StartupReport {
        &self.startup
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            store: self.store.stats(),
            counters: self.counters,
        }
    }

    /// Wait for every queued write to be handled.
    pub fn flush(&self) -> bool {
        self.storage.flush()
    }

    /// Stop the storage worker after it drains, returning the final store
    /// and the worker's counters.
    pub fn shutdown(self) -> (ShadowStore, SyncStats) {
        let stats = self.storage.shutdown();
        info!(
            writes_ok = stats.writes_ok,
            writes_failed = stats.writes_failed,
            "recall engine stopped"
        );
        (self.store, stats)
    }
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}
