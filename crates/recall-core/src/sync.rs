//! Persistence synchronizer.
//!
//! The gateway lives on a dedicated storage thread. The engine talks to it
//! through a [`StorageHandle`] that sends [`Command`]s over a channel:
//!
//! - writes are fire-and-forget; the engine never waits on them and each
//!   one carries a full snapshot of the set it replaces
//! - the hydration read waits for a reply, but only up to a timeout; no
//!   answer counts as no data
//! - [`StorageHandle::flush`] blocks until every earlier command has been
//!   handled
//!
//! The worker records the outcome of every write in [`SyncStats`], which
//! [`StorageHandle::shutdown`] hands back once the queue is drained.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use tracing::{debug, warn};

use crate::gateway::{
    BlobStore, Envelope, Gateway, GatewayError, GatewayRequest, GatewayResponse, PersistedState,
};
use crate::store::ShadowStore;

pub const DEFAULT_CALLER_ID: &str = "recall-core";
pub const DEFAULT_HYDRATE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Longest single backoff sleep between write attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Identity stamped on every request.
    pub caller_id: String,
    /// Extra attempts for a failed write. Zero means a failed write is
    /// logged and dropped.
    pub write_retries: u32,
    /// First backoff delay; doubles per retry.
    pub retry_backoff: Duration,
    /// How long hydration waits for the `GetAll` reply.
    pub hydrate_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            caller_id: DEFAULT_CALLER_ID.to_string(),
            write_retries: 0,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            hydrate_timeout: DEFAULT_HYDRATE_TIMEOUT,
        }
    }
}

/// Outcome counters kept by the storage worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncStats {
    pub writes_ok: u64,
    pub writes_failed: u64,
    /// Requests refused because of the caller id.
    pub rejected: u64,
    /// Write attempts beyond the first.
    pub retries: u64,
    pub reads_failed: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no reply from storage within {0:?}")]
    TimedOut(Duration),

    #[error("storage worker is not running")]
    Disconnected,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

enum Command {
    Write(Envelope),
    Load {
        envelope: Envelope,
        reply: Sender<Result<PersistedState, GatewayError>>,
    },
    Flush(Sender<()>),
}

pub struct StorageHandle {
    tx: Option<Sender<Command>>,
    worker: Option<JoinHandle<SyncStats>>,
    caller_id: String,
    hydrate_timeout: Duration,
}

impl std::fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandle")
            .field("caller_id", &self.caller_id)
            .field("running", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl StorageHandle {
    /// Move `gateway` onto a new storage thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn spawn<S>(gateway: Gateway<S>, options: SyncOptions) -> std::io::Result<Self>
    where
        S: BlobStore + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = StorageWorker {
            gateway,
            write_retries: options.write_retries,
            retry_backoff: options.retry_backoff,
            stats: SyncStats::default(),
        };
        let join = thread::Builder::new()
            .name("recall-storage".into())
            .spawn(move || worker.run(&rx))?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(join),
            caller_id: options.caller_id,
            hydrate_timeout: options.hydrate_timeout,
        })
    }

    #[must_use]
    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    /// Issue the single `GetAll` read and wait for it, bounded by the
    /// hydrate timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when the read fails, times out or the worker
    /// is gone. Callers treat every error as "no data".
    pub fn load(&self) -> Result<PersistedState, LoadError> {
        let tx = self.tx.as_ref().ok_or(LoadError::Disconnected)?;
        let (reply, rx) = crossbeam_channel::bounded(1);
        tx.send(Command::Load {
            envelope: Envelope::new(self.caller_id.clone(), GatewayRequest::GetAll),
            reply,
        })
        .map_err(|_| LoadError::Disconnected)?;

        match rx.recv_timeout(self.hydrate_timeout) {
            Ok(result) => result.map_err(LoadError::from),
            Err(RecvTimeoutError::Timeout) => Err(LoadError::TimedOut(self.hydrate_timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(LoadError::Disconnected),
        }
    }

    /// Queue a write and return immediately.
    pub fn write(&self, request: GatewayRequest) {
        let Some(tx) = self.tx.as_ref() else {
            warn!(op = request.op(), "storage worker stopped; dropping write");
            return;
        };
        let op = request.op();
        if tx
            .send(Command::Write(Envelope::new(self.caller_id.clone(), request)))
            .is_err()
        {
            warn!(op, "storage worker stopped; dropping write");
        }
    }

    /// Drain the store's dirty marks and queue one write per changed part.
    pub fn flush_dirty(&self, store: &mut ShadowStore) {
        let dirty = store.take_dirty();
        if dirty.is_clean() {
            return;
        }

        if dirty.active {
            match store.encode_active() {
                Ok(blob) => self.write(GatewayRequest::SetActive { blob }),
                Err(err) => warn!(error = %err, "failed to encode active set"),
            }
        }
        if dirty.retained {
            match store.encode_retained() {
                Ok(blob) => self.write(GatewayRequest::SetRetained { blob }),
                Err(err) => warn!(error = %err, "failed to encode retained set"),
            }
        }
        if dirty.purge_clock
            && let Some(timestamp) = store.last_purge_time()
        {
            self.write(GatewayRequest::SetLastPurgeTime { timestamp });
        }
    }

    /// Block until every command sent before this call has been handled.
    ///
    /// Returns `false` if the worker is no longer running.
    pub fn flush(&self) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        let (ack, rx) = crossbeam_channel::bounded(1);
        if tx.send(Command::Flush(ack)).is_err() {
            return false;
        }
        rx.recv().is_ok()
    }

    /// Close the queue, let the worker finish what is pending, and return
    /// its counters.
    pub fn shutdown(mut self) -> SyncStats {
        self.stop()
    }

    fn stop(&mut self) -> SyncStats {
        drop(self.tx.take());
        self.worker
            .take()
            .map(|join| {
                join.join().unwrap_or_else(|_| {
                    warn!("storage worker panicked");
                    SyncStats::default()
                })
            })
            .unwrap_or_default()
    }
}

impl Drop for StorageHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop();
        }
    }
}

struct StorageWorker<S> {
    gateway: Gateway<S>,
    write_retries: u32,
    retry_backoff: Duration,
    stats: SyncStats,
}

impl<S: BlobStore> StorageWorker<S> {
    fn run(mut self, rx: &Receiver<Command>) -> SyncStats {
        for command in rx {
            match command {
                Command::Write(envelope) => self.write(&envelope),
                Command::Load { envelope, reply } => {
                    let result = self.load(&envelope);
                    // The engine may have given up waiting already.
                    let _ = reply.send(result);
                }
                Command::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!(stats = ?self.stats, "storage worker stopped");
        self.stats
    }

    fn load(&mut self, envelope: &Envelope) -> Result<PersistedState, GatewayError> {
        match self.gateway.handle(envelope) {
            Ok(GatewayResponse::State(state)) => Ok(state),
            Ok(GatewayResponse::Written) => Ok(PersistedState::default()),
            Err(err) => {
                self.note_failure(&err);
                self.stats.reads_failed += 1;
                Err(err)
            }
        }
    }

    fn write(&mut self, envelope: &Envelope) {
        let op = envelope.request.op();
        let mut attempt: u32 = 0;
        loop {
            match self.gateway.handle(envelope) {
                Ok(_) => {
                    self.stats.writes_ok += 1;
                    debug!(op, attempt, "persisted");
                    return;
                }
                Err(err) => {
                    self.note_failure(&err);
                    let retryable = !matches!(err, GatewayError::CallerRejected { .. });
                    if !retryable || attempt >= self.write_retries {
                        self.stats.writes_failed += 1;
                        warn!(
                            op,
                            attempt,
                            code = %err.code(),
                            error = %err,
                            "write failed; persisted copy is stale until the next write"
                        );
                        return;
                    }
                    let delay = backoff(self.retry_backoff, attempt);
                    debug!(op, attempt, ?delay, error = %err, "retrying write");
                    thread::sleep(delay);
                    attempt += 1;
                    self.stats.retries += 1;
                }
            }
        }
    }

    fn note_failure(&mut self, err: &GatewayError) {
        if matches!(err, GatewayError::CallerRejected { .. }) {
            self.stats.rejected += 1;
        }
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 1_u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryBlobStore;
    use crate::model::{HostMessage, MessageRecord};

    fn spawn_with(store: MemoryBlobStore, options: SyncOptions) -> StorageHandle {
        StorageHandle::spawn(Gateway::new(DEFAULT_CALLER_ID, store), options).expect("spawn")
    }

    #[test]
    fn writes_land_after_flush() {
        let backing = MemoryBlobStore::new();
        let handle = spawn_with(backing.clone(), SyncOptions::default());

        handle.write(GatewayRequest::SetLastPurgeTime { timestamp: 42 });
        assert!(handle.flush());
        assert_eq!(backing.state().last_purge_time, Some(42));

        let stats = handle.shutdown();
        assert_eq!(stats.writes_ok, 1);
        assert_eq!(stats.writes_failed, 0);
    }

    #[test]
    fn flush_dirty_writes_only_changed_parts() {
        let backing = MemoryBlobStore::new();
        let handle = spawn_with(backing.clone(), SyncOptions::default());
        let mut store = ShadowStore::new();
        store.insert(MessageRecord::reduce(&HostMessage::text(
            "m1", "t1", "fbid:1", "hi", 1,
        )));

        handle.flush_dirty(&mut store);
        handle.flush();
        assert_eq!(backing.write_count(), 1);
        assert!(backing.state().active.is_some());
        assert!(backing.state().retained.is_none());

        handle.flush_dirty(&mut store);
        handle.flush();
        assert_eq!(backing.write_count(), 1);
    }

    #[test]
    fn load_returns_persisted_state() {
        let backing = MemoryBlobStore::with_state(PersistedState {
            active: Some("{}".into()),
            retained: None,
            last_purge_time: Some(3),
        });
        let handle = spawn_with(backing, SyncOptions::default());
        let state = handle.load().expect("load");
        assert_eq!(state.last_purge_time, Some(3));
    }

    #[test]
    fn load_failure_is_reported() {
        let backing = MemoryBlobStore::new();
        backing.set_fail_reads(true);
        let handle = spawn_with(backing, SyncOptions::default());
        assert!(matches!(handle.load(), Err(LoadError::Gateway(_))));
        assert_eq!(handle.shutdown().reads_failed, 1);
    }

    #[test]
    fn rejected_caller_is_counted_not_retried() {
        let backing = MemoryBlobStore::new();
        let options = SyncOptions {
            caller_id: "someone-else".into(),
            write_retries: 3,
            retry_backoff: Duration::from_millis(1),
            ..SyncOptions::default()
        };
        let handle = spawn_with(backing.clone(), options);
        handle.write(GatewayRequest::SetLastPurgeTime { timestamp: 1 });

        let stats = handle.shutdown();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.retries, 0);
        assert_eq!(stats.writes_failed, 1);
        assert_eq!(backing.state().last_purge_time, None);
    }

    #[test]
    fn failed_write_is_retried_when_configured() {
        let backing = MemoryBlobStore::new();
        backing.set_fail_writes(true);
        let options = SyncOptions {
            write_retries: 2,
            retry_backoff: Duration::from_millis(1),
            ..SyncOptions::default()
        };
        let handle = spawn_with(backing, options);
        handle.write(GatewayRequest::SetLastPurgeTime { timestamp: 1 });

        let stats = handle.shutdown();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.writes_failed, 1);
    }

    #[test]
    fn failed_write_is_dropped_by_default() {
        let backing = MemoryBlobStore::new();
        backing.set_fail_writes(true);
        let handle = spawn_with(backing, SyncOptions::default());
        handle.write(GatewayRequest::SetActive { blob: "{}".into() });

        let stats = handle.shutdown();
        assert_eq!(stats.retries, 0);
        assert_eq!(stats.writes_failed, 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(50);
        assert_eq!(backoff(base, 0), Duration::from_millis(50));
        assert_eq!(backoff(base, 1), Duration::from_millis(100));
        assert_eq!(backoff(base, 3), Duration::from_millis(400));
        assert_eq!(backoff(base, 30), MAX_BACKOFF);
    }
}
