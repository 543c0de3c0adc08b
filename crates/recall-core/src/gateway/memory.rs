//! In-process blob store.
//!
//! Clones share the same state, so a test can keep a handle while the
//! storage worker owns another and inspect what actually got written.
//! The fault switches mimic a storage backend that stops answering.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{BlobKey, BlobStore, GatewayError, PersistedState};

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<PersistedState>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    shared: Arc<Shared>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `state`.
    #[must_use]
    pub fn with_state(state: PersistedState) -> Self {
        let store = Self::new();
        *store.lock() = state;
        store
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn state(&self) -> PersistedState {
        self.lock().clone()
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.shared.writes.load(Ordering::SeqCst)
    }

    /// Make every read fail until switched back.
    pub fn set_fail_reads(&self, fail: bool) {
        self.shared.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, PersistedState> {
        // A panicked writer cannot leave PersistedState half-updated.
        self.shared
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_writable(&self) -> Result<(), GatewayError> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("memory store writes disabled".into()));
        }
        Ok(())
    }
}

impl BlobStore for MemoryBlobStore {
    fn get_all(&mut self) -> Result<PersistedState, GatewayError> {
        if self.shared.fail_reads.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("memory store reads disabled".into()));
        }
        Ok(self.state())
    }

    fn put_blob(&mut self, key: BlobKey, blob: &str) -> Result<(), GatewayError> {
        self.check_writable()?;
        {
            let mut state = self.lock();
            let slot = match key {
                BlobKey::Active => &mut state.active,
                BlobKey::Retained => &mut state.retained,
            };
            *slot = Some(blob.to_string());
        }
        self.shared.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn put_last_purge_time(&mut self, timestamp: i64) -> Result<(), GatewayError> {
        self.check_writable()?;
        self.lock().last_purge_time = Some(timestamp);
        self.shared.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
