//! Persistence gateway: the access protocol for the three named blobs.
//!
//! The gateway sits across a trust boundary from the engine. Requests
//! travel as [`Envelope`]s that name their caller; [`Gateway`] honors a
//! request only when the caller matches its single allow-listed id, then
//! hands it to a [`BlobStore`] backend.
//!
//! Backends:
//! - [`memory::MemoryBlobStore`]: shared in-process map with fault switches
//! - [`sqlite::SqliteBlobStore`]: key/value table in a local SQLite file

pub mod memory;
pub mod sqlite;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ErrorCode;

/// Names of the persisted entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKey {
    Active,
    Retained,
    LastPurgeTime,
}

impl StoreKey {
    /// Key name used by storage backends.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Retained => "retained",
            Self::LastPurgeTime => "last_purge_time",
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two string-valued entries. The purge clock is numeric and has its
/// own write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKey {
    Active,
    Retained,
}

impl BlobKey {
    #[must_use]
    pub const fn store_key(self) -> StoreKey {
        match self {
            Self::Active => StoreKey::Active,
            Self::Retained => StoreKey::Retained,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.store_key().as_str()
    }
}

/// Everything the gateway returns for a `GetAll` read.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub retained: Option<String>,
    #[serde(default)]
    pub last_purge_time: Option<i64>,
}

/// One request in the gateway protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GatewayRequest {
    GetAll,
    SetActive { blob: String },
    SetRetained { blob: String },
    SetLastPurgeTime { timestamp: i64 },
}

impl GatewayRequest {
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::GetAll => "get_all",
            Self::SetActive { .. } => "set_active",
            Self::SetRetained { .. } => "set_retained",
            Self::SetLastPurgeTime { .. } => "set_last_purge_time",
        }
    }
}

/// A request together with the identity of whoever sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub caller: String,
    pub request: GatewayRequest,
}

impl Envelope {
    #[must_use]
    pub fn new(caller: impl Into<String>, request: GatewayRequest) -> Self {
        Self {
            caller: caller.into(),
            request,
        }
    }
}

/// Gateway reply. Writes carry no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResponse {
    State(PersistedState),
    Written,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The caller id is not the allow-listed one.
    #[error("caller '{caller}' is not allowed to use this gateway")]
    CallerRejected { caller: String },

    /// The backend could not be reached (or was switched off).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// SQLite backend failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl GatewayError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::CallerRejected { .. } => ErrorCode::CallerRejected,
            Self::Unavailable(_) => ErrorCode::GatewayUnavailable,
            Self::Sqlite(_) => ErrorCode::StorageWriteFailed,
        }
    }
}

/// Raw storage behind the gateway.
///
/// Implementations run on the storage worker thread, hence `Send`.
pub trait BlobStore: Send {
    /// Read all three entries. Missing entries come back as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get_all(&mut self) -> Result<PersistedState, GatewayError>;

    /// Replace the active or retained blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn put_blob(&mut self, key: BlobKey, blob: &str) -> Result<(), GatewayError>;

    /// Replace the purge clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn put_last_purge_time(&mut self, timestamp: i64) -> Result<(), GatewayError>;
}

impl<S: BlobStore + ?Sized> BlobStore for Box<S> {
    fn get_all(&mut self) -> Result<PersistedState, GatewayError> {
        (**self).get_all()
    }

    fn put_blob(&mut self, key: BlobKey, blob: &str) -> Result<(), GatewayError> {
        (**self).put_blob(key, blob)
    }

    fn put_last_purge_time(&mut self, timestamp: i64) -> Result<(), GatewayError> {
        (**self).put_last_purge_time(timestamp)
    }
}

/// Caller-validating front of a [`BlobStore`].
pub struct Gateway<S> {
    allowed_caller: String,
    store: S,
}

impl<S: BlobStore> Gateway<S> {
    #[must_use]
    pub fn new(allowed_caller: impl Into<String>, store: S) -> Self {
        Self {
            allowed_caller: allowed_caller.into(),
            store,
        }
    }

    /// Validate the caller, then perform the request.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::CallerRejected`] for unknown callers, or the
    /// backend's error.
    pub fn handle(&mut self, envelope: &Envelope) -> Result<GatewayResponse, GatewayError> {
        if envelope.caller != self.allowed_caller {
            warn!(
                caller = %envelope.caller,
                op = envelope.request.op(),
                "rejecting gateway request from unrecognized caller"
            );
            return Err(GatewayError::CallerRejected {
                caller: envelope.caller.clone(),
            });
        }

        match &envelope.request {
            GatewayRequest::GetAll => self.store.get_all().map(GatewayResponse::State),
            GatewayRequest::SetActive { blob } => self
                .store
                .put_blob(BlobKey::Active, blob)
                .map(|()| GatewayResponse::Written),
            GatewayRequest::SetRetained { blob } => self
                .store
                .put_blob(BlobKey::Retained, blob)
                .map(|()| GatewayResponse::Written),
            GatewayRequest::SetLastPurgeTime { timestamp } => self
                .store
                .put_last_purge_time(*timestamp)
                .map(|()| GatewayResponse::Written),
        }
    }
}
