//! The host messaging application, as seen by the engine.
//!
//! [`HostPort`] is everything the engine asks of the host: who is viewing,
//! the current record for a message id, and the names needed to word a
//! retraction notice. Host adapters implement it; [`MemoryHost`] is the
//! in-process adapter used by tests and by `recall replay`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::model::HostMessage;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host integration point missing: {0}")]
    Unavailable(String),
}

impl HostError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable(_) => ErrorCode::HostUnavailable,
        }
    }
}

/// Per-thread display data, as far as the engine cares.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThreadMetadata {
    /// Nicknames set in the thread, keyed by author (user) id.
    #[serde(default)]
    pub custom_nickname: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub short_name: String,
}

pub trait HostPort {
    /// Check that the host exposes what the engine needs.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Unavailable`] when the host cannot serve events.
    fn ensure_available(&self) -> Result<(), HostError>;

    fn current_user_id(&self) -> String;

    /// Current host records for `ids` as seen by `user_id`. Unknown ids are
    /// left out.
    fn messages_by_ids(&self, user_id: &str, ids: &[&str]) -> Vec<HostMessage>;

    fn thread_metadata(&self, user_id: &str, thread_id: &str) -> Option<ThreadMetadata>;

    fn participant_info(&self, participant_id: &str) -> Option<ParticipantInfo>;

    /// Map a participant id (as found in `author`) to a user id.
    fn author_id_from_participant_id(&self, participant_id: &str) -> String;
}

impl<H: HostPort + ?Sized> HostPort for &H {
    fn ensure_available(&self) -> Result<(), HostError> {
        (**self).ensure_available()
    }

    fn current_user_id(&self) -> String {
        (**self).current_user_id()
    }

    fn messages_by_ids(&self, user_id: &str, ids: &[&str]) -> Vec<HostMessage> {
        (**self).messages_by_ids(user_id, ids)
    }

    fn thread_metadata(&self, user_id: &str, thread_id: &str) -> Option<ThreadMetadata> {
        (**self).thread_metadata(user_id, thread_id)
    }

    fn participant_info(&self, participant_id: &str) -> Option<ParticipantInfo> {
        (**self).participant_info(participant_id)
    }

    fn author_id_from_participant_id(&self, participant_id: &str) -> String {
        (**self).author_id_from_participant_id(participant_id)
    }
}

/// Participant ids carry this prefix in front of the user id.
pub const PARTICIPANT_PREFIX: &str = "fbid:";

/// In-memory host.
///
/// Holds the latest version of every message it has been told about, keyed
/// by id, plus thread and participant tables.
#[derive(Debug, Default)]
pub struct MemoryHost {
    viewer: String,
    available: AtomicBool,
    messages: BTreeMap<String, HostMessage>,
    threads: BTreeMap<String, ThreadMetadata>,
    participants: BTreeMap<String, ParticipantInfo>,
}

impl MemoryHost {
    #[must_use]
    pub fn new(viewer: impl Into<String>) -> Self {
        Self {
            viewer: viewer.into(),
            available: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Simulate a host whose integration point is missing.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Insert or replace the host's copy of a message.
    pub fn upsert_message(&mut self, message: HostMessage) {
        self.messages.insert(message.message_id.clone(), message);
    }

    /// Set the unsendability status on a known message. Returns `false` for
    /// unknown ids.
    pub fn set_status(&mut self, message_id: &str, status: Option<String>) -> bool {
        self.messages
            .get_mut(message_id)
            .map(|message| message.message_unsendability_status = status)
            .is_some()
    }

    pub fn set_thread(&mut self, thread_id: impl Into<String>, metadata: ThreadMetadata) {
        self.threads.insert(thread_id.into(), metadata);
    }

    pub fn set_nickname(
        &mut self,
        thread_id: impl Into<String>,
        author_id: impl Into<String>,
        nickname: impl Into<String>,
    ) {
        self.threads
            .entry(thread_id.into())
            .or_default()
            .custom_nickname
            .insert(author_id.into(), nickname.into());
    }

    pub fn set_participant(&mut self, participant_id: impl Into<String>, short_name: impl Into<String>) {
        self.participants.insert(
            participant_id.into(),
            ParticipantInfo {
                short_name: short_name.into(),
            },
        );
    }

    #[must_use]
    pub fn message(&self, message_id: &str) -> Option<&HostMessage> {
        self.messages.get(message_id)
    }
}

impl HostPort for MemoryHost {
    fn ensure_available(&self) -> Result<(), HostError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HostError::Unavailable("memory host switched off".into()))
        }
    }

    fn current_user_id(&self) -> String {
        self.viewer.clone()
    }

    fn messages_by_ids(&self, _user_id: &str, ids: &[&str]) -> Vec<HostMessage> {
        ids.iter()
            .filter_map(|id| self.messages.get(*id).cloned())
            .collect()
    }

    fn thread_metadata(&self, _user_id: &str, thread_id: &str) -> Option<ThreadMetadata> {
        self.threads.get(thread_id).cloned()
    }

    fn participant_info(&self, participant_id: &str) -> Option<ParticipantInfo> {
        self.participants
            .get(participant_id)
            .or_else(|| {
                let user_id = self.author_id_from_participant_id(participant_id);
                self.participants.get(&user_id)
            })
            .cloned()
    }

    fn author_id_from_participant_id(&self, participant_id: &str) -> String {
        participant_id
            .strip_prefix(PARTICIPANT_PREFIX)
            .unwrap_or(participant_id)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_prefix_is_stripped() {
        let host = MemoryHost::new("U1");
        assert_eq!(host.author_id_from_participant_id("fbid:U2"), "U2");
        assert_eq!(host.author_id_from_participant_id("U2"), "U2");
    }

    #[test]
    fn messages_by_ids_skips_unknown() {
        let mut host = MemoryHost::new("U1");
        host.upsert_message(HostMessage::text("m1", "t1", "fbid:U2", "hi", 1));
        let found = host.messages_by_ids("U1", &["m1", "ghost"]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message_id, "m1");
    }

    #[test]
    fn set_status_only_touches_known_messages() {
        let mut host = MemoryHost::new("U1");
        host.upsert_message(HostMessage::text("m1", "t1", "fbid:U2", "hi", 1));
        assert!(host.set_status("m1", Some("deny_tombstone_message".into())));
        assert!(!host.set_status("m2", None));
        assert!(host.message("m1").is_some_and(HostMessage::is_tombstoned));
    }

    #[test]
    fn participant_lookup_accepts_either_id_form() {
        let mut host = MemoryHost::new("U1");
        host.set_participant("U2", "Bob");
        assert_eq!(
            host.participant_info("fbid:U2").map(|p| p.short_name),
            Some("Bob".to_string())
        );
    }

    #[test]
    fn unavailable_host_reports_error_code() {
        let host = MemoryHost::new("U1");
        host.set_available(false);
        let err = host.ensure_available().expect_err("switched off");
        assert_eq!(err.code(), ErrorCode::HostUnavailable);
    }
}
