//! Wording of retraction notices.
//!
//! When the host renders a tombstone it asks for the removed content of
//! one message. [`resolve`] answers from the retained set, promoting the
//! message first if it is still only active (being asked about a message
//! means the host already considers it retracted).

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::host::HostPort;
use crate::model::MessageRecord;
use crate::store::ShadowStore;

/// The host's handle on the message being rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub message_id: String,
    pub thread_id: String,
    /// Participant id of the author.
    pub author: String,
}

impl MessageRef {
    #[must_use]
    pub fn new(
        message_id: impl Into<String>,
        thread_id: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            thread_id: thread_id.into(),
            author: author.into(),
        }
    }
}

impl From<&MessageRecord> for MessageRef {
    fn from(record: &MessageRecord) -> Self {
        Self::new(&record.message_id, &record.thread_id, &record.author)
    }
}

/// Who the notice says removed the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeAuthor {
    Viewer,
    Named(String),
    Unknown,
}

/// Text shown for a removed message: the body, the first attachment's
/// link, or both separated by a space.
///
/// A record flagged with an attachment that carries no link falls back to
/// its body.
#[must_use]
pub fn removed_text(record: &MessageRecord) -> String {
    match record.first_link() {
        Some(link) if record.body.is_empty() => link.to_string(),
        Some(link) => format!("{} {link}", record.body),
        None => record.body.clone(),
    }
}

#[must_use]
pub fn format_notice(author: &NoticeAuthor, text: &str) -> String {
    let subject = match author {
        NoticeAuthor::Viewer => "You",
        NoticeAuthor::Named(name) => name.as_str(),
        NoticeAuthor::Unknown => "A contact",
    };
    if text.is_empty() {
        format!("{subject} removed a message")
    } else {
        format!("{subject} removed a message: {text}")
    }
}

/// Work out how to name the author of `message` for `viewer`.
pub fn notice_author<H: HostPort + ?Sized>(
    host: &H,
    viewer: &str,
    message: &MessageRef,
) -> NoticeAuthor {
    let author_id = host.author_id_from_participant_id(&message.author);
    if author_id == viewer {
        return NoticeAuthor::Viewer;
    }

    let Some(metadata) = host.thread_metadata(viewer, &message.thread_id) else {
        return NoticeAuthor::Unknown;
    };

    metadata
        .custom_nickname
        .get(&author_id)
        .filter(|nickname| !nickname.is_empty())
        .cloned()
        .or_else(|| {
            host.participant_info(&message.author)
                .map(|info| info.short_name)
                .filter(|name| !name.is_empty())
        })
        .map_or(NoticeAuthor::Unknown, NoticeAuthor::Named)
}

/// Retraction notice for `message` as seen by `viewer`, or `None` when the
/// store has no content for it.
pub fn resolve<H: HostPort + ?Sized>(
    store: &mut ShadowStore,
    host: &H,
    viewer: &str,
    message: &MessageRef,
) -> Option<String> {
    if store.promote(&message.message_id) {
        info!(message_id = %message.message_id, "promoted on lookup");
    }

    let Some(record) = store.lookup_retained(&message.message_id) else {
        debug!(message_id = %message.message_id, "no retained content");
        return None;
    };
    let text = removed_text(record);
    let author = notice_author(host, viewer, message);
    Some(format_notice(&author, &text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use crate::model::{Attachment, HostMessage};

    fn record(body: &str, attachment: Option<Attachment>) -> MessageRecord {
        let mut message = HostMessage::text("m1", "t1", "fbid:U2", body, 1);
        if let Some(attachment) = attachment {
            message = message.with_attachment(attachment);
        }
        MessageRecord::reduce(&message)
    }

    #[test]
    fn removed_text_variants() {
        assert_eq!(removed_text(&record("hello", None)), "hello");
        assert_eq!(removed_text(&record("", None)), "");
        assert_eq!(
            removed_text(&record("", Some(Attachment::with_url("https://x/y")))),
            "https://x/y"
        );
        assert_eq!(
            removed_text(&record("look", Some(Attachment::with_share_uri("https://s/1")))),
            "look https://s/1"
        );
    }

    #[test]
    fn attachment_without_link_uses_body() {
        let mut rec = record("caption", None);
        rec.has_attachment = true;
        rec.attachments.push(Attachment::default());
        assert_eq!(removed_text(&rec), "caption");
    }

    #[test]
    fn notice_suffix_only_when_text_present() {
        assert_eq!(format_notice(&NoticeAuthor::Viewer, ""), "You removed a message");
        assert_eq!(
            format_notice(&NoticeAuthor::Named("Bob".into()), "hi"),
            "Bob removed a message: hi"
        );
        assert_eq!(
            format_notice(&NoticeAuthor::Unknown, "hi"),
            "A contact removed a message: hi"
        );
    }

    #[test]
    fn nickname_beats_short_name() {
        let mut host = MemoryHost::new("U1");
        host.set_nickname("t1", "U2", "Bobby");
        host.set_participant("fbid:U2", "Bob");
        let author = notice_author(&host, "U1", &MessageRef::new("m1", "t1", "fbid:U2"));
        assert_eq!(author, NoticeAuthor::Named("Bobby".into()));
    }

    #[test]
    fn short_name_used_without_nickname() {
        let mut host = MemoryHost::new("U1");
        host.set_thread("t1", crate::host::ThreadMetadata::default());
        host.set_participant("fbid:U2", "Bob");
        let author = notice_author(&host, "U1", &MessageRef::new("m1", "t1", "fbid:U2"));
        assert_eq!(author, NoticeAuthor::Named("Bob".into()));
    }

    #[test]
    fn empty_nickname_falls_through_to_short_name() {
        let mut host = MemoryHost::new("U1");
        host.set_nickname("t1", "U2", "");
        host.set_participant("fbid:U2", "Bob");
        let author = notice_author(&host, "U1", &MessageRef::new("m1", "t1", "fbid:U2"));
        assert_eq!(author, NoticeAuthor::Named("Bob".into()));
    }

    #[test]
    fn unnamed_author_in_known_thread_is_a_contact() {
        let mut host = MemoryHost::new("U1");
        host.set_thread("t1", crate::host::ThreadMetadata::default());
        let author = notice_author(&host, "U1", &MessageRef::new("m1", "t1", "fbid:U2"));
        assert_eq!(author, NoticeAuthor::Unknown);
    }

    #[test]
    fn resolve_unknown_message_is_none() {
        let host = MemoryHost::new("U1");
        let mut store = ShadowStore::new();
        assert_eq!(
            resolve(&mut store, &host, "U1", &MessageRef::new("ghost", "t1", "fbid:U2")),
            None
        );
    }
}
