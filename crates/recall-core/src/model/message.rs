//! Host message records and their reduced shadow form.
//!
//! The host hands over a full message with many fields the shadow store has
//! no use for. [`MessageRecord::reduce`] keeps exactly eight of them; the
//! rest (including the unsendability status) are dropped on ingestion.
//! Unknown host fields are preserved on [`HostMessage`] via
//! `#[serde(flatten)]` so that host records round-trip through the feed
//! format unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unsendability status the host reports once a message has been retracted.
pub const TOMBSTONE_STATUS: &str = "deny_tombstone_message";

/// Nested share link carried by some attachments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShareLink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// One message attachment.
///
/// An attachment may carry a direct `url`, a nested `share.uri`, both, or
/// neither.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share: Option<ShareLink>,
}

impl Attachment {
    /// Attachment pointing at a direct url.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            share: None,
        }
    }

    /// Attachment pointing at a shared resource.
    #[must_use]
    pub fn with_share_uri(uri: impl Into<String>) -> Self {
        Self {
            url: None,
            share: Some(ShareLink {
                uri: Some(uri.into()),
            }),
        }
    }

    /// The link to show for this attachment: the direct url if present,
    /// else the nested share uri.
    #[must_use]
    pub fn link(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or_else(|| self.share.as_ref().and_then(|s| s.uri.as_deref()))
    }
}

/// A message as the host reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMessage {
    pub message_id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline_threading_id: Option<String>,
    /// Participant id of the sender (host format, e.g. `fbid:1234`).
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub has_attachment: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Epoch milliseconds. Required: the purge age is measured from it.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_unsendability_status: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl HostMessage {
    /// Minimal text message, mostly useful for tests and feeds.
    #[must_use]
    pub fn text(
        message_id: impl Into<String>,
        thread_id: impl Into<String>,
        author: impl Into<String>,
        body: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            thread_id: thread_id.into(),
            offline_threading_id: None,
            author: author.into(),
            body: body.into(),
            has_attachment: false,
            attachments: Vec::new(),
            timestamp,
            message_unsendability_status: None,
            extra: BTreeMap::new(),
        }
    }

    /// Add an attachment and flag the message as carrying one.
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.has_attachment = true;
        self.attachments.push(attachment);
        self
    }

    /// Whether the host has tombstoned this message.
    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        self.message_unsendability_status.as_deref() == Some(TOMBSTONE_STATUS)
    }
}

/// Reduced shadow copy of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub offline_threading_id: Option<String>,
    pub author: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub has_attachment: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub timestamp: i64,
}

impl MessageRecord {
    /// Keep only the fields the shadow store needs.
    #[must_use]
    pub fn reduce(message: &HostMessage) -> Self {
        Self {
            message_id: message.message_id.clone(),
            thread_id: message.thread_id.clone(),
            offline_threading_id: message.offline_threading_id.clone(),
            author: message.author.clone(),
            body: message.body.clone(),
            has_attachment: message.has_attachment,
            attachments: message.attachments.clone(),
            timestamp: message.timestamp,
        }
    }

    /// Link of the first attachment, if the record has one.
    #[must_use]
    pub fn first_link(&self) -> Option<&str> {
        if !self.has_attachment {
            return None;
        }
        self.attachments.first().and_then(Attachment::link)
    }
}

impl From<&HostMessage> for MessageRecord {
    fn from(message: &HostMessage) -> Self {
        Self::reduce(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reduce_drops_unknown_and_status_fields() {
        let raw = json!({
            "message_id": "mid.1",
            "thread_id": "t1",
            "author": "fbid:42",
            "body": "hi",
            "timestamp": 1_700_000_000_000_i64,
            "message_unsendability_status": "can_unsend",
            "is_sponsored": false,
            "tags": ["inbox"],
        });
        let host: HostMessage = serde_json::from_value(raw).expect("parse host message");
        assert_eq!(host.extra.len(), 2);

        let record = MessageRecord::reduce(&host);
        let encoded = serde_json::to_value(&record).expect("encode record");
        let keys: Vec<&str> = encoded
            .as_object()
            .expect("object")
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(
            keys,
            vec![
                "attachments",
                "author",
                "body",
                "has_attachment",
                "message_id",
                "offline_threading_id",
                "thread_id",
                "timestamp",
            ]
        );
    }

    #[test]
    fn host_message_without_timestamp_is_rejected() {
        let raw = json!({"message_id": "mid.1", "author": "fbid:42", "body": "hi"});
        let err = serde_json::from_value::<HostMessage>(raw).expect_err("timestamp is required");
        assert!(err.to_string().contains("timestamp"));
    }

    #[test]
    fn attachment_link_prefers_direct_url() {
        let both = Attachment {
            url: Some("https://direct".into()),
            share: Some(ShareLink {
                uri: Some("https://share".into()),
            }),
        };
        assert_eq!(both.link(), Some("https://direct"));
        assert_eq!(
            Attachment::with_share_uri("https://share").link(),
            Some("https://share")
        );
        assert_eq!(Attachment::default().link(), None);
    }

    #[test]
    fn first_link_requires_attachment_flag() {
        let host = HostMessage::text("m", "t", "a", "", 0).with_attachment(Attachment::with_url("u"));
        let mut record = MessageRecord::reduce(&host);
        assert_eq!(record.first_link(), Some("u"));

        record.has_attachment = false;
        assert_eq!(record.first_link(), None);
    }

    #[test]
    fn tombstone_status_is_detected() {
        let mut host = HostMessage::text("m", "t", "a", "b", 0);
        assert!(!host.is_tombstoned());
        host.message_unsendability_status = Some(TOMBSTONE_STATUS.to_string());
        assert!(host.is_tombstoned());
    }
}
