//! Message schemas: the full host record and the reduced shadow copy.

pub mod message;

pub use message::{Attachment, HostMessage, MessageRecord, ShareLink, TOMBSTONE_STATUS};
