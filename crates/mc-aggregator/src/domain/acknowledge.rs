//! # Acknowledgements
//!
//! Some events report that an earlier delivery was consumed downstream rather
//! than taking part in a release. They never join a group: an acknowledgement
//! settles the members it refers to, and both leave on the discard path with
//! reason `acknowledged`.

use crate::domain::group::MessageGroup;
use shared_types::{event_types, Message, MessageId};

/// Recognises acknowledgement events.
pub trait AcknowledgementRule: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// `None` when `message` is not an acknowledgement. Otherwise the members
    /// of `group` it settles, possibly none.
    fn settles(&self, message: &Message, group: Option<&MessageGroup>) -> Option<Vec<MessageId>>;
}

/// `MESSAGE_RECEIVED` settles one buffered `MESSAGE_WAITING` of its key: the
/// waiting instance already got its message.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceivedSettlesWaiting;

impl AcknowledgementRule for ReceivedSettlesWaiting {
    fn name(&self) -> &'static str {
        "received-settles-waiting"
    }

    fn settles(&self, message: &Message, group: Option<&MessageGroup>) -> Option<Vec<MessageId>> {
        if !message.is_kind(event_types::MESSAGE_RECEIVED) {
            return None;
        }
        let waiting = group.and_then(|g| g.find_kind(event_types::MESSAGE_WAITING));
        Some(waiting.map(Message::id).into_iter().collect())
    }
}
