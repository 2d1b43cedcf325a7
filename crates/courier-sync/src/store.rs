//! The ordered message list of one conversation.
//!
//! [`MessageStore`] is the single source of truth for the list, the
//! pagination cursor and the watermark (creation time of the newest message
//! seen). Every delivery path merges through its operations, and each of
//! them keeps message ids unique.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use courier_shared::constants::FIRST_PAGE;
use courier_shared::{ChatMessage, ConversationTarget, MessageId, MessagePage};

/// Where a merged batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Poll,
    Push,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => f.write_str("poll"),
            Self::Push => f.write_str("push"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageStore {
    target: ConversationTarget,
    messages: Vec<ChatMessage>,
    ids: HashSet<MessageId>,
    /// Last page fetched from the remote listing.
    page: u32,
    has_more: bool,
    last_message_timestamp: Option<DateTime<Utc>>,
}

impl MessageStore {
    pub fn new(target: ConversationTarget) -> Self {
        Self {
            target,
            messages: Vec::new(),
            ids: HashSet::new(),
            page: FIRST_PAGE,
            has_more: false,
            last_message_timestamp: None,
        }
    }

    pub fn target(&self) -> &ConversationTarget {
        &self.target
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.position(id).map(|pos| &self.messages[pos])
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn last_message_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_message_timestamp
    }

    /// Full reset for a (new) conversation target. The only operation that
    /// rewinds the watermark.
    pub fn reset(&mut self, target: ConversationTarget) {
        debug!(conversation = %target, "Resetting message store");
        *self = Self::new(target);
    }

    /// Replace the list with the first page of the conversation.
    ///
    /// Provisional messages still in flight are kept after the page so a
    /// reload does not hide pending sends.
    pub fn load_initial(&mut self, page: MessagePage) {
        let pending: Vec<ChatMessage> = self
            .messages
            .drain(..)
            .filter(ChatMessage::is_provisional)
            .collect();
        self.ids.clear();

        for message in page.items.into_iter().chain(pending) {
            if self.ids.insert(message.id.clone()) {
                self.advance_watermark_for(&message);
                self.messages.push(message);
            }
        }

        self.page = FIRST_PAGE;
        self.has_more = page.has_next_page;
        debug!(
            count = self.messages.len(),
            has_more = self.has_more,
            "Loaded initial page"
        );
    }

    /// Cursor of the next older page.
    pub fn next_page(&self) -> u32 {
        self.page + 1
    }

    /// Prepend an older page, skipping messages already present. The
    /// page's own order is preserved. Returns the number of messages added.
    pub fn prepend_older(&mut self, page: MessagePage) -> usize {
        let mut older = Vec::with_capacity(page.items.len());
        for message in page.items {
            if self.ids.insert(message.id.clone()) {
                older.push(message);
            }
        }

        let added = older.len();
        older.append(&mut self.messages);
        self.messages = older;
        self.page += 1;
        self.has_more = page.has_next_page;
        debug!(added, page = self.page, has_more = self.has_more, "Prepended older page");
        added
    }

    /// Append every message of `batch` whose id is unknown, in receive
    /// order. Known ids are ignored, which makes merging idempotent.
    pub fn merge_incoming(
        &mut self,
        batch: impl IntoIterator<Item = ChatMessage>,
        origin: Origin,
    ) -> usize {
        let mut added = 0;
        for message in batch {
            if !self.ids.insert(message.id.clone()) {
                trace!(msg_id = %message.id, %origin, "Ignoring duplicate message");
                continue;
            }
            self.advance_watermark_for(&message);
            self.messages.push(message);
            added += 1;
        }
        if added > 0 {
            debug!(added, %origin, "Merged incoming messages");
        }
        added
    }

    /// Mark a message as read. Returns `false` when the message is not
    /// (yet) in the list.
    pub fn apply_read_receipt(&mut self, id: &MessageId, read_at: DateTime<Utc>) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.messages[pos].read_at = Some(read_at);
                true
            }
            None => {
                debug!(msg_id = %id, "Read receipt for unknown message ignored");
                false
            }
        }
    }

    /// Append an optimistic message. It does not move the watermark: the
    /// local clock says nothing about what the server has stored.
    pub fn push_provisional(&mut self, message: ChatMessage) {
        if self.ids.insert(message.id.clone()) {
            self.messages.push(message);
        }
    }

    /// Swap a provisional message for its confirmed server copy.
    ///
    /// The confirmed message is kept even when `temp_id` is gone. If it
    /// already arrived through push or polling, that entry is updated in
    /// place instead of being duplicated.
    pub fn replace_provisional(&mut self, temp_id: &MessageId, confirmed: ChatMessage) {
        self.remove(temp_id);

        match self.position(&confirmed.id) {
            Some(pos) => self.messages[pos] = confirmed,
            None => {
                self.ids.insert(confirmed.id.clone());
                self.messages.push(confirmed);
            }
        }
    }

    /// Remove a provisional message whose send was abandoned.
    pub fn drop_provisional(&mut self, temp_id: &MessageId) -> bool {
        self.remove(temp_id)
    }

    /// Move the watermark forward; never backward.
    pub fn advance_watermark(&mut self, timestamp: DateTime<Utc>) -> bool {
        match self.last_message_timestamp {
            Some(current) if current >= timestamp => false,
            _ => {
                self.last_message_timestamp = Some(timestamp);
                true
            }
        }
    }

    fn advance_watermark_for(&mut self, message: &ChatMessage) {
        if !message.is_provisional() {
            self.advance_watermark(message.created_at);
        }
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        if !self.ids.contains(id) {
            return None;
        }
        self.messages.iter().position(|m| &m.id == id)
    }

    fn remove(&mut self, id: &MessageId) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.messages.remove(pos);
                self.ids.remove(id);
                true
            }
            None => false,
        }
    }
}
