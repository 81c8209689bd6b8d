//! Ordered, duplicate-free message timelines.
//!
//! A [`Timeline`] is the storage primitive shared by direct-message
//! conversations and community channels. It keeps:
//! - messages ordered by `created_at`, ties in arrival order
//! - an id index so nothing is stored twice
//! - pagination state for loading older history
//!
//! Reconciliation (optimistic promotion, "just arrived" classification)
//! lives in [`crate::reconcile`] on top of these primitives.

use relaychat_types::{EventId, Kind, RawEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::message::DecryptedMessage;

/// Ordered message list with pagination state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    messages: Vec<DecryptedMessage>,
    #[serde(skip)]
    ids: HashSet<EventId>,
    /// Oldest `created_at` among confirmed messages held.
    oldest_seen: Option<u64>,
    /// Inclusive upper bound of the next older-history query.
    #[serde(default)]
    history_until: Option<u64>,
    has_more: bool,
    reached_start: bool,
}

impl Timeline {
    /// Create an empty timeline that may have older history.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            ids: HashSet::new(),
            oldest_seen: None,
            history_until: None,
            has_more: true,
            reached_start: false,
        }
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[DecryptedMessage] {
        &self.messages
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the timeline is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Check if a message with this id is stored.
    pub fn contains(&self, id: &EventId) -> bool {
        self.ids.contains(id)
    }

    /// Look up a message by id.
    pub fn get(&self, id: &EventId) -> Option<&DecryptedMessage> {
        self.position(id).map(|idx| &self.messages[idx])
    }

    /// Oldest `created_at` among confirmed messages held.
    pub fn oldest_seen(&self) -> Option<u64> {
        self.oldest_seen
    }

    /// Inclusive `until` for the next older-history query.
    ///
    /// Follows what the network returned rather than what was kept, so
    /// pages full of events routed elsewhere (or undecryptable) still move
    /// it. Before the first page it is the oldest message held.
    pub fn next_page_until(&self) -> Option<u64> {
        self.history_until.or(self.oldest_seen)
    }

    /// Whether older history may still exist.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Whether the beginning of history has been reached.
    pub fn reached_start(&self) -> bool {
        self.reached_start
    }

    /// Newest `created_at` among network-confirmed messages.
    ///
    /// Used as the "since" cursor when (re)subscribing; optimistic entries
    /// carry local clocks and are excluded.
    pub fn newest_confirmed_at(&self) -> Option<u64> {
        self.messages
            .iter()
            .rev()
            .find(|m| !m.status.is_pending())
            .map(DecryptedMessage::created_at)
    }

    /// Newest `created_at` of any message.
    pub fn last_activity(&self) -> Option<u64> {
        self.messages.last().map(DecryptedMessage::created_at)
    }

    /// Insert a live message. Returns `false` (and drops it) if the id is
    /// already stored.
    pub fn append_live(&mut self, message: DecryptedMessage) -> bool {
        if self.ids.contains(&message.id()) {
            return false;
        }
        self.insert_sorted(message);
        true
    }

    /// Merge a page of older history.
    ///
    /// `sources` holds what each query of the page returned before
    /// decryption or routing. A source returning fewer than `page_size`
    /// events has nothing older; once every source is short the start of
    /// history is reached. Otherwise the cursor drops to the highest
    /// oldest-event time among the full sources, which every source has
    /// covered completely.
    ///
    /// Returns the ids actually added.
    pub fn append_older_page(
        &mut self,
        page: Vec<DecryptedMessage>,
        sources: &[SourcePage],
        page_size: usize,
    ) -> Vec<EventId> {
        let mut added = Vec::new();
        for message in page {
            let id = message.id();
            if self.ids.insert(id) {
                added.push(id);
                if !message.status.is_pending() {
                    self.lower_oldest_seen(message.created_at());
                }
                self.messages.push(message);
            }
        }
        // Stable: existing entries keep their relative order on ties.
        self.messages.sort_by_key(DecryptedMessage::created_at);

        let boundary = sources
            .iter()
            .filter(|s| s.fetched > 0 && s.fetched >= page_size)
            .filter_map(|s| s.oldest)
            .max();
        match boundary {
            None => self.mark_exhausted(),
            // A full page at the current bound made no progress: everything
            // shares one timestamp, so step past it.
            Some(0) if self.next_page_until() == Some(0) => self.mark_exhausted(),
            Some(until) if self.next_page_until() == Some(until) => {
                self.history_until = Some(until - 1);
            }
            Some(until) => self.history_until = Some(until),
        }
        added
    }

    /// Flag that no older history exists.
    pub fn mark_exhausted(&mut self) {
        self.has_more = false;
        self.reached_start = true;
    }

    /// Remove a message by id.
    pub fn remove(&mut self, id: &EventId) -> Option<DecryptedMessage> {
        let idx = self.position(id)?;
        self.ids.remove(id);
        Some(self.messages.remove(idx))
    }

    /// Apply a kind-5 deletion: remove every `e`-referenced message written
    /// by the deletion's author. Returns the removed ids.
    pub fn apply_deletion(&mut self, deletion: &RawEvent) -> Vec<EventId> {
        if deletion.kind != Kind::DELETION {
            return Vec::new();
        }
        let mut removed = Vec::new();
        for target in deletion.event_tags() {
            let authored = self
                .get(&target)
                .is_some_and(|m| *m.author() == deletion.pubkey);
            if authored && self.remove(&target).is_some() {
                removed.push(target);
            }
        }
        removed
    }

    /// Replace the message with `id` by `replacement`, re-positioning it so
    /// ordering holds. Returns `false` if `id` is not stored.
    pub fn replace(&mut self, id: &EventId, replacement: DecryptedMessage) -> bool {
        if self.remove(id).is_none() {
            return false;
        }
        self.insert_sorted(replacement);
        true
    }

    /// Mutable access for in-place status changes that keep id and time.
    pub(crate) fn get_mut(&mut self, id: &EventId) -> Option<&mut DecryptedMessage> {
        let idx = self.position(id)?;
        Some(&mut self.messages[idx])
    }

    /// Iterate over stored messages.
    pub fn iter(&self) -> impl Iterator<Item = &DecryptedMessage> {
        self.messages.iter()
    }

    /// Drop all messages but keep pagination knowledge reset to "unknown".
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Rebuild the id index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.ids = self.messages.iter().map(DecryptedMessage::id).collect();
    }

    fn position(&self, id: &EventId) -> Option<usize> {
        if !self.ids.contains(id) {
            return None;
        }
        self.messages.iter().position(|m| m.id() == *id)
    }

    /// Insert after every message with `created_at <=` the new one, so
    /// equal timestamps keep arrival order.
    fn insert_sorted(&mut self, message: DecryptedMessage) {
        let created_at = message.created_at();
        let idx = self
            .messages
            .partition_point(|m| m.created_at() <= created_at);
        self.ids.insert(message.id());
        if !message.status.is_pending() {
            self.lower_oldest_seen(created_at);
        }
        self.messages.insert(idx, message);
    }

    fn lower_oldest_seen(&mut self, created_at: u64) {
        self.oldest_seen = Some(match self.oldest_seen {
            Some(current) => current.min(created_at),
            None => created_at,
        });
    }
}

/// What one query of an older-history page returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourcePage {
    /// Events returned, including ones later dropped or routed elsewhere.
    pub fetched: usize,
    /// Oldest `created_at` among them.
    pub oldest: Option<u64>,
}

impl SourcePage {
    /// Summarize the events one query returned.
    pub fn of<'a>(events: impl IntoIterator<Item = &'a RawEvent>) -> Self {
        events.into_iter().fold(Self::default(), |page, event| Self {
            fetched: page.fetched + 1,
            oldest: Some(page.oldest.map_or(event.created_at, |o| o.min(event.created_at))),
        })
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}
