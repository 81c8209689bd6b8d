//! LRU background refresh scheduling.
//!
//! Every joined community except the focused one is tracked here. Each entry
//! becomes due at `last_polled_at + backoff(load_count)`; entries due at the
//! same instant are served least-recently-used first. The scheduler only
//! decides *what* is due. Polling itself is done by the client's refresher.

use std::collections::{BTreeSet, HashMap};

use crate::community::CommunityId;

/// Default first poll interval after a load (15 seconds).
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 15_000;

/// Default maximum poll interval (10 minutes).
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 600_000;

/// Default number of tracked communities.
pub const DEFAULT_MAX_TRACKED: usize = 32;

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Interval after the first poll.
    pub base_ms: u64,
    /// Upper bound.
    pub max_ms: u64,
    /// Growth factor per poll.
    pub multiplier: u32,
}

impl BackoffPolicy {
    /// Interval to wait after `load_count` polls.
    ///
    /// Zero polls means due immediately; afterwards
    /// `base * multiplier^(load_count - 1)`, capped at `max_ms`.
    pub fn delay_ms(&self, load_count: u32) -> u64 {
        if load_count == 0 {
            return 0;
        }
        let factor = u64::from(self.multiplier).saturating_pow(load_count - 1);
        self.base_ms.saturating_mul(factor).min(self.max_ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BACKOFF_BASE_MS,
            max_ms: DEFAULT_BACKOFF_MAX_MS,
            multiplier: 2,
        }
    }
}

/// One tracked community.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LruEntry {
    /// Tracked community.
    pub community_id: CommunityId,
    /// Last poll (or registration) time, unix ms.
    pub last_polled_at_ms: u64,
    /// Polls since registration or last loss of focus.
    pub load_count: u32,
    /// Current interval.
    pub backoff_ms: u64,
    /// Use sequence; higher is more recently used.
    pub recency: u64,
}

impl LruEntry {
    /// When the entry is due for its next poll.
    pub fn due_at_ms(&self) -> u64 {
        self.last_polled_at_ms.saturating_add(self.backoff_ms)
    }

    fn key(&self) -> QueueKey {
        (self.due_at_ms(), self.recency, self.community_id.clone())
    }
}

/// Result of moving focus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusChange {
    /// Community that lost focus and was re-inserted.
    pub previous: Option<CommunityId>,
    /// Community evicted to make room.
    pub evicted: Option<CommunityId>,
}

/// Snapshot for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LruStatus {
    /// Focused (exempt) community.
    pub focused: Option<CommunityId>,
    /// Entries in due order.
    pub entries: Vec<LruEntry>,
    /// Bound on tracked entries.
    pub capacity: usize,
}

type QueueKey = (u64, u64, CommunityId);

/// Priority queue of background-polled communities.
#[derive(Debug, Clone)]
pub struct LruScheduler {
    queue: BTreeSet<QueueKey>,
    entries: HashMap<CommunityId, LruEntry>,
    focused: Option<CommunityId>,
    capacity: usize,
    policy: BackoffPolicy,
    next_seq: u64,
}

impl LruScheduler {
    /// Create an empty scheduler bounded to `capacity` entries.
    pub fn new(capacity: usize, policy: BackoffPolicy) -> Self {
        Self {
            queue: BTreeSet::new(),
            entries: HashMap::new(),
            focused: None,
            capacity: capacity.max(1),
            policy,
            next_seq: 0,
        }
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if `id` is tracked.
    pub fn contains(&self, id: &CommunityId) -> bool {
        self.entries.contains_key(id)
    }

    /// The focused community.
    pub fn focused(&self) -> Option<&CommunityId> {
        self.focused.as_ref()
    }

    /// Tracked entry for `id`.
    pub fn entry(&self, id: &CommunityId) -> Option<&LruEntry> {
        self.entries.get(id)
    }

    /// Start tracking `id`, due immediately, at the most-recently-used
    /// position. The focused community and already tracked ones are left
    /// alone.
    ///
    /// Returns the community evicted to stay within capacity.
    pub fn insert(&mut self, id: CommunityId, now_ms: u64) -> Option<CommunityId> {
        if self.focused.as_ref() == Some(&id) || self.entries.contains_key(&id) {
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.least_recently_used()
                .and_then(|lru| self.remove(&lru))
                .map(|entry| entry.community_id)
        } else {
            None
        };

        let entry = LruEntry {
            community_id: id.clone(),
            last_polled_at_ms: now_ms,
            load_count: 0,
            backoff_ms: self.policy.delay_ms(0),
            recency: self.bump(),
        };
        self.queue.insert(entry.key());
        self.entries.insert(id, entry);
        evicted
    }

    /// Stop tracking `id`.
    pub fn remove(&mut self, id: &CommunityId) -> Option<LruEntry> {
        let entry = self.entries.remove(id)?;
        self.queue.remove(&entry.key());
        Some(entry)
    }

    /// Focus `id`: it leaves the list, and the previously focused community
    /// (if any) re-enters it at the most-recently-used position.
    pub fn focus(&mut self, id: CommunityId, now_ms: u64) -> FocusChange {
        if self.focused.as_ref() == Some(&id) {
            return FocusChange::default();
        }
        self.remove(&id);
        let previous = self.focused.replace(id);
        let evicted = previous
            .clone()
            .and_then(|prev| self.insert(prev, now_ms));
        FocusChange { previous, evicted }
    }

    /// Drop focus; the community re-enters the list due immediately.
    pub fn unfocus(&mut self, now_ms: u64) -> FocusChange {
        let previous = self.focused.take();
        let evicted = previous
            .clone()
            .and_then(|prev| self.insert(prev, now_ms));
        FocusChange { previous, evicted }
    }

    /// Record a finished poll: bump `load_count` and push the next due time
    /// out by the new backoff.
    pub fn record_poll(&mut self, id: &CommunityId, now_ms: u64) {
        let Some(mut entry) = self.remove(id) else {
            return;
        };
        entry.load_count = entry.load_count.saturating_add(1);
        entry.last_polled_at_ms = now_ms;
        entry.backoff_ms = self.policy.delay_ms(entry.load_count);
        self.queue.insert(entry.key());
        self.entries.insert(id.clone(), entry);
    }

    /// Mark `id` as used (most recently used), keeping its schedule.
    pub fn touch(&mut self, id: &CommunityId) {
        let Some(mut entry) = self.remove(id) else {
            return;
        };
        entry.recency = self.bump();
        self.queue.insert(entry.key());
        self.entries.insert(id.clone(), entry);
    }

    /// Entries due at `now_ms`, in poll order.
    pub fn due(&self, now_ms: u64) -> Vec<CommunityId> {
        self.queue
            .iter()
            .take_while(|(due_at, _, _)| *due_at <= now_ms)
            .map(|(_, _, id)| id.clone())
            .collect()
    }

    /// Every entry in poll order (manual refresh).
    pub fn all(&self) -> Vec<CommunityId> {
        self.queue.iter().map(|(_, _, id)| id.clone()).collect()
    }

    /// Earliest due time.
    pub fn next_due_at(&self) -> Option<u64> {
        self.queue.first().map(|(due_at, _, _)| *due_at)
    }

    /// Snapshot for display.
    pub fn status(&self) -> LruStatus {
        LruStatus {
            focused: self.focused.clone(),
            entries: self
                .queue
                .iter()
                .filter_map(|(_, _, id)| self.entries.get(id).cloned())
                .collect(),
            capacity: self.capacity,
        }
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.entries.clear();
        self.focused = None;
    }

    fn least_recently_used(&self) -> Option<CommunityId> {
        self.entries
            .values()
            .min_by_key(|e| e.recency)
            .map(|e| e.community_id.clone())
    }

    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

impl Default for LruScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRACKED, BackoffPolicy::default())
    }
}
