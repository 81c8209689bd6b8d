//! Reconciliation of history, live events and optimistic sends.
//!
//! [`Timeline::apply`] is the single entry point that mutates a timeline. It
//! takes the old timeline and a [`TimelineEvent`] and returns the new timeline
//! plus the [`TimelineEffect`]s the caller may want to surface (animations,
//! notifications, logging).
//!
//! Rules:
//! - an incoming confirmed message with an unknown id promotes the closest
//!   pending entry with the same author and plaintext inside the match window
//! - an incoming id that is already stored promotes it if pending, otherwise
//!   it is a duplicate and ignored
//! - anything else is inserted in `created_at` order

use relaychat_types::{EventId, RawEvent};
use serde::{Deserialize, Serialize};

use crate::message::{DecryptedMessage, DeliveryEvent};
use crate::timeline::{SourcePage, Timeline};

/// Default match window for optimistic promotion (seconds).
pub const DEFAULT_MATCH_WINDOW_SECS: u64 = 30;

/// Default "just arrived" threshold (milliseconds).
pub const DEFAULT_RECENT_THRESHOLD_MS: u64 = 10_000;

/// Default time an optimistic entry may wait for confirmation (seconds).
pub const DEFAULT_OPTIMISTIC_TIMEOUT_SECS: u64 = 60;

/// Tunables for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Maximum `|optimistic - confirmed|` creation-time distance (seconds).
    pub match_window_secs: u64,
    /// Events younger than this are reported as just arrived (milliseconds).
    pub recent_threshold_ms: u64,
    /// Optimistic entries older than this are marked failed (seconds).
    pub optimistic_timeout_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            match_window_secs: DEFAULT_MATCH_WINDOW_SECS,
            recent_threshold_ms: DEFAULT_RECENT_THRESHOLD_MS,
            optimistic_timeout_secs: DEFAULT_OPTIMISTIC_TIMEOUT_SECS,
        }
    }
}

/// Inputs every reducer needs besides the event itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceContext {
    /// Local wall clock, unix milliseconds.
    pub now_ms: u64,
    /// Reconciliation tunables.
    pub config: ReconcileConfig,
}

impl ReduceContext {
    /// Context with default tunables.
    pub fn at(now_ms: u64) -> Self {
        Self {
            now_ms,
            config: ReconcileConfig::default(),
        }
    }
}

/// Something that happened to a timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    /// A confirmed message from a live subscription.
    Live(DecryptedMessage),
    /// A page of older history.
    OlderPage {
        /// Messages that survived decryption.
        messages: Vec<DecryptedMessage>,
        /// What each query of the page returned.
        sources: Vec<SourcePage>,
        /// Requested page size.
        page_size: usize,
    },
    /// A local send shown before confirmation.
    Optimistic(DecryptedMessage),
    /// The publisher rejected an optimistic send.
    PublishRejected {
        /// Optimistic entry id.
        id: EventId,
        /// Publisher's reason.
        reason: String,
    },
    /// The user re-sent a failed message.
    Retry {
        /// Failed entry id.
        id: EventId,
    },
    /// Fail optimistic entries that waited too long.
    ExpireOptimistic,
    /// A kind-5 deletion request.
    Deletion(RawEvent),
}

/// Observable outcome of applying a [`TimelineEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEffect {
    /// A new entry was inserted.
    Added {
        /// Inserted id.
        id: EventId,
        /// Whether it should be animated / notified.
        just_arrived: bool,
    },
    /// A pending entry became confirmed.
    Promoted {
        /// Placeholder id.
        from: EventId,
        /// Confirmed id.
        to: EventId,
    },
    /// An already stored id arrived again.
    Duplicate {
        /// The repeated id.
        id: EventId,
    },
    /// An optimistic entry failed.
    Failed {
        /// Failed entry id.
        id: EventId,
    },
    /// A failed entry was re-armed.
    Retried {
        /// Re-armed entry id.
        id: EventId,
    },
    /// An entry was removed by a deletion.
    Deleted {
        /// Removed id.
        id: EventId,
    },
    /// The start of history was reached.
    Exhausted,
}

/// Whether an event created at `created_at` (seconds) counts as just arrived
/// at `now_ms`.
pub fn is_just_arrived(created_at: u64, now_ms: u64, threshold_ms: u64) -> bool {
    now_ms.saturating_sub(created_at.saturating_mul(1000)) < threshold_ms
}

/// Whether `confirmed` is the network copy of the pending entry `pending`.
pub fn promotion_matches(
    pending: &DecryptedMessage,
    confirmed: &DecryptedMessage,
    window_secs: u64,
) -> bool {
    pending.status.is_pending()
        && pending.author() == confirmed.author()
        && pending.plaintext == confirmed.plaintext
        && pending.created_at().abs_diff(confirmed.created_at()) <= window_secs
}

impl Timeline {
    /// Apply an event. Pure: no I/O, no clocks besides `ctx.now_ms`.
    pub fn apply(self, event: TimelineEvent, ctx: &ReduceContext) -> (Self, Vec<TimelineEffect>) {
        let mut timeline = self;
        let mut effects = Vec::new();

        match event {
            TimelineEvent::Live(message) => {
                let just_arrived = is_just_arrived(
                    message.created_at(),
                    ctx.now_ms,
                    ctx.config.recent_threshold_ms,
                );
                if let Some(message) = timeline.reconcile(message, ctx, &mut effects) {
                    let id = message.id();
                    if timeline.append_live(message) {
                        effects.push(TimelineEffect::Added { id, just_arrived });
                    }
                }
            }

            TimelineEvent::OlderPage {
                messages,
                sources,
                page_size,
            } => {
                let had_more = timeline.has_more();
                let fresh: Vec<_> = messages
                    .into_iter()
                    .filter_map(|m| timeline.reconcile(m, ctx, &mut effects))
                    .collect();
                for id in timeline.append_older_page(fresh, &sources, page_size) {
                    effects.push(TimelineEffect::Added {
                        id,
                        just_arrived: false,
                    });
                }
                if had_more && !timeline.has_more() {
                    effects.push(TimelineEffect::Exhausted);
                }
            }

            TimelineEvent::Optimistic(message) => {
                let id = message.id();
                if timeline.append_live(message) {
                    effects.push(TimelineEffect::Added {
                        id,
                        just_arrived: false,
                    });
                }
            }

            TimelineEvent::PublishRejected { id, reason } => {
                if let Some(entry) = timeline.get_mut(&id) {
                    if entry.status.is_optimistic() {
                        entry.status = entry
                            .status
                            .clone()
                            .on_event(DeliveryEvent::Rejected { reason });
                        effects.push(TimelineEffect::Failed { id });
                    }
                }
            }

            TimelineEvent::Retry { id } => {
                let failed = timeline.get(&id).filter(|m| m.status.is_failed()).cloned();
                if let Some(mut entry) = failed {
                    entry.status = entry.status.on_event(DeliveryEvent::Retried);
                    // The re-publish carries a fresh timestamp.
                    entry.event.created_at = ctx.now_ms / 1000;
                    timeline.replace(&id, entry);
                    effects.push(TimelineEffect::Retried { id });
                }
            }

            TimelineEvent::ExpireOptimistic => {
                let timeout_ms = ctx.config.optimistic_timeout_secs.saturating_mul(1000);
                let expired: Vec<EventId> = timeline
                    .iter()
                    .filter(|m| m.status.is_optimistic())
                    .filter(|m| {
                        ctx.now_ms.saturating_sub(m.created_at().saturating_mul(1000))
                            >= timeout_ms
                    })
                    .map(DecryptedMessage::id)
                    .collect();
                for id in expired {
                    if let Some(entry) = timeline.get_mut(&id) {
                        entry.status = entry.status.clone().on_event(DeliveryEvent::TimedOut);
                        effects.push(TimelineEffect::Failed { id });
                    }
                }
            }

            TimelineEvent::Deletion(deletion) => {
                for id in timeline.apply_deletion(&deletion) {
                    effects.push(TimelineEffect::Deleted { id });
                }
            }
        }

        (timeline, effects)
    }

    /// Resolve an incoming confirmed message against stored entries.
    ///
    /// Returns the message back when it is new and must be inserted, or
    /// `None` when it was absorbed (promotion or duplicate).
    fn reconcile(
        &mut self,
        incoming: DecryptedMessage,
        ctx: &ReduceContext,
        effects: &mut Vec<TimelineEffect>,
    ) -> Option<DecryptedMessage> {
        let id = incoming.id();

        if let Some(existing) = self.get(&id) {
            if existing.status.is_pending() {
                self.promote(id, incoming);
                effects.push(TimelineEffect::Promoted { from: id, to: id });
            } else {
                effects.push(TimelineEffect::Duplicate { id });
            }
            return None;
        }

        let window = ctx.config.match_window_secs;
        let candidate = self
            .iter()
            .filter(|pending| promotion_matches(pending, &incoming, window))
            .min_by_key(|pending| pending.created_at().abs_diff(incoming.created_at()))
            .map(DecryptedMessage::id);

        match candidate {
            Some(from) => {
                self.promote(from, incoming);
                effects.push(TimelineEffect::Promoted { from, to: id });
                None
            }
            None => Some(incoming),
        }
    }

    /// Swap the pending entry `from` for its confirmed copy.
    fn promote(&mut self, from: EventId, confirmed: DecryptedMessage) {
        let Some(pending) = self.get(&from) else {
            return;
        };
        let status = pending.status.clone().on_event(DeliveryEvent::Confirmed);
        let promoted = DecryptedMessage {
            status,
            first_seen_at_ms: pending.first_seen_at_ms,
            ..confirmed
        };
        self.replace(&from, promoted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DeliveryStatus, Protocol};
    use crate::timeline::tests::{me, msg, peer};
    use relaychat_types::{Kind, Tag, UnsignedEvent};

    fn ctx(now_ms: u64) -> ReduceContext {
        ReduceContext::at(now_ms)
    }

    fn optimistic(text: &str, created_at: u64) -> DecryptedMessage {
        DecryptedMessage::optimistic(me(), vec![], text, Protocol::Sealed, created_at, 42)
    }

    fn with_optimistic(text: &str, created_at: u64) -> (Timeline, EventId) {
        let pending = optimistic(text, created_at);
        let id = pending.id();
        let (timeline, _) =
            Timeline::new().apply(TimelineEvent::Optimistic(pending), &ctx(created_at * 1000));
        (timeline, id)
    }

    // ===== Promotion Tests =====

    #[test]
    fn confirmed_inside_window_promotes() {
        for confirmed_at in [970, 1000, 1030] {
            let (timeline, placeholder) = with_optimistic("hi", 1000);
            let confirmed = msg(me(), "hi", confirmed_at);
            let confirmed_id = confirmed.id();

            let (timeline, effects) =
                timeline.apply(TimelineEvent::Live(confirmed), &ctx(1_000_000));

            assert_eq!(timeline.len(), 1, "created_at {confirmed_at}");
            let entry = &timeline.messages()[0];
            assert_eq!(entry.id(), confirmed_id);
            assert_eq!(entry.status, DeliveryStatus::Confirmed);
            assert_eq!(entry.first_seen_at_ms, 42);
            assert_eq!(
                effects,
                vec![TimelineEffect::Promoted {
                    from: placeholder,
                    to: confirmed_id
                }]
            );
        }
    }

    #[test]
    fn confirmed_outside_window_is_appended() {
        let (timeline, placeholder) = with_optimistic("hi", 1000);

        let (timeline, _) =
            timeline.apply(TimelineEvent::Live(msg(me(), "hi", 1032)), &ctx(1_032_000));

        assert_eq!(timeline.len(), 2);
        assert!(timeline.get(&placeholder).unwrap().status.is_optimistic());
    }

    #[test]
    fn different_text_does_not_promote() {
        let (timeline, _) = with_optimistic("hi", 1000);
        let (timeline, _) =
            timeline.apply(TimelineEvent::Live(msg(me(), "hello", 1000)), &ctx(1_000_000));
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn different_author_does_not_promote() {
        let (timeline, _) = with_optimistic("hi", 1000);
        let (timeline, _) =
            timeline.apply(TimelineEvent::Live(msg(peer(), "hi", 1000)), &ctx(1_000_000));
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn promotion_repositions_entry() {
        let (timeline, _) = with_optimistic("hi", 1000);
        let (timeline, _) =
            timeline.apply(TimelineEvent::Live(msg(peer(), "yo", 1010)), &ctx(1_010_000));

        // Confirmed copy is later than the peer's message.
        let (timeline, _) =
            timeline.apply(TimelineEvent::Live(msg(me(), "hi", 1020)), &ctx(1_020_000));

        let texts: Vec<_> = timeline.iter().map(|m| m.plaintext.as_str()).collect();
        assert_eq!(texts, vec!["yo", "hi"]);
    }

    #[test]
    fn closest_pending_entry_wins() {
        let (timeline, _) = with_optimistic("hi", 1000);
        let later = optimistic("hi", 1020);
        let later_id = later.id();
        let (timeline, _) = timeline.apply(TimelineEvent::Optimistic(later), &ctx(1_020_000));

        let (_, effects) =
            timeline.apply(TimelineEvent::Live(msg(me(), "hi", 1019)), &ctx(1_020_000));

        assert!(matches!(
            effects.as_slice(),
            [TimelineEffect::Promoted { from, .. }] if *from == later_id
        ));
    }

    #[test]
    fn arrival_with_optimistic_id_promotes() {
        let pending = optimistic("hi", 1000);
        let mut confirmed = pending.clone();
        confirmed.status = DeliveryStatus::Confirmed;
        confirmed.first_seen_at_ms = 999;
        confirmed.event.created_at = 2000;

        let (timeline, _) =
            Timeline::new().apply(TimelineEvent::Optimistic(pending.clone()), &ctx(0));
        let (timeline, effects) = timeline.apply(TimelineEvent::Live(confirmed), &ctx(0));

        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.messages()[0].first_seen_at_ms, 42);
        assert_eq!(
            effects,
            vec![TimelineEffect::Promoted {
                from: pending.id(),
                to: pending.id()
            }]
        );
    }

    #[test]
    fn failed_entry_promotes_on_late_confirmation() {
        let (timeline, placeholder) = with_optimistic("hi", 1000);
        let (timeline, _) = timeline.apply(
            TimelineEvent::PublishRejected {
                id: placeholder,
                reason: "slow".into(),
            },
            &ctx(1_000_000),
        );

        let (timeline, _) =
            timeline.apply(TimelineEvent::Live(msg(me(), "hi", 1001)), &ctx(1_001_000));

        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.messages()[0].status, DeliveryStatus::Confirmed);
    }

    // ===== Dedup Tests =====

    #[test]
    fn same_live_event_twice_is_duplicate() {
        let m = msg(peer(), "yo", 10);
        let (timeline, _) = Timeline::new().apply(TimelineEvent::Live(m.clone()), &ctx(0));
        let (timeline, effects) = timeline.apply(TimelineEvent::Live(m.clone()), &ctx(0));

        assert_eq!(timeline.len(), 1);
        assert_eq!(effects, vec![TimelineEffect::Duplicate { id: m.id() }]);
    }

    #[test]
    fn page_overlapping_live_does_not_duplicate() {
        let live = msg(peer(), "b", 20);
        let (timeline, _) = Timeline::new().apply(TimelineEvent::Live(live.clone()), &ctx(0));

        let (timeline, effects) = timeline.apply(
            TimelineEvent::OlderPage {
                messages: vec![msg(peer(), "a", 10), live],
                sources: vec![SourcePage { fetched: 2, oldest: Some(10) }],
                page_size: 2,
            },
            &ctx(0),
        );

        assert_eq!(timeline.len(), 2);
        assert_eq!(effects.len(), 2);
        assert!(timeline.has_more());
    }

    #[test]
    fn short_page_reports_exhausted_once() {
        let page = || TimelineEvent::OlderPage {
            messages: vec![],
            sources: vec![SourcePage::default()],
            page_size: 50,
        };
        let (timeline, effects) = Timeline::new().apply(page(), &ctx(0));
        assert_eq!(effects, vec![TimelineEffect::Exhausted]);

        let (_, effects) = timeline.apply(page(), &ctx(0));
        assert!(effects.is_empty());
    }

    // ===== Just Arrived Tests =====

    #[test]
    fn just_arrived_threshold() {
        assert!(is_just_arrived(100, 109_999, 10_000));
        assert!(!is_just_arrived(100, 110_000, 10_000));
        // Clock skew: events from the future count as recent.
        assert!(is_just_arrived(200, 100_000, 10_000));
    }

    #[test]
    fn live_effect_carries_just_arrived() {
        let (_, effects) =
            Timeline::new().apply(TimelineEvent::Live(msg(peer(), "yo", 100)), &ctx(105_000));
        assert!(matches!(
            effects.as_slice(),
            [TimelineEffect::Added {
                just_arrived: true,
                ..
            }]
        ));

        let (_, effects) =
            Timeline::new().apply(TimelineEvent::Live(msg(peer(), "yo", 100)), &ctx(500_000));
        assert!(matches!(
            effects.as_slice(),
            [TimelineEffect::Added {
                just_arrived: false,
                ..
            }]
        ));
    }

    // ===== Lifecycle Tests =====

    #[test]
    fn expire_fails_stale_optimistic() {
        let (timeline, placeholder) = with_optimistic("hi", 1000);

        let (timeline, effects) = timeline.apply(TimelineEvent::ExpireOptimistic, &ctx(1_059_000));
        assert!(effects.is_empty());

        let (timeline, effects) = timeline.apply(TimelineEvent::ExpireOptimistic, &ctx(1_060_000));
        assert_eq!(effects, vec![TimelineEffect::Failed { id: placeholder }]);
        assert!(timeline.get(&placeholder).unwrap().status.is_failed());
    }

    #[test]
    fn retry_rearms_with_fresh_timestamp() {
        let (timeline, placeholder) = with_optimistic("hi", 1000);
        let (timeline, _) = timeline.apply(TimelineEvent::ExpireOptimistic, &ctx(2_000_000));

        let (timeline, effects) =
            timeline.apply(TimelineEvent::Retry { id: placeholder }, &ctx(2_000_000));

        assert_eq!(effects, vec![TimelineEffect::Retried { id: placeholder }]);
        let entry = timeline.get(&placeholder).unwrap();
        assert!(entry.status.is_optimistic());
        assert_eq!(entry.created_at(), 2000);
    }

    #[test]
    fn retry_ignores_non_failed() {
        let (timeline, placeholder) = with_optimistic("hi", 1000);
        let (_, effects) = timeline.apply(TimelineEvent::Retry { id: placeholder }, &ctx(0));
        assert!(effects.is_empty());
    }

    #[test]
    fn deletion_effect() {
        let m = msg(peer(), "oops", 10);
        let (timeline, _) = Timeline::new().apply(TimelineEvent::Live(m.clone()), &ctx(0));
        let deletion =
            UnsignedEvent::new(peer(), Kind::DELETION, 11, vec![Tag::event(&m.id())], "")
                .into_raw("sig");

        let (timeline, effects) = timeline.apply(TimelineEvent::Deletion(deletion), &ctx(0));

        assert!(timeline.is_empty());
        assert_eq!(effects, vec![TimelineEffect::Deleted { id: m.id() }]);
    }
}
