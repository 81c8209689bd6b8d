//! Relay query filters.
//!
//! A [`Filter`] is the unit of a query or subscription. Conditions inside a
//! filter are AND-ed; a list of filters is OR-ed by the transport. Local
//! matching ([`Filter::matches`]) lets in-memory transports and ingestion
//! sanity checks apply the same semantics as a relay.

use std::collections::{BTreeMap, BTreeSet};

use crate::{EventId, Kind, PublicKey, RawEvent};

/// A relay query filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Match any of these ids.
    pub ids: Option<BTreeSet<EventId>>,
    /// Match any of these authors.
    pub authors: Option<BTreeSet<PublicKey>>,
    /// Match any of these kinds.
    pub kinds: Option<BTreeSet<Kind>>,
    /// Single-letter tag conditions (`#p`, `#a`, `#d`, ...).
    pub tags: BTreeMap<char, BTreeSet<String>>,
    /// Only events with `created_at >= since`.
    pub since: Option<u64>,
    /// Only events with `created_at <= until`.
    pub until: Option<u64>,
    /// Newest `limit` events only.
    pub limit: Option<usize>,
}

impl Filter {
    /// An empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an id.
    pub fn id(mut self, id: EventId) -> Self {
        self.ids.get_or_insert_with(BTreeSet::new).insert(id);
        self
    }

    /// Add an author.
    pub fn author(mut self, author: PublicKey) -> Self {
        self.authors.get_or_insert_with(BTreeSet::new).insert(author);
        self
    }

    /// Add several authors.
    pub fn authors<I: IntoIterator<Item = PublicKey>>(mut self, authors: I) -> Self {
        self.authors.get_or_insert_with(BTreeSet::new).extend(authors);
        self
    }

    /// Add a kind.
    pub fn kind(mut self, kind: Kind) -> Self {
        self.kinds.get_or_insert_with(BTreeSet::new).insert(kind);
        self
    }

    /// Add several kinds.
    pub fn kinds<I: IntoIterator<Item = Kind>>(mut self, kinds: I) -> Self {
        self.kinds.get_or_insert_with(BTreeSet::new).extend(kinds);
        self
    }

    /// Require a tag `#name` with one of the accumulated values.
    pub fn tag(mut self, name: char, value: impl Into<String>) -> Self {
        self.tags.entry(name).or_default().insert(value.into());
        self
    }

    /// `#p` condition.
    pub fn pubkey(self, key: &PublicKey) -> Self {
        self.tag('p', key.to_hex())
    }

    /// `#a` condition.
    pub fn coordinate(self, coordinate: &str) -> Self {
        self.tag('a', coordinate)
    }

    /// `#d` condition.
    pub fn identifier(self, identifier: &str) -> Self {
        self.tag('d', identifier)
    }

    /// Lower time bound (inclusive).
    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Upper time bound (inclusive).
    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    /// Result limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check whether `event` satisfies every condition (limit excluded).
    pub fn matches(&self, event: &RawEvent) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&event.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.contains(&event.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }
        self.tags.iter().all(|(name, values)| {
            let name = name.to_string();
            event.tags.iter().any(|t| {
                t.name() == Some(name.as_str()) && t.value().is_some_and(|v| values.contains(v))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Tag, UnsignedEvent};

    fn event(author: u8, kind: Kind, created_at: u64, tags: Vec<Tag>) -> RawEvent {
        UnsignedEvent::new(PublicKey::from_bytes([author; 32]), kind, created_at, tags, "")
            .into_raw("")
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::new().matches(&event(1, Kind::LEGACY_DM, 1, vec![])));
    }

    #[test]
    fn kind_and_author_are_anded() {
        let filter = Filter::new()
            .kind(Kind::LEGACY_DM)
            .author(PublicKey::from_bytes([1u8; 32]));

        assert!(filter.matches(&event(1, Kind::LEGACY_DM, 1, vec![])));
        assert!(!filter.matches(&event(2, Kind::LEGACY_DM, 1, vec![])));
        assert!(!filter.matches(&event(1, Kind::GIFT_WRAP, 1, vec![])));
    }

    #[test]
    fn tag_condition_matches_any_value() {
        let me = PublicKey::from_bytes([5u8; 32]);
        let filter = Filter::new().pubkey(&me);

        assert!(filter.matches(&event(1, Kind::LEGACY_DM, 1, vec![Tag::pubkey(&me)])));
        assert!(!filter.matches(&event(1, Kind::LEGACY_DM, 1, vec![])));
    }

    #[test]
    fn time_bounds_are_inclusive() {
        let filter = Filter::new().since(10).until(20);

        assert!(filter.matches(&event(1, Kind::LEGACY_DM, 10, vec![])));
        assert!(filter.matches(&event(1, Kind::LEGACY_DM, 20, vec![])));
        assert!(!filter.matches(&event(1, Kind::LEGACY_DM, 9, vec![])));
        assert!(!filter.matches(&event(1, Kind::LEGACY_DM, 21, vec![])));
    }

    #[test]
    fn multiple_tag_names_all_required() {
        let filter = Filter::new().coordinate("34550:aa:rust").tag('d', "general");

        let both = event(
            1,
            Kind::CHANNEL,
            1,
            vec![Tag::coordinate("34550:aa:rust"), Tag::identifier("general")],
        );
        let only_a = event(1, Kind::CHANNEL, 1, vec![Tag::coordinate("34550:aa:rust")]);

        assert!(filter.matches(&both));
        assert!(!filter.matches(&only_a));
    }
}
