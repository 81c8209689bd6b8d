//! Community state: definition, membership, channels and channel timelines.
//!
//! A community is identified by the coordinate of its definition event
//! (`34550:<owner>:<identifier>`). Everything else about it is derived from
//! events that reference that coordinate through an `a` tag:
//!
//! | Kind    | Meaning               | Accepted from        |
//! |---------|-----------------------|----------------------|
//! | 34550   | definition            | owner                |
//! | 34551   | channel definition    | owner, moderators    |
//! | 34552   | space definition      | owner, moderators    |
//! | 34553   | member list           | owner, moderators    |
//! | 4552    | join request          | anyone (own tracked) |
//! | 9       | channel message (`h`) | anyone               |
//! | 5       | deletion              | message author       |

use relaychat_types::{Kind, PublicKey, RawEvent, TypesError};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::message::DecryptedMessage;
use crate::reconcile::{ReduceContext, TimelineEffect, TimelineEvent};
use crate::timeline::Timeline;

/// Coordinate of a community definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommunityId {
    owner: PublicKey,
    identifier: String,
}

impl CommunityId {
    /// Community owned by `owner` with `d` tag `identifier`.
    pub fn new(owner: PublicKey, identifier: impl Into<String>) -> Self {
        Self {
            owner,
            identifier: identifier.into(),
        }
    }

    /// Parse a `34550:<owner hex>:<identifier>` coordinate.
    pub fn parse(coordinate: &str) -> Result<Self, TypesError> {
        let invalid = || TypesError::InvalidCoordinate(coordinate.to_string());
        let mut parts = coordinate.splitn(3, ':');
        let kind = parts.next().ok_or_else(invalid)?;
        if kind != Kind::COMMUNITY.to_string() {
            return Err(invalid());
        }
        let owner = parts.next().ok_or_else(invalid)?;
        let identifier = parts.next().ok_or_else(invalid)?;
        Ok(Self::new(PublicKey::from_hex(owner)?, identifier))
    }

    /// The community of a definition event.
    pub fn of_definition(event: &RawEvent) -> Option<Self> {
        if event.kind != Kind::COMMUNITY {
            return None;
        }
        Some(Self::new(event.pubkey, event.identifier().unwrap_or("")))
    }

    /// The community an event points at through its `a` tags.
    pub fn referenced_by(event: &RawEvent) -> Option<Self> {
        event.tag_values("a").find_map(|a| Self::parse(a).ok())
    }

    /// Owner key.
    pub fn owner(&self) -> &PublicKey {
        &self.owner
    }

    /// `d` identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Display for CommunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", Kind::COMMUNITY, self.owner, self.identifier)
    }
}

impl FromStr for CommunityId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CommunityId {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CommunityId> for String {
    fn from(id: CommunityId) -> Self {
        id.to_string()
    }
}

/// The local user's relationship to a community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MembershipStatus {
    /// Authored the definition.
    Owner,
    /// Named moderator in the definition.
    Moderator,
    /// On an approved member list.
    Approved,
    /// Sent a join request that has not been answered.
    Pending,
    /// On a declined list.
    Declined,
    /// On a banned list.
    Banned,
    /// No relationship.
    NotMember,
}

impl MembershipStatus {
    /// Owner, moderator or approved.
    pub fn is_joined(&self) -> bool {
        self.role_rank().is_some()
    }

    /// Ranking used to order joined communities (lower first).
    pub fn role_rank(&self) -> Option<u8> {
        match self {
            Self::Owner => Some(0),
            Self::Moderator => Some(1),
            Self::Approved => Some(2),
            _ => None,
        }
    }
}

/// Which member list a kind-34553 event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ListKind {
    /// Approved members.
    Approved,
    /// Declined join requests.
    Declined,
    /// Banned keys.
    Banned,
}

impl ListKind {
    /// Prefix used in the list's `d` tag (`<prefix>:<community identifier>`).
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Banned => "banned",
        }
    }

    /// `d` tag value of this list for a community.
    pub fn identifier_for(&self, community: &CommunityId) -> String {
        format!("{}:{}", self.prefix(), community.identifier())
    }

    fn parse(identifier: &str, community: &CommunityId) -> Option<Self> {
        let (prefix, rest) = identifier.split_once(':')?;
        if rest != community.identifier() {
            return None;
        }
        [Self::Approved, Self::Declined, Self::Banned]
            .into_iter()
            .find(|k| k.prefix() == prefix)
    }
}

/// One author's latest version of one member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberList {
    /// Owner or moderator who published the list.
    pub author: PublicKey,
    /// Which list.
    pub list: ListKind,
    /// Publication time of this version.
    pub created_at: u64,
    /// Listed keys.
    pub members: BTreeSet<PublicKey>,
}

/// A channel inside a community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDef {
    /// `d` identifier, referenced by messages' `h` tag.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Space the channel is grouped under.
    pub space: Option<String>,
    /// Marked as the community's default channel.
    pub is_default: bool,
    /// Definition time.
    pub created_at: u64,
}

/// A grouping of channels inside a community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceDef {
    /// `d` identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Definition time.
    pub created_at: u64,
}

/// Something that happened to a community.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunityEvent {
    /// Kind 34550 definition.
    Definition(RawEvent),
    /// Kind 34551 channel definition.
    Channel(RawEvent),
    /// Kind 34552 space definition.
    Space(RawEvent),
    /// Kind 34553 member list.
    MemberList(RawEvent),
    /// Kind 4552 join request.
    JoinRequest(RawEvent),
    /// A timeline event for one channel.
    ChannelTimeline {
        /// Channel `d` identifier.
        channel: String,
        /// What happened to its timeline.
        event: TimelineEvent,
    },
    /// Kind 5 deletion targeting channel messages.
    Deletion(RawEvent),
}

impl CommunityEvent {
    /// Route a raw event to the community it concerns.
    ///
    /// Channel messages without an `h` tag, and events that reference no
    /// community, are not community events.
    pub fn classify(event: RawEvent, me: &PublicKey, now_ms: u64) -> Option<(CommunityId, Self)> {
        let kind = event.kind;
        if kind == Kind::COMMUNITY {
            let id = CommunityId::of_definition(&event)?;
            return Some((id, Self::Definition(event)));
        }

        let id = CommunityId::referenced_by(&event)?;
        let classified = match kind {
            k if k == Kind::CHANNEL => Self::Channel(event),
            k if k == Kind::SPACE => Self::Space(event),
            k if k == Kind::MEMBER_LIST => Self::MemberList(event),
            k if k == Kind::JOIN_REQUEST => Self::JoinRequest(event),
            k if k == Kind::DELETION => Self::Deletion(event),
            k if k == Kind::CHANNEL_MESSAGE => {
                let channel = event.first_tag_value("h")?.to_string();
                Self::ChannelTimeline {
                    channel,
                    event: TimelineEvent::Live(DecryptedMessage::plain(event, me, now_ms)),
                }
            }
            _ => return None,
        };
        Some((id, classified))
    }
}

/// Observable outcome of applying a [`CommunityEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunityEffect {
    /// Definition, channels, spaces or lists changed.
    MetadataChanged,
    /// The local user's membership changed.
    MembershipChanged {
        /// Previous status.
        from: MembershipStatus,
        /// New status.
        to: MembershipStatus,
    },
    /// A channel timeline changed.
    Channel {
        /// Channel `d` identifier.
        channel: String,
        /// What changed.
        effect: TimelineEffect,
    },
}

/// Everything known about one community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityState {
    /// Community coordinate.
    pub id: CommunityId,
    /// Newest definition event.
    pub definition: Option<RawEvent>,
    /// Local user's relationship.
    pub membership: MembershipStatus,
    /// Channels by `d` identifier.
    pub channels: BTreeMap<String, ChannelDef>,
    /// Spaces by `d` identifier.
    pub spaces: BTreeMap<String, SpaceDef>,
    /// Latest member list per (author, list).
    pub member_lists: Vec<MemberList>,
    /// Whether the local user has requested to join.
    pub join_requested: bool,
    /// Channel message timelines by channel identifier.
    pub channel_timelines: BTreeMap<String, Timeline>,
    /// Newest `created_at` seen for this community.
    pub last_activity: Option<u64>,
}

impl CommunityState {
    /// Empty state; membership is computed for `me`.
    pub fn new(id: CommunityId, me: &PublicKey) -> Self {
        let mut state = Self {
            id,
            definition: None,
            membership: MembershipStatus::NotMember,
            channels: BTreeMap::new(),
            spaces: BTreeMap::new(),
            member_lists: Vec::new(),
            join_requested: false,
            channel_timelines: BTreeMap::new(),
            last_activity: None,
        };
        state.membership = state.compute_membership(me);
        state
    }

    /// Display name: the definition's `name` tag, else the identifier.
    pub fn name(&self) -> &str {
        self.definition
            .as_ref()
            .and_then(|d| d.first_tag_value("name"))
            .unwrap_or(self.id.identifier())
    }

    /// Moderators named in the definition (`["p", key, relay, "moderator"]`).
    pub fn moderators(&self) -> BTreeSet<PublicKey> {
        let Some(definition) = &self.definition else {
            return BTreeSet::new();
        };
        definition
            .tags
            .iter()
            .filter(|t| t.name() == Some("p") && t.get(3) == Some("moderator"))
            .filter_map(|t| t.value().and_then(|v| PublicKey::from_hex(v).ok()))
            .collect()
    }

    /// Owner or moderator.
    pub fn is_authority(&self, key: &PublicKey) -> bool {
        key == self.id.owner() || self.moderators().contains(key)
    }

    /// Union of one list across all authorities.
    pub fn members(&self, list: ListKind) -> BTreeSet<PublicKey> {
        self.member_lists
            .iter()
            .filter(|l| l.list == list)
            .flat_map(|l| l.members.iter().copied())
            .collect()
    }

    /// Channel marked default, else the oldest one.
    pub fn default_channel(&self) -> Option<&ChannelDef> {
        self.channels
            .values()
            .find(|c| c.is_default)
            .or_else(|| self.channels.values().min_by_key(|c| (c.created_at, &c.id)))
    }

    /// A channel's timeline, if any message was ever stored for it.
    pub fn channel_timeline(&self, channel: &str) -> Option<&Timeline> {
        self.channel_timelines.get(channel)
    }

    /// Drop cached channel messages, keeping metadata.
    pub fn clear_messages(&mut self) {
        self.channel_timelines.clear();
    }

    /// Rebuild timeline id indexes after deserialization.
    pub fn rebuild_indexes(&mut self) {
        self.channel_timelines
            .values_mut()
            .for_each(Timeline::rebuild_index);
    }

    /// Apply an event. Pure.
    pub fn apply(
        self,
        event: CommunityEvent,
        me: &PublicKey,
        ctx: &ReduceContext,
    ) -> (Self, Vec<CommunityEffect>) {
        let mut state = self;
        let mut effects = Vec::new();
        let before = state.membership;

        let changed = match event {
            CommunityEvent::Definition(raw) => state.apply_definition(raw),
            CommunityEvent::Channel(raw) => state.apply_channel(&raw),
            CommunityEvent::Space(raw) => state.apply_space(&raw),
            CommunityEvent::MemberList(raw) => state.apply_member_list(&raw),
            CommunityEvent::JoinRequest(raw) => {
                let mine = raw.pubkey == *me && !state.join_requested;
                state.join_requested |= mine;
                mine
            }
            CommunityEvent::ChannelTimeline { channel, event } => {
                let timeline = state.channel_timelines.remove(&channel).unwrap_or_default();
                let (timeline, timeline_effects) = timeline.apply(event, ctx);
                state.touch(timeline.last_activity());
                state.channel_timelines.insert(channel.clone(), timeline);
                effects.extend(timeline_effects.into_iter().map(|effect| {
                    CommunityEffect::Channel {
                        channel: channel.clone(),
                        effect,
                    }
                }));
                false
            }
            CommunityEvent::Deletion(raw) => {
                for (channel, timeline) in state.channel_timelines.iter_mut() {
                    for id in timeline.apply_deletion(&raw) {
                        effects.push(CommunityEffect::Channel {
                            channel: channel.clone(),
                            effect: TimelineEffect::Deleted { id },
                        });
                    }
                }
                false
            }
        };

        if changed {
            effects.push(CommunityEffect::MetadataChanged);
        }
        state.membership = state.compute_membership(me);
        if state.membership != before {
            effects.push(CommunityEffect::MembershipChanged {
                from: before,
                to: state.membership,
            });
        }
        (state, effects)
    }

    /// Owner, then moderator, then banned, approved, declined, pending.
    fn compute_membership(&self, me: &PublicKey) -> MembershipStatus {
        if me == self.id.owner() {
            MembershipStatus::Owner
        } else if self.moderators().contains(me) {
            MembershipStatus::Moderator
        } else if self.members(ListKind::Banned).contains(me) {
            MembershipStatus::Banned
        } else if self.members(ListKind::Approved).contains(me) {
            MembershipStatus::Approved
        } else if self.members(ListKind::Declined).contains(me) {
            MembershipStatus::Declined
        } else if self.join_requested {
            MembershipStatus::Pending
        } else {
            MembershipStatus::NotMember
        }
    }

    fn touch(&mut self, created_at: Option<u64>) {
        self.last_activity = self.last_activity.max(created_at);
    }

    fn apply_definition(&mut self, raw: RawEvent) -> bool {
        if CommunityId::of_definition(&raw).as_ref() != Some(&self.id) {
            return false;
        }
        let newer = self
            .definition
            .as_ref()
            .map_or(true, |current| raw.created_at > current.created_at);
        if newer {
            self.touch(Some(raw.created_at));
            self.definition = Some(raw);
        }
        newer
    }

    fn apply_channel(&mut self, raw: &RawEvent) -> bool {
        if raw.kind != Kind::CHANNEL || !self.is_authority(&raw.pubkey) {
            return false;
        }
        let Some(id) = raw.identifier() else {
            return false;
        };
        if self
            .channels
            .get(id)
            .is_some_and(|c| c.created_at >= raw.created_at)
        {
            return false;
        }
        let channel = ChannelDef {
            id: id.to_string(),
            name: raw.first_tag_value("name").unwrap_or(id).to_string(),
            space: raw.first_tag_value("space").map(str::to_string),
            is_default: raw.first_tag_value("default") == Some("true"),
            created_at: raw.created_at,
        };
        self.channels.insert(channel.id.clone(), channel);
        true
    }

    fn apply_space(&mut self, raw: &RawEvent) -> bool {
        if raw.kind != Kind::SPACE || !self.is_authority(&raw.pubkey) {
            return false;
        }
        let Some(id) = raw.identifier() else {
            return false;
        };
        if self
            .spaces
            .get(id)
            .is_some_and(|s| s.created_at >= raw.created_at)
        {
            return false;
        }
        let space = SpaceDef {
            id: id.to_string(),
            name: raw.first_tag_value("name").unwrap_or(id).to_string(),
            created_at: raw.created_at,
        };
        self.spaces.insert(space.id.clone(), space);
        true
    }

    fn apply_member_list(&mut self, raw: &RawEvent) -> bool {
        if raw.kind != Kind::MEMBER_LIST || !self.is_authority(&raw.pubkey) {
            return false;
        }
        let Some(list) = raw.identifier().and_then(|d| ListKind::parse(d, &self.id)) else {
            return false;
        };
        let existing = self
            .member_lists
            .iter()
            .position(|l| l.author == raw.pubkey && l.list == list);
        if let Some(idx) = existing {
            if self.member_lists[idx].created_at >= raw.created_at {
                return false;
            }
            self.member_lists.remove(idx);
        }
        self.member_lists.push(MemberList {
            author: raw.pubkey,
            list,
            created_at: raw.created_at,
            members: raw.pubkey_tags().into_iter().collect(),
        });
        true
    }
}

/// Joined communities ordered by role (owner, moderator, approved), then by
/// most recent activity.
pub fn rank_communities<'a, I>(communities: I) -> Vec<CommunityId>
where
    I: IntoIterator<Item = &'a CommunityState>,
{
    let mut joined: Vec<_> = communities
        .into_iter()
        .filter_map(|c| c.membership.role_rank().map(|rank| (rank, c)))
        .collect();
    joined.sort_by_key(|(rank, c)| (*rank, Reverse(c.last_activity), c.id.clone()));
    joined.into_iter().map(|(_, c)| c.id.clone()).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::timeline::tests::{me, peer};
    use relaychat_types::{Tag, UnsignedEvent};

    pub(crate) fn owner() -> PublicKey {
        PublicKey::from_bytes([7u8; 32])
    }

    pub(crate) fn community() -> CommunityId {
        CommunityId::new(owner(), "rust")
    }

    pub(crate) fn raw(author: PublicKey, kind: Kind, created_at: u64, tags: Vec<Tag>) -> RawEvent {
        UnsignedEvent::new(author, kind, created_at, tags, "").into_raw("sig")
    }

    pub(crate) fn definition(created_at: u64, moderators: &[PublicKey]) -> RawEvent {
        let mut tags = vec![Tag::identifier("rust"), Tag::new(["name", "Rustaceans"])];
        for m in moderators {
            tags.push(Tag::new(["p".to_string(), m.to_hex(), String::new(), "moderator".into()]));
        }
        raw(owner(), Kind::COMMUNITY, created_at, tags)
    }

    pub(crate) fn channel(author: PublicKey, d: &str, created_at: u64, default: bool) -> RawEvent {
        let mut tags = vec![
            Tag::identifier(d),
            Tag::coordinate(&community().to_string()),
            Tag::new(["name", d]),
        ];
        if default {
            tags.push(Tag::new(["default", "true"]));
        }
        raw(author, Kind::CHANNEL, created_at, tags)
    }

    pub(crate) fn member_list(list: ListKind, members: &[PublicKey], created_at: u64) -> RawEvent {
        let mut tags = vec![
            Tag::identifier(&list.identifier_for(&community())),
            Tag::coordinate(&community().to_string()),
        ];
        tags.extend(members.iter().map(Tag::pubkey));
        raw(owner(), Kind::MEMBER_LIST, created_at, tags)
    }

    fn apply(state: CommunityState, event: CommunityEvent) -> (CommunityState, Vec<CommunityEffect>) {
        state.apply(event, &me(), &ReduceContext::at(0))
    }

    fn fresh() -> CommunityState {
        CommunityState::new(community(), &me())
    }

    // ===== Id Tests =====

    #[test]
    fn community_id_roundtrip() {
        let id = community();
        let text = id.to_string();
        assert!(text.starts_with("34550:"));
        assert_eq!(CommunityId::parse(&text).unwrap(), id);
        assert_eq!(id.identifier(), "rust");
    }

    #[test]
    fn community_id_rejects_other_kinds() {
        let text = format!("34551:{}:rust", owner());
        assert!(CommunityId::parse(&text).is_err());
        assert!(CommunityId::parse("34550:nothex:rust").is_err());
        assert!(CommunityId::parse("34550").is_err());
    }

    #[test]
    fn identifier_may_contain_colons() {
        let id = CommunityId::new(owner(), "a:b");
        assert_eq!(CommunityId::parse(&id.to_string()).unwrap(), id);
    }

    // ===== Membership Tests =====

    #[test]
    fn owner_membership() {
        let state = CommunityState::new(community(), &owner());
        assert_eq!(state.membership, MembershipStatus::Owner);
    }

    #[test]
    fn moderator_from_definition() {
        let (state, effects) = apply(fresh(), CommunityEvent::Definition(definition(10, &[me()])));
        assert_eq!(state.membership, MembershipStatus::Moderator);
        assert!(effects.contains(&CommunityEffect::MembershipChanged {
            from: MembershipStatus::NotMember,
            to: MembershipStatus::Moderator,
        }));
        assert_eq!(state.name(), "Rustaceans");
    }

    #[test]
    fn join_request_then_approval() {
        let request = raw(
            me(),
            Kind::JOIN_REQUEST,
            5,
            vec![Tag::coordinate(&community().to_string())],
        );
        let (state, _) = apply(fresh(), CommunityEvent::JoinRequest(request));
        assert_eq!(state.membership, MembershipStatus::Pending);

        let (state, _) = apply(
            state,
            CommunityEvent::MemberList(member_list(ListKind::Approved, &[me()], 6)),
        );
        assert_eq!(state.membership, MembershipStatus::Approved);
        assert!(state.membership.is_joined());
    }

    #[test]
    fn ban_beats_approval() {
        let (state, _) = apply(
            fresh(),
            CommunityEvent::MemberList(member_list(ListKind::Approved, &[me()], 6)),
        );
        let (state, _) = apply(
            state,
            CommunityEvent::MemberList(member_list(ListKind::Banned, &[me()], 7)),
        );
        assert_eq!(state.membership, MembershipStatus::Banned);
    }

    #[test]
    fn newer_member_list_replaces_older() {
        let (state, _) = apply(
            fresh(),
            CommunityEvent::MemberList(member_list(ListKind::Approved, &[me()], 6)),
        );
        let (state, _) = apply(
            state,
            CommunityEvent::MemberList(member_list(ListKind::Approved, &[peer()], 8)),
        );
        let (state, effects) = apply(
            state,
            CommunityEvent::MemberList(member_list(ListKind::Approved, &[me()], 7)),
        );

        assert!(effects.is_empty());
        assert_eq!(state.membership, MembershipStatus::NotMember);
        assert_eq!(state.members(ListKind::Approved), BTreeSet::from([peer()]));
    }

    #[test]
    fn member_list_from_stranger_ignored() {
        let mut list = member_list(ListKind::Approved, &[me()], 6);
        list.pubkey = peer();
        let (state, _) = apply(fresh(), CommunityEvent::MemberList(list));
        assert_eq!(state.membership, MembershipStatus::NotMember);
    }

    // ===== Definition & Channel Tests =====

    #[test]
    fn newest_definition_wins() {
        let (state, _) = apply(fresh(), CommunityEvent::Definition(definition(20, &[])));
        let (state, effects) = apply(state, CommunityEvent::Definition(definition(10, &[me()])));

        assert!(effects.is_empty());
        assert_eq!(state.definition.as_ref().unwrap().created_at, 20);
        assert_eq!(state.membership, MembershipStatus::NotMember);
    }

    #[test]
    fn definition_from_impostor_ignored() {
        let mut fake = definition(20, &[me()]);
        fake.pubkey = peer();
        let (state, _) = apply(fresh(), CommunityEvent::Definition(fake));
        assert!(state.definition.is_none());
    }

    #[test]
    fn channels_from_moderators_accepted() {
        let (state, _) = apply(fresh(), CommunityEvent::Definition(definition(1, &[peer()])));
        let (state, _) = apply(state, CommunityEvent::Channel(channel(peer(), "general", 2, false)));
        let (state, _) = apply(state, CommunityEvent::Channel(channel(me(), "spam", 3, false)));

        assert!(state.channels.contains_key("general"));
        assert!(!state.channels.contains_key("spam"));
    }

    #[test]
    fn default_channel_prefers_flag_then_oldest() {
        let (state, _) = apply(fresh(), CommunityEvent::Channel(channel(owner(), "b", 5, false)));
        let (state, _) = apply(state, CommunityEvent::Channel(channel(owner(), "a", 9, false)));
        assert_eq!(state.default_channel().unwrap().id, "b");

        let (state, _) = apply(state, CommunityEvent::Channel(channel(owner(), "c", 20, true)));
        assert_eq!(state.default_channel().unwrap().id, "c");
    }

    // ===== Channel Message Tests =====

    fn channel_message(author: PublicKey, channel: Option<&str>, created_at: u64) -> RawEvent {
        let mut tags = vec![Tag::coordinate(&community().to_string())];
        if let Some(h) = channel {
            tags.push(Tag::new(["h", h]));
        }
        UnsignedEvent::new(author, Kind::CHANNEL_MESSAGE, created_at, tags, "hello").into_raw("sig")
    }

    #[test]
    fn classify_routes_channel_message() {
        let (id, event) =
            CommunityEvent::classify(channel_message(peer(), Some("general"), 10), &me(), 0)
                .unwrap();
        assert_eq!(id, community());
        assert!(matches!(
            event,
            CommunityEvent::ChannelTimeline { ref channel, event: TimelineEvent::Live(_) }
                if channel == "general"
        ));
    }

    #[test]
    fn classify_ignores_message_without_channel() {
        assert!(CommunityEvent::classify(channel_message(peer(), None, 10), &me(), 0).is_none());
    }

    #[test]
    fn classify_definition_uses_own_coordinate() {
        let (id, _) = CommunityEvent::classify(definition(1, &[]), &me(), 0).unwrap();
        assert_eq!(id, community());
    }

    #[test]
    fn channel_messages_update_activity_and_delete() {
        let message = channel_message(peer(), Some("general"), 42);
        let message_id = message.id;
        let (_, event) = CommunityEvent::classify(message, &me(), 0).unwrap();

        let (state, effects) = apply(fresh(), event);
        assert_eq!(state.last_activity, Some(42));
        assert_eq!(state.channel_timeline("general").unwrap().len(), 1);
        assert_eq!(effects.len(), 1);

        let deletion = raw(
            peer(),
            Kind::DELETION,
            43,
            vec![Tag::event(&message_id), Tag::coordinate(&community().to_string())],
        );
        let (state, effects) = apply(state, CommunityEvent::Deletion(deletion));
        assert!(state.channel_timeline("general").unwrap().is_empty());
        assert_eq!(
            effects,
            vec![CommunityEffect::Channel {
                channel: "general".into(),
                effect: TimelineEffect::Deleted { id: message_id },
            }]
        );
    }

    // ===== Ranking Tests =====

    #[test]
    fn rank_by_role_then_activity() {
        let owned = CommunityState::new(CommunityId::new(me(), "mine"), &me());

        let mut approved_recent = CommunityState::new(CommunityId::new(owner(), "recent"), &me());
        approved_recent.membership = MembershipStatus::Approved;
        approved_recent.last_activity = Some(100);

        let mut approved_old = CommunityState::new(CommunityId::new(owner(), "old"), &me());
        approved_old.membership = MembershipStatus::Approved;
        approved_old.last_activity = Some(10);

        let mut moderated = CommunityState::new(CommunityId::new(owner(), "mod"), &me());
        moderated.membership = MembershipStatus::Moderator;

        let pending = {
            let mut s = CommunityState::new(CommunityId::new(owner(), "pending"), &me());
            s.membership = MembershipStatus::Pending;
            s
        };

        let ranked = rank_communities([&approved_old, &pending, &moderated, &approved_recent, &owned]);
        let names: Vec<_> = ranked.iter().map(CommunityId::identifier).collect();
        assert_eq!(names, vec!["mine", "mod", "recent", "old"]);
    }

    #[test]
    fn snapshot_serializes_with_string_keys() {
        let (state, _) = apply(fresh(), CommunityEvent::Definition(definition(1, &[])));
        let json = serde_json::to_string(&state).unwrap();
        let restored: CommunityState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, state.id);
        assert_eq!(restored.definition, state.definition);
    }
}
