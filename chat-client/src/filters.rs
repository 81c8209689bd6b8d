//! Relay filters for every query and subscription the engine issues.

use relaychat_core::CommunityId;
use relaychat_types::{Filter, Kind, PublicKey};

const DIRECT_MESSAGE_KINDS: [Kind; 2] = [Kind::LEGACY_DM, Kind::GIFT_WRAP];

/// Direct messages in both directions: authored by `me` or tagging `me`.
pub fn direct_messages(me: &PublicKey, limit: Option<usize>) -> Vec<Filter> {
    let sent = Filter::new().kinds(DIRECT_MESSAGE_KINDS).author(*me);
    let received = Filter::new().kinds(DIRECT_MESSAGE_KINDS).pubkey(me);
    match limit {
        Some(limit) => vec![sent.limit(limit), received.limit(limit)],
        None => vec![sent, received],
    }
}

/// Deletions of direct messages, by `me` or addressed to `me`.
pub fn direct_deletions(me: &PublicKey) -> Vec<Filter> {
    vec![
        Filter::new().kind(Kind::DELETION).author(*me),
        Filter::new().kind(Kind::DELETION).pubkey(me),
    ]
}

/// One conversation's history older than `until`.
///
/// Gift wraps hide their sender, so every wrap addressed to `me` is
/// requested; the decryption pipeline routes each to its conversation.
pub fn conversation_history(
    me: &PublicKey,
    counterparty: &PublicKey,
    until: Option<u64>,
    limit: usize,
) -> Vec<Filter> {
    let filters = [
        Filter::new()
            .kind(Kind::LEGACY_DM)
            .author(*me)
            .pubkey(counterparty),
        Filter::new()
            .kind(Kind::LEGACY_DM)
            .author(*counterparty)
            .pubkey(me),
        Filter::new().kind(Kind::GIFT_WRAP).pubkey(me),
    ];
    filters
        .into_iter()
        .map(|f| {
            let f = f.limit(limit);
            match until {
                Some(until) => f.until(until),
                None => f,
            }
        })
        .collect()
}

/// Live events of one conversation.
pub fn conversation_live(me: &PublicKey, counterparty: &PublicKey) -> Vec<Filter> {
    vec![
        Filter::new()
            .kind(Kind::LEGACY_DM)
            .author(*me)
            .pubkey(counterparty),
        Filter::new()
            .kind(Kind::LEGACY_DM)
            .author(*counterparty)
            .pubkey(me),
        Filter::new().kind(Kind::GIFT_WRAP).pubkey(me),
    ]
}

/// Communities `me` is related to: owned, moderated, listed, or requested.
pub fn community_discovery(me: &PublicKey) -> Vec<Filter> {
    vec![
        Filter::new().kind(Kind::COMMUNITY).author(*me),
        Filter::new().kind(Kind::COMMUNITY).pubkey(me),
        Filter::new().kind(Kind::MEMBER_LIST).pubkey(me),
        Filter::new().kind(Kind::JOIN_REQUEST).author(*me),
    ]
}

/// Definitions and member lists of `communities`.
pub fn community_metadata(communities: &[CommunityId]) -> Vec<Filter> {
    communities
        .iter()
        .flat_map(|id| {
            [
                Filter::new()
                    .kind(Kind::COMMUNITY)
                    .author(*id.owner())
                    .identifier(id.identifier()),
                Filter::new()
                    .kind(Kind::MEMBER_LIST)
                    .coordinate(&id.to_string()),
            ]
        })
        .collect()
}

/// Channel and space definitions of one community.
pub fn community_structure(id: &CommunityId) -> Vec<Filter> {
    vec![Filter::new()
        .kinds([Kind::CHANNEL, Kind::SPACE])
        .coordinate(&id.to_string())]
}

/// Messages of one channel.
pub fn channel_messages(id: &CommunityId, channel: &str) -> Filter {
    Filter::new()
        .kind(Kind::CHANNEL_MESSAGE)
        .coordinate(&id.to_string())
        .tag('h', channel)
}

/// Everything that changes a community: messages and deletions (at or after
/// `since`), definition, channels, spaces and member lists.
pub fn community_live(id: &CommunityId, since: Option<u64>, limit: Option<usize>) -> Vec<Filter> {
    let coordinate = id.to_string();
    let mut activity = Filter::new()
        .kinds([Kind::CHANNEL_MESSAGE, Kind::DELETION])
        .coordinate(&coordinate);
    if let Some(since) = since {
        activity = activity.since(since);
    }
    if let Some(limit) = limit {
        activity = activity.limit(limit);
    }

    vec![
        activity,
        Filter::new()
            .kind(Kind::COMMUNITY)
            .author(*id.owner())
            .identifier(id.identifier()),
        Filter::new()
            .kinds([Kind::CHANNEL, Kind::SPACE, Kind::MEMBER_LIST])
            .coordinate(&coordinate),
    ]
}
