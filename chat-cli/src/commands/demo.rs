//! Run the sync engine against a synthetic in-memory network.
//!
//! The network mixes both direct-message schemes and communities where the
//! local user is owner, moderator or approved member, so every load path is
//! exercised.

use anyhow::Result;
use std::sync::Arc;

use relaychat_client::{ClientConfig, MockSigner, MockTransport, Signer, SyncCoordinator};
use relaychat_core::{OpOutcome, Tier, TierProgress};
use relaychat_types::{Kind, PublicKey, RawEvent, Tag, UnsignedEvent};

/// Size of the synthetic network.
#[derive(Debug, Clone, Copy)]
pub struct NetworkShape {
    /// Direct-message counterparties.
    pub conversations: usize,
    /// Communities the local user belongs to.
    pub communities: usize,
    /// Channel messages per community.
    pub messages: usize,
}

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

/// Run the demo command.
pub async fn run(config: ClientConfig, shape: NetworkShape) -> Result<()> {
    let transport = MockTransport::new();
    let signer = Arc::new(MockSigner::random());
    let coordinator = Arc::new(SyncCoordinator::new(
        Arc::new(transport.clone()),
        Arc::clone(&signer),
        config,
    ));

    let now = coordinator.now_ms() / 1000;
    let seeded = seed(&transport, &signer, shape, now)?;

    println!("=== relaychat demo ===");
    println!();
    println!("Identity: {}", short(&signer.public_key()));
    println!("Network:  {} events", seeded);
    println!();

    coordinator.start().await;
    let progress = coordinator.initial_load().await;
    print_tiers(&progress);

    let polled = coordinator.refresh_now().await;
    println!("Background refresh polled {} communities", polled);
    println!();

    println!("Conversations:");
    for conversation in coordinator.conversations().await {
        let last = conversation
            .timeline
            .messages()
            .last()
            .map(|m| m.plaintext.as_str())
            .unwrap_or("");
        println!(
            "  {}  {:>3} msgs  {:?}  \"{}\"",
            short(&conversation.counterparty),
            conversation.timeline.len(),
            conversation.preferred_protocol(),
            last
        );
    }
    println!();

    println!("Communities:");
    for id in coordinator.ranked_communities().await {
        let Some(community) = coordinator.community(&id).await else {
            continue;
        };
        let loaded: usize = community.channel_timelines.values().map(|t| t.len()).sum();
        println!(
            "  {:<16} {:?}  {} channels, {} spaces, {} messages cached",
            community.name(),
            community.membership,
            community.channels.len(),
            community.spaces.len(),
            loaded
        );
    }
    println!();

    let status = coordinator.lru_status().await;
    println!(
        "Background list ({}/{}):",
        status.entries.len(),
        status.capacity
    );
    for entry in &status.entries {
        println!(
            "  {:<16} polls: {}  backoff: {}ms",
            entry.community_id.identifier(),
            entry.load_count,
            entry.backoff_ms
        );
    }

    coordinator.shutdown().await;
    Ok(())
}

fn print_tiers(progress: &TierProgress) {
    println!("Initial load:");
    for tier in Tier::ALL {
        let status = progress.status(tier);
        let m = status.metrics;
        println!(
            "  {}: {} events in {}ms ({} ok, {} failed, {} timed out)",
            tier.label(),
            m.event_count,
            m.elapsed_ms,
            m.succeeded,
            m.failed,
            m.timed_out
        );
        for (operation, outcome) in &status.operations {
            let shown = match outcome {
                OpOutcome::Succeeded { events } => format!("{} events", events),
                OpOutcome::Failed => "failed".to_string(),
                OpOutcome::TimedOut => "timed out".to_string(),
            };
            println!("    {}: {}", operation, shown);
        }
    }
    println!();
}

fn short(key: &PublicKey) -> String {
    key.to_hex()[..12].to_string()
}

/// Fill `transport` with conversations and communities. Returns the number
/// of events stored.
pub(crate) fn seed(
    transport: &MockTransport,
    me: &MockSigner,
    shape: NetworkShape,
    now: u64,
) -> Result<usize> {
    let mut events = Vec::new();
    let me_key = me.public_key();

    for i in 0..shape.conversations {
        let peer = MockSigner::random();
        let peer_key = peer.public_key();
        let at = now.saturating_sub(HOUR * (i as u64 + 1));
        let text = format!("hello from peer {}", i);

        if i % 2 == 0 {
            events.push(peer.legacy_dm(&me_key, &text, at)?);
            events.push(me.legacy_dm(&peer_key, "hi back", at + 60)?);
        } else {
            events.extend(peer.gift_wrap(&me_key, &text, at)?);
            events.extend(me.gift_wrap(&peer_key, "hi back", at + 60)?);
        }
    }

    for i in 0..shape.communities {
        let created_at = now.saturating_sub(DAY * (i as u64 + 1));
        events.extend(community(&me_key, i, created_at, shape.messages));
    }

    let count = events.len();
    for event in events {
        transport.insert(event);
    }
    Ok(count)
}

/// One community; the local user's role rotates through owner, moderator
/// and approved member.
fn community(me: &PublicKey, index: usize, created_at: u64, messages: usize) -> Vec<RawEvent> {
    let d = format!("community-{}", index);
    let owner = if index % 3 == 0 { *me } else { PublicKey::random() };
    let coordinate = format!("{}:{}:{}", Kind::COMMUNITY, owner, d);

    let mut definition = vec![Tag::identifier(&d), Tag::new(["name", d.as_str()])];
    if index % 3 == 1 {
        definition.push(Tag::new([
            "p".to_string(),
            me.to_hex(),
            String::new(),
            "moderator".to_string(),
        ]));
    }

    let mut events = vec![
        UnsignedEvent::new(owner, Kind::COMMUNITY, created_at, definition, "").into_raw("demo"),
        UnsignedEvent::new(
            owner,
            Kind::SPACE,
            created_at,
            vec![
                Tag::identifier("lobby"),
                Tag::coordinate(&coordinate),
                Tag::new(["name", "Lobby"]),
            ],
            "",
        )
        .into_raw("demo"),
    ];

    for (channel, is_default) in [("general", true), ("random", false)] {
        let mut tags = vec![
            Tag::identifier(channel),
            Tag::coordinate(&coordinate),
            Tag::new(["name", channel]),
            Tag::new(["space", "lobby"]),
        ];
        if is_default {
            tags.push(Tag::new(["default", "true"]));
        }
        events.push(UnsignedEvent::new(owner, Kind::CHANNEL, created_at + 1, tags, "").into_raw("demo"));
    }

    if index % 3 == 2 {
        events.push(
            UnsignedEvent::new(
                owner,
                Kind::MEMBER_LIST,
                created_at + 2,
                vec![
                    Tag::identifier(&format!("approved:{}", d)),
                    Tag::coordinate(&coordinate),
                    Tag::pubkey(me),
                ],
                "",
            )
            .into_raw("demo"),
        );
    }

    let authors = [owner, PublicKey::random(), PublicKey::random()];
    for j in 0..messages {
        let channel = if j % 2 == 0 { "general" } else { "random" };
        events.push(
            UnsignedEvent::new(
                authors[j % authors.len()],
                Kind::CHANNEL_MESSAGE,
                created_at + 60 * (j as u64 + 1),
                vec![Tag::coordinate(&coordinate), Tag::new(["h", channel])],
                format!("message {} in #{}", j, channel),
            )
            .into_raw("demo"),
        );
    }
    events
}
