//! # relaychat-core
//!
//! Pure logic for relaychat (no I/O, instant tests).
//!
//! This crate implements the reducers and schedulers of the message
//! synchronization engine without any network, disk, clock or logging:
//! - [`timeline`] / [`reconcile`] - ordered, deduplicated timelines that merge
//!   history pages, live events and optimistic sends
//! - [`conversation`] / [`community`] - per-conversation and per-community state
//! - [`store`] - the session-wide [`MessageStore`] with snapshot export
//! - [`lru`] - the background refresh priority queue
//! - [`tier`] - tiered initial-load progress
//!
//! ## Design Philosophy
//!
//! Every mutation is `old state + event -> new state + effects`. Time is
//! passed in (`now_ms`), never read. The actual I/O (queries, subscriptions,
//! decryption, timers) is performed by `relaychat-client`, which feeds events
//! in and interprets the returned effects.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod community;
pub mod conversation;
pub mod lru;
pub mod message;
pub mod reconcile;
pub mod store;
pub mod tier;
pub mod timeline;

pub use community::{
    rank_communities, ChannelDef, CommunityEffect, CommunityEvent, CommunityId, CommunityState,
    ListKind, MemberList, MembershipStatus, SpaceDef,
};
pub use conversation::{ConversationState, ProtocolSupport};
pub use lru::{BackoffPolicy, FocusChange, LruEntry, LruScheduler, LruStatus};
pub use message::{DecryptedMessage, DeliveryEvent, DeliveryStatus, Direction, Protocol};
pub use reconcile::{
    is_just_arrived, promotion_matches, ReconcileConfig, ReduceContext, TimelineEffect,
    TimelineEvent,
};
pub use store::{MessageStore, SessionSnapshot, StoreEffect, StoreEvent};
pub use tier::{OpOutcome, Tier, TierEvent, TierMetrics, TierProgress, TierStatus};
pub use timeline::{SourcePage, Timeline};
