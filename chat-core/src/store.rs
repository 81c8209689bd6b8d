//! The message store: canonical state for every conversation and community.
//!
//! State is held behind `Arc`s so readers get cheap immutable snapshots.
//! Mutation goes through [`MessageStore::apply`], which takes the old store
//! and returns the new one; only the touched conversation or community is
//! copied (and only if a reader still holds the old `Arc`).

use relaychat_types::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::community::{rank_communities, CommunityEffect, CommunityEvent, CommunityId, CommunityState};
use crate::conversation::ConversationState;
use crate::reconcile::{ReduceContext, TimelineEffect, TimelineEvent};

/// A mutation of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Something happened in a direct-message conversation.
    Conversation {
        /// The other participant.
        counterparty: PublicKey,
        /// What happened.
        event: TimelineEvent,
    },
    /// Something happened in a community.
    Community {
        /// Community coordinate.
        id: CommunityId,
        /// What happened.
        event: CommunityEvent,
    },
    /// Fail stale optimistic entries everywhere.
    ExpireOptimistic,
    /// Drop a community's cached channel messages.
    Evict(CommunityId),
    /// Clear everything (logout).
    Reset,
}

/// Observable outcome of a [`StoreEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEffect {
    /// A conversation timeline changed.
    Conversation {
        /// The other participant.
        counterparty: PublicKey,
        /// What changed.
        effect: TimelineEffect,
    },
    /// A community changed.
    Community {
        /// Community coordinate.
        id: CommunityId,
        /// What changed.
        effect: CommunityEffect,
    },
    /// A community's messages were dropped.
    Evicted(CommunityId),
    /// The store was cleared.
    Reset,
}

/// Serializable export of a session's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Local user.
    pub me: PublicKey,
    /// Every conversation.
    pub conversations: Vec<ConversationState>,
    /// Every community.
    pub communities: Vec<CommunityState>,
}

/// Canonical per-session state.
#[derive(Debug, Clone)]
pub struct MessageStore {
    me: PublicKey,
    conversations: BTreeMap<PublicKey, Arc<ConversationState>>,
    communities: BTreeMap<CommunityId, Arc<CommunityState>>,
}

impl MessageStore {
    /// Empty store for the local user `me`.
    pub fn new(me: PublicKey) -> Self {
        Self {
            me,
            conversations: BTreeMap::new(),
            communities: BTreeMap::new(),
        }
    }

    /// Rebuild a store from an exported snapshot.
    pub fn hydrate(snapshot: SessionSnapshot) -> Self {
        let conversations = snapshot
            .conversations
            .into_iter()
            .map(|mut c| {
                c.timeline.rebuild_index();
                (c.counterparty, Arc::new(c))
            })
            .collect();
        let communities = snapshot
            .communities
            .into_iter()
            .map(|mut c| {
                c.rebuild_indexes();
                (c.id.clone(), Arc::new(c))
            })
            .collect();
        Self {
            me: snapshot.me,
            conversations,
            communities,
        }
    }

    /// Export everything.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            me: self.me,
            conversations: self.conversations.values().map(|c| (**c).clone()).collect(),
            communities: self.communities.values().map(|c| (**c).clone()).collect(),
        }
    }

    /// The local user.
    pub fn me(&self) -> &PublicKey {
        &self.me
    }

    /// One conversation.
    pub fn conversation(&self, counterparty: &PublicKey) -> Option<Arc<ConversationState>> {
        self.conversations.get(counterparty).cloned()
    }

    /// Every conversation, most recently active first.
    pub fn conversations_by_activity(&self) -> Vec<Arc<ConversationState>> {
        let mut list: Vec<_> = self.conversations.values().cloned().collect();
        list.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        list
    }

    /// Newest confirmed direct message across all conversations.
    pub fn newest_direct_message_at(&self) -> Option<u64> {
        self.conversations
            .values()
            .filter_map(|c| c.timeline.newest_confirmed_at())
            .max()
    }

    /// One community.
    pub fn community(&self, id: &CommunityId) -> Option<Arc<CommunityState>> {
        self.communities.get(id).cloned()
    }

    /// Every known community.
    pub fn communities(&self) -> Vec<Arc<CommunityState>> {
        self.communities.values().cloned().collect()
    }

    /// Joined communities ranked by role, then activity.
    pub fn ranked_communities(&self) -> Vec<CommunityId> {
        rank_communities(self.communities.values().map(|c| c.as_ref()))
    }

    /// Apply a mutation. Pure.
    pub fn apply(self, event: StoreEvent, ctx: &ReduceContext) -> (Self, Vec<StoreEffect>) {
        let mut store = self;
        let mut effects = Vec::new();

        match event {
            StoreEvent::Conversation {
                counterparty,
                event,
            } => {
                let effs = store.apply_conversation(counterparty, event, ctx);
                effects.extend(effs.into_iter().map(|effect| StoreEffect::Conversation {
                    counterparty,
                    effect,
                }));
            }
            StoreEvent::Community { id, event } => {
                let effs = store.apply_community(&id, event, ctx);
                effects.extend(effs.into_iter().map(|effect| StoreEffect::Community {
                    id: id.clone(),
                    effect,
                }));
            }
            StoreEvent::ExpireOptimistic => {
                let counterparties: Vec<_> = store.conversations.keys().copied().collect();
                for counterparty in counterparties {
                    let effs =
                        store.apply_conversation(counterparty, TimelineEvent::ExpireOptimistic, ctx);
                    effects.extend(effs.into_iter().map(|effect| StoreEffect::Conversation {
                        counterparty,
                        effect,
                    }));
                }
                let channels: Vec<_> = store
                    .communities
                    .values()
                    .flat_map(|c| {
                        c.channel_timelines
                            .keys()
                            .map(|channel| (c.id.clone(), channel.clone()))
                            .collect::<Vec<_>>()
                    })
                    .collect();
                for (id, channel) in channels {
                    let event = CommunityEvent::ChannelTimeline {
                        channel,
                        event: TimelineEvent::ExpireOptimistic,
                    };
                    let effs = store.apply_community(&id, event, ctx);
                    effects.extend(effs.into_iter().map(|effect| StoreEffect::Community {
                        id: id.clone(),
                        effect,
                    }));
                }
            }
            StoreEvent::Evict(id) => {
                if let Some(community) = store.communities.get_mut(&id) {
                    Arc::make_mut(community).clear_messages();
                    effects.push(StoreEffect::Evicted(id));
                }
            }
            StoreEvent::Reset => {
                store.conversations.clear();
                store.communities.clear();
                effects.push(StoreEffect::Reset);
            }
        }

        (store, effects)
    }

    fn apply_conversation(
        &mut self,
        counterparty: PublicKey,
        event: TimelineEvent,
        ctx: &ReduceContext,
    ) -> Vec<TimelineEffect> {
        let state = self
            .conversations
            .remove(&counterparty)
            .map(Arc::unwrap_or_clone)
            .unwrap_or_else(|| ConversationState::new(counterparty));
        let (state, effects) = state.apply(event, ctx);
        self.conversations.insert(counterparty, Arc::new(state));
        effects
    }

    fn apply_community(
        &mut self,
        id: &CommunityId,
        event: CommunityEvent,
        ctx: &ReduceContext,
    ) -> Vec<CommunityEffect> {
        let state = self
            .communities
            .remove(id)
            .map(Arc::unwrap_or_clone)
            .unwrap_or_else(|| CommunityState::new(id.clone(), &self.me));
        let (state, effects) = state.apply(event, &self.me, ctx);
        self.communities.insert(id.clone(), Arc::new(state));
        effects
    }
}
