//! UI-facing facades over the coordinator.
//!
//! [`MessagingDomain`] covers direct messages, [`CommunitiesDomain`] covers
//! communities and their channels. Both are thin: every call forwards to the
//! shared [`SyncCoordinator`] and every read returns an immutable snapshot.

use std::sync::Arc;

use relaychat_core::{
    ChannelDef, CommunityId, CommunityState, ConversationState, DecryptedMessage, LruStatus,
    SpaceDef, TierProgress,
};
use relaychat_types::{EventId, PublicKey};

use crate::coordinator::{SyncCoordinator, TimelineRef};
use crate::error::ClientError;
use crate::signer::Signer;
use crate::transport::Transport;

/// Direct messaging.
pub struct MessagingDomain<T: Transport, S: Signer> {
    coordinator: Arc<SyncCoordinator<T, S>>,
}

impl<T: Transport, S: Signer> Clone for MessagingDomain<T, S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<T: Transport, S: Signer> MessagingDomain<T, S> {
    /// Facade over `coordinator`.
    pub fn new(coordinator: Arc<SyncCoordinator<T, S>>) -> Self {
        Self { coordinator }
    }

    /// Conversations, most recently active first.
    pub async fn conversations(&self) -> Vec<Arc<ConversationState>> {
        self.coordinator.conversations().await
    }

    /// Ordered messages of one conversation (empty if unknown).
    pub async fn messages(&self, counterparty: &PublicKey) -> Vec<DecryptedMessage> {
        self.coordinator
            .conversation(counterparty)
            .await
            .map(|c| c.timeline.messages().to_vec())
            .unwrap_or_default()
    }

    /// Open a conversation in the UI.
    pub async fn open(&self, counterparty: PublicKey) {
        self.coordinator.open_conversation(counterparty).await;
    }

    /// Close a conversation in the UI.
    pub async fn close(&self, counterparty: PublicKey) {
        self.coordinator.close_conversation(counterparty).await;
    }

    /// Show a message before it is confirmed.
    pub async fn send(
        &self,
        counterparty: PublicKey,
        text: &str,
    ) -> Result<DecryptedMessage, ClientError> {
        self.coordinator.send_message(counterparty, text).await
    }

    /// Report that publishing a send failed.
    pub async fn mark_failed(
        &self,
        counterparty: PublicKey,
        id: EventId,
        reason: &str,
    ) -> Result<(), ClientError> {
        self.coordinator
            .publish_rejected(&TimelineRef::Conversation(counterparty), id, reason)
            .await
    }

    /// Re-send a failed message.
    pub async fn retry(&self, counterparty: PublicKey, id: EventId) -> Result<(), ClientError> {
        self.coordinator
            .retry(&TimelineRef::Conversation(counterparty), id)
            .await
    }

    /// Load the next page of older history.
    pub async fn load_older(&self, counterparty: PublicKey) -> Result<usize, ClientError> {
        self.coordinator
            .load_older(&TimelineRef::Conversation(counterparty))
            .await
    }
}

/// Communities and channels.
pub struct CommunitiesDomain<T: Transport, S: Signer> {
    coordinator: Arc<SyncCoordinator<T, S>>,
}

impl<T: Transport, S: Signer> Clone for CommunitiesDomain<T, S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<T: Transport, S: Signer> CommunitiesDomain<T, S> {
    /// Facade over `coordinator`.
    pub fn new(coordinator: Arc<SyncCoordinator<T, S>>) -> Self {
        Self { coordinator }
    }

    /// Joined communities by role, then activity.
    pub async fn joined(&self) -> Vec<Arc<CommunityState>> {
        let mut out = Vec::new();
        for id in self.coordinator.ranked_communities().await {
            if let Some(community) = self.coordinator.community(&id).await {
                out.push(community);
            }
        }
        out
    }

    /// One community.
    pub async fn community(&self, id: &CommunityId) -> Option<Arc<CommunityState>> {
        self.coordinator.community(id).await
    }

    /// Channels of a community, default first, then by name.
    pub async fn channels(&self, id: &CommunityId) -> Vec<ChannelDef> {
        let Some(community) = self.coordinator.community(id).await else {
            return Vec::new();
        };
        let mut channels: Vec<ChannelDef> = community.channels.values().cloned().collect();
        let default = community.default_channel().map(|c| c.id.clone());
        channels.sort_by(|a, b| {
            let a_default = Some(&a.id) == default.as_ref();
            let b_default = Some(&b.id) == default.as_ref();
            b_default.cmp(&a_default).then_with(|| a.name.cmp(&b.name))
        });
        channels
    }

    /// Spaces of a community.
    pub async fn spaces(&self, id: &CommunityId) -> Vec<SpaceDef> {
        self.coordinator
            .community(id)
            .await
            .map(|c| c.spaces.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Ordered messages of one channel (empty if none loaded).
    pub async fn messages(&self, id: &CommunityId, channel: &str) -> Vec<DecryptedMessage> {
        self.coordinator
            .community(id)
            .await
            .and_then(|c| c.channel_timeline(channel).map(|t| t.messages().to_vec()))
            .unwrap_or_default()
    }

    /// Focus a community.
    pub async fn focus(&self, id: &CommunityId) -> Result<(), ClientError> {
        self.coordinator.focus_community(id).await
    }

    /// Drop focus.
    pub async fn unfocus(&self) {
        self.coordinator.unfocus_community().await;
    }

    /// Show a channel message before it is confirmed.
    pub async fn send(
        &self,
        id: &CommunityId,
        channel: &str,
        text: &str,
    ) -> Result<DecryptedMessage, ClientError> {
        self.coordinator.send_channel_message(id, channel, text).await
    }

    /// Load the next page of a channel's history.
    pub async fn load_older(&self, id: &CommunityId, channel: &str) -> Result<usize, ClientError> {
        self.coordinator
            .load_older(&TimelineRef::Channel {
                community: id.clone(),
                channel: channel.to_string(),
            })
            .await
    }

    /// Force a background poll pass.
    pub fn refresh(&self) {
        self.coordinator.trigger_refresh();
    }

    /// Background list contents.
    pub async fn background_status(&self) -> LruStatus {
        self.coordinator.lru_status().await
    }

    /// Initial load progress.
    pub async fn load_progress(&self) -> TierProgress {
        self.coordinator.tier_progress().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::signer::MockSigner;
    use crate::transport::MockTransport;
    use relaychat_types::{Kind, Tag, UnsignedEvent};

    fn me() -> PublicKey {
        PublicKey::from_bytes([0xA1; 32])
    }

    fn coordinator(transport: &MockTransport) -> Arc<SyncCoordinator<MockTransport, MockSigner>> {
        Arc::new(SyncCoordinator::new(
            Arc::new(transport.clone()),
            Arc::new(MockSigner::new(me())),
            ClientConfig::default(),
        ))
    }

    #[tokio::test]
    async fn messaging_send_and_read() {
        let transport = MockTransport::new();
        let messaging = MessagingDomain::new(coordinator(&transport));
        let bob = PublicKey::from_bytes([0xB0; 32]);

        messaging.send(bob, "hi").await.unwrap();
        let messages = messaging.messages(&bob).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].plaintext, "hi");
        assert_eq!(messaging.conversations().await.len(), 1);
    }

    #[tokio::test]
    async fn channels_default_first() {
        let transport = MockTransport::new();
        let id = CommunityId::new(me(), "rust");
        let coordinate = id.to_string();
        transport.insert(
            UnsignedEvent::new(me(), Kind::COMMUNITY, 1, vec![Tag::identifier("rust")], "")
                .into_raw("sig"),
        );
        for (d, created_at, default) in [("alpha", 2, false), ("zulu", 3, true)] {
            let mut tags = vec![Tag::identifier(d), Tag::coordinate(&coordinate)];
            if default {
                tags.push(Tag::new(["default", "true"]));
            }
            transport.insert(UnsignedEvent::new(me(), Kind::CHANNEL, created_at, tags, "").into_raw("sig"));
        }

        let coordinator = coordinator(&transport);
        coordinator.initial_load().await;
        let communities = CommunitiesDomain::new(coordinator);

        let channels = communities.channels(&id).await;
        let names: Vec<_> = channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(names, vec!["zulu", "alpha"]);
        assert_eq!(communities.joined().await.len(), 1);
        assert!(communities.load_progress().await.all_complete());
    }
}
