//! Tiered initial load.
//!
//! Three sequential tiers, each operation under its own hard timeout:
//!
//! | Tier | Operation | Fetches |
//! |------|-----------|---------|
//! | 1 (critical) | 1A | most recent direct messages, both directions |
//! | 1 (critical) | 1B | discovery + metadata of the top communities |
//! | 2 (high) | 2A.. | channels and spaces of the top communities, in parallel |
//! | 3 (medium) | 3A | recent messages of the top community's default channel |
//!
//! Operations are independent: a failure or timeout is recorded in the
//! tier's metrics and nothing else waits on it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use relaychat_core::{
    CommunityEvent, CommunityId, DecryptedMessage, OpOutcome, SourcePage, StoreEvent, Tier,
    TierEvent, TierProgress, TimelineEvent,
};
use relaychat_types::Kind;
use tokio_util::sync::CancellationToken;

use crate::coordinator::Shared;
use crate::filters;
use crate::signer::Signer;
use crate::transport::{Transport, TransportError};

/// Runs the tiered initial load against a session.
pub struct TieredLoader<T: Transport, S: Signer> {
    shared: Arc<Shared<T, S>>,
}

impl<T: Transport, S: Signer> TieredLoader<T, S> {
    pub(crate) fn new(shared: Arc<Shared<T, S>>) -> Self {
        Self { shared }
    }

    /// Run every tier, then register joined communities for background
    /// refresh. Returns the final progress.
    pub async fn run(&self) -> TierProgress {
        self.shared.record_tier(TierEvent::Reset).await;

        self.tier1().await;
        self.tier2().await;
        self.tier3().await;

        let tracked = self.register_background().await;
        tracing::info!("Initial load done, {} communities in background refresh", tracked);

        self.shared.state.lock().await.tiers.clone()
    }

    async fn tier1(&self) {
        let started = self.begin(Tier::Critical).await;
        let timeout = self.shared.config.loader.tier1_timeout();

        tokio::join!(
            self.op(Tier::Critical, "1A", timeout, |cancel| self
                .load_direct_messages(cancel)),
            self.op(Tier::Critical, "1B", timeout, |cancel| self
                .load_communities(cancel)),
        );

        self.finish(Tier::Critical, started).await;
    }

    async fn tier2(&self) {
        let started = self.begin(Tier::High).await;
        let timeout = self.shared.config.loader.tier2_timeout();
        let top = self.top_communities(self.shared.config.loader.tier2_communities).await;

        let ops = top.iter().enumerate().map(|(i, id)| {
            let name = format!("2{}", operation_letter(i));
            async move {
                self.op(Tier::High, &name, timeout, |cancel| {
                    self.load_structure(id, cancel)
                })
                .await
            }
        });
        join_all(ops).await;

        self.finish(Tier::High, started).await;
    }

    async fn tier3(&self) {
        let started = self.begin(Tier::Medium).await;
        let timeout = self.shared.config.loader.tier3_timeout();

        if let Some(top) = self.top_communities(1).await.into_iter().next() {
            self.op(Tier::Medium, "3A", timeout, |cancel| {
                self.load_default_channel(&top, cancel)
            })
            .await;
        }

        self.finish(Tier::Medium, started).await;
    }

    async fn begin(&self, tier: Tier) -> tokio::time::Instant {
        self.shared.record_tier(TierEvent::Started(tier)).await;
        tokio::time::Instant::now()
    }

    async fn finish(&self, tier: Tier, started: tokio::time::Instant) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.shared
            .record_tier(TierEvent::Completed { tier, elapsed_ms })
            .await;
        tracing::info!("Tier {} complete in {}ms", tier.label(), elapsed_ms);
    }

    /// Run one operation under `timeout` and record its outcome.
    async fn op<F, Fut>(&self, tier: Tier, name: &str, timeout: Duration, f: F) -> OpOutcome
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<usize, TransportError>>,
    {
        let cancel = self.shared.shutdown.child_token();
        let outcome = match tokio::time::timeout(timeout, f(cancel.clone())).await {
            Ok(Ok(events)) => OpOutcome::Succeeded { events },
            Ok(Err(e)) => {
                tracing::warn!("Operation {} failed: {}", name, e);
                OpOutcome::Failed
            }
            Err(_) => {
                cancel.cancel();
                tracing::warn!("Operation {} timed out after {:?}", name, timeout);
                OpOutcome::TimedOut
            }
        };
        self.shared
            .record_tier(TierEvent::OperationFinished {
                tier,
                operation: name.to_string(),
                outcome,
            })
            .await;
        outcome
    }

    async fn top_communities(&self, n: usize) -> Vec<CommunityId> {
        let state = self.shared.state.lock().await;
        state.store.ranked_communities().into_iter().take(n).collect()
    }

    /// 1A: newest direct messages, both directions, one query.
    async fn load_direct_messages(&self, cancel: CancellationToken) -> Result<usize, TransportError> {
        let me = self.shared.me();
        let limit = self.shared.config.loader.dm_limit;

        let mut events = self
            .shared
            .transport
            .query(&filters::direct_messages(&me, Some(limit)), &cancel)
            .await?;
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit);

        self.shared.ingest_direct(&events).await;
        Ok(events.len())
    }

    /// 1B: discover communities, rank them, fetch metadata for the top ones.
    async fn load_communities(&self, cancel: CancellationToken) -> Result<usize, TransportError> {
        let me = self.shared.me();

        let discovered = self
            .shared
            .transport
            .query(&filters::community_discovery(&me), &cancel)
            .await?;
        let mut count = discovered.len();
        self.shared.ingest_community(discovered).await;

        let top = self
            .top_communities(self.shared.config.loader.top_communities)
            .await;
        if top.is_empty() {
            return Ok(count);
        }

        let metadata = self
            .shared
            .transport
            .query(&filters::community_metadata(&top), &cancel)
            .await?;
        count += metadata.len();
        self.shared.ingest_community(metadata).await;
        Ok(count)
    }

    /// 2x: channel and space definitions of one community.
    async fn load_structure(
        &self,
        id: &CommunityId,
        cancel: CancellationToken,
    ) -> Result<usize, TransportError> {
        let events = self
            .shared
            .transport
            .query(&filters::community_structure(id), &cancel)
            .await?;
        let count = events.len();
        self.shared.ingest_community(events).await;
        Ok(count)
    }

    /// 3A: first page of the default channel.
    async fn load_default_channel(
        &self,
        id: &CommunityId,
        cancel: CancellationToken,
    ) -> Result<usize, TransportError> {
        let channel = {
            let state = self.shared.state.lock().await;
            state
                .store
                .community(id)
                .and_then(|c| c.default_channel().map(|ch| ch.id.clone()))
        };
        let Some(channel) = channel else {
            tracing::debug!("Community {} has no channels yet", id);
            return Ok(0);
        };

        let page_size = self.shared.config.loader.tier3_messages;
        let events = self
            .shared
            .transport
            .query(
                &[filters::channel_messages(id, &channel).limit(page_size)],
                &cancel,
            )
            .await?;
        let source = SourcePage::of(&events);

        let me = self.shared.me();
        let now = self.shared.now_ms();
        let messages = events
            .into_iter()
            .filter(|e| e.kind == Kind::CHANNEL_MESSAGE)
            .map(|e| DecryptedMessage::plain(e, &me, now))
            .collect();
        self.shared
            .apply(vec![StoreEvent::Community {
                id: id.clone(),
                event: CommunityEvent::ChannelTimeline {
                    channel,
                    event: TimelineEvent::OlderPage {
                        messages,
                        sources: vec![source],
                        page_size,
                    },
                },
            }])
            .await;
        Ok(source.fetched)
    }

    /// Every joined community except the focused one enters the
    /// background list.
    async fn register_background(&self) -> usize {
        let ctx = self.shared.ctx();
        let (effects, tracked) = {
            let mut state = self.shared.state.lock().await;
            let joined: Vec<CommunityId> = state
                .store
                .communities()
                .iter()
                .filter(|c| c.membership.is_joined())
                .map(|c| c.id.clone())
                .collect();
            let effects: Vec<_> = joined
                .into_iter()
                .flat_map(|id| state.track(id, &ctx))
                .collect();
            (effects, state.lru.len())
        };
        self.shared.announce(&effects);
        tracked
    }
}

fn operation_letter(index: usize) -> char {
    (b'A' + (index % 26) as u8) as char
}
