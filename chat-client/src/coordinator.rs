//! SyncCoordinator - owns the session and runs all I/O.
//!
//! The coordinator holds the message store, the LRU background list and the
//! tiered-load progress behind one async mutex. Every mutation is a pure
//! reducer from `relaychat-core` applied under that lock; the lock is never
//! held across a network await or a decryption.
//!
//! ```text
//! Transport ──> SubscriptionManager ──> ingestion task ─┐
//!     │                                                 ├─> SessionState (lock)
//!     └──> TieredLoader / BackgroundRefresher ──────────┘        │
//!                                                        effects (broadcast)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let coordinator = Arc::new(SyncCoordinator::new(transport, signer, ClientConfig::default()));
//! coordinator.start().await;
//! let progress = coordinator.initial_load().await;
//! ```

use std::sync::{Arc, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use relaychat_core::{
    CommunityEvent, CommunityId, CommunityState, ConversationState, DecryptedMessage,
    LruScheduler, LruStatus, MessageStore, Protocol, ReduceContext, SessionSnapshot, SourcePage,
    StoreEffect, StoreEvent, TierEvent, TierProgress, Timeline, TimelineEffect, TimelineEvent,
};
use relaychat_types::{EventId, Filter, Kind, PublicKey, RawEvent, Tag};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::decrypt::DecryptionPipeline;
use crate::error::ClientError;
use crate::filters;
use crate::loader::TieredLoader;
use crate::refresher::BackgroundRefresher;
use crate::signer::Signer;
use crate::subscription::{Delivery, SubscriptionManager, SubscriptionScope};
use crate::transport::{Transport, TransportError};

/// Capacity of the effect broadcast channel.
const EFFECT_CHANNEL_CAPACITY: usize = 1024;

/// A message list: a direct conversation or a community channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimelineRef {
    /// Direct conversation with a counterparty.
    Conversation(PublicKey),
    /// Channel inside a community.
    Channel {
        /// Community coordinate.
        community: CommunityId,
        /// Channel `d` identifier.
        channel: String,
    },
}

impl TimelineRef {
    fn store_event(&self, event: TimelineEvent) -> StoreEvent {
        match self {
            Self::Conversation(counterparty) => StoreEvent::Conversation {
                counterparty: *counterparty,
                event,
            },
            Self::Channel { community, channel } => StoreEvent::Community {
                id: community.clone(),
                event: CommunityEvent::ChannelTimeline {
                    channel: channel.clone(),
                    event,
                },
            },
        }
    }

    /// Whether `effect` concerns this timeline.
    fn owns(&self, effect: &StoreEffect) -> Option<TimelineEffect> {
        match (self, effect) {
            (
                Self::Conversation(counterparty),
                StoreEffect::Conversation {
                    counterparty: other,
                    effect,
                },
            ) if counterparty == other => Some(effect.clone()),
            (
                Self::Channel { community, channel },
                StoreEffect::Community {
                    id,
                    effect: relaychat_core::CommunityEffect::Channel { channel: other, effect },
                },
            ) if community == id && channel == other => Some(effect.clone()),
            _ => None,
        }
    }
}

/// Session clock: wall time at start plus monotonic (tokio) elapsed time,
/// so timers and timestamps agree even when tokio time is paused.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionClock {
    wall_origin_ms: u64,
    origin: tokio::time::Instant,
}

impl SessionClock {
    fn start() -> Self {
        let wall_origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            wall_origin_ms,
            origin: tokio::time::Instant::now(),
        }
    }

    /// Unix milliseconds.
    pub(crate) fn now_ms(&self) -> u64 {
        self.wall_origin_ms + self.origin.elapsed().as_millis() as u64
    }
}

/// Everything the coordinator guards with one lock.
pub(crate) struct SessionState {
    pub(crate) store: MessageStore,
    pub(crate) lru: LruScheduler,
    pub(crate) tiers: TierProgress,
}

impl SessionState {
    /// Apply one store event in place.
    pub(crate) fn reduce(&mut self, event: StoreEvent, ctx: &ReduceContext) -> Vec<StoreEffect> {
        let me = *self.store.me();
        let store = std::mem::replace(&mut self.store, MessageStore::new(me));
        let (store, effects) = store.apply(event, ctx);
        self.store = store;
        effects
    }

    /// Register with the background list; an eviction drops that
    /// community's cached messages.
    pub(crate) fn track(
        &mut self,
        id: CommunityId,
        ctx: &ReduceContext,
    ) -> Vec<StoreEffect> {
        match self.lru.insert(id, ctx.now_ms) {
            Some(evicted) => self.reduce(StoreEvent::Evict(evicted), ctx),
            None => Vec::new(),
        }
    }
}

/// State and collaborators shared by the coordinator's tasks.
pub(crate) struct Shared<T: Transport, S: Signer> {
    pub(crate) transport: Arc<T>,
    pub(crate) pipeline: DecryptionPipeline<S>,
    pub(crate) subscriptions: SubscriptionManager<T>,
    pub(crate) config: ClientConfig,
    pub(crate) clock: SessionClock,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) shutdown: CancellationToken,
    effects: broadcast::Sender<StoreEffect>,
}

impl<T: Transport, S: Signer> Shared<T, S> {
    pub(crate) fn me(&self) -> PublicKey {
        self.pipeline.me()
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub(crate) fn ctx(&self) -> ReduceContext {
        ReduceContext {
            now_ms: self.now_ms(),
            config: self.config.reconcile_config(),
        }
    }

    /// Query with a hard timeout and a child cancellation token.
    pub(crate) async fn query(
        &self,
        filters: &[Filter],
        timeout: Duration,
    ) -> Result<Vec<RawEvent>, TransportError> {
        let cancel = self.shutdown.child_token();
        match tokio::time::timeout(timeout, self.transport.query(filters, &cancel)).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(TransportError::Timeout)
            }
        }
    }

    /// Apply store events under the lock and publish their effects.
    pub(crate) async fn apply(&self, events: Vec<StoreEvent>) -> Vec<StoreEffect> {
        if events.is_empty() {
            return Vec::new();
        }
        let ctx = self.ctx();
        let mut state = self.state.lock().await;
        let effects: Vec<StoreEffect> = events
            .into_iter()
            .flat_map(|event| state.reduce(event, &ctx))
            .collect();
        drop(state);
        self.announce(&effects);
        effects
    }

    pub(crate) fn announce(&self, effects: &[StoreEffect]) {
        for effect in effects {
            match effect {
                StoreEffect::Conversation {
                    effect: TimelineEffect::Duplicate { id },
                    ..
                } => tracing::debug!("Ignoring duplicate {}", id),
                other => tracing::debug!("Store effect: {:?}", other),
            }
            // No receivers is fine.
            let _ = self.effects.send(effect.clone());
        }
    }

    pub(crate) async fn record_tier(&self, event: TierEvent) {
        let mut state = self.state.lock().await;
        state.tiers = std::mem::take(&mut state.tiers).apply(event);
    }

    /// Decrypt direct messages and store them as live arrivals.
    pub(crate) async fn ingest_direct(&self, events: &[RawEvent]) -> Vec<StoreEffect> {
        let now = self.now_ms();
        let mut store_events = Vec::with_capacity(events.len());
        for event in events {
            if event.kind == Kind::DELETION {
                store_events.extend(self.direct_deletion(event));
            } else if let Some((counterparty, message)) = self.pipeline.decrypt(event, now).await {
                store_events.push(StoreEvent::Conversation {
                    counterparty,
                    event: TimelineEvent::Live(message),
                });
            }
        }
        self.apply(store_events).await
    }

    fn direct_deletion(&self, event: &RawEvent) -> Option<StoreEvent> {
        let me = self.me();
        let counterparty = if event.pubkey == me {
            event.first_pubkey_tag()?
        } else {
            event.pubkey
        };
        Some(StoreEvent::Conversation {
            counterparty,
            event: TimelineEvent::Deletion(event.clone()),
        })
    }

    /// Route community events to their community.
    ///
    /// Definitions go first so moderator-authored lists and channels in the
    /// same batch are checked against the newest moderator set.
    pub(crate) fn classify_community(&self, mut events: Vec<RawEvent>) -> Vec<StoreEvent> {
        let me = self.me();
        let now = self.now_ms();
        events.sort_by_key(|e| (e.kind != Kind::COMMUNITY, e.created_at));
        events
            .into_iter()
            .filter_map(|event| {
                let id = event.id;
                let classified = CommunityEvent::classify(event, &me, now);
                if classified.is_none() {
                    tracing::debug!("Ignoring unroutable community event {}", id);
                }
                classified
            })
            .map(|(id, event)| StoreEvent::Community { id, event })
            .collect()
    }

    pub(crate) async fn ingest_community(&self, events: Vec<RawEvent>) -> Vec<StoreEffect> {
        let store_events = self.classify_community(events);
        self.apply(store_events).await
    }

    async fn ingest_delivery(&self, delivery: Delivery) {
        let store_events = match &delivery.scope {
            SubscriptionScope::DirectMessages | SubscriptionScope::Conversation(_) => {
                let event = &delivery.event;
                if event.kind == Kind::DELETION {
                    self.direct_deletion(event).into_iter().collect()
                } else {
                    match self.pipeline.decrypt(event, self.now_ms()).await {
                        Some((counterparty, message)) => vec![StoreEvent::Conversation {
                            counterparty,
                            event: TimelineEvent::Live(message),
                        }],
                        None => return,
                    }
                }
            }
            SubscriptionScope::Community(_) => self.classify_community(vec![delivery.event]),
        };
        if store_events.is_empty() {
            return;
        }

        let ctx = self.ctx();
        let mut state = self.state.lock().await;
        // Checked under the lock: closing a scope also takes it.
        if !self
            .subscriptions
            .is_current(&delivery.scope, delivery.generation)
        {
            tracing::debug!(
                "Discarding event from retired subscription {:?} (generation {})",
                delivery.scope,
                delivery.generation
            );
            return;
        }
        let effects: Vec<StoreEffect> = store_events
            .into_iter()
            .flat_map(|event| state.reduce(event, &ctx))
            .collect();
        drop(state);
        self.announce(&effects);
    }
}

async fn run_ingestion<T: Transport, S: Signer>(
    shared: Arc<Shared<T, S>>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
) {
    tracing::info!("Ingestion task started");
    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            delivery = deliveries.recv() => match delivery {
                Some(delivery) => shared.ingest_delivery(delivery).await,
                None => break,
            },
        }
    }
    tracing::info!("Ingestion task stopped");
}

fn lookup<R>(
    store: &MessageStore,
    target: &TimelineRef,
    f: impl FnOnce(&Timeline) -> R,
) -> Result<R, ClientError> {
    match target {
        TimelineRef::Conversation(counterparty) => store
            .conversation(counterparty)
            .map(|c| f(&c.timeline))
            .ok_or(ClientError::UnknownConversation(*counterparty)),
        TimelineRef::Channel { community, channel } => {
            let state = store
                .community(community)
                .ok_or_else(|| ClientError::UnknownCommunity(community.clone()))?;
            match state.channel_timeline(channel) {
                Some(timeline) => Ok(f(timeline)),
                None if state.channels.contains_key(channel) => Ok(f(&Timeline::new())),
                None => Err(ClientError::UnknownChannel(
                    community.clone(),
                    channel.clone(),
                )),
            }
        }
    }
}

/// The session coordinator.
///
/// Constructed explicitly by the composition root and shared by `Arc`.
pub struct SyncCoordinator<T: Transport, S: Signer> {
    shared: Arc<Shared<T, S>>,
    refresher: BackgroundRefresher<T, S>,
    deliveries: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport, S: Signer> SyncCoordinator<T, S> {
    /// Create a coordinator. Nothing runs until [`start`](Self::start).
    pub fn new(transport: Arc<T>, signer: Arc<S>, config: ClientConfig) -> Self {
        let me = signer.public_key();
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let (effects, _) = broadcast::channel(EFFECT_CHANNEL_CAPACITY);

        let state = SessionState {
            store: MessageStore::new(me),
            lru: LruScheduler::new(config.background.max_tracked, config.backoff_policy()),
            tiers: TierProgress::new(),
        };
        let shared = Arc::new(Shared {
            subscriptions: SubscriptionManager::new(Arc::clone(&transport), delivery_tx),
            transport,
            pipeline: DecryptionPipeline::new(signer),
            config,
            clock: SessionClock::start(),
            state: Mutex::new(state),
            shutdown: CancellationToken::new(),
            effects,
        });

        Self {
            refresher: BackgroundRefresher::new(Arc::clone(&shared)),
            shared,
            deliveries: std::sync::Mutex::new(Some(delivery_rx)),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// The local user.
    pub fn me(&self) -> PublicKey {
        self.shared.me()
    }

    /// Effective configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Current session time, unix milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.shared.now_ms()
    }

    /// Spawn the ingestion and background-refresh tasks and open the
    /// direct-message subscription. Calling it again only reopens the
    /// subscription.
    pub async fn start(&self) {
        let receiver = self
            .deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(receiver) = receiver {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.push(tokio::spawn(run_ingestion(
                Arc::clone(&self.shared),
                receiver,
            )));
            tasks.push(self.refresher.clone().spawn());
        }
        self.subscribe_direct_messages().await;
    }

    /// Run the three-tier initial load and return the resulting progress.
    pub async fn initial_load(&self) -> TierProgress {
        TieredLoader::new(Arc::clone(&self.shared)).run().await
    }

    /// (Re)open the direct-message inbox subscription, resuming after the
    /// newest message already held.
    pub async fn subscribe_direct_messages(&self) -> bool {
        let me = self.me();
        let since = self.shared.state.lock().await.store.newest_direct_message_at();
        let mut filters = filters::direct_messages(&me, None);
        filters.extend(filters::direct_deletions(&me));
        self.shared
            .subscriptions
            .start(SubscriptionScope::DirectMessages, filters, since)
            .await
            .is_some()
    }

    /// Open `counterparty`'s conversation: subscribe to it (closing any other
    /// open conversation) and create it if new.
    pub async fn open_conversation(&self, counterparty: PublicKey) {
        let since = {
            let state = self.shared.state.lock().await;
            for scope in self.shared.subscriptions.active_scopes() {
                if matches!(&scope, SubscriptionScope::Conversation(other) if *other != counterparty)
                {
                    self.shared.subscriptions.close_scope(&scope);
                }
            }
            state
                .store
                .conversation(&counterparty)
                .and_then(|c| c.timeline.newest_confirmed_at())
        };

        let filters = filters::conversation_live(&self.me(), &counterparty);
        self.shared
            .subscriptions
            .start(SubscriptionScope::Conversation(counterparty), filters, since)
            .await;
    }

    /// Close `counterparty`'s conversation subscription.
    pub async fn close_conversation(&self, counterparty: PublicKey) {
        let _state = self.shared.state.lock().await;
        self.shared
            .subscriptions
            .close_scope(&SubscriptionScope::Conversation(counterparty));
    }

    /// Focus a community: it leaves the background list, the previously
    /// focused one re-enters it, and a live subscription is opened.
    pub async fn focus_community(&self, id: &CommunityId) -> Result<(), ClientError> {
        let ctx = self.shared.ctx();
        let (effects, since) = {
            let mut state = self.shared.state.lock().await;
            let Some(community) = state.store.community(id) else {
                return Err(ClientError::UnknownCommunity(id.clone()));
            };
            let since = community
                .channel_timelines
                .values()
                .filter_map(Timeline::newest_confirmed_at)
                .max();

            let change = state.lru.focus(id.clone(), ctx.now_ms);
            if let Some(previous) = &change.previous {
                self.shared
                    .subscriptions
                    .close_scope(&SubscriptionScope::Community(previous.clone()));
            }
            let effects = match change.evicted {
                Some(evicted) => state.reduce(StoreEvent::Evict(evicted), &ctx),
                None => Vec::new(),
            };
            (effects, since)
        };
        self.shared.announce(&effects);

        tracing::info!("Focused community {}", id);
        self.shared
            .subscriptions
            .start(
                SubscriptionScope::Community(id.clone()),
                filters::community_live(id, since, None),
                None,
            )
            .await;
        Ok(())
    }

    /// Drop focus; the community re-enters the background list at the
    /// most-recently-used position.
    pub async fn unfocus_community(&self) {
        let ctx = self.shared.ctx();
        let effects = {
            let mut state = self.shared.state.lock().await;
            let change = state.lru.unfocus(ctx.now_ms);
            if let Some(previous) = &change.previous {
                self.shared
                    .subscriptions
                    .close_scope(&SubscriptionScope::Community(previous.clone()));
            }
            match change.evicted {
                Some(evicted) => state.reduce(StoreEvent::Evict(evicted), &ctx),
                None => Vec::new(),
            }
        };
        self.shared.announce(&effects);
    }

    /// Show a direct message before the network confirms it.
    ///
    /// The message uses the conversation's preferred scheme. The caller
    /// publishes it and reports a rejection with
    /// [`publish_rejected`](Self::publish_rejected).
    pub async fn send_message(
        &self,
        counterparty: PublicKey,
        text: &str,
    ) -> Result<DecryptedMessage, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let protocol = {
            let state = self.shared.state.lock().await;
            state
                .store
                .conversation(&counterparty)
                .map_or(Protocol::Sealed, |c| c.preferred_protocol())
        };
        let now = self.now_ms();
        let message = DecryptedMessage::optimistic(
            self.me(),
            vec![Tag::pubkey(&counterparty)],
            text,
            protocol,
            now / 1000,
            now,
        );
        let target = TimelineRef::Conversation(counterparty);
        self.shared
            .apply(vec![target.store_event(TimelineEvent::Optimistic(message.clone()))])
            .await;
        Ok(message)
    }

    /// Show a channel message before the network confirms it.
    pub async fn send_channel_message(
        &self,
        community: &CommunityId,
        channel: &str,
        text: &str,
    ) -> Result<DecryptedMessage, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let target = TimelineRef::Channel {
            community: community.clone(),
            channel: channel.to_string(),
        };
        {
            let state = self.shared.state.lock().await;
            lookup(&state.store, &target, |_| ())?;
        }

        let now = self.now_ms();
        let message = DecryptedMessage::optimistic(
            self.me(),
            vec![
                Tag::coordinate(&community.to_string()),
                Tag::new(["h", channel]),
            ],
            text,
            Protocol::Plain,
            now / 1000,
            now,
        );
        self.shared
            .apply(vec![target.store_event(TimelineEvent::Optimistic(message.clone()))])
            .await;
        Ok(message)
    }

    /// The publisher rejected an optimistic send: mark it failed.
    pub async fn publish_rejected(
        &self,
        target: &TimelineRef,
        id: EventId,
        reason: &str,
    ) -> Result<(), ClientError> {
        self.require_message(target, id).await?;
        self.shared
            .apply(vec![target.store_event(TimelineEvent::PublishRejected {
                id,
                reason: reason.to_string(),
            })])
            .await;
        Ok(())
    }

    /// Re-arm a failed send as optimistic.
    pub async fn retry(&self, target: &TimelineRef, id: EventId) -> Result<(), ClientError> {
        self.require_message(target, id).await?;
        self.shared
            .apply(vec![target.store_event(TimelineEvent::Retry { id })])
            .await;
        Ok(())
    }

    async fn require_message(&self, target: &TimelineRef, id: EventId) -> Result<(), ClientError> {
        let state = self.shared.state.lock().await;
        if lookup(&state.store, target, |t| t.contains(&id))? {
            Ok(())
        } else {
            Err(ClientError::UnknownMessage(id))
        }
    }

    /// Load the next page of older history.
    ///
    /// Returns how many messages were added. Once the start of history is
    /// reached this returns `Ok(0)` without touching the network.
    pub async fn load_older(&self, target: &TimelineRef) -> Result<usize, ClientError> {
        let (has_more, until) = {
            let state = self.shared.state.lock().await;
            lookup(&state.store, target, |t| (t.has_more(), t.next_page_until()))?
        };
        if !has_more {
            tracing::debug!("{:?} reached start of history", target);
            return Ok(0);
        }

        let page_size = self.shared.config.pagination.page_size;
        let timeout = self.shared.config.pagination.timeout();
        let me = self.me();
        let now = self.now_ms();

        let store_events = match target {
            TimelineRef::Conversation(counterparty) => {
                let filters = filters::conversation_history(&me, counterparty, until, page_size);
                let events = self.shared.query(&filters, timeout).await?;
                // Each filter pages on its own; gift wraps for other
                // counterparties still move the cursor.
                let sources = filters
                    .iter()
                    .map(|f| SourcePage::of(events.iter().filter(|e| f.matches(e))))
                    .collect();

                let mut page = Vec::new();
                let mut elsewhere = Vec::new();
                for (owner, message) in self.shared.pipeline.decrypt_all(&events, now).await {
                    if owner == *counterparty {
                        page.push(message);
                    } else {
                        elsewhere.push(StoreEvent::Conversation {
                            counterparty: owner,
                            event: TimelineEvent::Live(message),
                        });
                    }
                }
                let mut store_events = vec![target.store_event(TimelineEvent::OlderPage {
                    messages: page,
                    sources,
                    page_size,
                })];
                store_events.extend(elsewhere);
                store_events
            }
            TimelineRef::Channel { community, channel } => {
                let mut filter = filters::channel_messages(community, channel).limit(page_size);
                if let Some(until) = until {
                    filter = filter.until(until);
                }
                let events = self.shared.query(&[filter], timeout).await?;
                let sources = vec![SourcePage::of(&events)];
                let messages = events
                    .into_iter()
                    .filter(|e| e.kind == Kind::CHANNEL_MESSAGE)
                    .map(|e| DecryptedMessage::plain(e, &me, now))
                    .collect();
                vec![target.store_event(TimelineEvent::OlderPage {
                    messages,
                    sources,
                    page_size,
                })]
            }
        };

        let effects = self.shared.apply(store_events).await;
        Ok(effects
            .iter()
            .filter_map(|e| target.owns(e))
            .filter(|e| matches!(e, TimelineEffect::Added { .. }))
            .count())
    }

    /// Force an out-of-band poll of every background community.
    pub fn trigger_refresh(&self) {
        self.refresher.trigger();
    }

    /// Poll every background community now and wait for the pass.
    pub async fn refresh_now(&self) -> usize {
        self.refresher.poll_all().await
    }

    /// Fail optimistic entries that waited too long for confirmation.
    pub async fn expire_optimistic(&self) -> Vec<StoreEffect> {
        self.shared.apply(vec![StoreEvent::ExpireOptimistic]).await
    }

    /// Receive every store effect from now on.
    pub fn subscribe_effects(&self) -> broadcast::Receiver<StoreEffect> {
        self.shared.effects.subscribe()
    }

    /// Immutable snapshot of the whole store.
    pub async fn store(&self) -> MessageStore {
        self.shared.state.lock().await.store.clone()
    }

    /// One conversation.
    pub async fn conversation(&self, counterparty: &PublicKey) -> Option<Arc<ConversationState>> {
        self.shared.state.lock().await.store.conversation(counterparty)
    }

    /// Conversations, most recently active first.
    pub async fn conversations(&self) -> Vec<Arc<ConversationState>> {
        self.shared.state.lock().await.store.conversations_by_activity()
    }

    /// One community.
    pub async fn community(&self, id: &CommunityId) -> Option<Arc<CommunityState>> {
        self.shared.state.lock().await.store.community(id)
    }

    /// Every known community.
    pub async fn communities(&self) -> Vec<Arc<CommunityState>> {
        self.shared.state.lock().await.store.communities()
    }

    /// Joined communities by role, then activity.
    pub async fn ranked_communities(&self) -> Vec<CommunityId> {
        self.shared.state.lock().await.store.ranked_communities()
    }

    /// Tier completion and metrics.
    pub async fn tier_progress(&self) -> TierProgress {
        self.shared.state.lock().await.tiers.clone()
    }

    /// Background list contents.
    pub async fn lru_status(&self) -> LruStatus {
        self.shared.state.lock().await.lru.status()
    }

    /// Export the store for an external persistence collaborator.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.lock().await.store.snapshot()
    }

    /// Replace the store with a previously exported snapshot.
    pub async fn hydrate(&self, snapshot: SessionSnapshot) -> Result<(), ClientError> {
        if snapshot.me != self.me() {
            return Err(ClientError::IdentityMismatch(snapshot.me));
        }
        let mut state = self.shared.state.lock().await;
        state.store = MessageStore::hydrate(snapshot);
        tracing::info!(
            "Hydrated {} conversations and {} communities",
            state.store.conversations_by_activity().len(),
            state.store.communities().len()
        );
        Ok(())
    }

    /// Clear everything (logout). Subscriptions close first so nothing
    /// in flight lands in the fresh state.
    pub async fn reset(&self) {
        let ctx = self.shared.ctx();
        let effects = {
            let mut state = self.shared.state.lock().await;
            self.shared.subscriptions.close_all();
            state.lru.clear();
            state.tiers = TierProgress::new();
            state.reduce(StoreEvent::Reset, &ctx)
        };
        self.shared.announce(&effects);
        tracing::info!("Session reset");
    }

    /// Stop every task and subscription.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        {
            let _state = self.shared.state.lock().await;
            self.shared.subscriptions.shutdown();
        }
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("Coordinator shut down");
    }
}

impl<T: Transport, S: Signer> Drop for SyncCoordinator<T, S> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}
