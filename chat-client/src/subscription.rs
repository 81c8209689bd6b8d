//! Live subscriptions, one per scope.
//!
//! Each scope (direct-message inbox, open conversation, focused community)
//! has at most one live subscription. A subscription is a spawned task that
//! forwards transport events into a shared delivery channel, stamped with the
//! generation it was started under.
//!
//! Closing a subscription cancels its task and retires its generation.
//! Consumers call [`SubscriptionManager::is_current`] right before mutating
//! state, so an event that was already in flight when the scope closed is
//! discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use relaychat_core::CommunityId;
use relaychat_types::{Filter, PublicKey, RawEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transport::{EventStream, Transport};

/// What a subscription is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionScope {
    /// Every direct message to or from the local user.
    DirectMessages,
    /// The conversation currently open in the UI.
    Conversation(PublicKey),
    /// The focused community.
    Community(CommunityId),
}

/// An event delivered by a subscription.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Scope of the delivering subscription.
    pub scope: SubscriptionScope,
    /// Generation of the delivering subscription.
    pub generation: u64,
    /// The event.
    pub event: RawEvent,
}

/// Identifies one started subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    /// Scope.
    pub scope: SubscriptionScope,
    /// Generation stamped at start.
    pub generation: u64,
}

struct ActiveSubscription {
    generation: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveSubscription {
    fn stop(self) {
        self.token.cancel();
        // The task exits on its own once cancelled; abort covers a stream
        // that never yields.
        self.task.abort();
    }
}

/// Starts, replaces and closes scoped subscriptions.
pub struct SubscriptionManager<T: Transport> {
    transport: Arc<T>,
    root: CancellationToken,
    next_generation: AtomicU64,
    active: Mutex<HashMap<SubscriptionScope, ActiveSubscription>>,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl<T: Transport> SubscriptionManager<T> {
    /// Create a manager. Events from every subscription go to `deliveries`.
    pub fn new(transport: Arc<T>, deliveries: mpsc::UnboundedSender<Delivery>) -> Self {
        Self {
            transport,
            root: CancellationToken::new(),
            next_generation: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
            deliveries,
        }
    }

    /// Start (or restart) the subscription for `scope`.
    ///
    /// Any previous subscription for the scope is closed first. When `since`
    /// is given every filter is narrowed to events at or after it, so a
    /// restart does not re-fetch history already held locally.
    ///
    /// Transport errors are logged and yield `None`; nothing retries.
    pub async fn start(
        &self,
        scope: SubscriptionScope,
        filters: Vec<Filter>,
        since: Option<u64>,
    ) -> Option<SubscriptionHandle> {
        self.close_scope(&scope);

        let filters: Vec<Filter> = match since {
            Some(since) => filters.into_iter().map(|f| f.since(since)).collect(),
            None => filters,
        };

        let stream = match self.transport.subscribe(&filters).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Subscription for {:?} failed: {}", scope, e);
                return None;
            }
        };

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let token = self.root.child_token();
        let task = tokio::spawn(forward(
            stream,
            filters,
            scope.clone(),
            generation,
            token.clone(),
            self.deliveries.clone(),
        ));

        let displaced = self.active().insert(
            scope.clone(),
            ActiveSubscription {
                generation,
                token,
                task,
            },
        );
        // A concurrent start for the same scope may have landed first.
        if let Some(displaced) = displaced {
            displaced.stop();
        }

        tracing::info!("Subscription started: {:?} (generation {})", scope, generation);
        Some(SubscriptionHandle { scope, generation })
    }

    /// Check whether `generation` is still the live one for `scope`.
    pub fn is_current(&self, scope: &SubscriptionScope, generation: u64) -> bool {
        self.active()
            .get(scope)
            .is_some_and(|a| a.generation == generation)
    }

    /// Close the subscription identified by `handle`.
    ///
    /// A handle from an older generation does not close its replacement.
    pub fn close(&self, handle: &SubscriptionHandle) {
        let mut active = self.active();
        if active
            .get(&handle.scope)
            .is_some_and(|a| a.generation == handle.generation)
        {
            if let Some(subscription) = active.remove(&handle.scope) {
                subscription.stop();
                tracing::info!("Subscription closed: {:?}", handle.scope);
            }
        }
    }

    /// Close whatever subscription `scope` has.
    pub fn close_scope(&self, scope: &SubscriptionScope) {
        let removed = self.active().remove(scope);
        if let Some(subscription) = removed {
            subscription.stop();
            tracing::info!("Subscription closed: {:?}", scope);
        }
    }

    /// Close every subscription.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.active().drain().collect();
        for (scope, subscription) in drained {
            subscription.stop();
            tracing::debug!("Subscription closed: {:?}", scope);
        }
    }

    /// Close everything and refuse further deliveries from any task.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.close_all();
    }

    fn active(&self) -> MutexGuard<'_, HashMap<SubscriptionScope, ActiveSubscription>> {
        // Holders never panic mid-update, so a poisoned map is still consistent.
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scopes with a live subscription.
    pub fn active_scopes(&self) -> Vec<SubscriptionScope> {
        self.active().keys().cloned().collect()
    }
}

impl<T: Transport> Drop for SubscriptionManager<T> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn forward(
    mut stream: EventStream,
    filters: Vec<Filter>,
    scope: SubscriptionScope,
    generation: u64,
    token: CancellationToken,
    deliveries: mpsc::UnboundedSender<Delivery>,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = stream.next() => {
                let Some(event) = next else {
                    tracing::debug!("Subscription stream ended: {:?}", scope);
                    break;
                };
                if !filters.iter().any(|f| f.matches(&event)) {
                    tracing::debug!("Ignoring unrequested event {}", event.id);
                    continue;
                }
                let delivery = Delivery {
                    scope: scope.clone(),
                    generation,
                    event,
                };
                if deliveries.send(delivery).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use relaychat_types::{Kind, UnsignedEvent};
    use std::time::Duration;

    fn dm(created_at: u64) -> RawEvent {
        UnsignedEvent::new(
            PublicKey::from_bytes([1u8; 32]),
            Kind::LEGACY_DM,
            created_at,
            vec![],
            format!("m{created_at}"),
        )
        .into_raw("sig")
    }

    fn setup() -> (
        MockTransport,
        SubscriptionManager<MockTransport>,
        mpsc::UnboundedReceiver<Delivery>,
    ) {
        let transport = MockTransport::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = SubscriptionManager::new(Arc::new(transport.clone()), tx);
        (transport, manager, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("delivery expected")
            .expect("channel open")
    }

    #[tokio::test]
    async fn delivers_backlog_and_live_events() {
        let (transport, manager, mut rx) = setup();
        transport.insert(dm(10));

        let handle = manager
            .start(
                SubscriptionScope::DirectMessages,
                vec![Filter::new().kind(Kind::LEGACY_DM)],
                None,
            )
            .await
            .unwrap();

        let first = next(&mut rx).await;
        assert_eq!(first.event.created_at, 10);
        assert_eq!(first.generation, handle.generation);

        transport.publish(dm(20));
        assert_eq!(next(&mut rx).await.event.created_at, 20);
    }

    #[tokio::test]
    async fn since_narrows_filters() {
        let (transport, manager, mut rx) = setup();
        transport.insert(dm(10));
        transport.insert(dm(30));

        manager
            .start(
                SubscriptionScope::DirectMessages,
                vec![Filter::new().kind(Kind::LEGACY_DM)],
                Some(20),
            )
            .await
            .unwrap();

        assert_eq!(next(&mut rx).await.event.created_at, 30);
        assert_eq!(transport.subscriptions()[0][0].since, Some(20));
    }

    #[tokio::test]
    async fn restart_retires_previous_generation() {
        let (transport, manager, _rx) = setup();
        let scope = SubscriptionScope::DirectMessages;
        let filters = vec![Filter::new().kind(Kind::LEGACY_DM)];

        let first = manager.start(scope.clone(), filters.clone(), None).await.unwrap();
        let second = manager.start(scope.clone(), filters, None).await.unwrap();

        assert!(second.generation > first.generation);
        assert!(!manager.is_current(&scope, first.generation));
        assert!(manager.is_current(&scope, second.generation));

        // Stale handle does not close the replacement.
        manager.close(&first);
        assert!(manager.is_current(&scope, second.generation));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.open_subscriptions(), 1);
    }

    #[tokio::test]
    async fn close_stops_delivery() {
        let (transport, manager, mut rx) = setup();
        let handle = manager
            .start(
                SubscriptionScope::DirectMessages,
                vec![Filter::new().kind(Kind::LEGACY_DM)],
                None,
            )
            .await
            .unwrap();

        manager.close(&handle);
        assert!(!manager.is_current(&handle.scope, handle.generation));

        transport.publish(dm(5));
        let result = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err() || result.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscribe_failure_is_swallowed() {
        let (transport, manager, _rx) = setup();
        transport.fail_next_subscribe("relay down");

        let handle = manager
            .start(SubscriptionScope::DirectMessages, vec![Filter::new()], None)
            .await;
        assert!(handle.is_none());
        assert!(manager.active_scopes().is_empty());
    }

    #[tokio::test]
    async fn close_all_tears_down_every_scope() {
        let (_transport, manager, _rx) = setup();
        let peer = PublicKey::from_bytes([2u8; 32]);
        manager
            .start(SubscriptionScope::DirectMessages, vec![Filter::new()], None)
            .await
            .unwrap();
        manager
            .start(SubscriptionScope::Conversation(peer), vec![Filter::new()], None)
            .await
            .unwrap();
        assert_eq!(manager.active_scopes().len(), 2);

        manager.close_all();
        assert!(manager.active_scopes().is_empty());
    }
}
