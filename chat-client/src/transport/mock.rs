//! Mock transport for testing.
//!
//! An in-memory relay: stores events, answers queries with relay filter
//! semantics, pushes published events to matching subscribers, and allows
//! injecting failures and per-kind latency.

use super::{EventStream, Transport, TransportError};
use async_trait::async_trait;
use futures_util::StreamExt;
use relaychat_types::{EventId, Filter, Kind, RawEvent};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Mock transport for testing.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    events: Vec<RawEvent>,
    subscribers: Vec<Subscriber>,
    queries: Vec<Vec<Filter>>,
    subscriptions: Vec<Vec<Filter>>,
    delays: HashMap<Kind, Duration>,
    failing_kinds: HashSet<Kind>,
    fail_next_query: Option<String>,
    fail_next_subscribe: Option<String>,
}

#[derive(Debug)]
struct Subscriber {
    filters: Vec<Filter>,
    sender: mpsc::UnboundedSender<RawEvent>,
}

impl MockTransport {
    /// Create an empty mock relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an event without notifying subscribers (history).
    pub fn insert(&self, event: RawEvent) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.events.iter().any(|e| e.id == event.id) {
            inner.events.push(event);
        }
    }

    /// Store an event and push it to every matching live subscriber.
    pub fn publish(&self, event: RawEvent) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|s| !s.sender.is_closed());
        for subscriber in &inner.subscribers {
            if subscriber.filters.iter().any(|f| f.matches(&event)) {
                let _ = subscriber.sender.send(event.clone());
            }
        }
        if !inner.events.iter().any(|e| e.id == event.id) {
            inner.events.push(event);
        }
    }

    /// Every filter set passed to `query()`, in call order.
    pub fn queries(&self) -> Vec<Vec<Filter>> {
        let inner = self.inner.lock().unwrap();
        inner.queries.clone()
    }

    /// Number of `query()` calls.
    pub fn query_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.queries.len()
    }

    /// Every filter set passed to `subscribe()`, in call order.
    pub fn subscriptions(&self) -> Vec<Vec<Filter>> {
        let inner = self.inner.lock().unwrap();
        inner.subscriptions.clone()
    }

    /// Number of subscriptions whose stream is still held.
    pub fn open_subscriptions(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .subscribers
            .iter()
            .filter(|s| !s.sender.is_closed())
            .count()
    }

    /// Delay queries that ask for `kind`.
    pub fn set_delay(&self, kind: Kind, delay: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.delays.insert(kind, delay);
    }

    /// Make every query that asks for `kind` fail.
    pub fn fail_kind(&self, kind: Kind) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_kinds.insert(kind);
    }

    /// Cause the next query() to fail with the given error.
    pub fn fail_next_query(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_query = Some(error.to_string());
    }

    /// Cause the next subscribe() to fail with the given error.
    pub fn fail_next_subscribe(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_subscribe = Some(error.to_string());
    }

    /// Clear all state (events, subscribers, recordings, injections).
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockTransportInner::default();
    }

    fn requested_kinds(filters: &[Filter]) -> impl Iterator<Item = Kind> + '_ {
        filters
            .iter()
            .filter_map(|f| f.kinds.as_ref())
            .flat_map(|kinds| kinds.iter().copied())
    }
}

impl MockTransportInner {
    /// Union of per-filter results, each newest-first and limited.
    fn matching(&self, filters: &[Filter]) -> Vec<RawEvent> {
        let mut seen: HashSet<EventId> = HashSet::new();
        let mut out = Vec::new();
        for filter in filters {
            let mut matched: Vec<&RawEvent> =
                self.events.iter().filter(|e| filter.matches(e)).collect();
            matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            if let Some(limit) = filter.limit {
                matched.truncate(limit);
            }
            for event in matched {
                if seen.insert(event.id) {
                    out.push(event.clone());
                }
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn query(
        &self,
        filters: &[Filter],
        cancel: &CancellationToken,
    ) -> Result<Vec<RawEvent>, TransportError> {
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            inner.queries.push(filters.to_vec());

            // Check for forced failure
            if let Some(error) = inner.fail_next_query.take() {
                return Err(TransportError::QueryFailed(error));
            }
            if Self::requested_kinds(filters).any(|k| inner.failing_kinds.contains(&k)) {
                return Err(TransportError::QueryFailed("kind unavailable".into()));
            }

            Self::requested_kinds(filters)
                .filter_map(|k| inner.delays.get(&k).copied())
                .max()
        };

        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let inner = self.inner.lock().unwrap();
        Ok(inner.matching(filters))
    }

    async fn subscribe(&self, filters: &[Filter]) -> Result<EventStream, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.subscriptions.push(filters.to_vec());

        // Check for forced failure
        if let Some(error) = inner.fail_next_subscribe.take() {
            return Err(TransportError::SubscribeFailed(error));
        }

        let (sender, receiver) = mpsc::unbounded_channel();

        // Stored events first, oldest first, then live ones.
        let mut backlog = inner.matching(filters);
        backlog.reverse();
        for event in backlog {
            let _ = sender.send(event);
        }

        inner.subscribers.push(Subscriber {
            filters: filters.to_vec(),
            sender,
        });

        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaychat_types::{PublicKey, Tag, UnsignedEvent};

    fn event(author: u8, kind: Kind, created_at: u64) -> RawEvent {
        UnsignedEvent::new(
            PublicKey::from_bytes([author; 32]),
            kind,
            created_at,
            vec![],
            format!("{author}-{created_at}"),
        )
        .into_raw("sig")
    }

    // ===========================================
    // Query Tests
    // ===========================================

    #[tokio::test]
    async fn query_returns_matches_newest_first() {
        let transport = MockTransport::new();
        transport.insert(event(1, Kind::LEGACY_DM, 10));
        transport.insert(event(1, Kind::LEGACY_DM, 30));
        transport.insert(event(1, Kind::CHANNEL_MESSAGE, 20));

        let events = transport
            .query(&[Filter::new().kind(Kind::LEGACY_DM)], &CancellationToken::new())
            .await
            .unwrap();

        let times: Vec<_> = events.iter().map(|e| e.created_at).collect();
        assert_eq!(times, vec![30, 10]);
    }

    #[tokio::test]
    async fn query_limit_is_per_filter() {
        let transport = MockTransport::new();
        for t in 1..=5 {
            transport.insert(event(1, Kind::LEGACY_DM, t));
        }

        let events = transport
            .query(
                &[Filter::new().kind(Kind::LEGACY_DM).limit(2)],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let times: Vec<_> = events.iter().map(|e| e.created_at).collect();
        assert_eq!(times, vec![5, 4]);
    }

    #[tokio::test]
    async fn query_filters_are_ored_without_duplicates() {
        let transport = MockTransport::new();
        let me = PublicKey::from_bytes([9u8; 32]);
        let mine = UnsignedEvent::new(me, Kind::LEGACY_DM, 1, vec![Tag::pubkey(&me)], "note")
            .into_raw("sig");
        transport.insert(mine);
        transport.insert(event(2, Kind::LEGACY_DM, 2));

        let events = transport
            .query(
                &[Filter::new().author(me), Filter::new().pubkey(&me)],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn queries_are_recorded() {
        let transport = MockTransport::new();
        let filter = Filter::new().kind(Kind::GIFT_WRAP);
        transport
            .query(&[filter.clone()], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transport.queries(), vec![vec![filter]]);
        assert_eq!(transport.query_count(), 1);
    }

    // ===========================================
    // Failure Injection Tests
    // ===========================================

    #[tokio::test]
    async fn forced_query_failure() {
        let transport = MockTransport::new();
        transport.fail_next_query("relay down");

        let result = transport.query(&[Filter::new()], &CancellationToken::new()).await;
        assert!(matches!(result, Err(TransportError::QueryFailed(_))));

        // Next query should work
        transport
            .query(&[Filter::new()], &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failing_kind_fails_every_time() {
        let transport = MockTransport::new();
        transport.fail_kind(Kind::COMMUNITY);

        for _ in 0..2 {
            let result = transport
                .query(&[Filter::new().kind(Kind::COMMUNITY)], &CancellationToken::new())
                .await;
            assert!(result.is_err());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_query_honours_cancellation() {
        let transport = MockTransport::new();
        transport.set_delay(Kind::COMMUNITY, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let query = {
            let transport = transport.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                transport
                    .query(&[Filter::new().kind(Kind::COMMUNITY)], &cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let result = query.await.unwrap();
        assert_eq!(result, Err(TransportError::Cancelled));
    }

    // ===========================================
    // Subscription Tests
    // ===========================================

    #[tokio::test]
    async fn subscribe_delivers_backlog_then_live() {
        let transport = MockTransport::new();
        transport.insert(event(1, Kind::LEGACY_DM, 10));
        transport.insert(event(1, Kind::LEGACY_DM, 5));

        let mut stream = transport
            .subscribe(&[Filter::new().kind(Kind::LEGACY_DM)])
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().created_at, 5);
        assert_eq!(stream.next().await.unwrap().created_at, 10);

        transport.publish(event(2, Kind::CHANNEL_MESSAGE, 11));
        transport.publish(event(2, Kind::LEGACY_DM, 12));
        assert_eq!(stream.next().await.unwrap().created_at, 12);
    }

    #[tokio::test]
    async fn subscribe_respects_since() {
        let transport = MockTransport::new();
        transport.insert(event(1, Kind::LEGACY_DM, 10));
        transport.insert(event(1, Kind::LEGACY_DM, 20));

        let mut stream = transport
            .subscribe(&[Filter::new().kind(Kind::LEGACY_DM).since(15)])
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().created_at, 20);
    }

    #[tokio::test]
    async fn dropping_stream_closes_subscription() {
        let transport = MockTransport::new();
        let stream = transport.subscribe(&[Filter::new()]).await.unwrap();
        assert_eq!(transport.open_subscriptions(), 1);

        drop(stream);
        assert_eq!(transport.open_subscriptions(), 0);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.insert(event(1, Kind::LEGACY_DM, 1));
        let events = transport2
            .query(&[Filter::new()], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);

        transport2.reset();
        assert_eq!(transport1.query_count(), 0);
    }
}
