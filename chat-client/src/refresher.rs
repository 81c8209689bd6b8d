//! Background refresh of non-focused communities.
//!
//! The refresher sleeps until the earliest LRU entry is due (or the sweep
//! interval, whichever is sooner), polls every due community, records the
//! poll so its backoff grows, and expires stale optimistic sends. A manual
//! trigger polls every entry out of band.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use relaychat_core::{CommunityId, StoreEvent, Timeline};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::coordinator::Shared;
use crate::filters;
use crate::signer::Signer;
use crate::transport::Transport;

/// Polls background communities on their backoff schedule.
pub struct BackgroundRefresher<T: Transport, S: Signer> {
    shared: Arc<Shared<T, S>>,
    trigger: Arc<Notify>,
}

impl<T: Transport, S: Signer> Clone for BackgroundRefresher<T, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            trigger: Arc::clone(&self.trigger),
        }
    }
}

impl<T: Transport, S: Signer> BackgroundRefresher<T, S> {
    pub(crate) fn new(shared: Arc<Shared<T, S>>) -> Self {
        Self {
            shared,
            trigger: Arc::new(Notify::new()),
        }
    }

    /// Ask the running loop for an out-of-band pass over every entry.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Poll every community that is due now. Returns how many were polled.
    pub async fn poll_due(&self) -> usize {
        let due = {
            let state = self.shared.state.lock().await;
            state.lru.due(self.shared.now_ms())
        };
        self.poll_each(due).await
    }

    /// Poll every tracked community regardless of schedule.
    pub async fn poll_all(&self) -> usize {
        let all = self.shared.state.lock().await.lru.all();
        self.poll_each(all).await
    }

    async fn poll_each(&self, ids: Vec<CommunityId>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let polled = join_all(ids.iter().map(|id| self.poll(id))).await;
        polled.into_iter().filter(|ok| *ok).count()
    }

    /// Fetch what changed in one community since its newest message.
    ///
    /// The poll counts against the backoff whether or not it succeeded.
    async fn poll(&self, id: &CommunityId) -> bool {
        let since = {
            let state = self.shared.state.lock().await;
            state.store.community(id).and_then(|c| {
                c.channel_timelines
                    .values()
                    .filter_map(Timeline::newest_confirmed_at)
                    .max()
            })
        };

        let background = &self.shared.config.background;
        let filters = filters::community_live(id, since, Some(background.poll_limit));
        let result = self.shared.query(&filters, background.poll_timeout()).await;

        let store_events = match &result {
            Ok(events) => self.shared.classify_community(events.clone()),
            Err(e) => {
                tracing::warn!("Background poll of {} failed: {}", id, e);
                Vec::new()
            }
        };

        let ctx = self.shared.ctx();
        let effects = {
            let mut state = self.shared.state.lock().await;
            // Focused or evicted while the query was in flight.
            if !state.lru.contains(id) {
                tracing::debug!("Dropping poll result for untracked {}", id);
                return false;
            }
            state.lru.record_poll(id, ctx.now_ms);

            let effects: Vec<_> = store_events
                .into_iter()
                .flat_map(|event| state.reduce(event, &ctx))
                .collect();
            let still_joined = state
                .store
                .community(id)
                .is_some_and(|c| c.membership.is_joined());
            if !still_joined {
                tracing::info!("No longer a member of {}, leaving background refresh", id);
                state.lru.remove(id);
            }
            effects
        };
        self.shared.announce(&effects);
        result.is_ok()
    }

    /// Spawn the refresh loop. It exits when the coordinator shuts down.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let background = self.shared.config.background.clone();
        if !background.enabled {
            tracing::info!("Background refresh disabled");
            return;
        }
        tracing::info!(
            "Background refresh started (sweep: {}ms)",
            background.sweep_interval_ms
        );

        loop {
            let wait = self.next_wait(background.sweep_interval()).await;
            tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => break,
                _ = self.trigger.notified() => {
                    let polled = self.poll_all().await;
                    tracing::info!("Manual refresh polled {} communities", polled);
                }
                _ = tokio::time::sleep(wait) => {
                    let polled = self.poll_due().await;
                    if polled > 0 {
                        tracing::debug!("Background refresh polled {} communities", polled);
                    }
                }
            }
            self.shared.apply(vec![StoreEvent::ExpireOptimistic]).await;
        }
        tracing::info!("Background refresh stopped");
    }

    async fn next_wait(&self, sweep: Duration) -> Duration {
        let next_due = self.shared.state.lock().await.lru.next_due_at();
        match next_due {
            Some(due_at) => {
                let now = self.shared.now_ms();
                Duration::from_millis(due_at.saturating_sub(now)).min(sweep)
            }
            None => sweep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::coordinator::SyncCoordinator;
    use crate::signer::MockSigner;
    use crate::transport::MockTransport;
    use relaychat_types::{Kind, PublicKey, RawEvent, Tag, UnsignedEvent};

    fn me() -> PublicKey {
        PublicKey::from_bytes([0xA1; 32])
    }

    fn owned(d: &str, created_at: u64) -> (CommunityId, Vec<RawEvent>) {
        let id = CommunityId::new(me(), d);
        let events = vec![
            UnsignedEvent::new(me(), Kind::COMMUNITY, created_at, vec![Tag::identifier(d)], "")
                .into_raw("sig"),
            UnsignedEvent::new(
                me(),
                Kind::CHANNEL,
                created_at,
                vec![Tag::identifier("general"), Tag::coordinate(&id.to_string())],
                "",
            )
            .into_raw("sig"),
        ];
        (id, events)
    }

    fn channel_message(id: &CommunityId, created_at: u64, text: &str) -> RawEvent {
        UnsignedEvent::new(
            PublicKey::from_bytes([0xC0; 32]),
            Kind::CHANNEL_MESSAGE,
            created_at,
            vec![Tag::coordinate(&id.to_string()), Tag::new(["h", "general"])],
            text,
        )
        .into_raw("sig")
    }

    async fn loaded(
        communities: &[&str],
    ) -> (
        MockTransport,
        SyncCoordinator<MockTransport, MockSigner>,
        Vec<CommunityId>,
    ) {
        let transport = MockTransport::new();
        let mut ids = Vec::new();
        for (i, d) in communities.iter().enumerate() {
            let (id, events) = owned(d, 10 + i as u64);
            events.into_iter().for_each(|e| transport.insert(e));
            ids.push(id);
        }
        let coordinator = SyncCoordinator::new(
            Arc::new(transport.clone()),
            Arc::new(MockSigner::new(me())),
            ClientConfig::default(),
        );
        coordinator.initial_load().await;
        (transport, coordinator, ids)
    }

    #[tokio::test(start_paused = true)]
    async fn manual_pass_polls_every_entry_and_backs_off() {
        let (transport, coordinator, ids) = loaded(&["a", "b"]).await;
        transport.insert(channel_message(&ids[0], 500, "new"));

        assert_eq!(coordinator.refresh_now().await, 2);

        let community = coordinator.community(&ids[0]).await.unwrap();
        assert_eq!(community.channel_timeline("general").unwrap().len(), 1);

        let status = coordinator.lru_status().await;
        assert!(status.entries.iter().all(|e| e.load_count == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failure_still_counts() {
        let (transport, coordinator, _ids) = loaded(&["a"]).await;
        transport.fail_next_query("relay down");

        assert_eq!(coordinator.refresh_now().await, 0);
        let status = coordinator.lru_status().await;
        assert_eq!(status.entries[0].load_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn focused_community_is_not_polled() {
        let (_transport, coordinator, ids) = loaded(&["a", "b"]).await;
        coordinator.focus_community(&ids[0]).await.unwrap();

        assert_eq!(coordinator.refresh_now().await, 1);
        let status = coordinator.lru_status().await;
        assert_eq!(status.focused.as_ref(), Some(&ids[0]));
        assert!(status.entries.iter().all(|e| e.community_id != ids[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_polls_when_due() {
        let (transport, coordinator, ids) = loaded(&["a"]).await;
        coordinator.start().await;

        transport.insert(channel_message(&ids[0], 900, "later"));
        // Newly tracked entries are due immediately.
        tokio::time::sleep(Duration::from_secs(1)).await;

        let community = coordinator.community(&ids[0]).await.unwrap();
        assert_eq!(community.channel_timeline("general").unwrap().len(), 1);
        coordinator.shutdown().await;
    }
}
