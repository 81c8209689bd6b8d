//! Event transport abstraction.
//!
//! Relay connection management, relay selection and retry live outside this
//! crate. The engine only needs two things from the network:
//! - `query()` returns stored events matching any of the filters
//! - `subscribe()` streams stored then live events matching any filter
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.insert(event);
//! let events = transport.query(&[Filter::new().kind(Kind::LEGACY_DM)], &cancel).await?;
//! ```

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use relaychat_types::{Filter, RawEvent};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Stream of events delivered by a subscription.
///
/// Dropping the stream closes the subscription.
pub type EventStream = BoxStream<'static, RawEvent>;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Query failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Subscription could not be opened.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The operation exceeded its deadline.
    #[error("timeout")]
    Timeout,
}

/// Transport trait for querying and subscribing to relay events.
///
/// Implementations fan queries out to relays, merge and deduplicate the
/// results, and verify signatures before handing events over.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Fetch stored events matching any of `filters`.
    ///
    /// Implementations should return [`TransportError::Cancelled`] promptly
    /// once `cancel` fires.
    async fn query(
        &self,
        filters: &[Filter],
        cancel: &CancellationToken,
    ) -> Result<Vec<RawEvent>, TransportError>;

    /// Open a live subscription for events matching any of `filters`.
    async fn subscribe(&self, filters: &[Filter]) -> Result<EventStream, TransportError>;
}
