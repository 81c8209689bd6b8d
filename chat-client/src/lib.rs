//! # relaychat-client
//!
//! Message synchronization engine for relay-based encrypted chat.
//!
//! This is the library applications use to keep direct messages and
//! community channels in sync with the network.
//!
//! ## Features
//!
//! - **Two DM schemes**: legacy pairwise (kind 4) and sealed gift wraps
//!   (kind 1059), decrypted through a pluggable [`Signer`]
//! - **Reconciliation**: history pages, live events and optimistic sends
//!   merge into one ordered, deduplicated timeline
//! - **Prioritized loading**: a three-tier initial load with per-operation
//!   timeouts, then LRU background refresh of non-focused communities
//! - **Pure state machine**: all state changes are `relaychat-core` reducers
//!
//! ## Example
//!
//! ```ignore
//! use relaychat_client::{ClientConfig, MockSigner, MockTransport, SyncCoordinator};
//!
//! let coordinator = Arc::new(SyncCoordinator::new(
//!     Arc::new(MockTransport::new()),
//!     Arc::new(MockSigner::random()),
//!     ClientConfig::default(),
//! ));
//! coordinator.start().await;
//! let progress = coordinator.initial_load().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod decrypt;
pub mod domain;
pub mod error;
pub mod filters;
pub mod loader;
pub mod refresher;
pub mod signer;
pub mod subscription;
pub mod transport;

pub use config::{
    BackgroundConfig, ClientConfig, ConfigError, LoaderConfig, PaginationConfig, ReconcileSection,
};
pub use coordinator::{SyncCoordinator, TimelineRef};
pub use decrypt::DecryptionPipeline;
pub use domain::{CommunitiesDomain, MessagingDomain};
pub use error::ClientError;
pub use loader::TieredLoader;
pub use refresher::BackgroundRefresher;
pub use signer::{MockSigner, Signer, SignerError, DEFAULT_NETWORK_SECRET};
pub use subscription::{Delivery, SubscriptionHandle, SubscriptionManager, SubscriptionScope};
pub use transport::{EventStream, MockTransport, Transport, TransportError};
