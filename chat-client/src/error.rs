//! Client errors.

use relaychat_core::CommunityId;
use relaychat_types::{EventId, PublicKey};
use thiserror::Error;

use crate::config::ConfigError;
use crate::signer::SignerError;
use crate::transport::TransportError;

/// Errors returned by user-initiated operations.
///
/// Background work (subscriptions, tiered load, refresh) never returns
/// these; its failures are logged and become absence of data.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Signer error.
    #[error("signer error: {0}")]
    Signer(#[from] SignerError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Attempted to send an empty message.
    #[error("message is empty")]
    EmptyMessage,

    /// No conversation with this counterparty.
    #[error("unknown conversation: {0}")]
    UnknownConversation(PublicKey),

    /// No community with this id.
    #[error("unknown community: {0}")]
    UnknownCommunity(CommunityId),

    /// The community has no channel to load.
    #[error("community {0} has no channel {1}")]
    UnknownChannel(CommunityId, String),

    /// No message with this id.
    #[error("unknown message: {0}")]
    UnknownMessage(EventId),

    /// A snapshot belongs to another identity.
    #[error("snapshot belongs to {0}")]
    IdentityMismatch(PublicKey),
}
