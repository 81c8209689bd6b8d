//! Decryption pipeline.
//!
//! Turns encrypted direct-message events into [`DecryptedMessage`]s, picking
//! the scheme by kind:
//!
//! ```text
//! kind 4     content --decrypt(author)--> plaintext
//! kind 1059  content --decrypt(wrap author)--> seal (13)
//!            seal    --decrypt(seal author)--> rumor (14) --> plaintext
//! ```
//!
//! Any failure drops the event. Partial or garbled plaintext is never
//! surfaced.

use std::sync::Arc;

use relaychat_core::{DecryptedMessage, Protocol};
use relaychat_types::{Kind, PublicKey, RawEvent, UnsignedEvent};
use thiserror::Error;

use crate::signer::{Signer, SignerError};

/// Why an event was dropped.
#[derive(Debug, Error)]
enum DropReason {
    #[error("kind {0} is not an encrypted direct message")]
    UnsupportedKind(Kind),

    #[error("self-sent message has no recipient tag")]
    MissingRecipient,

    #[error("signer: {0}")]
    Signer(#[from] SignerError),

    #[error("malformed seal: {0}")]
    MalformedSeal(String),

    #[error("malformed rumor: {0}")]
    MalformedRumor(String),

    #[error("seal author {seal} does not match rumor author {rumor}")]
    AuthorMismatch { seal: PublicKey, rumor: PublicKey },
}

/// Decrypts direct messages through a [`Signer`].
pub struct DecryptionPipeline<S: Signer> {
    signer: Arc<S>,
}

impl<S: Signer> Clone for DecryptionPipeline<S> {
    fn clone(&self) -> Self {
        Self {
            signer: Arc::clone(&self.signer),
        }
    }
}

impl<S: Signer> DecryptionPipeline<S> {
    /// Create a pipeline backed by `signer`.
    pub fn new(signer: Arc<S>) -> Self {
        Self { signer }
    }

    /// The local user's key.
    pub fn me(&self) -> PublicKey {
        self.signer.public_key()
    }

    /// Decrypt `event`, returning the conversation counterparty and the
    /// message, or `None` when the event cannot be decrypted.
    pub async fn decrypt(
        &self,
        event: &RawEvent,
        now_ms: u64,
    ) -> Option<(PublicKey, DecryptedMessage)> {
        let result = match event.kind {
            k if k == Kind::LEGACY_DM => self.decrypt_legacy(event, now_ms).await,
            k if k == Kind::GIFT_WRAP => self.decrypt_sealed(event, now_ms).await,
            other => Err(DropReason::UnsupportedKind(other)),
        };

        match result {
            Ok(decrypted) => Some(decrypted),
            Err(reason) => {
                tracing::debug!("Dropping event {}: {}", event.id, reason);
                None
            }
        }
    }

    /// Decrypt a batch, keeping input order and dropping failures.
    pub async fn decrypt_all(
        &self,
        events: &[RawEvent],
        now_ms: u64,
    ) -> Vec<(PublicKey, DecryptedMessage)> {
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            if let Some(decrypted) = self.decrypt(event, now_ms).await {
                out.push(decrypted);
            }
        }
        out
    }

    async fn decrypt_legacy(
        &self,
        event: &RawEvent,
        now_ms: u64,
    ) -> Result<(PublicKey, DecryptedMessage), DropReason> {
        let me = self.me();
        let counterparty = if event.pubkey == me {
            event.first_pubkey_tag().ok_or(DropReason::MissingRecipient)?
        } else {
            event.pubkey
        };

        let plaintext = self
            .signer
            .decrypt(&counterparty, &event.content, Protocol::Legacy)
            .await?;

        let message =
            DecryptedMessage::confirmed(event.clone(), plaintext, Protocol::Legacy, &me, now_ms);
        Ok((counterparty, message))
    }

    async fn decrypt_sealed(
        &self,
        wrap: &RawEvent,
        now_ms: u64,
    ) -> Result<(PublicKey, DecryptedMessage), DropReason> {
        let me = self.me();

        let seal_json = self
            .signer
            .decrypt(&wrap.pubkey, &wrap.content, Protocol::Sealed)
            .await?;
        let seal =
            RawEvent::from_json(&seal_json).map_err(|e| DropReason::MalformedSeal(e.to_string()))?;
        if seal.kind != Kind::SEAL {
            return Err(DropReason::MalformedSeal(format!("kind {}", seal.kind)));
        }

        let rumor_json = self
            .signer
            .decrypt(&seal.pubkey, &seal.content, Protocol::Sealed)
            .await?;
        let rumor: UnsignedEvent = serde_json::from_str(&rumor_json)
            .map_err(|e| DropReason::MalformedRumor(e.to_string()))?;
        if rumor.kind != Kind::PRIVATE_DM {
            return Err(DropReason::MalformedRumor(format!("kind {}", rumor.kind)));
        }
        if rumor.pubkey != seal.pubkey {
            return Err(DropReason::AuthorMismatch {
                seal: seal.pubkey,
                rumor: rumor.pubkey,
            });
        }

        let counterparty = if rumor.pubkey == me {
            rumor.first_pubkey_tag().ok_or(DropReason::MissingRecipient)?
        } else {
            rumor.pubkey
        };

        let plaintext = rumor.content.clone();
        let message = DecryptedMessage::confirmed(
            rumor.into_raw(String::new()),
            plaintext,
            Protocol::Sealed,
            &me,
            now_ms,
        );
        Ok((counterparty, message))
    }
}
