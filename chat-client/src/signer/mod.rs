//! Signer / identity abstraction.
//!
//! The engine never touches key material. Decryption is delegated to a
//! [`Signer`], which may be local keys, a hardware device or a remote
//! signer; every call may therefore suspend.

mod mock;

pub use mock::{MockSigner, DEFAULT_NETWORK_SECRET};

use async_trait::async_trait;
use relaychat_core::Protocol;
use relaychat_types::PublicKey;
use thiserror::Error;

/// Signer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    /// Ciphertext did not authenticate under the pairwise key.
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Ciphertext is not well-formed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The signer cannot handle this scheme.
    #[error("unsupported scheme: {0:?}")]
    UnsupportedScheme(Protocol),

    /// The signer could not be reached.
    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

/// Identity and decryption provider.
#[async_trait]
pub trait Signer: Send + Sync + 'static {
    /// The local user's public key.
    fn public_key(&self) -> PublicKey;

    /// Decrypt `ciphertext` exchanged with `counterparty` under `scheme`.
    async fn decrypt(
        &self,
        counterparty: &PublicKey,
        ciphertext: &str,
        scheme: Protocol,
    ) -> Result<String, SignerError>;
}
