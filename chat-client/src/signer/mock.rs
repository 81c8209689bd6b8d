//! Mock signer for testing and demos.
//!
//! Real schemes derive pairwise keys through ECDH. The mock derives them with
//! HKDF-SHA256 from a network-wide secret and the two sorted public keys, so
//! any two mock signers sharing the secret agree on a key while a third party
//! (or a signer with another secret) cannot decrypt.
//!
//! Ciphertext format: `base64(nonce || XChaCha20-Poly1305 ciphertext)`.

use super::{Signer, SignerError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use relaychat_core::Protocol;
use relaychat_types::{Kind, PublicKey, RawEvent, Tag, UnsignedEvent};
use sha2::Sha256;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use zeroize::Zeroizing;

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
const NONCE_SIZE: usize = 24;

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes).
const KEY_SIZE: usize = 32;

/// Secret shared by every mock signer unless overridden.
pub const DEFAULT_NETWORK_SECRET: [u8; 32] = *b"relaychat-mock-network-secret-01";

/// Mock signer holding a public key and a network secret.
pub struct MockSigner {
    public_key: PublicKey,
    secret: Zeroizing<[u8; KEY_SIZE]>,
    fail_next_decrypt: Mutex<Option<SignerError>>,
    decrypt_calls: AtomicUsize,
}

impl MockSigner {
    /// Signer for `public_key` on the default mock network.
    pub fn new(public_key: PublicKey) -> Self {
        Self::with_secret(public_key, DEFAULT_NETWORK_SECRET)
    }

    /// Signer for `public_key` with its own network secret.
    pub fn with_secret(public_key: PublicKey, secret: [u8; KEY_SIZE]) -> Self {
        Self {
            public_key,
            secret: Zeroizing::new(secret),
            fail_next_decrypt: Mutex::new(None),
            decrypt_calls: AtomicUsize::new(0),
        }
    }

    /// Signer for a fresh random key.
    pub fn random() -> Self {
        Self::new(PublicKey::random())
    }

    /// Number of `decrypt()` calls so far.
    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    /// Cause the next decrypt() to fail with the given error.
    pub fn fail_next_decrypt(&self, error: SignerError) {
        *self.fail_next_decrypt.lock().unwrap() = Some(error);
    }

    /// Encrypt `plaintext` for `counterparty`.
    pub fn encrypt(
        &self,
        counterparty: &PublicKey,
        plaintext: &str,
        scheme: Protocol,
    ) -> Result<String, SignerError> {
        self.encrypt_between(&self.public_key, counterparty, plaintext, scheme)
    }

    /// A legacy (kind 4) direct message from this signer to `recipient`.
    pub fn legacy_dm(
        &self,
        recipient: &PublicKey,
        text: &str,
        created_at: u64,
    ) -> Result<RawEvent, SignerError> {
        let content = self.encrypt(recipient, text, Protocol::Legacy)?;
        Ok(UnsignedEvent::new(
            self.public_key,
            Kind::LEGACY_DM,
            created_at,
            vec![Tag::pubkey(recipient)],
            content,
        )
        .into_raw("mock"))
    }

    /// A sealed direct message from this signer to `recipient`.
    ///
    /// Returns the recipient's gift wrap followed by the sender's own copy.
    /// Both carry the same rumor and therefore the same message id.
    pub fn gift_wrap(
        &self,
        recipient: &PublicKey,
        text: &str,
        created_at: u64,
    ) -> Result<Vec<RawEvent>, SignerError> {
        let rumor = UnsignedEvent::new(
            self.public_key,
            Kind::PRIVATE_DM,
            created_at,
            vec![Tag::pubkey(recipient)],
            text,
        );
        let rumor_json = serde_json::to_string(&rumor)
            .map_err(|e| SignerError::EncryptionFailed(e.to_string()))?;

        [*recipient, self.public_key]
            .iter()
            .map(|target| self.wrap_for(target, &rumor_json, created_at))
            .collect()
    }

    fn wrap_for(
        &self,
        target: &PublicKey,
        rumor_json: &str,
        created_at: u64,
    ) -> Result<RawEvent, SignerError> {
        let seal_content = self.encrypt(target, rumor_json, Protocol::Sealed)?;
        let seal = UnsignedEvent::new(self.public_key, Kind::SEAL, created_at, vec![], seal_content)
            .into_raw("mock-seal");
        let seal_json = seal
            .to_json()
            .map_err(|e| SignerError::EncryptionFailed(e.to_string()))?;

        // Wrapper is authored by a one-off key.
        let ephemeral = PublicKey::random();
        let wrap_content =
            self.encrypt_between(&ephemeral, target, &seal_json, Protocol::Sealed)?;
        Ok(UnsignedEvent::new(
            ephemeral,
            Kind::GIFT_WRAP,
            created_at,
            vec![Tag::pubkey(target)],
            wrap_content,
        )
        .into_raw("mock-wrap"))
    }

    fn pairwise_key(
        &self,
        a: &PublicKey,
        b: &PublicKey,
        scheme: Protocol,
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>, SignerError> {
        let label: &[u8] = match scheme {
            Protocol::Legacy => b"legacy",
            Protocol::Sealed => b"sealed",
            Protocol::Plain => return Err(SignerError::UnsupportedScheme(scheme)),
        };
        let (low, high) = if a <= b { (a, b) } else { (b, a) };

        let hkdf = Hkdf::<Sha256>::new(Some(b"relaychat-mock-pairwise-v1"), &self.secret[..]);
        let mut info = Vec::with_capacity(label.len() + 64);
        info.extend_from_slice(label);
        info.extend_from_slice(low.as_bytes());
        info.extend_from_slice(high.as_bytes());

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        hkdf.expand(&info, &mut key[..])
            .map_err(|e| SignerError::EncryptionFailed(e.to_string()))?;
        Ok(key)
    }

    fn encrypt_between(
        &self,
        a: &PublicKey,
        b: &PublicKey,
        plaintext: &str,
        scheme: Protocol,
    ) -> Result<String, SignerError> {
        let key = self.pairwise_key(a, b, scheme)?;

        // Generate random 192-bit nonce
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| SignerError::EncryptionFailed(e.to_string()))?;
        let nonce = XNonce::from_slice(&nonce_bytes);

        let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
            .map_err(|e| SignerError::EncryptionFailed(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| SignerError::EncryptionFailed("aead encrypt failed".into()))?;

        // Prepend nonce to ciphertext for self-describing format
        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(payload))
    }

    fn decrypt_between(
        &self,
        a: &PublicKey,
        b: &PublicKey,
        ciphertext: &str,
        scheme: Protocol,
    ) -> Result<String, SignerError> {
        let payload = STANDARD
            .decode(ciphertext)
            .map_err(|e| SignerError::MalformedPayload(e.to_string()))?;
        if payload.len() < NONCE_SIZE {
            return Err(SignerError::MalformedPayload("payload shorter than nonce".into()));
        }
        let (nonce_bytes, body) = payload.split_at(NONCE_SIZE);

        let key = self.pairwise_key(a, b, scheme)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
            .map_err(|e| SignerError::EncryptionFailed(e.to_string()))?;
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce_bytes), body)
            .map_err(|_| SignerError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|e| SignerError::MalformedPayload(e.to_string()))
    }
}

#[async_trait]
impl Signer for MockSigner {
    fn public_key(&self) -> PublicKey {
        self.public_key
    }

    async fn decrypt(
        &self,
        counterparty: &PublicKey,
        ciphertext: &str,
        scheme: Protocol,
    ) -> Result<String, SignerError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_next_decrypt.lock().unwrap().take() {
            return Err(error);
        }
        self.decrypt_between(&self.public_key, counterparty, ciphertext, scheme)
    }
}

// Don't leak the network secret in debug output
impl std::fmt::Debug for MockSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockSigner {{ public_key: {:?}, secret: [REDACTED] }}", self.public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> MockSigner {
        MockSigner::new(PublicKey::from_bytes([0xA1; 32]))
    }

    fn bob() -> MockSigner {
        MockSigner::new(PublicKey::from_bytes([0xB0; 32]))
    }

    #[tokio::test]
    async fn pairwise_roundtrip() {
        let (alice, bob) = (alice(), bob());
        let ct = alice
            .encrypt(&bob.public_key(), "hi bob", Protocol::Legacy)
            .unwrap();

        let pt = bob
            .decrypt(&alice.public_key(), &ct, Protocol::Legacy)
            .await
            .unwrap();
        assert_eq!(pt, "hi bob");
        assert_eq!(bob.decrypt_calls(), 1);
    }

    #[tokio::test]
    async fn schemes_use_separate_keys() {
        let (alice, bob) = (alice(), bob());
        let ct = alice
            .encrypt(&bob.public_key(), "hi", Protocol::Legacy)
            .unwrap();

        let result = bob.decrypt(&alice.public_key(), &ct, Protocol::Sealed).await;
        assert_eq!(result, Err(SignerError::DecryptionFailed));
    }

    #[tokio::test]
    async fn third_party_cannot_decrypt() {
        let (alice, bob) = (alice(), bob());
        let eve = MockSigner::new(PublicKey::from_bytes([0xEE; 32]));
        let ct = alice
            .encrypt(&bob.public_key(), "secret", Protocol::Legacy)
            .unwrap();

        let result = eve.decrypt(&alice.public_key(), &ct, Protocol::Legacy).await;
        assert_eq!(result, Err(SignerError::DecryptionFailed));
    }

    #[tokio::test]
    async fn other_network_secret_cannot_decrypt() {
        let alice = alice();
        let bob_elsewhere = MockSigner::with_secret(PublicKey::from_bytes([0xB0; 32]), [7u8; 32]);
        let ct = alice
            .encrypt(&bob_elsewhere.public_key(), "hi", Protocol::Legacy)
            .unwrap();

        let result = bob_elsewhere
            .decrypt(&alice.public_key(), &ct, Protocol::Legacy)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let bob = bob();
        let result = bob
            .decrypt(&PublicKey::from_bytes([1u8; 32]), "not base64!!", Protocol::Legacy)
            .await;
        assert!(matches!(result, Err(SignerError::MalformedPayload(_))));

        let short = STANDARD.encode([0u8; 4]);
        let result = bob
            .decrypt(&PublicKey::from_bytes([1u8; 32]), &short, Protocol::Legacy)
            .await;
        assert!(matches!(result, Err(SignerError::MalformedPayload(_))));
    }

    #[tokio::test]
    async fn plain_scheme_is_unsupported() {
        let bob = bob();
        let result = bob.encrypt(&PublicKey::from_bytes([1u8; 32]), "x", Protocol::Plain);
        assert_eq!(result, Err(SignerError::UnsupportedScheme(Protocol::Plain)));
    }

    #[tokio::test]
    async fn forced_decrypt_failure() {
        let (alice, bob) = (alice(), bob());
        let ct = alice
            .encrypt(&bob.public_key(), "hi", Protocol::Legacy)
            .unwrap();
        bob.fail_next_decrypt(SignerError::Unavailable("locked".into()));

        assert!(bob
            .decrypt(&alice.public_key(), &ct, Protocol::Legacy)
            .await
            .is_err());
        assert!(bob
            .decrypt(&alice.public_key(), &ct, Protocol::Legacy)
            .await
            .is_ok());
    }

    #[test]
    fn gift_wrap_produces_two_copies_with_ephemeral_authors() {
        let (alice, bob) = (alice(), bob());
        let wraps = alice.gift_wrap(&bob.public_key(), "hi", 100).unwrap();

        assert_eq!(wraps.len(), 2);
        assert_eq!(wraps[0].first_pubkey_tag(), Some(bob.public_key()));
        assert_eq!(wraps[1].first_pubkey_tag(), Some(alice.public_key()));
        assert!(wraps.iter().all(|w| w.kind == Kind::GIFT_WRAP));
        assert!(wraps.iter().all(|w| w.pubkey != alice.public_key()));
    }

    #[test]
    fn debug_is_redacted() {
        let debug = format!("{:?}", alice());
        assert!(debug.contains("REDACTED"));
    }
}
