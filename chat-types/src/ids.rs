//! Identity types for relay events.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

fn decode_32(hex_str: &str) -> Result<[u8; 32], TypesError> {
    let bytes = hex::decode(hex_str)?;
    if bytes.len() != 32 {
        return Err(TypesError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

fn random_32() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    bytes
}

/// The id of an event: sha256 of its canonical serialization.
///
/// Displayed as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId([u8; 32]);

impl EventId {
    /// Create an EventId from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse an EventId from 64 hex characters.
    pub fn from_hex(hex_str: &str) -> Result<Self, TypesError> {
        decode_32(hex_str).map(Self)
    }

    /// Create a random EventId.
    ///
    /// Used as a placeholder id for optimistic local sends until the
    /// network-confirmed event replaces it.
    pub fn random() -> Self {
        Self(random_32())
    }

    /// Get the raw bytes of this EventId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", &self.to_hex()[..8])
    }
}

impl FromStr for EventId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// An author or recipient key (x-only public key).
///
/// The engine only ever handles public keys; secret material stays with the
/// signer collaborator.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Create a PublicKey from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a PublicKey from 64 hex characters.
    pub fn from_hex(hex_str: &str) -> Result<Self, TypesError> {
        decode_32(hex_str).map(Self)
    }

    /// Create a random PublicKey (for testing and ephemeral wrappers).
    pub fn random() -> Self {
        Self(random_32())
    }

    /// Get the raw bytes of this PublicKey.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_hex()[..8])
    }
}

impl FromStr for PublicKey {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_hex_display() {
        let id = EventId::random();
        assert_eq!(id.to_string().len(), 64);
        assert_eq!(EventId::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn event_id_from_invalid_length_fails() {
        let result = EventId::from_hex("abcd");
        assert!(matches!(
            result,
            Err(TypesError::InvalidLength {
                expected: 32,
                actual: 2
            })
        ));
    }

    #[test]
    fn public_key_rejects_non_hex() {
        let result = PublicKey::from_hex(&"zz".repeat(32));
        assert!(matches!(result, Err(TypesError::InvalidHex(_))));
    }

    #[test]
    fn public_key_serializes_as_hex_string() {
        let key = PublicKey::from_bytes([7u8; 32]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", "07".repeat(32)));

        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn debug_output_is_abbreviated() {
        let key = PublicKey::from_bytes([0xab; 32]);
        assert_eq!(format!("{:?}", key), "PublicKey(abababab)");
    }

    #[test]
    fn random_keys_differ() {
        assert_ne!(PublicKey::random(), PublicKey::random());
    }
}
