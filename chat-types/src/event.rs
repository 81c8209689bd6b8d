//! Relay events, kinds and tags.
//!
//! A [`RawEvent`] is what the transport hands us: signed, immutable, and
//! never mutated after receipt. An [`UnsignedEvent`] is the inner "rumor" of a
//! sealed direct message; it carries no signature and its id may have to be
//! computed locally.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{EventId, PublicKey, TypesError};

/// Numeric discriminator of event semantics.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(u16);

impl Kind {
    /// Deletion request (`e` targets, `k` deleted kinds).
    pub const DELETION: Kind = Kind(5);
    /// Legacy pairwise-encrypted direct message.
    pub const LEGACY_DM: Kind = Kind(4);
    /// Community channel chat message.
    pub const CHANNEL_MESSAGE: Kind = Kind(9);
    /// Seal: signed middle layer of a sealed direct message.
    pub const SEAL: Kind = Kind(13);
    /// Rumor: unsigned inner chat message of a sealed direct message.
    pub const PRIVATE_DM: Kind = Kind(14);
    /// Gift wrap: outer layer of a sealed direct message.
    pub const GIFT_WRAP: Kind = Kind(1059);
    /// Request to join a community.
    pub const JOIN_REQUEST: Kind = Kind(4552);
    /// Community definition (addressable).
    pub const COMMUNITY: Kind = Kind(34550);
    /// Channel definition inside a community (addressable).
    pub const CHANNEL: Kind = Kind(34551);
    /// Space (channel grouping) definition inside a community (addressable).
    pub const SPACE: Kind = Kind(34552);
    /// Membership list (approved / declined / banned) for a community.
    pub const MEMBER_LIST: Kind = Kind(34553);

    /// Create a Kind from its numeric value.
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the numeric value.
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// True for the two encrypted direct-message kinds.
    pub fn is_direct_message(&self) -> bool {
        *self == Self::LEGACY_DM || *self == Self::GIFT_WRAP
    }

    /// True for addressable kinds (identified by kind, author and `d` tag).
    pub fn is_addressable(&self) -> bool {
        (30000..40000).contains(&self.0)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kind({})", self.0)
    }
}

/// A labelled array on an event: `["p", "<hex>", ...]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(Vec<String>);

impl Tag {
    /// Create a tag from its parts.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// `["p", <pubkey>]` recipient / mention tag.
    pub fn pubkey(key: &PublicKey) -> Self {
        Self::new(["p".to_string(), key.to_hex()])
    }

    /// `["e", <id>]` event reference tag.
    pub fn event(id: &EventId) -> Self {
        Self::new(["e".to_string(), id.to_hex()])
    }

    /// `["a", <kind:pubkey:d>]` addressable reference tag.
    pub fn coordinate(coordinate: &str) -> Self {
        Self::new(["a", coordinate])
    }

    /// `["d", <identifier>]` tag of addressable events.
    pub fn identifier(value: &str) -> Self {
        Self::new(["d", value])
    }

    /// `["k", <kind>]` deleted-kind tag.
    pub fn kind(kind: Kind) -> Self {
        Self::new(["k".to_string(), kind.to_string()])
    }

    /// The tag name (first element).
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// The tag value (second element).
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    /// All elements.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// A signed, immutable relay event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Event id.
    pub id: EventId,
    /// Author key.
    pub pubkey: PublicKey,
    /// Event kind.
    pub kind: Kind,
    /// Creation time, unix seconds.
    pub created_at: u64,
    /// Tags.
    pub tags: Vec<Tag>,
    /// Content (ciphertext for direct messages, plaintext otherwise).
    pub content: String,
    /// Signature, hex. Verified upstream, carried opaquely here.
    pub sig: String,
}

impl RawEvent {
    /// Parse an event from JSON.
    pub fn from_json(json: &str) -> Result<Self, TypesError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the event to JSON.
    pub fn to_json(&self) -> Result<String, TypesError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Values of every tag named `name`.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.name() == Some(name))
            .filter_map(Tag::value)
    }

    /// Value of the first tag named `name`.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .filter(|t| t.name() == Some(name))
            .find_map(Tag::value)
    }

    /// First well-formed `p` tag.
    pub fn first_pubkey_tag(&self) -> Option<PublicKey> {
        self.tag_values("p")
            .find_map(|v| PublicKey::from_hex(v).ok())
    }

    /// Every well-formed `p` tag.
    pub fn pubkey_tags(&self) -> Vec<PublicKey> {
        self.tag_values("p")
            .filter_map(|v| PublicKey::from_hex(v).ok())
            .collect()
    }

    /// Every well-formed `e` tag.
    pub fn event_tags(&self) -> Vec<EventId> {
        self.tag_values("e")
            .filter_map(|v| EventId::from_hex(v).ok())
            .collect()
    }

    /// The `d` identifier of an addressable event.
    pub fn identifier(&self) -> Option<&str> {
        self.first_tag_value("d")
    }

    /// `kind:pubkey:d` coordinate for addressable events.
    pub fn coordinate(&self) -> Option<String> {
        if !self.kind.is_addressable() {
            return None;
        }
        let d = self.identifier().unwrap_or("");
        Some(format!("{}:{}:{}", self.kind, self.pubkey, d))
    }
}

/// An unsigned event, as found inside a seal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    /// Event id, when the producer included it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EventId>,
    /// Author key.
    pub pubkey: PublicKey,
    /// Event kind.
    pub kind: Kind,
    /// Creation time, unix seconds.
    pub created_at: u64,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Content.
    pub content: String,
}

impl UnsignedEvent {
    /// Create an unsigned event without id.
    pub fn new(
        pubkey: PublicKey,
        kind: Kind,
        created_at: u64,
        tags: Vec<Tag>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            pubkey,
            kind,
            created_at,
            tags,
            content: content.into(),
        }
    }

    /// Compute the id from the canonical serialization
    /// `[0, pubkey, created_at, kind, tags, content]`.
    pub fn compute_id(&self) -> EventId {
        let canonical = serde_json::json!([
            0,
            self.pubkey.to_hex(),
            self.created_at,
            self.kind.as_u16(),
            self.tags,
            self.content,
        ]);
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        EventId::from_bytes(bytes)
    }

    /// The declared id, or the computed one when absent.
    pub fn id_or_compute(&self) -> EventId {
        self.id.unwrap_or_else(|| self.compute_id())
    }

    /// Attach a signature produced elsewhere, yielding a [`RawEvent`].
    pub fn into_raw(self, sig: impl Into<String>) -> RawEvent {
        let id = self.id_or_compute();
        RawEvent {
            id,
            pubkey: self.pubkey,
            kind: self.kind,
            created_at: self.created_at,
            tags: self.tags,
            content: self.content,
            sig: sig.into(),
        }
    }

    /// First well-formed `p` tag.
    pub fn first_pubkey_tag(&self) -> Option<PublicKey> {
        self.tags
            .iter()
            .filter(|t| t.name() == Some("p"))
            .filter_map(Tag::value)
            .find_map(|v| PublicKey::from_hex(v).ok())
    }
}
