//! Decrypted messages and their delivery status.
//!
//! A [`DecryptedMessage`] is what every timeline stores: the received (or
//! locally synthesized) event, its plaintext, and where it stands in the
//! send lifecycle. The lifecycle is an explicit tagged union
//! ([`DeliveryStatus`]) driven by [`DeliveryStatus::on_event`].

use relaychat_types::{EventId, Kind, PublicKey, RawEvent, Tag, UnsignedEvent};
use serde::{Deserialize, Serialize};

/// Whether a message was authored by the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Authored by the local user.
    Sent,
    /// Authored by someone else.
    Received,
}

impl Direction {
    /// Direction of an event authored by `author`, seen by `me`.
    pub fn of(author: &PublicKey, me: &PublicKey) -> Self {
        if author == me {
            Self::Sent
        } else {
            Self::Received
        }
    }
}

/// Which protocol variant produced the plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Legacy pairwise scheme (kind 4).
    Legacy,
    /// Sealed gift-wrap scheme (kind 1059).
    Sealed,
    /// Unencrypted community channel message.
    Plain,
}

impl Protocol {
    /// Protocol implied by an event kind, if it is a message kind at all.
    pub fn for_kind(kind: Kind) -> Option<Self> {
        match kind {
            k if k == Kind::LEGACY_DM => Some(Self::Legacy),
            k if k == Kind::GIFT_WRAP || k == Kind::PRIVATE_DM => Some(Self::Sealed),
            k if k == Kind::CHANNEL_MESSAGE => Some(Self::Plain),
            _ => None,
        }
    }

    /// Kind used when synthesizing an optimistic message for this protocol.
    pub fn message_kind(&self) -> Kind {
        match self {
            Self::Legacy => Kind::LEGACY_DM,
            Self::Sealed => Kind::PRIVATE_DM,
            Self::Plain => Kind::CHANNEL_MESSAGE,
        }
    }
}

/// Send lifecycle of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Shown locally, not yet seen on the network.
    Optimistic,
    /// Seen on the network (or received from someone else).
    Confirmed,
    /// Publishing was rejected or never confirmed in time.
    Failed {
        /// Why the send was abandoned.
        reason: String,
    },
}

/// Inputs that move a message through its send lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// A matching network event arrived.
    Confirmed,
    /// The publisher rejected the event.
    Rejected {
        /// Reason reported by the publisher.
        reason: String,
    },
    /// No confirmation within the optimistic timeout.
    TimedOut,
    /// The user asked to send again.
    Retried,
}

impl DeliveryStatus {
    /// Transition function. Invalid transitions keep the current status.
    pub fn on_event(self, event: DeliveryEvent) -> Self {
        match (self, event) {
            (Self::Optimistic, DeliveryEvent::Confirmed) => Self::Confirmed,
            (Self::Optimistic, DeliveryEvent::Rejected { reason }) => Self::Failed { reason },
            (Self::Optimistic, DeliveryEvent::TimedOut) => Self::Failed {
                reason: "not confirmed in time".into(),
            },

            // A late confirmation still proves delivery.
            (Self::Failed { .. }, DeliveryEvent::Confirmed) => Self::Confirmed,
            (Self::Failed { .. }, DeliveryEvent::Retried) => Self::Optimistic,

            (status, _) => status,
        }
    }

    /// True until the network has confirmed the message.
    pub fn is_pending(&self) -> bool {
        !matches!(self, Self::Confirmed)
    }

    /// True for optimistic entries.
    pub fn is_optimistic(&self) -> bool {
        matches!(self, Self::Optimistic)
    }

    /// True for failed entries.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// A message with its plaintext, as stored in a timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedMessage {
    /// The underlying event. For sealed messages this is the inner rumor.
    pub event: RawEvent,
    /// Decrypted (or plain) text.
    pub plaintext: String,
    /// Sent or received, relative to the local user.
    pub direction: Direction,
    /// Send lifecycle.
    pub status: DeliveryStatus,
    /// Local wall-clock time (ms) the message was first displayed.
    pub first_seen_at_ms: u64,
    /// Protocol variant that produced the plaintext.
    pub protocol: Protocol,
}

impl DecryptedMessage {
    /// A network-confirmed message.
    pub fn confirmed(
        event: RawEvent,
        plaintext: String,
        protocol: Protocol,
        me: &PublicKey,
        now_ms: u64,
    ) -> Self {
        let direction = Direction::of(&event.pubkey, me);
        Self {
            event,
            plaintext,
            direction,
            status: DeliveryStatus::Confirmed,
            first_seen_at_ms: now_ms,
            protocol,
        }
    }

    /// A plaintext community message: the content is the plaintext.
    pub fn plain(event: RawEvent, me: &PublicKey, now_ms: u64) -> Self {
        let plaintext = event.content.clone();
        Self::confirmed(event, plaintext, Protocol::Plain, me, now_ms)
    }

    /// A locally synthesized message shown before network confirmation.
    ///
    /// It gets a random placeholder id and no signature; the confirmed
    /// event replaces both on promotion.
    pub fn optimistic(
        author: PublicKey,
        tags: Vec<Tag>,
        plaintext: impl Into<String>,
        protocol: Protocol,
        created_at: u64,
        now_ms: u64,
    ) -> Self {
        let plaintext = plaintext.into();
        let mut rumor = UnsignedEvent::new(
            author,
            protocol.message_kind(),
            created_at,
            tags,
            plaintext.clone(),
        );
        rumor.id = Some(EventId::random());
        Self {
            event: rumor.into_raw(String::new()),
            plaintext,
            direction: Direction::Sent,
            status: DeliveryStatus::Optimistic,
            first_seen_at_ms: now_ms,
            protocol,
        }
    }

    /// Event id.
    pub fn id(&self) -> EventId {
        self.event.id
    }

    /// Author key.
    pub fn author(&self) -> &PublicKey {
        &self.event.pubkey
    }

    /// Creation time, unix seconds.
    pub fn created_at(&self) -> u64 {
        self.event.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimistic_confirms() {
        let status = DeliveryStatus::Optimistic.on_event(DeliveryEvent::Confirmed);
        assert_eq!(status, DeliveryStatus::Confirmed);
    }

    #[test]
    fn optimistic_rejected_fails_with_reason() {
        let status = DeliveryStatus::Optimistic.on_event(DeliveryEvent::Rejected {
            reason: "blocked".into(),
        });
        assert_eq!(
            status,
            DeliveryStatus::Failed {
                reason: "blocked".into()
            }
        );
    }

    #[test]
    fn timed_out_then_retried_is_optimistic_again() {
        let status = DeliveryStatus::Optimistic
            .on_event(DeliveryEvent::TimedOut)
            .on_event(DeliveryEvent::Retried);
        assert!(status.is_optimistic());
    }

    #[test]
    fn confirmed_is_terminal() {
        let status = DeliveryStatus::Confirmed
            .on_event(DeliveryEvent::TimedOut)
            .on_event(DeliveryEvent::Rejected {
                reason: "late".into(),
            });
        assert_eq!(status, DeliveryStatus::Confirmed);
    }

    #[test]
    fn late_confirmation_rescues_failed_message() {
        let status = DeliveryStatus::Failed {
            reason: "timeout".into(),
        }
        .on_event(DeliveryEvent::Confirmed);
        assert_eq!(status, DeliveryStatus::Confirmed);
    }

    #[test]
    fn optimistic_message_uses_protocol_kind() {
        let me = PublicKey::from_bytes([1u8; 32]);
        let msg = DecryptedMessage::optimistic(me, vec![], "hi", Protocol::Sealed, 1000, 5);

        assert_eq!(msg.event.kind, Kind::PRIVATE_DM);
        assert_eq!(msg.direction, Direction::Sent);
        assert_eq!(msg.first_seen_at_ms, 5);
        assert!(msg.event.sig.is_empty());
    }

    #[test]
    fn plain_message_direction_follows_author() {
        let me = PublicKey::from_bytes([1u8; 32]);
        let other = PublicKey::from_bytes([2u8; 32]);
        let event = UnsignedEvent::new(other, Kind::CHANNEL_MESSAGE, 1, vec![], "yo").into_raw("s");

        let msg = DecryptedMessage::plain(event, &me, 0);
        assert_eq!(msg.direction, Direction::Received);
        assert_eq!(msg.plaintext, "yo");
        assert_eq!(msg.protocol, Protocol::Plain);
    }

    #[test]
    fn protocol_for_kind() {
        assert_eq!(Protocol::for_kind(Kind::LEGACY_DM), Some(Protocol::Legacy));
        assert_eq!(Protocol::for_kind(Kind::GIFT_WRAP), Some(Protocol::Sealed));
        assert_eq!(Protocol::for_kind(Kind::COMMUNITY), None);
    }
}
