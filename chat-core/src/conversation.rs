//! Direct-message conversation state.

use relaychat_types::PublicKey;
use serde::{Deserialize, Serialize};

use crate::message::{DecryptedMessage, Direction, Protocol};
use crate::reconcile::{ReduceContext, TimelineEffect, TimelineEvent};
use crate::timeline::Timeline;

/// Which encryption schemes a counterparty has been seen using.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSupport {
    /// Counterparty sent legacy (kind 4) messages.
    pub legacy: bool,
    /// Counterparty sent sealed (kind 1059) messages.
    pub sealed: bool,
}

impl ProtocolSupport {
    fn observe(&mut self, message: &DecryptedMessage) {
        if message.direction != Direction::Received {
            return;
        }
        match message.protocol {
            Protocol::Legacy => self.legacy = true,
            Protocol::Sealed => self.sealed = true,
            Protocol::Plain => {}
        }
    }
}

/// One direct-message conversation with a counterparty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    /// The other participant.
    pub counterparty: PublicKey,
    /// Ordered messages and pagination state.
    pub timeline: Timeline,
    /// Schemes the counterparty has used.
    pub protocols: ProtocolSupport,
    /// Newest `created_at` in the conversation.
    pub last_activity: Option<u64>,
}

impl ConversationState {
    /// Empty conversation.
    pub fn new(counterparty: PublicKey) -> Self {
        Self {
            counterparty,
            timeline: Timeline::new(),
            protocols: ProtocolSupport::default(),
            last_activity: None,
        }
    }

    /// Apply a timeline event to this conversation.
    pub fn apply(self, event: TimelineEvent, ctx: &ReduceContext) -> (Self, Vec<TimelineEffect>) {
        let mut protocols = self.protocols;
        match &event {
            TimelineEvent::Live(message) => protocols.observe(message),
            TimelineEvent::OlderPage { messages, .. } => {
                messages.iter().for_each(|m| protocols.observe(m))
            }
            _ => {}
        }

        let (timeline, effects) = self.timeline.apply(event, ctx);
        let last_activity = timeline.last_activity();
        (
            Self {
                counterparty: self.counterparty,
                timeline,
                protocols,
                last_activity,
            },
            effects,
        )
    }

    /// Scheme to use when sending to this counterparty.
    ///
    /// Sealed unless the counterparty has only ever used the legacy scheme.
    pub fn preferred_protocol(&self) -> Protocol {
        if self.protocols.legacy && !self.protocols.sealed {
            Protocol::Legacy
        } else {
            Protocol::Sealed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::tests::{me, peer};
    use crate::timeline::SourcePage;
    use relaychat_types::{Kind, UnsignedEvent};

    fn received(protocol: Protocol, created_at: u64) -> DecryptedMessage {
        let kind = protocol.message_kind();
        let event = UnsignedEvent::new(peer(), kind, created_at, vec![], "x").into_raw("sig");
        DecryptedMessage::confirmed(event, "x".into(), protocol, &me(), 0)
    }

    #[test]
    fn new_conversation_prefers_sealed() {
        let conversation = ConversationState::new(peer());
        assert_eq!(conversation.preferred_protocol(), Protocol::Sealed);
        assert!(conversation.last_activity.is_none());
    }

    #[test]
    fn legacy_only_counterparty_gets_legacy() {
        let (conversation, _) = ConversationState::new(peer()).apply(
            TimelineEvent::Live(received(Protocol::Legacy, 10)),
            &ReduceContext::at(0),
        );
        assert_eq!(conversation.preferred_protocol(), Protocol::Legacy);

        let (conversation, _) = conversation.apply(
            TimelineEvent::Live(received(Protocol::Sealed, 11)),
            &ReduceContext::at(0),
        );
        assert_eq!(conversation.preferred_protocol(), Protocol::Sealed);
    }

    #[test]
    fn own_messages_do_not_change_support() {
        let event =
            UnsignedEvent::new(me(), Kind::LEGACY_DM, 10, vec![], "x").into_raw("sig");
        let mine = DecryptedMessage::confirmed(event, "x".into(), Protocol::Legacy, &me(), 0);

        let (conversation, _) = ConversationState::new(peer())
            .apply(TimelineEvent::Live(mine), &ReduceContext::at(0));

        assert_eq!(conversation.protocols, ProtocolSupport::default());
    }

    #[test]
    fn last_activity_follows_newest() {
        let ctx = ReduceContext::at(0);
        let (conversation, _) = ConversationState::new(peer())
            .apply(TimelineEvent::Live(received(Protocol::Sealed, 30)), &ctx);
        let (conversation, _) = conversation.apply(
            TimelineEvent::OlderPage {
                messages: vec![received(Protocol::Sealed, 10)],
                sources: vec![SourcePage { fetched: 1, oldest: Some(10) }],
                page_size: 50,
            },
            &ctx,
        );

        assert_eq!(conversation.last_activity, Some(30));
        assert_eq!(conversation.timeline.len(), 2);
        assert!(conversation.timeline.reached_start());
    }
}
