//! Change Bus: channel-scoped publish/subscribe for mutation and UI events.
//!
//! Every connected session subscribes to the same channel and receives every
//! envelope published on it, including the ones describing its own writes.
//! Mutation kinds carry no sender exclusion; sessions filter their own echoes
//! with an echo guard. A few UI-only kinds accept an `exclude_session` hint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::entity::EntityRow;
use crate::ids::{EntityId, EventId, SessionId};

pub const DEFAULT_CHANNEL: &str = "stickies";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BusEvent {
    /// A row was inserted (including raw inserts used for materialization).
    EntityCreated { row: EntityRow },
    /// A row was updated; carries the full row after the update.
    EntityUpdated { row: EntityRow },
    EntityDeleted { id: EntityId },
    /// A bulk automation run started; sessions show a banner.
    AutomationModeStarted { message: String },
    /// The automation run finished; sessions resync.
    AutomationModeEnded,
    /// Deep-link push to other devices. UI-only.
    Navigate {
        folder: Option<String>,
        note_id: Option<EntityId>,
    },
}

impl BusEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            BusEvent::EntityCreated { .. } => "entity-created",
            BusEvent::EntityUpdated { .. } => "entity-updated",
            BusEvent::EntityDeleted { .. } => "entity-deleted",
            BusEvent::AutomationModeStarted { .. } => "automation-mode-started",
            BusEvent::AutomationModeEnded => "automation-mode-ended",
            BusEvent::Navigate { .. } => "navigate",
        }
    }

    /// Whether the exclude-this-session hint is honoured for this kind.
    pub fn allows_exclusion(&self) -> bool {
        matches!(self, BusEvent::Navigate { .. })
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            BusEvent::EntityCreated { row } | BusEvent::EntityUpdated { row } => Some(row.id),
            BusEvent::EntityDeleted { id } => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub event_id: EventId,
    pub channel: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_session: Option<SessionId>,
    pub event: BusEvent,
}

impl Envelope {
    pub fn new(channel: &str, event: BusEvent) -> Self {
        Self {
            event_id: EventId::new(),
            channel: channel.to_string(),
            occurred_at: Utc::now(),
            exclude_session: None,
            event,
        }
    }

    /// True when this envelope is addressed away from `session`.
    pub fn excludes(&self, session: SessionId) -> bool {
        self.event.allows_exclusion() && self.exclude_session == Some(session)
    }
}

/// Broadcast-backed bus. Cloning yields another handle to the same channel.
/// Receivers that fall behind get `Lagged` and must resync.
#[derive(Clone)]
pub struct ChangeBus {
    channel: String,
    tx: broadcast::Sender<Envelope>,
}

impl ChangeBus {
    pub fn new(channel: &str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            channel: channel.to_string(),
            tx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn publish(&self, event: BusEvent) {
        self.send(Envelope::new(&self.channel, event));
    }

    /// Publish with the exclude-this-session hint. The hint is dropped for kinds
    /// that do not honour it.
    pub fn publish_excluding(&self, event: BusEvent, session: SessionId) {
        let mut envelope = Envelope::new(&self.channel, event);
        if envelope.event.allows_exclusion() {
            envelope.exclude_session = Some(session);
        } else {
            tracing::debug!(
                event_type = envelope.event.event_type(),
                "exclusion hint ignored for mutation event"
            );
        }
        self.send(envelope);
    }

    fn send(&self, envelope: Envelope) {
        tracing::debug!(
            channel = %self.channel,
            event_type = envelope.event.event_type(),
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "bus publish"
        );
        // No subscribers is not an error.
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL, 256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = ChangeBus::new("test", 16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(BusEvent::AutomationModeEnded);

        let ea = a.recv().await.unwrap();
        let eb = b.recv().await.unwrap();
        assert_eq!(ea.event_id, eb.event_id);
        assert_eq!(ea.channel, "test");
        assert_eq!(ea.event.event_type(), "automation-mode-ended");
    }

    #[tokio::test]
    async fn publish_order_is_preserved() {
        let bus = ChangeBus::default();
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(BusEvent::AutomationModeStarted {
                message: i.to_string(),
            });
        }
        for i in 0..5 {
            match rx.recv().await.unwrap().event {
                BusEvent::AutomationModeStarted { message } => assert_eq!(message, i.to_string()),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn exclusion_only_for_ui_kinds() {
        let bus = ChangeBus::default();
        let mut rx = bus.subscribe();
        let me = SessionId::new();

        bus.publish_excluding(
            BusEvent::Navigate {
                folder: Some("Work".into()),
                note_id: None,
            },
            me,
        );
        bus.publish_excluding(BusEvent::EntityDeleted { id: EntityId::new() }, me);

        let nav = rx.try_recv().unwrap();
        assert!(nav.excludes(me));
        assert!(!nav.excludes(SessionId::new()));

        let deleted = rx.try_recv().unwrap();
        assert_eq!(deleted.exclude_session, None);
        assert!(!deleted.excludes(me));
    }

    #[test]
    fn no_subscribers_is_fine() {
        let bus = ChangeBus::default();
        bus.publish(BusEvent::AutomationModeEnded);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn envelope_json_is_tagged() {
        let env = Envelope::new("stickies", BusEvent::AutomationModeEnded);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["event"]["type"], "automation-mode-ended");
        assert!(json.get("exclude_session").is_none());
    }
}
