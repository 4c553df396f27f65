//! Typed message envelopes carried over the bus.
//!
//! Two envelope kinds exist: [`UserMessage`] for user-originated traffic in
//! either direction, and [`TransportEvent`] for the asynchronous delivery
//! events (acks, nacks, delivery reports) a transport emits about an
//! outbound message. Both cross the bus as JSON objects.
//!
//! Envelopes are immutable in spirit. The only sanctioned mutation is
//! [`UserMessage::set_transport_name`] / [`TransportEvent::set_transport_name`],
//! used by routers that remap the endpoint of origin before publishing.
//! Fanning one inbound message out to several applications always goes
//! through `Clone`, so each destination gets a structurally independent
//! envelope and middleware side effects cannot collide.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Unique identifier for a user message or event, assigned on creation.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Session lifecycle marker on a user message. Plain messages carry none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    New,
    Resume,
    Close,
}

/// A user message envelope, flowing transport -> applications (inbound) or
/// applications -> transport (outbound).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    /// Endpoint of origin at the point of observation. Routers may rewrite
    /// this before publishing.
    pub transport_name: String,
    pub message_id: MessageId,
    pub to_addr: String,
    pub from_addr: String,
    /// Message body. May be absent or empty (e.g. session notifications).
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub session_event: Option<SessionEvent>,
    #[serde(default)]
    pub group: Option<String>,
    /// Bearer kind, e.g. `"sms"` or `"xmpp"`.
    #[serde(default)]
    pub transport_type: String,
    /// Open mapping for transport-specific extras.
    #[serde(default)]
    pub transport_metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl UserMessage {
    /// Creates a message with a fresh [`MessageId`] and current timestamp.
    #[must_use]
    pub fn new(
        transport_name: impl Into<String>,
        to_addr: impl Into<String>,
        from_addr: impl Into<String>,
        content: Option<String>,
    ) -> Self {
        Self {
            transport_name: transport_name.into(),
            message_id: MessageId::generate(),
            to_addr: to_addr.into(),
            from_addr: from_addr.into(),
            content,
            session_event: None,
            group: None,
            transport_type: String::new(),
            transport_metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Stable per-user key for this message. Inbound traffic is keyed by
    /// the sender's address.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.from_addr
    }

    /// Remaps the endpoint of origin. Only routers call this, and only
    /// before publishing.
    pub fn set_transport_name(&mut self, name: impl Into<String>) {
        self.transport_name = name.into();
    }
}

/// Kind of delivery event a transport emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Ack,
    Nack,
    DeliveryReport,
}

/// Delivery outcome reported by a [`EventType::DeliveryReport`] event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Failed,
    Delivered,
}

/// A delivery event envelope, flowing transport -> applications. It refers
/// back to the outbound [`UserMessage`] it reports on via
/// [`user_message_id`](TransportEvent::user_message_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportEvent {
    pub event_id: MessageId,
    pub event_type: EventType,
    /// The outbound message this event refers to.
    pub user_message_id: MessageId,
    pub transport_name: String,
    /// Transport-assigned identifier, present on acks.
    #[serde(default)]
    pub sent_message_id: Option<String>,
    /// Rejection reason, present on nacks.
    #[serde(default)]
    pub nack_reason: Option<String>,
    /// Delivery outcome, present on delivery reports.
    #[serde(default)]
    pub delivery_status: Option<DeliveryStatus>,
    #[serde(default)]
    pub transport_metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl TransportEvent {
    fn new(event_type: EventType, user_message_id: MessageId, transport_name: String) -> Self {
        Self {
            event_id: MessageId::generate(),
            event_type,
            user_message_id,
            transport_name,
            sent_message_id: None,
            nack_reason: None,
            delivery_status: None,
            transport_metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Builds an acknowledgement for a sent message.
    #[must_use]
    pub fn ack(
        user_message_id: MessageId,
        transport_name: impl Into<String>,
        sent_message_id: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(EventType::Ack, user_message_id, transport_name.into());
        event.sent_message_id = Some(sent_message_id.into());
        event
    }

    /// Builds a rejection for a message the transport refused to send.
    #[must_use]
    pub fn nack(
        user_message_id: MessageId,
        transport_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(EventType::Nack, user_message_id, transport_name.into());
        event.nack_reason = Some(reason.into());
        event
    }

    /// Builds a delivery report for a previously acknowledged message.
    #[must_use]
    pub fn delivery_report(
        user_message_id: MessageId,
        transport_name: impl Into<String>,
        status: DeliveryStatus,
    ) -> Self {
        let mut event = Self::new(
            EventType::DeliveryReport,
            user_message_id,
            transport_name.into(),
        );
        event.delivery_status = Some(status);
        event
    }

    /// Remaps the endpoint of origin. Only routers call this.
    pub fn set_transport_name(&mut self, name: impl Into<String>) {
        self.transport_name = name.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_messages_get_distinct_ids() {
        let a = UserMessage::new("sms_in", "+100", "+200", Some("hi".into()));
        let b = UserMessage::new("sms_in", "+100", "+200", Some("hi".into()));
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn user_key_is_from_addr() {
        let msg = UserMessage::new("sms_in", "+100", "+27831234567", None);
        assert_eq!(msg.user(), "+27831234567");
    }

    #[test]
    fn clone_is_structurally_independent() {
        let original = UserMessage::new("sms_in", "+100", "+200", Some("hi".into()));
        let mut copy = original.clone();
        assert_eq!(original, copy);

        copy.set_transport_name("appA");
        copy.transport_metadata
            .insert("tag".into(), Value::String("a".into()));
        assert_eq!(original.transport_name, "sms_in");
        assert!(original.transport_metadata.is_empty());
    }

    #[test]
    fn envelope_round_trips_as_json() {
        let mut msg = UserMessage::new("sms_in", "+100", "+200", Some("hello".into()));
        msg.session_event = Some(SessionEvent::Resume);
        msg.transport_type = "sms".into();

        let encoded = serde_json::to_vec(&msg).expect("encode");
        let decoded: UserMessage = serde_json::from_slice(&encoded).expect("decode");
        assert_eq!(msg, decoded);

        let value: Value = serde_json::from_slice(&encoded).expect("value");
        assert_eq!(value["session_event"], Value::String("resume".into()));
        assert_eq!(value["transport_name"], Value::String("sms_in".into()));
    }

    #[test]
    fn event_constructors_set_per_type_fields() {
        let id = MessageId::generate();

        let ack = TransportEvent::ack(id, "smpp", "ext-1");
        assert_eq!(ack.event_type, EventType::Ack);
        assert_eq!(ack.sent_message_id.as_deref(), Some("ext-1"));
        assert_eq!(ack.user_message_id, id);

        let nack = TransportEvent::nack(id, "smpp", "no credit");
        assert_eq!(nack.event_type, EventType::Nack);
        assert_eq!(nack.nack_reason.as_deref(), Some("no credit"));

        let report = TransportEvent::delivery_report(id, "smpp", DeliveryStatus::Delivered);
        assert_eq!(report.event_type, EventType::DeliveryReport);
        assert_eq!(report.delivery_status, Some(DeliveryStatus::Delivered));
    }

    #[test]
    fn event_type_uses_snake_case_on_the_wire() {
        let report = TransportEvent::delivery_report(
            MessageId::generate(),
            "smpp",
            DeliveryStatus::Pending,
        );
        let value = serde_json::to_value(&report).expect("encode");
        assert_eq!(value["event_type"], Value::String("delivery_report".into()));
        assert_eq!(value["delivery_status"], Value::String("pending".into()));
    }
}
