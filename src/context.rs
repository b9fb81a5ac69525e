//! Correlation identity and the inbound message context

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of one logical saga instance
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Create a fresh, time-ordered correlation ID
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse a correlation ID from its textual form
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self)
    }

    /// Derive a correlation ID from a saga property value.
    ///
    /// The ID is name-based, so every worker maps the same
    /// `(saga_type, property, value)` triple to the same instance.
    pub fn from_property(saga_type: &str, property: &str, value: &str) -> Self {
        let name = format!("{saga_type}/{property}={value}");
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CorrelationId({})", self.0)
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message that can be routed to sagas.
pub trait Message: Clone + Send + Sync + 'static {
    /// Name used in logs, errors and commit headers
    fn message_type() -> &'static str {
        type_name_of::<Self>()
    }

    /// Accessor for a correlation ID carried directly by the message.
    ///
    /// Messages implementing [`CorrelatedBy`] return
    /// `Some(Self::correlation_id)` here.
    fn identity() -> Option<fn(&Self) -> CorrelationId> {
        None
    }
}

/// Messages that expose a stable correlation ID directly
pub trait CorrelatedBy {
    /// The saga instance this message belongs to
    fn correlation_id(&self) -> CorrelationId;
}

/// Inbound message plus the transport headers the core cares about
#[derive(Clone)]
pub struct ConsumeContext<M> {
    message: M,
    /// Transport-assigned message ID
    pub message_id: Option<String>,
    /// Request ID, when the message is part of a request/response exchange
    pub request_id: Option<String>,
    /// Correlation ID header of the triggering message
    pub correlation_id: Option<String>,
    /// Conversation ID header of the triggering message
    pub conversation_id: Option<String>,
    /// When the message was received (millis since UNIX epoch)
    pub received_at_millis: u64,
}

impl<M: Message> ConsumeContext<M> {
    /// Wrap a message with no headers
    pub fn new(message: M) -> Self {
        Self {
            message,
            message_id: None,
            request_id: None,
            correlation_id: None,
            conversation_id: None,
            received_at_millis: now_millis(),
        }
    }

    /// Set the message ID header
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Set the request ID header
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Set the correlation ID header
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the conversation ID header
    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// The message payload
    pub fn message(&self) -> &M {
        &self.message
    }

    /// Consume the context, returning the payload
    pub fn into_message(self) -> M {
        self.message
    }

    /// Name of the payload type
    pub fn message_type(&self) -> &'static str {
        M::message_type()
    }
}

impl<M: Message> std::fmt::Debug for ConsumeContext<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumeContext")
            .field("message_type", &M::message_type())
            .field("message_id", &self.message_id)
            .field("request_id", &self.request_id)
            .field("correlation_id", &self.correlation_id)
            .field("conversation_id", &self.conversation_id)
            .finish()
    }
}

/// Last path segment of a type name (`my_app::sagas::OrderSaga` -> `OrderSaga`)
pub fn type_name_of<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Current time in milliseconds since UNIX epoch
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_ids_are_stable_and_scoped_by_saga() {
        let a = CorrelationId::from_property("OrderSaga", "order_number", "A-1");
        let b = CorrelationId::from_property("OrderSaga", "order_number", "A-1");
        let other = CorrelationId::from_property("ShippingSaga", "order_number", "A-1");

        assert_eq!(a, b);
        assert_ne!(a, other);
    }

    #[test]
    fn parse_accepts_padded_uuid() {
        let id = CorrelationId::new();
        let parsed = CorrelationId::parse(&format!("  {id} "));
        assert_eq!(parsed, Some(id));
        assert_eq!(CorrelationId::parse("not-a-uuid"), None);
    }

    #[test]
    fn friendly_type_names() {
        struct OrderSaga;
        assert_eq!(type_name_of::<OrderSaga>(), "OrderSaga");
        assert_eq!(type_name_of::<Vec<u8>>(), "Vec");
    }
}
