//! Run-time contract of a saga state machine

use crate::{BoxError, ConsumeContext, Message, PropertyCorrelation, SagaInstance};

/// State of an event-sourced saga.
///
/// The state only knows transition semantics. Persistence, commit IDs and
/// policies live in the repository.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Debug, Default, PartialEq)]
/// struct OrderSaga { status: OrderStatus, items: Vec<String> }
///
/// impl SagaStateMachine for OrderSaga {
///     const SAGA_TYPE: &'static str = "OrderSaga";
///     type Event = OrderEvent;
///
///     fn apply(&mut self, event: &OrderEvent) {
///         match event {
///             OrderEvent::Placed { item } => self.items.push(item.clone()),
///             OrderEvent::Shipped => self.status = OrderStatus::Shipped,
///         }
///     }
///
///     fn is_completed(&self) -> bool { self.status == OrderStatus::Shipped }
/// }
/// ```
pub trait SagaStateMachine: Clone + Default + std::fmt::Debug + Send + Sync + 'static {
    /// Saga type name used in logs, errors and commit headers
    const SAGA_TYPE: &'static str;

    /// Domain event recorded in the saga's event stream
    type Event: Clone + std::fmt::Debug + Send + Sync + 'static;

    /// Apply one event.
    ///
    /// Must be deterministic and side-effect free: replaying the same event
    /// sequence from the default state always reaches the same state.
    fn apply(&mut self, event: &Self::Event);

    /// Whether the saga reached a final state
    fn is_completed(&self) -> bool {
        false
    }
}

/// Lifecycle states in which a saga accepts a message type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventAcceptance {
    /// Only starts new instances
    Initiates,
    /// Only applies to existing instances
    Continues,
    /// Starts a new instance or applies to an existing one
    InitiatesOrContinues,
}

impl EventAcceptance {
    /// Whether a missing instance may be created
    pub fn can_create(&self) -> bool {
        matches!(self, Self::Initiates | Self::InitiatesOrContinues)
    }

    /// Whether an existing instance may be used
    pub fn can_use_existing(&self) -> bool {
        matches!(self, Self::Continues | Self::InitiatesOrContinues)
    }
}

/// Binds a message type to a saga state machine.
///
/// Implemented once per (saga, message) pair. Correlation is resolved from
/// [`SagaEvent::correlation`] first and [`Message::identity`] second when
/// the worker connector is wired.
pub trait SagaEvent<M: Message>: SagaStateMachine {
    /// When this message applies
    fn acceptance() -> EventAcceptance;

    /// Property-equality correlation rule, if the saga correlates on a
    /// message property rather than a carried correlation ID
    fn correlation() -> Option<PropertyCorrelation<M>> {
        None
    }

    /// Whether the current state handles this message
    fn accepts(&self) -> bool {
        true
    }

    /// Handle the message, raising events on the instance
    fn handle(instance: &mut SagaInstance<Self>, context: &ConsumeContext<M>)
        -> Result<(), BoxError>;
}
