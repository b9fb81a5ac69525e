//! Saga policies: may a message create, reuse or release an instance

use crate::{
    ConsumeContext, CorrelationId, EventAcceptance, Message, SagaInstance, SagaStateMachine,
};

/// Pure decision function evaluated for each inbound message.
///
/// Policies have no side effects and may be evaluated any number of times.
pub trait SagaPolicy<S: SagaStateMachine, M: Message>: Send + Sync + 'static {
    /// May a missing instance be created for this message?
    fn can_create_instance(&self, context: &ConsumeContext<M>) -> bool;

    /// Build the instance a creating message is applied to
    fn create_instance(
        &self,
        _context: &ConsumeContext<M>,
        correlation_id: CorrelationId,
    ) -> SagaInstance<S> {
        SagaInstance::new(correlation_id)
    }

    /// May this message be applied to an existing instance?
    fn can_use_existing_instance(&self, context: &ConsumeContext<M>) -> bool;

    /// Is the instance finished, so that its mutation need not be kept?
    fn can_remove_instance(&self, instance: &SagaInstance<S>) -> bool;
}

/// Policy built from a message's [`EventAcceptance`] and a completion
/// predicate.
pub struct DefaultSagaPolicy<S: SagaStateMachine> {
    acceptance: EventAcceptance,
    remove: fn(&SagaInstance<S>) -> bool,
}

impl<S: SagaStateMachine> DefaultSagaPolicy<S> {
    /// Policy for a message accepted in the given lifecycle states
    pub fn for_acceptance(acceptance: EventAcceptance) -> Self {
        Self {
            acceptance,
            remove: |instance| instance.state().is_completed(),
        }
    }

    /// Create only; existing instances ignore the message
    pub fn initiating() -> Self {
        Self::for_acceptance(EventAcceptance::Initiates)
    }

    /// Existing instances only; missing instances ignore the message
    pub fn existing_only() -> Self {
        Self::for_acceptance(EventAcceptance::Continues)
    }

    /// Create when missing, otherwise use the existing instance
    pub fn create_or_use_existing() -> Self {
        Self::for_acceptance(EventAcceptance::InitiatesOrContinues)
    }

    /// Replace the completion predicate (default: [`SagaStateMachine::is_completed`])
    pub fn with_removal(mut self, remove: fn(&SagaInstance<S>) -> bool) -> Self {
        self.remove = remove;
        self
    }

    /// Lifecycle states this policy accepts
    pub fn acceptance(&self) -> EventAcceptance {
        self.acceptance
    }
}

impl<S: SagaStateMachine, M: Message> SagaPolicy<S, M> for DefaultSagaPolicy<S> {
    fn can_create_instance(&self, _context: &ConsumeContext<M>) -> bool {
        self.acceptance.can_create()
    }

    fn can_use_existing_instance(&self, _context: &ConsumeContext<M>) -> bool {
        self.acceptance.can_use_existing()
    }

    fn can_remove_instance(&self, instance: &SagaInstance<S>) -> bool {
        (self.remove)(instance)
    }
}

impl<S: SagaStateMachine> std::fmt::Debug for DefaultSagaPolicy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultSagaPolicy")
            .field("saga_type", &S::SAGA_TYPE)
            .field("acceptance", &self.acceptance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{OrderEvent, OrderPlaced, OrderSaga};

    fn placed() -> ConsumeContext<OrderPlaced> {
        ConsumeContext::new(OrderPlaced {
            order_number: "A-1".into(),
            item: "keyboard".into(),
        })
    }

    #[test]
    fn initiating_policy_creates_but_never_reuses() {
        let policy = DefaultSagaPolicy::<OrderSaga>::initiating();
        let context = placed();

        assert!(SagaPolicy::<_, OrderPlaced>::can_create_instance(&policy, &context));
        assert!(!SagaPolicy::<_, OrderPlaced>::can_use_existing_instance(&policy, &context));
    }

    #[test]
    fn removal_follows_completion_by_default() {
        let policy = DefaultSagaPolicy::<OrderSaga>::existing_only();
        let mut instance = SagaInstance::new(CorrelationId::new());
        assert!(!SagaPolicy::<_, OrderPlaced>::can_remove_instance(&policy, &instance));

        instance.raise(OrderEvent::Shipped);
        assert!(SagaPolicy::<_, OrderPlaced>::can_remove_instance(&policy, &instance));
    }

    #[test]
    fn removal_predicate_can_be_replaced() {
        let policy = DefaultSagaPolicy::<OrderSaga>::create_or_use_existing()
            .with_removal(|instance| instance.version() > 10);
        let mut instance = SagaInstance::new(CorrelationId::new());
        instance.raise(OrderEvent::Shipped);

        assert!(!SagaPolicy::<_, OrderPlaced>::can_remove_instance(&policy, &instance));
    }

    #[test]
    fn policies_are_repeatable() {
        let policy = DefaultSagaPolicy::<OrderSaga>::create_or_use_existing();
        let context = placed();
        let first = SagaPolicy::<_, OrderPlaced>::can_create_instance(&policy, &context);
        let second = SagaPolicy::<_, OrderPlaced>::can_create_instance(&policy, &context);
        assert_eq!(first, second);
    }
}
