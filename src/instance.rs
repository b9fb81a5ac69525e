//! Saga instance: state plus the events raised since the last persist

use crate::{CorrelationId, SagaStateMachine};

/// One saga instance bound to its correlation ID.
///
/// Instances are never shared between concurrent handlers; every action
/// builds or rehydrates its own copy from committed history.
#[derive(Clone, Debug)]
pub struct SagaInstance<S: SagaStateMachine> {
    correlation_id: CorrelationId,
    version: u64,
    state: S,
    uncommitted: Vec<S::Event>,
}

impl<S: SagaStateMachine> SagaInstance<S> {
    /// Create an instance with no history
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            version: 0,
            state: S::default(),
            uncommitted: Vec::new(),
        }
    }

    /// Rebuild an instance by replaying committed events in order
    pub fn rehydrate<'a, I>(correlation_id: CorrelationId, committed: I) -> Self
    where
        I: IntoIterator<Item = &'a S::Event>,
    {
        let mut instance = Self::new(correlation_id);
        for event in committed {
            instance.transition(event);
        }
        instance
    }

    /// Apply an already-committed event (replay)
    pub fn transition(&mut self, event: &S::Event) {
        self.state.apply(event);
        self.version += 1;
    }

    /// Apply a new event and stage it for the next commit
    pub fn raise(&mut self, event: S::Event) {
        self.transition(&event);
        self.uncommitted.push(event);
    }

    /// Events raised since construction or the last clear, in order
    pub fn uncommitted_events(&self) -> &[S::Event] {
        &self.uncommitted
    }

    /// Drop staged events without touching state or version
    pub fn clear_uncommitted_events(&mut self) {
        self.uncommitted.clear();
    }

    /// Number of events applied, committed or not
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version the instance had before any staged events
    pub fn committed_version(&self) -> u64 {
        self.version - self.uncommitted.len() as u64
    }

    /// Current state
    pub fn state(&self) -> &S {
        &self.state
    }

    /// The instance's correlation ID
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{OrderEvent, OrderSaga, OrderStatus};

    fn history() -> Vec<OrderEvent> {
        vec![
            OrderEvent::Placed {
                order_number: "A-1".into(),
                item: "keyboard".into(),
            },
            OrderEvent::ItemAdded {
                item: "mouse".into(),
            },
            OrderEvent::Shipped,
        ]
    }

    #[test]
    fn replay_is_deterministic() {
        let id = CorrelationId::new();
        let events = history();

        let first = SagaInstance::<OrderSaga>::rehydrate(id, &events);
        let second = SagaInstance::<OrderSaga>::rehydrate(id, &events);

        assert_eq!(first.state(), second.state());
        assert_eq!(first.version(), 3);
        assert_eq!(second.version(), 3);
        assert!(first.uncommitted_events().is_empty());
        assert_eq!(first.state().status, OrderStatus::Shipped);
    }

    #[test]
    fn raise_stages_events_until_cleared() {
        let mut instance =
            SagaInstance::<OrderSaga>::rehydrate(CorrelationId::new(), &history()[..1]);
        instance.raise(OrderEvent::ItemAdded {
            item: "cable".into(),
        });

        assert_eq!(instance.version(), 2);
        assert_eq!(instance.committed_version(), 1);
        assert_eq!(instance.uncommitted_events().len(), 1);

        instance.clear_uncommitted_events();
        assert!(instance.uncommitted_events().is_empty());
        assert_eq!(instance.version(), 2);
        assert_eq!(instance.state().items, vec!["keyboard", "cable"]);
    }
}
