//! Queryable in-memory saga repository

use crate::repository::{storage_error, ActionPlan, SagaWriter};
use crate::stats::RepositoryStats;
use crate::{
    CommitError, CommitHeaders, CommitId, CommitOutcome, ConsumeContext, CorrelationId,
    HandlerSelector, Message, SagaAction, SagaError, SagaFilter, SagaInstance, SagaLog, SagaPolicy,
    SagaRepository, SagaStateMachine, StoreError, TracingLog,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

struct StoredInstance<S: SagaStateMachine> {
    instance: SagaInstance<S>,
    applied: HashSet<CommitId>,
}

type Instances<S> = Arc<RwLock<HashMap<CorrelationId, StoredInstance<S>>>>;

/// Saga repository keeping current instance snapshots in memory.
///
/// Unlike [`crate::EventStoreRepository`] it maintains an index of live
/// instances, so `find`, `filter` and `select` are supported. Saves use
/// the instance version as the optimistic-concurrency check, and remember
/// applied commit IDs so redelivered messages are not applied twice.
pub struct InMemorySagaRepository<S: SagaStateMachine> {
    instances: Instances<S>,
    log: Arc<dyn SagaLog>,
    stats: Arc<RepositoryStats>,
}

impl<S: SagaStateMachine> InMemorySagaRepository<S> {
    /// Empty repository logging through [`TracingLog`]
    pub fn new() -> Self {
        Self {
            instances: Arc::new(RwLock::new(HashMap::new())),
            log: Arc::new(TracingLog),
            stats: Arc::new(RepositoryStats::new()),
        }
    }

    /// Replace the log sink (default: [`TracingLog`])
    pub fn with_log(mut self, log: Arc<dyn SagaLog>) -> Self {
        self.log = log;
        self
    }

    /// Counters for this repository
    pub fn stats(&self) -> &Arc<RepositoryStats> {
        &self.stats
    }

    /// Number of stored instances
    pub fn len(&self) -> usize {
        self.read(|instances| instances.len())
    }

    /// Whether no instance was stored yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<CorrelationId, StoredInstance<S>>) -> T) -> T {
        // Writers replace whole snapshots, so a poisoned map is still consistent
        let instances = self.instances.read().unwrap_or_else(|e| e.into_inner());
        f(&instances)
    }
}

impl<S: SagaStateMachine> Default for InMemorySagaRepository<S> {
    fn default() -> Self {
        Self::new()
    }
}

struct SnapshotWriter<S: SagaStateMachine> {
    instances: Instances<S>,
    correlation_id: CorrelationId,
}

impl<S: SagaStateMachine> SagaWriter<S> for SnapshotWriter<S> {
    fn persist(
        self,
        instance: &SagaInstance<S>,
        commit_id: CommitId,
        _headers: CommitHeaders,
    ) -> Result<CommitOutcome, CommitError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|e| StoreError::Storage(e.to_string().into()))?;

        let expected = instance.committed_version();
        let stored = instances.get_mut(&self.correlation_id);

        if let Some(stored) = &stored {
            if stored.applied.contains(&commit_id) {
                return Ok(CommitOutcome::Duplicate);
            }
        }
        if instance.uncommitted_events().is_empty() {
            return Ok(CommitOutcome::Unchanged);
        }

        let mut committed = instance.clone();
        committed.clear_uncommitted_events();
        let stream_revision = committed.version();

        match stored {
            Some(stored) if stored.instance.version() == expected => {
                stored.instance = committed;
                stored.applied.insert(commit_id);
                Ok(CommitOutcome::Committed {
                    stream_revision,
                    commit_sequence: stored.applied.len() as u64,
                })
            }
            Some(stored) => Err(CommitError::Conflict {
                stream_id: self.correlation_id,
                expected,
                actual: stored.instance.version(),
            }),
            None if expected == 0 => {
                instances.insert(
                    self.correlation_id,
                    StoredInstance {
                        instance: committed,
                        applied: HashSet::from([commit_id]),
                    },
                );
                Ok(CommitOutcome::Committed {
                    stream_revision,
                    commit_sequence: 1,
                })
            }
            None => Err(CommitError::Conflict {
                stream_id: self.correlation_id,
                expected,
                actual: 0,
            }),
        }
    }
}

impl<S: SagaStateMachine> SagaRepository<S> for InMemorySagaRepository<S> {
    fn handle<M: Message>(
        &self,
        context: &ConsumeContext<M>,
        correlation_id: CorrelationId,
        selector: HandlerSelector<S, M>,
        policy: Arc<dyn SagaPolicy<S, M>>,
    ) -> Result<Vec<SagaAction<M>>, SagaError> {
        let existing = self
            .instances
            .read()
            .map_err(|e| {
                storage_error::<S, M>(correlation_id, StoreError::Storage(e.to_string().into()))
            })?
            .get(&correlation_id)
            .map(|stored| stored.instance.clone());

        let plan = ActionPlan::new(
            self.log.clone(),
            self.stats.clone(),
            selector,
            policy,
            correlation_id,
        );
        let writer = SnapshotWriter {
            instances: self.instances.clone(),
            correlation_id,
        };
        Ok(plan.into_actions(context, existing, writer))
    }

    fn filter(&self, filter: &SagaFilter<S>) -> Result<Vec<SagaInstance<S>>, SagaError> {
        Ok(self.read(|instances| {
            instances
                .values()
                .map(|stored| &stored.instance)
                .filter(|instance| filter.matches(instance))
                .cloned()
                .collect()
        }))
    }

    fn select<T, F>(&self, transform: F) -> Result<Vec<T>, SagaError>
    where
        F: Fn(&SagaInstance<S>) -> T,
    {
        Ok(self.read(|instances| {
            instances
                .values()
                .map(|stored| transform(&stored.instance))
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use crate::{state_machine_selector, DefaultSagaPolicy, InstancePhase, Persistence};

    fn run<M: Message>(
        repository: &InMemorySagaRepository<OrderSaga>,
        id: CorrelationId,
        context: &ConsumeContext<M>,
    ) -> Result<crate::ActionOutcome, SagaError>
    where
        OrderSaga: crate::SagaEvent<M>,
    {
        let policy: Arc<dyn SagaPolicy<OrderSaga, M>> =
            Arc::new(DefaultSagaPolicy::<OrderSaga>::create_or_use_existing());
        repository
            .handle(context, id, state_machine_selector::<OrderSaga, M>(), policy)?
            .remove(0)
            .execute(context)
    }

    #[test]
    fn instances_can_be_enumerated() {
        let repository = InMemorySagaRepository::<OrderSaga>::new();
        let open = CorrelationId::new();
        let done = CorrelationId::new();
        run(&repository, open, &placed("D-1", "chair")).unwrap();
        run(&repository, done, &placed("D-2", "desk")).unwrap();
        run(&repository, done, &shipped(done)).unwrap();

        assert_eq!(repository.len(), 2);
        let shipped_ids = repository
            .find(&SagaFilter::new(|instance: &SagaInstance<OrderSaga>| {
                instance.state().is_completed()
            }))
            .unwrap();
        assert_eq!(shipped_ids, vec![done]);

        let mut numbers = repository
            .select(|instance| instance.state().order_number.clone())
            .unwrap();
        numbers.sort();
        assert_eq!(numbers, vec![Some("D-1".to_owned()), Some("D-2".to_owned())]);
    }

    #[test]
    fn redelivered_message_is_applied_once() {
        let repository = InMemorySagaRepository::<OrderSaga>::new();
        let id = CorrelationId::new();
        run(&repository, id, &placed("D-3", "chair")).unwrap();

        let context = item_added(id, "lamp");
        let first = run(&repository, id, &context).unwrap();
        let second = run(&repository, id, &context).unwrap();

        assert_eq!(first.persistence, Persistence::Committed { stream_revision: 2 });
        assert_eq!(second.phase, InstancePhase::Existing);
        assert_eq!(second.persistence, Persistence::Duplicate);

        let items = repository
            .select(|instance| instance.state().items.clone())
            .unwrap();
        assert_eq!(items, vec![vec!["chair".to_owned(), "lamp".to_owned()]]);
    }

    #[test]
    fn redelivery_does_not_complete_the_instance() {
        let repository = InMemorySagaRepository::<OrderSaga>::new();
        let id = CorrelationId::new();
        run(&repository, id, &placed("D-6", "chair")).unwrap();

        let policy: Arc<dyn SagaPolicy<OrderSaga, ItemAdded>> = Arc::new(
            DefaultSagaPolicy::<OrderSaga>::existing_only()
                .with_removal(|instance| instance.state().items.len() >= 3),
        );
        let context = item_added(id, "lamp");
        let add = || {
            repository
                .handle(
                    &context,
                    id,
                    state_machine_selector::<OrderSaga, ItemAdded>(),
                    policy.clone(),
                )
                .unwrap()
                .remove(0)
                .execute(&context)
                .unwrap()
        };

        assert!(!add().completed);
        let redelivered = add();
        assert_eq!(redelivered.persistence, Persistence::Duplicate);
        assert!(!redelivered.completed);
        assert_eq!(repository.stats().snapshot().completed_instances, 0);
    }

    #[test]
    fn stale_snapshot_conflicts() {
        let repository = InMemorySagaRepository::<OrderSaga>::new();
        let id = CorrelationId::new();
        run(&repository, id, &placed("D-4", "chair")).unwrap();

        let policy: Arc<dyn SagaPolicy<OrderSaga, ItemAdded>> =
            Arc::new(DefaultSagaPolicy::<OrderSaga>::existing_only());
        let first_context = item_added(id, "lamp");
        let second_context = item_added(id, "rug");
        let first = repository
            .handle(
                &first_context,
                id,
                state_machine_selector::<OrderSaga, ItemAdded>(),
                policy.clone(),
            )
            .unwrap()
            .remove(0);
        let second = repository
            .handle(
                &second_context,
                id,
                state_machine_selector::<OrderSaga, ItemAdded>(),
                policy,
            )
            .unwrap()
            .remove(0);

        first.execute(&first_context).unwrap();
        let err = second.execute(&second_context).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(repository.stats().snapshot().conflicts, 1);
    }

    #[test]
    fn racing_creates_leave_one_instance() {
        let repository = InMemorySagaRepository::<OrderSaga>::new();
        let id = CorrelationId::new();
        let policy: Arc<dyn SagaPolicy<OrderSaga, OrderPlaced>> =
            Arc::new(DefaultSagaPolicy::<OrderSaga>::initiating());
        let first_context = placed("D-5", "chair");
        let second_context = placed("D-5", "desk");

        let plan = |context: &ConsumeContext<OrderPlaced>| {
            repository
                .handle(
                    context,
                    id,
                    state_machine_selector::<OrderSaga, OrderPlaced>(),
                    policy.clone(),
                )
                .unwrap()
                .remove(0)
        };
        let first = plan(&first_context);
        let second = plan(&second_context);
        assert_eq!(first.phase(), InstancePhase::Create);
        assert_eq!(second.phase(), InstancePhase::Create);

        first.execute(&first_context).unwrap();
        let err = second.execute(&second_context).unwrap_err();
        assert!(matches!(
            err,
            SagaError::Conflict {
                phase: InstancePhase::Create,
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert_eq!(repository.len(), 1);
    }
}
