//! Saga repositories: load or create an instance, apply a message, persist
//!
//! [`SagaRepository::handle`] plans instead of executing: it returns zero or
//! one deferred [`SagaAction`], and the caller decides when it runs.
//!
//! ```rust,ignore
//! let actions = repository.handle(&context, correlation_id, selector, policy)?;
//! for action in actions {
//!     let outcome = action.execute(&context)?;
//! }
//! ```

use crate::stats::RepositoryStats;
use crate::{
    BoxError, CommitError, CommitHeaders, CommitId, CommitOutcome, ConsumeContext, CorrelationId,
    EventStream, EventStreamStore, InstancePhase, LogScope, Message, SagaError, SagaInstance,
    SagaLog, SagaLogExt, SagaPolicy, SagaStateMachine, StoreError, TracingLog,
};
use std::sync::Arc;

/// One handler invocation selected for an instance
pub type SagaHandler<S, M> =
    Box<dyn FnOnce(&mut SagaInstance<S>, &ConsumeContext<M>) -> Result<(), BoxError> + Send>;

/// Picks the handlers to run, in order, for an instance and message
pub type HandlerSelector<S, M> =
    Arc<dyn Fn(&SagaInstance<S>, &ConsumeContext<M>) -> Vec<SagaHandler<S, M>> + Send + Sync>;

/// What happened to the instance's staged events
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Persistence {
    /// Events were committed
    Committed {
        /// Stream revision after the commit
        stream_revision: u64,
    },
    /// The commit ID was already applied; nothing was written
    Duplicate,
    /// Handlers raised no events
    Unchanged,
    /// A new instance finished immediately and was not kept
    Skipped,
}

/// Result of executing a [`SagaAction`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Branch the action took
    pub phase: InstancePhase,
    /// The instance the message was applied to
    pub correlation_id: CorrelationId,
    /// Commit ID derived from the message headers
    pub commit_id: CommitId,
    /// What happened to the raised events
    pub persistence: Persistence,
    /// The policy considers the instance finished
    pub completed: bool,
}

/// Deferred work produced by [`SagaRepository::handle`]
pub struct SagaAction<M> {
    phase: InstancePhase,
    correlation_id: CorrelationId,
    run: Box<dyn FnOnce(&ConsumeContext<M>) -> Result<ActionOutcome, SagaError> + Send>,
}

impl<M: Message> SagaAction<M> {
    pub(crate) fn new<F>(phase: InstancePhase, correlation_id: CorrelationId, run: F) -> Self
    where
        F: FnOnce(&ConsumeContext<M>) -> Result<ActionOutcome, SagaError> + Send + 'static,
    {
        Self {
            phase,
            correlation_id,
            run: Box::new(run),
        }
    }

    /// Whether the action creates a new instance or uses an existing one
    pub fn phase(&self) -> InstancePhase {
        self.phase
    }

    /// The instance the action applies to
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Run handlers and persist. Runs to completion or failure.
    pub fn execute(self, context: &ConsumeContext<M>) -> Result<ActionOutcome, SagaError> {
        (self.run)(context)
    }
}

impl<M> std::fmt::Debug for SagaAction<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaAction")
            .field("phase", &self.phase)
            .field("correlation_id", &self.correlation_id)
            .finish()
    }
}

/// Predicate over saga instances for enumeration
pub struct SagaFilter<S: SagaStateMachine> {
    predicate: Box<dyn Fn(&SagaInstance<S>) -> bool + Send + Sync>,
}

impl<S: SagaStateMachine> SagaFilter<S> {
    /// Filter on an arbitrary predicate
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&SagaInstance<S>) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(predicate),
        }
    }

    /// Matches every instance
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Whether `instance` passes the filter
    pub fn matches(&self, instance: &SagaInstance<S>) -> bool {
        (self.predicate)(instance)
    }
}

/// Storage-facing orchestrator for one saga type
pub trait SagaRepository<S: SagaStateMachine>: Send + Sync + 'static {
    /// Plan the handling of one message for the instance `correlation_id`.
    ///
    /// Returns no action when the policy denies creating (instance
    /// missing) or using (instance present) the instance; otherwise exactly
    /// one deferred action.
    fn handle<M: Message>(
        &self,
        context: &ConsumeContext<M>,
        correlation_id: CorrelationId,
        selector: HandlerSelector<S, M>,
        policy: Arc<dyn SagaPolicy<S, M>>,
    ) -> Result<Vec<SagaAction<M>>, SagaError>;

    /// Correlation IDs of instances matching `filter`
    fn find(&self, filter: &SagaFilter<S>) -> Result<Vec<CorrelationId>, SagaError> {
        Ok(self
            .filter(filter)?
            .iter()
            .map(SagaInstance::correlation_id)
            .collect())
    }

    /// Instances matching `filter`
    fn filter(&self, filter: &SagaFilter<S>) -> Result<Vec<SagaInstance<S>>, SagaError>;

    /// Project every instance through `transform`
    fn select<T, F>(&self, transform: F) -> Result<Vec<T>, SagaError>
    where
        F: Fn(&SagaInstance<S>) -> T;
}

/// Backend write used by a deferred action
pub(crate) trait SagaWriter<S: SagaStateMachine>: Send + 'static {
    fn persist(
        self,
        instance: &SagaInstance<S>,
        commit_id: CommitId,
        headers: CommitHeaders,
    ) -> Result<CommitOutcome, CommitError>;
}

/// Everything a deferred action needs, moved into its closure
pub(crate) struct ActionPlan<S: SagaStateMachine, M: Message> {
    pub log: Arc<dyn SagaLog>,
    pub stats: Arc<RepositoryStats>,
    pub selector: HandlerSelector<S, M>,
    pub policy: Arc<dyn SagaPolicy<S, M>>,
    pub scope: LogScope,
}

impl<S: SagaStateMachine, M: Message> ActionPlan<S, M> {
    pub fn new(
        log: Arc<dyn SagaLog>,
        stats: Arc<RepositoryStats>,
        selector: HandlerSelector<S, M>,
        policy: Arc<dyn SagaPolicy<S, M>>,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            log,
            stats,
            selector,
            policy,
            scope: LogScope {
                saga_type: S::SAGA_TYPE,
                message_type: M::message_type(),
                correlation_id,
            },
        }
    }

    /// Decide between the create and use-existing branches
    pub fn into_actions<W>(
        self,
        context: &ConsumeContext<M>,
        existing: Option<SagaInstance<S>>,
        writer: W,
    ) -> Vec<SagaAction<M>>
    where
        W: SagaWriter<S>,
    {
        let correlation_id = self.scope.correlation_id;
        match existing {
            None if !self.policy.can_create_instance(context) => {
                RepositoryStats::incr(&self.stats.ignored_missing);
                self.log.debug_with(&self.scope, || {
                    format!(
                        "SAGA: {} ignoring missing {} for {}",
                        S::SAGA_TYPE,
                        correlation_id,
                        M::message_type()
                    )
                });
                Vec::new()
            }
            None => vec![SagaAction::new(
                InstancePhase::Create,
                correlation_id,
                move |context: &ConsumeContext<M>| self.create(context, writer),
            )],
            Some(_) if !self.policy.can_use_existing_instance(context) => {
                RepositoryStats::incr(&self.stats.ignored_existing);
                self.log.debug_with(&self.scope, || {
                    format!(
                        "SAGA: {} ignoring existing {} for {}",
                        S::SAGA_TYPE,
                        correlation_id,
                        M::message_type()
                    )
                });
                Vec::new()
            }
            Some(instance) => vec![SagaAction::new(
                InstancePhase::Existing,
                correlation_id,
                move |context: &ConsumeContext<M>| self.use_existing(context, instance, writer),
            )],
        }
    }

    fn create<W: SagaWriter<S>>(
        self,
        context: &ConsumeContext<M>,
        writer: W,
    ) -> Result<ActionOutcome, SagaError> {
        let correlation_id = self.scope.correlation_id;
        self.log.debug_with(&self.scope, || {
            format!(
                "SAGA: {} creating new {} for {}",
                S::SAGA_TYPE,
                correlation_id,
                M::message_type()
            )
        });

        let mut instance = self.policy.create_instance(context, correlation_id);
        let loaded = instance.clone();
        let commit_id = CommitId::derive(context);
        let result = self
            .run_handlers(&mut instance, context, InstancePhase::Create)
            .and_then(|()| {
                if self.policy.can_remove_instance(&instance) {
                    Ok(Persistence::Skipped)
                } else {
                    self.save(&mut instance, context, commit_id, writer, InstancePhase::Create)
                }
            });

        self.finish(result, &loaded, &instance, commit_id, InstancePhase::Create)
    }

    fn use_existing<W: SagaWriter<S>>(
        self,
        context: &ConsumeContext<M>,
        mut instance: SagaInstance<S>,
        writer: W,
    ) -> Result<ActionOutcome, SagaError> {
        let correlation_id = self.scope.correlation_id;
        self.log.debug_with(&self.scope, || {
            format!(
                "SAGA: {} using existing {} for {}",
                S::SAGA_TYPE,
                correlation_id,
                M::message_type()
            )
        });

        let loaded = instance.clone();
        let commit_id = CommitId::derive(context);
        let result = self
            .run_handlers(&mut instance, context, InstancePhase::Existing)
            .and_then(|()| {
                self.save(&mut instance, context, commit_id, writer, InstancePhase::Existing)
            });

        self.finish(result, &loaded, &instance, commit_id, InstancePhase::Existing)
    }

    fn run_handlers(
        &self,
        instance: &mut SagaInstance<S>,
        context: &ConsumeContext<M>,
        phase: InstancePhase,
    ) -> Result<(), SagaError> {
        for handler in (self.selector)(&*instance, context) {
            handler(&mut *instance, context).map_err(|source| SagaError::Handler {
                phase,
                saga_type: S::SAGA_TYPE,
                message_type: M::message_type(),
                correlation_id: self.scope.correlation_id,
                source,
            })?;
        }
        Ok(())
    }

    fn save<W: SagaWriter<S>>(
        &self,
        instance: &mut SagaInstance<S>,
        context: &ConsumeContext<M>,
        commit_id: CommitId,
        writer: W,
        phase: InstancePhase,
    ) -> Result<Persistence, SagaError> {
        let outcome = writer
            .persist(instance, commit_id, commit_headers::<S, M>(context))
            .map_err(|e| match e {
                CommitError::Conflict {
                    expected, actual, ..
                } => SagaError::Conflict {
                    phase,
                    saga_type: S::SAGA_TYPE,
                    message_type: M::message_type(),
                    correlation_id: self.scope.correlation_id,
                    expected,
                    actual,
                },
                CommitError::Storage(source) => SagaError::Storage {
                    saga_type: S::SAGA_TYPE,
                    message_type: M::message_type(),
                    correlation_id: self.scope.correlation_id,
                    commit_id: Some(commit_id),
                    source,
                },
            })?;

        instance.clear_uncommitted_events();

        Ok(match outcome {
            CommitOutcome::Committed {
                stream_revision, ..
            } => {
                RepositoryStats::incr(&self.stats.commits);
                Persistence::Committed { stream_revision }
            }
            CommitOutcome::Duplicate => {
                RepositoryStats::incr(&self.stats.duplicate_commits);
                self.log.debug_with(&self.scope, || {
                    format!("SAGA: {} commit {} already applied", S::SAGA_TYPE, commit_id)
                });
                Persistence::Duplicate
            }
            CommitOutcome::Unchanged => Persistence::Unchanged,
        })
    }

    /// `loaded` is the instance before handlers ran; a duplicate commit
    /// discards the handlers' changes, so completion is judged on it.
    fn finish(
        &self,
        result: Result<Persistence, SagaError>,
        loaded: &SagaInstance<S>,
        handled: &SagaInstance<S>,
        commit_id: CommitId,
        phase: InstancePhase,
    ) -> Result<ActionOutcome, SagaError> {
        let persistence = match result {
            Ok(persistence) => persistence,
            Err(e) => {
                if e.is_conflict() {
                    RepositoryStats::incr(&self.stats.conflicts);
                } else {
                    RepositoryStats::incr(&self.stats.failures);
                }
                self.log.error_with(&self.scope, || e.to_string());
                return Err(e);
            }
        };

        match phase {
            InstancePhase::Create => RepositoryStats::incr(&self.stats.instances_created),
            InstancePhase::Existing => RepositoryStats::incr(&self.stats.instances_updated),
        }

        // Removal has no delete path: the instance stays in the store and the
        // flag is reported to the caller.
        let durable = match persistence {
            Persistence::Duplicate => loaded,
            _ => handled,
        };
        let completed = self.policy.can_remove_instance(durable);
        if completed {
            RepositoryStats::incr(&self.stats.completed_instances);
            self.log.debug_with(&self.scope, || {
                format!(
                    "SAGA: {} {} completed ({:?})",
                    S::SAGA_TYPE,
                    self.scope.correlation_id,
                    persistence
                )
            });
        }

        Ok(ActionOutcome {
            phase,
            correlation_id: self.scope.correlation_id,
            commit_id,
            persistence,
            completed,
        })
    }
}

fn commit_headers<S: SagaStateMachine, M: Message>(context: &ConsumeContext<M>) -> CommitHeaders {
    let mut headers = CommitHeaders::new();
    headers.insert("saga.type".into(), S::SAGA_TYPE.into());
    headers.insert("message.type".into(), M::message_type().into());
    if let Some(message_id) = &context.message_id {
        headers.insert("message.id".into(), message_id.as_str().into());
    }
    headers
}

/// Saga repository backed by an [`EventStreamStore`].
///
/// Instances are rehydrated from their event stream on every message; the
/// store is the only shared state. The store keeps no queryable index, so
/// enumeration fails with [`SagaError::Unsupported`].
pub struct EventStoreRepository<S: SagaStateMachine> {
    store: Arc<dyn EventStreamStore<S::Event>>,
    log: Arc<dyn SagaLog>,
    stats: Arc<RepositoryStats>,
}

impl<S: SagaStateMachine> EventStoreRepository<S> {
    /// Repository over `store`, logging through [`TracingLog`]
    pub fn new(store: Arc<dyn EventStreamStore<S::Event>>) -> Self {
        Self {
            store,
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

    /// Open the stream and rebuild the instance, if the stream has history
    fn load<M: Message>(
        &self,
        correlation_id: CorrelationId,
        scope: &LogScope,
    ) -> Result<(EventStream<S::Event>, Option<SagaInstance<S>>), SagaError> {
        let stream = self.store.open_or_create(correlation_id).map_err(|source| {
            RepositoryStats::incr(&self.stats.failures);
            let e = storage_error::<S, M>(correlation_id, source);
            self.log.error_with(scope, || e.to_string());
            e
        })?;

        if stream.is_new() {
            self.log.info_with(scope, || {
                format!("could not find saga, creating new event stream for saga #{correlation_id}")
            });
            return Ok((stream, None));
        }

        let instance = SagaInstance::rehydrate(correlation_id, stream.committed_events());
        Ok((stream, Some(instance)))
    }

    fn unsupported(operation: &'static str) -> SagaError {
        SagaError::Unsupported {
            backend: "EventStoreRepository",
            saga_type: S::SAGA_TYPE,
            operation,
        }
    }
}

struct StreamWriter<E> {
    store: Arc<dyn EventStreamStore<E>>,
    stream: EventStream<E>,
}

impl<S: SagaStateMachine> SagaWriter<S> for StreamWriter<S::Event> {
    fn persist(
        mut self,
        instance: &SagaInstance<S>,
        commit_id: CommitId,
        headers: CommitHeaders,
    ) -> Result<CommitOutcome, CommitError> {
        self.stream.uncommitted_headers_mut().extend(headers);
        for event in instance.uncommitted_events() {
            self.stream.add(event.clone());
        }
        self.store.commit(&mut self.stream, commit_id)
    }
}

impl<S: SagaStateMachine> SagaRepository<S> for EventStoreRepository<S> {
    fn handle<M: Message>(
        &self,
        context: &ConsumeContext<M>,
        correlation_id: CorrelationId,
        selector: HandlerSelector<S, M>,
        policy: Arc<dyn SagaPolicy<S, M>>,
    ) -> Result<Vec<SagaAction<M>>, SagaError> {
        let plan = ActionPlan::new(
            self.log.clone(),
            self.stats.clone(),
            selector,
            policy,
            correlation_id,
        );
        let (stream, instance) = self.load::<M>(correlation_id, &plan.scope)?;
        let writer = StreamWriter {
            store: self.store.clone(),
            stream,
        };
        Ok(plan.into_actions(context, instance, writer))
    }

    fn find(&self, _filter: &SagaFilter<S>) -> Result<Vec<CorrelationId>, SagaError> {
        Err(Self::unsupported("find"))
    }

    fn filter(&self, _filter: &SagaFilter<S>) -> Result<Vec<SagaInstance<S>>, SagaError> {
        Err(Self::unsupported("filter"))
    }

    fn select<T, F>(&self, _transform: F) -> Result<Vec<T>, SagaError>
    where
        F: Fn(&SagaInstance<S>) -> T,
    {
        Err(Self::unsupported("select"))
    }
}

impl<S: SagaStateMachine> std::fmt::Debug for EventStoreRepository<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStoreRepository")
            .field("saga_type", &S::SAGA_TYPE)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

/// Wrap a store failure raised outside a deferred action
pub(crate) fn storage_error<S: SagaStateMachine, M: Message>(
    correlation_id: CorrelationId,
    source: StoreError,
) -> SagaError {
    SagaError::Storage {
        saga_type: S::SAGA_TYPE,
        message_type: M::message_type(),
        correlation_id,
        commit_id: None,
        source,
    }
}
