//! Worker connectors: route a message type into a saga repository
//!
//! A [`WorkerConnectorFactory`] is built once per (saga, message) pair at
//! startup. Correlation is resolved there, so an unroutable pair fails
//! before any message is delivered.
//!
//! ```rust,ignore
//! let resolver = CorrelationResolver::new();
//! let connector = WorkerConnectorFactory::<OrderSaga, OrderPlaced, _>::new(repository, &resolver)?
//!     .create();
//! let outcome = connector.dispatch(&context)?;
//! ```

use crate::{
    ActionOutcome, ConsumeContext, CorrelatedBy, CorrelationId, CorrelationResolver,
    CorrelationStrategy, DefaultSagaPolicy, HandlerSelector, Message, SagaAction, SagaError,
    SagaEvent, SagaHandler, SagaInstance, SagaPolicy, SagaRepository, WiringError,
};
use std::sync::Arc;

/// Which correlation a connector was wired with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectorKind {
    /// Correlation ID derived from a message property
    Property,
    /// Correlation ID carried by the message
    Identity,
}

/// Result of dispatching one message to one saga type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The deferred action ran
    Applied(ActionOutcome),
    /// The policy declined the message
    Ignored,
}

impl DispatchOutcome {
    /// Check if an action ran
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Routing glue used by the dispatch layer and the distributor
pub trait WorkerConnector<M: Message>: Send + Sync + 'static {
    /// The saga type this connector feeds
    fn saga_type(&self) -> &'static str;

    /// How messages are correlated
    fn kind(&self) -> ConnectorKind;

    /// The instance a message belongs to
    fn correlation_id(&self, message: &M) -> CorrelationId;

    /// Plan and run the repository action for one message
    fn dispatch(&self, context: &ConsumeContext<M>) -> Result<DispatchOutcome, SagaError>;
}

/// Selector running [`SagaEvent::handle`] when the instance's state accepts
/// the message
pub fn state_machine_selector<S, M>() -> HandlerSelector<S, M>
where
    S: SagaEvent<M>,
    M: Message,
{
    Arc::new(|instance: &SagaInstance<S>, _context: &ConsumeContext<M>| {
        if !<S as SagaEvent<M>>::accepts(instance.state()) {
            return Vec::new();
        }
        let handler: SagaHandler<S, M> = Box::new(
            |instance: &mut SagaInstance<S>, context: &ConsumeContext<M>| {
                <S as SagaEvent<M>>::handle(instance, context)
            },
        );
        vec![handler]
    })
}

/// Builds connectors for one (saga, message) pair
pub struct WorkerConnectorFactory<S, M, R>
where
    S: SagaEvent<M>,
    M: Message,
    R: SagaRepository<S>,
{
    repository: Arc<R>,
    strategy: CorrelationStrategy<M>,
    policy: Arc<dyn SagaPolicy<S, M>>,
}

impl<S, M, R> WorkerConnectorFactory<S, M, R>
where
    S: SagaEvent<M>,
    M: Message,
    R: SagaRepository<S>,
{
    /// Resolve correlation for the pair; fails if the message cannot be
    /// correlated to the saga.
    pub fn new(repository: Arc<R>, resolver: &CorrelationResolver) -> Result<Self, WiringError> {
        let strategy = resolver.resolve::<S, M>()?;
        Ok(Self {
            repository,
            strategy,
            policy: Arc::new(DefaultSagaPolicy::<S>::for_acceptance(S::acceptance())),
        })
    }

    /// Like [`WorkerConnectorFactory::new`], but the message's
    /// [`CorrelatedBy`] implementation supplies the identity.
    pub fn correlated(
        repository: Arc<R>,
        resolver: &CorrelationResolver,
    ) -> Result<Self, WiringError>
    where
        M: CorrelatedBy,
    {
        let strategy = resolver.resolve_correlated::<S, M>()?;
        Ok(Self {
            repository,
            strategy,
            policy: Arc::new(DefaultSagaPolicy::<S>::for_acceptance(S::acceptance())),
        })
    }

    /// Replace the policy derived from [`SagaEvent::acceptance`]
    pub fn with_policy(mut self, policy: Arc<dyn SagaPolicy<S, M>>) -> Self {
        self.policy = policy;
        self
    }

    /// The connector variant this factory produces
    pub fn kind(&self) -> ConnectorKind {
        if self.strategy.is_property() {
            ConnectorKind::Property
        } else {
            ConnectorKind::Identity
        }
    }

    /// Build a connector sharing this factory's repository, strategy and policy
    pub fn create(&self) -> SagaWorkerConnector<S, M, R> {
        SagaWorkerConnector {
            repository: self.repository.clone(),
            strategy: self.strategy.clone(),
            policy: self.policy.clone(),
            selector: state_machine_selector::<S, M>(),
            kind: self.kind(),
        }
    }
}

/// Connector for one (saga, message) pair
pub struct SagaWorkerConnector<S, M, R>
where
    S: SagaEvent<M>,
    M: Message,
    R: SagaRepository<S>,
{
    repository: Arc<R>,
    strategy: CorrelationStrategy<M>,
    policy: Arc<dyn SagaPolicy<S, M>>,
    selector: HandlerSelector<S, M>,
    kind: ConnectorKind,
}

impl<S, M, R> SagaWorkerConnector<S, M, R>
where
    S: SagaEvent<M>,
    M: Message,
    R: SagaRepository<S>,
{
    /// Resolve the instance and return the repository's deferred actions
    /// without running them
    pub fn plan(&self, context: &ConsumeContext<M>) -> Result<Vec<SagaAction<M>>, SagaError> {
        let correlation_id = self.strategy.correlation_id(context.message());
        self.repository
            .handle(context, correlation_id, self.selector.clone(), self.policy.clone())
    }
}

impl<S, M, R> WorkerConnector<M> for SagaWorkerConnector<S, M, R>
where
    S: SagaEvent<M>,
    M: Message,
    R: SagaRepository<S>,
{
    fn saga_type(&self) -> &'static str {
        S::SAGA_TYPE
    }

    fn kind(&self) -> ConnectorKind {
        self.kind
    }

    fn correlation_id(&self, message: &M) -> CorrelationId {
        self.strategy.correlation_id(message)
    }

    fn dispatch(&self, context: &ConsumeContext<M>) -> Result<DispatchOutcome, SagaError> {
        match self.plan(context)?.into_iter().next() {
            Some(action) => action.execute(context).map(DispatchOutcome::Applied),
            None => Ok(DispatchOutcome::Ignored),
        }
    }
}

impl<S, M, R> std::fmt::Debug for SagaWorkerConnector<S, M, R>
where
    S: SagaEvent<M>,
    M: Message,
    R: SagaRepository<S>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaWorkerConnector")
            .field("saga_type", &S::SAGA_TYPE)
            .field("message_type", &M::message_type())
            .field("kind", &self.kind)
            .finish()
    }
}
