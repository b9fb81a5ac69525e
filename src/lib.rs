//! Event-Sourced Saga Repository
//!
//! Correlates inbound messages to long-running saga instances, decides
//! through a policy whether an instance may be created or used, runs the
//! saga's state machine, and persists the resulting events with optimistic
//! concurrency and commit-level deduplication.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // 1. Describe the saga state and how events change it
//! impl SagaStateMachine for OrderSaga { /* SAGA_TYPE, Event, apply */ }
//!
//! // 2. Describe how each message type is correlated and handled
//! impl SagaEvent<OrderPlaced> for OrderSaga { /* acceptance, correlation, handle */ }
//!
//! // 3. Wire a connector per (saga, message) pair at startup
//! let repository = Arc::new(EventStoreRepository::<OrderSaga>::new(store));
//! let connector = WorkerConnectorFactory::<OrderSaga, OrderPlaced, _>::new(repository, &resolver)?
//!     .create();
//!
//! // 4. Route messages across workers, one worker per correlation ID
//! let distributor = Distributor::start(Arc::new(connector), DistributorConfig::default())?;
//! distributor.dispatch(ConsumeContext::new(message)).await?;
//! ```

#![warn(missing_docs)]

// === Core Types ===
mod context;
mod errors;
mod idempotency;
mod instance;
mod machine;

// === Event Streams ===
mod store;
mod stream;

// === Correlation & Policy ===
mod correlation;
mod policy;

// === Repositories ===
mod memory;
mod repository;

// === Routing ===
mod config;
mod connector;
mod distributor;

// === Observability ===
mod log;
mod stats;

#[cfg(test)]
mod testing;

/// Helpers for tests and demos
#[cfg(any(test, feature = "test-harness"))]
pub mod test_support;

// === Re-exports ===

// Types
pub use context::{now_millis, type_name_of, ConsumeContext, CorrelatedBy, CorrelationId, Message};
pub use idempotency::CommitId;
pub use instance::SagaInstance;

// State machine
pub use machine::{EventAcceptance, SagaEvent, SagaStateMachine};

// Errors
pub use errors::{
    BoxError, CommitError, DistributorError, InstancePhase, SagaError, StoreError, WiringError,
};

// Event streams
pub use store::{EventStreamStore, InMemoryEventStore};
pub use stream::{Commit, CommitHeaders, CommitOutcome, EventStream};

// Correlation & policy
pub use correlation::{CorrelationResolver, CorrelationStrategy, PropertyCorrelation};
pub use policy::{DefaultSagaPolicy, SagaPolicy};

// Repositories
pub use memory::InMemorySagaRepository;
pub use repository::{
    ActionOutcome, EventStoreRepository, HandlerSelector, Persistence, SagaAction, SagaFilter,
    SagaHandler, SagaRepository,
};

// Routing
pub use config::DistributorConfig;
pub use connector::{
    state_machine_selector, ConnectorKind, DispatchOutcome, SagaWorkerConnector, WorkerConnector,
    WorkerConnectorFactory,
};
pub use distributor::Distributor;

// Observability
pub use log::{LogRecord, LogScope, MemoryLog, NoOpLog, SagaLog, SagaLogExt, TracingLog};
pub use stats::{RepositoryStats, RepositoryStatsSnapshot};
