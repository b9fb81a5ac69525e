//! Multi-worker routing for one connector
//!
//! Every correlation ID is pinned to one worker (`uuid % workers`), so
//! messages for the same instance are handled one at a time and in arrival
//! order. Different instances proceed in parallel. A conflict can still occur
//! when another process writes the same stream; it is returned to the caller
//! unchanged. A panicking handler fails only its own message.

use crate::{
    ConsumeContext, CorrelationId, DispatchOutcome, DistributorConfig, DistributorError, Message,
    WorkerConnector,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

struct Job<M> {
    correlation_id: CorrelationId,
    context: ConsumeContext<M>,
    reply: oneshot::Sender<Result<DispatchOutcome, DistributorError>>,
}

/// Pool of blocking workers fed through bounded queues
pub struct Distributor<M: Message> {
    connector: Arc<dyn WorkerConnector<M>>,
    senders: Vec<mpsc::Sender<Job<M>>>,
    workers: Vec<JoinHandle<()>>,
}

impl<M: Message> Distributor<M> {
    /// Spawn the workers on the current tokio runtime
    pub fn start(
        connector: Arc<dyn WorkerConnector<M>>,
        config: DistributorConfig,
    ) -> Result<Self, DistributorError> {
        config.validate().map_err(DistributorError::InvalidConfig)?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| DistributorError::NoRuntime)?;

        let mut senders = Vec::with_capacity(config.workers);
        let mut workers = Vec::with_capacity(config.workers);
        for worker in 0..config.workers {
            let (sender, receiver) = mpsc::channel(config.queue_capacity);
            let connector = connector.clone();
            senders.push(sender);
            workers.push(runtime.spawn_blocking(move || run_worker(worker, connector, receiver)));
        }

        tracing::info!(
            saga_type = connector.saga_type(),
            message_type = M::message_type(),
            workers = config.workers,
            "saga distributor started"
        );

        Ok(Self {
            connector,
            senders,
            workers,
        })
    }

    /// Number of workers
    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// The worker owning `correlation_id`
    pub fn worker_for(&self, correlation_id: CorrelationId) -> usize {
        worker_index(correlation_id, self.senders.len())
    }

    /// Route the message to its worker and wait for the outcome
    pub async fn dispatch(
        &self,
        context: ConsumeContext<M>,
    ) -> Result<DispatchOutcome, DistributorError> {
        let correlation_id = self.connector.correlation_id(context.message());
        let worker = self.worker_for(correlation_id);
        let (reply, response) = oneshot::channel();

        self.senders[worker]
            .send(Job {
                correlation_id,
                context,
                reply,
            })
            .await
            .map_err(|_| DistributorError::WorkerUnavailable { worker })?;

        response
            .await
            .map_err(|_| DistributorError::WorkerUnavailable { worker })?
    }

    /// Close the queues, let workers drain them, and wait for every worker
    pub async fn shutdown(self) -> Result<(), DistributorError> {
        drop(self.senders);

        let mut result = Ok(());
        for (worker, handle) in self.workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                tracing::error!(worker, error = %e, "saga worker panicked");
                result = Err(DistributorError::WorkerPanicked { worker });
            }
        }
        tracing::info!(
            saga_type = self.connector.saga_type(),
            "saga distributor stopped"
        );
        result
    }
}

impl<M: Message> std::fmt::Debug for Distributor<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distributor")
            .field("saga_type", &self.connector.saga_type())
            .field("message_type", &M::message_type())
            .field("workers", &self.senders.len())
            .finish()
    }
}

/// Stable across processes with the same worker count
fn worker_index(correlation_id: CorrelationId, workers: usize) -> usize {
    (correlation_id.as_uuid().as_u128() % workers as u128) as usize
}

fn run_worker<M: Message>(
    worker: usize,
    connector: Arc<dyn WorkerConnector<M>>,
    mut jobs: mpsc::Receiver<Job<M>>,
) {
    let span = tracing::info_span!("saga_worker", worker, saga_type = connector.saga_type());
    let _enter = span.enter();
    tracing::debug!("saga worker started");

    while let Some(Job {
        correlation_id,
        context,
        reply,
    }) = jobs.blocking_recv()
    {
        let result = match panic::catch_unwind(AssertUnwindSafe(|| connector.dispatch(&context))) {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "saga dispatch failed");
                Err(DistributorError::Saga(e))
            }
            Err(payload) => {
                let detail = panic_detail(payload.as_ref());
                tracing::error!(%correlation_id, %detail, "saga handler panicked");
                Err(DistributorError::HandlerPanicked {
                    saga_type: connector.saga_type(),
                    message_type: M::message_type(),
                    correlation_id,
                    detail,
                })
            }
        };
        if reply.send(result).is_err() {
            tracing::debug!("dispatch caller went away before the reply");
        }
    }

    tracing::debug!("saga worker stopped");
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
