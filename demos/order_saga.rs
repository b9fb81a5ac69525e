//! Order fulfilment saga driven through two distributors.
//!
//! Run with `RUST_LOG=debug cargo run --example order_saga`.

use saga_repository::{
    BoxError, ConsumeContext, CorrelatedBy, CorrelationId, CorrelationResolver, DispatchOutcome,
    Distributor, DistributorConfig, EventAcceptance, EventStoreRepository, EventStreamStore,
    InMemoryEventStore, Message, PropertyCorrelation, SagaEvent, SagaInstance, SagaStateMachine,
    WorkerConnector, WorkerConnectorFactory,
};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
struct Fulfilment {
    order_number: String,
    amount_cents: u64,
    paid_cents: u64,
}

#[derive(Clone, Debug)]
enum FulfilmentEvent {
    Submitted { order_number: String, amount_cents: u64 },
    PaymentReceived { amount_cents: u64 },
}

impl SagaStateMachine for Fulfilment {
    const SAGA_TYPE: &'static str = "Fulfilment";
    type Event = FulfilmentEvent;

    fn apply(&mut self, event: &FulfilmentEvent) {
        match event {
            FulfilmentEvent::Submitted {
                order_number,
                amount_cents,
            } => {
                self.order_number = order_number.clone();
                self.amount_cents = *amount_cents;
            }
            FulfilmentEvent::PaymentReceived { amount_cents } => self.paid_cents += amount_cents,
        }
    }

    fn is_completed(&self) -> bool {
        self.amount_cents > 0 && self.paid_cents >= self.amount_cents
    }
}

#[derive(Clone, Debug)]
struct OrderSubmitted {
    order_number: String,
    amount_cents: u64,
}

impl Message for OrderSubmitted {}

impl SagaEvent<OrderSubmitted> for Fulfilment {
    fn acceptance() -> EventAcceptance {
        EventAcceptance::Initiates
    }

    fn correlation() -> Option<PropertyCorrelation<OrderSubmitted>> {
        Some(PropertyCorrelation::new("order_number", |m| {
            m.order_number.clone()
        }))
    }

    fn handle(
        instance: &mut SagaInstance<Self>,
        context: &ConsumeContext<OrderSubmitted>,
    ) -> Result<(), BoxError> {
        let message = context.message();
        instance.raise(FulfilmentEvent::Submitted {
            order_number: message.order_number.clone(),
            amount_cents: message.amount_cents,
        });
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct PaymentReceived {
    order_id: CorrelationId,
    amount_cents: u64,
}

impl CorrelatedBy for PaymentReceived {
    fn correlation_id(&self) -> CorrelationId {
        self.order_id
    }
}

impl Message for PaymentReceived {
    fn identity() -> Option<fn(&Self) -> CorrelationId> {
        Some(Self::correlation_id)
    }
}

impl SagaEvent<PaymentReceived> for Fulfilment {
    fn acceptance() -> EventAcceptance {
        EventAcceptance::Continues
    }

    fn accepts(&self) -> bool {
        !self.is_completed()
    }

    fn handle(
        instance: &mut SagaInstance<Self>,
        context: &ConsumeContext<PaymentReceived>,
    ) -> Result<(), BoxError> {
        if context.message().amount_cents == 0 {
            return Err("payment amount must be positive".into());
        }
        instance.raise(FulfilmentEvent::PaymentReceived {
            amount_cents: context.message().amount_cents,
        });
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = Arc::new(InMemoryEventStore::<FulfilmentEvent>::new());
    let repository = Arc::new(EventStoreRepository::<Fulfilment>::new(store.clone()));
    let resolver = CorrelationResolver::new();

    let submitted = Arc::new(
        WorkerConnectorFactory::<Fulfilment, OrderSubmitted, _>::new(repository.clone(), &resolver)?
            .create(),
    );
    let payments = Arc::new(
        WorkerConnectorFactory::<Fulfilment, PaymentReceived, _>::new(
            repository.clone(),
            &resolver,
        )?
        .create(),
    );

    let config = DistributorConfig::with_workers(4);
    let submit_distributor =
        Distributor::<OrderSubmitted>::start(submitted.clone(), config.clone())?;
    let payment_distributor = Distributor::<PaymentReceived>::start(payments, config)?;

    let mut orders = Vec::new();
    for n in 1..=5u64 {
        let message = OrderSubmitted {
            order_number: format!("ORD-{n:04}"),
            amount_cents: n * 1_000,
        };
        let order_id = submitted.correlation_id(&message);
        let context =
            ConsumeContext::new(message).with_message_id(uuid::Uuid::now_v7().to_string());
        submit_distributor.dispatch(context.clone()).await?;
        // The instance now exists, so the initiating policy ignores the redelivery
        submit_distributor.dispatch(context).await?;
        orders.push((order_id, n * 1_000));
    }

    for &(order_id, amount_cents) in &orders {
        for part in [amount_cents / 2, amount_cents - amount_cents / 2] {
            let context = ConsumeContext::new(PaymentReceived {
                order_id,
                amount_cents: part,
            })
            .with_message_id(uuid::Uuid::now_v7().to_string());
            match payment_distributor.dispatch(context).await? {
                DispatchOutcome::Applied(outcome) if outcome.completed => {
                    tracing::info!(%order_id, "order fully paid");
                }
                DispatchOutcome::Applied(_) => {}
                DispatchOutcome::Ignored => tracing::warn!(%order_id, "payment for unknown order"),
            }
        }
    }

    submit_distributor.shutdown().await?;
    payment_distributor.shutdown().await?;

    for (order_id, _) in &orders {
        println!("{order_id}: {} commits", store.commits(*order_id)?.len());
    }
    println!("{:#?}", repository.stats().snapshot());
    Ok(())
}
