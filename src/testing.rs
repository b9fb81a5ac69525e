//! Order saga fixture shared by unit tests

use crate::{
    BoxError, ConsumeContext, CorrelatedBy, CorrelationId, EventAcceptance, Message,
    PropertyCorrelation, SagaEvent, SagaInstance, SagaStateMachine,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderStatus {
    #[default]
    New,
    Open,
    Shipped,
    Cancelled,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderSaga {
    pub order_number: Option<String>,
    pub status: OrderStatus,
    pub items: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderEvent {
    Placed { order_number: String, item: String },
    ItemAdded { item: String },
    Shipped,
    Cancelled { reason: String },
}

impl SagaStateMachine for OrderSaga {
    const SAGA_TYPE: &'static str = "OrderSaga";
    type Event = OrderEvent;

    fn apply(&mut self, event: &OrderEvent) {
        match event {
            OrderEvent::Placed { order_number, item } => {
                self.order_number = Some(order_number.clone());
                self.status = OrderStatus::Open;
                self.items.push(item.clone());
            }
            OrderEvent::ItemAdded { item } => self.items.push(item.clone()),
            OrderEvent::Shipped => self.status = OrderStatus::Shipped,
            OrderEvent::Cancelled { .. } => self.status = OrderStatus::Cancelled,
        }
    }

    fn is_completed(&self) -> bool {
        matches!(self.status, OrderStatus::Shipped | OrderStatus::Cancelled)
    }
}

/// Correlated on the order number property
#[derive(Clone, Debug)]
pub struct OrderPlaced {
    pub order_number: String,
    pub item: String,
}

impl Message for OrderPlaced {}

impl SagaEvent<OrderPlaced> for OrderSaga {
    fn acceptance() -> EventAcceptance {
        EventAcceptance::InitiatesOrContinues
    }

    fn correlation() -> Option<PropertyCorrelation<OrderPlaced>> {
        Some(PropertyCorrelation::new("order_number", |m| m.order_number.clone()))
    }

    fn accepts(&self) -> bool {
        self.status != OrderStatus::Shipped
    }

    fn handle(
        instance: &mut SagaInstance<Self>,
        context: &ConsumeContext<OrderPlaced>,
    ) -> Result<(), BoxError> {
        let message = context.message();
        instance.raise(OrderEvent::Placed {
            order_number: message.order_number.clone(),
            item: message.item.clone(),
        });
        Ok(())
    }
}

/// Carries the saga's correlation ID
#[derive(Clone, Debug)]
pub struct ItemAdded {
    pub order_id: CorrelationId,
    pub item: String,
}

impl CorrelatedBy for ItemAdded {
    fn correlation_id(&self) -> CorrelationId {
        self.order_id
    }
}

impl Message for ItemAdded {
    fn identity() -> Option<fn(&Self) -> CorrelationId> {
        Some(Self::correlation_id)
    }
}

impl SagaEvent<ItemAdded> for OrderSaga {
    fn acceptance() -> EventAcceptance {
        EventAcceptance::Continues
    }

    fn accepts(&self) -> bool {
        self.status == OrderStatus::Open
    }

    fn handle(
        instance: &mut SagaInstance<Self>,
        context: &ConsumeContext<ItemAdded>,
    ) -> Result<(), BoxError> {
        if context.message().item.is_empty() {
            return Err("item must not be empty".into());
        }
        instance.raise(OrderEvent::ItemAdded {
            item: context.message().item.clone(),
        });
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct OrderShipped {
    pub order_id: CorrelationId,
}

impl CorrelatedBy for OrderShipped {
    fn correlation_id(&self) -> CorrelationId {
        self.order_id
    }
}

impl Message for OrderShipped {
    fn identity() -> Option<fn(&Self) -> CorrelationId> {
        Some(Self::correlation_id)
    }
}

impl SagaEvent<OrderShipped> for OrderSaga {
    fn acceptance() -> EventAcceptance {
        EventAcceptance::Continues
    }

    fn handle(
        instance: &mut SagaInstance<Self>,
        _context: &ConsumeContext<OrderShipped>,
    ) -> Result<(), BoxError> {
        instance.raise(OrderEvent::Shipped);
        Ok(())
    }
}

/// Carries the saga's ID through [`CorrelatedBy`] only
#[derive(Clone, Debug)]
pub struct OrderCancelled {
    pub order_id: CorrelationId,
    pub reason: String,
}

impl CorrelatedBy for OrderCancelled {
    fn correlation_id(&self) -> CorrelationId {
        self.order_id
    }
}

impl Message for OrderCancelled {}

impl SagaEvent<OrderCancelled> for OrderSaga {
    fn acceptance() -> EventAcceptance {
        EventAcceptance::Continues
    }

    fn accepts(&self) -> bool {
        self.status == OrderStatus::Open
    }

    fn handle(
        instance: &mut SagaInstance<Self>,
        context: &ConsumeContext<OrderCancelled>,
    ) -> Result<(), BoxError> {
        instance.raise(OrderEvent::Cancelled {
            reason: context.message().reason.clone(),
        });
        Ok(())
    }
}

/// Neither property-correlated nor carrying an ID
#[derive(Clone, Debug)]
pub struct Unroutable;

impl Message for Unroutable {}

impl SagaEvent<Unroutable> for OrderSaga {
    fn acceptance() -> EventAcceptance {
        EventAcceptance::Initiates
    }

    fn handle(
        _instance: &mut SagaInstance<Self>,
        _context: &ConsumeContext<Unroutable>,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

pub fn placed(order_number: &str, item: &str) -> ConsumeContext<OrderPlaced> {
    ConsumeContext::new(OrderPlaced {
        order_number: order_number.into(),
        item: item.into(),
    })
    .with_message_id(uuid::Uuid::new_v4().to_string())
}

pub fn item_added(order_id: CorrelationId, item: &str) -> ConsumeContext<ItemAdded> {
    ConsumeContext::new(ItemAdded {
        order_id,
        item: item.into(),
    })
    .with_message_id(uuid::Uuid::new_v4().to_string())
}

pub fn cancelled(order_id: CorrelationId, reason: &str) -> ConsumeContext<OrderCancelled> {
    ConsumeContext::new(OrderCancelled {
        order_id,
        reason: reason.into(),
    })
    .with_message_id(uuid::Uuid::new_v4().to_string())
}

pub fn shipped(order_id: CorrelationId) -> ConsumeContext<OrderShipped> {
    ConsumeContext::new(OrderShipped { order_id }).with_message_id(uuid::Uuid::new_v4().to_string())
}
