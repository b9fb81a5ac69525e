//! Correlation: which saga instance does a message belong to

use crate::{CorrelatedBy, CorrelationId, Message, SagaEvent, WiringError};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Property-equality rule: the saga's `property` equals the value the
/// message carries for it.
///
/// Correlation IDs are name-based on `(saga type, property, value)`, so two
/// messages with equal property values always reach the same instance,
/// whichever worker handles them.
pub struct PropertyCorrelation<M> {
    property: &'static str,
    value: fn(&M) -> String,
}

impl<M> PropertyCorrelation<M> {
    /// Correlate on `property`, read from the message by `value`
    pub fn new(property: &'static str, value: fn(&M) -> String) -> Self {
        Self { property, value }
    }

    /// Name of the correlated property
    pub fn property(&self) -> &'static str {
        self.property
    }

    /// The message's value for the property
    pub fn value(&self, message: &M) -> String {
        (self.value)(message)
    }
}

impl<M> Clone for PropertyCorrelation<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for PropertyCorrelation<M> {}

impl<M> std::fmt::Debug for PropertyCorrelation<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyCorrelation")
            .field("property", &self.property)
            .finish()
    }
}

/// How a (saga, message) pair maps messages to correlation IDs.
pub enum CorrelationStrategy<M> {
    /// Derived from a message property
    Property {
        /// Saga type the IDs are scoped to
        saga_type: &'static str,
        /// Property and message accessor
        rule: PropertyCorrelation<M>,
    },
    /// The message carries the correlation ID itself
    Identity(fn(&M) -> CorrelationId),
}

impl<M> CorrelationStrategy<M> {
    /// Correlation ID for one message
    pub fn correlation_id(&self, message: &M) -> CorrelationId {
        match self {
            Self::Property { saga_type, rule } => {
                CorrelationId::from_property(saga_type, rule.property(), &rule.value(message))
            }
            Self::Identity(identity) => identity(message),
        }
    }

    /// Check if this is property correlation
    pub fn is_property(&self) -> bool {
        matches!(self, Self::Property { .. })
    }
}

impl<M> Clone for CorrelationStrategy<M> {
    fn clone(&self) -> Self {
        match self {
            Self::Property { saga_type, rule } => Self::Property {
                saga_type: *saga_type,
                rule: *rule,
            },
            Self::Identity(identity) => Self::Identity(*identity),
        }
    }
}

impl<M> std::fmt::Debug for CorrelationStrategy<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Property { saga_type, rule } => f
                .debug_struct("Property")
                .field("saga_type", saga_type)
                .field("property", &rule.property())
                .finish(),
            Self::Identity(_) => f.debug_tuple("Identity").finish(),
        }
    }
}

/// Resolves and caches correlation strategies per (saga, message) pair.
///
/// Resolution happens when connectors are wired, never per message.
#[derive(Default)]
pub struct CorrelationResolver {
    cache: RwLock<HashMap<(TypeId, TypeId), Arc<dyn Any + Send + Sync>>>,
}

impl CorrelationResolver {
    /// Resolver with an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the strategy for `M` reaching saga `S`.
    ///
    /// A property rule declared by the saga wins; otherwise the message must
    /// carry its own correlation ID. Neither is a wiring defect.
    pub fn resolve<S, M>(&self) -> Result<CorrelationStrategy<M>, WiringError>
    where
        S: SagaEvent<M>,
        M: Message,
    {
        self.resolve_with::<S, M>(M::identity())
    }

    /// Resolve for a message implementing [`CorrelatedBy`].
    ///
    /// A property rule declared by the saga still wins; otherwise
    /// [`CorrelatedBy::correlation_id`] is the identity.
    pub fn resolve_correlated<S, M>(&self) -> Result<CorrelationStrategy<M>, WiringError>
    where
        S: SagaEvent<M>,
        M: Message + CorrelatedBy,
    {
        self.resolve_with::<S, M>(Some(<M as CorrelatedBy>::correlation_id))
    }

    fn resolve_with<S, M>(
        &self,
        identity: Option<fn(&M) -> CorrelationId>,
    ) -> Result<CorrelationStrategy<M>, WiringError>
    where
        S: SagaEvent<M>,
        M: Message,
    {
        let key = (TypeId::of::<S>(), TypeId::of::<M>());

        if let Some(strategy) = self.cached::<M>(&key) {
            return Ok(strategy);
        }

        let strategy = if let Some(rule) = S::correlation() {
            CorrelationStrategy::Property {
                saga_type: S::SAGA_TYPE,
                rule,
            }
        } else if let Some(identity) = identity {
            CorrelationStrategy::Identity(identity)
        } else {
            return Err(WiringError::NoCorrelation {
                saga_type: S::SAGA_TYPE,
                message_type: M::message_type(),
            });
        };

        tracing::debug!(
            saga_type = S::SAGA_TYPE,
            message_type = M::message_type(),
            strategy = ?strategy,
            "Correlation resolved"
        );

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, Arc::new(strategy.clone()));
        }
        Ok(strategy)
    }

    /// Number of cached (saga, message) pairs
    pub fn cached_pairs(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    fn cached<M: Message>(&self, key: &(TypeId, TypeId)) -> Option<CorrelationStrategy<M>> {
        let cache = self.cache.read().ok()?;
        cache
            .get(key)?
            .downcast_ref::<CorrelationStrategy<M>>()
            .cloned()
    }
}

impl std::fmt::Debug for CorrelationResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationResolver")
            .field("cached_pairs", &self.cached_pairs())
            .finish()
    }
}
