//! Commit ID derivation for deduplicating redelivered messages

use crate::{ConsumeContext, Message};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one logical persistence write.
///
/// A redelivered message derives the same commit ID as its first delivery,
/// which lets the store recognise the retry and skip it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(pub Uuid);

impl CommitId {
    /// Derive the commit ID for the message that triggered a saga action.
    ///
    /// Headers are tried in priority order: message ID, request ID,
    /// correlation ID, conversation ID. The first one that parses as a UUID
    /// wins; when none does, a fresh ID is generated and the write is no
    /// longer deduplicated on redelivery.
    pub fn derive<M: Message>(context: &ConsumeContext<M>) -> Self {
        [
            context.message_id.as_deref(),
            context.request_id.as_deref(),
            context.correlation_id.as_deref(),
            context.conversation_id.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find_map(|candidate| Uuid::parse_str(candidate.trim()).ok())
        .map(Self)
        .unwrap_or_else(Self::generate)
    }

    /// Generate a fresh, time-ordered commit ID
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Debug for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommitId({})", self.0)
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
