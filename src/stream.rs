//! Event streams and commits

use crate::{CommitId, CorrelationId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Commit metadata; stored with the commit, never replayed into state
pub type CommitHeaders = BTreeMap<String, serde_json::Value>;

/// Ordered event log of one saga instance, plus changes staged for the
/// next commit.
#[derive(Clone, Debug)]
pub struct EventStream<E> {
    stream_id: CorrelationId,
    stream_revision: u64,
    commit_sequence: u64,
    committed: Vec<E>,
    uncommitted: Vec<E>,
    uncommitted_headers: CommitHeaders,
}

impl<E: Clone> EventStream<E> {
    /// A stream with no history
    pub fn new(stream_id: CorrelationId) -> Self {
        Self {
            stream_id,
            stream_revision: 0,
            commit_sequence: 0,
            committed: Vec::new(),
            uncommitted: Vec::new(),
            uncommitted_headers: CommitHeaders::new(),
        }
    }

    /// A stream opened from stored commits
    pub fn from_commits<'a, I>(stream_id: CorrelationId, commits: I) -> Self
    where
        I: IntoIterator<Item = &'a Commit<E>>,
        E: 'a,
    {
        let mut stream = Self::new(stream_id);
        for commit in commits {
            stream.committed.extend(commit.events.iter().cloned());
            stream.stream_revision = commit.stream_revision;
            stream.commit_sequence = commit.commit_sequence;
        }
        stream
    }

    /// Stage an event for the next commit
    pub fn add(&mut self, event: E) {
        self.uncommitted.push(event);
    }

    /// Discard staged events and headers
    pub fn clear_changes(&mut self) {
        self.uncommitted.clear();
        self.uncommitted_headers.clear();
    }

    /// Record a successful commit: staged events become committed
    pub(crate) fn mark_committed(&mut self, stream_revision: u64, commit_sequence: u64) {
        self.committed.append(&mut self.uncommitted);
        self.uncommitted_headers.clear();
        self.stream_revision = stream_revision;
        self.commit_sequence = commit_sequence;
    }

    /// The stream's ID (the saga's correlation ID)
    pub fn stream_id(&self) -> CorrelationId {
        self.stream_id
    }

    /// Number of committed events this stream has observed
    pub fn stream_revision(&self) -> u64 {
        self.stream_revision
    }

    /// Number of commits this stream has observed
    pub fn commit_sequence(&self) -> u64 {
        self.commit_sequence
    }

    /// Committed events, oldest first
    pub fn committed_events(&self) -> &[E] {
        &self.committed
    }

    /// Events staged for the next commit
    pub fn uncommitted_events(&self) -> &[E] {
        &self.uncommitted
    }

    /// Headers attached to the next commit
    pub fn uncommitted_headers(&self) -> &CommitHeaders {
        &self.uncommitted_headers
    }

    /// Mutable access to the headers attached to the next commit
    pub fn uncommitted_headers_mut(&mut self) -> &mut CommitHeaders {
        &mut self.uncommitted_headers
    }

    /// Whether nothing was ever committed to this stream
    pub fn is_new(&self) -> bool {
        self.commit_sequence == 0
    }

    /// Whether there are staged events
    pub fn has_changes(&self) -> bool {
        !self.uncommitted.is_empty()
    }
}

/// One persisted write to a stream
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commit<E> {
    /// Stream the commit belongs to
    pub stream_id: CorrelationId,
    /// ID used to recognise redelivered writes
    pub commit_id: CommitId,
    /// 1-based position of this commit in the stream
    pub commit_sequence: u64,
    /// Stream revision after this commit
    pub stream_revision: u64,
    /// Commit time (millis since UNIX epoch)
    pub committed_at_millis: u64,
    /// Metadata written with the commit
    pub headers: CommitHeaders,
    /// Events appended by the commit, in order
    pub events: Vec<E>,
}

/// Non-error result of committing a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Staged events were appended
    Committed {
        /// Stream revision after the commit
        stream_revision: u64,
        /// Position of the commit in the stream
        commit_sequence: u64,
    },
    /// The commit ID was applied before; staged events were discarded
    Duplicate,
    /// Nothing was staged
    Unchanged,
}
