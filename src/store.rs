//! Event stream storage trait

use crate::{
    now_millis, Commit, CommitError, CommitId, CommitOutcome, CorrelationId, EventStream,
    StoreError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Append-only, per-stream event log with optimistic-concurrency commits.
///
/// Implementations serialise writes per stream ID. Different streams must
/// not contend with each other.
pub trait EventStreamStore<E>: Send + Sync + 'static {
    /// Open an existing stream; fails with [`StoreError::StreamNotFound`]
    /// when nothing was ever committed under `id`.
    fn open_stream(&self, id: CorrelationId) -> Result<EventStream<E>, StoreError>;

    /// Commit the stream's staged events and headers under `commit_id`.
    ///
    /// - A commit ID already applied to this stream is a no-op that reports
    ///   [`CommitOutcome::Duplicate`] and discards the staged changes.
    /// - If the stored stream moved past the revision `stream` observed, the
    ///   commit fails with [`CommitError::Conflict`] and nothing is written.
    fn commit(
        &self,
        stream: &mut EventStream<E>,
        commit_id: CommitId,
    ) -> Result<CommitOutcome, CommitError>;

    /// All commits of a stream, oldest first
    fn commits(&self, id: CorrelationId) -> Result<Vec<Commit<E>>, StoreError>;

    /// Open the stream for `id`, or start an empty one if none exists.
    ///
    /// A missing stream means "new instance", not an error.
    fn open_or_create(&self, id: CorrelationId) -> Result<EventStream<E>, StoreError>
    where
        E: Clone,
    {
        match self.open_stream(id) {
            Ok(stream) => Ok(stream),
            Err(StoreError::StreamNotFound(_)) => Ok(EventStream::new(id)),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug)]
struct StoredStream<E> {
    commits: Vec<Commit<E>>,
}

impl<E> StoredStream<E> {
    fn revision(&self) -> u64 {
        self.commits.last().map(|c| c.stream_revision).unwrap_or(0)
    }

    fn contains(&self, commit_id: CommitId) -> bool {
        self.commits.iter().any(|c| c.commit_id == commit_id)
    }
}

/// In-memory event store.
///
/// The outer map lock is only held long enough to find or insert a stream;
/// commits lock the individual stream.
pub struct InMemoryEventStore<E> {
    streams: RwLock<HashMap<CorrelationId, SharedStream<E>>>,
}

type SharedStream<E> = Arc<Mutex<StoredStream<E>>>;

impl<E> InMemoryEventStore<E> {
    /// Store with no streams
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Number of streams holding at least one commit
    pub fn stream_count(&self) -> usize {
        self.streams.read().map(|s| s.len()).unwrap_or(0)
    }

    fn existing(&self, id: CorrelationId) -> Result<Option<SharedStream<E>>, StoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|e| StoreError::Storage(e.to_string().into()))?;
        Ok(streams.get(&id).cloned())
    }

    fn existing_or_insert(&self, id: CorrelationId) -> Result<SharedStream<E>, StoreError> {
        if let Some(stream) = self.existing(id)? {
            return Ok(stream);
        }
        let mut streams = self
            .streams
            .write()
            .map_err(|e| StoreError::Storage(e.to_string().into()))?;
        Ok(streams
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(StoredStream { commits: Vec::new() })))
            .clone())
    }
}

impl<E> EventStreamStore<E> for InMemoryEventStore<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn open_stream(&self, id: CorrelationId) -> Result<EventStream<E>, StoreError> {
        let Some(stored) = self.existing(id)? else {
            return Err(StoreError::StreamNotFound(id));
        };
        let stored = stored
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string().into()))?;
        if stored.commits.is_empty() {
            return Err(StoreError::StreamNotFound(id));
        }
        Ok(EventStream::from_commits(id, &stored.commits))
    }

    fn commit(
        &self,
        stream: &mut EventStream<E>,
        commit_id: CommitId,
    ) -> Result<CommitOutcome, CommitError> {
        let id = stream.stream_id();
        // Streams are only materialized by a commit that appends events
        let stored = match self.existing(id)? {
            Some(stored) => stored,
            None if !stream.has_changes() => return Ok(CommitOutcome::Unchanged),
            None if stream.stream_revision() != 0 => {
                return Err(CommitError::Conflict {
                    stream_id: id,
                    expected: stream.stream_revision(),
                    actual: 0,
                });
            }
            None => self.existing_or_insert(id)?,
        };
        let mut stored = stored
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string().into()))?;

        if stored.contains(commit_id) {
            stream.clear_changes();
            return Ok(CommitOutcome::Duplicate);
        }

        if !stream.has_changes() {
            return Ok(CommitOutcome::Unchanged);
        }

        let actual = stored.revision();
        if actual != stream.stream_revision() {
            return Err(CommitError::Conflict {
                stream_id: id,
                expected: stream.stream_revision(),
                actual,
            });
        }

        let events = stream.uncommitted_events().to_vec();
        let stream_revision = actual + events.len() as u64;
        let commit_sequence = stored.commits.len() as u64 + 1;
        stored.commits.push(Commit {
            stream_id: id,
            commit_id,
            commit_sequence,
            stream_revision,
            committed_at_millis: now_millis(),
            headers: stream.uncommitted_headers().clone(),
            events,
        });
        stream.mark_committed(stream_revision, commit_sequence);

        Ok(CommitOutcome::Committed {
            stream_revision,
            commit_sequence,
        })
    }

    fn commits(&self, id: CorrelationId) -> Result<Vec<Commit<E>>, StoreError> {
        let Some(stored) = self.existing(id)? else {
            return Ok(Vec::new());
        };
        let stored = stored
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string().into()))?;
        Ok(stored.commits.clone())
    }
}

impl<E> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn staged(
        store: &InMemoryEventStore<u32>,
        id: CorrelationId,
        events: &[u32],
    ) -> EventStream<u32> {
        let mut stream = store.open_or_create(id).unwrap();
        for event in events {
            stream.add(*event);
        }
        stream
    }

    #[test]
    fn missing_stream_opens_empty() {
        let store = InMemoryEventStore::<u32>::new();
        let id = CorrelationId::new();

        assert!(matches!(store.open_stream(id), Err(StoreError::StreamNotFound(_))));
        let stream = store.open_or_create(id).unwrap();
        assert!(stream.is_new());
        assert!(stream.committed_events().is_empty());
    }

    #[test]
    fn empty_commit_leaves_no_stream_behind() {
        let store = InMemoryEventStore::<u32>::new();
        let id = CorrelationId::new();

        let mut stream = staged(&store, id, &[]);
        assert!(matches!(
            store.commit(&mut stream, CommitId::generate()),
            Ok(CommitOutcome::Unchanged)
        ));
        assert_eq!(store.stream_count(), 0);
        assert!(store.commits(id).unwrap().is_empty());
        assert!(matches!(store.open_stream(id), Err(StoreError::StreamNotFound(_))));

        let mut stream = staged(&store, id, &[7]);
        store.commit(&mut stream, CommitId::generate()).unwrap();
        assert_eq!(store.stream_count(), 1);
    }

    #[test]
    fn same_commit_id_twice_is_materialized_once() {
        let store = InMemoryEventStore::new();
        let id = CorrelationId::new();
        let commit_id = CommitId::generate();

        let mut first = staged(&store, id, &[1, 2]);
        assert!(matches!(
            store.commit(&mut first, commit_id),
            Ok(CommitOutcome::Committed { stream_revision: 2, commit_sequence: 1 })
        ));

        // Redelivery after the first commit landed
        let mut retry = staged(&store, id, &[1, 2]);
        assert!(matches!(store.commit(&mut retry, commit_id), Ok(CommitOutcome::Duplicate)));
        assert!(!retry.has_changes());

        assert_eq!(store.commits(id).unwrap().len(), 1);
        assert_eq!(store.open_stream(id).unwrap().committed_events(), &[1, 2]);
    }

    #[test]
    fn stale_redelivery_is_still_a_duplicate() {
        let store = InMemoryEventStore::new();
        let id = CorrelationId::new();
        let commit_id = CommitId::generate();

        let mut stale = staged(&store, id, &[7]);
        let mut first = staged(&store, id, &[7]);
        store.commit(&mut first, commit_id).unwrap();

        assert!(matches!(store.commit(&mut stale, commit_id), Ok(CommitOutcome::Duplicate)));
        assert_eq!(store.commits(id).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_writers_from_same_revision_conflict() {
        let store = InMemoryEventStore::new();
        let id = CorrelationId::new();

        let mut winner = staged(&store, id, &[1]);
        let mut loser = staged(&store, id, &[2]);

        store.commit(&mut winner, CommitId::generate()).unwrap();
        let err = store.commit(&mut loser, CommitId::generate()).unwrap_err();

        assert!(matches!(
            err,
            CommitError::Conflict { expected: 0, actual: 1, .. }
        ));
        // The losing writer's events were not written
        assert_eq!(store.open_stream(id).unwrap().committed_events(), &[1]);
        assert!(loser.has_changes());
    }

    #[test]
    fn exactly_one_racing_commit_wins() {
        let store = Arc::new(InMemoryEventStore::new());
        let id = CorrelationId::new();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8_u32)
            .map(|n| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let mut stream = store.open_or_create(id).unwrap();
                    stream.add(n);
                    barrier.wait();
                    store.commit(&mut stream, CommitId::generate())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let committed = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(CommitError::Conflict { .. })))
            .count();

        assert_eq!(committed, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(store.open_stream(id).unwrap().committed_events().len(), 1);
    }

    #[test]
    fn different_streams_commit_independently() {
        let store = Arc::new(InMemoryEventStore::new());
        let ids: Vec<_> = (0..4).map(|_| CorrelationId::new()).collect();

        let handles: Vec<_> = ids
            .iter()
            .copied()
            .map(|id| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut stream = store.open_or_create(id).unwrap();
                    stream.add(1_u32);
                    store.commit(&mut stream, CommitId::generate())
                })
            })
            .collect();

        for handle in handles {
            assert!(matches!(
                handle.join().unwrap(),
                Ok(CommitOutcome::Committed { stream_revision: 1, .. })
            ));
        }
        assert_eq!(store.stream_count(), 4);
    }

    #[test]
    fn commit_keeps_headers() {
        let store = InMemoryEventStore::new();
        let id = CorrelationId::new();
        let mut stream = staged(&store, id, &[3]);
        stream
            .uncommitted_headers_mut()
            .insert("saga.type".into(), "OrderSaga".into());

        store.commit(&mut stream, CommitId::generate()).unwrap();

        let commits = store.commits(id).unwrap();
        assert_eq!(commits[0].headers["saga.type"], "OrderSaga");
        assert!(stream.uncommitted_headers().is_empty());
    }
}
