//! Repository statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-repository counters
pub struct RepositoryStats {
    /// Instances created by a create action
    pub instances_created: AtomicU64,
    /// Existing instances a message was applied to
    pub instances_updated: AtomicU64,
    /// Messages ignored because no instance existed and creation was denied
    pub ignored_missing: AtomicU64,
    /// Messages ignored because the policy denied using the existing instance
    pub ignored_existing: AtomicU64,
    /// Commits that appended events
    pub commits: AtomicU64,
    /// Redelivered commits skipped by commit ID
    pub duplicate_commits: AtomicU64,
    /// Actions that lost an optimistic-concurrency race
    pub conflicts: AtomicU64,
    /// Handler and storage failures
    pub failures: AtomicU64,
    /// Actions after which the policy considered the instance finished
    pub completed_instances: AtomicU64,
}

impl RepositoryStats {
    /// All counters at zero
    pub fn new() -> Self {
        Self {
            instances_created: AtomicU64::new(0),
            instances_updated: AtomicU64::new(0),
            ignored_missing: AtomicU64::new(0),
            ignored_existing: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            duplicate_commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            completed_instances: AtomicU64::new(0),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> RepositoryStatsSnapshot {
        RepositoryStatsSnapshot {
            instances_created: self.instances_created.load(Ordering::Relaxed),
            instances_updated: self.instances_updated.load(Ordering::Relaxed),
            ignored_missing: self.ignored_missing.load(Ordering::Relaxed),
            ignored_existing: self.ignored_existing.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            duplicate_commits: self.duplicate_commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            completed_instances: self.completed_instances.load(Ordering::Relaxed),
        }
    }
}

impl Default for RepositoryStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain copy of [`RepositoryStats`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepositoryStatsSnapshot {
    /// Instances created by a create action
    pub instances_created: u64,
    /// Existing instances a message was applied to
    pub instances_updated: u64,
    /// Messages ignored because no instance existed and creation was denied
    pub ignored_missing: u64,
    /// Messages ignored because the policy denied using the existing instance
    pub ignored_existing: u64,
    /// Commits that appended events
    pub commits: u64,
    /// Redelivered commits skipped by commit ID
    pub duplicate_commits: u64,
    /// Actions that lost an optimistic-concurrency race
    pub conflicts: u64,
    /// Handler and storage failures
    pub failures: u64,
    /// Actions after which the policy considered the instance finished
    pub completed_instances: u64,
}
