//! Offset commit policies.
//!
//! A policy is a pure decision: given how many records have been delivered
//! since the last successful commit and how long ago that commit was, should
//! the runtime flush offsets now? Policies hold no counters of their own; the
//! run loop supplies them on every call.

use std::sync::Arc;
use std::time::Duration;

/// Decides when accumulated offsets should be flushed to the offset store.
pub trait OffsetCommitPolicy: Send + Sync {
    /// Return `true` to flush now.
    fn should_commit(&self, records_since_last_commit: u64, time_since_last_commit: Duration)
        -> bool;
}

impl<F> OffsetCommitPolicy for F
where
    F: Fn(u64, Duration) -> bool + Send + Sync,
{
    fn should_commit(&self, records: u64, elapsed: Duration) -> bool {
        self(records, elapsed)
    }
}

/// Commit after every non-empty batch. This is the default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysCommit;

impl OffsetCommitPolicy for AlwaysCommit {
    fn should_commit(&self, records: u64, _elapsed: Duration) -> bool {
        records > 0
    }
}

/// Commit once pending records exist and `interval` has passed since the last commit.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicCommit {
    interval: Duration,
}

impl PeriodicCommit {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl OffsetCommitPolicy for PeriodicCommit {
    fn should_commit(&self, records: u64, elapsed: Duration) -> bool {
        records > 0 && elapsed >= self.interval
    }
}

/// Commit once at least `records` records are pending.
#[derive(Debug, Clone, Copy)]
pub struct EveryNRecords {
    records: u64,
}

impl EveryNRecords {
    pub fn new(records: u64) -> Self {
        Self {
            records: records.max(1),
        }
    }
}

impl OffsetCommitPolicy for EveryNRecords {
    fn should_commit(&self, records: u64, _elapsed: Duration) -> bool {
        records >= self.records
    }
}

/// Commit when either policy says so.
pub struct AnyOf(Arc<dyn OffsetCommitPolicy>, Arc<dyn OffsetCommitPolicy>);

impl OffsetCommitPolicy for AnyOf {
    fn should_commit(&self, records: u64, elapsed: Duration) -> bool {
        self.0.should_commit(records, elapsed) || self.1.should_commit(records, elapsed)
    }
}

/// Commit only when both policies agree.
pub struct AllOf(Arc<dyn OffsetCommitPolicy>, Arc<dyn OffsetCommitPolicy>);

impl OffsetCommitPolicy for AllOf {
    fn should_commit(&self, records: u64, elapsed: Duration) -> bool {
        self.0.should_commit(records, elapsed) && self.1.should_commit(records, elapsed)
    }
}

/// Commit after every non-empty batch.
pub fn always() -> Arc<dyn OffsetCommitPolicy> {
    Arc::new(AlwaysCommit)
}

/// Commit at most once per `interval`.
pub fn periodic(interval: Duration) -> Arc<dyn OffsetCommitPolicy> {
    Arc::new(PeriodicCommit::new(interval))
}

/// Commit every `records` delivered records.
pub fn every(records: u64) -> Arc<dyn OffsetCommitPolicy> {
    Arc::new(EveryNRecords::new(records))
}

/// Combine two policies; commit when either one fires.
pub fn or(
    first: Arc<dyn OffsetCommitPolicy>,
    second: Arc<dyn OffsetCommitPolicy>,
) -> Arc<dyn OffsetCommitPolicy> {
    Arc::new(AnyOf(first, second))
}

/// Combine two policies; commit only when both fire.
pub fn and(
    first: Arc<dyn OffsetCommitPolicy>,
    second: Arc<dyn OffsetCommitPolicy>,
) -> Arc<dyn OffsetCommitPolicy> {
    Arc::new(AllOf(first, second))
}
