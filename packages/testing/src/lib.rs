#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and examples in `memory_tracer`.
//!
//! The fakes stand in for the collaborators of a tracer: they record how they are used and
//! let tests script what they report. All of them are cheap handles to shared state, so a
//! test can keep a clone while the tracer owns another.

use std::collections::VecDeque;
use std::num::NonZero;
use std::sync::atomic::{self, AtomicUsize};
use std::sync::{Arc, Mutex};

use memory_tracer::{
    AllocationFacility, Collector, Error, Frame, ReportSink, Result, Snapshot, Trace, Traceback,
};

const ERR_POISONED_LOCK: &str = "encountered poisoned lock - a test thread panicked";

/// An allocation tracking facility that hands out scripted snapshots.
///
/// Snapshots are handed out in the order they were queued. Once the queue is empty, the last
/// snapshot is repeated (or an empty one, if none was ever queued).
#[derive(Clone, Debug, Default)]
pub struct FakeFacility {
    state: Arc<Mutex<FakeState>>,
}

#[derive(Debug, Default)]
struct FakeState {
    active: bool,
    engaged_frame_depth: Option<usize>,
    engage_count: usize,
    disengage_count: usize,
    snapshots_taken: usize,
    queued: VecDeque<Snapshot>,
    last: Option<Snapshot>,
    snapshot_failure: Option<String>,
}

impl FakeFacility {
    /// Creates a facility with no snapshots queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a facility with the given snapshots queued.
    #[must_use]
    pub fn with_snapshots(snapshots: impl IntoIterator<Item = Snapshot>) -> Self {
        let facility = Self::new();
        for snapshot in snapshots {
            facility.push_snapshot(snapshot);
        }
        facility
    }

    /// Queues a snapshot to be handed out.
    pub fn push_snapshot(&self, snapshot: Snapshot) {
        self.lock().queued.push_back(snapshot);
    }

    /// Pretends that something else has engaged the facility.
    pub fn occupy(&self) {
        self.lock().active = true;
    }

    /// Makes the next snapshot fail with a facility error carrying `message`.
    pub fn fail_next_snapshot(&self, message: impl Into<String>) {
        self.lock().snapshot_failure = Some(message.into());
    }

    /// The frame depth of the most recent engagement, if ever engaged.
    #[must_use]
    pub fn engaged_frame_depth(&self) -> Option<usize> {
        self.lock().engaged_frame_depth
    }

    /// How many times the facility was engaged.
    #[must_use]
    pub fn engage_count(&self) -> usize {
        self.lock().engage_count
    }

    /// How many times the facility was asked to disengage, including when not engaged.
    #[must_use]
    pub fn disengage_count(&self) -> usize {
        self.lock().disengage_count
    }

    /// How many snapshots were handed out.
    #[must_use]
    pub fn snapshots_taken(&self) -> usize {
        self.lock().snapshots_taken
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect(ERR_POISONED_LOCK)
    }
}

impl AllocationFacility for FakeFacility {
    fn is_active(&self) -> bool {
        self.lock().active
    }

    fn engage(&self, frame_depth: NonZero<usize>) -> Result<()> {
        let mut state = self.lock();
        state.active = true;
        state.engaged_frame_depth = Some(frame_depth.get());
        state.engage_count = state.engage_count.saturating_add(1);
        Ok(())
    }

    fn disengage(&self) {
        let mut state = self.lock();
        state.active = false;
        state.disengage_count = state.disengage_count.saturating_add(1);
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let mut state = self.lock();

        if !state.active {
            return Err(Error::NotTracing);
        }

        if let Some(message) = state.snapshot_failure.take() {
            return Err(Error::facility(message));
        }

        state.snapshots_taken = state.snapshots_taken.saturating_add(1);

        let snapshot = match state.queued.pop_front() {
            Some(snapshot) => snapshot,
            None => state
                .last
                .clone()
                .unwrap_or_else(|| Snapshot::new(Vec::new(), 1)),
        };

        state.last = Some(snapshot.clone());
        Ok(snapshot)
    }
}

/// Starts describing a snapshot.
///
/// # Example
///
/// ```rust
/// let snapshot = testing::snapshot()
///     .allocation(1024, &[("src/cache.rs", 40), ("src/main.rs", 7)])
///     .allocations(3, 16, &[("src/main.rs", 9)])
///     .build();
///
/// assert_eq!(snapshot.len(), 4);
/// ```
#[must_use]
pub fn snapshot() -> SnapshotBuilder {
    SnapshotBuilder::default()
}

/// Describes the live allocations of a scripted snapshot.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    traces: Vec<Trace>,
}

impl SnapshotBuilder {
    /// Adds a live allocation of `size` bytes made from the given `(file, line)` frames,
    /// most recent call first.
    #[must_use]
    pub fn allocation(self, size: u64, frames: &[(&str, u32)]) -> Self {
        self.allocations(1, size, frames)
    }

    /// Adds `count` live allocations of `size` bytes each, all made from the same frames.
    #[must_use]
    pub fn allocations(mut self, count: usize, size: u64, frames: &[(&str, u32)]) -> Self {
        let traceback = traceback(frames);
        self.traces
            .extend((0..count).map(|_| Trace::new(size, traceback.clone())));
        self
    }

    /// Creates the snapshot.
    #[must_use]
    pub fn build(self) -> Snapshot {
        let frame_depth = self
            .traces
            .iter()
            .map(|trace| trace.traceback().frames().len())
            .max()
            .unwrap_or(1);

        Snapshot::new(self.traces, frame_depth)
    }
}

/// Creates a traceback from `(file, line)` frames, most recent call first.
fn traceback(frames: &[(&str, u32)]) -> Traceback {
    Traceback::new(
        frames
            .iter()
            .map(|(filename, lineno)| Frame::new(*filename, *lineno))
            .collect::<Vec<_>>(),
    )
}

/// A sink that keeps every message it receives.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    /// Creates a sink that has not received anything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The messages received so far, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect(ERR_POISONED_LOCK).clone()
    }
}

impl ReportSink for RecordingSink {
    fn emit(&mut self, message: &str) {
        self.messages
            .lock()
            .expect(ERR_POISONED_LOCK)
            .push(message.to_string());
    }
}

/// A collector that counts how many times it was asked to collect.
#[derive(Clone, Debug, Default)]
pub struct CountingCollector {
    collections: Arc<AtomicUsize>,
}

impl CountingCollector {
    /// Creates a collector that has not collected yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the collector was asked to collect.
    #[must_use]
    pub fn count(&self) -> usize {
        self.collections.load(atomic::Ordering::Relaxed)
    }
}

impl Collector for CountingCollector {
    fn collect(&mut self) {
        self.collections.fetch_add(1, atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, reason = "panic is fine in tests")]
mod tests {
    use super::*;

    fn depth(value: usize) -> NonZero<usize> {
        NonZero::new(value).unwrap()
    }

    #[test]
    fn facility_repeats_last_snapshot() {
        let facility = FakeFacility::with_snapshots([
            snapshot().allocation(10, &[("a.rs", 1)]).build(),
            snapshot().allocation(20, &[("a.rs", 1)]).build(),
        ]);
        facility.engage(depth(3)).unwrap();

        let sizes: Vec<u64> = (0..3)
            .map(|_| facility.snapshot().unwrap().total_size())
            .collect();

        assert_eq!(sizes, vec![10, 20, 20]);
        assert_eq!(facility.snapshots_taken(), 3);
        assert_eq!(facility.engaged_frame_depth(), Some(3));
    }

    #[test]
    fn facility_without_snapshots_is_empty() {
        let facility = FakeFacility::new();
        facility.engage(depth(1)).unwrap();

        assert!(facility.snapshot().unwrap().is_empty());
    }

    #[test]
    fn facility_fails_once() {
        let facility = FakeFacility::new();
        facility.engage(depth(1)).unwrap();
        facility.fail_next_snapshot("boom");

        assert!(matches!(facility.snapshot(), Err(Error::Facility { .. })));
        assert!(facility.snapshot().is_ok());
        assert_eq!(facility.snapshots_taken(), 1);
    }

    #[test]
    fn facility_snapshot_requires_engagement() {
        let facility = FakeFacility::new();

        assert!(matches!(facility.snapshot(), Err(Error::NotTracing)));

        facility.engage(depth(1)).unwrap();
        facility.disengage();

        assert!(matches!(facility.snapshot(), Err(Error::NotTracing)));
        assert_eq!(facility.disengage_count(), 1);
    }

    #[test]
    fn clones_share_state() {
        let facility = FakeFacility::new();
        let other = facility.clone();

        other.occupy();

        assert!(facility.is_active());
    }

    #[test]
    fn sink_and_collector_record_usage() {
        let sink = RecordingSink::new();
        let mut owned = sink.clone();
        owned.emit("first");
        owned.emit("second");

        let collector = CountingCollector::new();
        let mut owned = collector.clone();
        owned.collect();

        assert_eq!(sink.messages(), vec!["first", "second"]);
        assert_eq!(collector.count(), 1);
    }

    #[test]
    fn builder_sets_frame_depth_from_deepest_traceback() {
        let snapshot = snapshot()
            .allocation(1, &[("a.rs", 1)])
            .allocation(1, &[("a.rs", 1), ("b.rs", 2), ("c.rs", 3)])
            .build();

        assert_eq!(snapshot.frame_depth(), 3);
        assert_eq!(snapshot.traces()[1].traceback().to_string(), "a.rs:1");
    }
}
