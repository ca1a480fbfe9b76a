//! The contract between the tracer and whatever records allocations.

use std::num::NonZero;

use crate::{Result, Snapshot};

/// Records the live allocations of the process and captures them as snapshots.
///
/// Allocation tracking is process-wide state, so at most one tracing session may have a
/// facility engaged at any given time. The tracer relies on [`is_active()`][Self::is_active]
/// to refuse to start a second session.
///
/// The crate ships [`ProcessFacility`][crate::ProcessFacility], which records allocations
/// made through the [`Allocator`][crate::Allocator] global allocator. Other implementations
/// can be injected via [`MemoryTracer::with_facility()`][crate::MemoryTracer::with_facility],
/// e.g. to simulate contention or failures in tests.
pub trait AllocationFacility {
    /// Whether allocations are currently being recorded.
    fn is_active(&self) -> bool;

    /// Starts recording allocations, capturing at most `frame_depth` frames of each call stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the facility is unable to record allocations.
    fn engage(&self, frame_depth: NonZero<usize>) -> Result<()>;

    /// Stops recording allocations and discards what has been recorded.
    ///
    /// Does nothing if allocations are not being recorded.
    fn disengage(&self);

    /// Captures the allocations that are live right now.
    ///
    /// # Errors
    ///
    /// Returns an error if the facility is not recording allocations or fails to capture them.
    fn snapshot(&self) -> Result<Snapshot>;
}
