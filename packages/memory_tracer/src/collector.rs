//! Hook for releasing transient memory before a snapshot is taken.

/// Releases memory that is no longer needed but not yet returned to the allocator.
///
/// Rust frees memory deterministically, so there is no garbage collector to run. Programs
/// that keep transient memory alive in caches, arenas or pools can plug in whatever empties
/// them, so that snapshots only show memory that is genuinely retained.
///
/// Any `FnMut()` closure is a collector.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
///
/// use memory_tracer::TracerConfig;
///
/// let scratch: Arc<Mutex<Vec<String>>> = Arc::default();
///
/// let config = TracerConfig::new().collector({
///     let scratch = Arc::clone(&scratch);
///     move || scratch.lock().unwrap().clear()
/// });
/// ```
pub trait Collector {
    /// Releases transient memory. Returns once the memory has been released.
    fn collect(&mut self);
}

impl<F> Collector for F
where
    F: FnMut(),
{
    fn collect(&mut self) {
        self();
    }
}

/// A collector that has nothing to release.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCollector;

impl Collector for NoopCollector {
    #[cfg_attr(test, mutants::skip)] // There is nothing to observe.
    fn collect(&mut self) {}
}
