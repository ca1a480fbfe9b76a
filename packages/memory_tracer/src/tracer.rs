//! The memory tracer and its scoped usage.

use std::ops::{Deref, DerefMut};

use crate::{
    AllocationFacility, Checkpoint, ComparisonReport, Error, GroupBy, ProcessFacility, Result,
    Snapshot, TracebackReport, TracerConfig,
};

const STARTING_MESSAGE: &str = "Starting memory tracer";
const STOPPED_MESSAGE: &str = "Stopped memory tracer";

const CUMULATIVE_TITLE: &str = "Top cumulative stats since start";
const INCREMENTAL_TITLE: &str = "Top incremental stats since previous";
const CURRENT_TITLE: &str = "Top current stats";

/// Snapshots held while tracing.
#[derive(Debug)]
struct Session {
    /// Taken when tracing started, never replaced until tracing stops.
    baseline: Snapshot,

    /// Taken by the most recent update, or the baseline if there has been none.
    previous: Snapshot,
}

/// Reports how the live memory of the process grows between checkpoints.
///
/// Start the tracer, call [`update()`][Self::update] at interesting points of the program and
/// stop the tracer when done. Each update reports:
///
/// 1. growth since the tracer started, by file;
/// 2. growth since the previous update, by file and line;
/// 3. the live memory right now, by file;
/// 4. the call stacks with the most live memory right now, in detail.
///
/// This type is not meant for use in production, serving only as a development tool.
///
/// # Examples
///
/// ```
/// use memory_tracer::{Allocator, MemoryTracer, TracerConfig};
///
/// #[global_allocator]
/// static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
///
/// # fn main() -> memory_tracer::Result<()> {
/// let mut tracer = MemoryTracer::new(TracerConfig::new().top_n(5));
///
/// let mut scope = tracer.scope()?;
///
/// let mut cache = Vec::new();
/// for i in 0..1000 {
///     cache.push(format!("entry {i}"));
///     if i % 100 == 0 {
///         scope.update()?;
///     }
/// }
///
/// // Tracing stops when the scope is dropped.
/// drop(scope);
/// # Ok(())
/// # }
/// ```
///
/// # One tracer at a time
///
/// Allocation tracking is process-wide, so only one tracer can be tracing at any given time.
/// Starting a second one fails with [`Error::AlreadyTracing`].
#[derive(Debug)]
pub struct MemoryTracer<F: AllocationFacility = ProcessFacility> {
    facility: F,
    config: TracerConfig,
    session: Option<Session>,
}

impl MemoryTracer<ProcessFacility> {
    /// Creates a tracer that traces the allocations of this process.
    ///
    /// The [`Allocator`][crate::Allocator] must be registered as the global allocator for
    /// the tracer to be able to start.
    ///
    /// Nothing is traced until the tracer is started.
    #[must_use]
    pub fn new(config: TracerConfig) -> Self {
        Self::with_facility(ProcessFacility::new(), config)
    }
}

impl Default for MemoryTracer<ProcessFacility> {
    fn default() -> Self {
        Self::new(TracerConfig::new())
    }
}

impl<F: AllocationFacility> MemoryTracer<F> {
    /// Creates a tracer that obtains its snapshots from the given facility.
    ///
    /// Nothing is traced until the tracer is started.
    #[must_use]
    pub fn with_facility(facility: F, config: TracerConfig) -> Self {
        Self {
            facility,
            config,
            session: None,
        }
    }

    /// The configuration of the tracer.
    #[must_use]
    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// The facility the tracer obtains its snapshots from.
    #[must_use]
    pub fn facility(&self) -> &F {
        &self.facility
    }

    /// Whether the tracer has been started and not yet stopped.
    ///
    /// A disabled tracer is never tracing.
    #[must_use]
    pub fn is_tracing(&self) -> bool {
        self.session.is_some()
    }

    /// Starts tracing and takes the baseline snapshot that all cumulative reports compare to.
    ///
    /// Does nothing if the tracer is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyTracing`] if the facility is already engaged, whether by this
    /// tracer or anything else. Errors of the facility are returned unchanged; if the
    /// baseline snapshot fails, the facility is disengaged again first.
    pub fn start(&mut self) -> Result<&mut Self> {
        if !self.config.enabled {
            return Ok(self);
        }

        if self.facility.is_active() {
            return Err(Error::AlreadyTracing);
        }

        self.config.sink.emit(STARTING_MESSAGE);

        self.facility.engage(self.config.frame_depth)?;

        let baseline = match self.facility.snapshot() {
            Ok(snapshot) => snapshot,
            Err(error) => {
                self.facility.disengage();
                return Err(error);
            }
        };

        self.session = Some(Session {
            previous: baseline.clone(),
            baseline,
        });

        Ok(self)
    }

    /// Stops tracing and discards the snapshots.
    ///
    /// Does nothing if the tracer is disabled. Stopping a tracer that is not tracing is
    /// harmless, which makes this safe to call from cleanup paths.
    pub fn stop(&mut self) {
        if !self.config.enabled {
            return;
        }

        self.session = None;
        self.facility.disengage();

        self.config.sink.emit(STOPPED_MESSAGE);
    }

    /// Takes a snapshot and reports how it compares to the baseline and to the previous update.
    ///
    /// Each report is emitted to the sink as one message and also returned for inspection.
    /// The snapshot becomes the one the next update compares to.
    ///
    /// Returns `None` if the tracer is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTracing`] if the tracer has not been started. Errors of the facility
    /// are returned unchanged.
    pub fn update(&mut self) -> Result<Option<Checkpoint>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let Some(session) = self.session.as_mut() else {
            return Err(Error::NotTracing);
        };

        if self.config.collect_before_snapshot {
            self.config.collector.collect();
        }

        let current = self.facility.snapshot()?;
        let top_n = self.config.top_n.get();

        let checkpoint = Checkpoint {
            cumulative: ComparisonReport::new(
                CUMULATIVE_TITLE,
                current.compare_to(&session.baseline, GroupBy::File),
                top_n,
            ),
            incremental: ComparisonReport::new(
                INCREMENTAL_TITLE,
                current.compare_to(&session.previous, GroupBy::Line),
                top_n,
            ),
            current: ComparisonReport::new(
                CURRENT_TITLE,
                current.statistics(GroupBy::File),
                top_n,
            ),
            tracebacks: current
                .statistics(GroupBy::Traceback)
                .into_iter()
                .take(self.config.traceback_limit)
                .map(TracebackReport::new)
                .collect(),
        };

        let sink = &mut self.config.sink;
        sink.emit(&checkpoint.cumulative.to_string());
        sink.emit(&checkpoint.incremental.to_string());
        sink.emit(&checkpoint.current.to_string());

        for traceback in &checkpoint.tracebacks {
            sink.emit(&traceback.to_string());
        }

        session.previous = current;

        Ok(Some(checkpoint))
    }

    /// Starts tracing until the returned scope is dropped.
    ///
    /// The scope dereferences to the tracer, so updates can be made through it. Dropping the
    /// scope stops the tracer, including when a panic unwinds through it.
    ///
    /// # Errors
    ///
    /// Returns the error of [`start()`][Self::start] if the tracer cannot start, in which
    /// case there is nothing to stop.
    pub fn scope(&mut self) -> Result<TracingScope<'_, F>> {
        self.start()?;
        Ok(TracingScope { tracer: self })
    }

    /// Runs `f` with tracing started, stopping the tracer afterwards.
    ///
    /// # Examples
    ///
    /// ```
    /// use memory_tracer::{Allocator, MemoryTracer};
    ///
    /// #[global_allocator]
    /// static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
    ///
    /// # fn main() -> memory_tracer::Result<()> {
    /// let mut tracer = MemoryTracer::default();
    ///
    /// let cache = tracer.run(|tracer| -> memory_tracer::Result<Vec<u64>> {
    ///     let cache: Vec<u64> = (0..1000).collect();
    ///     tracer.update()?;
    ///     Ok(cache)
    /// })??;
    ///
    /// assert!(!tracer.is_tracing());
    /// # drop(cache);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns the error of [`start()`][Self::start] if the tracer cannot start, in which
    /// case `f` is not called.
    pub fn run<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        let mut scope = self.scope()?;
        Ok(f(&mut scope))
    }
}

/// A started [`MemoryTracer`] that is stopped when dropped.
///
/// Created by [`MemoryTracer::scope()`].
#[derive(Debug)]
#[must_use = "Tracing stops when the scope is dropped"]
pub struct TracingScope<'a, F: AllocationFacility> {
    tracer: &'a mut MemoryTracer<F>,
}

impl<F: AllocationFacility> Deref for TracingScope<'_, F> {
    type Target = MemoryTracer<F>;

    fn deref(&self) -> &Self::Target {
        self.tracer
    }
}

impl<F: AllocationFacility> DerefMut for TracingScope<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.tracer
    }
}

impl<F: AllocationFacility> Drop for TracingScope<'_, F> {
    fn drop(&mut self) {
        self.tracer.stop();
    }
}
