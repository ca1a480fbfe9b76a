//! Tracer configuration.

use std::fmt;
use std::num::NonZero;

use crate::{Collector, NoopCollector, ReportSink, TracingSink};

/// Setting this environment variable to `1` disables every tracer configured with
/// [`TracerConfig::with_env_overrides()`].
pub const DISABLED_ENV_VAR: &str = "MEMORY_TRACER_DISABLED";

const DEFAULT_TOP_N: NonZero<usize> = NonZero::new(20).expect("literal is not zero");
const DEFAULT_TRACEBACK_LIMIT: usize = 1;
const DEFAULT_FRAME_DEPTH: NonZero<usize> = NonZero::new(25).expect("literal is not zero");

/// Configures a [`MemoryTracer`][crate::MemoryTracer].
///
/// Every setting has a default, so `TracerConfig::new()` is a complete configuration:
///
/// | Setting | Default |
/// |---|---|
/// | [`top_n`][Self::top_n] | 20 |
/// | [`traceback_limit`][Self::traceback_limit] | 1 |
/// | [`frame_depth`][Self::frame_depth] | 25 |
/// | [`collect_before_snapshot`][Self::collect_before_snapshot] | `true` |
/// | [`collector`][Self::collector] | [`NoopCollector`] |
/// | [`sink`][Self::sink] | [`TracingSink`] |
/// | [`enabled`][Self::enabled] | `true` |
///
/// # Examples
///
/// ```
/// use memory_tracer::TracerConfig;
///
/// let config = TracerConfig::new()
///     .top_n(5)
///     .traceback_limit(3)
///     .frame_depth(10);
///
/// assert_eq!(config.get_top_n(), 5);
/// ```
pub struct TracerConfig {
    pub(crate) top_n: NonZero<usize>,
    pub(crate) traceback_limit: usize,
    pub(crate) frame_depth: NonZero<usize>,
    pub(crate) collect_before_snapshot: bool,
    pub(crate) collector: Box<dyn Collector + Send>,
    pub(crate) sink: Box<dyn ReportSink + Send>,
    pub(crate) enabled: bool,
}

impl TracerConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            traceback_limit: DEFAULT_TRACEBACK_LIMIT,
            frame_depth: DEFAULT_FRAME_DEPTH,
            collect_before_snapshot: true,
            collector: Box::new(NoopCollector),
            sink: Box::new(TracingSink),
            enabled: true,
        }
    }

    /// Sets the maximum number of rows in each report.
    ///
    /// # Panics
    ///
    /// Panics if `top_n` is zero.
    #[must_use]
    pub fn top_n(mut self, top_n: usize) -> Self {
        self.top_n = NonZero::new(top_n).expect("top_n cannot be zero");
        self
    }

    /// Sets how many of the largest call stacks are reported in detail on each update.
    ///
    /// Zero disables the detailed reports.
    #[must_use]
    pub fn traceback_limit(mut self, traceback_limit: usize) -> Self {
        self.traceback_limit = traceback_limit;
        self
    }

    /// Sets the maximum number of frames captured per allocation.
    ///
    /// # Panics
    ///
    /// Panics if `frame_depth` is zero.
    #[must_use]
    pub fn frame_depth(mut self, frame_depth: usize) -> Self {
        self.frame_depth = NonZero::new(frame_depth).expect("frame_depth cannot be zero");
        self
    }

    /// Sets whether the [collector][Self::collector] runs before each update's snapshot.
    #[must_use]
    pub fn collect_before_snapshot(mut self, collect_before_snapshot: bool) -> Self {
        self.collect_before_snapshot = collect_before_snapshot;
        self
    }

    /// Sets what releases transient memory before each update's snapshot.
    #[must_use]
    pub fn collector(mut self, collector: impl Collector + Send + 'static) -> Self {
        self.collector = Box::new(collector);
        self
    }

    /// Sets where the tracer's messages go.
    #[must_use]
    pub fn sink(mut self, sink: impl ReportSink + Send + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Sets whether the tracer does anything at all.
    ///
    /// A disabled tracer never touches the allocation tracking facility and emits nothing,
    /// so tracing calls can stay in the code while they are not needed.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Disables the tracer if the `MEMORY_TRACER_DISABLED` environment variable is `1`.
    ///
    /// Settings made after this call take precedence.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        let disabled = std::env::var(DISABLED_ENV_VAR);
        self.with_disabled_flag(disabled.as_deref().ok())
    }

    fn with_disabled_flag(self, flag: Option<&str>) -> Self {
        if flag == Some("1") {
            self.enabled(false)
        } else {
            self
        }
    }

    /// The maximum number of rows in each report.
    #[must_use]
    pub fn get_top_n(&self) -> usize {
        self.top_n.get()
    }

    /// How many of the largest call stacks are reported in detail on each update.
    #[must_use]
    pub fn get_traceback_limit(&self) -> usize {
        self.traceback_limit
    }

    /// The maximum number of frames captured per allocation.
    #[must_use]
    pub fn get_frame_depth(&self) -> usize {
        self.frame_depth.get()
    }

    /// Whether the collector runs before each update's snapshot.
    #[must_use]
    pub fn is_collect_before_snapshot(&self) -> bool {
        self.collect_before_snapshot
    }

    /// Whether the tracer does anything at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TracerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerConfig")
            .field("top_n", &self.top_n)
            .field("traceback_limit", &self.traceback_limit)
            .field("frame_depth", &self.frame_depth)
            .field("collect_before_snapshot", &self.collect_before_snapshot)
            .field("collector", &"<collector>")
            .field("sink", &"<sink>")
            .field("enabled", &self.enabled)
            .finish()
    }
}
