#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Checkpoint-based memory growth reports for hunting leaks during development.
//!
//! A [`MemoryTracer`] snapshots the live allocations of the process when it starts and at each
//! checkpoint, reporting growth since the start (by file), growth since the previous checkpoint
//! (by file and line), the live memory right now (by file) and the call stacks holding the
//! most memory.
//!
//! The core functionality includes:
//! - [`Allocator`] - A Rust memory allocator wrapper that records live allocations while tracing
//! - [`MemoryTracer`] - Takes snapshots at checkpoints and reports how they compare
//! - [`TracerConfig`] - Report sizes, stack depth and where the reports go
//! - [`Snapshot`] - An immutable capture of the live allocations, with statistics and diffs
//!
//! This package is not meant for use in production, serving only as a development tool.
//!
//! # Simple usage
//!
//! ```
//! use memory_tracer::{Allocator, MemoryTracer, TracerConfig};
//!
//! #[global_allocator]
//! static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
//!
//! fn main() -> memory_tracer::Result<()> {
//!     let mut tracer = MemoryTracer::new(TracerConfig::new().top_n(10));
//!     let mut scope = tracer.scope()?;
//!
//!     let retained: Vec<Vec<u8>> = (0..1000).map(|_| vec![0_u8; 1024]).collect();
//!
//!     // Reports are emitted as `tracing` events with the `memory_tracer` target.
//!     let checkpoint = scope.update()?.expect("the tracer is enabled");
//!     println!("{}", checkpoint.cumulative());
//!
//!     drop(retained);
//!     scope.update()?;
//!
//!     // Tracing stops when the scope is dropped.
//!     Ok(())
//! }
//! ```
//!
//! # Where reports go
//!
//! By default each report is emitted as an INFO level `tracing` event. Any
//! [`ReportSink`], including a plain `FnMut(&str)` closure, can be used instead via
//! [`TracerConfig::sink()`].
//!
//! # One session at a time
//!
//! Allocation tracking is process-wide state. Starting a tracer while another one (or anything
//! else) has the [`AllocationFacility`] engaged fails with [`Error::AlreadyTracing`]. Stopping
//! is always allowed, even if the tracer never started.
//!
//! # Overhead
//!
//! While tracing, every allocation captures a call stack, which makes allocation-heavy code
//! dramatically slower. Snapshots symbolize the call stacks, which takes time proportional to
//! the number of distinct call stacks. When not tracing, the allocator only forwards to the
//! wrapped allocator.
//!
//! # Miri compatibility
//!
//! Miri replaces the global allocator with its own logic, so you cannot trace memory under Miri.

mod allocator;
mod collector;
mod config;
mod constants;
mod error;
mod facility;
mod format;
mod process;
mod report;
mod sink;
mod snapshot;
mod traceback;
mod tracer;

pub use allocator::Allocator;
pub use collector::*;
pub use config::*;
pub use error::*;
pub use facility::*;
pub use process::*;
pub use report::*;
pub use sink::*;
pub use snapshot::*;
pub use traceback::*;
pub use tracer::*;
