//! Process-wide allocation tracking facility backed by the tracking allocator.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::num::NonZero;
use std::path::{Component, Path};
use std::ptr;
use std::sync::atomic::{self, AtomicUsize};

use tracing::{debug, trace};

use crate::allocator::{
    ALLOCATOR_SOURCE_FILE, BookkeepingGuard, INTERNAL_FRAME_ALLOWANCE, disengage_tracking,
    engage_tracking, is_allocator_installed, is_tracking_engaged, live_allocations,
};
use crate::{AllocationFacility, Error, Frame, Result, Snapshot, Trace, Traceback};

/// Frames captured per allocation, as requested by the engaged session.
static FRAME_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// The allocation tracking facility of this process, fed by the
/// [`Allocator`][crate::Allocator] global allocator.
///
/// All instances refer to the same process-wide state, so the type is a cheap handle that can
/// be created wherever it is needed.
///
/// The tracking allocator must be registered as the global allocator of the process for this
/// facility to be usable:
///
/// ```rust
/// use memory_tracer::{AllocationFacility, Allocator, ProcessFacility};
///
/// #[global_allocator]
/// static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
///
/// let facility = ProcessFacility::new();
/// assert!(!facility.is_active());
/// ```
///
/// # Call stacks
///
/// Call stacks are symbolized when a snapshot is taken, using the debug information of the
/// binary. Without debug information every allocation is attributed to `<unknown>`.
///
/// The frames of the allocation machinery (this crate's allocator, the allocator shims and
/// the `alloc`, `core` and `std` libraries) are removed from the top of each call stack, so
/// the most recent frame is the code that asked for memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessFacility {
    _private: (),
}

impl ProcessFacility {
    /// Creates a handle to the allocation tracking facility of this process.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl AllocationFacility for ProcessFacility {
    fn is_active(&self) -> bool {
        is_tracking_engaged()
    }

    fn engage(&self, frame_depth: NonZero<usize>) -> Result<()> {
        if !is_allocator_installed() {
            return Err(Error::AllocatorNotInstalled);
        }

        let frame_depth = frame_depth.get();
        FRAME_DEPTH.store(frame_depth, atomic::Ordering::Relaxed);
        engage_tracking(frame_depth.saturating_add(INTERNAL_FRAME_ALLOWANCE));

        debug!(frame_depth, "allocation tracking engaged");
        Ok(())
    }

    fn disengage(&self) {
        let was_engaged = is_tracking_engaged();

        disengage_tracking();

        if was_engaged {
            debug!("allocation tracking disengaged");
        }
    }

    fn snapshot(&self) -> Result<Snapshot> {
        if !is_tracking_engaged() {
            return Err(Error::NotTracing);
        }

        // Everything allocated while building the snapshot stays out of the records.
        let _guard = BookkeepingGuard::enter();

        let frame_depth = FRAME_DEPTH.load(atomic::Ordering::Relaxed);
        let mut symbolizer = Symbolizer::new(frame_depth);

        let traces: Vec<Trace> = live_allocations()
            .into_iter()
            .map(|(size, return_addresses)| {
                Trace::new(size, symbolizer.traceback(return_addresses))
            })
            .collect();

        trace!(
            live_allocations = traces.len(),
            distinct_call_stacks = symbolizer.tracebacks.len(),
            "captured allocation snapshot"
        );

        Ok(Snapshot::new(traces, frame_depth))
    }
}

/// One frame of a resolved return address.
#[derive(Clone, Debug)]
struct ResolvedFrame {
    frame: Frame,

    /// Whether the frame belongs to the allocation machinery rather than the code that
    /// asked for memory.
    internal: bool,
}

/// Turns raw return addresses into tracebacks, caching what it has already resolved.
#[derive(Debug)]
struct Symbolizer {
    frame_depth: usize,
    frames: HashMap<usize, Vec<ResolvedFrame>>,
    tracebacks: HashMap<Box<[usize]>, Traceback>,
}

impl Symbolizer {
    fn new(frame_depth: usize) -> Self {
        Self {
            frame_depth,
            frames: HashMap::new(),
            tracebacks: HashMap::new(),
        }
    }

    fn traceback(&mut self, return_addresses: Box<[usize]>) -> Traceback {
        if let Some(traceback) = self.tracebacks.get(&return_addresses) {
            return traceback.clone();
        }

        let mut resolved = Vec::with_capacity(return_addresses.len());

        for &address in &*return_addresses {
            resolved.extend(
                self.frames
                    .entry(address)
                    .or_insert_with(|| resolve(address))
                    .iter()
                    .cloned(),
            );
        }

        let traceback = Traceback::new(strip_internal_frames(resolved, self.frame_depth));

        self.tracebacks.insert(return_addresses, traceback.clone());
        traceback
    }
}

/// Resolves one return address into one frame per symbol, innermost first.
///
/// Calls inlined at the address each produce their own symbol, so a single address can stand
/// for several frames of the call stack.
fn resolve(address: usize) -> Vec<ResolvedFrame> {
    let mut symbols = Vec::new();

    backtrace::resolve(ptr::without_provenance_mut(address), |symbol| {
        let is_shim = symbol
            .name()
            .is_some_and(|name| is_allocator_shim(&name.to_string()));

        let location = symbol
            .filename()
            .zip(symbol.lineno())
            .map(|(filename, lineno)| Frame::new(&*filename.to_string_lossy(), lineno));

        symbols.push((location, is_shim));
    });

    frames_for_symbols(symbols)
}

/// Classifies the symbols of one address. Symbols without a source location, and addresses
/// without any symbols, become `<unknown>` frames counted as machinery.
fn frames_for_symbols(
    symbols: impl IntoIterator<Item = (Option<Frame>, bool)>,
) -> Vec<ResolvedFrame> {
    let mut frames: Vec<ResolvedFrame> = symbols
        .into_iter()
        .map(|(location, is_shim)| match location {
            Some(frame) => ResolvedFrame {
                internal: is_shim || is_internal_file(Path::new(frame.filename())),
                frame,
            },
            None => ResolvedFrame {
                frame: Frame::unknown(),
                internal: true,
            },
        })
        .collect();

    if frames.is_empty() {
        frames.push(ResolvedFrame {
            frame: Frame::unknown(),
            internal: true,
        });
    }

    frames
}

/// Drops the allocation machinery from the top of the call stack and truncates the rest.
///
/// If nothing but machinery is left, the raw frames are kept so the allocation is still
/// attributed to something.
fn strip_internal_frames(resolved: Vec<ResolvedFrame>, frame_depth: usize) -> Vec<Frame> {
    let first_caller_frame = resolved
        .iter()
        .position(|resolved| !resolved.internal)
        .unwrap_or(0);

    resolved
        .into_iter()
        .skip(first_caller_frame)
        .take(frame_depth)
        .map(|resolved| resolved.frame)
        .collect()
}

/// The functions the compiler generates to route allocations to the global allocator.
fn is_allocator_shim(symbol_name: &str) -> bool {
    symbol_name.contains("__rust_") || symbol_name.contains("__rg_")
}

/// Where the standard library's own dependencies (e.g. the `hashbrown` behind `HashMap`) are
/// built from.
const STD_DEPENDENCIES_DIR: &str = "/rust/deps";

fn is_internal_file(path: &Path) -> bool {
    if path.ends_with(ALLOCATOR_SOURCE_FILE) || path.starts_with(STD_DEPENDENCIES_DIR) {
        return true;
    }

    let components: Vec<&OsStr> = path
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect();

    let is_standard_library = components.windows(2).any(|pair| {
        matches!(pair, [library, name] if *library == "library"
            && (*name == "alloc" || *name == "core" || *name == "std"))
    });

    let is_backtrace_crate = components.iter().any(|name| {
        name.to_str()
            .is_some_and(|name| name.starts_with("backtrace-"))
    });

    is_standard_library || is_backtrace_crate
}
