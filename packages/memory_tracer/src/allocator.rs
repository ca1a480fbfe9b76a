//! Allocation wrapper that records live allocations while tracking is engaged.

use std::alloc::{GlobalAlloc, Layout};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{self, AtomicBool, AtomicUsize};
use std::sync::{LazyLock, Mutex};

use crate::constants::ERR_POISONED_LOCK;

/// Stack frames captured on top of the configured depth, to make room for the frames of the
/// allocator machinery itself, which are stripped when a snapshot is symbolized.
///
/// Growing a standard library collection can pass through several dozen frames of `alloc`,
/// `core` and the collection's own internals before reaching the allocator, and all of them
/// must fit or the caller is lost.
pub(crate) const INTERNAL_FRAME_ALLOWANCE: usize = 64;

/// Source file of the allocator, whose frames are stripped from symbolized call stacks.
pub(crate) const ALLOCATOR_SOURCE_FILE: &str = file!();

/// Set on the first allocation that passes through [`Allocator`], which happens long before
/// `main()` if the allocator is registered as the global allocator.
static ALLOCATOR_INSTALLED: AtomicBool = AtomicBool::new(false);

static TRACKING_ENGAGED: AtomicBool = AtomicBool::new(false);

/// Number of return addresses captured per allocation, including the internal allowance.
static CAPTURE_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// A live allocation as recorded by the allocator: size and raw return addresses,
/// most recent call first.
#[derive(Debug)]
pub(crate) struct LiveAllocation {
    pub(crate) size: u64,
    pub(crate) return_addresses: Box<[usize]>,
}

// Keyed by the address of the allocation.
static LIVE_ALLOCATIONS: LazyLock<Mutex<HashMap<usize, LiveAllocation>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

thread_local! {
    // Set while this thread is doing tracking bookkeeping. Recording an allocation itself
    // allocates (stack capture, map growth), as does building a snapshot, and none of that
    // may be recorded or we would recurse into the allocator and deadlock on the map.
    static BOOKKEEPING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as doing tracking bookkeeping until dropped.
///
/// Returns `None` if the thread is already doing bookkeeping or its thread-local storage
/// is being torn down, in which case nothing may be recorded.
#[derive(Debug)]
pub(crate) struct BookkeepingGuard {
    _private: (),
}

impl BookkeepingGuard {
    pub(crate) fn enter() -> Option<Self> {
        BOOKKEEPING
            .try_with(|flag| {
                if flag.replace(true) {
                    None
                } else {
                    Some(Self { _private: () })
                }
            })
            .ok()
            .flatten()
    }
}

impl Drop for BookkeepingGuard {
    fn drop(&mut self) {
        // If the TLS slot is already gone there is nothing left to reset.
        _ = BOOKKEEPING.try_with(|flag| flag.set(false));
    }
}

pub(crate) fn is_allocator_installed() -> bool {
    ALLOCATOR_INSTALLED.load(atomic::Ordering::Relaxed)
}

pub(crate) fn is_tracking_engaged() -> bool {
    TRACKING_ENGAGED.load(atomic::Ordering::Acquire)
}

/// Forgets anything recorded so far and starts recording with the given capture depth.
pub(crate) fn engage_tracking(capture_depth: usize) {
    let _guard = BookkeepingGuard::enter();

    LIVE_ALLOCATIONS.lock().expect(ERR_POISONED_LOCK).clear();
    CAPTURE_DEPTH.store(capture_depth, atomic::Ordering::Relaxed);
    TRACKING_ENGAGED.store(true, atomic::Ordering::Release);
}

/// Stops recording and forgets anything recorded so far.
pub(crate) fn disengage_tracking() {
    let _guard = BookkeepingGuard::enter();

    TRACKING_ENGAGED.store(false, atomic::Ordering::Release);

    // Moved out of the lock so the records are freed without holding it.
    let records = std::mem::take(&mut *LIVE_ALLOCATIONS.lock().expect(ERR_POISONED_LOCK));
    drop(records);
}

/// Copies the records of all live allocations.
///
/// The caller is expected to hold a [`BookkeepingGuard`], so the copy is not itself recorded.
pub(crate) fn live_allocations() -> Vec<(u64, Box<[usize]>)> {
    LIVE_ALLOCATIONS
        .lock()
        .expect(ERR_POISONED_LOCK)
        .values()
        .map(|allocation| (allocation.size, allocation.return_addresses.clone()))
        .collect()
}

fn capture_return_addresses() -> Box<[usize]> {
    let depth = CAPTURE_DEPTH.load(atomic::Ordering::Relaxed);
    let mut addresses = Vec::with_capacity(depth);

    backtrace::trace(|frame| {
        if addresses.len() >= depth {
            return false;
        }

        addresses.push(frame.ip().addr());
        true
    });

    addresses.into_boxed_slice()
}

fn record_allocation(ptr: *mut u8, size: usize) {
    if ptr.is_null() || !is_tracking_engaged() {
        return;
    }

    let Some(_guard) = BookkeepingGuard::enter() else {
        return;
    };

    let size: u64 = size.try_into().expect("usize always fits into u64");

    // Captured before taking the lock; stack walking can be slow.
    let return_addresses = capture_return_addresses();

    LIVE_ALLOCATIONS.lock().expect(ERR_POISONED_LOCK).insert(
        ptr.addr(),
        LiveAllocation {
            size,
            return_addresses,
        },
    );
}

fn record_deallocation(ptr: *mut u8) {
    if !is_tracking_engaged() {
        return;
    }

    let Some(_guard) = BookkeepingGuard::enter() else {
        return;
    };

    let removed = LIVE_ALLOCATIONS
        .lock()
        .expect(ERR_POISONED_LOCK)
        .remove(&ptr.addr());

    // Freed after the lock is released.
    drop(removed);
}

/// A memory allocator that records live allocations while a tracer is active.
///
/// This allocator wraps any [`GlobalAlloc`] implementation. While no tracing session is
/// active it only forwards to the wrapped allocator. While a session is active, it records
/// the size and call stack of every live allocation, which is what
/// [`ProcessFacility`][crate::ProcessFacility] snapshots are made of.
///
/// # Examples
///
/// ```rust
/// use memory_tracer::Allocator;
///
/// #[global_allocator]
/// static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
/// ```
pub struct Allocator<A: GlobalAlloc> {
    inner: A,
}

impl<A: GlobalAlloc> fmt::Debug for Allocator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("inner", &"<allocator>")
            .finish()
    }
}

impl Allocator<std::alloc::System> {
    /// Creates a new tracking allocator using the system's default allocator.
    #[must_use]
    #[inline]
    pub const fn system() -> Self {
        Self {
            inner: std::alloc::System,
        }
    }
}

impl<A: GlobalAlloc> Allocator<A> {
    /// Creates a new tracking allocator that records allocations made through the provided
    /// allocator.
    #[must_use]
    #[inline]
    pub const fn new(allocator: A) -> Self {
        Self { inner: allocator }
    }
}

#[inline]
fn mark_installed() {
    if !ALLOCATOR_INSTALLED.load(atomic::Ordering::Relaxed) {
        ALLOCATOR_INSTALLED.store(true, atomic::Ordering::Relaxed);
    }
}

// SAFETY: We delegate all allocation operations to the underlying allocator,
// which already implements GlobalAlloc safely, while adding tracking functionality.
unsafe impl<A: GlobalAlloc> GlobalAlloc for Allocator<A> {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        mark_installed();

        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        let ptr = unsafe { self.inner.alloc(layout) };
        record_allocation(ptr, layout.size());
        ptr
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        record_deallocation(ptr);

        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        unsafe { self.inner.dealloc(ptr, layout) }
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        mark_installed();

        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };
        record_allocation(ptr, layout.size());
        ptr
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        mark_installed();

        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        let new_ptr = unsafe { self.inner.realloc(ptr, layout, new_size) };

        // On failure the original block is still live and keeps its record.
        if !new_ptr.is_null() {
            record_deallocation(ptr);
            record_allocation(new_ptr, new_size);
        }

        new_ptr
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(Allocator<std::alloc::System>: Send, Sync);

    #[test]
    fn bookkeeping_guard_is_not_reentrant() {
        let outer = BookkeepingGuard::enter();
        assert!(outer.is_some());
        assert!(BookkeepingGuard::enter().is_none());

        drop(outer);
        assert!(BookkeepingGuard::enter().is_some());
    }

    #[test]
    fn stack_capture_respects_depth() {
        // The unit test binary does not use the tracking allocator, so the capture depth
        // is only ever set here.
        CAPTURE_DEPTH.store(2, atomic::Ordering::Relaxed);

        let addresses = capture_return_addresses();

        assert_eq!(addresses.len(), 2);
    }
}
