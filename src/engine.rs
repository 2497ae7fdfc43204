//! Interface to the atomic-update engine and durable allocator.
//!
//! The container never rolls anything back itself. Before it first overwrites
//! previously-initialized durable bytes inside a scope it registers them with
//! [`Engine::snapshot`]; the engine restores them if the scope aborts. All
//! segment storage is obtained from and returned to the engine's
//! [`Allocator`] implementation, whose effects the engine also undoes on abort.

use std::alloc::Layout;
use std::ptr::NonNull;

use allocator_api2::alloc::Allocator;

use crate::error::{Error, Result};

/// Atomic-update engine with a scope-aware durable allocator.
///
/// `allocate`/`deallocate` from [`Allocator`] are the durable allocator:
/// inside a scope, allocations are released again if the scope aborts, and
/// deallocations only take effect once the scope commits.
pub trait Engine: Allocator {
    /// Runs `body` inside an atomic-update scope.
    ///
    /// If a scope is already active the body joins it. When the outermost
    /// body returns `Err`, every registered range is restored, every
    /// allocation made in the scope is released, and every deferred
    /// deallocation is cancelled before the error is returned.
    fn run<R, F>(&self, body: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>;

    /// Returns `true` while a scope is active.
    fn in_scope(&self) -> bool;

    /// Registers `len` bytes at `ptr` for undo in the current scope.
    ///
    /// Registering a range that is already registered is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr..ptr+len` must be valid for reads and writes until the current
    /// scope ends.
    unsafe fn snapshot(&self, ptr: NonNull<u8>, len: usize) -> Result<()>;

    /// Schedules a volatile allocation obtained from the global allocator to
    /// be released once the current scope ends, however it ends.
    ///
    /// Outside a scope the allocation is released immediately.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated by the global allocator with `layout`
    /// and must not be used by the caller afterwards.
    unsafe fn retire(&self, ptr: NonNull<u8>, layout: Layout);

    /// Largest block, in bytes, a single allocation may request.
    fn max_alloc_size(&self) -> usize;

    /// Fails with [`Error::Scope`] unless a scope is active.
    fn ensure_scope(&self, op: &'static str) -> Result<()> {
        if self.in_scope() {
            Ok(())
        } else {
            Err(Error::Scope(op))
        }
    }
}

/// Registers a typed value for undo.
///
/// # Safety
///
/// `value` must stay at the same address, and remain allocated, until the
/// current scope ends.
#[inline]
pub(crate) unsafe fn snapshot_value<E: Engine + ?Sized, V>(engine: &E, value: *const V) -> Result<()> {
    let len = std::mem::size_of::<V>();
    if len == 0 {
        return Ok(());
    }
    engine.snapshot(NonNull::new_unchecked(value as *mut u8), len)
}

/// Registers `count` consecutive values starting at `first` for undo.
///
/// # Safety
///
/// Same requirements as [`snapshot_value`], for the whole run.
#[inline]
pub(crate) unsafe fn snapshot_run<E: Engine + ?Sized, V>(
    engine: &E,
    first: *const V,
    count: usize,
) -> Result<()> {
    let len = std::mem::size_of::<V>() * count;
    if len == 0 {
        return Ok(());
    }
    engine.snapshot(NonNull::new_unchecked(first as *mut u8), len)
}

/// Registers `field` and then overwrites it.
///
/// # Safety
///
/// Same requirements as [`snapshot_value`].
#[inline]
pub(crate) unsafe fn set_field<E: Engine + ?Sized, V: Copy>(engine: &E, field: *mut V, value: V) -> Result<()> {
    snapshot_value(engine, field)?;
    field.write(value);
    Ok(())
}

/// Allocates zero-initialized storage for `count` values of `V`.
pub(crate) fn alloc_array<E: Engine + ?Sized, V>(engine: &E, count: usize) -> Result<NonNull<V>> {
    let layout = array_layout::<V>(count)?;
    if layout.size() > engine.max_alloc_size() {
        return Err(Error::Allocation {
            size: layout.size(),
        });
    }
    let block = engine
        .allocate_zeroed(layout)
        .map_err(|_| Error::Allocation {
            size: layout.size(),
        })?;
    Ok(block.cast())
}

/// Returns storage obtained from [`alloc_array`].
///
/// # Safety
///
/// `ptr` must come from `alloc_array::<V>(engine, count)` on the same engine.
pub(crate) unsafe fn free_array<E: Engine + ?Sized, V>(engine: &E, ptr: NonNull<V>, count: usize) {
    if let Ok(layout) = array_layout::<V>(count) {
        engine.deallocate(ptr.cast(), layout);
    }
}

pub(crate) fn array_layout<V>(count: usize) -> Result<Layout> {
    Layout::array::<V>(count).map_err(|_| Error::Allocation {
        size: std::mem::size_of::<V>().saturating_mul(count),
    })
}
