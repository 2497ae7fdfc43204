//! In-memory atomic-update engine.
//!
//! `MemPool` emulates a durable pool on the global heap. It keeps the same
//! contract a persistent-memory engine would: undo logging of registered
//! ranges, allocations released on abort, and frees deferred to commit. It
//! backs the test suite and benchmarks, and is usable on hosts without real
//! persistent memory.

use std::alloc::{self, Layout};
use std::collections::BTreeMap;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use allocator_api2::alloc::{AllocError, Allocator};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};

/// Limits for a [`MemPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Total bytes the pool may have allocated at once
    pub capacity: usize,
    /// Largest single block, in bytes
    pub max_alloc: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            capacity: 256 << 20,
            max_alloc: 64 << 20,
        }
    }
}

impl PoolConfig {
    /// Small limits so allocation failure is easy to provoke.
    pub fn for_testing() -> Self {
        PoolConfig {
            capacity: 64 << 10,
            max_alloc: 16 << 10,
        }
    }

    /// Set the total byte budget
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the largest single allocation
    pub fn with_max_alloc(mut self, max_alloc: usize) -> Self {
        self.max_alloc = max_alloc;
        self
    }
}

/// Counters describing a pool's current state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Durable blocks currently allocated
    pub live_blocks: usize,
    /// Bytes currently allocated
    pub live_bytes: usize,
    /// Scopes committed
    pub commits: u64,
    /// Scopes rolled back
    pub aborts: u64,
}

struct UndoEntry {
    ptr: NonNull<u8>,
    bytes: Box<[MaybeUninit<u8>]>,
}

#[derive(Default)]
struct Scope {
    undo: Vec<UndoEntry>,
    registered: FxHashSet<(usize, usize)>,
    /// start address -> end address of blocks allocated in this scope
    allocated: BTreeMap<usize, (NonNull<u8>, Layout)>,
    deferred_frees: FxHashMap<usize, (NonNull<u8>, Layout)>,
    retired: Vec<(NonNull<u8>, Layout)>,
    /// A nested body failed; the whole scope must roll back.
    poisoned: Option<Error>,
}

impl Scope {
    fn covers_fresh_block(&self, addr: usize, len: usize) -> bool {
        match self.allocated.range(..=addr).next_back() {
            Some((&start, &(_, layout))) => addr + len <= start + layout.size(),
            None => false,
        }
    }
}

struct PoolState {
    config: PoolConfig,
    live: FxHashMap<usize, Layout>,
    live_bytes: usize,
    depth: usize,
    scope: Option<Scope>,
    commits: u64,
    aborts: u64,
}

// SAFETY: the raw pointers in `PoolState` are owned allocations of this pool
// (or retired volatile blocks handed over to it); they are only dereferenced
// under the mutex.
unsafe impl Send for PoolState {}

/// Heap-backed engine and durable allocator.
///
/// # Example
///
/// ```
/// use pmem_segvec::{Engine, MemPool, SegmentVec};
///
/// let pool = MemPool::new();
/// let mut vec: SegmentVec<'_, u32> = SegmentVec::new(&pool);
/// pool.run(|| vec.push_back(7)).unwrap();
/// assert_eq!(vec.len(), 1);
/// ```
pub struct MemPool {
    state: Mutex<PoolState>,
}

impl MemPool {
    /// Creates a pool with default limits.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Creates a pool with the given limits.
    pub fn with_config(config: PoolConfig) -> Self {
        MemPool {
            state: Mutex::new(PoolState {
                config,
                live: FxHashMap::default(),
                live_bytes: 0,
                depth: 0,
                scope: None,
                commits: 0,
                aborts: 0,
            }),
        }
    }

    /// Returns the pool's limits.
    pub fn config(&self) -> PoolConfig {
        self.state.lock().config.clone()
    }

    /// Returns current allocation and scope counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            live_blocks: state.live.len(),
            live_bytes: state.live_bytes,
            commits: state.commits,
            aborts: state.aborts,
        }
    }

    /// Opens a scope level; returns `true` for the outermost level.
    fn enter(&self) -> bool {
        let mut state = self.state.lock();
        state.depth += 1;
        if state.depth == 1 {
            state.scope = Some(Scope::default());
            trace!("Beginning scope");
            true
        } else {
            false
        }
    }

    fn leave_nested(&self, failed: Option<&Error>) {
        let mut state = self.state.lock();
        state.depth -= 1;
        if let (Some(err), Some(scope)) = (failed, state.scope.as_mut()) {
            if scope.poisoned.is_none() {
                scope.poisoned = Some(err.clone());
            }
        }
    }

    /// Closes the outermost scope, returning the error that poisoned it, if any.
    fn leave_outermost(&self, commit: bool) -> Option<Error> {
        let mut state = self.state.lock();
        state.depth -= 1;
        let Some(scope) = state.scope.take() else {
            return None;
        };
        match (commit, scope.poisoned.clone()) {
            (true, None) => {
                Self::commit_scope(&mut state, scope);
                None
            }
            (_, poisoned) => {
                Self::abort_scope(&mut state, scope);
                poisoned
            }
        }
    }

    fn commit_scope(state: &mut PoolState, scope: Scope) {
        let frees = scope.deferred_frees.len();
        for (_, (ptr, layout)) in scope.deferred_frees {
            Self::release(state, ptr, layout);
        }
        for (ptr, layout) in scope.retired {
            // SAFETY: retired blocks were handed over by `retire`.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
        state.commits += 1;
        debug!(
            snapshots = scope.undo.len(),
            allocations = scope.allocated.len(),
            frees,
            "Committed scope"
        );
    }

    fn abort_scope(state: &mut PoolState, scope: Scope) {
        let restored = scope.undo.len();
        for entry in scope.undo.iter().rev() {
            // SAFETY: `snapshot` callers guarantee the range stays valid until
            // the scope ends, and frees are deferred until commit.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    entry.bytes.as_ptr() as *const u8,
                    entry.ptr.as_ptr(),
                    entry.bytes.len(),
                );
            }
        }
        let released = scope.allocated.len();
        for (_, (ptr, layout)) in scope.allocated {
            Self::release(state, ptr, layout);
        }
        for (ptr, layout) in scope.retired {
            // SAFETY: retired blocks were handed over by `retire`.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
        state.aborts += 1;
        debug!(restored, released, "Aborted scope");
    }

    fn release(state: &mut PoolState, ptr: NonNull<u8>, layout: Layout) {
        if state.live.remove(&(ptr.as_ptr() as usize)).is_some() {
            state.live_bytes -= layout.size();
            // SAFETY: the block is live and was allocated with `layout`.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }

    fn dangling(layout: Layout) -> NonNull<u8> {
        // SAFETY: alignment is never zero.
        unsafe { NonNull::new_unchecked(layout.align() as *mut u8) }
    }
}

impl Default for MemPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemPool")
            .field("config", &self.config())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for MemPool {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (addr, layout) in state.live.drain() {
            // SAFETY: every live entry is an outstanding allocation of this pool.
            unsafe { alloc::dealloc(addr as *mut u8, layout) };
        }
    }
}

// Rolls the scope back if the body unwinds.
struct ScopeGuard<'a> {
    pool: &'a MemPool,
    outermost: bool,
    armed: bool,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let err = Error::aborted("scope body panicked");
        if self.outermost {
            self.pool.leave_outermost(false);
        } else {
            self.pool.leave_nested(Some(&err));
        }
    }
}

impl Engine for MemPool {
    fn run<R, F>(&self, body: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        let outermost = self.enter();
        let mut guard = ScopeGuard {
            pool: self,
            outermost,
            armed: true,
        };
        let result = body();
        guard.armed = false;

        if !outermost {
            self.leave_nested(result.as_ref().err());
            return result;
        }
        match self.leave_outermost(result.is_ok()) {
            Some(poisoned) if result.is_ok() => Err(poisoned),
            _ => result,
        }
    }

    fn in_scope(&self) -> bool {
        self.state.lock().depth > 0
    }

    unsafe fn snapshot(&self, ptr: NonNull<u8>, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let mut state = self.state.lock();
        let scope = state.scope.as_mut().ok_or(Error::Scope("snapshot"))?;
        let addr = ptr.as_ptr() as usize;
        if scope.covers_fresh_block(addr, len) || !scope.registered.insert((addr, len)) {
            return Ok(());
        }
        let mut bytes = vec![MaybeUninit::<u8>::uninit(); len].into_boxed_slice();
        std::ptr::copy_nonoverlapping(ptr.as_ptr() as *const u8, bytes.as_mut_ptr() as *mut u8, len);
        scope.undo.push(UndoEntry { ptr, bytes });
        Ok(())
    }

    unsafe fn retire(&self, ptr: NonNull<u8>, layout: Layout) {
        let mut state = self.state.lock();
        match state.scope.as_mut() {
            Some(scope) => scope.retired.push((ptr, layout)),
            None => alloc::dealloc(ptr.as_ptr(), layout),
        }
    }

    fn max_alloc_size(&self) -> usize {
        self.state.lock().config.max_alloc
    }
}

// SAFETY: blocks are obtained from the global allocator with the requested
// layout and stay valid until released through `deallocate` (or the pool is
// dropped). The pool is never moved while blocks are outstanding because
// containers borrow it.
unsafe impl Allocator for MemPool {
    fn allocate(&self, layout: Layout) -> std::result::Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return Ok(NonNull::slice_from_raw_parts(Self::dangling(layout), 0));
        }
        let mut state = self.state.lock();
        if layout.size() > state.config.max_alloc
            || state.live_bytes + layout.size() > state.config.capacity
        {
            debug!(
                size = layout.size(),
                live_bytes = state.live_bytes,
                "Pool allocation refused"
            );
            return Err(AllocError);
        }
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocError)?;
        state.live.insert(raw as usize, layout);
        state.live_bytes += layout.size();
        if let Some(scope) = state.scope.as_mut() {
            scope.allocated.insert(raw as usize, (ptr, layout));
        }
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    fn allocate_zeroed(&self, layout: Layout) -> std::result::Result<NonNull<[u8]>, AllocError> {
        // Blocks are always zero-filled.
        self.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        let mut state = self.state.lock();
        let addr = ptr.as_ptr() as usize;
        if !state.live.contains_key(&addr) {
            warn!(addr, size = layout.size(), "Deallocating unknown block");
            return;
        }
        match state.scope.as_mut() {
            Some(scope) => {
                scope.deferred_frees.insert(addr, (ptr, layout));
            }
            None => Self::release(&mut state, ptr, layout),
        }
    }
}
