//! A segmented vector for transactional durable memory.
//!
//! Elements live in a sequence of fixed-capacity segments obtained from a
//! durable allocator. Segments are only ever appended or freed from the end,
//! never relocated, so growing the vector never copies payload and every
//! logical index keeps addressing the same slot across growth.
//!
//! Every mutation runs inside an atomic-update scope provided by an
//! [`Engine`]. Before the vector overwrites any initialized durable bytes it
//! registers them with the engine, which restores them if the scope aborts.
//! The vector never rolls anything back on its own.
//!
//! # Example
//!
//! ```
//! use pmem_segvec::{Engine, Error, MemPool, SegmentVec};
//!
//! let pool = MemPool::new();
//! let mut vec: SegmentVec<'_, u32> = SegmentVec::new(&pool);
//!
//! pool.run(|| {
//!     for i in 0..10 {
//!         vec.push_back(i)?;
//!     }
//!     Ok(())
//! })
//! .unwrap();
//! assert_eq!(vec.len(), 10);
//!
//! // An aborted scope leaves no trace.
//! let result = pool.run(|| {
//!     vec.clear()?;
//!     Err::<(), _>(Error::aborted("changed my mind"))
//! });
//! assert!(result.is_err());
//! assert_eq!(vec.len(), 10);
//! assert_eq!(vec[9], 9);
//! ```

mod directory;
mod engine;
mod error;
mod iter;
mod policy;
mod pool;
mod segment;
mod slice;

pub use allocator_api2::alloc::{AllocError, Allocator};
pub use engine::Engine;
pub use error::{Error, Result};
pub use iter::{Cursor, CursorMut, Iter, IterMut, Segments};
pub use policy::{DirectoryKind, Exponential, Fixed, SegmentPolicy};
pub use pool::{MemPool, PoolConfig, PoolStats};
pub use slice::{SegmentSlice, SegmentSliceMut};

use std::alloc::Layout;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::ptr::{self, NonNull};

use tracing::{debug, trace, warn};

use directory::Directory;

/// A segmented vector whose storage lives in an engine's durable pool.
///
/// `P` chooses how logical indices map to segments and `E` is the engine
/// that owns the storage and the atomic-update scopes. Elements are `Copy`
/// because rollback restores them byte for byte.
///
/// Read-only operations work anywhere. Mutating operations return
/// [`Error::Scope`] unless called inside [`Engine::run`].
///
/// # Memory Layout
///
/// The vector handle keeps its directory header in a separate heap block at
/// a stable address, so undo entries registered against it stay valid when
/// the handle itself moves. The header points at the table of segment
/// headers, which in turn point at element storage:
///
/// ```text
/// handle -> directory -> [seg 0][seg 1][seg 2] ...
///                           |      |      |
///                          [a]   [b c] [d e f g]
/// ```
pub struct SegmentVec<'p, T: Copy, P: SegmentPolicy = Exponential, E: Engine = MemPool> {
    pool: &'p E,
    dir: NonNull<Directory<T>>,
    _marker: PhantomData<(T, fn() -> P)>,
}

impl<'p, T: Copy, P: SegmentPolicy, E: Engine> SegmentVec<'p, T, P, E> {
    /// Creates an empty vector using the policy's default directory.
    ///
    /// Does not touch the pool and needs no scope.
    ///
    /// # Example
    ///
    /// ```
    /// use pmem_segvec::{MemPool, SegmentVec};
    ///
    /// let pool = MemPool::new();
    /// let vec: SegmentVec<'_, i32> = SegmentVec::new(&pool);
    /// assert!(vec.is_empty());
    /// assert_eq!(vec.capacity(), 0);
    /// ```
    #[inline]
    pub fn new(pool: &'p E) -> Self {
        Self::with_directory(pool, P::default_directory())
    }

    /// Creates an empty vector with an explicit directory layout.
    pub fn with_directory(pool: &'p E, kind: DirectoryKind) -> Self {
        let dir = Box::new(Directory::new(kind));
        Self {
            pool,
            dir: NonNull::from(Box::leak(dir)),
            _marker: PhantomData,
        }
    }

    /// Creates a vector of `len` default values.
    pub fn with_len(pool: &'p E, len: usize) -> Result<Self>
    where
        T: Default,
    {
        Self::from_elem(pool, len, T::default())
    }

    /// Creates a vector of `len` copies of `value`.
    pub fn from_elem(pool: &'p E, len: usize, value: T) -> Result<Self> {
        let mut vec = Self::new(pool);
        vec.resize_with_value(len, value)?;
        Ok(vec)
    }

    /// Creates a vector holding the items of `iter`, in order.
    pub fn from_iter_in<I: IntoIterator<Item = T>>(pool: &'p E, iter: I) -> Result<Self> {
        let mut vec = Self::new(pool);
        vec.extend_from_iter(iter)?;
        Ok(vec)
    }

    /// Creates a vector holding a copy of `values`.
    pub fn from_slice(pool: &'p E, values: &[T]) -> Result<Self> {
        let mut vec = Self::new(pool);
        vec.extend_from_slice(values)?;
        Ok(vec)
    }

    /// Returns a deep copy in the same pool, with the same directory layout
    /// and at least the same capacity.
    pub fn try_clone(&self) -> Result<Self> {
        self.pool.ensure_scope("clone")?;
        let mut clone = Self::with_directory(self.pool, self.dir().kind());
        clone.internal_reserve(self.capacity())?;
        // SAFETY: every index below `len` is initialized.
        clone.construct(0, self.len(), |i| Ok(unsafe { *self.ptr_at(i) }))?;
        clone.debug_validate();
        Ok(clone)
    }

    /// The engine this vector allocates from.
    #[inline]
    pub fn pool(&self) -> &'p E {
        self.pool
    }

    /// Directory layout chosen at construction.
    #[inline]
    pub fn directory_kind(&self) -> DirectoryKind {
        self.dir().kind()
    }

    #[inline]
    pub(crate) fn dir(&self) -> &Directory<T> {
        // SAFETY: the header is owned by this handle until drop.
        unsafe { self.dir.as_ref() }
    }

    #[inline]
    pub(crate) fn dir_mut(&mut self) -> &mut Directory<T> {
        // SAFETY: the header is owned by this handle until drop.
        unsafe { self.dir.as_mut() }
    }

    // Capacity

    /// Returns the number of elements.
    ///
    /// Every segment before the one holding the last element is full, so this
    /// only scans back over trailing empty segments.
    pub fn len(&self) -> usize {
        let segments = self.dir().as_slice();
        for (i, segment) in segments.iter().enumerate().rev() {
            if segment.len() > 0 {
                return P::segment_top(i) + segment.len();
            }
        }
        0
    }

    /// Returns `true` if the vector holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of elements the active segments can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        match self.segments_used() {
            0 => 0,
            used => P::capacity_for(used - 1),
        }
    }

    /// Returns the number of active segments.
    #[inline]
    pub fn segments_used(&self) -> usize {
        self.dir().len()
    }

    /// Returns the largest length this vector can reach, given the directory
    /// bound and the largest block the engine hands out.
    pub fn max_size(&self) -> usize {
        let max_segment_len = self.pool.max_alloc_size() / std::mem::size_of::<T>().max(1);
        P::max_size(self.dir().max_segments(self.pool), max_segment_len)
    }

    /// Ensures `capacity() >= new_capacity`.
    ///
    /// # Errors
    ///
    /// [`Error::Length`] if `new_capacity > max_size()`,
    /// [`Error::Allocation`] if the pool runs out of space.
    pub fn reserve(&mut self, new_capacity: usize) -> Result<()> {
        self.pool.ensure_scope("reserve")?;
        self.internal_reserve(new_capacity)?;
        self.debug_validate();
        Ok(())
    }

    /// Frees every segment past the one holding the last element.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        self.pool.ensure_scope("shrink_to_fit")?;
        let len = self.len();
        let needed = if len == 0 { 0 } else { P::segment_of(len - 1) + 1 };
        if needed < self.segments_used() {
            let pool = self.pool;
            self.dir_mut().resize::<P, E>(pool, needed)?;
            debug!(len, segments = needed, "Shrank segment vector to fit");
        }
        self.debug_validate();
        Ok(())
    }

    fn internal_reserve(&mut self, new_capacity: usize) -> Result<()> {
        let max = self.max_size();
        if new_capacity > max {
            return Err(Error::length(new_capacity, max));
        }
        if new_capacity <= self.capacity() {
            return Ok(());
        }
        let segments = P::segment_of(new_capacity - 1) + 1;
        let pool = self.pool;
        self.dir_mut().resize::<P, E>(pool, segments)?;
        trace!(capacity = self.capacity(), segments, "Reserved segment vector");
        Ok(())
    }

    /// Reserves room for `additional` more elements.
    fn grow_by(&mut self, additional: usize) -> Result<usize> {
        let len = self.len();
        let required = len
            .checked_add(additional)
            .ok_or_else(|| Error::length(usize::MAX, self.max_size()))?;
        self.internal_reserve(required)?;
        Ok(len)
    }

    // Element access

    /// Pointer to the slot of logical index `index`.
    ///
    /// # Safety
    ///
    /// `index` must be below `capacity()`.
    #[inline]
    pub(crate) unsafe fn ptr_at(&self, index: usize) -> *mut T {
        let (segment, offset) = P::location(index);
        self.dir().get_unchecked(segment).ptr_at(offset)
    }

    /// Returns the element at `index`, or `None` if out of bounds.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        let (segment, offset) = P::location(index);
        self.dir().as_slice().get(segment)?.as_slice().get(offset)
    }

    /// Returns the element at `index` without registering anything.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] if `index >= len()`.
    #[inline]
    pub fn at(&self, index: usize) -> Result<&T> {
        self.get(index).ok_or_else(|| Error::out_of_range(index, self.len()))
    }

    /// Returns the element at `index` for writing, registering it for undo.
    pub fn at_mut(&mut self, index: usize) -> Result<&mut T> {
        self.pool.ensure_scope("at_mut")?;
        let len = self.len();
        if index >= len {
            return Err(Error::out_of_range(index, len));
        }
        self.snapshot_data(index, index + 1)?;
        // SAFETY: in bounds and registered.
        Ok(unsafe { &mut *self.ptr_at(index) })
    }

    /// Returns the first element, or `None` if empty.
    #[inline]
    pub fn first(&self) -> Option<&T> {
        self.get(0)
    }

    /// Returns the last element, or `None` if empty.
    #[inline]
    pub fn last(&self) -> Option<&T> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    /// First element for writing, registered for undo.
    pub fn front_mut(&mut self) -> Result<&mut T> {
        self.at_mut(0)
    }

    /// Last element for writing, registered for undo.
    pub fn back_mut(&mut self) -> Result<&mut T> {
        match self.len().checked_sub(1) {
            Some(last) => self.at_mut(last),
            None => Err(Error::out_of_range(0, 0)),
        }
    }

    /// Returns `true` if the vector contains an element equal to `value`.
    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.segments().any(|segment| segment.contains(value))
    }

    /// Copies the elements into a `Vec`.
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        for segment in self.segments() {
            out.extend_from_slice(segment);
        }
        out
    }

    // Iteration

    /// Returns an iterator over the elements.
    #[inline]
    pub fn iter(&self) -> Iter<'_, T> {
        Iter::new::<P>(self.dir().as_slice(), 0, self.len())
    }

    /// Returns an iterator that allows modifying each element.
    ///
    /// All elements are registered for undo up front.
    pub fn iter_mut(&mut self) -> Result<IterMut<'_, T>> {
        self.pool.ensure_scope("iter_mut")?;
        let len = self.len();
        self.snapshot_data(0, len)?;
        // SAFETY: registered above.
        Ok(unsafe { IterMut::new::<P>(self.dir_mut().as_mut_slice(), 0, len) })
    }

    /// Returns the occupied part of each segment, front to back.
    #[inline]
    pub fn segments(&self) -> Segments<'_, T> {
        Segments::new(self.dir().as_slice())
    }

    /// Returns a cursor at logical index `index`.
    #[inline]
    pub fn cursor(&self, index: usize) -> Cursor<'_, 'p, T, P, E> {
        Cursor::new(self, index)
    }

    /// Returns a writing cursor at logical index `index`.
    #[inline]
    pub fn cursor_mut(&mut self, index: usize) -> CursorMut<'_, 'p, T, P, E> {
        CursorMut::new(self, index)
    }

    /// Cursor at the first element.
    #[inline]
    pub fn begin(&self) -> Cursor<'_, 'p, T, P, E> {
        self.cursor(0)
    }

    /// Cursor one past the last element.
    #[inline]
    pub fn end(&self) -> Cursor<'_, 'p, T, P, E> {
        self.cursor(self.len())
    }

    /// Returns a writable view of `[start, start + n)`, registered for undo.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] if the range reaches past `len()`.
    pub fn range(&mut self, start: usize, n: usize) -> Result<SegmentSliceMut<'_, 'p, T, P, E>> {
        self.pool.ensure_scope("range")?;
        let end = self.checked_range_end(start, n)?;
        self.snapshot_data(start, end)?;
        // SAFETY: registered above.
        Ok(unsafe { SegmentSliceMut::new(self, start, end) })
    }

    /// Returns a read-only view of `[start, start + n)`.
    pub fn crange(&self, start: usize, n: usize) -> Result<SegmentSlice<'_, 'p, T, P, E>> {
        let end = self.checked_range_end(start, n)?;
        Ok(SegmentSlice::new(self, start, end))
    }

    fn checked_range_end(&self, start: usize, n: usize) -> Result<usize> {
        let len = self.len();
        match start.checked_add(n) {
            Some(end) if end <= len => Ok(end),
            _ => Err(Error::out_of_range(start.saturating_add(n), len)),
        }
    }

    // Modifiers

    /// Appends `value`.
    ///
    /// Grows by one segment only when the last active segment is full.
    #[inline]
    pub fn push_back(&mut self, value: T) -> Result<()> {
        self.emplace_back_with(|| Ok(value)).map(|_| ())
    }

    /// Appends the value produced by `make` and returns a reference to it.
    ///
    /// If `make` fails nothing is changed.
    pub fn emplace_back_with<F>(&mut self, make: F) -> Result<&mut T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.pool.ensure_scope("emplace_back")?;
        let value = make()?;
        let len = self.grow_by(1)?;
        let pool = self.pool;
        let (segment, _) = P::location(len);
        self.dir_mut().at_mut(segment).emplace_back(pool, value)?;
        self.debug_validate();
        // SAFETY: just constructed.
        Ok(unsafe { &mut *self.ptr_at(len) })
    }

    /// Removes and returns the last element, or `None` if empty.
    pub fn pop_back(&mut self) -> Result<Option<T>> {
        self.pool.ensure_scope("pop_back")?;
        let len = self.len();
        if len == 0 {
            return Ok(None);
        }
        // SAFETY: len - 1 is initialized.
        let value = unsafe { *self.ptr_at(len - 1) };
        self.shrink(len - 1)?;
        self.debug_validate();
        Ok(Some(value))
    }

    /// Inserts `value` at `index`, shifting later elements back.
    ///
    /// Returns the index of the inserted element.
    pub fn insert(&mut self, index: usize, value: T) -> Result<usize> {
        self.pool.ensure_scope("insert")?;
        self.insert_gap(index, 1, |_| value)
    }

    /// Inserts `count` copies of `value` at `index`.
    pub fn insert_n(&mut self, index: usize, count: usize, value: T) -> Result<usize> {
        self.pool.ensure_scope("insert")?;
        self.insert_gap(index, count, |_| value)
    }

    /// Inserts a copy of `values` at `index`.
    pub fn insert_slice(&mut self, index: usize, values: &[T]) -> Result<usize> {
        self.pool.ensure_scope("insert")?;
        self.insert_gap(index, values.len(), |k| values[k])
    }

    /// Inserts the items of `iter` at `index`, in order.
    pub fn insert_iter<I: IntoIterator<Item = T>>(&mut self, index: usize, iter: I) -> Result<usize> {
        self.pool.ensure_scope("insert")?;
        let values: Vec<T> = iter.into_iter().collect();
        self.insert_gap(index, values.len(), |k| values[k])
    }

    /// Inserts the value produced by `make` at `index`.
    ///
    /// If `make` fails nothing is changed.
    pub fn emplace_with<F>(&mut self, index: usize, make: F) -> Result<usize>
    where
        F: FnOnce() -> Result<T>,
    {
        self.pool.ensure_scope("emplace")?;
        let len = self.len();
        if index > len {
            return Err(Error::out_of_range(index, len));
        }
        let value = make()?;
        self.insert_gap(index, 1, |_| value)
    }

    /// Appends a copy of `values`.
    pub fn extend_from_slice(&mut self, values: &[T]) -> Result<()> {
        self.pool.ensure_scope("extend")?;
        let len = self.len();
        self.insert_gap(len, values.len(), |k| values[k]).map(|_| ())
    }

    /// Appends the items of `iter`, in order.
    pub fn extend_from_iter<I: IntoIterator<Item = T>>(&mut self, iter: I) -> Result<()> {
        self.pool.ensure_scope("extend")?;
        let values: Vec<T> = iter.into_iter().collect();
        let len = self.len();
        self.insert_gap(len, values.len(), |k| values[k]).map(|_| ())
    }

    /// Opens a gap of `count` slots at `index` and fills slot `index + k`
    /// with `value_at(k)`.
    ///
    /// Capacity is reserved first, `[index, len)` is registered, the length is
    /// extended by constructing the new tail, then the remaining elements move
    /// back one segment run at a time before the gap is written.
    fn insert_gap<F>(&mut self, index: usize, count: usize, value_at: F) -> Result<usize>
    where
        F: Fn(usize) -> T,
    {
        let len = self.len();
        if index > len {
            return Err(Error::out_of_range(index, len));
        }
        if count == 0 {
            return Ok(index);
        }
        self.grow_by(count)?;
        self.snapshot_data(index, len)?;

        // The new tail takes shifted elements, or inserted values that land
        // past the old end.
        let gap_end = index + count;
        let tail: Vec<T> = (len..len + count)
            .map(|slot| {
                if slot >= gap_end {
                    // SAFETY: slot - count is in [index, len).
                    unsafe { *self.ptr_at(slot - count) }
                } else {
                    value_at(slot - index)
                }
            })
            .collect();
        self.construct(len, count, |k| Ok(tail[k]))?;

        if gap_end < len {
            // SAFETY: both runs lie below the new length; the destination
            // run lies inside the registered range.
            unsafe { self.move_elements(index, gap_end, len - gap_end) };
        }
        for slot in index..gap_end.min(len) {
            // SAFETY: registered above.
            unsafe { self.ptr_at(slot).write(value_at(slot - index)) };
        }
        trace!(index, count, "Inserted into segment vector");
        self.debug_validate();
        Ok(index)
    }

    /// Removes the element at `index`, shifting later elements forward.
    ///
    /// Returns the index that now holds the following element.
    pub fn erase(&mut self, index: usize) -> Result<usize> {
        self.pool.ensure_scope("erase")?;
        let len = self.len();
        if index >= len {
            return Err(Error::out_of_range(index, len));
        }
        self.erase_range(index, index + 1)
    }

    /// Removes `[first, last)`, shifting later elements forward.
    ///
    /// Storage of segments left empty is kept; call
    /// [`shrink_to_fit`](Self::shrink_to_fit) to release it.
    pub fn erase_range(&mut self, first: usize, last: usize) -> Result<usize> {
        self.pool.ensure_scope("erase")?;
        let len = self.len();
        if first > last || last > len {
            return Err(Error::out_of_range(first.max(last), len));
        }
        let count = last - first;
        if count == 0 {
            return Ok(first);
        }
        let new_len = len - count;
        let segment = P::segment_of(first);
        if segment == P::segment_of(len - 1) {
            // Everything affected sits in the last occupied segment.
            let offset = P::offset_of(first);
            let pool = self.pool;
            self.dir_mut()
                .at_mut(segment)
                .erase(pool, offset..offset + count)?;
        } else {
            self.snapshot_data(first, new_len)?;
            // SAFETY: both runs lie below `len`; the destination is registered.
            unsafe { self.move_elements(last, first, len - last) };
            self.shrink(new_len)?;
        }
        trace!(first, count, "Erased from segment vector");
        self.debug_validate();
        Ok(first)
    }

    /// Resizes to `new_len`, filling new slots with `T::default()`.
    pub fn resize(&mut self, new_len: usize) -> Result<()>
    where
        T: Default,
    {
        self.resize_with_value(new_len, T::default())
    }

    /// Resizes to `new_len`, filling new slots with `value`.
    pub fn resize_with_value(&mut self, new_len: usize, value: T) -> Result<()> {
        self.pool.ensure_scope("resize")?;
        let len = self.len();
        if new_len <= len {
            self.shrink(new_len)?;
        } else {
            self.internal_reserve(new_len)?;
            self.construct(len, new_len - len, |_| Ok(value))?;
        }
        self.debug_validate();
        Ok(())
    }

    /// Destroys every element past `new_len`, keeping storage.
    pub fn truncate(&mut self, new_len: usize) -> Result<()> {
        self.pool.ensure_scope("truncate")?;
        self.shrink(new_len)?;
        self.debug_validate();
        Ok(())
    }

    /// Destroys all elements, keeping storage.
    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }

    /// Destroys all elements and releases all storage.
    pub fn free_data(&mut self) -> Result<()> {
        self.pool.ensure_scope("free_data")?;
        let pool = self.pool;
        self.dir_mut().free(pool)?;
        debug!("Freed segment vector storage");
        Ok(())
    }

    /// Exchanges contents with `other`.
    ///
    /// # Errors
    ///
    /// [`Error::PoolMismatch`] if `other` uses a different pool.
    pub fn swap(&mut self, other: &mut Self) -> Result<()> {
        self.same_pool(other)?;
        self.pool.ensure_scope("swap")?;
        let pool = self.pool;
        self.dir_mut().swap(pool, other.dir_mut())
    }

    // Assignment

    /// Replaces the contents with `count` copies of `value`.
    pub fn assign(&mut self, count: usize, value: T) -> Result<()> {
        self.pool.ensure_scope("assign")?;
        self.assign_with(count, |_| value)
    }

    /// Replaces the contents with a copy of `values`.
    pub fn assign_slice(&mut self, values: &[T]) -> Result<()> {
        self.pool.ensure_scope("assign")?;
        self.assign_with(values.len(), |k| values[k])
    }

    /// Replaces the contents with the items of `iter`.
    pub fn assign_iter<I: IntoIterator<Item = T>>(&mut self, iter: I) -> Result<()> {
        self.pool.ensure_scope("assign")?;
        let values: Vec<T> = iter.into_iter().collect();
        self.assign_with(values.len(), |k| values[k])
    }

    /// Replaces the contents with a copy of `other`'s.
    pub fn assign_from<Q: SegmentPolicy, F: Engine>(&mut self, other: &SegmentVec<'_, T, Q, F>) -> Result<()> {
        self.pool.ensure_scope("assign")?;
        // SAFETY: indices below `other.len()` are initialized.
        self.assign_with(other.len(), |k| unsafe { *other.ptr_at(k) })
    }

    /// Releases this vector's storage and takes over `other`'s, leaving
    /// `other` empty.
    ///
    /// This vector adopts `other`'s directory layout; `other` keeps its own.
    pub fn assign_take(&mut self, other: &mut Self) -> Result<()> {
        self.same_pool(other)?;
        self.pool.ensure_scope("assign")?;
        let pool = self.pool;
        let kind = other.directory_kind();
        self.dir_mut().free(pool)?;
        self.dir_mut().swap(pool, other.dir_mut())?;
        other.dir_mut().set_kind(pool, kind)?;
        self.debug_validate();
        Ok(())
    }

    /// Reserves or shrinks to `count`, then overwrites each segment in turn.
    fn assign_with<F>(&mut self, count: usize, value_at: F) -> Result<()>
    where
        F: Fn(usize) -> T,
    {
        if count > self.capacity() {
            self.internal_reserve(count)?;
        } else {
            self.shrink(count)?;
        }
        if count > 0 {
            let pool = self.pool;
            let last = P::segment_of(count - 1);
            for segment in 0..=last {
                let top = P::segment_top(segment);
                let n = if segment == last {
                    count - top
                } else {
                    P::segment_capacity(segment)
                };
                self.dir_mut()
                    .at_mut(segment)
                    .assign(pool, n, |i| Ok(value_at(top + i)))?;
            }
        }
        self.debug_validate();
        Ok(())
    }

    // Internals

    fn same_pool(&self, other: &Self) -> Result<()> {
        if ptr::eq(self.pool, other.pool) {
            Ok(())
        } else {
            Err(Error::PoolMismatch)
        }
    }

    /// Registers `[first, last)` for undo, one segment run at a time.
    fn snapshot_data(&self, first: usize, last: usize) -> Result<()> {
        if first >= last {
            return Ok(());
        }
        let (first_segment, first_offset) = P::location(first);
        let (last_segment, last_offset) = P::location(last - 1);
        let dir = self.dir();
        for segment in first_segment..=last_segment {
            let start = if segment == first_segment { first_offset } else { 0 };
            let end = if segment == last_segment {
                last_offset + 1
            } else {
                P::segment_capacity(segment)
            };
            dir.at(segment).snapshot_range(self.pool, start..end)?;
        }
        Ok(())
    }

    /// Constructs `count` elements from `start`, which must equal `len()`.
    fn construct<F>(&mut self, start: usize, count: usize, mut make: F) -> Result<()>
    where
        F: FnMut(usize) -> Result<T>,
    {
        let pool = self.pool;
        let mut done = 0;
        while done < count {
            let (segment, offset) = P::location(start + done);
            let chunk = (count - done).min(P::segment_capacity(segment) - offset);
            let base = done;
            self.dir_mut()
                .at_mut(segment)
                .construct_range(pool, offset, chunk, |i| make(base + i))?;
            done += chunk;
        }
        Ok(())
    }

    /// Destroys every element past `new_len`, registering them first.
    fn shrink(&mut self, new_len: usize) -> Result<()> {
        let len = self.len();
        if new_len >= len {
            return Ok(());
        }
        self.snapshot_data(new_len, len)?;
        let pool = self.pool;
        let end = P::segment_of(new_len);
        let last = P::segment_of(len - 1);
        let dir = self.dir_mut();
        for segment in (end + 1..=last).rev() {
            dir.at_mut(segment).clear(pool)?;
        }
        dir.at_mut(end).truncate(pool, P::offset_of(new_len))
    }

    /// Copies `count` elements from logical `src` to logical `dst`. The runs
    /// may overlap.
    ///
    /// # Safety
    ///
    /// Both runs must lie below `len()`, and the destination run must be
    /// registered for undo.
    unsafe fn move_elements(&mut self, src: usize, dst: usize, count: usize) {
        if count == 0 || src == dst {
            return;
        }
        if dst > src {
            // Walk back from the end so no source slot is overwritten before
            // it is read.
            let mut remaining = count;
            while remaining > 0 {
                let read_end = src + remaining;
                let write_end = dst + remaining;
                let read_available = P::offset_of(read_end - 1) + 1;
                let write_available = P::offset_of(write_end - 1) + 1;
                let chunk = remaining.min(read_available).min(write_available);
                ptr::copy(self.ptr_at(read_end - chunk), self.ptr_at(write_end - chunk), chunk);
                remaining -= chunk;
            }
        } else {
            let mut done = 0;
            while done < count {
                let read = src + done;
                let write = dst + done;
                let (read_segment, read_offset) = P::location(read);
                let (write_segment, write_offset) = P::location(write);
                let read_available = P::segment_capacity(read_segment) - read_offset;
                let write_available = P::segment_capacity(write_segment) - write_offset;
                let chunk = (count - done).min(read_available).min(write_available);
                ptr::copy(self.ptr_at(read), self.ptr_at(write), chunk);
                done += chunk;
            }
        }
    }

    /// Checks the structural invariants.
    ///
    /// Every active segment has storage of exactly the policy's capacity,
    /// every segment before the one holding the last element is full, and
    /// every segment after it is empty.
    pub fn validate(&self) -> Result<()> {
        let mut seen_partial = false;
        for (i, segment) in self.dir().as_slice().iter().enumerate() {
            let expected = P::segment_capacity(i);
            if !segment.has_storage() || segment.capacity() != expected {
                return Err(Error::Invariant(format!(
                    "segment {i} has capacity {} but the policy requires {expected}",
                    segment.capacity()
                )));
            }
            if seen_partial && segment.len() > 0 {
                return Err(Error::Invariant(format!(
                    "segment {i} holds {} elements after a partially filled segment",
                    segment.len()
                )));
            }
            if segment.len() < segment.capacity() {
                seen_partial = true;
            }
        }
        Ok(())
    }

    #[inline]
    fn debug_validate(&self) {
        if cfg!(test) {
            if let Err(err) = self.validate() {
                panic!("{err}");
            }
        }
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> Drop for SegmentVec<'_, T, P, E> {
    fn drop(&mut self) {
        let pool = self.pool;
        let result = pool.run(|| self.dir_mut().free(pool));
        if let Err(err) = result {
            warn!(%err, "Failed to release segment vector storage");
        }
        // SAFETY: the header came from `Box::leak` in `with_directory` and is
        // not used past this point.
        unsafe { pool.retire(self.dir.cast(), Layout::new::<Directory<T>>()) };
    }
}

impl<T: Copy + PartialEq, P: SegmentPolicy, E: Engine> PartialEq for SegmentVec<'_, T, P, E> {
    fn eq(&self, other: &Self) -> bool {
        // Same length and policy means the same segment layout.
        self.len() == other.len() && self.segments().eq(other.segments())
    }
}

impl<T: Copy + Eq, P: SegmentPolicy, E: Engine> Eq for SegmentVec<'_, T, P, E> {}

impl<T: Copy + PartialOrd, P: SegmentPolicy, E: Engine> PartialOrd for SegmentVec<'_, T, P, E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.iter().partial_cmp(other.iter())
    }
}

impl<T: Copy + Ord, P: SegmentPolicy, E: Engine> Ord for SegmentVec<'_, T, P, E> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.iter().cmp(other.iter())
    }
}

impl<T: Copy + std::hash::Hash, P: SegmentPolicy, E: Engine> std::hash::Hash for SegmentVec<'_, T, P, E> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        for segment in self.segments() {
            for item in segment {
                item.hash(state);
            }
        }
    }
}

impl<T: Copy + PartialEq, P: SegmentPolicy, E: Engine> PartialEq<[T]> for SegmentVec<'_, T, P, E> {
    fn eq(&self, other: &[T]) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut rest = other;
        for segment in self.segments() {
            let (head, tail) = rest.split_at(segment.len());
            if segment != head {
                return false;
            }
            rest = tail;
        }
        true
    }
}

impl<T: Copy + PartialEq, P: SegmentPolicy, E: Engine> PartialEq<&[T]> for SegmentVec<'_, T, P, E> {
    fn eq(&self, other: &&[T]) -> bool {
        *self == **other
    }
}

impl<T: Copy + PartialEq, P: SegmentPolicy, E: Engine, const N: usize> PartialEq<[T; N]>
    for SegmentVec<'_, T, P, E>
{
    fn eq(&self, other: &[T; N]) -> bool {
        *self == other[..]
    }
}

impl<T: Copy + PartialEq, P: SegmentPolicy, E: Engine> PartialEq<Vec<T>> for SegmentVec<'_, T, P, E> {
    fn eq(&self, other: &Vec<T>) -> bool {
        *self == other[..]
    }
}

impl<T: Copy + PartialEq, P: SegmentPolicy, E: Engine> PartialEq<SegmentVec<'_, T, P, E>> for [T] {
    fn eq(&self, other: &SegmentVec<'_, T, P, E>) -> bool {
        *other == *self
    }
}

impl<T: Copy + PartialEq, P: SegmentPolicy, E: Engine> PartialEq<SegmentVec<'_, T, P, E>> for Vec<T> {
    fn eq(&self, other: &SegmentVec<'_, T, P, E>) -> bool {
        *other == self[..]
    }
}

impl<T: Copy + PartialOrd, P: SegmentPolicy, E: Engine> PartialOrd<[T]> for SegmentVec<'_, T, P, E> {
    fn partial_cmp(&self, other: &[T]) -> Option<Ordering> {
        self.iter().partial_cmp(other.iter())
    }
}

impl<T: Copy + PartialOrd, P: SegmentPolicy, E: Engine> PartialOrd<Vec<T>> for SegmentVec<'_, T, P, E> {
    fn partial_cmp(&self, other: &Vec<T>) -> Option<Ordering> {
        self.iter().partial_cmp(other.iter())
    }
}

impl<T: Copy + PartialOrd, P: SegmentPolicy, E: Engine> PartialOrd<SegmentVec<'_, T, P, E>> for [T] {
    fn partial_cmp(&self, other: &SegmentVec<'_, T, P, E>) -> Option<Ordering> {
        self.iter().partial_cmp(other.iter())
    }
}

impl<T: Copy + PartialOrd, P: SegmentPolicy, E: Engine> PartialOrd<SegmentVec<'_, T, P, E>> for Vec<T> {
    fn partial_cmp(&self, other: &SegmentVec<'_, T, P, E>) -> Option<Ordering> {
        self.iter().partial_cmp(other.iter())
    }
}

impl<T: Copy + std::fmt::Debug, P: SegmentPolicy, E: Engine> std::fmt::Debug for SegmentVec<'_, T, P, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> Index<usize> for SegmentVec<'_, T, P, E> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        match self.at(index) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }
}

/// Registers the element for undo; panics outside a scope.
impl<T: Copy, P: SegmentPolicy, E: Engine> IndexMut<usize> for SegmentVec<'_, T, P, E> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        match self.at_mut(index) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<'a, T: Copy, P: SegmentPolicy, E: Engine> IntoIterator for &'a SegmentVec<'_, T, P, E> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// SAFETY: the vector exclusively owns its header and segment storage and only
// shares the engine by reference.
unsafe impl<T: Copy + Send, P: SegmentPolicy, E: Engine + Sync> Send for SegmentVec<'_, T, P, E> {}
unsafe impl<T: Copy + Sync, P: SegmentPolicy, E: Engine + Sync> Sync for SegmentVec<'_, T, P, E> {}
