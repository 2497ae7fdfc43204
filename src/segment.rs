//! A single fixed-capacity durable array.
//!
//! This module handles one segment's storage, similar to how `RawVec`
//! works for `Vec` in the standard library, but every header write and every
//! overwrite of initialized payload is registered with the engine first.

use std::ops::Range;
use std::ptr::{self, NonNull};

use tracing::trace;

use crate::engine::{self, Engine};
use crate::error::{Error, Result};

/// Header of one segment.
///
/// Lives inside the directory's durable table. An all-zero header is a valid
/// empty segment with no storage, which is what a freshly allocated table
/// holds.
#[repr(C)]
pub(crate) struct Segment<T> {
    /// Element storage, null until reserved
    data: *mut T,
    /// Number of constructed elements
    len: usize,
    /// Fixed at allocation
    cap: usize,
}

impl<T: Copy> Segment<T> {
    /// Creates a header without storage.
    #[inline]
    pub(crate) const fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            len: 0,
            cap: 0,
        }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.cap
    }

    #[inline]
    pub(crate) fn has_storage(&self) -> bool {
        !self.data.is_null()
    }

    /// Returns a pointer to slot `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must be less than the capacity.
    #[inline]
    pub(crate) unsafe fn ptr_at(&self, offset: usize) -> *mut T {
        debug_assert!(offset < self.cap);
        self.data.add(offset)
    }

    /// Constructed elements.
    #[inline]
    pub(crate) fn as_slice(&self) -> &[T] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: `data` holds `len` initialized elements.
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }

    /// Constructed elements, mutably, without registering them for undo.
    ///
    /// # Safety
    ///
    /// Callers must have registered every element they overwrite.
    #[inline]
    pub(crate) unsafe fn as_mut_slice_unlogged(&mut self) -> &mut [T] {
        if self.len == 0 {
            return &mut [];
        }
        std::slice::from_raw_parts_mut(self.data, self.len)
    }

    /// Registers slots `range` of the payload for undo.
    pub(crate) fn snapshot_range<E: Engine>(&self, engine: &E, range: Range<usize>) -> Result<()> {
        if range.start >= range.end {
            return Ok(());
        }
        debug_assert!(range.end <= self.cap);
        // SAFETY: the range lies inside the segment's block, which is only
        // released at commit.
        unsafe { engine::snapshot_run(engine, self.data.add(range.start), range.end - range.start) }
    }

    fn set_len<E: Engine>(&mut self, engine: &E, len: usize) -> Result<()> {
        debug_assert!(len <= self.cap);
        // SAFETY: the header lives in a durable table that outlives the scope.
        unsafe { engine::set_field(engine, &mut self.len, len) }
    }

    /// Allocates storage for exactly `capacity` elements.
    pub(crate) fn reserve<E: Engine>(&mut self, engine: &E, capacity: usize) -> Result<()> {
        if capacity <= self.cap {
            return Ok(());
        }
        if self.has_storage() {
            return Err(Error::Invariant(format!(
                "segment of capacity {} cannot be relocated to {capacity}",
                self.cap
            )));
        }
        let block: NonNull<T> = engine::alloc_array(engine, capacity)?;
        // SAFETY: header in a durable table, see `set_len`.
        unsafe {
            engine::set_field(engine, &mut self.data, block.as_ptr())?;
            engine::set_field(engine, &mut self.cap, capacity)?;
        }
        trace!(capacity, "Reserved segment");
        Ok(())
    }

    /// Appends one element.
    pub(crate) fn emplace_back<E: Engine>(&mut self, engine: &E, value: T) -> Result<()> {
        debug_assert!(self.len < self.cap);
        // SAFETY: slot `len` is within capacity and holds no live element.
        unsafe { self.data.add(self.len).write(value) };
        self.set_len(engine, self.len + 1)
    }

    /// Constructs `count` elements starting at `offset`, which must equal the
    /// current length.
    ///
    /// If `make` fails, the length is left unchanged.
    pub(crate) fn construct_range<E, F>(&mut self, engine: &E, offset: usize, count: usize, mut make: F) -> Result<()>
    where
        E: Engine,
        F: FnMut(usize) -> Result<T>,
    {
        debug_assert_eq!(offset, self.len);
        debug_assert!(offset + count <= self.cap);
        for i in 0..count {
            let value = make(i)?;
            // SAFETY: slot is within capacity and past the constructed prefix.
            unsafe { self.data.add(offset + i).write(value) };
        }
        self.set_len(engine, offset + count)
    }

    /// Destroys elements past `new_len`.
    pub(crate) fn truncate<E: Engine>(&mut self, engine: &E, new_len: usize) -> Result<()> {
        if new_len >= self.len {
            return Ok(());
        }
        self.snapshot_range(engine, new_len..self.len)?;
        self.set_len(engine, new_len)
    }

    /// Destroys all elements, keeping storage.
    pub(crate) fn clear<E: Engine>(&mut self, engine: &E) -> Result<()> {
        self.truncate(engine, 0)
    }

    /// Removes `range`, moving later elements of this segment down.
    pub(crate) fn erase<E: Engine>(&mut self, engine: &E, range: Range<usize>) -> Result<()> {
        debug_assert!(range.start <= range.end && range.end <= self.len);
        let count = range.end - range.start;
        if count == 0 {
            return Ok(());
        }
        self.snapshot_range(engine, range.start..self.len)?;
        // SAFETY: both runs lie inside the constructed prefix.
        unsafe {
            ptr::copy(
                self.data.add(range.end),
                self.data.add(range.start),
                self.len - range.end,
            );
        }
        self.set_len(engine, self.len - count)
    }

    /// Replaces the contents with `count` elements produced by `make`.
    pub(crate) fn assign<E, F>(&mut self, engine: &E, count: usize, mut make: F) -> Result<()>
    where
        E: Engine,
        F: FnMut(usize) -> Result<T>,
    {
        debug_assert!(count <= self.cap);
        self.snapshot_range(engine, 0..self.len)?;
        for i in 0..count {
            let value = make(i)?;
            // SAFETY: slot is within capacity; initialized slots were registered.
            unsafe { self.data.add(i).write(value) };
        }
        self.set_len(engine, count)
    }

    /// Destroys all elements and releases storage.
    pub(crate) fn free_data<E: Engine>(&mut self, engine: &E) -> Result<()> {
        if !self.has_storage() {
            return Ok(());
        }
        let (data, cap) = (self.data, self.cap);
        // SAFETY: header in a durable table, see `set_len`.
        unsafe {
            engine::set_field(engine, &mut self.len, 0)?;
            engine::set_field(engine, &mut self.data, ptr::null_mut())?;
            engine::set_field(engine, &mut self.cap, 0)?;
            engine::free_array(engine, NonNull::new_unchecked(data), cap);
        }
        trace!(capacity = cap, "Freed segment");
        Ok(())
    }
}
