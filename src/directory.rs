//! The ordered table of segment handles owned by one vector.
//!
//! Growth only appends handles and shrinking only frees trailing ones;
//! existing entries never move relative to each other and their element
//! storage is never relocated. A growable table may itself be reallocated,
//! which copies the small headers but not the payload they point to.

use std::ptr::{self, NonNull};

use tracing::trace;

use crate::engine::{self, Engine};
use crate::error::{Error, Result};
use crate::policy::{DirectoryKind, SegmentPolicy};
use crate::segment::Segment;

/// Minimum number of handles in a growable table.
const MIN_TABLE_CAP: usize = 4;

#[repr(C)]
pub(crate) struct Directory<T> {
    /// Handle table, null until the first segment is added
    table: *mut Segment<T>,
    /// Handles in use
    len: usize,
    /// Handles the table can hold
    cap: usize,
    kind: DirectoryKind,
}

impl<T: Copy> Directory<T> {
    pub(crate) const fn new(kind: DirectoryKind) -> Self {
        Self {
            table: ptr::null_mut(),
            len: 0,
            cap: 0,
            kind,
        }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) const fn kind(&self) -> DirectoryKind {
        self.kind
    }

    /// Most segments this directory can ever address on `engine`.
    pub(crate) fn max_segments<E: Engine>(&self, engine: &E) -> usize {
        let entry = std::mem::size_of::<Segment<T>>();
        self.kind.max_segments(engine.max_alloc_size() / entry)
    }

    /// Handle at `index`.
    #[inline]
    pub(crate) fn at(&self, index: usize) -> &Segment<T> {
        assert!(index < self.len, "segment {index} out of range");
        // SAFETY: entries below `len` are initialized headers.
        unsafe { &*self.table.add(index) }
    }

    /// Mutable handle at `index`.
    #[inline]
    pub(crate) fn at_mut(&mut self, index: usize) -> &mut Segment<T> {
        assert!(index < self.len, "segment {index} out of range");
        // SAFETY: entries below `len` are initialized headers.
        unsafe { &mut *self.table.add(index) }
    }

    /// Handle at `index` without a bounds check.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len`.
    #[inline]
    pub(crate) unsafe fn get_unchecked(&self, index: usize) -> &Segment<T> {
        debug_assert!(index < self.len);
        &*self.table.add(index)
    }

    /// All handles in use.
    #[inline]
    pub(crate) fn as_slice(&self) -> &[Segment<T>] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: entries below `len` are initialized headers.
        unsafe { std::slice::from_raw_parts(self.table, self.len) }
    }

    /// All handles in use, mutably.
    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [Segment<T>] {
        if self.len == 0 {
            return &mut [];
        }
        // SAFETY: entries below `len` are initialized headers.
        unsafe { std::slice::from_raw_parts_mut(self.table, self.len) }
    }

    /// Grows or shrinks to exactly `count` segments.
    ///
    /// New segments get storage for `P::segment_capacity(i)` elements; removed
    /// segments release theirs. Elements in removed segments must already be
    /// destroyed.
    pub(crate) fn resize<P: SegmentPolicy, E: Engine>(&mut self, engine: &E, count: usize) -> Result<()> {
        if count > self.len {
            self.ensure_table(engine, count)?;
            for i in self.len..count {
                // SAFETY: i < cap; table entries past `len` are empty headers.
                let segment = unsafe { &mut *self.table.add(i) };
                segment.reserve(engine, P::segment_capacity(i))?;
            }
            trace!(from = self.len, to = count, "Grew directory");
        } else {
            for i in (count..self.len).rev() {
                self.at_mut(i).free_data(engine)?;
            }
        }
        // SAFETY: the header outlives the scope.
        unsafe { engine::set_field(engine, &mut self.len, count) }
    }

    /// Makes room for `count` handles.
    fn ensure_table<E: Engine>(&mut self, engine: &E, count: usize) -> Result<()> {
        if count <= self.cap {
            return Ok(());
        }
        // The table itself must fit in one engine block.
        let limit = self.max_segments(engine);
        if count > limit {
            return Err(Error::length(count, limit));
        }
        let new_cap = match self.kind {
            DirectoryKind::Bounded(_) => limit,
            DirectoryKind::Growable => count
                .max(self.cap.saturating_mul(2))
                .max(MIN_TABLE_CAP)
                .min(limit),
        };
        let table: NonNull<Segment<T>> = engine::alloc_array(engine, new_cap)?;
        if !self.table.is_null() {
            // SAFETY: the new table is fresh and large enough; the old one
            // stays readable until the scope commits.
            unsafe {
                ptr::copy_nonoverlapping(self.table, table.as_ptr(), self.len);
                engine::free_array(engine, NonNull::new_unchecked(self.table), self.cap);
            }
        }
        // SAFETY: the header outlives the scope.
        unsafe {
            engine::set_field(engine, &mut self.table, table.as_ptr())?;
            engine::set_field(engine, &mut self.cap, new_cap)?;
        }
        trace!(capacity = new_cap, "Allocated directory table");
        Ok(())
    }

    /// Frees every segment and the handle table.
    pub(crate) fn free<E: Engine>(&mut self, engine: &E) -> Result<()> {
        for i in (0..self.len).rev() {
            self.at_mut(i).free_data(engine)?;
        }
        if self.table.is_null() {
            return Ok(());
        }
        let (table, cap) = (self.table, self.cap);
        // SAFETY: the header outlives the scope; the table came from `alloc_array`.
        unsafe {
            engine::set_field(engine, &mut self.len, 0)?;
            engine::set_field(engine, &mut self.table, ptr::null_mut())?;
            engine::set_field(engine, &mut self.cap, 0)?;
            engine::free_array(engine, NonNull::new_unchecked(table), cap);
        }
        Ok(())
    }

    /// Changes the layout of a directory that holds no table.
    pub(crate) fn set_kind<E: Engine>(&mut self, engine: &E, kind: DirectoryKind) -> Result<()> {
        debug_assert!(self.table.is_null());
        // SAFETY: the header outlives the scope.
        unsafe { engine::set_field(engine, &mut self.kind, kind) }
    }

    /// Exchanges the contents of two directories.
    pub(crate) fn swap<E: Engine>(&mut self, engine: &E, other: &mut Self) -> Result<()> {
        // SAFETY: both headers outlive the scope.
        unsafe {
            engine::snapshot_value(engine, self as *const Self)?;
            engine::snapshot_value(engine, other as *const Self)?;
        }
        std::mem::swap(self, other);
        Ok(())
    }
}
