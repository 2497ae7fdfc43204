//! Iterator implementations for `SegmentVec`.

use std::cmp::Ordering;
use std::iter::FusedIterator;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::engine::Engine;
use crate::error::Result;
use crate::policy::SegmentPolicy;
use crate::segment::Segment;
use crate::SegmentVec;

/// Splits logical range `[start, end)` into per-segment pieces:
/// `(first segment, offset in it, last segment, end offset in it)`.
#[inline]
fn split_range<P: SegmentPolicy>(start: usize, end: usize) -> (usize, usize, usize, usize) {
    debug_assert!(start < end);
    let (first, first_off) = P::location(start);
    let (last, last_off) = P::location(end - 1);
    (first, first_off, last, last_off + 1)
}

/// An iterator over references to elements of a `SegmentVec`.
///
/// Walks one contiguous segment slice at a time, so stepping is a pointer
/// increment except at segment boundaries.
pub struct Iter<'a, T> {
    /// Remainder of the segment being consumed from the front
    head: std::slice::Iter<'a, T>,
    /// Full segments between head and tail
    segments: std::slice::Iter<'a, Segment<T>>,
    /// Remainder of the segment being consumed from the back
    tail: std::slice::Iter<'a, T>,
    remaining: usize,
}

impl<'a, T: Copy> Iter<'a, T> {
    /// Iterator over logical range `[start, end)` of `segments`.
    pub(crate) fn new<P: SegmentPolicy>(segments: &'a [Segment<T>], start: usize, end: usize) -> Self {
        if start >= end {
            return Self {
                head: [].iter(),
                segments: [].iter(),
                tail: [].iter(),
                remaining: 0,
            };
        }
        let (first, first_off, last, last_end) = split_range::<P>(start, end);
        if first == last {
            return Self {
                head: segments[first].as_slice()[first_off..last_end].iter(),
                segments: [].iter(),
                tail: [].iter(),
                remaining: end - start,
            };
        }
        Self {
            head: segments[first].as_slice()[first_off..].iter(),
            segments: segments[first + 1..last].iter(),
            tail: segments[last].as_slice()[..last_end].iter(),
            remaining: end - start,
        }
    }
}

impl<'a, T: Copy> Iterator for Iter<'a, T> {
    type Item = &'a T;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.head.next() {
                self.remaining -= 1;
                return Some(item);
            }
            match self.segments.next() {
                Some(segment) => self.head = segment.as_slice().iter(),
                None => break,
            }
        }
        let item = self.tail.next()?;
        self.remaining -= 1;
        Some(item)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T: Copy> DoubleEndedIterator for Iter<'a, T> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.tail.next_back() {
                self.remaining -= 1;
                return Some(item);
            }
            match self.segments.next_back() {
                Some(segment) => self.tail = segment.as_slice().iter(),
                None => break,
            }
        }
        let item = self.head.next_back()?;
        self.remaining -= 1;
        Some(item)
    }
}

impl<T: Copy> ExactSizeIterator for Iter<'_, T> {}

impl<T: Copy> FusedIterator for Iter<'_, T> {}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
            segments: self.segments.clone(),
            tail: self.tail.clone(),
            remaining: self.remaining,
        }
    }
}

/// An iterator over mutable references to elements of a `SegmentVec`.
///
/// The whole iterated range is registered for undo before the iterator is
/// handed out, so writes through the yielded references roll back with the
/// enclosing scope.
pub struct IterMut<'a, T> {
    head: std::slice::IterMut<'a, T>,
    segments: std::slice::IterMut<'a, Segment<T>>,
    tail: std::slice::IterMut<'a, T>,
    remaining: usize,
}

impl<'a, T: Copy> IterMut<'a, T> {
    /// Iterator over logical range `[start, end)` of `segments`.
    ///
    /// # Safety
    ///
    /// The range must already be registered with the engine.
    pub(crate) unsafe fn new<P: SegmentPolicy>(segments: &'a mut [Segment<T>], start: usize, end: usize) -> Self {
        if start >= end {
            return Self {
                head: [].iter_mut(),
                segments: [].iter_mut(),
                tail: [].iter_mut(),
                remaining: 0,
            };
        }
        let (first, first_off, last, last_end) = split_range::<P>(start, end);
        let (head_segment, rest) = segments[first..=last].split_at_mut(1);
        if rest.is_empty() {
            return Self {
                head: head_segment[0].as_mut_slice_unlogged()[first_off..last_end].iter_mut(),
                segments: [].iter_mut(),
                tail: [].iter_mut(),
                remaining: end - start,
            };
        }
        let (middle, tail_segment) = rest.split_at_mut(rest.len() - 1);
        Self {
            head: head_segment[0].as_mut_slice_unlogged()[first_off..].iter_mut(),
            segments: middle.iter_mut(),
            tail: tail_segment[0].as_mut_slice_unlogged()[..last_end].iter_mut(),
            remaining: end - start,
        }
    }
}

impl<'a, T: Copy> Iterator for IterMut<'a, T> {
    type Item = &'a mut T;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.head.next() {
                self.remaining -= 1;
                return Some(item);
            }
            match self.segments.next() {
                // SAFETY: registered when the iterator was created.
                Some(segment) => self.head = unsafe { segment.as_mut_slice_unlogged() }.iter_mut(),
                None => break,
            }
        }
        let item = self.tail.next()?;
        self.remaining -= 1;
        Some(item)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T: Copy> DoubleEndedIterator for IterMut<'a, T> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.tail.next_back() {
                self.remaining -= 1;
                return Some(item);
            }
            match self.segments.next_back() {
                // SAFETY: registered when the iterator was created.
                Some(segment) => self.tail = unsafe { segment.as_mut_slice_unlogged() }.iter_mut(),
                None => break,
            }
        }
        let item = self.head.next_back()?;
        self.remaining -= 1;
        Some(item)
    }
}

impl<T: Copy> ExactSizeIterator for IterMut<'_, T> {}

impl<T: Copy> FusedIterator for IterMut<'_, T> {}

/// An iterator over the occupied part of each segment, as contiguous slices.
pub struct Segments<'a, T> {
    inner: std::slice::Iter<'a, Segment<T>>,
}

impl<'a, T> Segments<'a, T> {
    pub(crate) fn new(segments: &'a [Segment<T>]) -> Self {
        Self {
            inner: segments.iter(),
        }
    }
}

impl<'a, T: Copy> Iterator for Segments<'a, T> {
    type Item = &'a [T];

    fn next(&mut self) -> Option<Self::Item> {
        let slice = self.inner.next()?.as_slice();
        if slice.is_empty() {
            // Segments past the last occupied one are all empty.
            None
        } else {
            Some(slice)
        }
    }
}

impl<T: Copy> FusedIterator for Segments<'_, T> {}

/// A position in a `SegmentVec`: the container plus a logical index.
///
/// Arithmetic only moves the index; dereferencing translates it through the
/// policy on every access, so a cursor re-created from the same index after
/// growth addresses the same element. Cursors are ordered only against
/// cursors of the same container; `partial_cmp` returns `None` otherwise.
pub struct Cursor<'a, 'p, T: Copy, P: SegmentPolicy, E: Engine> {
    vec: &'a SegmentVec<'p, T, P, E>,
    index: usize,
}

impl<'a, 'p, T: Copy, P: SegmentPolicy, E: Engine> Cursor<'a, 'p, T, P, E> {
    pub(crate) fn new(vec: &'a SegmentVec<'p, T, P, E>, index: usize) -> Self {
        Self { vec, index }
    }

    /// Logical index this cursor points at.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Element under the cursor, or `None` at or past the end.
    #[inline]
    pub fn get(&self) -> Option<&'a T> {
        self.vec.get(self.index)
    }

    /// Moves one position forward.
    #[inline]
    pub fn move_next(&mut self) {
        self.index += 1;
    }

    /// Moves one position back.
    ///
    /// # Panics
    ///
    /// Panics when already at index 0.
    #[inline]
    pub fn move_prev(&mut self) {
        self.index = self.index.checked_sub(1).expect("cursor moved before begin");
    }

    /// Returns `true` if both cursors belong to the same container.
    #[inline]
    pub fn same_container(&self, other: &Self) -> bool {
        std::ptr::eq(self.vec, other.vec)
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> Clone for Cursor<'_, '_, T, P, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> Copy for Cursor<'_, '_, T, P, E> {}

impl<T: Copy + std::fmt::Debug, P: SegmentPolicy, E: Engine> std::fmt::Debug for Cursor<'_, '_, T, P, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("index", &self.index)
            .field("value", &self.get())
            .finish()
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> PartialEq for Cursor<'_, '_, T, P, E> {
    fn eq(&self, other: &Self) -> bool {
        self.same_container(other) && self.index == other.index
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> PartialOrd for Cursor<'_, '_, T, P, E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.same_container(other) {
            Some(self.index.cmp(&other.index))
        } else {
            None
        }
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> Add<usize> for Cursor<'_, '_, T, P, E> {
    type Output = Self;

    fn add(mut self, rhs: usize) -> Self {
        self.index += rhs;
        self
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> AddAssign<usize> for Cursor<'_, '_, T, P, E> {
    fn add_assign(&mut self, rhs: usize) {
        self.index += rhs;
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> Sub<usize> for Cursor<'_, '_, T, P, E> {
    type Output = Self;

    fn sub(mut self, rhs: usize) -> Self {
        self.index = self.index.checked_sub(rhs).expect("cursor moved before begin");
        self
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> SubAssign<usize> for Cursor<'_, '_, T, P, E> {
    fn sub_assign(&mut self, rhs: usize) {
        self.index = self.index.checked_sub(rhs).expect("cursor moved before begin");
    }
}

/// Distance between two cursors of the same container.
impl<T: Copy, P: SegmentPolicy, E: Engine> Sub for Cursor<'_, '_, T, P, E> {
    type Output = isize;

    fn sub(self, rhs: Self) -> isize {
        assert!(self.same_container(&rhs), "cursors belong to different containers");
        self.index as isize - rhs.index as isize
    }
}

impl<'a, T: Copy, P: SegmentPolicy, E: Engine> Iterator for Cursor<'a, '_, T, P, E> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.get()?;
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.vec.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

/// A position in a `SegmentVec` that can write the element under it.
pub struct CursorMut<'a, 'p, T: Copy, P: SegmentPolicy, E: Engine> {
    vec: &'a mut SegmentVec<'p, T, P, E>,
    index: usize,
}

impl<'a, 'p, T: Copy, P: SegmentPolicy, E: Engine> CursorMut<'a, 'p, T, P, E> {
    pub(crate) fn new(vec: &'a mut SegmentVec<'p, T, P, E>, index: usize) -> Self {
        Self { vec, index }
    }

    /// Logical index this cursor points at.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Element under the cursor, read-only.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.vec.get(self.index)
    }

    /// Element under the cursor, registered for undo first.
    pub fn get_mut(&mut self) -> Result<&mut T> {
        self.vec.at_mut(self.index)
    }

    /// Moves the cursor to `index`.
    #[inline]
    pub fn seek(&mut self, index: usize) {
        self.index = index;
    }

    /// Moves one position forward.
    #[inline]
    pub fn move_next(&mut self) {
        self.index += 1;
    }

    /// Moves one position back.
    ///
    /// # Panics
    ///
    /// Panics when already at index 0.
    #[inline]
    pub fn move_prev(&mut self) {
        self.index = self.index.checked_sub(1).expect("cursor moved before begin");
    }
}
