//! Slice types for SegmentVec.
//!
//! This module provides `SegmentSlice` and `SegmentSliceMut`, views over a
//! contiguous logical range of a `SegmentVec` that behave like `&[T]` and
//! `&mut [T]` but work with non-contiguous memory.

use std::fmt;
use std::ops::{Index, IndexMut};

use crate::engine::Engine;
use crate::iter::{Iter, IterMut};
use crate::policy::SegmentPolicy;
use crate::SegmentVec;

/// An immutable view of `len` elements of a `SegmentVec` starting at `start`.
///
/// # Example
///
/// ```
/// use pmem_segvec::{Engine, MemPool, SegmentVec};
///
/// let pool = MemPool::new();
/// let vec: SegmentVec<'_, i32> = pool.run(|| SegmentVec::from_iter_in(&pool, 0..10)).unwrap();
///
/// let slice = vec.crange(2, 5).unwrap();
/// assert_eq!(slice.len(), 5);
/// assert_eq!(slice[0], 2);
/// assert_eq!(slice.last(), Some(&6));
/// ```
pub struct SegmentSlice<'a, 'p, T: Copy, P: SegmentPolicy, E: Engine> {
    vec: &'a SegmentVec<'p, T, P, E>,
    start: usize,
    end: usize,
}

impl<'a, 'p, T: Copy, P: SegmentPolicy, E: Engine> SegmentSlice<'a, 'p, T, P, E> {
    #[inline]
    pub(crate) fn new(vec: &'a SegmentVec<'p, T, P, E>, start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= vec.len());
        Self { vec, start, end }
    }

    /// Returns the number of elements in the slice.
    #[inline]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns `true` if the slice is empty.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns a reference to the element at `index`, or `None` if out of bounds.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&'a T> {
        if index < self.len() {
            // SAFETY: start + index < end <= vec.len().
            Some(unsafe { &*self.vec.ptr_at(self.start + index) })
        } else {
            None
        }
    }

    #[inline]
    pub fn first(&self) -> Option<&'a T> {
        self.get(0)
    }

    #[inline]
    pub fn last(&self) -> Option<&'a T> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    /// Divides the slice into `[0, mid)` and `[mid, len)`.
    ///
    /// # Panics
    ///
    /// Panics if `mid > len`.
    pub fn split_at(&self, mid: usize) -> (Self, Self) {
        assert!(mid <= self.len(), "mid > len");
        let split = self.start + mid;
        (
            Self::new(self.vec, self.start, split),
            Self::new(self.vec, split, self.end),
        )
    }

    /// Returns an iterator over the slice.
    #[inline]
    pub fn iter(&self) -> Iter<'a, T> {
        Iter::new::<P>(self.vec.dir().as_slice(), self.start, self.end)
    }

    /// Returns `true` if the slice contains an element equal to `value`.
    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.iter().any(|x| x == value)
    }

    /// Copies the slice into a `Vec`.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().copied().collect()
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> Clone for SegmentSlice<'_, '_, T, P, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> Copy for SegmentSlice<'_, '_, T, P, E> {}

impl<T: Copy, P: SegmentPolicy, E: Engine> Index<usize> for SegmentSlice<'_, '_, T, P, E> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Some(value) => value,
            None => panic!("index {index} out of bounds for slice of length {}", self.len()),
        }
    }
}

impl<'a, T: Copy, P: SegmentPolicy, E: Engine> IntoIterator for SegmentSlice<'a, '_, T, P, E> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Copy + fmt::Debug, P: SegmentPolicy, E: Engine> fmt::Debug for SegmentSlice<'_, '_, T, P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: Copy + PartialEq, P: SegmentPolicy, E: Engine> PartialEq<[T]> for SegmentSlice<'_, '_, T, P, E> {
    fn eq(&self, other: &[T]) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<T: Copy + PartialEq, P: SegmentPolicy, E: Engine, const N: usize> PartialEq<[T; N]>
    for SegmentSlice<'_, '_, T, P, E>
{
    fn eq(&self, other: &[T; N]) -> bool {
        *self == other[..]
    }
}

impl<T: Copy + PartialEq, P: SegmentPolicy, E: Engine> PartialEq<Vec<T>> for SegmentSlice<'_, '_, T, P, E> {
    fn eq(&self, other: &Vec<T>) -> bool {
        *self == other[..]
    }
}

/// A mutable view of `len` elements of a `SegmentVec` starting at `start`.
///
/// The whole range is registered for undo when the view is created, so
/// element writes through it need no further bookkeeping.
pub struct SegmentSliceMut<'a, 'p, T: Copy, P: SegmentPolicy, E: Engine> {
    vec: &'a mut SegmentVec<'p, T, P, E>,
    start: usize,
    end: usize,
}

impl<'a, 'p, T: Copy, P: SegmentPolicy, E: Engine> SegmentSliceMut<'a, 'p, T, P, E> {
    /// # Safety
    ///
    /// `start..end` must already be registered with the engine.
    #[inline]
    pub(crate) unsafe fn new(vec: &'a mut SegmentVec<'p, T, P, E>, start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= vec.len());
        Self { vec, start, end }
    }

    /// Number of elements in the view.
    #[inline]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns `true` if the view is empty.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns a read-only view of the same range.
    #[inline]
    pub fn as_slice(&self) -> SegmentSlice<'_, 'p, T, P, E> {
        SegmentSlice::new(self.vec, self.start, self.end)
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index < self.len() {
            // SAFETY: in bounds, see `SegmentSlice::get`.
            Some(unsafe { &*self.vec.ptr_at(self.start + index) })
        } else {
            None
        }
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index < self.len() {
            // SAFETY: in bounds and registered at construction.
            Some(unsafe { &mut *self.vec.ptr_at(self.start + index) })
        } else {
            None
        }
    }

    #[inline]
    pub fn first_mut(&mut self) -> Option<&mut T> {
        self.get_mut(0)
    }

    #[inline]
    pub fn last_mut(&mut self) -> Option<&mut T> {
        let last = self.len().checked_sub(1)?;
        self.get_mut(last)
    }

    #[inline]
    pub fn iter(&self) -> Iter<'_, T> {
        Iter::new::<P>(self.vec.dir().as_slice(), self.start, self.end)
    }

    #[inline]
    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        // SAFETY: the range was registered at construction.
        unsafe { IterMut::new::<P>(self.vec.dir_mut().as_mut_slice(), self.start, self.end) }
    }

    /// Swaps two elements of the slice.
    ///
    /// # Panics
    ///
    /// Panics if `a` or `b` are out of bounds.
    pub fn swap(&mut self, a: usize, b: usize) {
        let len = self.len();
        assert!(a < len && b < len, "swap index out of bounds for slice of length {len}");
        // SAFETY: both in bounds and registered; `ptr::swap` allows a == b.
        unsafe { std::ptr::swap(self.vec.ptr_at(self.start + a), self.vec.ptr_at(self.start + b)) }
    }

    /// Reverses the order of elements in place.
    pub fn reverse(&mut self) {
        let len = self.len();
        for i in 0..len / 2 {
            self.swap(i, len - 1 - i);
        }
    }

    /// Fills the slice with `value`.
    pub fn fill(&mut self, value: T) {
        for item in self.iter_mut() {
            *item = value;
        }
    }

    /// Copies all elements from `src`.
    ///
    /// # Panics
    ///
    /// Panics if the lengths differ.
    pub fn copy_from_slice(&mut self, src: &[T]) {
        assert_eq!(self.len(), src.len(), "source slice length does not match destination");
        for (dst, value) in self.iter_mut().zip(src) {
            *dst = *value;
        }
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> Index<usize> for SegmentSliceMut<'_, '_, T, P, E> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Some(value) => value,
            None => panic!("index {index} out of bounds for slice of length {}", self.len()),
        }
    }
}

impl<T: Copy, P: SegmentPolicy, E: Engine> IndexMut<usize> for SegmentSliceMut<'_, '_, T, P, E> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        let len = self.len();
        match self.get_mut(index) {
            Some(value) => value,
            None => panic!("index {index} out of bounds for slice of length {len}"),
        }
    }
}

impl<T: Copy + fmt::Debug, P: SegmentPolicy, E: Engine> fmt::Debug for SegmentSliceMut<'_, '_, T, P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
