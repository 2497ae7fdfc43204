//! Comparison tests between SegmentVec and std::Vec
//!
//! Property-based tests that drive a `SegmentVec` and a `Vec` through the
//! same operations and check they stay identical, for both segment
//! policies and both directory layouts.

use pmem_segvec::{DirectoryKind, Engine, Exponential, Fixed, MemPool, SegmentPolicy, SegmentVec};
use proptest::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

// ============================================================================
// COMPARISON TESTING INFRASTRUCTURE
// ============================================================================

/// Common operations for comparison testing.
///
/// Each `SegmentVec` call runs in its own committed scope.
trait VecLike<T> {
    fn push_val(&mut self, value: T);
    fn pop_val(&mut self) -> Option<T>;
    fn len_val(&self) -> usize;
    fn clear_val(&mut self);
    fn truncate_val(&mut self, len: usize);
    fn insert_val(&mut self, index: usize, value: T);
    fn insert_slice_val(&mut self, index: usize, values: &[T]);
    fn erase_val(&mut self, index: usize);
    fn erase_range_val(&mut self, first: usize, last: usize);
    fn resize_val(&mut self, len: usize, value: T);
    fn assign_val(&mut self, values: &[T]);
    fn set_val(&mut self, index: usize, value: T);
    fn extend_val(&mut self, values: &[T]);
}

impl<T: Copy> VecLike<T> for Vec<T> {
    fn push_val(&mut self, value: T) {
        self.push(value);
    }
    fn pop_val(&mut self) -> Option<T> {
        self.pop()
    }
    fn len_val(&self) -> usize {
        self.len()
    }
    fn clear_val(&mut self) {
        self.clear();
    }
    fn truncate_val(&mut self, len: usize) {
        self.truncate(len);
    }
    fn insert_val(&mut self, index: usize, value: T) {
        self.insert(index, value);
    }
    fn insert_slice_val(&mut self, index: usize, values: &[T]) {
        let tail = self.split_off(index);
        self.extend_from_slice(values);
        self.extend(tail);
    }
    fn erase_val(&mut self, index: usize) {
        self.remove(index);
    }
    fn erase_range_val(&mut self, first: usize, last: usize) {
        self.drain(first..last);
    }
    fn resize_val(&mut self, len: usize, value: T) {
        self.resize(len, value);
    }
    fn assign_val(&mut self, values: &[T]) {
        self.clear();
        self.extend_from_slice(values);
    }
    fn set_val(&mut self, index: usize, value: T) {
        self[index] = value;
    }
    fn extend_val(&mut self, values: &[T]) {
        self.extend_from_slice(values);
    }
}

impl<T: Copy, P: SegmentPolicy> VecLike<T> for SegmentVec<'_, T, P> {
    fn push_val(&mut self, value: T) {
        let pool = self.pool();
        pool.run(|| self.push_back(value)).unwrap();
    }
    fn pop_val(&mut self) -> Option<T> {
        let pool = self.pool();
        pool.run(|| self.pop_back()).unwrap()
    }
    fn len_val(&self) -> usize {
        self.len()
    }
    fn clear_val(&mut self) {
        let pool = self.pool();
        pool.run(|| self.clear()).unwrap();
    }
    fn truncate_val(&mut self, len: usize) {
        let pool = self.pool();
        pool.run(|| self.truncate(len)).unwrap();
    }
    fn insert_val(&mut self, index: usize, value: T) {
        let pool = self.pool();
        pool.run(|| self.insert(index, value)).unwrap();
    }
    fn insert_slice_val(&mut self, index: usize, values: &[T]) {
        let pool = self.pool();
        pool.run(|| self.insert_slice(index, values)).unwrap();
    }
    fn erase_val(&mut self, index: usize) {
        let pool = self.pool();
        pool.run(|| self.erase(index)).unwrap();
    }
    fn erase_range_val(&mut self, first: usize, last: usize) {
        let pool = self.pool();
        pool.run(|| self.erase_range(first, last)).unwrap();
    }
    fn resize_val(&mut self, len: usize, value: T) {
        let pool = self.pool();
        pool.run(|| self.resize_with_value(len, value)).unwrap();
    }
    fn assign_val(&mut self, values: &[T]) {
        let pool = self.pool();
        pool.run(|| self.assign_slice(values)).unwrap();
    }
    fn set_val(&mut self, index: usize, value: T) {
        let pool = self.pool();
        pool.run(|| {
            *self.at_mut(index)? = value;
            Ok(())
        })
        .unwrap();
    }
    fn extend_val(&mut self, values: &[T]) {
        let pool = self.pool();
        pool.run(|| self.extend_from_slice(values)).unwrap();
    }
}

/// Operations that can be applied to a vector for comparison testing.
#[derive(Debug, Clone)]
enum VecOp<T> {
    Push(T),
    Pop,
    Clear,
    Truncate(usize),
    Insert(usize, T),
    InsertSlice(usize, Vec<T>),
    Erase(usize),
    EraseRange(usize, usize),
    Resize(usize, T),
    Assign(Vec<T>),
    Set(usize, T),
    Extend(Vec<T>),
    Reserve(usize),
    ShrinkToFit,
}

/// Apply an operation to both vectors and compare results.
fn apply_op<T, P>(std_vec: &mut Vec<T>, seg_vec: &mut SegmentVec<'_, T, P>, op: &VecOp<T>)
where
    T: Copy + PartialEq + std::fmt::Debug,
    P: SegmentPolicy,
{
    match op {
        VecOp::Push(v) => {
            std_vec.push_val(*v);
            seg_vec.push_val(*v);
        }
        VecOp::Pop => {
            let std_result = std_vec.pop_val();
            let seg_result = seg_vec.pop_val();
            assert_eq!(std_result, seg_result, "pop_back() mismatch");
        }
        VecOp::Clear => {
            std_vec.clear_val();
            seg_vec.clear_val();
        }
        VecOp::Truncate(len) => {
            std_vec.truncate_val(*len);
            seg_vec.truncate_val(*len);
        }
        VecOp::Insert(idx, v) => {
            if *idx <= std_vec.len_val() {
                std_vec.insert_val(*idx, *v);
                seg_vec.insert_val(*idx, *v);
            }
        }
        VecOp::InsertSlice(idx, vals) => {
            if *idx <= std_vec.len_val() {
                std_vec.insert_slice_val(*idx, vals);
                seg_vec.insert_slice_val(*idx, vals);
            }
        }
        VecOp::Erase(idx) => {
            if *idx < std_vec.len_val() {
                std_vec.erase_val(*idx);
                seg_vec.erase_val(*idx);
            }
        }
        VecOp::EraseRange(a, b) => {
            let (first, last) = (*a.min(b), *a.max(b));
            if last <= std_vec.len_val() {
                std_vec.erase_range_val(first, last);
                seg_vec.erase_range_val(first, last);
            }
        }
        VecOp::Resize(len, v) => {
            std_vec.resize_val(*len, *v);
            seg_vec.resize_val(*len, *v);
        }
        VecOp::Assign(vals) => {
            std_vec.assign_val(vals);
            seg_vec.assign_val(vals);
        }
        VecOp::Set(idx, v) => {
            if *idx < std_vec.len_val() {
                std_vec.set_val(*idx, *v);
                seg_vec.set_val(*idx, *v);
            }
        }
        VecOp::Extend(vals) => {
            std_vec.extend_val(vals);
            seg_vec.extend_val(vals);
        }
        VecOp::Reserve(n) => {
            let pool = seg_vec.pool();
            pool.run(|| seg_vec.reserve(*n)).unwrap();
            assert!(seg_vec.capacity() >= *n, "reserve() left capacity below request");
        }
        VecOp::ShrinkToFit => {
            let pool = seg_vec.pool();
            pool.run(|| seg_vec.shrink_to_fit()).unwrap();
            if std_vec.is_empty() {
                assert_eq!(seg_vec.capacity(), 0, "shrink_to_fit() on empty kept storage");
            } else {
                assert!(seg_vec.capacity() >= std_vec.len());
            }
        }
    }
}

/// Verify that both vectors have the same content.
fn assert_vecs_equal<T, P>(std_vec: &[T], seg_vec: &SegmentVec<'_, T, P>)
where
    T: Copy + PartialEq + std::fmt::Debug,
    P: SegmentPolicy,
{
    assert_eq!(std_vec.len(), seg_vec.len(), "length mismatch");
    assert_eq!(std_vec.is_empty(), seg_vec.is_empty(), "is_empty mismatch");
    assert!(seg_vec.capacity() >= seg_vec.len(), "capacity below length");
    assert!(seg_vec.validate().is_ok(), "{:?}", seg_vec.validate());

    for (i, (std_elem, seg_elem)) in std_vec.iter().zip(seg_vec.iter()).enumerate() {
        assert_eq!(std_elem, seg_elem, "element mismatch at index {}", i);
    }
    assert!(std_vec.iter().rev().eq(seg_vec.iter().rev()), "reverse iteration mismatch");

    assert_eq!(std_vec.first(), seg_vec.first(), "first() mismatch");
    assert_eq!(std_vec.last(), seg_vec.last(), "last() mismatch");

    for i in 0..std_vec.len() {
        assert_eq!(std_vec.get(i), seg_vec.get(i), "get({}) mismatch", i);
    }

    assert_eq!(std_vec.get(std_vec.len()), seg_vec.get(seg_vec.len()));
    assert_eq!(std_vec.get(usize::MAX), seg_vec.get(usize::MAX));
    assert!(seg_vec.at(std_vec.len()).is_err());
}

fn hash_of<H: Hash + ?Sized>(value: &H) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn check_ops<P: SegmentPolicy>(kind: DirectoryKind, ops: &[VecOp<i32>]) {
    let pool = MemPool::new();
    let mut std_vec: Vec<i32> = Vec::new();
    let mut seg_vec: SegmentVec<'_, i32, P> = SegmentVec::with_directory(&pool, kind);

    for op in ops {
        apply_op(&mut std_vec, &mut seg_vec, op);
        assert_vecs_equal(&std_vec, &seg_vec);
    }
}

// ============================================================================
// PROPTEST STRATEGIES
// ============================================================================

/// Strategy for generating a single vector operation.
fn vec_op_strategy() -> impl Strategy<Value = VecOp<i32>> {
    prop_oneof![
        4 => any::<i32>().prop_map(VecOp::Push),
        1 => Just(VecOp::Pop),
        1 => Just(VecOp::Clear),
        1 => (0usize..300).prop_map(VecOp::Truncate),
        1 => (0usize..100, any::<i32>()).prop_map(|(idx, v)| VecOp::Insert(idx, v)),
        1 => (0usize..100, prop::collection::vec(any::<i32>(), 0..40))
            .prop_map(|(idx, v)| VecOp::InsertSlice(idx, v)),
        1 => (0usize..100).prop_map(VecOp::Erase),
        1 => (0usize..100, 0usize..100).prop_map(|(a, b)| VecOp::EraseRange(a, b)),
        1 => (0usize..300, any::<i32>()).prop_map(|(len, v)| VecOp::Resize(len, v)),
        1 => prop::collection::vec(any::<i32>(), 0..60).prop_map(VecOp::Assign),
        1 => (0usize..100, any::<i32>()).prop_map(|(idx, v)| VecOp::Set(idx, v)),
        1 => prop::collection::vec(any::<i32>(), 0..50).prop_map(VecOp::Extend),
        1 => (0usize..600).prop_map(VecOp::Reserve),
        1 => Just(VecOp::ShrinkToFit),
    ]
}

/// Strategy for generating a sequence of operations.
fn ops_sequence_strategy() -> impl Strategy<Value = Vec<VecOp<i32>>> {
    prop::collection::vec(vec_op_strategy(), 0..120)
}

fn values_strategy() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(any::<i32>(), 0..300)
}

// ============================================================================
// PROPTEST TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// A random sequence of operations produces identical results.
    #[test]
    fn proptest_operations_match_exponential(ops in ops_sequence_strategy()) {
        check_ops::<Exponential>(DirectoryKind::Bounded(64), &ops);
    }

    #[test]
    fn proptest_operations_match_exponential_growable(ops in ops_sequence_strategy()) {
        check_ops::<Exponential>(DirectoryKind::Growable, &ops);
    }

    #[test]
    fn proptest_operations_match_fixed(ops in ops_sequence_strategy()) {
        check_ops::<Fixed<7>>(DirectoryKind::Growable, &ops);
    }

    #[test]
    fn proptest_operations_match_fixed_bounded(ops in ops_sequence_strategy()) {
        check_ops::<Fixed<16>>(DirectoryKind::Bounded(64), &ops);
    }

    /// Inserting a run and erasing it again restores the original sequence.
    #[test]
    fn proptest_insert_erase_inverse(
        values in values_strategy(),
        inserted in prop::collection::vec(any::<i32>(), 0..80),
        pos_seed in any::<usize>()
    ) {
        let pool = MemPool::new();
        let mut seg_vec: SegmentVec<'_, i32, Fixed<5>> =
            pool.run(|| SegmentVec::from_slice(&pool, &values)).unwrap();
        let pos = pos_seed % (values.len() + 1);

        pool.run(|| {
            seg_vec.insert_slice(pos, &inserted)?;
            seg_vec.erase_range(pos, pos + inserted.len())
        })
        .unwrap();

        prop_assert_eq!(seg_vec.len(), values.len());
        prop_assert_eq!(seg_vec.to_vec(), values);
    }

    /// Truncating to zero and resizing back reproduces default contents.
    #[test]
    fn proptest_resize_round_trip(n in 0usize..500) {
        let pool = MemPool::new();
        let mut seg_vec: SegmentVec<'_, u64> = pool.run(|| SegmentVec::with_len(&pool, n)).unwrap();
        let original = seg_vec.to_vec();

        pool.run(|| {
            seg_vec.truncate(0)?;
            seg_vec.resize(n)
        })
        .unwrap();

        prop_assert_eq!(seg_vec.to_vec(), original);
    }

    /// Iteration, chunks, and views agree with the equivalent slice operations.
    #[test]
    fn proptest_iteration_and_views(values in values_strategy(), start_seed in any::<usize>(), n_seed in any::<usize>()) {
        let pool = MemPool::new();
        let seg_vec: SegmentVec<'_, i32, Fixed<9>> = pool.run(|| SegmentVec::from_slice(&pool, &values)).unwrap();

        let collected: Vec<i32> = seg_vec.iter().copied().collect();
        prop_assert_eq!(&collected, &values);
        let flattened: Vec<i32> = seg_vec.segments().flatten().copied().collect();
        prop_assert_eq!(&flattened, &values);
        prop_assert_eq!(seg_vec.iter().len(), values.len());

        let start = start_seed % (values.len() + 1);
        let n = n_seed % (values.len() - start + 1);
        let view = seg_vec.crange(start, n).unwrap();
        prop_assert_eq!(view.to_vec(), values[start..start + n].to_vec());
        prop_assert!(view.iter().rev().eq(values[start..start + n].iter().rev()));
    }

    /// Equality, ordering, and hashing agree with `Vec`.
    #[test]
    fn proptest_ordering_matches(a in prop::collection::vec(0i32..4, 0..12), b in prop::collection::vec(0i32..4, 0..12)) {
        let pool = MemPool::new();
        let seg_a: SegmentVec<'_, i32> = pool.run(|| SegmentVec::from_slice(&pool, &a)).unwrap();
        let seg_b: SegmentVec<'_, i32> = pool.run(|| SegmentVec::from_slice(&pool, &b)).unwrap();

        prop_assert_eq!(seg_a == seg_b, a == b);
        prop_assert_eq!(seg_a.cmp(&seg_b), a.cmp(&b));
        prop_assert_eq!(seg_a.partial_cmp(&b), a.partial_cmp(&b));
        prop_assert_eq!(a.partial_cmp(&seg_b), a.partial_cmp(&b));
        prop_assert_eq!(seg_a == b, a == b);
        prop_assert_eq!(b[..] == seg_a, a == b);
        if seg_a == seg_b {
            prop_assert_eq!(hash_of(&seg_a), hash_of(&seg_b));
        }
    }

    /// Contains matches `Vec::contains`.
    #[test]
    fn proptest_contains(values in prop::collection::vec(0i32..50, 0..100), needle in 0i32..50) {
        let pool = MemPool::new();
        let seg_vec: SegmentVec<'_, i32> = pool.run(|| SegmentVec::from_slice(&pool, &values)).unwrap();
        prop_assert_eq!(seg_vec.contains(&needle), values.contains(&needle));
    }
}

// ============================================================================
// REGRESSION TESTS
// ============================================================================

#[test]
fn test_insert_at_every_position() {
    let pool = MemPool::new();
    for pos in 0..=20 {
        let mut std_vec: Vec<i32> = (0..20).collect();
        let mut seg_vec: SegmentVec<'_, i32> = pool.run(|| SegmentVec::from_iter_in(&pool, 0..20)).unwrap();
        std_vec.insert_slice_val(pos, &[-1, -2, -3]);
        pool.run(|| seg_vec.insert_slice(pos, &[-1, -2, -3])).unwrap();
        assert_vecs_equal(&std_vec, &seg_vec);
    }
}

#[test]
fn test_erase_every_range() {
    let pool = MemPool::new();
    for first in 0..=12 {
        for last in first..=12 {
            let mut std_vec: Vec<i32> = (0..12).collect();
            let mut seg_vec: SegmentVec<'_, i32, Fixed<3>> =
                pool.run(|| SegmentVec::from_iter_in(&pool, 0..12)).unwrap();
            std_vec.drain(first..last);
            pool.run(|| seg_vec.erase_range(first, last)).unwrap();
            assert_vecs_equal(&std_vec, &seg_vec);
        }
    }
}

#[test]
fn test_grow_across_many_segments() {
    let pool = MemPool::new();
    let mut std_vec = Vec::new();
    let mut seg_vec: SegmentVec<'_, i32> = SegmentVec::new(&pool);
    for i in 0..5000 {
        std_vec.push(i);
        seg_vec.push_val(i);
    }
    assert_vecs_equal(&std_vec, &seg_vec);
    assert_eq!(seg_vec.segments_used(), 13);
}
