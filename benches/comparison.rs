//! Benchmarks comparing SegmentVec on the in-memory pool with std::Vec using divan.
//!
//! Every SegmentVec mutation pays for a scope and its undo log; the
//! `_batched` variants run a whole workload inside one scope.
//!
//! Run with: `cargo bench`

use std::sync::OnceLock;

use pmem_segvec::{Engine, MemPool, SegmentVec};

fn main() {
    divan::main();
}

fn pool() -> &'static MemPool {
    static POOL: OnceLock<MemPool> = OnceLock::new();
    POOL.get_or_init(MemPool::new)
}

type Segmented = SegmentVec<'static, i32>;

// Trait to abstract over Vec and SegmentVec for generic benchmarks
trait VecLike: Sized {
    fn empty() -> Self;
    fn push(&mut self, val: i32);
    fn pop(&mut self) -> Option<i32>;
    fn get(&self, idx: usize) -> Option<&i32>;
    fn len(&self) -> usize;
    fn iter<'a>(&'a self) -> impl Iterator<Item = &'a i32>;
    fn contains(&self, val: &i32) -> bool;
    fn insert(&mut self, idx: usize, val: i32);
    fn remove(&mut self, idx: usize);
    fn duplicate(&self) -> Self;

    fn filled(n: usize) -> Self {
        let mut v = Self::empty();
        for i in 0..n as i32 {
            v.push(i);
        }
        v
    }
}

impl VecLike for Vec<i32> {
    fn empty() -> Self {
        Vec::new()
    }
    fn push(&mut self, val: i32) {
        Vec::push(self, val);
    }
    fn pop(&mut self) -> Option<i32> {
        Vec::pop(self)
    }
    fn get(&self, idx: usize) -> Option<&i32> {
        <[i32]>::get(self, idx)
    }
    fn len(&self) -> usize {
        Vec::len(self)
    }
    fn iter<'a>(&'a self) -> impl Iterator<Item = &'a i32> {
        <[i32]>::iter(self)
    }
    fn contains(&self, val: &i32) -> bool {
        <[i32]>::contains(self, val)
    }
    fn insert(&mut self, idx: usize, val: i32) {
        Vec::insert(self, idx, val);
    }
    fn remove(&mut self, idx: usize) {
        Vec::remove(self, idx);
    }
    fn duplicate(&self) -> Self {
        self.clone()
    }
}

impl VecLike for Segmented {
    fn empty() -> Self {
        SegmentVec::new(pool())
    }
    fn push(&mut self, val: i32) {
        pool().run(|| self.push_back(val)).unwrap();
    }
    fn pop(&mut self) -> Option<i32> {
        pool().run(|| self.pop_back()).unwrap()
    }
    fn get(&self, idx: usize) -> Option<&i32> {
        SegmentVec::get(self, idx)
    }
    fn len(&self) -> usize {
        SegmentVec::len(self)
    }
    fn iter<'a>(&'a self) -> impl Iterator<Item = &'a i32> {
        SegmentVec::iter(self)
    }
    fn contains(&self, val: &i32) -> bool {
        SegmentVec::contains(self, val)
    }
    fn insert(&mut self, idx: usize, val: i32) {
        pool().run(|| SegmentVec::insert(self, idx, val)).unwrap();
    }
    fn remove(&mut self, idx: usize) {
        pool().run(|| self.erase(idx)).unwrap();
    }
    fn duplicate(&self) -> Self {
        pool().run(|| self.try_clone()).unwrap()
    }
}

// ============================================================================
// Push Benchmarks
// ============================================================================

#[divan::bench(types = [Vec<i32>, Segmented], consts = [100, 1000, 10000])]
fn push<V: VecLike, const N: usize>() -> V {
    V::filled(N)
}

#[divan::bench(consts = [100, 1000, 10000])]
fn push_batched<const N: usize>() -> Segmented {
    let mut v = SegmentVec::new(pool());
    pool()
        .run(|| {
            for i in 0..N as i32 {
                v.push_back(i)?;
            }
            Ok(())
        })
        .unwrap();
    v
}

#[divan::bench(consts = [100, 1000, 10000])]
fn extend_batched<const N: usize>() -> Segmented {
    pool().run(|| SegmentVec::from_iter_in(pool(), 0..N as i32)).unwrap()
}

// ============================================================================
// Pop Benchmarks
// ============================================================================

#[divan::bench(types = [Vec<i32>, Segmented], consts = [100, 1000, 10000])]
fn pop<V: VecLike, const N: usize>(bencher: divan::Bencher) {
    bencher
        .with_inputs(|| V::filled(N))
        .bench_local_values(|mut v| {
            while v.pop().is_some() {}
            v
        });
}

// ============================================================================
// Access Benchmarks
// ============================================================================

#[divan::bench(types = [Vec<i32>, Segmented], consts = [100, 1000, 10000])]
fn sequential_read<V: VecLike, const N: usize>(bencher: divan::Bencher) {
    bencher
        .with_inputs(|| V::filled(N))
        .bench_local_refs(|v| {
            let mut sum = 0i32;
            for i in 0..N {
                sum = sum.wrapping_add(*v.get(i).unwrap());
            }
            sum
        });
}

#[divan::bench(types = [Vec<i32>, Segmented], consts = [100, 1000, 10000])]
fn random_read<V: VecLike, const N: usize>(bencher: divan::Bencher) {
    use rand::prelude::*;
    let mut rng = rand::rng();
    let indices: Vec<usize> = (0..N).map(|_| rng.random_range(0..N)).collect();

    bencher
        .with_inputs(|| V::filled(N))
        .bench_local_refs(|v| {
            let mut sum = 0i32;
            for &i in &indices {
                sum = sum.wrapping_add(*v.get(i).unwrap());
            }
            sum
        });
}

// ============================================================================
// Iteration Benchmarks
// ============================================================================

#[divan::bench(types = [Vec<i32>, Segmented], consts = [100, 1000, 10000])]
fn iterate<V: VecLike, const N: usize>(bencher: divan::Bencher) {
    bencher
        .with_inputs(|| V::filled(N))
        .bench_local_refs(|v| {
            let mut sum = 0i32;
            for &x in v.iter() {
                sum = sum.wrapping_add(x);
            }
            sum
        });
}

#[divan::bench(consts = [100, 1000, 10000])]
fn iterate_segments<const N: usize>(bencher: divan::Bencher) {
    bencher
        .with_inputs(|| Segmented::filled(N))
        .bench_local_refs(|v| {
            let mut sum = 0i32;
            for chunk in v.segments() {
                for &x in chunk {
                    sum = sum.wrapping_add(x);
                }
            }
            sum
        });
}

#[divan::bench(types = [Vec<i32>, Segmented], consts = [100, 1000, 10000])]
fn contains<V: VecLike, const N: usize>(bencher: divan::Bencher) {
    use rand::prelude::*;
    let mut rng = rand::rng();
    let targets: Vec<i32> = (0..100)
        .map(|_| rng.random_range(0..N as i32 * 2))
        .collect();

    bencher
        .with_inputs(|| V::filled(N))
        .bench_local_refs(|v| {
            let mut found = 0usize;
            for &t in &targets {
                if v.contains(&t) {
                    found += 1;
                }
            }
            found
        });
}

// ============================================================================
// Mutation Benchmarks
// ============================================================================

#[divan::bench(types = [Vec<i32>, Segmented], consts = [100, 1000])]
fn insert_front<V: VecLike, const N: usize>(bencher: divan::Bencher) {
    bencher.bench_local(|| {
        let mut v = V::empty();
        for i in 0..N as i32 {
            v.insert(0, i);
        }
        v
    });
}

#[divan::bench(types = [Vec<i32>, Segmented], consts = [100, 1000])]
fn erase_front<V: VecLike, const N: usize>(bencher: divan::Bencher) {
    bencher
        .with_inputs(|| V::filled(N))
        .bench_local_values(|mut v| {
            while v.len() > 0 {
                v.remove(0);
            }
            v
        });
}

#[divan::bench(consts = [100, 1000, 10000])]
fn erase_half_batched<const N: usize>(bencher: divan::Bencher) {
    bencher
        .with_inputs(|| Segmented::filled(N))
        .bench_local_values(|mut v| {
            pool().run(|| v.erase_range(N / 4, N / 2)).unwrap();
            v
        });
}

// ============================================================================
// Clone Benchmark
// ============================================================================

#[divan::bench(types = [Vec<i32>, Segmented], consts = [100, 1000, 10000])]
fn clone<V: VecLike, const N: usize>(bencher: divan::Bencher) {
    bencher
        .with_inputs(|| V::filled(N))
        .bench_local_refs(|v| v.duplicate());
}

// ============================================================================
// Rollback Cost
// ============================================================================

#[divan::bench(consts = [100, 1000, 10000])]
fn aborted_overwrite<const N: usize>(bencher: divan::Bencher) {
    bencher
        .with_inputs(|| Segmented::filled(N))
        .bench_local_refs(|v| {
            let _ = pool().run(|| {
                for x in v.iter_mut()? {
                    *x = -1;
                }
                Err::<(), _>(pmem_segvec::Error::aborted("bench"))
            });
        });
}

// ============================================================================
// Address Stability
// ============================================================================

#[divan::bench(consts = [100, 1000, 10000])]
fn address_stability<const N: usize>() {
    let mut v = Segmented::empty();
    let mut ptrs = Vec::with_capacity(N);

    for i in 0..N as i32 {
        v.push(i);
        ptrs.push(v.get(v.len() - 1).unwrap() as *const i32);
    }

    // Verify all pointers are still valid
    for (i, &ptr) in ptrs.iter().enumerate() {
        assert_eq!(unsafe { *ptr }, i as i32);
    }
}
