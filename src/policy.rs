//! Segment-size policies.
//!
//! A policy is pure index arithmetic: it maps a logical index to the segment
//! that holds it and the offset inside that segment, and reports how much
//! capacity each segment contributes. Policies are zero-sized types selected
//! through the `P` parameter of [`SegmentVec`](crate::SegmentVec).

/// Layout of the segment directory.
///
/// Orthogonal to the element-storage policy: it only governs how the list of
/// segment handles itself is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryKind {
    /// One durable block holding at most this many segment handles.
    /// Growth past the bound fails with a length error.
    Bounded(usize),
    /// A handle list that is reallocated (handles only, never element
    /// storage) when it runs out of room.
    Growable,
}

impl DirectoryKind {
    /// Maximum number of segments this directory can address, given the
    /// largest durable block the engine will hand out.
    pub(crate) fn max_segments(self, max_table_entries: usize) -> usize {
        match self {
            DirectoryKind::Bounded(n) => n.min(max_table_entries),
            DirectoryKind::Growable => max_table_entries,
        }
    }
}

/// Index arithmetic for a segmented layout.
///
/// Implementations must keep `segment_of`/`offset_of` consistent with
/// `segment_top`, so that for every index `k`:
/// `segment_top(segment_of(k)) + offset_of(k) == k` and
/// `offset_of(k) < segment_capacity(segment_of(k))`.
pub trait SegmentPolicy {
    /// Segment that holds logical index `index`.
    fn segment_of(index: usize) -> usize;

    /// Offset of logical index `index` inside its segment.
    fn offset_of(index: usize) -> usize;

    /// Number of elements stored in all segments below `segment`.
    fn segment_top(segment: usize) -> usize;

    /// Total capacity of segments `0..=last_segment`.
    fn capacity_for(last_segment: usize) -> usize;

    /// Capacity of a single segment.
    fn segment_capacity(segment: usize) -> usize;

    /// Largest element count representable with at most `max_segments`
    /// segments, none longer than `max_segment_len` elements.
    fn max_size(max_segments: usize, max_segment_len: usize) -> usize;

    /// Directory layout used when the caller does not pick one.
    fn default_directory() -> DirectoryKind;

    /// Returns `(segment, offset)` for a logical index.
    #[inline]
    fn location(index: usize) -> (usize, usize) {
        (Self::segment_of(index), Self::offset_of(index))
    }
}

/// Segment `i` holds `2^i` elements.
///
/// The directory grows logarithmically with the element count, so a bounded
/// directory of 64 handles addresses the whole index space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Exponential;

impl Exponential {
    /// Directory bound used by default, one handle per bit of `usize`.
    pub const MAX_SEGMENTS: usize = usize::BITS as usize;
}

impl SegmentPolicy for Exponential {
    #[inline]
    fn segment_of(index: usize) -> usize {
        debug_assert!(index < usize::MAX);
        (index + 1).ilog2() as usize
    }

    #[inline]
    fn offset_of(index: usize) -> usize {
        let biased = index + 1;
        biased ^ (1usize << biased.ilog2())
    }

    #[inline]
    fn segment_top(segment: usize) -> usize {
        if segment >= usize::BITS as usize {
            usize::MAX
        } else {
            (1usize << segment) - 1
        }
    }

    #[inline]
    fn capacity_for(last_segment: usize) -> usize {
        if last_segment >= usize::BITS as usize - 1 {
            usize::MAX
        } else {
            usize::MAX >> (usize::BITS as usize - 1 - last_segment)
        }
    }

    #[inline]
    fn segment_capacity(segment: usize) -> usize {
        debug_assert!(segment < usize::BITS as usize);
        1usize << segment
    }

    fn max_size(max_segments: usize, max_segment_len: usize) -> usize {
        if max_segment_len == 0 || max_segments == 0 {
            return 0;
        }
        // Segment i needs 2^i elements in one block.
        let fitting = max_segment_len.ilog2() as usize + 1;
        let segments = fitting.min(max_segments);
        Self::capacity_for(segments - 1)
    }

    fn default_directory() -> DirectoryKind {
        DirectoryKind::Bounded(Self::MAX_SEGMENTS)
    }
}

/// Every segment holds exactly `S` elements.
///
/// More directory entries than [`Exponential`], but no segment ever wastes more
/// than `S - 1` slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fixed<const S: usize>;

impl<const S: usize> Fixed<S> {
    const NONZERO: () = assert!(S > 0, "fixed segment size must be non-zero");
}

impl<const S: usize> SegmentPolicy for Fixed<S> {
    #[inline]
    fn segment_of(index: usize) -> usize {
        let () = Self::NONZERO;
        index / S
    }

    #[inline]
    fn offset_of(index: usize) -> usize {
        let () = Self::NONZERO;
        index % S
    }

    #[inline]
    fn segment_top(segment: usize) -> usize {
        segment.saturating_mul(S)
    }

    #[inline]
    fn capacity_for(last_segment: usize) -> usize {
        (last_segment + 1).saturating_mul(S)
    }

    #[inline]
    fn segment_capacity(_segment: usize) -> usize {
        let () = Self::NONZERO;
        S
    }

    fn max_size(max_segments: usize, max_segment_len: usize) -> usize {
        if S > max_segment_len {
            return 0;
        }
        max_segments.saturating_mul(S)
    }

    fn default_directory() -> DirectoryKind {
        DirectoryKind::Growable
    }
}
