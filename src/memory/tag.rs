//! Provenance tags: which type last occupied each byte run of a block.
//!
//! A tag describes a contiguous run of same-type, same-size elements. The
//! index keeps tags sorted by offset, mutually non-overlapping and inside the
//! block's bounds; bytes outside every tag were never written and read back
//! as uninitialized. Contiguous writes of the identical type always coalesce
//! into one run, so the number of tags is bounded by the number of distinct
//! type changes at distinct offsets, not by the number of writes.
//!
//! The ordered map with predecessor queries replaces the original's
//! hand-linked balancing tree; `range(..=offset).next_back()` answers "which
//! run covers or precedes this offset" in O(log n).

use crate::ty::CType;
use crate::value::Status;
use std::collections::BTreeMap;
use tracing::trace;

/// One run of `count` elements of `elem_size` bytes each, starting at
/// `offset` within the owning block.
///
/// `status` is Defined for ordinary writes; a run written from an Undefined
/// value keeps its payload bits but is poisoned, so reads of it never
/// resurrect a defined value.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceTag {
    pub offset: usize,
    pub elem_size: usize,
    pub count: usize,
    pub ty: CType,
    pub status: Status,
}

impl ProvenanceTag {
    /// One past the last byte the run covers.
    pub fn end(&self) -> usize {
        self.offset + self.elem_size * self.count
    }
}

#[derive(Debug, Clone, PartialEq)]
struct TagRun {
    elem_size: usize,
    count: usize,
    ty: CType,
    status: Status,
}

impl TagRun {
    fn byte_len(&self) -> usize {
        self.elem_size * self.count
    }

    fn as_tag(&self, offset: usize) -> ProvenanceTag {
        ProvenanceTag {
            offset,
            elem_size: self.elem_size,
            count: self.count,
            ty: self.ty.clone(),
            status: self.status,
        }
    }
}

/// Ordered, non-overlapping set of provenance tags for one block.
#[derive(Debug, Clone, Default)]
pub struct TagIndex {
    runs: BTreeMap<usize, TagRun>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Tags in offset order.
    pub fn iter(&self) -> impl Iterator<Item = ProvenanceTag> + '_ {
        self.runs.iter().map(|(&offset, run)| run.as_tag(offset))
    }

    /// The tag whose range contains `offset`, or the nearest one that
    /// precedes it.
    pub fn tag_at(&self, offset: usize) -> Option<ProvenanceTag> {
        self.runs
            .range(..=offset)
            .next_back()
            .map(|(&start, run)| run.as_tag(start))
    }

    /// The tag whose range fully contains `[offset, offset + len)`, if any.
    pub fn covering(&self, offset: usize, len: usize) -> Option<ProvenanceTag> {
        let (&start, run) = self.runs.range(..=offset).next_back()?;
        let tag = run.as_tag(start);
        (tag.end() >= offset + len).then_some(tag)
    }

    /// Whether any tag touches `[offset, offset + len)`. Distinguishes a
    /// range no write ever reached from one that mixes tagged and untagged
    /// bytes.
    pub fn overlaps(&self, offset: usize, len: usize) -> bool {
        if self.runs.range(offset..offset + len).next().is_some() {
            return true;
        }
        self.runs
            .range(..offset)
            .next_back()
            .is_some_and(|(&start, run)| start + run.byte_len() > offset)
    }

    /// Records a write of `len` bytes at `offset`. Overlapped neighbours are
    /// trimmed to their surviving whole elements, then the new single-element
    /// run is inserted and coalesced with identical adjacent runs.
    pub fn record_write(&mut self, offset: usize, len: usize, ty: &CType, status: Status) {
        debug_assert!(len > 0, "zero-length writes never reach the tag index");
        self.trim_range(offset, offset + len);
        self.runs.insert(
            offset,
            TagRun { elem_size: len, count: 1, ty: ty.clone(), status },
        );
        let start = self.coalesce_with_pred(offset);
        let end = start + self.runs[&start].byte_len();
        if self.runs.contains_key(&end) {
            self.coalesce_with_pred(end);
        }
    }

    /// Removes tag coverage over `[offset, offset + len)`, returning those
    /// bytes to the untagged (uninitialized) state. Used when a value whose
    /// status is Uninitialized is written to memory.
    pub fn clear_range(&mut self, offset: usize, len: usize) {
        if len > 0 {
            self.trim_range(offset, offset + len);
        }
    }

    /// Trims every run overlapping `[start, end)` down to the whole elements
    /// that lie entirely outside the range. Partial elements straddling the
    /// boundary were destroyed by the write and are dropped, never retagged.
    fn trim_range(&mut self, start: usize, end: usize) {
        // A run beginning strictly before `start` may straddle it (and may
        // even extend past `end`).
        if let Some((&run_start, run)) = self.runs.range(..start).next_back() {
            if run_start + run.byte_len() > start {
                let run = self.runs.remove(&run_start).unwrap();
                let run_end = run_start + run.byte_len();
                let keep = (start - run_start) / run.elem_size;
                trace!(
                    run_start,
                    run_end,
                    keep,
                    "write straddles an existing run; truncating"
                );
                if keep > 0 {
                    self.runs
                        .insert(run_start, TagRun { count: keep, ..run.clone() });
                }
                self.reinsert_tail(&run, run_start, run_end, end);
            }
        }

        // Runs beginning inside the range lose their head; only whole
        // elements at or after `end` survive.
        let inside: Vec<usize> = self.runs.range(start..end).map(|(&k, _)| k).collect();
        for run_start in inside {
            let run = self.runs.remove(&run_start).unwrap();
            let run_end = run_start + run.byte_len();
            self.reinsert_tail(&run, run_start, run_end, end);
        }
    }

    /// Reinserts the whole elements of `run` that lie at or after `end`.
    fn reinsert_tail(&mut self, run: &TagRun, run_start: usize, run_end: usize, end: usize) {
        if run_end <= end {
            return;
        }
        let skipped = (end - run_start).div_ceil(run.elem_size);
        let tail_start = run_start + skipped * run.elem_size;
        if tail_start < run_end {
            let count = (run_end - tail_start) / run.elem_size;
            self.runs
                .insert(tail_start, TagRun { count, ..run.clone() });
        }
    }

    /// Merges the run starting at `offset` into its predecessor when they are
    /// adjacent and describe identical elements. Returns the start of the
    /// resulting run.
    fn coalesce_with_pred(&mut self, offset: usize) -> usize {
        let Some((&pred_start, pred)) = self.runs.range(..offset).next_back() else {
            return offset;
        };
        let run = &self.runs[&offset];
        let mergeable = pred_start + pred.byte_len() == offset
            && pred.elem_size == run.elem_size
            && pred.status == run.status
            && pred.ty == run.ty;
        if !mergeable {
            return offset;
        }
        let run = self.runs.remove(&offset).unwrap();
        let pred = self.runs.get_mut(&pred_start).unwrap();
        pred.count += run.count;
        trace!(pred_start, count = pred.count, "coalesced adjacent same-type runs");
        pred_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::CType;

    fn index_invariants(index: &TagIndex) {
        let tags: Vec<_> = index.iter().collect();
        for pair in tags.windows(2) {
            assert!(pair[0].offset < pair[1].offset, "tags out of order");
            assert!(pair[0].end() <= pair[1].offset, "tags overlap");
        }
    }

    #[test]
    fn test_contiguous_same_type_writes_merge() {
        let mut index = TagIndex::new();
        for i in 0..4 {
            index.record_write(i * 4, 4, &CType::int32(), Status::Defined);
        }
        index_invariants(&index);
        assert_eq!(index.len(), 1);
        let tag = index.tag_at(0).unwrap();
        assert_eq!((tag.offset, tag.elem_size, tag.count), (0, 4, 4));
    }

    #[test]
    fn test_reverse_order_writes_merge_too() {
        let mut index = TagIndex::new();
        index.record_write(4, 4, &CType::int32(), Status::Defined);
        index.record_write(0, 4, &CType::int32(), Status::Defined);
        assert_eq!(index.len(), 1);
        assert_eq!(index.tag_at(0).unwrap().count, 2);
    }

    #[test]
    fn test_different_types_do_not_merge() {
        let mut index = TagIndex::new();
        index.record_write(0, 4, &CType::int32(), Status::Defined);
        index.record_write(4, 4, &CType::uint32(), Status::Defined);
        index_invariants(&index);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_exact_overwrite_replaces_type() {
        let mut index = TagIndex::new();
        index.record_write(0, 4, &CType::int32(), Status::Defined);
        index.record_write(0, 4, &CType::uint32(), Status::Defined);
        assert_eq!(index.len(), 1);
        assert_eq!(index.tag_at(0).unwrap().ty, CType::uint32());
    }

    #[test]
    fn test_overwrite_head_of_run() {
        let mut index = TagIndex::new();
        for i in 0..3 {
            index.record_write(i * 4, 4, &CType::int32(), Status::Defined);
        }
        // A char at offset 0 consumes the first int's head; the other two
        // ints survive untouched.
        index.record_write(0, 1, &CType::char_(), Status::Defined);
        index_invariants(&index);
        let tags: Vec<_> = index.iter().collect();
        assert_eq!(tags.len(), 2);
        assert_eq!((tags[0].offset, tags[0].elem_size, tags[0].count), (0, 1, 1));
        assert_eq!((tags[1].offset, tags[1].count), (4, 2));
    }

    #[test]
    fn test_write_mid_run_truncates_whole_elements() {
        let mut index = TagIndex::new();
        for i in 0..4 {
            index.record_write(i * 4, 4, &CType::int32(), Status::Defined);
        }
        // Straddles elements 1 and 2: element 0 survives in front, element 3
        // survives behind, the partially destroyed ones disappear.
        index.record_write(6, 4, &CType::uint32(), Status::Defined);
        index_invariants(&index);
        let tags: Vec<_> = index.iter().collect();
        assert_eq!(tags.len(), 3);
        assert_eq!((tags[0].offset, tags[0].count), (0, 1));
        assert_eq!(tags[0].ty, CType::int32());
        assert_eq!((tags[1].offset, tags[1].elem_size), (6, 4));
        assert_eq!((tags[2].offset, tags[2].count), (12, 1));
    }

    #[test]
    fn test_write_spanning_multiple_runs() {
        let mut index = TagIndex::new();
        index.record_write(0, 4, &CType::int32(), Status::Defined);
        index.record_write(4, 2, &CType::Int { width: crate::ty::Width::W16, signed: true }, Status::Defined);
        index.record_write(6, 4, &CType::uint32(), Status::Defined);
        index.record_write(2, 6, &CType::array_of(CType::char_(), 6), Status::Defined);
        index_invariants(&index);
        // int32 head gone, short gone, uint32 tail partially destroyed.
        let tags: Vec<_> = index.iter().collect();
        assert_eq!(tags.len(), 1);
        assert_eq!((tags[0].offset, tags[0].elem_size, tags[0].count), (2, 6, 1));
    }

    #[test]
    fn test_clear_range_untags() {
        let mut index = TagIndex::new();
        index.record_write(0, 8, &CType::int64(), Status::Defined);
        index.clear_range(0, 8);
        assert!(index.is_empty());
        assert!(index.tag_at(0).is_none());
    }

    #[test]
    fn test_covering_queries() {
        let mut index = TagIndex::new();
        index.record_write(4, 4, &CType::int32(), Status::Defined);
        index.record_write(8, 4, &CType::int32(), Status::Defined);
        assert!(index.covering(0, 4).is_none());
        assert!(index.covering(4, 4).is_some());
        assert!(index.covering(8, 4).is_some());
        assert!(index.covering(10, 4).is_none());
        // tag_at still answers with the nearest preceding run.
        assert!(index.tag_at(100).is_some());
        assert!(index.tag_at(3).is_none());
    }

    #[test]
    fn test_overlap_queries() {
        let mut index = TagIndex::new();
        index.record_write(4, 4, &CType::int32(), Status::Defined);
        assert!(!index.overlaps(0, 4));
        assert!(index.overlaps(2, 4));
        assert!(index.overlaps(6, 1));
        assert!(index.overlaps(7, 4));
        assert!(!index.overlaps(8, 4));
    }

    #[test]
    fn test_poisoned_runs_do_not_merge_with_defined() {
        let mut index = TagIndex::new();
        index.record_write(0, 4, &CType::int32(), Status::Defined);
        index.record_write(4, 4, &CType::int32(), Status::Undefined);
        assert_eq!(index.len(), 2);
    }
}
