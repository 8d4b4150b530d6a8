//! Chunk record: one provider chunk subdivided into allocations and free spans
//!
//! Both lists are kept sorted by offset. Together they tile `[0, capacity)`
//! exactly, and no two free spans are ever adjacent between operations.

use super::provider::ChunkHandle;
use super::region::{Allocation, AllocationHandle, BufferId, FreeRange, MemoryId};
use crate::error::AllocResult;
use crate::internal_error;

/// Bookkeeping for one chunk of device memory
#[derive(Debug)]
pub struct Chunk {
    handle: ChunkHandle,
    capacity: u64,
    /// Sorted by offset (equivalently by end, since entries never overlap)
    pub(crate) allocations: Vec<Allocation>,
    /// Sorted by offset, fully coalesced
    free_list: Vec<FreeRange>,
    /// Sum of allocation sizes
    allocated: u64,
    /// Largest free span, lowest offset on ties. None when fully allocated.
    max_free_range: Option<FreeRange>,
}

impl Chunk {
    /// Wrap a freshly created provider chunk; the whole capacity starts free
    pub(crate) fn new(handle: ChunkHandle) -> Self {
        let capacity = handle.size();
        let whole = FreeRange::new(0, capacity);
        Self {
            handle,
            capacity,
            allocations: Vec::new(),
            free_list: vec![whole],
            allocated: 0,
            max_free_range: Some(whole),
        }
    }

    pub fn memory(&self) -> MemoryId {
        self.handle.memory()
    }

    pub fn buffer(&self) -> BufferId {
        self.handle.buffer()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated
    }

    pub fn free_bytes(&self) -> u64 {
        self.capacity - self.allocated
    }

    pub fn max_free_range(&self) -> Option<FreeRange> {
        self.max_free_range
    }

    pub fn free_ranges(&self) -> &[FreeRange] {
        &self.free_list
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// True when the chunk holds no allocations
    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    /// Can the chunk satisfy `size` without growth
    pub fn fits(&self, size: u64) -> bool {
        self.max_free_range.is_some_and(|r| r.size >= size)
    }

    /// Free bytes outside the single largest free span
    pub fn fragmented_free_bytes(&self) -> u64 {
        let largest = self.max_free_range.map_or(0, |r| r.size);
        self.free_bytes() - largest
    }

    pub(crate) fn handle(&self) -> &ChunkHandle {
        &self.handle
    }

    pub(crate) fn into_handle(self) -> ChunkHandle {
        self.handle
    }

    /// Index of the free-list entry equal to `range`
    pub(crate) fn find_free(&self, range: &FreeRange) -> Option<usize> {
        let idx = self.free_list.partition_point(|f| f.offset < range.offset);
        match self.free_list.get(idx) {
            Some(found) if found == range => Some(idx),
            _ => None,
        }
    }

    /// Index of the allocation starting at `offset`
    pub(crate) fn find_allocation(&self, offset: u64) -> Option<usize> {
        self.allocations
            .binary_search_by_key(&offset, |a| a.offset)
            .ok()
    }

    /// Claim the low `size` bytes of free span `free_idx` for a new allocation.
    ///
    /// Returns the offset of the new allocation.
    pub(crate) fn carve(
        &mut self,
        free_idx: usize,
        size: u64,
        handle: AllocationHandle,
        is_static: bool,
    ) -> AllocResult<u64> {
        let memory = self.handle.memory();
        let free = self.free_list.get_mut(free_idx).ok_or_else(|| {
            internal_error!("free span index {} out of range in {}", free_idx, memory)
        })?;
        if free.size < size {
            return Err(internal_error!("free span {:?} too small for {} bytes", free, size));
        }

        let start = free.offset;
        free.offset += size;
        free.size -= size;
        if free.size == 0 {
            self.free_list.remove(free_idx);
        }
        self.find_new_max();

        let end = start + size;
        let at = self.allocations.partition_point(|a| a.offset < end);
        self.allocations
            .insert(at, Allocation::new(handle, start, size, is_static));
        self.allocated += size;

        self.debug_check();
        Ok(start)
    }

    /// Remove the allocation at `alloc_idx` and return its span to the free list
    pub(crate) fn release(&mut self, alloc_idx: usize) -> Allocation {
        let alloc = self.allocations.remove(alloc_idx);
        self.add_to_free_list(alloc.as_range());
        self.find_new_max();
        self.allocated -= alloc.size;

        self.debug_check();
        alloc
    }

    /// Insert `range` at its sorted position, merging with the neighbours it
    /// touches (at most one on each side).
    fn add_to_free_list(&mut self, range: FreeRange) {
        let at = self.free_list.partition_point(|f| f.offset < range.offset);

        let merged_prev = at > 0 && self.free_list[at - 1].is_adjacent_to(&range);
        let current = if merged_prev {
            self.free_list[at - 1].size += range.size;
            at - 1
        } else {
            self.free_list.insert(at, range);
            at
        };

        let next = current + 1;
        if next < self.free_list.len()
            && self.free_list[current].is_adjacent_to(&self.free_list[next])
        {
            self.free_list[current].size += self.free_list[next].size;
            self.free_list.remove(next);
        }
    }

    fn find_new_max(&mut self) {
        self.max_free_range = self
            .free_list
            .iter()
            .copied()
            .reduce(|best, r| if r.size > best.size { r } else { best });
    }

    #[inline]
    fn debug_check(&self) {
        #[cfg(debug_assertions)]
        if let Err(msg) = self.check_invariants() {
            panic!("chunk {} corrupted: {}", self.handle.memory(), msg);
        }
    }

    /// Verify the tiling, ordering, coalescing and cached-counter invariants
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut spans: Vec<(u64, u64, bool)> = self
            .allocations
            .iter()
            .map(|a| (a.offset, a.size, true))
            .chain(self.free_list.iter().map(|f| (f.offset, f.size, false)))
            .collect();
        spans.sort_by_key(|&(offset, _, _)| offset);

        let mut cursor = 0u64;
        for &(offset, size, _) in &spans {
            if size == 0 {
                return Err(format!("zero-sized span at {}", offset));
            }
            if offset != cursor {
                return Err(format!(
                    "span at {} does not continue coverage at {}",
                    offset, cursor
                ));
            }
            cursor = offset + size;
        }
        if cursor != self.capacity {
            return Err(format!("coverage ends at {}, capacity is {}", cursor, self.capacity));
        }

        if self.allocations.windows(2).any(|w| w[0].offset >= w[1].offset) {
            return Err("allocation list out of order".to_string());
        }
        if self.free_list.windows(2).any(|w| w[0].offset >= w[1].offset) {
            return Err("free list out of order".to_string());
        }
        if let Some(w) = self.free_list.windows(2).find(|w| w[0].is_adjacent_to(&w[1])) {
            return Err(format!("adjacent free spans {:?} and {:?}", w[0], w[1]));
        }

        let sum: u64 = self.allocations.iter().map(|a| a.size).sum();
        if sum != self.allocated {
            return Err(format!(
                "allocated counter {} disagrees with list sum {}",
                self.allocated, sum
            ));
        }

        let largest = self.free_list.iter().map(|f| f.size).max();
        if self.max_free_range.map(|r| r.size) != largest {
            return Err(format!(
                "stale max free range {:?} (largest is {:?})",
                self.max_free_range, largest
            ));
        }
        Ok(())
    }
}
