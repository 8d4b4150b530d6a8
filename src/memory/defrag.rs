//! Compaction planning
//!
//! A move takes the last movable allocation that has somewhere better to go
//! and targets the earliest free span that precedes it (a lower chunk
//! index, or the same chunk at a lower offset). Every move strictly lowers
//! the moved allocation's `(chunk, offset)` position, so repeated planning
//! always terminates. Emptied tail chunks are then reclaimed by the normal
//! deallocation path.
//!
//! Execution lives in [`ChunkAllocator::defragment_step`]: reserve the
//! target, copy the bytes, swap identities, free the old placement.
//!
//! [`ChunkAllocator::defragment_step`]: super::ChunkAllocator::defragment_step

use serde::{Deserialize, Serialize};

use super::chunk::Chunk;
use super::region::{AllocationHandle, FreeRange, MemoryLocation};

/// A planned relocation, expressed against the current layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MovePlan {
    pub(crate) handle: AllocationHandle,
    pub(crate) source_chunk: usize,
    pub(crate) target_chunk: usize,
    pub(crate) target: FreeRange,
}

/// Relocation performed by a compaction step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub handle: AllocationHandle,
    pub from: MemoryLocation,
    pub to: MemoryLocation,
}

pub(crate) fn plan_move(chunks: &[Chunk]) -> Option<MovePlan> {
    for (source_chunk, chunk) in chunks.iter().enumerate().rev() {
        for alloc in chunk.allocations.iter().rev() {
            if alloc.is_static {
                continue;
            }
            if let Some((target_chunk, target)) =
                earliest_target(chunks, source_chunk, alloc.offset, alloc.size)
            {
                return Some(MovePlan {
                    handle: alloc.handle,
                    source_chunk,
                    target_chunk,
                    target,
                });
            }
        }
    }
    None
}

fn earliest_target(
    chunks: &[Chunk],
    source_chunk: usize,
    source_offset: u64,
    size: u64,
) -> Option<(usize, FreeRange)> {
    chunks[..=source_chunk]
        .iter()
        .enumerate()
        .filter(|(_, c)| c.fits(size))
        .find_map(|(idx, c)| {
            c.free_ranges()
                .iter()
                .take_while(|f| idx < source_chunk || f.offset < source_offset)
                .find(|f| f.size >= size)
                .map(|f| (idx, *f))
        })
}
