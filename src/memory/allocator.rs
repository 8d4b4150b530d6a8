//! Chunk allocator
//!
//! Sub-allocates variably sized regions out of fixed-size chunks obtained
//! from a [`ChunkProvider`]. Placement is delegated to a [`FitStrategy`];
//! freed regions are coalesced with their free neighbours; empty chunks at
//! the end of the container are handed back to the provider.
//!
//! # Thread Safety
//!
//! Every operation takes one allocator-wide lock for its full duration,
//! including provider calls for chunk creation, destruction and transfers.
//! Tail reclamation and cross-chunk swaps rely on that global view; do not
//! split it into per-chunk locks.
//!
//! # Handles
//!
//! [`AllocationHandle`]s name logical allocations. A swap or a compaction
//! step changes where an allocation lives; the handle keeps working and
//! [`ChunkAllocator::location`] reports the new placement.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chunkalloc::memory::{AllocatorConfig, ChunkAllocator, FirstFit, HostChunkProvider};
//!
//! let provider = Arc::new(HostChunkProvider::new());
//! let allocator = ChunkAllocator::new(
//!     provider,
//!     Arc::new(FirstFit),
//!     AllocatorConfig::new().with_chunk_size(1024),
//! )?;
//!
//! let handle = allocator.allocate(100)?;
//! allocator.write(handle, &[7u8; 100])?;
//! assert_eq!(allocator.collect_stats().used_bytes, 100);
//!
//! allocator.deallocate(handle)?;
//! # Ok::<(), chunkalloc::AllocError>(())
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::chunk::Chunk;
use super::config::AllocatorConfig;
use super::container::ChunkContainer;
use super::defrag::{self, Relocation};
use super::provider::ChunkProvider;
use super::region::{Allocation, AllocationHandle, FreeRange, MemoryId, MemoryLocation, Payload};
use super::stats::{AllocatorSnapshot, ChunkSnapshot, MemoryStats};
use super::strategy::FitStrategy;
use crate::error::{AllocError, AllocResult};
use crate::{internal_error, invalid_handle};

/// Handle ids are unique process-wide, so a handle from another allocator
/// never aliases a live one here
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Where a live allocation currently sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    memory: MemoryId,
    offset: u64,
    size: u64,
}

/// Position of an allocation inside the container
#[derive(Debug, Clone, Copy)]
struct Resolved {
    chunk: usize,
    entry: usize,
    placement: Placement,
}

#[derive(Debug, Default)]
struct AllocatorState {
    chunks: ChunkContainer,
    placements: HashMap<AllocationHandle, Placement>,
}

impl AllocatorState {
    fn resolve(&self, handle: AllocationHandle) -> AllocResult<Resolved> {
        let placement = *self.placements.get(&handle).ok_or_else(|| {
            tracing::error!("{} is not a live allocation of this allocator", handle);
            invalid_handle!("{} is not a live allocation of this allocator", handle)
        })?;

        let chunk = self.chunks.position_of(placement.memory).ok_or_else(|| {
            internal_error!("{} placed in unknown chunk {}", handle, placement.memory)
        })?;
        let entry = self
            .chunks
            .get(chunk)
            .and_then(|c| c.find_allocation(placement.offset))
            .ok_or_else(|| {
                internal_error!(
                    "{} missing from allocation list of {} at offset {}",
                    handle,
                    placement.memory,
                    placement.offset
                )
            })?;

        Ok(Resolved {
            chunk,
            entry,
            placement,
        })
    }

    fn chunk_mut(&mut self, index: usize) -> AllocResult<&mut Chunk> {
        self.chunks
            .get_mut(index)
            .ok_or_else(|| internal_error!("chunk index {} out of range", index))
    }

    fn entry_mut(&mut self, resolved: Resolved) -> AllocResult<&mut Allocation> {
        self.chunk_mut(resolved.chunk)?
            .allocations
            .get_mut(resolved.entry)
            .ok_or_else(|| internal_error!("allocation index {} out of range", resolved.entry))
    }

    fn location(&self, resolved: Resolved) -> AllocResult<MemoryLocation> {
        let chunk = self
            .chunks
            .get(resolved.chunk)
            .ok_or_else(|| internal_error!("chunk index {} out of range", resolved.chunk))?;
        Ok(MemoryLocation {
            memory: resolved.placement.memory,
            buffer: chunk.buffer(),
            offset: resolved.placement.offset,
            size: resolved.placement.size,
        })
    }
}

/// Thread-safe chunk-based sub-allocator
pub struct ChunkAllocator {
    state: Mutex<AllocatorState>,
    provider: Arc<dyn ChunkProvider>,
    strategy: Arc<dyn FitStrategy>,
    config: AllocatorConfig,
}

impl std::fmt::Debug for ChunkAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkAllocator")
            .field("strategy", &self.strategy.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChunkAllocator {
    /// Create an allocator, pre-warming `config.prewarm_chunks` chunks
    pub fn new(
        provider: Arc<dyn ChunkProvider>,
        strategy: Arc<dyn FitStrategy>,
        config: AllocatorConfig,
    ) -> AllocResult<Self> {
        config.validate()?;

        let allocator = ChunkAllocator {
            state: Mutex::new(AllocatorState::default()),
            provider,
            strategy,
            config,
        };

        {
            let mut state = allocator.lock()?;
            for _ in 0..allocator.config.prewarm_chunks {
                allocator.grow(&mut state, allocator.config.chunk_size)?;
            }
        }

        tracing::debug!(
            "ChunkAllocator created: strategy={}, chunk_size={}, allocate_size={}, prewarmed={}",
            allocator.strategy.name(),
            allocator.config.chunk_size,
            allocator.config.allocate_size,
            allocator.config.prewarm_chunks
        );
        Ok(allocator)
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    fn lock(&self) -> AllocResult<MutexGuard<'_, AllocatorState>> {
        Ok(self.state.lock()?)
    }

    /// Lock for read-only diagnostics, tolerating a poisoned lock
    fn lock_for_stats(&self) -> MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("ChunkAllocator: reading stats through a poisoned lock");
            poisoned.into_inner()
        })
    }

    /// Allocate `size` bytes, growing by one chunk if nothing fits
    pub fn allocate(&self, size: u64) -> AllocResult<AllocationHandle> {
        let mut state = self.lock()?;
        self.allocate_locked(&mut state, size, false)
    }

    /// Allocate `size` bytes that compaction must never relocate
    pub fn allocate_static(&self, size: u64) -> AllocResult<AllocationHandle> {
        let mut state = self.lock()?;
        self.allocate_locked(&mut state, size, true)
    }

    fn allocate_locked(
        &self,
        state: &mut AllocatorState,
        size: u64,
        is_static: bool,
    ) -> AllocResult<AllocationHandle> {
        if size == 0 {
            return Err(AllocError::SizeZero);
        }

        let (chunk_idx, free_idx) = match self.strategy.find_range(state.chunks.as_slice(), size) {
            Some(fit) => (fit.chunk, fit.free),
            None => (self.grow(state, size)?, 0),
        };

        let handle = self.next_handle();
        self.carve_into(state, chunk_idx, free_idx, size, handle, is_static)?;
        Ok(handle)
    }

    fn carve_into(
        &self,
        state: &mut AllocatorState,
        chunk_idx: usize,
        free_idx: usize,
        size: u64,
        handle: AllocationHandle,
        is_static: bool,
    ) -> AllocResult<()> {
        let chunk = state.chunk_mut(chunk_idx)?;
        let offset = chunk.carve(free_idx, size, handle, is_static)?;
        let memory = chunk.memory();

        state.placements.insert(
            handle,
            Placement {
                memory,
                offset,
                size,
            },
        );

        tracing::trace!(
            "Allocated {} bytes as {} in chunk/offset [{}/{}]",
            size,
            handle,
            chunk_idx,
            offset
        );
        Ok(())
    }

    fn next_handle(&self) -> AllocationHandle {
        AllocationHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Append a chunk sized for `request`; returns its index
    fn grow(&self, state: &mut AllocatorState, request: u64) -> AllocResult<usize> {
        let size = self.config.allocate_size.max(request);
        let handle = self.provider.create_chunk(size).map_err(|err| {
            tracing::warn!("ChunkAllocator: growth by {} bytes failed: {}", size, err);
            err
        })?;

        if handle.size() < size {
            let short = handle.size();
            self.provider.destroy_chunk(handle);
            return Err(internal_error!(
                "provider returned {} bytes for a {} byte chunk",
                short,
                size
            ));
        }

        let memory = handle.memory();
        let index = state.chunks.push(Chunk::new(handle));
        tracing::debug!(
            "ChunkAllocator: created chunk {} ({}, {} bytes)",
            index,
            memory,
            size
        );
        Ok(index)
    }

    /// Free an allocation and reclaim trailing empty chunks.
    ///
    /// Any payload attached to the region is dropped.
    pub fn deallocate(&self, handle: AllocationHandle) -> AllocResult<()> {
        let mut state = self.lock()?;
        let released = self.deallocate_locked(&mut state, handle)?;
        drop(state);
        drop(released);
        Ok(())
    }

    fn deallocate_locked(
        &self,
        state: &mut AllocatorState,
        handle: AllocationHandle,
    ) -> AllocResult<Allocation> {
        let resolved = state.resolve(handle)?;
        let released = state.chunk_mut(resolved.chunk)?.release(resolved.entry);
        state.placements.remove(&handle);

        tracing::trace!(
            "Deallocating {} bytes of {} in chunk/offset [{}/{}]",
            released.size,
            handle,
            resolved.chunk,
            released.offset
        );

        self.reclaim_tail(state);
        Ok(released)
    }

    fn reclaim_tail(&self, state: &mut AllocatorState) {
        for chunk in state.chunks.trim_tail(self.config.tail_reclaim) {
            tracing::debug!(
                "ChunkAllocator: releasing empty tail chunk {} ({} bytes)",
                chunk.memory(),
                chunk.size()
            );
            self.provider.destroy_chunk(chunk);
        }
    }

    /// Exchange the physical placements of two live allocations of equal size.
    ///
    /// Only bookkeeping changes: the caller copies the bytes. Payloads are
    /// bound to the physical region and therefore change hands too, while the
    /// static flag stays with the logical allocation.
    pub fn swap(&self, target: AllocationHandle, source: AllocationHandle) -> AllocResult<()> {
        let mut state = self.lock()?;
        self.swap_locked(&mut state, target, source)
    }

    fn swap_locked(
        &self,
        state: &mut AllocatorState,
        target: AllocationHandle,
        source: AllocationHandle,
    ) -> AllocResult<()> {
        let t = state.resolve(target)?;
        let s = state.resolve(source)?;
        if target == source {
            return Ok(());
        }
        if t.placement.size != s.placement.size {
            tracing::error!(
                "swap of {} ({} bytes) with {} ({} bytes) rejected",
                target,
                t.placement.size,
                source,
                s.placement.size
            );
            return Err(AllocError::InvalidArgument(format!(
                "cannot swap {} ({} bytes) with {} ({} bytes)",
                target, t.placement.size, source, s.placement.size
            )));
        }

        let target_static = state.entry_mut(t)?.is_static;
        let source_static = state.entry_mut(s)?.is_static;

        let entry = state.entry_mut(t)?;
        entry.handle = source;
        entry.is_static = source_static;

        let entry = state.entry_mut(s)?;
        entry.handle = target;
        entry.is_static = target_static;

        state.placements.insert(target, s.placement);
        state.placements.insert(source, t.placement);

        tracing::trace!(
            "Swapped {} -> [{}/{}] and {} -> [{}/{}]",
            target,
            s.placement.memory,
            s.placement.offset,
            source,
            t.placement.memory,
            t.placement.offset
        );
        Ok(())
    }

    /// Claim `size` bytes at the start of a specific free span.
    ///
    /// `free_range` must be an exact, current free-list entry of the chunk
    /// backed by `memory`.
    pub fn reserve(
        &self,
        memory: MemoryId,
        free_range: FreeRange,
        size: u64,
    ) -> AllocResult<AllocationHandle> {
        let mut state = self.lock()?;
        self.reserve_locked(&mut state, memory, free_range, size)
    }

    fn reserve_locked(
        &self,
        state: &mut AllocatorState,
        memory: MemoryId,
        free_range: FreeRange,
        size: u64,
    ) -> AllocResult<AllocationHandle> {
        if size == 0 {
            return Err(AllocError::SizeZero);
        }

        let chunk_idx = state.chunks.position_of(memory).ok_or_else(|| {
            tracing::error!("reserve in {} which this allocator does not own", memory);
            invalid_handle!("chunk {} not owned by this allocator", memory)
        })?;

        let free_idx = state
            .chunks
            .get(chunk_idx)
            .and_then(|c| c.find_free(&free_range))
            .ok_or_else(|| {
                tracing::error!("reserve of {:?} in {}: not a free span", free_range, memory);
                AllocError::InvalidArgument(format!(
                    "{:?} is not a free span of {}",
                    free_range, memory
                ))
            })?;

        if size > free_range.size {
            return Err(AllocError::InvalidArgument(format!(
                "cannot reserve {} bytes in a {} byte free span",
                size, free_range.size
            )));
        }

        let handle = self.next_handle();
        self.carve_into(state, chunk_idx, free_idx, size, handle, false)?;
        Ok(handle)
    }

    /// Is `free_range` exactly a free-list entry of the chunk backed by `memory`
    pub fn memory_is_free(&self, memory: MemoryId, free_range: FreeRange) -> AllocResult<bool> {
        let state = self.lock()?;
        let chunk_idx = state
            .chunks
            .position_of(memory)
            .ok_or_else(|| invalid_handle!("chunk {} not owned by this allocator", memory))?;
        Ok(state
            .chunks
            .get(chunk_idx)
            .is_some_and(|c| c.find_free(&free_range).is_some()))
    }

    /// Current physical placement of `handle`
    pub fn location(&self, handle: AllocationHandle) -> AllocResult<MemoryLocation> {
        let state = self.lock()?;
        let resolved = state.resolve(handle)?;
        state.location(resolved)
    }

    /// Attach a payload to the region, returning the previous one
    pub fn set_payload(
        &self,
        handle: AllocationHandle,
        payload: Payload,
    ) -> AllocResult<Option<Payload>> {
        let mut state = self.lock()?;
        let resolved = state.resolve(handle)?;
        Ok(state.entry_mut(resolved)?.payload.replace(payload))
    }

    /// Detach and return the region's payload
    pub fn take_payload(&self, handle: AllocationHandle) -> AllocResult<Option<Payload>> {
        let mut state = self.lock()?;
        let resolved = state.resolve(handle)?;
        Ok(state.entry_mut(resolved)?.payload.take())
    }

    /// Run `f` on the region's payload while holding the allocator lock
    pub fn with_payload<R>(
        &self,
        handle: AllocationHandle,
        f: impl FnOnce(Option<&mut Payload>) -> R,
    ) -> AllocResult<R> {
        let mut state = self.lock()?;
        let resolved = state.resolve(handle)?;
        Ok(f(state.entry_mut(resolved)?.payload.as_mut()))
    }

    /// Upload exactly the region's bytes
    pub fn write(&self, handle: AllocationHandle, data: &[u8]) -> AllocResult<()> {
        let state = self.lock()?;
        let resolved = state.resolve(handle)?;
        check_transfer_len(resolved.placement.size, data.len())?;
        let chunk = state
            .chunks
            .get(resolved.chunk)
            .ok_or_else(|| internal_error!("chunk index {} out of range", resolved.chunk))?;
        self.provider
            .upload(chunk.handle(), resolved.placement.offset, data)
    }

    /// Download exactly the region's bytes
    pub fn read(&self, handle: AllocationHandle, out: &mut [u8]) -> AllocResult<()> {
        let state = self.lock()?;
        let resolved = state.resolve(handle)?;
        check_transfer_len(resolved.placement.size, out.len())?;
        let chunk = state
            .chunks
            .get(resolved.chunk)
            .ok_or_else(|| internal_error!("chunk index {} out of range", resolved.chunk))?;
        self.provider
            .download(chunk.handle(), resolved.placement.offset, out)
    }

    /// Aggregate statistics over all chunks
    pub fn collect_stats(&self) -> MemoryStats {
        let state = self.lock_for_stats();
        MemoryStats::collect(state.chunks.iter())
    }

    /// Detached copy of the full layout for diagnostics
    pub fn snapshot(&self) -> AllocatorSnapshot {
        let state = self.lock_for_stats();
        AllocatorSnapshot {
            chunk_size: self.config.chunk_size,
            strategy: self.strategy.name().to_string(),
            stats: MemoryStats::collect(state.chunks.iter()),
            chunks: state
                .chunks
                .iter()
                .enumerate()
                .map(|(i, c)| ChunkSnapshot::of(i, c))
                .collect(),
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.lock_for_stats().chunks.len()
    }

    pub fn allocation_count(&self) -> usize {
        self.lock_for_stats().placements.len()
    }

    /// Perform one compaction move, if any allocation can move to an
    /// earlier free span.
    ///
    /// The bytes are copied through the provider before the swap, so
    /// callers must not have transfers to the moved region in flight.
    pub fn defragment_step(&self) -> AllocResult<Option<Relocation>> {
        let mut state = self.lock()?;
        let Some(plan) = defrag::plan_move(state.chunks.as_slice()) else {
            return Ok(None);
        };

        let source = state.resolve(plan.handle)?;
        let from = state.location(source)?;
        let target_memory = state
            .chunks
            .get(plan.target_chunk)
            .map(|c| c.memory())
            .ok_or_else(|| internal_error!("chunk index {} out of range", plan.target_chunk))?;

        let temp = self.reserve_locked(&mut state, target_memory, plan.target, from.size)?;
        let staged = state.resolve(temp)?;

        let copied = match (state.chunks.get(plan.source_chunk), state.chunks.get(staged.chunk)) {
            (Some(src), Some(dst)) => self.provider.copy(
                src.handle(),
                from.offset,
                dst.handle(),
                staged.placement.offset,
                from.size,
            ),
            _ => Err(internal_error!("compaction lost track of its chunks")),
        };
        if let Err(err) = copied {
            self.deallocate_locked(&mut state, temp)?;
            return Err(err);
        }

        self.swap_locked(&mut state, temp, plan.handle)?;

        // the bytes moved, so the payload moves with them
        let old = state.resolve(temp)?;
        let payload = state.entry_mut(old)?.payload.take();
        let moved = state.resolve(plan.handle)?;
        state.entry_mut(moved)?.payload = payload;
        let to = state.location(moved)?;

        self.deallocate_locked(&mut state, temp)?;

        tracing::debug!(
            "Compaction moved {} from [{}/{}] to [{}/{}]",
            plan.handle,
            from.memory,
            from.offset,
            to.memory,
            to.offset
        );
        Ok(Some(Relocation {
            handle: plan.handle,
            from,
            to,
        }))
    }

    /// Run up to `max_moves` compaction steps, stopping early once the
    /// layout is compact
    pub fn defragment(&self, max_moves: usize) -> AllocResult<Vec<Relocation>> {
        let span = tracing::debug_span!("defragment", max_moves);
        let _enter = span.enter();

        let mut moves = Vec::new();
        while moves.len() < max_moves {
            match self.defragment_step()? {
                Some(relocation) => moves.push(relocation),
                None => break,
            }
        }
        Ok(moves)
    }

    /// Return every chunk to the provider, live allocations included.
    ///
    /// Outstanding handles become invalid. The allocator stays usable and
    /// grows again on the next allocation.
    pub fn destroy(&self) -> AllocResult<()> {
        let mut state = self.lock()?;
        self.release_all(&mut state);
        Ok(())
    }

    fn release_all(&self, state: &mut AllocatorState) {
        let live = state.placements.len();
        state.placements.clear();
        let chunks = state.chunks.drain_all();
        if !chunks.is_empty() {
            tracing::debug!(
                "ChunkAllocator: releasing {} chunks ({} live allocations)",
                chunks.len(),
                live
            );
        }
        for chunk in chunks {
            self.provider.destroy_chunk(chunk);
        }
    }

    /// Check every chunk and the handle table against each other
    pub fn check_invariants(&self) -> AllocResult<()> {
        let state = self.lock()?;
        let mut entries = 0usize;
        for (index, chunk) in state.chunks.iter().enumerate() {
            chunk
                .check_invariants()
                .map_err(|msg| internal_error!("chunk {}: {}", index, msg))?;
            for alloc in &chunk.allocations {
                entries += 1;
                let expected = Placement {
                    memory: chunk.memory(),
                    offset: alloc.offset,
                    size: alloc.size,
                };
                if state.placements.get(&alloc.handle) != Some(&expected) {
                    return Err(internal_error!(
                        "{} recorded at {:?}, found at {:?}",
                        alloc.handle,
                        state.placements.get(&alloc.handle),
                        expected
                    ));
                }
            }
        }
        if entries != state.placements.len() {
            return Err(internal_error!(
                "{} handles tracked, {} allocation entries",
                state.placements.len(),
                entries
            ));
        }
        Ok(())
    }
}

impl Drop for ChunkAllocator {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let live = state.placements.len();
        state.placements.clear();
        let chunks = state.chunks.drain_all();
        if live > 0 {
            tracing::debug!("ChunkAllocator dropped with {} live allocations", live);
        }
        for chunk in chunks {
            self.provider.destroy_chunk(chunk);
        }
    }
}

fn check_transfer_len(expected: u64, actual: usize) -> AllocResult<()> {
    if expected != actual as u64 {
        return Err(AllocError::SizeMismatch {
            expected,
            actual: actual as u64,
        });
    }
    Ok(())
}
