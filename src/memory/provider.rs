//! Chunk provider: the low-level source of device memory chunks
//!
//! The allocator never creates raw memory itself. It asks a [`ChunkProvider`]
//! for whole chunks and hands them back when they are trimmed. The provider
//! also performs byte transfers once a region's placement is known.
//!
//! [`HostChunkProvider`] backs chunks with host memory. It is what tests and
//! benchmarks use, and it doubles as a staging provider on systems without a
//! device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::region::{BufferId, MemoryId};
use crate::error::{AllocError, AllocResult};

/// Raw chunk obtained from a provider.
///
/// Deliberately not `Clone`: the chunk record owns it exclusively and gives
/// it back through [`ChunkProvider::destroy_chunk`].
#[derive(Debug, PartialEq, Eq)]
pub struct ChunkHandle {
    memory: MemoryId,
    buffer: BufferId,
    size: u64,
}

impl ChunkHandle {
    pub fn new(memory: MemoryId, buffer: BufferId, size: u64) -> Self {
        Self {
            memory,
            buffer,
            size,
        }
    }

    pub fn memory(&self) -> MemoryId {
        self.memory
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Source of fixed-size memory chunks.
///
/// Called with the allocator lock held, so implementations must not block
/// indefinitely.
pub trait ChunkProvider: Send + Sync {
    /// Obtain a chunk of exactly `size` bytes, or `ProviderExhausted`
    fn create_chunk(&self, size: u64) -> AllocResult<ChunkHandle>;

    /// Release a chunk previously returned by `create_chunk`
    fn destroy_chunk(&self, chunk: ChunkHandle);

    /// Copy `data` into the chunk at `offset`
    fn upload(&self, chunk: &ChunkHandle, offset: u64, data: &[u8]) -> AllocResult<()>;

    /// Copy bytes starting at `offset` into `out`
    fn download(&self, chunk: &ChunkHandle, offset: u64, out: &mut [u8]) -> AllocResult<()>;

    /// Device-side copy between two regions, used by compaction.
    ///
    /// The default stages through host memory; device providers should
    /// override it with a queue transfer.
    fn copy(
        &self,
        src: &ChunkHandle,
        src_offset: u64,
        dst: &ChunkHandle,
        dst_offset: u64,
        size: u64,
    ) -> AllocResult<()> {
        let mut staging = vec![0u8; size as usize];
        self.download(src, src_offset, &mut staging)?;
        self.upload(dst, dst_offset, &staging)
    }
}

#[derive(Debug, Default)]
struct HostState {
    chunks: HashMap<MemoryId, Vec<u8>>,
    reserved_bytes: u64,
}

/// Chunk provider backed by zero-initialized host memory
#[derive(Debug)]
pub struct HostChunkProvider {
    state: Mutex<HostState>,
    /// Upper bound on bytes held by live chunks (None = unbounded)
    budget: Option<u64>,
    next_id: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl Default for HostChunkProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl HostChunkProvider {
    /// Create an unbounded host provider
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState::default()),
            budget: None,
            next_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        }
    }

    /// Create a provider that refuses to hold more than `budget` bytes
    pub fn with_budget(budget: u64) -> Self {
        Self {
            budget: Some(budget),
            ..Self::new()
        }
    }

    /// Number of chunks currently handed out
    pub fn live_chunks(&self) -> usize {
        self.state.lock().map(|s| s.chunks.len()).unwrap_or(0)
    }

    /// Bytes held by live chunks
    pub fn reserved_bytes(&self) -> u64 {
        self.state.lock().map(|s| s.reserved_bytes).unwrap_or(0)
    }

    /// Total chunks ever created
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Total chunks returned
    pub fn destroyed_count(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }

    fn check_bounds(chunk: &ChunkHandle, offset: u64, len: usize) -> AllocResult<()> {
        let end = offset.checked_add(len as u64);
        match end {
            Some(end) if end <= chunk.size => Ok(()),
            _ => Err(AllocError::InvalidArgument(format!(
                "transfer [{}, +{}) outside chunk {} of {} bytes",
                offset, len, chunk.memory, chunk.size
            ))),
        }
    }
}

impl ChunkProvider for HostChunkProvider {
    fn create_chunk(&self, size: u64) -> AllocResult<ChunkHandle> {
        let mut state = self.state.lock()?;

        if let Some(budget) = self.budget {
            let over = state
                .reserved_bytes
                .checked_add(size)
                .map_or(true, |total| total > budget);
            if over {
                tracing::warn!(
                    "HostChunkProvider: budget exhausted ({} + {} > {} bytes)",
                    state.reserved_bytes,
                    size,
                    budget
                );
                return Err(AllocError::ProviderExhausted(format!(
                    "host budget of {} bytes exceeded by request for {} bytes ({} in use)",
                    budget, size, state.reserved_bytes
                )));
            }
        }

        let len = usize::try_from(size).map_err(|_| {
            AllocError::ProviderExhausted(format!("chunk of {} bytes not addressable", size))
        })?;

        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).map_err(|err| {
            tracing::warn!("HostChunkProvider: host refused {} bytes: {}", size, err);
            AllocError::ProviderExhausted(format!(
                "host could not back a chunk of {} bytes: {}",
                size, err
            ))
        })?;
        bytes.resize(len, 0);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let memory = MemoryId(id);
        state.chunks.insert(memory, bytes);
        state.reserved_bytes += size;
        self.created.fetch_add(1, Ordering::Relaxed);

        tracing::trace!("HostChunkProvider: created {} ({} bytes)", memory, size);
        Ok(ChunkHandle::new(memory, BufferId(id), size))
    }

    fn destroy_chunk(&self, chunk: ChunkHandle) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.chunks.remove(&chunk.memory).is_some() {
            state.reserved_bytes -= chunk.size;
            self.destroyed.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("HostChunkProvider: destroyed {}", chunk.memory);
        } else {
            tracing::error!(
                "HostChunkProvider: destroy of unknown chunk {}",
                chunk.memory
            );
        }
    }

    fn upload(&self, chunk: &ChunkHandle, offset: u64, data: &[u8]) -> AllocResult<()> {
        Self::check_bounds(chunk, offset, data.len())?;
        let mut state = self.state.lock()?;
        let bytes = state.chunks.get_mut(&chunk.memory).ok_or_else(|| {
            AllocError::InvalidHandle(format!("chunk {} not owned by provider", chunk.memory))
        })?;
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn download(&self, chunk: &ChunkHandle, offset: u64, out: &mut [u8]) -> AllocResult<()> {
        Self::check_bounds(chunk, offset, out.len())?;
        let state = self.state.lock()?;
        let bytes = state.chunks.get(&chunk.memory).ok_or_else(|| {
            AllocError::InvalidHandle(format!("chunk {} not owned by provider", chunk.memory))
        })?;
        let start = offset as usize;
        out.copy_from_slice(&bytes[start..start + out.len()]);
        Ok(())
    }
}
