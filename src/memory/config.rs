//! Allocator configuration

use serde::{Deserialize, Serialize};

use crate::error::{AllocError, AllocResult};

/// Default chunk size: 64 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// What happens to empty chunks at the end of the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailReclaim {
    /// Trim only while the last two chunks are both empty, so one empty
    /// chunk stays around for the next allocation
    #[default]
    KeepLastEmpty,
    /// Trim every trailing empty chunk, down to zero chunks
    ReleaseAll,
}

/// Configuration for [`ChunkAllocator`](super::ChunkAllocator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Nominal chunk size. Sizes the pre-warmed chunks and is reported in
    /// snapshots; `MemoryStats::total_bytes` sums real chunk capacities
    /// instead, which differ from this whenever `allocate_size` does
    pub chunk_size: u64,
    /// Size requested from the provider on growth; a single larger request
    /// gets a chunk sized to fit it instead
    pub allocate_size: u64,
    /// Chunks created eagerly at construction
    pub prewarm_chunks: usize,
    pub tail_reclaim: TailReclaim,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            allocate_size: DEFAULT_CHUNK_SIZE,
            prewarm_chunks: 0,
            tail_reclaim: TailReclaim::KeepLastEmpty,
        }
    }
}

impl AllocatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk size. Also sets `allocate_size`, matching the usual case.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self.allocate_size = chunk_size;
        self
    }

    pub fn with_allocate_size(mut self, allocate_size: u64) -> Self {
        self.allocate_size = allocate_size;
        self
    }

    pub fn with_prewarm_chunks(mut self, prewarm_chunks: usize) -> Self {
        self.prewarm_chunks = prewarm_chunks;
        self
    }

    pub fn with_tail_reclaim(mut self, tail_reclaim: TailReclaim) -> Self {
        self.tail_reclaim = tail_reclaim;
        self
    }

    pub fn validate(&self) -> AllocResult<()> {
        if self.chunk_size == 0 {
            return Err(AllocError::InvalidConfiguration(
                "chunk_size must be non-zero".to_string(),
            ));
        }
        if self.allocate_size == 0 {
            return Err(AllocError::InvalidConfiguration(
                "allocate_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
