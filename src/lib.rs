//! chunkalloc - chunk-based device memory sub-allocator
//!
//! Hands out variably sized regions carved from a small number of large
//! device chunks, coalesces freed space, returns empty tail chunks to the
//! device and can compact live allocations by swapping them into earlier
//! free spans.

pub mod error;
pub mod logging;
pub mod memory;

pub use error::{AllocError, AllocResult, ErrorCategory};
pub use memory::{
    AllocationHandle, AllocatorConfig, AllocatorSnapshot, BestFit, ChunkAllocator, ChunkProvider,
    FirstFit, FitStrategy, FreeRange, HostChunkProvider, MemoryId, MemoryLocation, MemoryStats,
    Relocation, TailReclaim, WorstFit,
};

#[cfg(test)]
mod library_tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_library_imports() {
        let allocator = ChunkAllocator::new(
            Arc::new(HostChunkProvider::new()),
            Arc::new(BestFit),
            AllocatorConfig::new().with_chunk_size(4096),
        )
        .unwrap();
        assert_eq!(allocator.strategy_name(), "best-fit");
    }
}
