//! Chunk-based device memory sub-allocation
//!
//! Creating device buffers one per tensor is slow and some drivers become
//! unstable after a few hundred of them. Instead, memory is obtained from a
//! [`ChunkProvider`] in large chunks and subdivided here.
//!
//! # Layout
//!
//! 1. [`ChunkAllocator`] owns an ordered [`ChunkContainer`] of [`Chunk`]s
//! 2. Each chunk keeps a sorted allocation list and a coalesced free list
//! 3. A [`FitStrategy`] (first, best or worst fit) chooses where requests go
//! 4. Empty chunks at the tail are handed back per [`TailReclaim`]
//! 5. Compaction swaps live allocations into earlier holes

pub mod allocator;
pub mod chunk;
pub mod config;
pub mod container;
pub mod defrag;
pub mod provider;
pub mod region;
pub mod stats;
pub mod strategy;

pub use allocator::ChunkAllocator;
pub use chunk::Chunk;
pub use config::{AllocatorConfig, TailReclaim, DEFAULT_CHUNK_SIZE};
pub use container::ChunkContainer;
pub use defrag::Relocation;
pub use provider::{ChunkHandle, ChunkProvider, HostChunkProvider};
pub use region::{AllocationHandle, BufferId, FreeRange, MemoryId, MemoryLocation, Payload};
pub use stats::{format_bytes, AllocatorSnapshot, ChunkSnapshot, MemoryStats, RegionSnapshot};
pub use strategy::{BestFit, Fit, FirstFit, FitStrategy, WorstFit};
