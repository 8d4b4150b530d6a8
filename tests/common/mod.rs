//! Common test utilities for allocator integration tests
//!
//! Every fixture is backed by a [`HostChunkProvider`], so tests can check
//! that no chunk outlives the allocator that created it.
//!
//! # Usage
//!
//! ```ignore
//! mod common;
//! use common::Fixture;
//!
//! #[test]
//! fn my_test() {
//!     let fixture = Fixture::first_fit(1024);
//!     let h = fixture.allocator.allocate(100).unwrap();
//!     fixture.assert_consistent();
//!     fixture.allocator.deallocate(h).unwrap();
//!     fixture.assert_no_leak();
//! }
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use chunkalloc::memory::{
    AllocatorConfig, BestFit, ChunkAllocator, FirstFit, FitStrategy, HostChunkProvider,
    TailReclaim, WorstFit,
};

pub use serial_test::serial;

pub struct Fixture {
    pub provider: Arc<HostChunkProvider>,
    pub allocator: ChunkAllocator,
}

impl Fixture {
    pub fn new(strategy: Arc<dyn FitStrategy>, config: AllocatorConfig) -> Self {
        let provider = Arc::new(HostChunkProvider::new());
        let allocator = ChunkAllocator::new(provider.clone(), strategy, config)
            .expect("Failed to create allocator");
        Self {
            provider,
            allocator,
        }
    }

    pub fn first_fit(chunk_size: u64) -> Self {
        Self::new(
            Arc::new(FirstFit),
            AllocatorConfig::new().with_chunk_size(chunk_size),
        )
    }

    pub fn best_fit(chunk_size: u64) -> Self {
        Self::new(
            Arc::new(BestFit),
            AllocatorConfig::new().with_chunk_size(chunk_size),
        )
    }

    pub fn release_all(chunk_size: u64) -> Self {
        Self::new(
            Arc::new(FirstFit),
            AllocatorConfig::new()
                .with_chunk_size(chunk_size)
                .with_tail_reclaim(TailReclaim::ReleaseAll),
        )
    }

    /// Check chunk invariants, handle bookkeeping and byte conservation
    ///
    /// # Panics
    ///
    /// Panics if any check fails
    pub fn assert_consistent(&self) {
        if let Err(e) = self.allocator.check_invariants() {
            panic!("allocator invariants violated: {}", e);
        }

        let stats = self.allocator.collect_stats();
        assert_eq!(
            stats.used_bytes + stats.total_free_bytes,
            stats.total_bytes,
            "used + free must equal total ({})",
            stats
        );
        assert!(stats.fragmented_free_bytes <= stats.total_free_bytes);
        assert_eq!(stats.total_bytes, self.provider.reserved_bytes());
        assert_eq!(stats.chunk_count, self.provider.live_chunks());
    }

    /// Every chunk the provider handed out has been returned
    pub fn assert_no_leak(&self) {
        assert_eq!(
            self.provider.live_chunks(),
            0,
            "{} chunks still live ({} created, {} destroyed)",
            self.provider.live_chunks(),
            self.provider.created_count(),
            self.provider.destroyed_count()
        );
    }
}

/// All built-in strategies, for tests that must hold under each of them
pub fn all_strategies() -> Vec<Arc<dyn FitStrategy>> {
    vec![Arc::new(FirstFit), Arc::new(BestFit), Arc::new(WorstFit)]
}
