//! Statistics and read-only introspection
//!
//! [`MemoryStats`] is the aggregate used to decide when compaction is worth
//! running. [`AllocatorSnapshot`] is a full copy of the layout for
//! diagnostic tooling; it is detached from the allocator and never a
//! mutation path.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::chunk::Chunk;
use super::region::{AllocationHandle, BufferId, FreeRange, MemoryId};

/// Aggregate memory statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Sum of chunk capacities
    pub total_bytes: u64,
    /// Sum of allocated bytes
    pub used_bytes: u64,
    /// Free bytes outside each chunk's largest free span
    pub fragmented_free_bytes: u64,
    /// All free bytes, largest spans included
    pub total_free_bytes: u64,
    pub allocation_count: usize,
    pub chunk_count: usize,
}

impl MemoryStats {
    pub(crate) fn collect<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> Self {
        let mut stats = MemoryStats::default();
        for chunk in chunks {
            stats.chunk_count += 1;
            stats.total_bytes += chunk.capacity();
            stats.used_bytes += chunk.allocated_bytes();
            stats.total_free_bytes += chunk.free_bytes();
            stats.fragmented_free_bytes += chunk.fragmented_free_bytes();
            stats.allocation_count += chunk.allocation_count();
        }
        stats
    }

    /// Share of free memory that is fragmented (0.0 = none)
    pub fn fragmentation_ratio(&self) -> f64 {
        if self.total_free_bytes == 0 {
            return 0.0;
        }
        self.fragmented_free_bytes as f64 / self.total_free_bytes as f64
    }

    /// Used share of total memory in percent
    pub fn usage_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        100.0 * self.used_bytes as f64 / self.total_bytes as f64
    }
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MemoryStats: {} / {} used ({:.2}%), free {} total / {} fragmented, {} allocations in {} chunks",
            format_bytes(self.used_bytes),
            format_bytes(self.total_bytes),
            self.usage_percent(),
            format_bytes(self.total_free_bytes),
            format_bytes(self.fragmented_free_bytes),
            self.allocation_count,
            self.chunk_count
        )
    }
}

/// One allocation as seen by diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    pub handle: AllocationHandle,
    pub offset: u64,
    pub size: u64,
    pub is_static: bool,
}

/// One chunk as seen by diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSnapshot {
    pub index: usize,
    pub memory: MemoryId,
    pub buffer: BufferId,
    pub capacity: u64,
    pub allocated_bytes: u64,
    pub allocations: Vec<RegionSnapshot>,
    pub free_ranges: Vec<FreeRange>,
    pub max_free_range: Option<FreeRange>,
}

impl ChunkSnapshot {
    pub(crate) fn of(index: usize, chunk: &Chunk) -> Self {
        ChunkSnapshot {
            index,
            memory: chunk.memory(),
            buffer: chunk.buffer(),
            capacity: chunk.capacity(),
            allocated_bytes: chunk.allocated_bytes(),
            allocations: chunk
                .allocations
                .iter()
                .map(|a| RegionSnapshot {
                    handle: a.handle,
                    offset: a.offset,
                    size: a.size,
                    is_static: a.is_static,
                })
                .collect(),
            free_ranges: chunk.free_ranges().to_vec(),
            max_free_range: chunk.max_free_range(),
        }
    }

    pub fn free_bytes(&self) -> u64 {
        self.capacity - self.allocated_bytes
    }
}

/// Detached copy of the whole allocator layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorSnapshot {
    pub chunk_size: u64,
    pub strategy: String,
    pub stats: MemoryStats,
    pub chunks: Vec<ChunkSnapshot>,
}

impl AllocatorSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for AllocatorSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Chunk allocator ({}, chunk size {})",
            self.strategy,
            format_bytes(self.chunk_size)
        )?;
        for chunk in &self.chunks {
            writeln!(
                f,
                "  Chunk {} ({} free, {} allocated) {} buffer#{}",
                chunk.index + 1,
                format_bytes(chunk.free_bytes()),
                format_bytes(chunk.allocated_bytes),
                chunk.memory,
                chunk.buffer.0
            )?;
            for alloc in &chunk.allocations {
                writeln!(
                    f,
                    "    [{:>10} .. {:>10}) {}{}",
                    alloc.offset,
                    alloc.offset + alloc.size,
                    alloc.handle,
                    if alloc.is_static { " static" } else { "" }
                )?;
            }
        }
        write!(f, "  {}", self.stats)
    }
}

/// Format bytes as human readable (B, KB, MB, GB)
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
