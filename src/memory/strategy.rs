//! Placement policies
//!
//! A [`FitStrategy`] picks the chunk and free span that should satisfy a
//! request. Strategies are pure: they read the chunk list and never mutate
//! it. Returning `None` tells the allocator to grow.
//!
//! Ties are broken by lowest chunk index, then lowest offset, so the same
//! layout always yields the same choice.

use super::chunk::Chunk;

/// Chosen placement: indices into the chunk list and that chunk's free list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fit {
    pub chunk: usize,
    pub free: usize,
}

pub trait FitStrategy: Send + Sync {
    /// Find a free span of at least `size` bytes
    fn find_range(&self, chunks: &[Chunk], size: u64) -> Option<Fit>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Chunks whose largest free span can hold `size`
fn candidates(chunks: &[Chunk], size: u64) -> impl Iterator<Item = (usize, &Chunk)> {
    chunks.iter().enumerate().filter(move |(_, c)| c.fits(size))
}

/// First free span, in chunk order then offset order, that is large enough
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFit;

impl FitStrategy for FirstFit {
    fn find_range(&self, chunks: &[Chunk], size: u64) -> Option<Fit> {
        candidates(chunks, size).find_map(|(chunk, c)| {
            c.free_ranges()
                .iter()
                .position(|f| f.size >= size)
                .map(|free| Fit { chunk, free })
        })
    }

    fn name(&self) -> &'static str {
        "first-fit"
    }
}

/// Smallest free span that is large enough, across all chunks
#[derive(Debug, Clone, Copy, Default)]
pub struct BestFit;

impl FitStrategy for BestFit {
    fn find_range(&self, chunks: &[Chunk], size: u64) -> Option<Fit> {
        let mut best: Option<(u64, Fit)> = None;
        for (chunk, c) in candidates(chunks, size) {
            for (free, range) in c.free_ranges().iter().enumerate() {
                if range.size < size {
                    continue;
                }
                if best.map_or(true, |(best_size, _)| range.size < best_size) {
                    best = Some((range.size, Fit { chunk, free }));
                    if range.size == size {
                        return Some(Fit { chunk, free });
                    }
                }
            }
        }
        best.map(|(_, fit)| fit)
    }

    fn name(&self) -> &'static str {
        "best-fit"
    }
}

/// Largest free span of any chunk, keeping leftovers big
#[derive(Debug, Clone, Copy, Default)]
pub struct WorstFit;

impl FitStrategy for WorstFit {
    fn find_range(&self, chunks: &[Chunk], size: u64) -> Option<Fit> {
        let mut best: Option<(u64, Fit)> = None;
        for (chunk, c) in candidates(chunks, size) {
            let Some(max) = c.max_free_range() else { continue };
            if best.map_or(true, |(best_size, _)| max.size > best_size) {
                let Some(free) = c.find_free(&max) else { continue };
                best = Some((max.size, Fit { chunk, free }));
            }
        }
        best.map(|(_, fit)| fit)
    }

    fn name(&self) -> &'static str {
        "worst-fit"
    }
}
