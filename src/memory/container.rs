//! Ordered chunk container
//!
//! Chunks are appended on growth and only ever removed from the end, so a
//! chunk's index stays stable for as long as it is alive.

use super::chunk::Chunk;
use super::config::TailReclaim;
use super::provider::ChunkHandle;
use super::region::MemoryId;

#[derive(Debug, Default)]
pub struct ChunkContainer {
    chunks: Vec<Chunk>,
}

impl ChunkContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn as_slice(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Chunk> {
        self.chunks.get_mut(index)
    }

    /// Append a chunk, returning its index
    pub(crate) fn push(&mut self, chunk: Chunk) -> usize {
        self.chunks.push(chunk);
        self.chunks.len() - 1
    }

    /// Index of the chunk backed by `memory`
    pub fn position_of(&self, memory: MemoryId) -> Option<usize> {
        self.chunks.iter().position(|c| c.memory() == memory)
    }

    /// Drop empty chunks from the tail according to `policy`.
    ///
    /// Returns the handles of removed chunks, last chunk first, for the
    /// caller to give back to the provider.
    pub(crate) fn trim_tail(&mut self, policy: TailReclaim) -> Vec<ChunkHandle> {
        let keep = match policy {
            TailReclaim::KeepLastEmpty => 2,
            TailReclaim::ReleaseAll => 1,
        };

        let mut released = Vec::new();
        while self.chunks.len() >= keep {
            let n = self.chunks.len();
            if !self.chunks[n - keep..].iter().all(Chunk::is_empty) {
                break;
            }
            if let Some(last) = self.chunks.pop() {
                released.push(last.into_handle());
            }
        }
        released
    }

    /// Remove every chunk, live allocations included
    pub(crate) fn drain_all(&mut self) -> Vec<ChunkHandle> {
        self.chunks.drain(..).rev().map(Chunk::into_handle).collect()
    }
}
