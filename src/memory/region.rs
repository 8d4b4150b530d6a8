//! Region records: allocated and free byte ranges inside a chunk

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Opaque identity of one chunk's device memory, assigned by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryId(pub u64);

/// Opaque identity of the buffer object bound to a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferId(pub u64);

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mem#{}", self.0)
    }
}

/// Caller-attached value stored with an allocation (a mapped view, a tag, ...)
pub type Payload = Box<dyn Any + Send>;

/// Free span within a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FreeRange {
    /// Byte offset from chunk start
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
}

impl FreeRange {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// One past the last byte of the range
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Check if this range ends exactly where `other` starts
    pub fn is_adjacent_to(&self, other: &FreeRange) -> bool {
        self.end() == other.offset
    }
}

/// Stable identity of a logical allocation.
///
/// Handles survive compaction: a swap changes where an allocation lives,
/// never which handle names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocationHandle(pub(crate) u64);

impl AllocationHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AllocationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alloc#{}", self.0)
    }
}

/// Resolved physical placement of an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLocation {
    pub memory: MemoryId,
    pub buffer: BufferId,
    pub offset: u64,
    pub size: u64,
}

impl MemoryLocation {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Allocated region record, owned by its chunk's allocation list
pub(crate) struct Allocation {
    pub(crate) handle: AllocationHandle,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    /// Static allocations are never picked for relocation
    pub(crate) is_static: bool,
    /// Bound to the physical bytes, so it follows the region across a swap
    pub(crate) payload: Option<Payload>,
}

impl Allocation {
    pub(crate) fn new(handle: AllocationHandle, offset: u64, size: u64, is_static: bool) -> Self {
        Self {
            handle,
            offset,
            size,
            is_static,
            payload: None,
        }
    }

    pub(crate) fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub(crate) fn as_range(&self) -> FreeRange {
        FreeRange::new(self.offset, self.size)
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("handle", &self.handle)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("is_static", &self.is_static)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}
