//! Simulated program memory.
//!
//! The memory model is a set of [`MemoryBlock`]s owned by one
//! [`MemoryArena`]. A block is one allocation's raw bytes plus a provenance
//! index recording which type last occupied each byte run. Blocks are
//! referenced only by [`BlockHandle`], a stable, process-unique integer that
//! stays meaningful after the block dies, which is what lets a stale pointer
//! be *detected* instead of dereferenced.
//!
//! # Byte layout
//!
//! Unlike real hardware there is no padding or alignment: a value occupies
//! exactly its encoded size and aggregates are concatenations of their
//! members. Type information is not interleaved with the payload bytes; it
//! lives in each block's [`ProvenanceTag`] index.

mod arena;
mod block;
mod tag;

pub use arena::MemoryArena;
pub use block::MemoryBlock;
pub use tag::{ProvenanceTag, TagIndex};

use std::fmt;

/// Handle value that encodes the null pointer.
pub const HANDLE_NULL: u32 = 1;
/// Handle value reserved for unrepresentable pointers.
pub const HANDLE_INVALID: u32 = 2;
/// First handle the arena issues; 0..=2 are never allocated.
pub(crate) const HANDLE_FIRST: u32 = 3;

/// Stable, process-unique identifier for one allocation.
///
/// Handles are issued monotonically and never reused, so a handle held after
/// its block was freed still identifies that dead block for fault reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHandle(u32);

impl BlockHandle {
    pub(crate) fn from_raw(raw: u32) -> Self {
        BlockHandle(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block #{}", self.0)
    }
}

/// Where an allocation came from. A block transitions to `Freed` exactly
/// once; the transition is irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Static,
    Global,
    Stack,
    Heap,
    Extern,
    Freed,
}
