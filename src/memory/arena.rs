//! The arena that owns every allocation of a run.

use crate::convert;
use crate::error::{Fault, Result};
use crate::ty::CType;
use crate::value::{Status, Value, ValueKind};
use std::collections::BTreeMap;
use tracing::debug;

use super::block::MemoryBlock;
use super::tag::ProvenanceTag;
use super::{BlockHandle, StorageClass, HANDLE_FIRST};

/// Owner of all [`MemoryBlock`]s and issuer of handles and function ids.
///
/// Handles count up from a small reserved range and are never reused, so the
/// arena keeps freed blocks in its registry: resolving a stale handle must
/// succeed far enough to report use-after-free rather than claim the handle
/// was never issued. The registry is ordered by handle, which makes dump
/// output deterministic.
#[derive(Debug)]
pub struct MemoryArena {
    blocks: BTreeMap<BlockHandle, MemoryBlock>,
    next_handle: u32,
    next_func_id: u32,
}

impl Default for MemoryArena {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryArena {
    pub fn new() -> Self {
        MemoryArena {
            blocks: BTreeMap::new(),
            next_handle: HANDLE_FIRST,
            next_func_id: 1,
        }
    }

    /// Allocates a block of `size` bytes. Zero-size blocks are legal; they
    /// support one-past-the-end pointers and reject every actual access.
    pub fn allocate(&mut self, class: StorageClass, size: usize) -> Result<BlockHandle> {
        let handle = BlockHandle::from_raw(self.next_handle);
        self.next_handle = self
            .next_handle
            .checked_add(1)
            .ok_or(Fault::HandleExhausted)?;
        debug!(%handle, ?class, size, "allocated block");
        self.blocks.insert(handle, MemoryBlock::new(handle, class, size));
        Ok(handle)
    }

    /// Allocates a block sized for `value` and stores it at offset 0. Used
    /// for named variables, whose objects must be addressable.
    pub fn allocate_for(&mut self, class: StorageClass, value: &Value) -> Result<BlockHandle> {
        let size = convert::encoded_size_of(value.ty())?;
        if size == 0 {
            return Err(Fault::ZeroSizeObject);
        }
        let handle = self.allocate(class, size)?;
        self.write(handle, 0, value)?;
        Ok(handle)
    }

    /// Frees a block. The block stays registered so later accesses through a
    /// stale handle report use-after-free; freeing twice is one of those.
    pub fn free(&mut self, handle: BlockHandle) -> Result<()> {
        let block = self
            .blocks
            .get_mut(&handle)
            .ok_or(Fault::BadHandle { handle })?;
        if !block.is_live() {
            return Err(Fault::UseAfterFree { handle });
        }
        debug!(%handle, "freed block");
        block.release();
        Ok(())
    }

    /// Resolves a handle, dead blocks included.
    pub fn block(&self, handle: BlockHandle) -> Result<&MemoryBlock> {
        self.blocks.get(&handle).ok_or(Fault::BadHandle { handle })
    }

    pub fn block_mut(&mut self, handle: BlockHandle) -> Result<&mut MemoryBlock> {
        self.blocks
            .get_mut(&handle)
            .ok_or(Fault::BadHandle { handle })
    }

    pub fn is_live(&self, handle: BlockHandle) -> bool {
        self.blocks.get(&handle).is_some_and(MemoryBlock::is_live)
    }

    /// Reads storage as a value of type `ty`, then degrades any defined
    /// pointer whose target block has been freed to undefined. The payload
    /// bits survive the degrade for diagnostics.
    pub fn read(&self, handle: BlockHandle, offset: usize, ty: &CType) -> Result<Value> {
        let value = self.block(handle)?.read_value(offset, ty)?;
        Ok(self.degrade_dead_pointers(value))
    }

    pub fn write(&mut self, handle: BlockHandle, offset: usize, value: &Value) -> Result<()> {
        self.block_mut(handle)?.write(offset, value)
    }

    /// The provenance tag at `offset` of a block, if any.
    pub fn read_tag(&self, handle: BlockHandle, offset: usize) -> Result<Option<ProvenanceTag>> {
        self.block(handle)?.read_tag(offset)
    }

    /// Issues the next function id. Ids start at 1 so 0 can never collide
    /// with a real function.
    pub fn new_func_id(&mut self) -> u32 {
        let id = self.next_func_id;
        self.next_func_id += 1;
        id
    }

    /// Live blocks in handle order, for memory dumps.
    pub fn live_blocks(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.blocks.values().filter(|b| b.is_live())
    }

    fn degrade_dead_pointers(&self, value: Value) -> Value {
        let stale = value.is_defined()
            && matches!(
                value.kind(),
                ValueKind::Ptr { handle: Some(target), .. } if !self.is_live(*target)
            );
        if stale {
            return value.with_status(Status::Undefined);
        }
        if !matches!(value.kind(), ValueKind::Aggregate(_)) {
            return value;
        }

        let status = value.status();
        let ty = value.ty().clone();
        let ValueKind::Aggregate(members) = value.into_kind() else {
            unreachable!()
        };
        let members: Vec<Value> = members
            .into_iter()
            .map(|m| self.degrade_dead_pointers(m))
            .collect();
        let status = members
            .iter()
            .fold(status, |acc, m| acc.combine(m.status()));
        Value::new(status, ty, ValueKind::Aggregate(members))
    }
}
