//! One allocated object: payload bytes plus the provenance tags over them.

use crate::codec::{self, EncodedBytes};
use crate::error::{Fault, Result};
use crate::ty::CType;
use crate::value::{Status, Value, ValueKind};
use tracing::trace;

use super::tag::{ProvenanceTag, TagIndex};
use super::{BlockHandle, StorageClass};

/// A fixed-size region of interpreted memory.
///
/// The data buffer stores payload bytes only; the type channel of every
/// stored element lives in the [`TagIndex`]. Bytes no tag covers were never
/// written and read back as uninitialized.
///
/// A freed block keeps its bytes and tags but rejects every access, so stale
/// pointers into it fault instead of reading garbage.
#[derive(Debug, Clone)]
pub struct MemoryBlock {
    handle: BlockHandle,
    class: StorageClass,
    size: usize,
    data: Vec<u8>,
    tags: TagIndex,
}

impl MemoryBlock {
    pub(crate) fn new(handle: BlockHandle, class: StorageClass, size: usize) -> Self {
        MemoryBlock {
            handle,
            class,
            size,
            data: vec![0; size],
            tags: TagIndex::new(),
        }
    }

    pub fn handle(&self) -> BlockHandle {
        self.handle
    }

    pub fn class(&self) -> StorageClass {
        self.class
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_live(&self) -> bool {
        self.class != StorageClass::Freed
    }

    /// Raw payload bytes, tags not included.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// The tag set, in offset order.
    pub fn tags(&self) -> impl Iterator<Item = ProvenanceTag> + '_ {
        self.tags.iter()
    }

    /// Marks the block freed and drops its storage. The handle stays
    /// resolvable for fault reporting; only the bytes and tags go away.
    pub(crate) fn release(&mut self) {
        self.class = StorageClass::Freed;
        self.data = Vec::new();
        self.tags = TagIndex::new();
    }

    fn check_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(Fault::UseAfterFree { handle: self.handle })
        }
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<()> {
        if offset > self.size || self.size - offset < len {
            return Err(Fault::OutOfBounds {
                handle: self.handle,
                offset,
                len,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Stores `value` at `offset`, reconciling the tags over the written
    /// range. Aggregates decompose into member writes, so each scalar leaf
    /// gets its own tag and a later read of a single member stays defined.
    pub fn write(&mut self, offset: usize, value: &Value) -> Result<()> {
        self.check_live()?;
        if let ValueKind::Aggregate(members) = value.kind() {
            let mut cursor = offset;
            for member in members {
                // The whole aggregate's severity reaches every member, so a
                // store/load round trip can never downgrade the status.
                let status = member.status().combine(value.status());
                if status == member.status() {
                    self.write(cursor, member)?;
                } else {
                    self.write(cursor, &member.clone().with_status(status))?;
                }
                cursor += codec::payload_len(member.ty())?;
            }
            return Ok(());
        }

        let len = codec::payload_len(value.ty())?;
        self.check_bounds(offset, len)?;
        match value.status() {
            // Storing an uninitialized value returns the bytes to the
            // never-written state.
            Status::Uninitialized => {
                trace!(handle = %self.handle, offset, len, "uninitialized store clears tags");
                self.tags.clear_range(offset, len);
            }
            status => {
                let mut buf = EncodedBytes::new();
                codec::encode_payload(value, &mut buf)?;
                debug_assert_eq!(buf.len(), len);
                self.data[offset..offset + len].copy_from_slice(&buf);
                self.tags.record_write(offset, len, value.ty(), status);
            }
        }
        Ok(())
    }

    /// Reads storage at `offset` as a value of type `ty`.
    ///
    /// The tag over the range decides what comes back: no covering tag is an
    /// uninitialized value, a tag of a different type (or a read that is not
    /// aligned to the tagged elements) is an undefined one, and only a
    /// matching tag decodes the payload. Aggregates are read member-wise and
    /// combine their members' statuses.
    pub fn read_value(&self, offset: usize, ty: &CType) -> Result<Value> {
        self.check_live()?;
        match ty {
            CType::Array(elem, n) => {
                self.read_members(offset, std::iter::repeat(elem.as_ref()).take(*n), ty)
            }
            CType::Record(members) => self.read_members(offset, members.iter(), ty),
            _ => self.read_scalar(offset, ty),
        }
    }

    fn read_members<'a>(
        &self,
        offset: usize,
        member_tys: impl Iterator<Item = &'a CType>,
        ty: &CType,
    ) -> Result<Value> {
        let mut cursor = offset;
        let mut status = Status::Defined;
        let mut members = Vec::new();
        for mty in member_tys {
            let member = self.read_value(cursor, mty)?;
            cursor += codec::payload_len(mty)?;
            status = status.combine(member.status());
            members.push(member);
        }
        Ok(Value::new(status, ty.clone(), ValueKind::Aggregate(members)))
    }

    fn read_scalar(&self, offset: usize, ty: &CType) -> Result<Value> {
        let len = codec::payload_len(ty)?;
        self.check_bounds(offset, len)?;

        let Some(tag) = self.tags.covering(offset, len) else {
            // Fully untouched bytes are uninitialized; a range mixing tagged
            // and untagged bytes is a shredded value.
            return Ok(if self.tags.overlaps(offset, len) {
                Value::undef(ty.clone())
            } else {
                Value::uninit(ty.clone())
            });
        };
        let aligned = (offset - tag.offset) % tag.elem_size == 0;
        if tag.ty != *ty || tag.elem_size != len || !aligned {
            trace!(
                handle = %self.handle,
                offset,
                expected = ?ty,
                stored = ?tag.ty,
                "type confusion: stored tag does not match the read"
            );
            return Ok(Value::undef(ty.clone()));
        }

        let kind = codec::decode_payload(&self.data[offset..offset + len], ty)?;
        Ok(Value::new(tag.status, ty.clone(), kind))
    }

    /// The tag containing or most nearly preceding `offset`.
    pub fn read_tag(&self, offset: usize) -> Result<Option<ProvenanceTag>> {
        self.check_live()?;
        Ok(self.tags.tag_at(offset))
    }
}
