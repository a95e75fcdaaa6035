//! Self-describing byte encoding.
//!
//! The serialized form of a value is a fixed-width type-id tag followed by
//! the payload, most significant byte first. The tag is what makes a read
//! self-checking: decoding compares the stored tag against the id expected
//! for the static type being read, and a mismatch means the bytes were last
//! written as something else.
//!
//! Inside a [`MemoryBlock`](crate::memory::MemoryBlock) the tag channel lives
//! in the provenance-tag index instead of being interleaved with payloads;
//! this module still defines the payload layout blocks use, and the full
//! tagged form used for serialization and pointer/integer bit casts.

use crate::error::{Fault, Result};
use crate::memory::{BlockHandle, HANDLE_NULL};
use crate::ty::{CType, Width};
use crate::value::{Status, Value, ValueKind};
use smallvec::SmallVec;

/// Byte buffer for one encoded value; values up to 16 bytes stay inline.
pub type EncodedBytes = SmallVec<[u8; 16]>;

// Type-id constants. The repeated-byte patterns make a stomped tag visible in
// hex dumps.
pub const TYPE_ID_ZERO: u32 = 0x0000_0000;
pub const TYPE_ID_INVALID: u32 = 0x0101_0101;
pub const TYPE_ID_FUNC: u32 = 0x0202_0202;
pub const TYPE_ID_VOID: u32 = 0x0303_0303;
pub const TYPE_ID_BOOL: u32 = 0x0404_0404;
pub const TYPE_ID_AGGREGATE: u32 = 0x0505_0505;
pub const TYPE_ID_STACKPOS: u32 = 0x0606_0606;
pub const TYPE_ID_PTR: u32 = 0x6060_6060;
const TYPE_ID_NUM_BASE: u32 = 0x4040_4040;
const TYPE_ID_NUM_STEP: u32 = 0x0202_0202;
const TYPE_ID_SIGNED_MASK: u32 = 0x0101_0101;
pub const TYPE_ID_UNINIT_MASK: u32 = 0x8080_8080;

/// Fill byte for payloads that carry no information.
const INVALID_FILL: u8 = 0x01;

/// Width of the type-id tag in the serialized form.
pub const TAG_BYTES: usize = 4;
/// Payload width of a pointer: 4-byte handle + 8-byte offset.
pub const PTR_PAYLOAD_BYTES: usize = 12;
/// Payload width of a function reference: the numeric id.
pub const FUNC_PAYLOAD_BYTES: usize = 4;
/// Payload width of a stack position: frame + slot.
pub const STACKPOS_PAYLOAD_BYTES: usize = 8;

/// The type id expected when reading storage as `ty`.
pub fn wire_type_id(ty: &CType) -> Result<u32> {
    match ty {
        CType::Int { width: Width::W1, .. } => Ok(TYPE_ID_BOOL),
        CType::Int { width, signed } => {
            let rank = match width {
                Width::W8 => 0,
                Width::W16 => 1,
                Width::W32 => 2,
                Width::W64 => 3,
                Width::W1 => unreachable!(),
            };
            let mut id = TYPE_ID_NUM_BASE + rank * TYPE_ID_NUM_STEP;
            if *signed {
                id |= TYPE_ID_SIGNED_MASK;
            }
            Ok(id)
        }
        CType::Ptr(_) => Ok(TYPE_ID_PTR),
        CType::Array(_, _) | CType::Record(_) => Ok(TYPE_ID_AGGREGATE),
        CType::Func => Ok(TYPE_ID_FUNC),
        CType::VaList => Ok(TYPE_ID_STACKPOS),
        CType::Void => Err(Fault::Unsized { ty: CType::Void }),
    }
}

/// Payload length of `ty` in the serialized form, tags excluded. This is the
/// number of bytes the value occupies inside a block.
pub(crate) fn payload_len(ty: &CType) -> Result<usize> {
    match ty {
        CType::Int { width, .. } => Ok(width.bytes()),
        CType::Ptr(_) => Ok(PTR_PAYLOAD_BYTES),
        CType::Func => Ok(FUNC_PAYLOAD_BYTES),
        CType::VaList => Ok(STACKPOS_PAYLOAD_BYTES),
        CType::Array(elem, n) => payload_len(elem)?
            .checked_mul(*n)
            .ok_or(Fault::SizeOverflow),
        CType::Record(members) => {
            let mut total = 0usize;
            for m in members {
                total = total
                    .checked_add(payload_len(m)?)
                    .ok_or(Fault::SizeOverflow)?;
            }
            Ok(total)
        }
        CType::Void => Err(Fault::Unsized { ty: CType::Void }),
    }
}

/// Full serialized length of `ty`: every scalar leaf carries its own tag, and
/// an aggregate adds one tag of its own.
pub fn wire_len(ty: &CType) -> Result<usize> {
    match ty {
        CType::Array(elem, n) => {
            let per = wire_len(elem)?;
            per.checked_mul(*n)
                .and_then(|m| m.checked_add(TAG_BYTES))
                .ok_or(Fault::SizeOverflow)
        }
        CType::Record(members) => {
            let mut total = TAG_BYTES;
            for m in members {
                total = total
                    .checked_add(wire_len(m)?)
                    .ok_or(Fault::SizeOverflow)?;
            }
            Ok(total)
        }
        _ => Ok(TAG_BYTES + payload_len(ty)?),
    }
}

/// Serializes a value into the self-describing form.
pub fn encode(value: &Value) -> Result<EncodedBytes> {
    let mut out = EncodedBytes::new();
    encode_into(value, &mut out)?;
    Ok(out)
}

fn encode_into(value: &Value, out: &mut EncodedBytes) -> Result<()> {
    let id = wire_type_id(value.ty()).map_err(|_| Fault::UnsupportedOp {
        op: "encode",
        ty: value.ty().clone(),
    })?;

    match value.status() {
        Status::Defined => {
            out.extend_from_slice(&id.to_be_bytes());
            match value.kind() {
                ValueKind::Aggregate(members) => {
                    for m in members {
                        encode_into(m, out)?;
                    }
                }
                _ => encode_payload(value, out)?,
            }
        }
        Status::Uninitialized => {
            out.extend_from_slice(&(id | TYPE_ID_UNINIT_MASK).to_be_bytes());
            match value.ty() {
                // Members of an uninitialized aggregate serialize as
                // uninitialized themselves so the layout stays decodable.
                CType::Array(_, _) | CType::Record(_) => {
                    if let ValueKind::Aggregate(members) = value.kind() {
                        for m in members {
                            encode_into(m, out)?;
                        }
                    }
                }
                ty => {
                    let len = payload_len(ty)?;
                    out.extend(std::iter::repeat(INVALID_FILL).take(len));
                }
            }
        }
        Status::Undefined => {
            // Keep the payload bits; the poisoned tag is what matters.
            out.extend_from_slice(&TYPE_ID_INVALID.to_be_bytes());
            match value.kind() {
                ValueKind::Aggregate(members) => {
                    for m in members {
                        encode_into(m, out)?;
                    }
                }
                _ => encode_payload(value, out)?,
            }
        }
    }
    Ok(())
}

/// Writes just the payload bytes of a scalar value, most significant first.
pub(crate) fn encode_payload(value: &Value, out: &mut EncodedBytes) -> Result<()> {
    match (value.ty(), value.kind()) {
        (&CType::Int { width, .. }, &ValueKind::Int(bits)) => {
            let bytes = bits.to_be_bytes();
            out.extend_from_slice(&bytes[16 - width.bytes()..]);
        }
        (CType::Ptr(_), &ValueKind::Ptr { handle, offset }) => {
            let raw = handle.map_or(HANDLE_NULL, BlockHandle::raw);
            out.extend_from_slice(&raw.to_be_bytes());
            out.extend_from_slice(&(offset as u64).to_be_bytes());
        }
        (CType::Func, &ValueKind::Func(id)) => {
            out.extend_from_slice(&id.to_be_bytes());
        }
        (CType::VaList, &ValueKind::StackPos { frame, slot }) => {
            out.extend_from_slice(&frame.to_be_bytes());
            out.extend_from_slice(&slot.to_be_bytes());
        }
        _ => {
            return Err(Fault::UnsupportedOp {
                op: "encode",
                ty: value.ty().clone(),
            });
        }
    }
    Ok(())
}

/// Parses the self-describing form back into a value of the expected static
/// type. The stored tag decides the status: a matching id is Defined, the
/// uninitialized marker is Uninitialized, the all-zero tag over an all-zero
/// payload is a Defined zero, and anything else is Undefined.
pub fn decode(bytes: &[u8], ty: &CType) -> Result<Value> {
    let (value, _) = decode_at(bytes, ty)?;
    Ok(value)
}

fn decode_at(bytes: &[u8], ty: &CType) -> Result<(Value, usize)> {
    let expected = wire_type_id(ty)?;
    let tag_bytes = take(bytes, TAG_BYTES, ty)?;
    let tag = u32::from_be_bytes(tag_bytes.try_into().unwrap());
    let rest = &bytes[TAG_BYTES..];

    match ty {
        CType::Array(_, _) | CType::Record(_) => {
            // The zero tag marks a zero-initialized aggregate wrapper.
            let own_status = if tag == expected || tag == TYPE_ID_ZERO {
                Status::Defined
            } else if tag == expected | TYPE_ID_UNINIT_MASK {
                Status::Uninitialized
            } else {
                Status::Undefined
            };

            let mut cursor = 0usize;
            let mut status = own_status;
            let mut members = Vec::new();
            let member_tys: Vec<&CType> = match ty {
                CType::Array(elem, n) => std::iter::repeat(elem.as_ref()).take(*n).collect(),
                CType::Record(ms) => ms.iter().collect(),
                _ => unreachable!(),
            };
            for mty in member_tys {
                let (member, used) = decode_at(&rest[cursor..], mty)?;
                cursor += used;
                status = status.combine(member.status());
                members.push(member);
            }
            let value = Value::new(status, ty.clone(), ValueKind::Aggregate(members));
            Ok((value, TAG_BYTES + cursor))
        }
        _ => {
            let len = payload_len(ty)?;
            let payload = take(rest, len, ty)?;
            let used = TAG_BYTES + len;
            if tag == expected {
                let kind = decode_payload(payload, ty)?;
                Ok((Value::new(Status::Defined, ty.clone(), kind), used))
            } else if tag == expected | TYPE_ID_UNINIT_MASK {
                Ok((Value::uninit(ty.clone()), used))
            } else if tag == TYPE_ID_ZERO && payload.iter().all(|&b| b == 0) {
                let kind = decode_payload(payload, ty)?;
                Ok((Value::new(Status::Defined, ty.clone(), kind), used))
            } else {
                Ok((Value::undef(ty.clone()), used))
            }
        }
    }
}

/// Parses payload bytes as a scalar of the given type.
pub(crate) fn decode_payload(bytes: &[u8], ty: &CType) -> Result<ValueKind> {
    match ty {
        CType::Int { width, .. } => {
            let payload = take(bytes, width.bytes(), ty)?;
            let mut buf = [0u8; 16];
            buf[16 - payload.len()..].copy_from_slice(payload);
            Ok(ValueKind::Int(u128::from_be_bytes(buf) & width.mask()))
        }
        CType::Ptr(_) => {
            let payload = take(bytes, PTR_PAYLOAD_BYTES, ty)?;
            let raw = u32::from_be_bytes(payload[..4].try_into().unwrap());
            let offset = u64::from_be_bytes(payload[4..12].try_into().unwrap());
            let handle = if raw == HANDLE_NULL || raw == 0 {
                None
            } else {
                Some(BlockHandle::from_raw(raw))
            };
            Ok(ValueKind::Ptr { handle, offset: offset as usize })
        }
        CType::Func => {
            let payload = take(bytes, FUNC_PAYLOAD_BYTES, ty)?;
            Ok(ValueKind::Func(u32::from_be_bytes(payload.try_into().unwrap())))
        }
        CType::VaList => {
            let payload = take(bytes, STACKPOS_PAYLOAD_BYTES, ty)?;
            let frame = u32::from_be_bytes(payload[..4].try_into().unwrap());
            let slot = u32::from_be_bytes(payload[4..8].try_into().unwrap());
            Ok(ValueKind::StackPos { frame, slot })
        }
        _ => Err(Fault::UnsupportedOp { op: "decode", ty: ty.clone() }),
    }
}

fn take<'a>(bytes: &'a [u8], n: usize, ty: &CType) -> Result<&'a [u8]> {
    bytes.get(..n).ok_or_else(|| Fault::UnsupportedOp {
        op: "decode (input truncated)",
        ty: ty.clone(),
    })
}
