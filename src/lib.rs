//! Shadowmem Runtime Core
//!
//! The memory and value model of a C interpreter: a provenance-tracked
//! arena of allocations, typed values that remember whether their payload
//! was ever actually produced, and the conversion engine between canonical
//! C types.
//!
//! Every byte of simulated memory carries provenance: which type last
//! occupied it. Reading bytes back as a different type does not abort the
//! run; it yields a value whose [`Status`] is `Undefined`, and that taint
//! flows through every operation derived from it. The interpreter on top
//! of this crate only reports the defect when the program finally acts on
//! the tainted value.

mod codec;
mod convert;
mod error;
mod memory;
mod ty;
mod value;

pub use codec::{decode, encode, wire_len, wire_type_id, EncodedBytes};
pub use convert::{cast_to, encoded_size_of, zero_init};
pub use error::{Fault, Result};
pub use memory::{
    BlockHandle, MemoryArena, MemoryBlock, ProvenanceTag, StorageClass, HANDLE_INVALID,
    HANDLE_NULL,
};
pub use ty::{CType, Width};
pub use value::{arith, compare, ArithOp, RelOp, Status, Value, ValueKind};
