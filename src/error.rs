//! Fatal-fault taxonomy.
//!
//! Faults are interpreter engineering limits: out-of-bounds access,
//! use-after-free, unsupported casts and the like. They are disjoint from the
//! [`Status`](crate::value::Status) a value carries: a status models a defect
//! in the *interpreted* program and flows through operations as ordinary data,
//! while a `Fault` is returned up to the driver, which terminates the run.
//! Nothing in this crate calls `process::exit` or panics on a fault.

use crate::memory::BlockHandle;
use crate::ty::CType;
use thiserror::Error;

/// Result alias used by every fallible operation in the crate.
pub type Result<T> = std::result::Result<T, Fault>;

/// An unrecoverable interpreter-level error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Fault {
    /// Read or write outside a block's byte range.
    #[error("access of {len} bytes at offset {offset} is out of bounds for {handle} ({size} bytes)")]
    OutOfBounds {
        handle: BlockHandle,
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Access to a block after it transitioned to `Freed`.
    #[error("use after free: {handle} has been freed")]
    UseAfterFree { handle: BlockHandle },

    /// A handle that was never issued by the arena.
    #[error("{handle} does not denote any allocation")]
    BadHandle { handle: BlockHandle },

    /// The monotonic handle counter wrapped; we never reuse handles.
    #[error("too many allocations: handle space exhausted")]
    HandleExhausted,

    /// No conversion rule exists between the two canonical types.
    #[error("unsupported cast from {from:?} to {to:?}")]
    UnsupportedCast { from: CType, to: CType },

    /// An operator applied to a type it has no rule for.
    #[error("unsupported operation `{op}` on {ty:?}")]
    UnsupportedOp { op: &'static str, ty: CType },

    /// The type has no encoded size (e.g. `void`).
    #[error("type {ty:?} has no encoded size")]
    Unsized { ty: CType },

    /// Creation of a zero-size object was requested.
    #[error("tried to create a zero-size object")]
    ZeroSizeObject,

    /// Size arithmetic overflowed (e.g. an absurdly large array type).
    #[error("object size overflow")]
    SizeOverflow,
}
