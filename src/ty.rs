//! Canonical type descriptors.
//!
//! The front end hands the core one of these for every declaration and every
//! read. Types are compared structurally; the core never builds types on its
//! own beyond the conversion engine's needs.

/// Bit width of an integer type. `W1` is the boolean width and occupies one
/// byte of storage like the original's `bool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W1,
    W8,
    W16,
    W32,
    W64,
}

impl Width {
    /// Number of value bits.
    pub fn bits(self) -> u32 {
        match self {
            Width::W1 => 1,
            Width::W8 => 8,
            Width::W16 => 16,
            Width::W32 => 32,
            Width::W64 => 64,
        }
    }

    /// Number of bytes the payload occupies in memory.
    pub fn bytes(self) -> usize {
        match self {
            Width::W1 | Width::W8 => 1,
            Width::W16 => 2,
            Width::W32 => 4,
            Width::W64 => 8,
        }
    }

    /// Bit mask selecting exactly this width's value bits.
    pub fn mask(self) -> u128 {
        match self.bits() {
            128 => u128::MAX,
            b => (1u128 << b) - 1,
        }
    }
}

/// A canonical type as supplied by the front end.
///
/// Aggregates carry their member layout: an array is `elem_count` repetitions
/// of the element type, a record is its members in declaration order. Member
/// names, qualifiers and function signatures are the front end's business.
#[derive(Debug, Clone, PartialEq)]
pub enum CType {
    /// Fixed-width two's-complement integer. `W1` unsigned is `bool`.
    Int { width: Width, signed: bool },
    /// Pointer to a pointee type.
    Ptr(Box<CType>),
    /// Fixed-size array.
    Array(Box<CType>, usize),
    /// Struct with members in declaration order.
    Record(Vec<CType>),
    /// Function; values of this type carry a numeric function id.
    Func,
    /// Variadic-argument forwarding slot (`va_list`).
    VaList,
    Void,
}

impl CType {
    pub fn int(width: Width, signed: bool) -> Self {
        CType::Int { width, signed }
    }

    pub fn bool_() -> Self {
        CType::Int { width: Width::W1, signed: false }
    }

    pub fn char_() -> Self {
        CType::Int { width: Width::W8, signed: true }
    }

    pub fn int32() -> Self {
        CType::Int { width: Width::W32, signed: true }
    }

    pub fn uint32() -> Self {
        CType::Int { width: Width::W32, signed: false }
    }

    pub fn int64() -> Self {
        CType::Int { width: Width::W64, signed: true }
    }

    pub fn uint64() -> Self {
        CType::Int { width: Width::W64, signed: false }
    }

    pub fn ptr_to(pointee: CType) -> Self {
        CType::Ptr(Box::new(pointee))
    }

    pub fn array_of(elem: CType, count: usize) -> Self {
        CType::Array(Box::new(elem), count)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, CType::Int { .. })
    }

    /// Pointer-shaped types: plain pointers plus arrays, which decay.
    pub fn is_pointer_like(&self) -> bool {
        matches!(self, CType::Ptr(_) | CType::Array(_, _))
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, CType::Array(_, _) | CType::Record(_))
    }
}
