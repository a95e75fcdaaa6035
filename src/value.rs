//! Runtime value representation and the operator engine.
//!
//! A [`Value`] is one immutable typed datum: an integer of some width, a
//! pointer, a function reference, an aggregate, a variadic stack position, or
//! void. Every value carries a [`Status`] describing how trustworthy its
//! payload is. Operations never mutate their operands; each one returns a
//! fresh value whose ownership passes to the caller.
//!
//! # Status contagion
//!
//! Binary operators combine operand statuses by severity: Undefined dominates
//! Uninitialized dominates Defined. A non-Defined operand degrades the result
//! instead of faulting; that models the interpreted program's own defect.
//! Only an operator/type combination with no rule at all is a [`Fault`].

use crate::error::{Fault, Result};
use crate::memory::BlockHandle;
use crate::ty::{CType, Width};
use tracing::trace;

/// Validity of a value's payload.
///
/// Derived ordering puts the more severe state first, so combining two
/// statuses is `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    /// The bytes were last written as a different type, or the value derives
    /// from an operation on non-defined data.
    Undefined,
    /// The storage was never written.
    Uninitialized,
    /// A payload the interpreted program actually produced.
    Defined,
}

impl Status {
    /// The more severe of two statuses.
    pub fn combine(self, other: Status) -> Status {
        self.min(other)
    }

    pub fn is_defined(self) -> bool {
        self == Status::Defined
    }
}

/// Payload of a [`Value`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    /// Two's-complement bit pattern, truncated to the declared width.
    Int(u128),
    /// Block handle plus byte offset; `None` is the null pointer.
    Ptr {
        handle: Option<BlockHandle>,
        offset: usize,
    },
    /// Numeric function id issued by the arena.
    Func(u32),
    /// Ordered member values; used for both arrays and records. Members are
    /// owned, never shared.
    Aggregate(Vec<Value>),
    /// Variadic-argument forwarding: (frame index, slot index).
    StackPos { frame: u32, slot: u32 },
    Void,
}

/// One typed runtime datum.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    status: Status,
    ty: CType,
    kind: ValueKind,
}

impl Value {
    pub fn new(status: Status, ty: CType, kind: ValueKind) -> Self {
        Value { status, ty, kind }
    }

    /// Defined integer from a raw bit pattern, truncated to the type's width.
    /// `ty` must be an integer type.
    pub fn int_bits(ty: CType, bits: u128) -> Result<Self> {
        let CType::Int { width, .. } = ty else {
            return Err(Fault::UnsupportedOp { op: "construct integer", ty });
        };
        Ok(Value {
            status: Status::Defined,
            kind: ValueKind::Int(bits & width.mask()),
            ty,
        })
    }

    pub fn bool_(v: bool) -> Self {
        Value {
            status: Status::Defined,
            ty: CType::bool_(),
            kind: ValueKind::Int(v as u128),
        }
    }

    pub fn char_(v: i8) -> Self {
        Value {
            status: Status::Defined,
            ty: CType::char_(),
            kind: ValueKind::Int(v as u8 as u128),
        }
    }

    pub fn int32(v: i32) -> Self {
        Value {
            status: Status::Defined,
            ty: CType::int32(),
            kind: ValueKind::Int(v as u32 as u128),
        }
    }

    pub fn uint32(v: u32) -> Self {
        Value {
            status: Status::Defined,
            ty: CType::uint32(),
            kind: ValueKind::Int(v as u128),
        }
    }

    pub fn int64(v: i64) -> Self {
        Value {
            status: Status::Defined,
            ty: CType::int64(),
            kind: ValueKind::Int(v as u64 as u128),
        }
    }

    pub fn uint64(v: u64) -> Self {
        Value {
            status: Status::Defined,
            ty: CType::uint64(),
            kind: ValueKind::Int(v as u128),
        }
    }

    /// Defined null pointer of the given pointer type.
    pub fn null(ty: CType) -> Self {
        Value {
            status: Status::Defined,
            ty,
            kind: ValueKind::Ptr { handle: None, offset: 0 },
        }
    }

    /// Defined pointer into a block.
    pub fn ptr(ty: CType, handle: BlockHandle, offset: usize) -> Self {
        Value {
            status: Status::Defined,
            ty,
            kind: ValueKind::Ptr { handle: Some(handle), offset },
        }
    }

    pub fn func(id: u32) -> Self {
        Value {
            status: Status::Defined,
            ty: CType::Func,
            kind: ValueKind::Func(id),
        }
    }

    pub fn stack_pos(frame: u32, slot: u32) -> Self {
        Value {
            status: Status::Defined,
            ty: CType::VaList,
            kind: ValueKind::StackPos { frame, slot },
        }
    }

    pub fn void() -> Self {
        Value {
            status: Status::Defined,
            ty: CType::Void,
            kind: ValueKind::Void,
        }
    }

    /// A value of the given type whose storage was never written.
    pub fn uninit(ty: CType) -> Self {
        Self::blank_value_owned(ty, Status::Uninitialized)
    }

    /// A value of the given type whose bytes are not decodable as that type.
    /// Aggregate members inherit the severity, so a poisoned record never
    /// hides milder members inside.
    pub fn undef(ty: CType) -> Self {
        Self::blank_value_owned(ty, Status::Undefined)
    }

    fn blank_value_owned(ty: CType, status: Status) -> Self {
        let kind = Self::blank_kind(&ty, status);
        Value { status, ty, kind }
    }

    fn blank_kind(ty: &CType, status: Status) -> ValueKind {
        match ty {
            CType::Int { .. } => ValueKind::Int(0),
            CType::Ptr(_) => ValueKind::Ptr { handle: None, offset: 0 },
            CType::Func => ValueKind::Func(0),
            CType::VaList => ValueKind::StackPos { frame: 0, slot: 0 },
            CType::Array(elem, n) => {
                ValueKind::Aggregate(vec![Self::blank_value(elem, status); *n])
            }
            CType::Record(members) => ValueKind::Aggregate(
                members.iter().map(|m| Self::blank_value(m, status)).collect(),
            ),
            CType::Void => ValueKind::Void,
        }
    }

    fn blank_value(ty: &CType, status: Status) -> Value {
        Self::blank_value_owned(ty.clone(), status)
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_defined(&self) -> bool {
        self.status.is_defined()
    }

    pub fn ty(&self) -> &CType {
        &self.ty
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    /// Same value with a different status. Used by the arena when a decoded
    /// pointer turns out to denote a dead block.
    pub(crate) fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub(crate) fn into_kind(self) -> ValueKind {
        self.kind
    }

    /// Raw bit pattern for integer values.
    pub fn as_int_bits(&self) -> Option<u128> {
        match self.kind {
            ValueKind::Int(bits) => Some(bits),
            _ => None,
        }
    }

    /// `(handle, offset)` for pointer values; `None` handle is null.
    pub fn as_ptr(&self) -> Option<(Option<BlockHandle>, usize)> {
        match self.kind {
            ValueKind::Ptr { handle, offset } => Some((handle, offset)),
            _ => None,
        }
    }

    pub fn members(&self) -> Option<&[Value]> {
        match &self.kind {
            ValueKind::Aggregate(members) => Some(members),
            _ => None,
        }
    }

    /// Width, signedness and bit pattern for integer values.
    fn int_parts(&self) -> Option<(Width, bool, u128)> {
        match (&self.ty, &self.kind) {
            (&CType::Int { width, signed }, &ValueKind::Int(bits)) => {
                Some((width, signed, bits))
            }
            _ => None,
        }
    }

    /// Mathematical value of an integer, read under its own signedness.
    pub fn math_value(&self) -> Option<i128> {
        let (width, signed, bits) = self.int_parts()?;
        Some(to_math(bits, width, signed))
    }

    /// True when this is a Defined integer with magnitude zero. The evaluator
    /// uses this for truthiness tests.
    pub fn is_scalar_zero(&self) -> Result<bool> {
        match self.int_parts() {
            Some((_, _, bits)) => Ok(self.is_defined() && bits == 0),
            None => Err(Fault::UnsupportedOp { op: "zero test", ty: self.ty.clone() }),
        }
    }

    /// Magnitude equality under the common representation, independent of
    /// status. Callers that care about status compare it separately.
    pub fn eq_bits(&self, other: &Value) -> Result<bool> {
        match (self.int_parts(), other.int_parts()) {
            (Some((wa, _, a)), Some((wb, _, b))) if wa == wb => Ok(a == b),
            _ => Err(Fault::UnsupportedOp {
                op: "bit equality",
                ty: self.ty.clone(),
            }),
        }
    }
}

/// Binary arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    BitAnd,
    BitOr,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::BitAnd => "and",
            ArithOp::BitOr => "or",
        }
    }
}

/// Relational operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

/// Applies an arithmetic or bitwise operator to two integer values of the
/// same canonical type.
///
/// Arithmetic wraps at the operand width (two's complement). Division by a
/// Defined zero divisor yields an Undefined result, not a fault. A type the
/// operator has no rule for is a fault.
pub fn arith(op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    let (Some((width, signed, l)), Some((_, _, r))) = (lhs.int_parts(), rhs.int_parts())
    else {
        return Err(Fault::UnsupportedOp { op: op.name(), ty: lhs.ty().clone() });
    };
    if lhs.ty() != rhs.ty() {
        return Err(Fault::UnsupportedOp { op: op.name(), ty: rhs.ty().clone() });
    }

    let status = lhs.status().combine(rhs.status());
    let ty = lhs.ty().clone();
    if !status.is_defined() {
        return Ok(Value::new(status, ty, ValueKind::Int(0)));
    }

    let mask = width.mask();
    let bits = match op {
        ArithOp::Add => l.wrapping_add(r) & mask,
        ArithOp::Sub => l.wrapping_sub(r) & mask,
        ArithOp::Mul => l.wrapping_mul(r) & mask,
        ArithOp::Div => {
            let divisor = to_math(r, width, signed);
            if divisor == 0 {
                trace!("division by defined zero, result is undefined");
                return Ok(Value::undef(ty));
            }
            let quotient = to_math(l, width, signed).wrapping_div(divisor);
            (quotient as u128) & mask
        }
        ArithOp::BitAnd => l & r,
        ArithOp::BitOr => l | r,
    };
    Ok(Value::new(Status::Defined, ty, ValueKind::Int(bits)))
}

/// Compares two integer values of the same canonical type.
///
/// Each operand is read under its own signedness, so a negative signed value
/// never equals its large-unsigned bit pattern. The result is an `int`-typed
/// 0/1 value with the combined status of the operands.
pub fn compare(op: RelOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    if lhs.int_parts().is_none() || lhs.ty() != rhs.ty() {
        return Err(Fault::UnsupportedOp { op: "compare", ty: lhs.ty().clone() });
    }

    let status = lhs.status().combine(rhs.status());
    if !status.is_defined() {
        return Ok(Value::new(status, CType::int32(), ValueKind::Int(0)));
    }

    let l = lhs.math_value().unwrap();
    let r = rhs.math_value().unwrap();
    let ans = match op {
        RelOp::Lt => l < r,
        RelOp::Gt => l > r,
        RelOp::Le => l <= r,
        RelOp::Ge => l >= r,
        RelOp::Eq => l == r,
        RelOp::Ne => l != r,
    };
    Ok(Value::int32(ans as i32))
}

/// Reads a bit pattern as a mathematical value.
fn to_math(bits: u128, width: Width, signed: bool) -> i128 {
    let mask = width.mask();
    let bits = bits & mask;
    if signed && width.bits() < 128 {
        let sign_bit = 1u128 << (width.bits() - 1);
        if bits & sign_bit != 0 {
            return (bits | !mask) as i128;
        }
    }
    bits as i128
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_combine_severity() {
        assert_eq!(Status::Defined.combine(Status::Defined), Status::Defined);
        assert_eq!(
            Status::Defined.combine(Status::Uninitialized),
            Status::Uninitialized
        );
        assert_eq!(
            Status::Uninitialized.combine(Status::Undefined),
            Status::Undefined
        );
        assert_eq!(Status::Undefined.combine(Status::Defined), Status::Undefined);
    }

    #[test]
    fn test_arith_wraps_at_width() {
        let max = Value::int32(i32::MAX);
        let one = Value::int32(1);
        let sum = arith(ArithOp::Add, &max, &one).unwrap();
        assert_eq!(sum.math_value(), Some(i32::MIN as i128));

        let a = Value::char_(-1);
        let b = Value::char_(-1);
        let prod = arith(ArithOp::Mul, &a, &b).unwrap();
        assert_eq!(prod.math_value(), Some(1));
    }

    #[test]
    fn test_arith_contagion() {
        let x = Value::int32(7);
        let u = Value::uninit(CType::int32());
        let result = arith(ArithOp::Add, &x, &u).unwrap();
        assert_eq!(result.status(), Status::Uninitialized);

        let bad = Value::undef(CType::int32());
        let worse = arith(ArithOp::Add, &u, &bad).unwrap();
        assert_eq!(worse.status(), Status::Undefined);
    }

    #[test]
    fn test_division_by_defined_zero_is_undefined() {
        let x = Value::int32(10);
        let zero = Value::int32(0);
        let result = arith(ArithOp::Div, &x, &zero).unwrap();
        assert_eq!(result.status(), Status::Undefined);
    }

    #[test]
    fn test_division_truncates_toward_zero() {
        let result = arith(ArithOp::Div, &Value::int32(-7), &Value::int32(2)).unwrap();
        assert_eq!(result.math_value(), Some(-3));
    }

    #[test]
    fn test_mismatched_types_fault() {
        let a = Value::int32(1);
        let b = Value::uint32(1);
        assert!(matches!(
            arith(ArithOp::Add, &a, &b),
            Err(Fault::UnsupportedOp { .. })
        ));
        assert!(matches!(
            arith(ArithOp::Add, &a, &Value::func(1)),
            Err(Fault::UnsupportedOp { .. })
        ));
    }

    #[test]
    fn test_compare_sign_aware() {
        let neg = Value::int32(-1);
        let pos = Value::int32(1);
        let lt = compare(RelOp::Lt, &neg, &pos).unwrap();
        assert_eq!(lt.math_value(), Some(1));

        // 0xFFFF_FFFF as unsigned is large, not -1.
        let big = Value::uint32(u32::MAX);
        let small = Value::uint32(1);
        let gt = compare(RelOp::Gt, &big, &small).unwrap();
        assert_eq!(gt.math_value(), Some(1));
    }

    #[test]
    fn test_compare_contagion() {
        let x = Value::int32(1);
        let u = Value::uninit(CType::int32());
        let result = compare(RelOp::Eq, &x, &u).unwrap();
        assert_eq!(result.status(), Status::Uninitialized);
    }

    #[test]
    fn test_blank_aggregate_members_inherit_severity() {
        let rec = CType::Record(vec![CType::int32(), CType::array_of(CType::char_(), 2)]);
        let bad = Value::undef(rec.clone());
        for member in bad.members().unwrap() {
            assert_eq!(member.status(), Status::Undefined);
        }
        let inner = bad.members().unwrap()[1].members().unwrap();
        assert!(inner.iter().all(|m| m.status() == Status::Undefined));

        let fresh = Value::uninit(rec);
        for member in fresh.members().unwrap() {
            assert_eq!(member.status(), Status::Uninitialized);
        }
    }

    #[test]
    fn test_eq_bits_ignores_status() {
        let a = Value::int32(-1);
        let b = Value::new(
            Status::Undefined,
            CType::int32(),
            ValueKind::Int(u32::MAX as u128),
        );
        assert!(a.eq_bits(&b).unwrap());
    }

    #[test]
    fn test_is_scalar_zero() {
        assert!(Value::int32(0).is_scalar_zero().unwrap());
        assert!(!Value::int32(3).is_scalar_zero().unwrap());
        assert!(!Value::uninit(CType::int32()).is_scalar_zero().unwrap());
        assert!(Value::func(0).is_scalar_zero().is_err());
    }
}
