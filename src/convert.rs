//! Conversion engine: casts, zero-initialization, and encoded sizes.
//!
//! Pure functions over values and type descriptors; nothing here touches the
//! arena. A combination with no conversion rule is a fatal
//! [`Fault::UnsupportedCast`], strictly distinct from a status-level
//! Undefined: the fault means *this interpreter* has no rule, while a status
//! models a defect in the interpreted program.

use crate::codec;
use crate::error::{Fault, Result};
use crate::memory::{BlockHandle, HANDLE_NULL};
use crate::ty::{CType, Width};
use crate::value::{Status, Value, ValueKind};

/// Encoded size in bytes of a value of type `ty`, computed from the type
/// descriptor alone, needed to size an allocation before any value exists.
///
/// `void` has no size; an array of zero-size elements is a zero-size object
/// request and faults accordingly.
pub fn encoded_size_of(ty: &CType) -> Result<usize> {
    if let CType::Array(elem, n) = ty {
        if *n > 0 && codec::payload_len(elem)? == 0 {
            return Err(Fault::ZeroSizeObject);
        }
    }
    codec::payload_len(ty)
}

/// A fully Defined, recursively zero value of the given type: 0 for
/// integers, null for pointers, zeroed members for aggregates. Used whenever
/// a declaration has no initializer.
pub fn zero_init(ty: &CType) -> Result<Value> {
    match ty {
        CType::Int { .. } => Value::int_bits(ty.clone(), 0),
        CType::Ptr(_) => Ok(Value::null(ty.clone())),
        CType::Array(elem, n) => {
            let mut members = Vec::with_capacity(*n);
            for _ in 0..*n {
                members.push(zero_init(elem)?);
            }
            Ok(Value::new(
                Status::Defined,
                ty.clone(),
                ValueKind::Aggregate(members),
            ))
        }
        CType::Record(member_tys) => {
            let mut members = Vec::with_capacity(member_tys.len());
            for mty in member_tys {
                members.push(zero_init(mty)?);
            }
            Ok(Value::new(
                Status::Defined,
                ty.clone(),
                ValueKind::Aggregate(members),
            ))
        }
        CType::Func | CType::VaList | CType::Void => {
            Err(Fault::UnsupportedOp { op: "zero-init", ty: ty.clone() })
        }
    }
}

/// Produces a value of the target type from `value`.
///
/// Identity casts return an equal value (no representation drift). Integer
/// casts truncate or extend under the *source* signedness. Pointer-shaped
/// casts, including array-to-pointer decay, reinterpret the same
/// (handle, offset). Pointer and 64-bit integer interconvert through the
/// round-trippable bit pattern `handle << 32 | offset`. A non-Defined source
/// status propagates unchanged; it never faults on its own.
pub fn cast_to(value: &Value, target: &CType) -> Result<Value> {
    if value.ty() == target {
        return Ok(value.clone());
    }

    let unsupported = || Fault::UnsupportedCast {
        from: value.ty().clone(),
        to: target.clone(),
    };

    match (value.kind(), target) {
        (&ValueKind::Int(_), CType::Int { width, .. }) => {
            // Extend under the source signedness, then truncate to target.
            let math = value.math_value().unwrap();
            let bits = (math as u128) & width.mask();
            Ok(Value::new(value.status(), target.clone(), ValueKind::Int(bits)))
        }
        (&ValueKind::Int(bits), CType::Ptr(_)) => {
            if bits == 0 {
                return Ok(Value::null(target.clone()).with_status(value.status()));
            }
            let CType::Int { width: Width::W64, .. } = value.ty() else {
                return Err(unsupported());
            };
            let raw = (bits >> 32) as u32;
            let offset = bits as u32 as usize;
            let handle = if raw == HANDLE_NULL || raw == 0 {
                None
            } else {
                Some(BlockHandle::from_raw(raw))
            };
            Ok(Value::new(
                value.status(),
                target.clone(),
                ValueKind::Ptr { handle, offset },
            ))
        }
        (&ValueKind::Ptr { .. }, t) if t.is_pointer_like() => {
            // Reinterpret under the new static type; includes array decay.
            Ok(Value::new(value.status(), target.clone(), value.kind().clone()))
        }
        (&ValueKind::Ptr { handle, offset }, CType::Int { width: Width::W64, .. }) => {
            let raw = handle.map_or(HANDLE_NULL, BlockHandle::raw);
            let bits = ((raw as u128) << 32) | (offset as u32 as u128);
            Ok(Value::new(value.status(), target.clone(), ValueKind::Int(bits)))
        }
        _ => Err(unsupported()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Status;

    #[test]
    fn test_cast_identity_is_exact() {
        let v = Value::int32(-42);
        assert_eq!(cast_to(&v, v.ty()).unwrap(), v);

        let p = Value::ptr(CType::ptr_to(CType::char_()), BlockHandle::from_raw(9), 2);
        assert_eq!(cast_to(&p, p.ty()).unwrap(), p);
    }

    #[test]
    fn test_int_widening_sign_extends() {
        let v = Value::char_(-1);
        let wide = cast_to(&v, &CType::int64()).unwrap();
        assert_eq!(wide.math_value(), Some(-1));

        // Unsigned source zero-extends.
        let u = Value::int_bits(CType::Int { width: Width::W8, signed: false }, 0xFF).unwrap();
        let wide = cast_to(&u, &CType::int64()).unwrap();
        assert_eq!(wide.math_value(), Some(255));
    }

    #[test]
    fn test_int_narrowing_truncates() {
        let v = Value::int64(0x1_0000_0001);
        let narrow = cast_to(&v, &CType::int32()).unwrap();
        assert_eq!(narrow.math_value(), Some(1));
    }

    #[test]
    fn test_cast_propagates_status() {
        let u = Value::uninit(CType::char_());
        let wide = cast_to(&u, &CType::int32()).unwrap();
        assert_eq!(wide.status(), Status::Uninitialized);
        assert_eq!(wide.ty(), &CType::int32());
    }

    #[test]
    fn test_pointer_int_round_trip() {
        let pty = CType::ptr_to(CType::int32());
        let p = Value::ptr(pty.clone(), BlockHandle::from_raw(5), 16);
        let as_int = cast_to(&p, &CType::int64()).unwrap();
        let back = cast_to(&as_int, &pty).unwrap();
        assert_eq!(back, p);

        let null = Value::null(pty.clone());
        let as_int = cast_to(&null, &CType::int64()).unwrap();
        let back = cast_to(&as_int, &pty).unwrap();
        assert_eq!(back.as_ptr(), Some((None, 0)));
    }

    #[test]
    fn test_zero_int_casts_to_null() {
        let zero = Value::int32(0);
        let p = cast_to(&zero, &CType::ptr_to(CType::Void)).unwrap();
        assert_eq!(p.as_ptr(), Some((None, 0)));
        assert!(p.is_defined());
    }

    #[test]
    fn test_array_decay() {
        let arr_ty = CType::array_of(CType::int32(), 4);
        let p = Value::ptr(arr_ty, BlockHandle::from_raw(7), 0);
        let decayed = cast_to(&p, &CType::ptr_to(CType::int32())).unwrap();
        assert_eq!(decayed.as_ptr(), Some((Some(BlockHandle::from_raw(7)), 0)));
        assert_eq!(decayed.ty(), &CType::ptr_to(CType::int32()));
    }

    #[test]
    fn test_unsupported_cast_faults() {
        let v = Value::int32(1);
        assert!(matches!(
            cast_to(&v, &CType::Func),
            Err(Fault::UnsupportedCast { .. })
        ));
        let agg = zero_init(&CType::Record(vec![CType::int32()])).unwrap();
        assert!(matches!(
            cast_to(&agg, &CType::ptr_to(CType::int32())),
            Err(Fault::UnsupportedCast { .. })
        ));
    }

    #[test]
    fn test_zero_init_recurses() {
        let ty = CType::Record(vec![
            CType::int32(),
            CType::ptr_to(CType::char_()),
            CType::array_of(CType::char_(), 3),
        ]);
        let v = zero_init(&ty).unwrap();
        assert!(v.is_defined());
        let members = v.members().unwrap();
        assert_eq!(members[0].math_value(), Some(0));
        assert_eq!(members[1].as_ptr(), Some((None, 0)));
        assert!(members[2].members().unwrap().iter().all(|m| m.is_defined()));
    }

    #[test]
    fn test_sizes() {
        assert_eq!(encoded_size_of(&CType::int32()).unwrap(), 4);
        assert_eq!(encoded_size_of(&CType::ptr_to(CType::Void)).unwrap(), 12);
        assert_eq!(
            encoded_size_of(&CType::Record(vec![CType::int32(), CType::char_()])).unwrap(),
            5
        );
        assert!(matches!(
            encoded_size_of(&CType::Void),
            Err(Fault::Unsized { .. })
        ));
        assert!(matches!(
            encoded_size_of(&CType::array_of(CType::Record(vec![]), 2)),
            Err(Fault::ZeroSizeObject)
        ));
    }
}
