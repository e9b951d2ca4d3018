//! Constant folding of literal operands.
//!
//! Integer values are carried as `i64`; values of 32-bit type are kept
//! sign-extended. Every function returns `None` when the operation must not
//! be folded because it would fault at run time (division by zero,
//! overflow-checked operations that overflow, out-of-range conversions).

use ilimport_ir::{BinaryOp, CompareOp, NodeKind, UnaryOp, VarType};

/// A literal operand.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Const {
    Int(i64),
    Float(f64),
}

impl Const {
    pub(crate) fn of(kind: &NodeKind) -> Option<Const> {
        match *kind {
            NodeKind::IntCon(v) => Some(Const::Int(v)),
            NodeKind::DblCon(v) => Some(Const::Float(v)),
            _ => None,
        }
    }

    fn int(self) -> Option<i64> {
        match self {
            Const::Int(v) => Some(v),
            Const::Float(_) => None,
        }
    }

    fn float(self) -> Option<f64> {
        match self {
            Const::Float(v) => Some(v),
            Const::Int(_) => None,
        }
    }
}

macro_rules! fold_int_binary {
    ($signed:ty, $unsigned:ty, $mask:expr, $op:expr, $overflow:expr, $unsigned_op:expr, $a:expr, $b:expr) => {{
        let (a, b) = ($a as $signed, $b as $signed);
        let (ua, ub) = (a as $unsigned, b as $unsigned);
        let result: $signed = match $op {
            BinaryOp::Add if $overflow && $unsigned_op => ua.checked_add(ub)? as $signed,
            BinaryOp::Add if $overflow => a.checked_add(b)?,
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub if $overflow && $unsigned_op => ua.checked_sub(ub)? as $signed,
            BinaryOp::Sub if $overflow => a.checked_sub(b)?,
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul if $overflow && $unsigned_op => ua.checked_mul(ub)? as $signed,
            BinaryOp::Mul if $overflow => a.checked_mul(b)?,
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div if $unsigned_op => ua.checked_div(ub)? as $signed,
            BinaryOp::Div => a.checked_div(b)?,
            BinaryOp::Rem if $unsigned_op => ua.checked_rem(ub)? as $signed,
            BinaryOp::Rem => a.checked_rem(b)?,
            BinaryOp::And => a & b,
            BinaryOp::Or => a | b,
            BinaryOp::Xor => a ^ b,
            BinaryOp::Shl => a.wrapping_shl((b as u32) & $mask),
            BinaryOp::Shr => a.wrapping_shr((b as u32) & $mask),
            BinaryOp::ShrUn => ua.wrapping_shr((b as u32) & $mask) as $signed,
        };
        result as i64
    }};
}

/// Fold `lhs op rhs` computed in type `ty` (the node's type).
pub(crate) fn fold_binary(
    op: BinaryOp,
    overflow: bool,
    unsigned: bool,
    ty: VarType,
    lhs: Const,
    rhs: Const,
) -> Option<Const> {
    match ty {
        VarType::Int => {
            let (a, b) = (lhs.int()?, rhs.int()?);
            Some(Const::Int(fold_int_binary!(i32, u32, 31, op, overflow, unsigned, a, b)))
        }
        VarType::Long => {
            let (a, b) = (lhs.int()?, rhs.int()?);
            // The shift count of a long shift is an int32 or native int.
            Some(Const::Int(fold_int_binary!(i64, u64, 63, op, overflow, unsigned, a, b)))
        }
        VarType::Float => {
            let (a, b) = (lhs.float()? as f32, rhs.float()? as f32);
            let r = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                _ => return None,
            };
            Some(Const::Float(f64::from(r)))
        }
        VarType::Double => {
            let (a, b) = (lhs.float()?, rhs.float()?);
            let r = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                _ => return None,
            };
            Some(Const::Float(r))
        }
        _ => None,
    }
}

pub(crate) fn fold_unary(op: UnaryOp, ty: VarType, value: Const) -> Option<Const> {
    match (op, ty, value) {
        (UnaryOp::Neg, VarType::Int, Const::Int(v)) => Some(Const::Int((v as i32).wrapping_neg() as i64)),
        (UnaryOp::Neg, VarType::Long, Const::Int(v)) => Some(Const::Int(v.wrapping_neg())),
        (UnaryOp::Not, VarType::Int, Const::Int(v)) => Some(Const::Int(!(v as i32) as i64)),
        (UnaryOp::Not, VarType::Long, Const::Int(v)) => Some(Const::Int(!v)),
        (UnaryOp::Neg, VarType::Float | VarType::Double, Const::Float(v)) => Some(Const::Float(-v)),
        (UnaryOp::CkFinite, _, Const::Float(v)) if v.is_finite() => Some(Const::Float(v)),
        _ => None,
    }
}

/// Fold a comparison of two operands of type `ty`. For floats `unsigned`
/// means unordered: a NaN operand makes the ordered comparisons true.
pub(crate) fn fold_compare(
    op: CompareOp,
    unsigned: bool,
    ty: VarType,
    lhs: Const,
    rhs: Const,
) -> Option<bool> {
    use std::cmp::Ordering;
    let ordering = match (ty, lhs, rhs) {
        (VarType::Int, Const::Int(a), Const::Int(b)) if unsigned => (a as u32).cmp(&(b as u32)),
        (VarType::Int, Const::Int(a), Const::Int(b)) => (a as i32).cmp(&(b as i32)),
        (VarType::Long, Const::Int(a), Const::Int(b)) if unsigned => (a as u64).cmp(&(b as u64)),
        (VarType::Long, Const::Int(a), Const::Int(b)) => a.cmp(&b),
        (VarType::Ref, Const::Int(a), Const::Int(b)) => a.cmp(&b),
        (VarType::Float | VarType::Double, Const::Float(a), Const::Float(b)) => {
            match a.partial_cmp(&b) {
                Some(ordering) => ordering,
                None => {
                    return Some(match op {
                        CompareOp::Eq => false,
                        CompareOp::Ne => true,
                        _ => unsigned,
                    });
                }
            }
        }
        _ => return None,
    };
    Some(match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    })
}

/// Inclusive value range of an integral type.
fn int_range(ty: VarType) -> Option<(i128, i128)> {
    Some(match ty {
        VarType::Bool | VarType::UByte => (0, u8::MAX.into()),
        VarType::Byte => (i8::MIN.into(), i8::MAX.into()),
        VarType::Short => (i16::MIN.into(), i16::MAX.into()),
        VarType::UShort => (0, u16::MAX.into()),
        VarType::Int => (i32::MIN.into(), i32::MAX.into()),
        VarType::UInt => (0, u32::MAX.into()),
        VarType::Long => (i64::MIN.into(), i64::MAX.into()),
        VarType::ULong => (0, u64::MAX.into()),
        _ => return None,
    })
}

/// Truncate a mathematical value to `to` and return it as it sits on the
/// evaluation stack.
fn wrap_int(value: i128, to: VarType) -> i64 {
    match to {
        VarType::Bool | VarType::UByte => value as u8 as i64,
        VarType::Byte => value as i8 as i64,
        VarType::Short => value as i16 as i64,
        VarType::UShort => value as u16 as i64,
        VarType::Int | VarType::UInt => value as i32 as i64,
        _ => value as i64,
    }
}

/// Fold a conversion of `value`, an operand of stack type `from`.
pub(crate) fn fold_cast(
    value: Const,
    from: VarType,
    to: VarType,
    from_unsigned: bool,
    overflow: bool,
) -> Option<Const> {
    match value {
        Const::Int(v) => {
            let source: i128 = match (from, from_unsigned) {
                (VarType::Int, false) => (v as i32).into(),
                (VarType::Int, true) => (v as i32 as u32).into(),
                (VarType::Long, false) => v.into(),
                (VarType::Long, true) => (v as u64).into(),
                _ => return None,
            };
            match to {
                VarType::Float => Some(Const::Float(f64::from(source as f32))),
                VarType::Double => Some(Const::Float(source as f64)),
                _ => {
                    let (min, max) = int_range(to)?;
                    if overflow && !(min..=max).contains(&source) {
                        return None;
                    }
                    Some(Const::Int(wrap_int(source, to)))
                }
            }
        }
        Const::Float(f) => match to {
            VarType::Float => Some(Const::Float(f64::from(f as f32))),
            VarType::Double => Some(Const::Float(f)),
            _ => {
                let (min, max) = int_range(to)?;
                let truncated = f.trunc();
                // Out-of-range float conversions are left to run time.
                if f.is_nan() || truncated < min as f64 || truncated >= (max + 1) as f64 {
                    return None;
                }
                Some(Const::Int(wrap_int(truncated as i128, to)))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Const {
        Const::Int(v)
    }

    #[test]
    fn int32_arithmetic_wraps_in_width() {
        assert_eq!(
            fold_binary(BinaryOp::Add, false, false, VarType::Int, int(5), int(3)),
            Some(int(8))
        );
        assert_eq!(
            fold_binary(BinaryOp::Add, false, false, VarType::Int, int(i32::MAX.into()), int(1)),
            Some(int(i32::MIN.into()))
        );
        assert_eq!(
            fold_binary(BinaryOp::ShrUn, false, false, VarType::Int, int(-1), int(28)),
            Some(int(15))
        );
        assert_eq!(
            fold_binary(BinaryOp::Shl, false, false, VarType::Int, int(1), int(33)),
            Some(int(2))
        );
    }

    #[test]
    fn faulting_operations_are_not_folded() {
        let div = |a, b| fold_binary(BinaryOp::Div, false, false, VarType::Int, int(a), int(b));
        assert_eq!(div(7, 0), None);
        assert_eq!(div(i32::MIN.into(), -1), None);
        assert_eq!(div(-7, 2), Some(int(-3)));
        assert_eq!(
            fold_binary(BinaryOp::Add, true, false, VarType::Int, int(i32::MAX.into()), int(1)),
            None
        );
        assert_eq!(
            fold_binary(BinaryOp::Sub, true, true, VarType::Long, int(0), int(1)),
            None
        );
        assert_eq!(
            fold_binary(BinaryOp::Div, false, true, VarType::Int, int(-2), int(2)),
            Some(int(i32::MAX.into()))
        );
    }

    #[test]
    fn float_arithmetic_uses_operand_width() {
        let third = fold_binary(
            BinaryOp::Div,
            false,
            false,
            VarType::Float,
            Const::Float(1.0),
            Const::Float(3.0),
        );
        assert_eq!(third, Some(Const::Float(f64::from(1.0f32 / 3.0f32))));
        assert_eq!(
            fold_binary(BinaryOp::And, false, false, VarType::Double, Const::Float(1.0), Const::Float(1.0)),
            None
        );
    }

    #[test]
    fn nan_comparisons_follow_the_unordered_flag() {
        let nan = Const::Float(f64::NAN);
        let one = Const::Float(1.0);
        assert_eq!(fold_compare(CompareOp::Eq, false, VarType::Double, nan, one), Some(false));
        assert_eq!(fold_compare(CompareOp::Ne, false, VarType::Double, nan, one), Some(true));
        assert_eq!(fold_compare(CompareOp::Lt, false, VarType::Double, nan, one), Some(false));
        assert_eq!(fold_compare(CompareOp::Lt, true, VarType::Double, nan, one), Some(true));
        assert_eq!(fold_compare(CompareOp::Gt, true, VarType::Int, int(-1), int(1)), Some(true));
        assert_eq!(fold_compare(CompareOp::Gt, false, VarType::Int, int(-1), int(1)), Some(false));
    }

    #[test]
    fn casts_truncate_or_check() {
        assert_eq!(fold_cast(int(300), VarType::Int, VarType::UByte, false, false), Some(int(44)));
        assert_eq!(fold_cast(int(300), VarType::Int, VarType::UByte, false, true), None);
        assert_eq!(fold_cast(int(-1), VarType::Int, VarType::Long, true, false), Some(int(0xFFFF_FFFF)));
        assert_eq!(fold_cast(int(-1), VarType::Int, VarType::Long, false, false), Some(int(-1)));
        assert_eq!(fold_cast(int(-1), VarType::Int, VarType::UInt, false, true), None);
        assert_eq!(
            fold_cast(Const::Float(-2.75), VarType::Double, VarType::Int, false, false),
            Some(int(-2))
        );
        assert_eq!(
            fold_cast(Const::Float(f64::NAN), VarType::Double, VarType::Int, false, false),
            None
        );
        assert_eq!(
            fold_cast(Const::Float(1e20), VarType::Double, VarType::Long, false, false),
            None
        );
        assert_eq!(
            fold_cast(int(-1), VarType::Long, VarType::Double, true, false),
            Some(Const::Float(u64::MAX as f64))
        );
    }
}
