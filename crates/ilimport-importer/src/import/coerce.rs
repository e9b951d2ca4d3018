//! Operand typing and implicit coercions.

use ilimport_bytecode::Opcode;
use ilimport_ir::{BinaryOp, ClassHandle, NodeKind, NodeRef, StackEntry, TargetInfo, TypeInfo, VarType};

use super::Importer;
use super::fold::{Const, fold_cast};
use crate::error::{BadCode, ImportResult};

/// Stack type of `lhs op rhs` for the arithmetic operators, or `None` when
/// the operand types cannot be combined.
pub(super) fn arith_result(
    op: BinaryOp,
    integer_only: bool,
    lhs: TypeInfo,
    rhs: TypeInfo,
    target: &TargetInfo,
) -> Option<TypeInfo> {
    use TypeInfo::*;
    let result = match (lhs, rhs) {
        (Int32, Int32) => Int32,
        (Int32 | NativeInt, Int32 | NativeInt) => NativeInt,
        (Int64, Int64) => Int64,
        (Int64, NativeInt) | (NativeInt, Int64) if target.is_64bit() => NativeInt,
        (Float, Float) if !integer_only => Float,
        (Float | Double, Float | Double) if !integer_only => Double,
        (Byref, Int32 | NativeInt) if matches!(op, BinaryOp::Add | BinaryOp::Sub) => Byref,
        (Int32 | NativeInt, Byref) if op == BinaryOp::Add => Byref,
        (Byref, Byref) if op == BinaryOp::Sub => NativeInt,
        _ => return None,
    };
    Some(result)
}

/// Stack type of a shift of `lhs` by `rhs`.
pub(super) fn shift_result(lhs: TypeInfo, rhs: TypeInfo) -> Option<TypeInfo> {
    match (lhs, rhs) {
        (TypeInfo::Int32 | TypeInfo::Int64 | TypeInfo::NativeInt, TypeInfo::Int32 | TypeInfo::NativeInt) => {
            Some(lhs)
        }
        _ => None,
    }
}

/// Common IR type two operands are compared in.
pub(super) fn compare_type(lhs: TypeInfo, rhs: TypeInfo, target: &TargetInfo) -> Option<VarType> {
    use TypeInfo::*;
    let native = target.native_int();
    Some(match (lhs, rhs) {
        (Int32, Int32) => VarType::Int,
        (Int32 | NativeInt | Method(_), Int32 | NativeInt | Method(_)) => native,
        (Int64, Int64) => VarType::Long,
        (Int64, NativeInt) | (NativeInt, Int64) if target.is_64bit() => VarType::Long,
        (Float, Float) => VarType::Float,
        (Float | Double, Float | Double) => VarType::Double,
        (Null | Ref(_), Null | Ref(_)) => VarType::Ref,
        (Byref, Byref | NativeInt) | (NativeInt, Byref) => VarType::Byref,
        _ => return None,
    })
}

impl Importer<'_> {
    /// A conversion node, folded when its operand is a literal.
    pub(super) fn cast(&mut self, node: NodeRef, to: VarType, from_unsigned: bool, overflow: bool) -> NodeRef {
        let from = self.ctx.ty(node);
        if self.config.fold_constants
            && let Some(value) = Const::of(self.ctx.kind(node))
            && let Some(folded) = fold_cast(value, from, to, from_unsigned, overflow)
        {
            return self.constant(folded, to.actual());
        }
        self.node(
            NodeKind::Cast {
                to,
                from_unsigned,
                overflow,
            },
            to.actual(),
            [node],
        )
    }

    pub(super) fn constant(&mut self, value: Const, ty: VarType) -> NodeRef {
        match value {
            Const::Int(v) => self.ctx.int_con(v, ty),
            Const::Float(v) => self.ctx.dbl_con(v, ty),
        }
    }

    /// Bring an operand of an arithmetic or compare node to `to`, inserting
    /// the implicit widening the operand needs.
    pub(super) fn widen_operand(&mut self, entry: StackEntry, to: VarType, unsigned: bool) -> NodeRef {
        let from = self.ctx.ty(entry.node).actual();
        match (from, to) {
            (VarType::Int, VarType::Long) => self.cast(entry.node, VarType::Long, unsigned, false),
            (VarType::Int, VarType::Byref) if self.config.target.is_64bit() => {
                self.cast(entry.node, VarType::Long, unsigned, false)
            }
            (VarType::Float, VarType::Double) => self.cast(entry.node, VarType::Double, false, false),
            _ => entry.node,
        }
    }

    /// Coerce a value about to be stored into a location of type `dest`
    /// (a local, argument, field, array element or return value).
    pub(super) fn coerce_for_store(
        &mut self,
        entry: StackEntry,
        dest: VarType,
        class: Option<ClassHandle>,
        opcode: Opcode,
    ) -> ImportResult<NodeRef> {
        let target = self.config.target;
        let native = target.native_int();
        let mismatch = || BadCode::type_mismatch(opcode, entry.info).into();
        let node = entry.node;
        match (dest, entry.info) {
            (VarType::Undef, _) => Ok(node),
            (_, TypeInfo::Byref | TypeInfo::Method(_)) if dest == native => Ok(node),
            (VarType::Long | VarType::ULong, TypeInfo::Int32) => Ok(self.cast(node, VarType::Long, false, false)),
            (VarType::Long | VarType::ULong, TypeInfo::NativeInt) if !target.is_64bit() => {
                Ok(self.cast(node, VarType::Long, false, false))
            }
            (VarType::Long | VarType::ULong, TypeInfo::Int64 | TypeInfo::NativeInt) => Ok(node),
            (d, TypeInfo::Int32) if d.is_small_int() || matches!(d, VarType::Int | VarType::UInt) => Ok(node),
            (d, TypeInfo::NativeInt) if d.is_small_int() || matches!(d, VarType::Int | VarType::UInt) => {
                if target.is_64bit() {
                    Ok(self.cast(node, VarType::Int, false, false))
                } else {
                    Ok(node)
                }
            }
            (VarType::Float | VarType::Double, TypeInfo::Float | TypeInfo::Double) => {
                if self.ctx.ty(node) == dest {
                    Ok(node)
                } else {
                    Ok(self.cast(node, dest, false, false))
                }
            }
            (VarType::Ref, TypeInfo::Ref(_) | TypeInfo::Null) => Ok(node),
            (VarType::Byref, TypeInfo::Byref | TypeInfo::NativeInt) => Ok(node),
            (VarType::Struct, TypeInfo::Struct(c)) if class.is_none_or(|expected| expected == c) => Ok(node),
            _ => Err(mismatch()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const X64: TargetInfo = TargetInfo::X64;
    const X86: TargetInfo = TargetInfo::X86;

    #[test]
    fn mixed_integer_operands_widen_to_native_int() {
        use TypeInfo::*;
        assert_eq!(arith_result(BinaryOp::Add, false, Int32, Int32, &X64), Some(Int32));
        assert_eq!(arith_result(BinaryOp::Add, false, Int32, NativeInt, &X64), Some(NativeInt));
        assert_eq!(arith_result(BinaryOp::Mul, false, Int64, NativeInt, &X64), Some(NativeInt));
        assert_eq!(arith_result(BinaryOp::Mul, false, Int64, NativeInt, &X86), None);
        assert_eq!(arith_result(BinaryOp::Add, false, Int32, Int64, &X64), None);
    }

    #[test]
    fn byref_arithmetic() {
        use TypeInfo::*;
        assert_eq!(arith_result(BinaryOp::Add, false, Byref, Int32, &X64), Some(Byref));
        assert_eq!(arith_result(BinaryOp::Add, false, NativeInt, Byref, &X64), Some(Byref));
        assert_eq!(arith_result(BinaryOp::Sub, false, Int32, Byref, &X64), None);
        assert_eq!(arith_result(BinaryOp::Sub, false, Byref, Byref, &X64), Some(NativeInt));
        assert_eq!(arith_result(BinaryOp::Mul, false, Byref, Int32, &X64), None);
    }

    #[test]
    fn floats_are_excluded_from_integer_ops() {
        use TypeInfo::*;
        assert_eq!(arith_result(BinaryOp::Div, false, Float, Double, &X64), Some(Double));
        assert_eq!(arith_result(BinaryOp::Div, true, Float, Float, &X64), None);
        assert_eq!(shift_result(Int64, Int32), Some(Int64));
        assert_eq!(shift_result(Int32, Int64), None);
    }

    #[test]
    fn compare_operand_types() {
        use TypeInfo::*;
        assert_eq!(compare_type(Null, Ref(None), &X64), Some(VarType::Ref));
        assert_eq!(compare_type(Int32, NativeInt, &X86), Some(VarType::Int));
        assert_eq!(compare_type(Byref, NativeInt, &X64), Some(VarType::Byref));
        assert_eq!(compare_type(Ref(None), Int32, &X64), None);
    }
}
