//! Arithmetic, conversion and comparison opcodes.

use ilimport_bytecode::Opcode;
use ilimport_ir::{BinaryOp, CompareOp, NodeKind, NodeRef, StackEntry, TypeInfo, UnaryOp, VarType};

use super::Importer;
use super::coerce::{arith_result, compare_type, shift_result};
use super::fold::{Const, fold_binary, fold_compare, fold_unary};
use crate::error::{BadCode, ImportError, ImportResult};

/// Operator, overflow check and unsigned flag of a binary opcode.
fn binary_op(opcode: Opcode) -> Option<(BinaryOp, bool, bool)> {
    use Opcode::*;
    Some(match opcode {
        Add => (BinaryOp::Add, false, false),
        Sub => (BinaryOp::Sub, false, false),
        Mul => (BinaryOp::Mul, false, false),
        Div => (BinaryOp::Div, false, false),
        DivUn => (BinaryOp::Div, false, true),
        Rem => (BinaryOp::Rem, false, false),
        RemUn => (BinaryOp::Rem, false, true),
        And => (BinaryOp::And, false, false),
        Or => (BinaryOp::Or, false, false),
        Xor => (BinaryOp::Xor, false, false),
        Shl => (BinaryOp::Shl, false, false),
        Shr => (BinaryOp::Shr, false, false),
        ShrUn => (BinaryOp::ShrUn, false, false),
        AddOvf => (BinaryOp::Add, true, false),
        AddOvfUn => (BinaryOp::Add, true, true),
        MulOvf => (BinaryOp::Mul, true, false),
        MulOvfUn => (BinaryOp::Mul, true, true),
        SubOvf => (BinaryOp::Sub, true, false),
        SubOvfUn => (BinaryOp::Sub, true, true),
        _ => return None,
    })
}

/// Target type, overflow check, unsigned source and stack type of a
/// conversion opcode.
fn conversion(opcode: Opcode, native: VarType) -> Option<(VarType, bool, bool, TypeInfo)> {
    use Opcode::*;
    let native_unsigned = if native == VarType::Long {
        VarType::ULong
    } else {
        VarType::UInt
    };
    Some(match opcode {
        ConvI1 => (VarType::Byte, false, false, TypeInfo::Int32),
        ConvI2 => (VarType::Short, false, false, TypeInfo::Int32),
        ConvI4 => (VarType::Int, false, false, TypeInfo::Int32),
        ConvI8 => (VarType::Long, false, false, TypeInfo::Int64),
        ConvU1 => (VarType::UByte, false, false, TypeInfo::Int32),
        ConvU2 => (VarType::UShort, false, false, TypeInfo::Int32),
        ConvU4 => (VarType::UInt, false, false, TypeInfo::Int32),
        ConvU8 => (VarType::ULong, false, false, TypeInfo::Int64),
        ConvI => (native, false, false, TypeInfo::NativeInt),
        ConvU => (native_unsigned, false, false, TypeInfo::NativeInt),
        ConvR4 => (VarType::Float, false, false, TypeInfo::Float),
        ConvR8 => (VarType::Double, false, false, TypeInfo::Double),
        ConvRUn => (VarType::Double, false, true, TypeInfo::Double),
        ConvOvfI1 => (VarType::Byte, true, false, TypeInfo::Int32),
        ConvOvfI2 => (VarType::Short, true, false, TypeInfo::Int32),
        ConvOvfI4 => (VarType::Int, true, false, TypeInfo::Int32),
        ConvOvfI8 => (VarType::Long, true, false, TypeInfo::Int64),
        ConvOvfU1 => (VarType::UByte, true, false, TypeInfo::Int32),
        ConvOvfU2 => (VarType::UShort, true, false, TypeInfo::Int32),
        ConvOvfU4 => (VarType::UInt, true, false, TypeInfo::Int32),
        ConvOvfU8 => (VarType::ULong, true, false, TypeInfo::Int64),
        ConvOvfI => (native, true, false, TypeInfo::NativeInt),
        ConvOvfU => (native_unsigned, true, false, TypeInfo::NativeInt),
        ConvOvfI1Un => (VarType::Byte, true, true, TypeInfo::Int32),
        ConvOvfI2Un => (VarType::Short, true, true, TypeInfo::Int32),
        ConvOvfI4Un => (VarType::Int, true, true, TypeInfo::Int32),
        ConvOvfI8Un => (VarType::Long, true, true, TypeInfo::Int64),
        ConvOvfU1Un => (VarType::UByte, true, true, TypeInfo::Int32),
        ConvOvfU2Un => (VarType::UShort, true, true, TypeInfo::Int32),
        ConvOvfU4Un => (VarType::UInt, true, true, TypeInfo::Int32),
        ConvOvfU8Un => (VarType::ULong, true, true, TypeInfo::Int64),
        ConvOvfIUn => (native, true, true, TypeInfo::NativeInt),
        ConvOvfUUn => (native_unsigned, true, true, TypeInfo::NativeInt),
        _ => return None,
    })
}

/// Comparison operator and unsigned flag of a compare or two-operand
/// branch opcode.
pub(super) fn compare_op(opcode: Opcode) -> Option<(CompareOp, bool)> {
    use Opcode::*;
    Some(match opcode {
        Ceq | Beq | BeqS => (CompareOp::Eq, false),
        Cgt | Bgt | BgtS => (CompareOp::Gt, false),
        CgtUn | BgtUn | BgtUnS => (CompareOp::Gt, true),
        Clt | Blt | BltS => (CompareOp::Lt, false),
        CltUn | BltUn | BltUnS => (CompareOp::Lt, true),
        Bge | BgeS => (CompareOp::Ge, false),
        BgeUn | BgeUnS => (CompareOp::Ge, true),
        Ble | BleS => (CompareOp::Le, false),
        BleUn | BleUnS => (CompareOp::Le, true),
        BneUn | BneUnS => (CompareOp::Ne, true),
        _ => return None,
    })
}

impl Importer<'_> {
    fn literal(&self, node: NodeRef) -> Option<Const> {
        if self.config.fold_constants {
            Const::of(self.ctx.kind(node))
        } else {
            None
        }
    }

    pub(super) fn import_binary(&mut self, opcode: Opcode) -> ImportResult<()> {
        let Some((op, overflow, unsigned)) = binary_op(opcode) else {
            return Err(ImportError::internal(format!("{opcode} is not binary")));
        };
        let operands = self.pop_n(2)?;
        let (lhs, rhs) = (operands[0], operands[1]);
        let integer_only = overflow || unsigned || matches!(op, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor);
        let info = if op.is_shift() {
            shift_result(lhs.info, rhs.info)
        } else {
            arith_result(op, integer_only, lhs.info, rhs.info, &self.config.target)
        }
        .ok_or(BadCode::OperandMismatch {
            opcode,
            lhs: lhs.info,
            rhs: rhs.info,
        })?;
        let ty = info.var_type(&self.config.target);
        let (l, r) = if op.is_shift() {
            (lhs.node, rhs.node)
        } else {
            (
                self.widen_operand(lhs, ty, unsigned),
                self.widen_operand(rhs, ty, unsigned),
            )
        };
        if let (Some(a), Some(b)) = (self.literal(l), self.literal(r))
            && let Some(folded) = fold_binary(op, overflow, unsigned, ty, a, b)
        {
            let node = self.constant(folded, ty);
            return self.push(node, info);
        }
        let node = self.node(
            NodeKind::Binary {
                op,
                overflow,
                unsigned,
            },
            ty,
            [l, r],
        );
        self.push(node, info)
    }

    pub(super) fn import_unary(&mut self, opcode: Opcode) -> ImportResult<()> {
        let value = self.pop()?;
        let op = if opcode == Opcode::Neg {
            UnaryOp::Neg
        } else {
            UnaryOp::Not
        };
        let valid = value.info.is_integer() || (op == UnaryOp::Neg && value.info.is_floating());
        if !valid {
            return Err(BadCode::type_mismatch(opcode, value.info).into());
        }
        self.push_unary(op, value)
    }

    pub(super) fn import_ckfinite(&mut self) -> ImportResult<()> {
        let value = self.pop()?;
        if !value.info.is_floating() {
            return Err(BadCode::type_mismatch(Opcode::Ckfinite, value.info).into());
        }
        self.push_unary(UnaryOp::CkFinite, value)
    }

    fn push_unary(&mut self, op: UnaryOp, value: StackEntry) -> ImportResult<()> {
        let ty = self.ctx.ty(value.node);
        if let Some(v) = self.literal(value.node)
            && let Some(folded) = fold_unary(op, ty, v)
        {
            let node = self.constant(folded, ty);
            return self.push(node, value.info);
        }
        let node = self.node(NodeKind::Unary(op), ty, [value.node]);
        self.push(node, value.info)
    }

    pub(super) fn import_conv(&mut self, opcode: Opcode) -> ImportResult<()> {
        let native = self.native_int();
        let Some((to, overflow, mut from_unsigned, info)) = conversion(opcode, native) else {
            return Err(ImportError::internal(format!("{opcode} is not a conversion")));
        };
        let value = self.pop()?;
        let source_ok = match value.info {
            TypeInfo::Int32 | TypeInfo::Int64 | TypeInfo::NativeInt | TypeInfo::Float | TypeInfo::Double => true,
            TypeInfo::Byref | TypeInfo::Ref(_) | TypeInfo::Method(_) => {
                !overflow && matches!(to, VarType::Long | VarType::ULong | VarType::Int | VarType::UInt)
            }
            _ => false,
        };
        if !source_ok {
            return Err(BadCode::type_mismatch(opcode, value.info).into());
        }
        let from = self.ctx.ty(value.node);
        // Widening an int32 to an unsigned 64-bit type zero-extends.
        if from == VarType::Int && to == VarType::ULong && !overflow {
            from_unsigned = true;
        }
        let node = if from == to && !overflow {
            value.node
        } else {
            self.cast(value.node, to, from_unsigned, overflow)
        };
        self.push(node, info)
    }

    pub(super) fn import_compare(&mut self, opcode: Opcode) -> ImportResult<()> {
        let Some((op, unsigned)) = compare_op(opcode) else {
            return Err(ImportError::internal(format!("{opcode} is not a compare")));
        };
        let operands = self.pop_n(2)?;
        let node = self.build_compare(op, unsigned, operands[0], operands[1], opcode)?;
        self.push(node, TypeInfo::Int32)
    }

    /// A compare node of two stack operands, folded to `0`/`1` when both
    /// are literals.
    pub(super) fn build_compare(
        &mut self,
        op: CompareOp,
        unsigned: bool,
        lhs: StackEntry,
        rhs: StackEntry,
        opcode: Opcode,
    ) -> ImportResult<NodeRef> {
        let ty = compare_type(lhs.info, rhs.info, &self.config.target).ok_or(BadCode::OperandMismatch {
            opcode,
            lhs: lhs.info,
            rhs: rhs.info,
        })?;
        let l = self.widen_operand(lhs, ty, unsigned);
        let r = self.widen_operand(rhs, ty, unsigned);
        if let (Some(a), Some(b)) = (self.literal(l), self.literal(r))
            && let Some(result) = fold_compare(op, unsigned, ty, a, b)
        {
            return Ok(self.ctx.int_con(i64::from(result), VarType::Int));
        }
        Ok(self.node(NodeKind::Compare { op, unsigned }, VarType::Int, [l, r]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_pick_native_width() {
        assert_eq!(
            conversion(Opcode::ConvU, VarType::Long),
            Some((VarType::ULong, false, false, TypeInfo::NativeInt))
        );
        assert_eq!(
            conversion(Opcode::ConvOvfIUn, VarType::Int),
            Some((VarType::Int, true, true, TypeInfo::NativeInt))
        );
        assert_eq!(conversion(Opcode::Add, VarType::Int), None);
    }

    #[test]
    fn branch_opcodes_map_to_compares() {
        assert_eq!(compare_op(Opcode::BneUnS), Some((CompareOp::Ne, true)));
        assert_eq!(compare_op(Opcode::Bge), Some((CompareOp::Ge, false)));
        assert_eq!(compare_op(Opcode::CltUn), Some((CompareOp::Lt, true)));
        assert_eq!(compare_op(Opcode::Brtrue), None);
    }
}
