//! IR node kinds and per-kind effect rules.

use ilimport_bytecode::Token;
use smallvec::SmallVec;

use crate::effects::SideEffects;
use crate::refs::{ClassHandle, FieldHandle, LocalRef, MethodHandle, NodeRef};
use crate::types::VarType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    /// Throws if the floating operand is NaN or infinite, else yields it.
    CkFinite,
    /// Throws if the operand is null; yields nothing.
    NullCheck,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
}

impl BinaryOp {
    pub const fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
            BinaryOp::ShrUn => "shr.un",
        }
    }

    pub const fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::ShrUn)
    }

    pub const fn is_division(self) -> bool {
        matches!(self, BinaryOp::Div | BinaryOp::Rem)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub const fn name(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
        }
    }

    /// The comparison that holds exactly when `self` does not (for
    /// integers; for floats the unordered flag flips as well).
    pub const fn reverse(self) -> CompareOp {
        match self {
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Ge => CompareOp::Lt,
        }
    }
}

/// Runtime helpers the importer calls instead of open-coding an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Helper {
    Throw,
    Rethrow,
    VerificationFailure,
    NewObject,
    NewArray,
    Box,
    Unbox,
    UnboxNullable,
    IsInstanceOf,
    CheckCast,
    ArrayStoreCheck,
    TypeHandleToObject,
    Breakpoint,
    StackProbe,
}

impl Helper {
    pub const fn name(self) -> &'static str {
        match self {
            Helper::Throw => "throw",
            Helper::Rethrow => "rethrow",
            Helper::VerificationFailure => "verification_failure",
            Helper::NewObject => "new_object",
            Helper::NewArray => "new_array",
            Helper::Box => "box",
            Helper::Unbox => "unbox",
            Helper::UnboxNullable => "unbox_nullable",
            Helper::IsInstanceOf => "isinstanceof",
            Helper::CheckCast => "checkcast",
            Helper::ArrayStoreCheck => "array_store_check",
            Helper::TypeHandleToObject => "type_handle_to_object",
            Helper::Breakpoint => "breakpoint",
            Helper::StackProbe => "stack_probe",
        }
    }

    fn effects(self) -> SideEffects {
        match self {
            Helper::IsInstanceOf | Helper::TypeHandleToObject => SideEffects::CALL,
            _ => SideEffects::CALL | SideEffects::EXCEPT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// Direct call to a method.
    Method(MethodHandle),
    /// Virtual dispatch through `this`.
    Virtual(MethodHandle),
    /// Call through a function pointer; the pointer is the last operand.
    Indirect,
    Helper(Helper),
}

/// Runtime handle produced by `ldtoken`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeHandle {
    Class(ClassHandle),
    Method(MethodHandle),
    Field(FieldHandle),
}

/// The operator of a node. Operands live in [`NodeData::operands`]; the
/// comment on each variant lists their order.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// Integer constant; with type `Ref` and value 0 it is `null`.
    IntCon(i64),
    DblCon(f64),
    /// String literal, by `ldstr` token.
    StrCon(Token),
    Handle(RuntimeHandle),
    /// Read of a local.
    LclVar(LocalRef),
    /// Address of a local.
    LclAddr(LocalRef),
    /// Address of a static field.
    StaticAddr(FieldHandle),
    /// Address of an instance field: `[object]`.
    FieldAddr(FieldHandle),
    /// Exception object delivered to a catch or filter handler.
    CatchArg,
    /// Handle to the variable argument list.
    ArgList,
    /// Function pointer: `[]`, or `[object]` for virtual lookup.
    FtnAddr { method: MethodHandle, is_virtual: bool },
    /// `[operand]`
    Unary(UnaryOp),
    /// Numeric conversion: `[operand]`.
    Cast {
        to: VarType,
        from_unsigned: bool,
        overflow: bool,
    },
    /// `[lhs, rhs]`
    Binary {
        op: BinaryOp,
        overflow: bool,
        unsigned: bool,
    },
    /// Produces 0 or 1; `unsigned` means unordered for floats. `[lhs, rhs]`
    Compare { op: CompareOp, unsigned: bool },
    /// `[array]`
    ArrLen,
    /// Address of an array element: `[array, index]`.
    ArrElemAddr { elem: VarType, elem_size: u32 },
    /// Load of the node's type: `[address]`.
    Indir { volatile: bool },
    /// Load of a value type: `[address]`.
    Obj(ClassHandle),
    /// `[value]`
    StoreLcl(LocalRef),
    /// `[address, value]`
    StoreInd { ty: VarType, volatile: bool },
    /// Value-type copy: `[address, value]`.
    StoreBlk(ClassHandle),
    /// `[dest, src, size]`
    CopyBlk,
    /// `[dest, value, size]`
    InitBlk,
    /// Evaluate the first operand for effects, yield the second.
    Comma,
    /// Conditional jump terminator: `[condition]`.
    JTrue,
    /// `[selector]`
    Switch,
    /// `[]` or `[value]`
    Return,
    /// Filter result: `[value]`.
    ReturnFilter,
    /// Tail jump to a method with the same signature.
    Jmp(MethodHandle),
    /// Call: the operands are the arguments (`this` first).
    Call { target: CallTarget, tail: bool },
    /// `[size]`
    LocAlloc,
    /// `[address]`
    MkRefAny(ClassHandle),
    /// `[typed reference]`
    RefAnyVal(ClassHandle),
    /// `[typed reference]`
    RefAnyType,
    Nop,
}

impl NodeKind {
    /// Mnemonic used by the printer.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::IntCon(_) | NodeKind::DblCon(_) => "const",
            NodeKind::StrCon(_) => "str",
            NodeKind::Handle(_) => "handle",
            NodeKind::LclVar(_) => "lcl",
            NodeKind::LclAddr(_) => "addr",
            NodeKind::StaticAddr(_) => "static.addr",
            NodeKind::FieldAddr(_) => "field.addr",
            NodeKind::CatchArg => "catch.arg",
            NodeKind::ArgList => "arglist",
            NodeKind::FtnAddr { is_virtual: false, .. } => "ftn",
            NodeKind::FtnAddr { is_virtual: true, .. } => "virtftn",
            NodeKind::Unary(UnaryOp::Neg) => "neg",
            NodeKind::Unary(UnaryOp::Not) => "not",
            NodeKind::Unary(UnaryOp::CkFinite) => "ckfinite",
            NodeKind::Unary(UnaryOp::NullCheck) => "nullcheck",
            NodeKind::Cast { overflow: false, .. } => "conv",
            NodeKind::Cast { overflow: true, .. } => "conv.ovf",
            NodeKind::Binary { op, .. } => op.name(),
            NodeKind::Compare { op, .. } => op.name(),
            NodeKind::ArrLen => "arrlen",
            NodeKind::ArrElemAddr { .. } => "elem.addr",
            NodeKind::Indir { .. } => "ind",
            NodeKind::Obj(_) => "obj",
            NodeKind::StoreLcl(_) => "store",
            NodeKind::StoreInd { .. } => "store.ind",
            NodeKind::StoreBlk(_) => "store.blk",
            NodeKind::CopyBlk => "cpblk",
            NodeKind::InitBlk => "initblk",
            NodeKind::Comma => "comma",
            NodeKind::JTrue => "jtrue",
            NodeKind::Switch => "switch",
            NodeKind::Return => "return",
            NodeKind::ReturnFilter => "return.filter",
            NodeKind::Jmp(_) => "jmp",
            NodeKind::Call { .. } => "call",
            NodeKind::LocAlloc => "localloc",
            NodeKind::MkRefAny(_) => "mkrefany",
            NodeKind::RefAnyVal(_) => "refanyval",
            NodeKind::RefAnyType => "refanytype",
            NodeKind::Nop => "nop",
        }
    }

    /// Effects contributed by the operator itself, excluding operands.
    ///
    /// Effects that depend on local descriptors (address exposure) or on
    /// operand shapes (safe divisors) are added by
    /// [`IrContext::new_node`](crate::IrContext::new_node).
    pub fn own_effects(&self, ty: VarType) -> SideEffects {
        match self {
            NodeKind::CatchArg => SideEffects::ORDER_SIDEEFF,
            NodeKind::StoreLcl(_) => SideEffects::ASG,
            NodeKind::FieldAddr(_)
            | NodeKind::ArrLen
            | NodeKind::ArrElemAddr { .. }
            | NodeKind::RefAnyVal(_) => SideEffects::EXCEPT,
            NodeKind::FtnAddr {
                is_virtual: true, ..
            } => SideEffects::EXCEPT,
            NodeKind::Unary(UnaryOp::CkFinite | UnaryOp::NullCheck) => SideEffects::EXCEPT,
            NodeKind::Cast { overflow: true, .. } => SideEffects::EXCEPT,
            NodeKind::Binary { overflow: true, .. } => SideEffects::EXCEPT,
            NodeKind::Binary { op, .. } if op.is_division() && ty.is_integral() => {
                SideEffects::EXCEPT
            }
            NodeKind::Indir { .. } | NodeKind::Obj(_) => SideEffects::EXCEPT | SideEffects::GLOB_REF,
            NodeKind::StoreInd { .. }
            | NodeKind::StoreBlk(_)
            | NodeKind::CopyBlk
            | NodeKind::InitBlk => SideEffects::ASG | SideEffects::EXCEPT | SideEffects::GLOB_REF,
            NodeKind::Call {
                target: CallTarget::Helper(helper),
                ..
            } => helper.effects(),
            NodeKind::Call { .. } | NodeKind::Jmp(_) => {
                SideEffects::CALL | SideEffects::EXCEPT | SideEffects::GLOB_REF
            }
            NodeKind::LocAlloc => SideEffects::CALL | SideEffects::EXCEPT,
            _ => SideEffects::empty(),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, NodeKind::IntCon(_) | NodeKind::DblCon(_))
    }

    pub fn int_value(&self) -> Option<i64> {
        match *self {
            NodeKind::IntCon(v) => Some(v),
            _ => None,
        }
    }

    pub fn local(&self) -> Option<LocalRef> {
        match *self {
            NodeKind::LclVar(l) | NodeKind::LclAddr(l) | NodeKind::StoreLcl(l) => Some(l),
            _ => None,
        }
    }

    /// Whether this node ends a block's statement list.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            NodeKind::JTrue
                | NodeKind::Switch
                | NodeKind::Return
                | NodeKind::ReturnFilter
                | NodeKind::Jmp(_)
        )
    }
}

/// Storage for one node in the arena.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeData {
    pub kind: NodeKind,
    pub ty: VarType,
    /// Class of a `Ref`/`Struct` value when known.
    pub class: Option<ClassHandle>,
    pub operands: SmallVec<[NodeRef; 2]>,
    /// Own effects unioned with operand effects.
    pub effects: SideEffects,
}

impl NodeData {
    pub fn operand(&self, index: usize) -> NodeRef {
        self.operands[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_effects_depend_on_type() {
        let div = NodeKind::Binary {
            op: BinaryOp::Div,
            overflow: false,
            unsigned: false,
        };
        assert_eq!(div.own_effects(VarType::Int), SideEffects::EXCEPT);
        assert_eq!(div.own_effects(VarType::Double), SideEffects::empty());
    }

    #[test]
    fn helper_call_effects() {
        let isinst = NodeKind::Call {
            target: CallTarget::Helper(Helper::IsInstanceOf),
            tail: false,
        };
        assert_eq!(isinst.own_effects(VarType::Ref), SideEffects::CALL);
        let user = NodeKind::Call {
            target: CallTarget::Method(MethodHandle(1)),
            tail: false,
        };
        assert!(user.own_effects(VarType::Void).contains(SideEffects::GLOB_REF));
    }

    #[test]
    fn compare_reverse_is_involution() {
        for op in [
            CompareOp::Eq,
            CompareOp::Ne,
            CompareOp::Lt,
            CompareOp::Le,
            CompareOp::Gt,
            CompareOp::Ge,
        ] {
            assert_eq!(op.reverse().reverse(), op);
        }
    }
}
