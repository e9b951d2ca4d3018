//! Boxing, casts, runtime handles and typed references.

use ilimport_bytecode::{Instruction, Opcode, Token};
use ilimport_ir::{
    BinaryOp, ClassHandle, Helper, NodeKind, RuntimeHandle, StackEntry, TypeInfo, VarType,
};

use super::Importer;
use crate::error::{BadCode, ImportResult};
use crate::resolver::{ResolvedToken, SigType, TypeCompareState, WellKnownClass};

impl Importer<'_> {
    /// Box `entry` as an instance of `class`.
    ///
    /// Boxing a reference type leaves the value alone. A plain value type is
    /// copied into a freshly allocated object held in a temp.
    pub(super) fn box_value(&mut self, entry: StackEntry, class: ClassHandle) -> ImportResult<StackEntry> {
        let info = self.class_info(class)?;
        if !info.is_value_type {
            return Ok(entry);
        }
        if info.is_nullable() {
            let handle = self.class_handle(class);
            let node = self.call_helper(Helper::Box, VarType::Ref, [handle, entry.node]);
            let boxed = info.nullable_of;
            self.ctx.set_class(node, boxed);
            return Ok(StackEntry {
                node,
                info: TypeInfo::Ref(boxed),
            });
        }

        let ty = info.sig_type(class);
        let dest = ty.var_type(&self.config.target);
        let mut value = self.coerce_for_store(entry, dest, ty.class(), Opcode::Box)?;
        let depth = self.stack.depth();
        if self.ctx.effects(value).has_side_effects() {
            let temp = self.ctx.grab_temp("box value", dest);
            self.ctx.local_mut(temp).class = ty.class();
            let store = self.ctx.store_lcl(temp, value);
            self.ctx.local_mut(temp).record_def();
            self.append_stmt(store, depth);
            value = self.ctx.lcl_var(temp);
        }

        let boxed = TypeInfo::Ref(Some(class));
        let temp = self.ctx.grab_temp("box", VarType::Ref);
        self.ctx.local_mut(temp).class = Some(class);
        self.local_infos[temp] = Some(boxed);
        let handle = self.class_handle(class);
        let alloc = self.call_helper(Helper::NewObject, VarType::Ref, [handle]);
        self.ctx.set_class(alloc, Some(class));
        let store = self.ctx.store_lcl(temp, alloc);
        self.ctx.local_mut(temp).record_def();
        self.append_stmt(store, depth);

        // The payload sits right after the method table pointer.
        let object = self.ctx.lcl_var(temp);
        let (pointer_size, native) = (self.config.target.pointer_size(), self.native_int());
        let offset = self.ctx.int_con(i64::from(pointer_size), native);
        let payload = self.node(
            NodeKind::Binary {
                op: BinaryOp::Add,
                overflow: false,
                unsigned: false,
            },
            VarType::Byref,
            [object, offset],
        );
        let copy = match ty {
            SigType::ValueType(c) => self.node(NodeKind::StoreBlk(c), VarType::Void, [payload, value]),
            _ => self.node(
                NodeKind::StoreInd {
                    ty: dest,
                    volatile: false,
                },
                VarType::Void,
                [payload, value],
            ),
        };
        self.append_stmt(copy, depth);

        let node = self.ctx.lcl_var(temp);
        Ok(StackEntry { node, info: boxed })
    }

    pub(super) fn import_box(&mut self, insns: &[Instruction], i: usize, token: Token) -> ImportResult<usize> {
        let class = self.resolve_class(token)?;
        let info = self.class_info(class)?;
        if self.config.box_patterns
            && info.is_value_type
            && !info.is_nullable()
            && let Some(consumed) = self.match_box_pattern(insns, i, class)?
        {
            return Ok(consumed);
        }
        let value = self.pop()?;
        let boxed = self.box_value(value, class)?;
        self.push(boxed.node, boxed.info)?;
        Ok(1)
    }

    pub(super) fn import_unbox(&mut self, token: Token) -> ImportResult<()> {
        let class = self.resolve_class(token)?;
        let object = self.pop()?;
        if !object.info.is_object() {
            return Err(BadCode::type_mismatch(Opcode::Unbox, object.info).into());
        }
        let handle = self.class_handle(class);
        let node = self.call_helper(Helper::Unbox, VarType::Byref, [handle, object.node]);
        self.push(node, TypeInfo::Byref)
    }

    pub(super) fn import_unbox_any(&mut self, token: Token) -> ImportResult<()> {
        let class = self.resolve_class(token)?;
        let info = self.class_info(class)?;
        if !info.is_value_type {
            return self.import_cast(Opcode::Castclass, token);
        }
        let object = self.pop()?;
        if !object.info.is_object() {
            return Err(BadCode::type_mismatch(Opcode::UnboxAny, object.info).into());
        }
        let handle = self.class_handle(class);
        if info.is_nullable() {
            let node = self.call_helper(Helper::UnboxNullable, VarType::Struct, [handle, object.node]);
            self.ctx.set_class(node, Some(class));
            return self.push(node, TypeInfo::Struct(class));
        }
        let addr = self.call_helper(Helper::Unbox, VarType::Byref, [handle, object.node]);
        let loaded = self.load_from(addr, info.sig_type(class), false);
        self.push(loaded.node, loaded.info)
    }

    /// `castclass` and `isinst`, folded when the operand's class decides
    /// the outcome statically.
    pub(super) fn import_cast(&mut self, opcode: Opcode, token: Token) -> ImportResult<()> {
        let class = self.resolve_class(token)?;
        let object = self.pop()?;
        if !object.info.is_object() {
            return Err(BadCode::type_mismatch(opcode, object.info).into());
        }
        let is_isinst = opcode == Opcode::Isinst;

        if self.config.fold_constants {
            if self.ctx.is_null_constant(object.node) {
                return self.push(object.node, TypeInfo::Null);
            }
            if let TypeInfo::Ref(Some(from)) = object.info {
                match self.resolver.compare_types_for_cast(from, class) {
                    TypeCompareState::Must => {
                        tracing::trace!(%from, to = %class, "cast always succeeds");
                        return self.push(object.node, object.info);
                    }
                    TypeCompareState::MustNot if is_isinst => {
                        tracing::trace!(%from, to = %class, "isinst always fails");
                        let null = self.ctx.null();
                        let node = if self.ctx.effects(object.node).has_side_effects() {
                            self.node(NodeKind::Comma, VarType::Ref, [object.node, null])
                        } else {
                            null
                        };
                        return self.push(node, TypeInfo::Null);
                    }
                    _ => {}
                }
            }
        }

        let helper = if is_isinst {
            Helper::IsInstanceOf
        } else {
            Helper::CheckCast
        };
        let handle = self.class_handle(class);
        let node = self.call_helper(helper, VarType::Ref, [handle, object.node]);
        self.ctx.set_class(node, Some(class));
        self.push(node, TypeInfo::Ref(Some(class)))
    }

    pub(super) fn import_ldtoken(&mut self, token: Token) -> ImportResult<()> {
        let (handle, which) = match self.resolve(token)? {
            ResolvedToken::Class(c) => (RuntimeHandle::Class(c), WellKnownClass::RuntimeTypeHandle),
            ResolvedToken::Method(m) => (RuntimeHandle::Method(m), WellKnownClass::RuntimeMethodHandle),
            ResolvedToken::Field(f) => (RuntimeHandle::Field(f), WellKnownClass::RuntimeFieldHandle),
            ResolvedToken::String => {
                return Err(BadCode::UnexpectedToken {
                    token,
                    expected: "class, method or field",
                }
                .into());
            }
        };
        let class = self.well_known(which)?;
        let node = self.node(NodeKind::Handle(handle), VarType::Struct, []);
        self.ctx.set_class(node, Some(class));
        self.push(node, TypeInfo::Struct(class))
    }

    pub(super) fn import_mkrefany(&mut self, token: Token) -> ImportResult<()> {
        let class = self.resolve_class(token)?;
        let addr = self.pop()?;
        if !matches!(addr.info, TypeInfo::Byref | TypeInfo::NativeInt) {
            return Err(BadCode::type_mismatch(Opcode::Mkrefany, addr.info).into());
        }
        let typed_ref = self.well_known(WellKnownClass::TypedReference)?;
        let node = self.node(NodeKind::MkRefAny(class), VarType::Struct, [addr.node]);
        self.ctx.set_class(node, Some(typed_ref));
        self.push(node, TypeInfo::Struct(typed_ref))
    }

    fn pop_typed_reference(&mut self, opcode: Opcode) -> ImportResult<StackEntry> {
        let typed_ref = self.well_known(WellKnownClass::TypedReference)?;
        let entry = self.pop()?;
        if entry.info != TypeInfo::Struct(typed_ref) {
            return Err(BadCode::type_mismatch(opcode, entry.info).into());
        }
        Ok(entry)
    }

    pub(super) fn import_refanyval(&mut self, token: Token) -> ImportResult<()> {
        let class = self.resolve_class(token)?;
        let typed_ref = self.pop_typed_reference(Opcode::Refanyval)?;
        let node = self.node(NodeKind::RefAnyVal(class), VarType::Byref, [typed_ref.node]);
        self.push(node, TypeInfo::Byref)
    }

    pub(super) fn import_refanytype(&mut self) -> ImportResult<()> {
        let typed_ref = self.pop_typed_reference(Opcode::Refanytype)?;
        let handle_class = self.well_known(WellKnownClass::RuntimeTypeHandle)?;
        let node = self.node(NodeKind::RefAnyType, VarType::Struct, [typed_ref.node]);
        self.ctx.set_class(node, Some(handle_class));
        self.push(node, TypeInfo::Struct(handle_class))
    }

    pub(super) fn import_arglist(&mut self) -> ImportResult<()> {
        if !self.info.sig.is_varargs {
            return Err(BadCode::ArglistNotVarargs.into());
        }
        let class = self.well_known(WellKnownClass::RuntimeArgumentHandle)?;
        let node = self.node(NodeKind::ArgList, VarType::Struct, []);
        self.ctx.set_class(node, Some(class));
        self.push(node, TypeInfo::Struct(class))
    }
}
