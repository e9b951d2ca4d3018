//! Calls, object construction and function pointers.

use ilimport_bytecode::{Opcode, Token};
use ilimport_ir::{CallTarget, Helper, NodeKind, NodeRef, StackEntry, TypeInfo, VarType};

use super::Importer;
use super::prefix::Prefixes;
use crate::error::{BadCode, ImportResult};
use crate::resolver::{MethodInfo, SigType};

impl Importer<'_> {
    /// Coerce popped arguments to the formal types of `info`, `this` first.
    fn coerce_args(
        &mut self,
        info: &MethodInfo,
        args: Vec<StackEntry>,
        opcode: Opcode,
    ) -> ImportResult<Vec<StackEntry>> {
        let mut formals = Vec::with_capacity(args.len());
        if info.sig.has_this {
            formals.push(self.this_type(info.owner)?);
        }
        formals.extend(info.sig.params.iter().copied());
        let target = self.config.target;
        let mut coerced = Vec::with_capacity(args.len());
        for (arg, formal) in args.into_iter().zip(formals) {
            let node = match (formal, arg.info) {
                // `this` of a value type method may be a boxed value or a
                // pointer.
                (SigType::Byref, TypeInfo::Ref(_)) => arg.node,
                _ => self.coerce_for_store(arg, formal.var_type(&target), formal.class(), opcode)?,
            };
            coerced.push(StackEntry { node, info: arg.info });
        }
        Ok(coerced)
    }

    /// Push a call's result, or append it as a statement when it has none.
    fn finish_call(&mut self, call: NodeRef, ret: SigType) -> ImportResult<()> {
        match ret.type_info() {
            Some(info) => {
                self.ctx.set_class(call, ret.class());
                self.push(call, info)
            }
            None => {
                let depth = self.stack.depth();
                self.append_stmt(call, depth);
                Ok(())
            }
        }
    }

    fn call_type(&self, ret: SigType) -> VarType {
        ret.var_type(&self.config.target).actual()
    }

    pub(super) fn import_call(&mut self, opcode: Opcode, token: Token, prefixes: &Prefixes) -> ImportResult<()> {
        let method = self.resolve_method(token)?;
        let info = self.method_info(method)?;
        let is_callvirt = opcode == Opcode::Callvirt;
        let mut args = self.pop_n(info.sig.arg_count())?;
        if is_callvirt && !info.sig.has_this {
            return Err(BadCode::type_mismatch(opcode, TypeInfo::Null).into());
        }

        let mut direct = !is_callvirt || info.is_devirtualizable();
        if let Some(constrained) = prefixes.constrained {
            let class = self.resolve_class(constrained)?;
            let class_info = self.class_info(class)?;
            let this = args[0];
            if this.info != TypeInfo::Byref {
                return Err(BadCode::type_mismatch(opcode, this.info).into());
            }
            if !class_info.is_value_type {
                let object = self.node(NodeKind::Indir { volatile: false }, VarType::Ref, [this.node]);
                self.ctx.set_class(object, Some(class));
                args[0] = StackEntry {
                    node: object,
                    info: TypeInfo::Ref(Some(class)),
                };
            } else if info.owner == class {
                direct = true;
            } else {
                let value = self.load_from(this.node, class_info.sig_type(class), false);
                args[0] = self.box_value(value, class)?;
            }
        }
        if is_callvirt && let Some(this) = args.first()
            && !(this.info.is_object() || this.info == TypeInfo::Byref)
        {
            return Err(BadCode::type_mismatch(opcode, this.info).into());
        }

        let args = self.coerce_args(info, args, opcode)?;
        if self.config.inline.enabled
            && !prefixes.tail
            && !info.sig.is_varargs
            && self.try_inline(method, info, &args, direct, is_callvirt)?
        {
            return Ok(());
        }

        let target = if direct {
            CallTarget::Method(method)
        } else {
            CallTarget::Virtual(method)
        };
        let ty = self.call_type(info.sig.ret);
        let call = self.node(
            NodeKind::Call {
                target,
                tail: prefixes.tail,
            },
            ty,
            args.iter().map(|a| a.node),
        );
        self.finish_call(call, info.sig.ret)
    }

    pub(super) fn import_calli(&mut self, token: Token, prefixes: &Prefixes) -> ImportResult<()> {
        let method = self.resolve_method(token)?;
        let info = self.method_info(method)?;
        let fnptr = self.pop()?;
        if !matches!(fnptr.info, TypeInfo::NativeInt | TypeInfo::Method(_)) {
            return Err(BadCode::type_mismatch(Opcode::Calli, fnptr.info).into());
        }
        let args = self.pop_n(info.sig.arg_count())?;
        let args = self.coerce_args(info, args, Opcode::Calli)?;
        let ty = self.call_type(info.sig.ret);
        let operands: Vec<NodeRef> = args.iter().map(|a| a.node).chain([fnptr.node]).collect();
        let call = self.node(
            NodeKind::Call {
                target: CallTarget::Indirect,
                tail: prefixes.tail,
            },
            ty,
            operands,
        );
        self.finish_call(call, info.sig.ret)
    }

    pub(super) fn import_newobj(&mut self, token: Token) -> ImportResult<()> {
        let ctor = self.resolve_method(token)?;
        let info = self.method_info(ctor)?;
        if !info.is_ctor || !info.sig.has_this {
            return Err(BadCode::UnexpectedToken {
                token,
                expected: "constructor",
            }
            .into());
        }
        let class = info.owner;
        let class_info = self.class_info(class)?;
        let params = self.pop_n(info.sig.params.len())?;
        let target = self.config.target;
        let mut operands = Vec::with_capacity(params.len() + 1);
        operands.push(None);
        for (arg, formal) in params.into_iter().zip(info.sig.params.iter()) {
            let node = self.coerce_for_store(arg, formal.var_type(&target), formal.class(), Opcode::Newobj)?;
            operands.push(Some(node));
        }
        let depth = self.stack.depth();

        let ty = class_info.sig_type(class);
        let (temp, this, result) = if class_info.is_value_type {
            let var_type = ty.var_type(&target);
            let temp = self.ctx.grab_temp("newobj value", var_type);
            self.ctx.local_mut(temp).class = ty.class();
            let result = ty.type_info().unwrap_or(TypeInfo::Struct(class));
            self.local_infos[temp] = Some(result);
            let this = self.ctx.lcl_addr(temp);
            (temp, this, result)
        } else {
            let result = TypeInfo::Ref(Some(class));
            let temp = self.ctx.grab_temp("newobj", VarType::Ref);
            self.ctx.local_mut(temp).class = Some(class);
            self.local_infos[temp] = Some(result);
            let handle = self.class_handle(class);
            let alloc = self.call_helper(Helper::NewObject, VarType::Ref, [handle]);
            self.ctx.set_class(alloc, Some(class));
            let store = self.ctx.store_lcl(temp, alloc);
            self.ctx.local_mut(temp).record_def();
            self.append_stmt(store, depth);
            let this = self.ctx.lcl_var(temp);
            (temp, this, result)
        };
        operands[0] = Some(this);

        let call = self.node(
            NodeKind::Call {
                target: CallTarget::Method(ctor),
                tail: false,
            },
            VarType::Void,
            operands.into_iter().flatten(),
        );
        self.append_stmt(call, depth);
        if class_info.is_value_type {
            self.ctx.local_mut(temp).record_def();
        }
        let read = self.ctx.lcl_var(temp);
        self.push(read, result)
    }

    pub(super) fn import_jmp(&mut self, token: Token) -> ImportResult<()> {
        let method = self.resolve_method(token)?;
        let block = self.ctx.block(self.block);
        if block.try_index.is_some() || block.handler_index.is_some() {
            return Err(BadCode::IllegalInRegion(Opcode::Jmp).into());
        }
        if !self.stack.is_empty() {
            return Err(BadCode::JmpStackNotEmpty.into());
        }
        let jmp = self.node(NodeKind::Jmp(method), VarType::Void, []);
        self.append_stmt(jmp, 0);
        Ok(())
    }

    pub(super) fn import_ldftn(&mut self, token: Token, is_virtual: bool) -> ImportResult<()> {
        let method = self.resolve_method(token)?;
        let native = self.native_int();
        let node = if is_virtual {
            let object = self.pop()?;
            if !object.info.is_object() {
                return Err(BadCode::type_mismatch(Opcode::Ldvirtftn, object.info).into());
            }
            self.node(
                NodeKind::FtnAddr {
                    method,
                    is_virtual: true,
                },
                native,
                [object.node],
            )
        } else {
            self.node(
                NodeKind::FtnAddr {
                    method,
                    is_virtual: false,
                },
                native,
                [],
            )
        };
        self.push(node, TypeInfo::Method(method))
    }
}
