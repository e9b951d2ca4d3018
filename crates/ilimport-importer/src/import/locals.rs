//! Argument and local access, literals and plain stack manipulation.

use ilimport_bytecode::{Instruction, Opcode, Operand, Token};
use ilimport_ir::{LocalRef, NodeKind, StackEntry, TypeInfo, VarType};

use super::Importer;
use super::inline::ArgBinding;
use crate::error::{BadCode, ImportError, ImportResult};
use crate::resolver::{ResolvedToken, WellKnownClass};

impl Importer<'_> {
    fn il_local(&self, index: u16) -> ImportResult<LocalRef> {
        self.il_locals
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| BadCode::InvalidLocal(index).into())
    }

    /// The local an argument lives in, allocating the temp of an inlinee
    /// argument on first use.
    fn arg_local(&mut self, index: u16) -> ImportResult<LocalRef> {
        if self.inline.is_some() {
            return self.inline_arg_local(index);
        }
        self.args
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| BadCode::InvalidArg(index).into())
    }

    pub(super) fn push_local(&mut self, local: LocalRef) -> ImportResult<()> {
        let node = self.ctx.lcl_var(local);
        let info = self.local_info(local);
        self.push(node, info)
    }

    /// Store the top of the stack into `local`.
    fn store_top(&mut self, local: LocalRef, opcode: Opcode) -> ImportResult<()> {
        let value = self.pop()?;
        let desc = self.ctx.local(local);
        let (ty, class) = (desc.ty, desc.class);
        let node = self.coerce_for_store(value, ty, class, opcode)?;
        let store = self.ctx.store_lcl(local, node);
        self.ctx.local_mut(local).record_def();
        let depth = self.stack.depth();
        self.append_stmt(store, depth);
        Ok(())
    }

    pub(super) fn import_ldarg(&mut self, index: u16) -> ImportResult<()> {
        if let Some(frame) = &self.inline {
            let arg = frame
                .args
                .get(usize::from(index))
                .ok_or(BadCode::InvalidArg(index))?;
            let (binding, info) = (arg.binding, arg.info);
            match binding {
                ArgBinding::Constant(node) => {
                    let copy = self.ctx.clone_tree(node);
                    return self.push(copy, info);
                }
                ArgBinding::LocalAddr(local) => {
                    let addr = self.ctx.lcl_addr(local);
                    return self.push(addr, TypeInfo::Byref);
                }
                // Read the caller's local, typed as the formal.
                ArgBinding::Local(local) => {
                    let read = self.ctx.lcl_var(local);
                    let ty = info.var_type(&self.config.target).actual();
                    self.ctx.retype(read, ty);
                    self.ctx.set_class(read, info.class());
                    return self.push(read, info);
                }
                ArgBinding::Temp(_) => {}
            }
        }
        let local = self.arg_local(index)?;
        self.push_local(local)
    }

    pub(super) fn import_ldarga(&mut self, index: u16) -> ImportResult<()> {
        let local = self.arg_local(index)?;
        self.ctx.local_mut(local).address_exposed = true;
        let addr = self.ctx.lcl_addr(local);
        self.push(addr, TypeInfo::Byref)
    }

    pub(super) fn import_starg(&mut self, index: u16) -> ImportResult<()> {
        let local = self.arg_local(index)?;
        self.store_top(local, Opcode::Starg)
    }

    pub(super) fn import_ldloc(&mut self, index: u16) -> ImportResult<()> {
        let local = self.il_local(index)?;
        self.push_local(local)
    }

    pub(super) fn import_ldloca(&mut self, index: u16) -> ImportResult<()> {
        let local = self.il_local(index)?;
        self.ctx.local_mut(local).address_exposed = true;
        let addr = self.ctx.lcl_addr(local);
        self.push(addr, TypeInfo::Byref)
    }

    pub(super) fn import_stloc(&mut self, index: u16) -> ImportResult<()> {
        let local = self.il_local(index)?;
        self.store_top(local, Opcode::Stloc)
    }

    pub(super) fn import_constant(&mut self, insn: &Instruction) -> ImportResult<()> {
        use Opcode::*;
        let int = |v: i32| -> i64 { v.into() };
        let (node, info) = match (insn.opcode, &insn.operand) {
            (Ldnull, _) => (self.ctx.null(), TypeInfo::Null),
            (LdcI4M1, _) => (self.ctx.int_con(-1, VarType::Int), TypeInfo::Int32),
            (LdcI40 | LdcI41 | LdcI42 | LdcI43 | LdcI44 | LdcI45 | LdcI46 | LdcI47 | LdcI48, _) => {
                let v = insn.opcode.encoding() as i64 - LdcI40.encoding() as i64;
                (self.ctx.int_con(v, VarType::Int), TypeInfo::Int32)
            }
            (LdcI4S | LdcI4, &Operand::Int(v)) => (self.ctx.int_con(int(v), VarType::Int), TypeInfo::Int32),
            (LdcI8, &Operand::Long(v)) => (self.ctx.int_con(v, VarType::Long), TypeInfo::Int64),
            (LdcR4, &Operand::Float(v)) => (self.ctx.dbl_con(f64::from(v), VarType::Float), TypeInfo::Float),
            (LdcR8, &Operand::Double(v)) => (self.ctx.dbl_con(v, VarType::Double), TypeInfo::Double),
            _ => return Err(ImportError::internal(format!("{insn} is not a literal"))),
        };
        self.push(node, info)
    }

    pub(super) fn import_ldstr(&mut self, token: Token) -> ImportResult<()> {
        if self.resolve(token)? != ResolvedToken::String {
            return Err(BadCode::UnexpectedToken {
                token,
                expected: "string",
            }
            .into());
        }
        let string = self.well_known(WellKnownClass::String)?;
        let node = self.node(NodeKind::StrCon(token), VarType::Ref, []);
        self.ctx.set_class(node, Some(string));
        self.push(node, TypeInfo::Ref(Some(string)))
    }

    pub(super) fn import_dup(&mut self) -> ImportResult<()> {
        let depth = self.stack.depth();
        let top = self.stack.peek(0).copied().ok_or(BadCode::StackUnderflow)?;
        if !self.ctx.is_cloneable(top.node) {
            self.force_spill(depth - 1, None, "dup spill");
        }
        let top = self.stack.get(depth - 1);
        let copy = self.ctx.clone_tree(top.node);
        self.push(copy, top.info)
    }

    pub(super) fn import_pop(&mut self) -> ImportResult<()> {
        let StackEntry { node, .. } = self.pop()?;
        if self.ctx.effects(node).has_side_effects() {
            let depth = self.stack.depth();
            self.append_stmt(node, depth);
        }
        Ok(())
    }
}
