//! Branches, returns and throws.

use ilimport_bytecode::Opcode;
use ilimport_ir::{CompareOp, Helper, JumpKind, NodeKind, StackEntry, TypeInfo, VarType};

use super::Importer;
use super::arith::compare_op;
use crate::error::{BadCode, ImportError, ImportResult};

impl Importer<'_> {
    pub(super) fn import_cond_branch(&mut self, opcode: Opcode) -> ImportResult<()> {
        let condition = match opcode {
            Opcode::Brtrue | Opcode::BrtrueS | Opcode::Brfalse | Opcode::BrfalseS => {
                let value = self.pop()?;
                let op = if matches!(opcode, Opcode::Brtrue | Opcode::BrtrueS) {
                    CompareOp::Ne
                } else {
                    CompareOp::Eq
                };
                let zero = match value.info {
                    TypeInfo::Int32 | TypeInfo::Int64 | TypeInfo::NativeInt | TypeInfo::Method(_) => {
                        let ty = self.ctx.ty(value.node);
                        self.ctx.int_con(0, ty)
                    }
                    TypeInfo::Null | TypeInfo::Ref(_) => self.ctx.null(),
                    TypeInfo::Byref => self.ctx.int_con(0, VarType::Byref),
                    _ => return Err(BadCode::type_mismatch(opcode, value.info).into()),
                };
                let zero_info = if value.info.is_object() {
                    TypeInfo::Null
                } else {
                    value.info
                };
                self.build_compare(
                    op,
                    false,
                    value,
                    StackEntry {
                        node: zero,
                        info: zero_info,
                    },
                    opcode,
                )?
            }
            _ => {
                let Some((op, unsigned)) = compare_op(opcode) else {
                    return Err(ImportError::internal(format!("{opcode} is not a branch")));
                };
                let operands = self.pop_n(2)?;
                self.build_compare(op, unsigned, operands[0], operands[1], opcode)?
            }
        };
        if let Some(v) = self.ctx.kind(condition).int_value() {
            self.fold_branch(v != 0);
            return Ok(());
        }
        let jtrue = self.node(NodeKind::JTrue, VarType::Void, [condition]);
        let depth = self.stack.depth();
        self.append_stmt(jtrue, depth);
        Ok(())
    }

    /// Replace the current block's two-way jump by the arm a literal
    /// condition selects.
    pub(super) fn fold_branch(&mut self, taken: bool) {
        if let JumpKind::Cond { taken: t, next } = self.ctx.block(self.block).jump {
            let jump = if taken {
                JumpKind::Always(t)
            } else {
                JumpKind::Next(next)
            };
            tracing::debug!(block = %self.block, taken, "folded conditional branch");
            self.ctx.set_jump(self.block, jump);
        }
    }

    pub(super) fn import_switch(&mut self) -> ImportResult<()> {
        let selector = self.pop()?;
        let node = match selector.info {
            TypeInfo::Int32 => selector.node,
            TypeInfo::NativeInt => self.cast(selector.node, VarType::Int, false, false),
            other => return Err(BadCode::type_mismatch(Opcode::Switch, other).into()),
        };
        if self.config.fold_constants
            && let Some(v) = self.ctx.kind(node).int_value()
            && let JumpKind::Switch { targets, default } = &self.ctx.block(self.block).jump
        {
            let jump = match targets.get(v as u32 as usize) {
                Some(&target) => JumpKind::Always(target),
                None => JumpKind::Next(*default),
            };
            self.ctx.set_jump(self.block, jump);
            return Ok(());
        }
        let switch = self.node(NodeKind::Switch, VarType::Void, [node]);
        let depth = self.stack.depth();
        self.append_stmt(switch, depth);
        Ok(())
    }

    pub(super) fn import_ret(&mut self) -> ImportResult<()> {
        let block = self.ctx.block(self.block);
        if block.try_index.is_some() || block.handler_index.is_some() {
            return Err(BadCode::IllegalInRegion(Opcode::Ret).into());
        }
        let ret = self.info.sig.ret;
        let value = match ret.type_info() {
            None => None,
            Some(ret_info) => {
                let entry = self.pop()?;
                let node = self.coerce_for_store(entry, ret.var_type(&self.config.target), ret.class(), Opcode::Ret)?;
                let info = match (ret_info, entry.info) {
                    (TypeInfo::Ref(_), TypeInfo::Ref(Some(class))) => TypeInfo::Ref(Some(class)),
                    _ => ret_info,
                };
                Some(StackEntry { node, info })
            }
        };
        if !self.stack.is_empty() {
            return Err(BadCode::ReturnStackNotEmpty.into());
        }
        if let Some(frame) = self.inline.as_mut() {
            frame.ret = value;
            return Ok(());
        }
        let ret_node = match value {
            Some(entry) => self.node(NodeKind::Return, VarType::Void, [entry.node]),
            None => self.node(NodeKind::Return, VarType::Void, []),
        };
        self.append_stmt(ret_node, 0);
        Ok(())
    }

    pub(super) fn import_throw(&mut self) -> ImportResult<()> {
        let exception = self.pop()?;
        if !exception.info.is_object() {
            return Err(BadCode::type_mismatch(Opcode::Throw, exception.info).into());
        }
        self.discard_stack();
        let call = self.call_helper(Helper::Throw, VarType::Void, [exception.node]);
        self.append_stmt(call, 0);
        Ok(())
    }

    pub(super) fn import_rethrow(&mut self) -> ImportResult<()> {
        let block = self.ctx.block(self.block);
        let in_catch = !block.in_filter
            && block
                .handler_index
                .is_some_and(|r| self.ctx.region(r).has_catch_arg());
        if !in_catch {
            return Err(BadCode::RethrowOutsideCatch.into());
        }
        self.discard_stack();
        let call = self.call_helper(Helper::Rethrow, VarType::Void, []);
        self.append_stmt(call, 0);
        Ok(())
    }
}
